use anyhow::{Context, Result};

use auditstack_core::condition::Condition;
use auditstack_core::network::{Network, NetworkProps};
use auditstack_core::resource::Value;
use auditstack_core::stack::Stack;
use auditstack_core::suppress::{SuppressionReport, suppress_private_default_routes};

use crate::config::NetworkConfig;

/// Construct id of the network, and logical id of its VPC
pub const VPC_ID: &str = "Vpc";

/// Condition gating the private default routes
pub const NO_NAT_CONDITION: &str = "PublicOnlyNetworkNoNatRoutes";

/// What the rest of the stack needs from the network
pub struct NetworkRefs {
    pub vpc: String,
    pub public_subnets: Value,
}

/// Add a VPC whose private subnets exist but never route anywhere, so no NAT gateway is billed
pub fn add_public_only_network(
    stack: &mut Stack,
    config: &NetworkConfig,
) -> Result<(NetworkRefs, SuppressionReport)> {
    let props = NetworkProps::new(config.max_azs)
        .with_nat_gateways(0)
        .with_cidr(&config.cidr)
        .with_availability_zones(config.availability_zones.clone());
    let mut network = Network::new(VPC_ID, props)?;

    let condition = stack.add_condition(Condition::always_false(NO_NAT_CONDITION))?;
    let report = suppress_private_default_routes(&mut network, &condition)
        .context("Failed to suppress private subnet routes")?;

    let refs = NetworkRefs {
        vpc: network.vpc_id().to_string(),
        public_subnets: network.public_subnet_refs(),
    };
    stack.add_network(network)?;
    Ok((refs, report))
}
