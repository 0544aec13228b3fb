//! Suppress - Public-only networks without NAT charges
//!
//! The network builder insists on a private subnet next to every public one,
//! and declares a default route for each private subnet on the assumption that
//! it egresses through a NAT gateway. A NAT gateway is billed for every hour it
//! exists, so a network that only needs public subnets asks for zero of them and
//! then gates every private default route on a condition that can never hold.
//! The subnets, route tables and associations stay in the graph; only the
//! dangling routes disappear from the materialized infrastructure.

use std::rc::Rc;

use thiserror::Error;

use crate::condition::Condition;
use crate::network::Network;
use crate::resource::ResourceKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SuppressError {
    #[error("Condition '{0}' is not statically false; suppressed routes could still be created")]
    ConditionNotAlwaysFalse(String),

    #[error("Network '{network}' declares {count} NAT gateway(s); request zero to avoid NAT charges")]
    NatGatewaysPresent { network: String, count: usize },

    #[error("Private subnet '{subnet}' has no default route to suppress; the subnet layout has changed")]
    NoDefaultRoute { subnet: String },
}

/// Routes gated on the condition, per private subnet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuppressionReport {
    /// (subnet logical id, number of routes gated on the condition)
    pub subnets: Vec<(String, usize)>,
    /// Routes that were already gated on the same condition instance
    pub already_suppressed: usize,
}

impl SuppressionReport {
    pub fn total(&self) -> usize {
        self.subnets.iter().map(|(_, count)| count).sum()
    }
}

/// Gate every default route of every private subnet on `condition`.
///
/// Routes are recognised by kind alone: the route table and its subnet
/// association are left untouched so the subnet stays valid. Applying this
/// twice with the same condition leaves the network unchanged.
pub fn suppress_private_default_routes(
    network: &mut Network,
    condition: &Rc<Condition>,
) -> Result<SuppressionReport, SuppressError> {
    if !condition.is_always_false() {
        return Err(SuppressError::ConditionNotAlwaysFalse(
            condition.name().to_string(),
        ));
    }

    let nat_count = network.nat_gateways().count();
    if nat_count > 0 {
        return Err(SuppressError::NatGatewaysPresent {
            network: network.id().to_string(),
            count: nat_count,
        });
    }

    // Locate every route before touching any, so a failure leaves the network as it was
    let mut routes = Vec::new();
    for subnet in network.private_subnets() {
        let positions: Vec<usize> = subnet
            .children()
            .iter()
            .enumerate()
            .filter(|(_, child)| child.kind() == ResourceKind::Route)
            .map(|(position, _)| position)
            .collect();
        if positions.is_empty() {
            return Err(SuppressError::NoDefaultRoute {
                subnet: subnet.logical_id().to_string(),
            });
        }
        routes.push(positions);
    }

    let mut report = SuppressionReport::default();
    for (subnet, positions) in network.private_subnets_mut().iter_mut().zip(routes) {
        let subnet_id = subnet.logical_id().to_string();
        let children = subnet.children_mut();
        for &position in &positions {
            let route = &mut children[position];
            if !route.set_condition(condition) {
                report.already_suppressed += 1;
            }
            log::debug!(
                "Route {} in {} gated on {}",
                route.logical_id,
                subnet_id,
                condition.name()
            );
        }
        report.subnets.push((subnet_id, positions.len()));
    }

    log::info!(
        "Suppressed {} private default route(s) in network {}",
        report.total(),
        network.id()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionExpr, Operand};
    use crate::network::{NetworkProps, RouteTarget};

    fn public_only(max_azs: usize) -> Network {
        Network::new("Vpc", NetworkProps::new(max_azs).with_nat_gateways(0)).unwrap()
    }

    #[test]
    fn every_private_default_route_gets_the_shared_condition() {
        let mut network = public_only(2);
        let condition = Rc::new(Condition::always_false("PublicOnly"));

        let report = suppress_private_default_routes(&mut network, &condition).unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(
            report.subnets,
            vec![
                ("VpcPrivateSubnet1Subnet".to_string(), 1),
                ("VpcPrivateSubnet2Subnet".to_string(), 1),
            ]
        );
        assert_eq!(network.private_subnets().len(), 2);
        for subnet in network.private_subnets() {
            let routes: Vec<_> = subnet.default_routes().collect();
            assert_eq!(routes.len(), 1);
            let attached = routes[0].condition().unwrap();
            assert!(Rc::ptr_eq(attached, &condition));
            assert!(attached.is_always_false());
        }
        assert_eq!(network.nat_gateways().count(), 0);
    }

    #[test]
    fn siblings_of_the_route_are_untouched() {
        let mut network = public_only(1);
        let condition = Rc::new(Condition::always_false("PublicOnly"));
        suppress_private_default_routes(&mut network, &condition).unwrap();

        for child in network.private_subnets()[0].children() {
            if child.kind() != ResourceKind::Route {
                assert!(child.condition().is_none(), "{} gated", child.logical_id);
            }
        }
    }

    #[test]
    fn public_routes_stay_unconditional() {
        let mut network = public_only(3);
        let condition = Rc::new(Condition::always_false("PublicOnly"));
        suppress_private_default_routes(&mut network, &condition).unwrap();

        for subnet in network.public_subnets() {
            let route = subnet.default_routes().next().unwrap();
            assert!(route.condition().is_none());
            assert!(matches!(RouteTarget::of(route), RouteTarget::InternetGateway(_)));
        }
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut network = public_only(2);
        let condition = Rc::new(Condition::always_false("PublicOnly"));

        let first = suppress_private_default_routes(&mut network, &condition).unwrap();
        let after_first = network.clone();
        let second = suppress_private_default_routes(&mut network, &condition).unwrap();

        assert_eq!(first.subnets, second.subnets);
        assert_eq!(first.already_suppressed, 0);
        assert_eq!(second.already_suppressed, 2);
        assert_eq!(network, after_first);
        assert_eq!(network.private_subnets().len(), 2);
        assert_eq!(network.public_subnets().len(), 2);
    }

    #[test]
    fn missing_default_route_fails_fast() {
        let mut network = public_only(2);
        network.private_subnets_mut()[1]
            .children_mut()
            .retain(|r| r.kind() != ResourceKind::Route);
        let condition = Rc::new(Condition::always_false("PublicOnly"));

        assert_eq!(
            suppress_private_default_routes(&mut network, &condition),
            Err(SuppressError::NoDefaultRoute {
                subnet: "VpcPrivateSubnet2Subnet".to_string()
            })
        );
    }

    #[test]
    fn failed_run_leaves_earlier_subnets_ungated() {
        let mut network = public_only(2);
        network.private_subnets_mut()[1]
            .children_mut()
            .retain(|r| r.kind() != ResourceKind::Route);
        let before = network.clone();
        let condition = Rc::new(Condition::always_false("PublicOnly"));

        assert!(suppress_private_default_routes(&mut network, &condition).is_err());
        assert_eq!(network, before);
        assert!(network.private_subnets()[0]
            .default_routes()
            .all(|r| r.condition().is_none()));
    }

    #[test]
    fn parameterised_condition_is_rejected() {
        let mut network = public_only(1);
        let condition = Rc::new(Condition::new(
            "MaybeNat",
            ConditionExpr::Equals(Operand::Parameter("UseNat".into()), Operand::Bool(true)),
        ));

        assert_eq!(
            suppress_private_default_routes(&mut network, &condition),
            Err(SuppressError::ConditionNotAlwaysFalse("MaybeNat".to_string()))
        );
        assert!(network.private_subnets()[0]
            .default_routes()
            .all(|r| r.condition().is_none()));
    }

    #[test]
    fn networks_with_nat_gateways_are_rejected() {
        let mut network = Network::new("Vpc", NetworkProps::new(2).with_nat_gateways(1)).unwrap();
        let condition = Rc::new(Condition::always_false("PublicOnly"));

        assert!(matches!(
            suppress_private_default_routes(&mut network, &condition),
            Err(SuppressError::NatGatewaysPresent { count: 1, .. })
        ));
    }
}
