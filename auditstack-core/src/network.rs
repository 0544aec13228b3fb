//! Network - VPC with paired public/private subnets per availability zone
//!
//! The builder follows the usual two-tier layout: every availability zone gets
//! one public subnet routed to an internet gateway and one private subnet whose
//! default route points at a NAT gateway. The private default route is always
//! declared, even when no NAT gateway was requested; in that case it has no
//! target and must be gated by a condition before the graph can be synthesized
//! (see [`crate::suppress`]).

use thiserror::Error;

use crate::cidr::{CidrError, Ipv4Cidr};
use crate::resource::{Resource, ResourceKind, Value, logical_id};

pub const DEFAULT_CIDR: &str = "10.0.0.0/16";

/// Destination of every default route
pub const ANY_IPV4: &str = "0.0.0.0/0";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("Network '{0}' needs at least one availability zone")]
    ZeroAvailabilityZones(String),

    #[error("Network '{id}' requests {requested} NAT gateways but only spans {max_azs} availability zones")]
    TooManyNatGateways {
        id: String,
        requested: usize,
        max_azs: usize,
    },

    #[error("Network '{id}' spans {max_azs} availability zones but only {given} were named")]
    NotEnoughAvailabilityZones {
        id: String,
        max_azs: usize,
        given: usize,
    },

    #[error(transparent)]
    Cidr(#[from] CidrError),
}

/// Request for a network
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkProps {
    pub cidr: String,
    pub max_azs: usize,
    /// One NAT gateway per availability zone unless overridden
    pub nat_gateways: usize,
    /// Explicit zone names; when empty zones are selected from the region at provisioning time
    pub availability_zones: Vec<String>,
}

impl NetworkProps {
    pub fn new(max_azs: usize) -> Self {
        Self {
            cidr: DEFAULT_CIDR.to_string(),
            max_azs,
            nat_gateways: max_azs,
            availability_zones: Vec::new(),
        }
    }

    pub fn with_nat_gateways(mut self, nat_gateways: usize) -> Self {
        self.nat_gateways = nat_gateways;
        self
    }

    pub fn with_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = cidr.into();
        self
    }

    pub fn with_availability_zones(mut self, zones: Vec<String>) -> Self {
        self.availability_zones = zones;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubnetType {
    Public,
    Private,
}

impl SubnetType {
    pub fn label(&self) -> &'static str {
        match self {
            SubnetType::Public => "Public",
            SubnetType::Private => "Private",
        }
    }
}

/// Where a route sends its traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    InternetGateway(String),
    NatGateway(String),
    None,
}

impl RouteTarget {
    pub fn of(route: &Resource) -> Self {
        let target_ref = |key: &str| match route.property(key) {
            Some(Value::Ref(id)) => Some(id.clone()),
            _ => None,
        };
        if let Some(id) = target_ref("GatewayId") {
            RouteTarget::InternetGateway(id)
        } else if let Some(id) = target_ref("NatGatewayId") {
            RouteTarget::NatGateway(id)
        } else {
            RouteTarget::None
        }
    }
}

/// A subnet and the resources generated for it
#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    subnet_type: SubnetType,
    /// 1-based position within its tier
    index: usize,
    cidr: Ipv4Cidr,
    logical_id: String,
    children: Vec<Resource>,
}

impl Subnet {
    pub fn subnet_type(&self) -> SubnetType {
        self.subnet_type
    }

    pub fn cidr(&self) -> Ipv4Cidr {
        self.cidr
    }

    /// Logical id of the `AWS::EC2::Subnet` resource
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Subnet, route table, association, default route, and NAT resources, in declaration order
    pub fn children(&self) -> &[Resource] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Resource> {
        &mut self.children
    }

    pub fn default_routes(&self) -> impl Iterator<Item = &Resource> {
        self.children
            .iter()
            .filter(|r| r.kind() == ResourceKind::Route)
    }

    pub fn nat_gateway(&self) -> Option<&Resource> {
        self.children
            .iter()
            .find(|r| r.kind() == ResourceKind::NatGateway)
    }
}

/// VPC with its gateway and subnets
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    id: String,
    props: NetworkProps,
    vpc: Resource,
    internet_gateway: Resource,
    gateway_attachment: Resource,
    public_subnets: Vec<Subnet>,
    private_subnets: Vec<Subnet>,
}

impl Network {
    pub fn new(id: &str, props: NetworkProps) -> Result<Self, NetworkError> {
        if props.max_azs == 0 {
            return Err(NetworkError::ZeroAvailabilityZones(id.to_string()));
        }
        if props.nat_gateways > props.max_azs {
            return Err(NetworkError::TooManyNatGateways {
                id: id.to_string(),
                requested: props.nat_gateways,
                max_azs: props.max_azs,
            });
        }
        if !props.availability_zones.is_empty() && props.availability_zones.len() < props.max_azs {
            return Err(NetworkError::NotEnoughAvailabilityZones {
                id: id.to_string(),
                max_azs: props.max_azs,
                given: props.availability_zones.len(),
            });
        }

        let cidr: Ipv4Cidr = props.cidr.parse()?;
        let blocks = cidr.split(props.max_azs * 2)?;

        let vpc_id = logical_id(&[id]);
        let vpc = Resource::new(&vpc_id, ResourceKind::Vpc)
            .with_property("CidrBlock", cidr.to_string())
            .with_property("EnableDnsHostnames", true)
            .with_property("EnableDnsSupport", true)
            .with_property("InstanceTenancy", "default")
            .with_property("Tags", name_tags(id, None));

        let igw_id = logical_id(&[id, "InternetGateway"]);
        let internet_gateway = Resource::new(&igw_id, ResourceKind::InternetGateway)
            .with_property("Tags", name_tags(id, None));

        let attachment_id = logical_id(&[id, "GatewayAttachment"]);
        let gateway_attachment = Resource::new(&attachment_id, ResourceKind::VpcGatewayAttachment)
            .with_property("VpcId", Value::reference(&vpc_id))
            .with_property("InternetGatewayId", Value::reference(&igw_id));

        let builder = SubnetBuilder {
            network_id: id,
            vpc_id: &vpc_id,
            zones: &props.availability_zones,
        };

        let mut public_subnets = Vec::with_capacity(props.max_azs);
        for (i, block) in blocks[..props.max_azs].iter().enumerate() {
            let target = RouteTarget::InternetGateway(igw_id.clone());
            let mut subnet = builder.build(SubnetType::Public, i, *block, target);
            subnet.children[3].depends_on.push(attachment_id.clone());
            if i < props.nat_gateways {
                builder.add_nat_gateway(&mut subnet);
            }
            public_subnets.push(subnet);
        }

        let nat_ids: Vec<String> = public_subnets
            .iter()
            .filter_map(|s| s.nat_gateway().map(|r| r.logical_id.clone()))
            .collect();

        let mut private_subnets = Vec::with_capacity(props.max_azs);
        for (i, block) in blocks[props.max_azs..].iter().enumerate() {
            let target = if nat_ids.is_empty() {
                RouteTarget::None
            } else {
                RouteTarget::NatGateway(nat_ids[i % nat_ids.len()].clone())
            };
            private_subnets.push(builder.build(SubnetType::Private, i, *block, target));
        }

        log::debug!(
            "Network {}: {} availability zones, {} NAT gateways, {} subnets carved from {}",
            id,
            props.max_azs,
            nat_ids.len(),
            blocks.len(),
            cidr
        );

        Ok(Self {
            id: id.to_string(),
            props,
            vpc,
            internet_gateway,
            gateway_attachment,
            public_subnets,
            private_subnets,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn props(&self) -> &NetworkProps {
        &self.props
    }

    /// Logical id of the `AWS::EC2::VPC` resource
    pub fn vpc_id(&self) -> &str {
        &self.vpc.logical_id
    }

    pub fn public_subnets(&self) -> &[Subnet] {
        &self.public_subnets
    }

    pub fn private_subnets(&self) -> &[Subnet] {
        &self.private_subnets
    }

    pub fn private_subnets_mut(&mut self) -> &mut [Subnet] {
        &mut self.private_subnets
    }

    /// `Ref`s to the public subnets, for placing tasks that need outbound access
    pub fn public_subnet_refs(&self) -> Value {
        Value::list(
            self.public_subnets
                .iter()
                .map(|s| Value::reference(s.logical_id())),
        )
    }

    /// Every resource of the network, VPC first, then public and private subnets
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        [&self.vpc, &self.internet_gateway, &self.gateway_attachment]
            .into_iter()
            .chain(
                self.public_subnets
                    .iter()
                    .chain(self.private_subnets.iter())
                    .flat_map(|s| s.children.iter()),
            )
    }

    pub fn nat_gateways(&self) -> impl Iterator<Item = &Resource> {
        self.resources()
            .filter(|r| r.kind() == ResourceKind::NatGateway)
    }
}

struct SubnetBuilder<'a> {
    network_id: &'a str,
    vpc_id: &'a str,
    zones: &'a [String],
}

impl SubnetBuilder<'_> {
    fn build(
        &self,
        subnet_type: SubnetType,
        position: usize,
        cidr: Ipv4Cidr,
        target: RouteTarget,
    ) -> Subnet {
        let name = format!("{}Subnet{}", subnet_type.label(), position + 1);
        let id = |suffix: &str| logical_id(&[self.network_id, &name, suffix]);
        let subnet_id = id("Subnet");
        let table_id = id("RouteTable");

        let zone = match self.zones.get(position) {
            Some(zone) => Value::string(zone),
            None => Value::availability_zone(position),
        };

        let subnet = Resource::new(&subnet_id, ResourceKind::Subnet)
            .with_property("VpcId", Value::reference(self.vpc_id))
            .with_property("CidrBlock", cidr.to_string())
            .with_property("AvailabilityZone", zone)
            .with_property("MapPublicIpOnLaunch", subnet_type == SubnetType::Public)
            .with_property("Tags", name_tags(&format!("{}/{}", self.network_id, name), Some(subnet_type)));

        let table = Resource::new(&table_id, ResourceKind::RouteTable)
            .with_property("VpcId", Value::reference(self.vpc_id))
            .with_property("Tags", name_tags(&format!("{}/{}", self.network_id, name), None));

        let association = Resource::new(id("RouteTableAssociation"), ResourceKind::SubnetRouteTableAssociation)
            .with_property("RouteTableId", Value::reference(&table_id))
            .with_property("SubnetId", Value::reference(&subnet_id));

        let mut route = Resource::new(id("DefaultRoute"), ResourceKind::Route)
            .with_property("RouteTableId", Value::reference(&table_id))
            .with_property("DestinationCidrBlock", ANY_IPV4);
        match target {
            RouteTarget::InternetGateway(igw) => {
                route = route.with_property("GatewayId", Value::reference(igw));
            }
            RouteTarget::NatGateway(nat) => {
                route = route.with_property("NatGatewayId", Value::reference(nat));
            }
            RouteTarget::None => {}
        }

        Subnet {
            subnet_type,
            index: position + 1,
            cidr,
            logical_id: subnet_id,
            children: vec![subnet, table, association, route],
        }
    }

    fn add_nat_gateway(&self, subnet: &mut Subnet) {
        let name = format!("{}Subnet{}", subnet.subnet_type.label(), subnet.index);
        let eip_id = logical_id(&[self.network_id, &name, "EIP"]);
        let route_id = subnet.children[3].logical_id.clone();

        let eip = Resource::new(&eip_id, ResourceKind::Eip).with_property("Domain", "vpc");
        let nat = Resource::new(logical_id(&[self.network_id, &name, "NATGateway"]), ResourceKind::NatGateway)
            .with_property("AllocationId", Value::get_att(&eip_id, "AllocationId"))
            .with_property("SubnetId", Value::reference(&subnet.logical_id))
            .with_depends_on(route_id);

        subnet.children.push(eip);
        subnet.children.push(nat);
    }
}

fn name_tags(name: &str, subnet_type: Option<SubnetType>) -> Value {
    let mut tags = vec![Value::map([
        ("Key", Value::from("Name")),
        ("Value", Value::from(name)),
    ])];
    if let Some(subnet_type) = subnet_type {
        tags.push(Value::map([
            ("Key", Value::from("subnet-type")),
            ("Value", Value::from(subnet_type.label())),
        ]));
    }
    Value::List(tags)
}
