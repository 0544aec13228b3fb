//! Resource - Typed resource declarations and their property values

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::LazyLock;

use heck::ToUpperCamelCase;
use regex::Regex;
use serde_json::json;

use crate::condition::Condition;

macro_rules! define_resource_kinds {
    ($($variant:ident => $cfn_type:literal),* $(,)?) => {
        /// Kind of a resource, one variant per CloudFormation resource type
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ResourceKind {
            $($variant,)*
        }

        impl ResourceKind {
            /// Every kind the graph can declare
            pub const ALL: &'static [ResourceKind] = &[$(ResourceKind::$variant,)*];

            /// CloudFormation type name (e.g., "AWS::EC2::Route")
            pub fn cfn_type(&self) -> &'static str {
                match self {
                    $(ResourceKind::$variant => $cfn_type,)*
                }
            }

            pub fn from_cfn_type(type_name: &str) -> Option<Self> {
                match type_name {
                    $($cfn_type => Some(ResourceKind::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

define_resource_kinds! {
    // Network
    Vpc => "AWS::EC2::VPC",
    Subnet => "AWS::EC2::Subnet",
    RouteTable => "AWS::EC2::RouteTable",
    SubnetRouteTableAssociation => "AWS::EC2::SubnetRouteTableAssociation",
    Route => "AWS::EC2::Route",
    InternetGateway => "AWS::EC2::InternetGateway",
    VpcGatewayAttachment => "AWS::EC2::VPCGatewayAttachment",
    Eip => "AWS::EC2::EIP",
    NatGateway => "AWS::EC2::NatGateway",
    SecurityGroup => "AWS::EC2::SecurityGroup",
    // Compute
    EcsCluster => "AWS::ECS::Cluster",
    EcsTaskDefinition => "AWS::ECS::TaskDefinition",
    LambdaFunction => "AWS::Lambda::Function",
    LambdaPermission => "AWS::Lambda::Permission",
    // Identity
    IamRole => "AWS::IAM::Role",
    IamPolicy => "AWS::IAM::Policy",
    // Scheduling and monitoring
    EventsRule => "AWS::Events::Rule",
    LogGroup => "AWS::Logs::LogGroup",
    MetricFilter => "AWS::Logs::MetricFilter",
    Alarm => "AWS::CloudWatch::Alarm",
    SnsTopic => "AWS::SNS::Topic",
    SnsSubscription => "AWS::SNS::Subscription",
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cfn_type())
    }
}

/// Property value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Primary identifier of another resource, or a pseudo parameter such as `AWS::Region`
    Ref(String),
    /// Attribute of another resource (logical_id, attribute_name)
    GetAtt(String, String),
    /// String with `${...}` substitutions
    Sub(String),
    Join(String, Vec<Value>),
    Select(usize, Box<Value>),
    /// Availability zones of the current region
    GetAzs,
}

static SUB_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9]+)(?:\.[A-Za-z0-9.]+)?\}").unwrap());

static LOGICAL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{1,255}$").unwrap());

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn reference(logical_id: impl Into<String>) -> Self {
        Value::Ref(logical_id.into())
    }

    pub fn get_att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Value::GetAtt(logical_id.into(), attribute.into())
    }

    pub fn sub(template: impl Into<String>) -> Self {
        Value::Sub(template.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// `{"Fn::Select": [index, {"Fn::GetAZs": ""}]}`
    pub fn availability_zone(index: usize) -> Self {
        Value::Select(index, Box::new(Value::GetAzs))
    }

    /// Render as CloudFormation template JSON
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => json!(s),
            Value::Int(n) => json!(n),
            Value::Bool(b) => json!(b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Ref(id) => json!({ "Ref": id }),
            Value::GetAtt(id, attr) => json!({ "Fn::GetAtt": [id, attr] }),
            Value::Sub(template) => json!({ "Fn::Sub": template }),
            Value::Join(sep, parts) => {
                let parts: Vec<_> = parts.iter().map(Value::to_json).collect();
                json!({ "Fn::Join": [sep, parts] })
            }
            Value::Select(index, list) => json!({ "Fn::Select": [index, list.to_json()] }),
            Value::GetAzs => json!({ "Fn::GetAZs": "" }),
        }
    }

    /// Logical ids of the resources this value refers to.
    /// Pseudo parameters (`AWS::*`) are not resources and are skipped.
    pub fn references(&self) -> Vec<String> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<String>) {
        match self {
            Value::Ref(id) | Value::GetAtt(id, _) => {
                if !id.starts_with("AWS::") {
                    refs.push(id.clone());
                }
            }
            Value::Sub(template) => {
                for caps in SUB_REFERENCE.captures_iter(template) {
                    refs.push(caps[1].to_string());
                }
            }
            Value::List(items) | Value::Join(_, items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.collect_references(refs);
                }
            }
            Value::Select(_, list) => list.collect_references(refs),
            Value::String(_) | Value::Int(_) | Value::Bool(_) | Value::GetAzs => {}
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

/// Build a logical id from construct path segments (e.g., ["Vpc", "PublicSubnet1", "Subnet"])
pub fn logical_id(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.to_upper_camel_case())
        .collect::<String>()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

pub fn is_valid_logical_id(id: &str) -> bool {
    LOGICAL_ID.is_match(id)
}

/// A resource declaration in the graph
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub properties: BTreeMap<String, Value>,
    /// Logical ids this resource must be created after
    pub depends_on: Vec<String>,
    /// Creation condition; shared with every other resource gated by it
    condition: Option<Rc<Condition>>,
}

impl Resource {
    pub fn new(logical_id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            logical_id: logical_id.into(),
            kind,
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
            condition: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    pub fn with_condition(mut self, condition: &Rc<Condition>) -> Self {
        self.set_condition(condition);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn condition(&self) -> Option<&Rc<Condition>> {
        self.condition.as_ref()
    }

    /// Gate creation of this resource on `condition`.
    ///
    /// Returns false when the very same condition instance was already attached.
    pub fn set_condition(&mut self, condition: &Rc<Condition>) -> bool {
        if let Some(existing) = &self.condition
            && Rc::ptr_eq(existing, condition)
        {
            return false;
        }
        self.condition = Some(Rc::clone(condition));
        true
    }

    /// Logical ids this resource depends on, through properties or explicit ordering
    pub fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .properties
            .values()
            .flat_map(Value::references)
            .collect();
        refs.extend(self.depends_on.iter().cloned());
        refs.sort();
        refs.dedup();
        refs
    }
}
