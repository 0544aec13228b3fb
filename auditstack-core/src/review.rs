//! Review - Plan-time checks on a synthesized template
//!
//! Catches a public-only network that has regained NAT egress, whether through
//! a changed network layout or a hand-edited template.

use std::fmt;

use crate::condition::ConditionExpr;
use crate::resource::ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// A NAT gateway that would be created
    NatGateway { logical_id: String },
    /// A default route that does not go to an internet gateway and is not gated on an always-false condition
    UngatedEgressRoute { logical_id: String },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::NatGateway { logical_id } => {
                write!(f, "{}: NAT gateway would be provisioned", logical_id)
            }
            Finding::UngatedEgressRoute { logical_id } => write!(
                f,
                "{}: route is not gated by an always-false condition and does not target an internet gateway",
                logical_id
            ),
        }
    }
}

/// Check that `template` provisions no NAT egress
pub fn check_public_only(template: &serde_json::Value) -> Vec<Finding> {
    let Some(resources) = template.get("Resources").and_then(|r| r.as_object()) else {
        return Vec::new();
    };

    let is_suppressed = |resource: &serde_json::Value| {
        resource
            .get("Condition")
            .and_then(|c| c.as_str())
            .and_then(|name| template.get("Conditions")?.get(name))
            .and_then(ConditionExpr::from_json)
            .and_then(|expr| expr.constant_value())
            == Some(false)
    };

    let mut findings = Vec::new();
    for (logical_id, resource) in resources {
        let type_name = resource.get("Type").and_then(|t| t.as_str()).unwrap_or("");
        match ResourceKind::from_cfn_type(type_name) {
            Some(ResourceKind::NatGateway) if !is_suppressed(resource) => {
                findings.push(Finding::NatGateway {
                    logical_id: logical_id.clone(),
                });
            }
            Some(ResourceKind::Route) => {
                let to_internet_gateway = resource
                    .get("Properties")
                    .and_then(|p| p.get("GatewayId"))
                    .is_some();
                if !to_internet_gateway && !is_suppressed(resource) {
                    findings.push(Finding::UngatedEgressRoute {
                        logical_id: logical_id.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    findings
}
