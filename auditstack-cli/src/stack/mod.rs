//! Audit stack assembly
//!
//! Builds the full resource graph from the configuration record: the
//! public-only network, the scheduled audit task, and the alarm pipeline.

mod alarms;
mod network;
mod task;

use anyhow::Result;

use auditstack_core::resource::Value;
use auditstack_core::stack::{Output, Stack};
use auditstack_core::suppress::SuppressionReport;

use crate::config::AuditConfig;

pub use network::NO_NAT_CONDITION;

/// The assembled stack and what the route suppression did to it
pub struct AuditStack {
    pub stack: Stack,
    pub suppression: SuppressionReport,
}

pub fn build(config: &AuditConfig) -> Result<AuditStack> {
    let mut stack = Stack::new(&config.stack_name).with_description(
        "Scheduled Fargate audit task in a public-only VPC with alarm forwarding",
    );

    let (net, suppression) = network::add_public_only_network(&mut stack, &config.network)?;
    let task = task::add_audit_task(&mut stack, config, &net)?;
    let topic = alarms::add_alarm_pipeline(&mut stack, config, &task)?;

    let outputs = [
        ("ClusterName", Value::reference(&task.cluster), "ECS cluster running the audit task"),
        ("AlarmTopicArn", Value::reference(&topic), "Topic receiving audit alarms"),
        ("VpcId", Value::reference(&net.vpc), "VPC of the audit task"),
    ];
    for (logical_id, value, description) in outputs {
        stack.add_output(Output {
            logical_id: logical_id.to_string(),
            value,
            description: Some(description.to_string()),
        })?;
    }

    log::info!(
        "Assembled stack {} with {} resources",
        stack.name(),
        stack.resources().count()
    );
    Ok(AuditStack { stack, suppression })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;

    use auditstack_core::review::check_public_only;
    use auditstack_core::template::synthesize;
    use serde_json::json;

    pub(crate) fn sample_config() -> AuditConfig {
        let content = r#"
bucket_name = "audit-reports"
role_name = "AuditReadOnly"
alarm_destination = "arn:aws:sns:us-east-1:123456789012:ops-alarms"
"#;
        AuditConfig::parse(content, Path::new("test.toml")).unwrap()
    }

    #[test]
    fn full_stack_synthesizes_without_nat_egress() {
        let audit = build(&sample_config()).unwrap();
        assert_eq!(audit.suppression.total(), 2);

        let template = synthesize(&audit.stack).unwrap();
        assert!(check_public_only(&template).is_empty());
        assert_eq!(
            template["Conditions"][NO_NAT_CONDITION],
            json!({ "Fn::Equals": [true, false] })
        );

        let resources = template["Resources"].as_object().unwrap();
        assert!(
            resources
                .values()
                .all(|r| r["Type"] != json!("AWS::EC2::NatGateway"))
        );
        assert_eq!(template["Outputs"]["VpcId"]["Value"], json!({ "Ref": network::VPC_ID }));
    }

    #[test]
    fn network_follows_configured_zone_count() {
        let mut config = sample_config();
        config.network.max_azs = 3;
        let audit = build(&config).unwrap();

        let network = audit.stack.network(network::VPC_ID).unwrap();
        assert_eq!(network.public_subnets().len(), 3);
        assert_eq!(network.private_subnets().len(), 3);
        assert_eq!(audit.suppression.total(), 3);
    }

    #[test]
    fn rebuilding_yields_the_same_template() {
        let config = sample_config();
        let first = synthesize(&build(&config).unwrap().stack).unwrap();
        let second = synthesize(&build(&config).unwrap().stack).unwrap();
        assert_eq!(first, second);
    }
}
