//! Audit error alarm, forwarded to an external topic through a Lambda

use anyhow::Result;

use auditstack_core::iam::{PolicyDocument, PolicyStatement};
use auditstack_core::resource::{Resource, ResourceKind, Value, logical_id};
use auditstack_core::stack::Stack;

use super::task::TaskRefs;
use crate::config::AuditConfig;

const FORWARDER_SOURCE: &str = r#"import json
import os

import boto3

sns = boto3.client("sns")


def handler(event, context):
    for record in event.get("Records", []):
        message = record["Sns"]
        sns.publish(
            TopicArn=os.environ["DESTINATION_TOPIC_ARN"],
            Subject=(message.get("Subject") or "Audit alarm")[:100],
            Message=message["Message"],
        )
    return {"forwarded": len(event.get("Records", []))}
"#;

/// Add the metric filter, alarm, topic, and forwarder. Returns the topic's logical id.
pub fn add_alarm_pipeline(stack: &mut Stack, config: &AuditConfig, task: &TaskRefs) -> Result<String> {
    let alarm = &config.alarm;
    let topic_id = logical_id(&["AuditAlarm", "Topic"]);
    let forwarder_id = logical_id(&["AlarmForwarder", "Function"]);
    let forwarder_role_id = logical_id(&["AlarmForwarder", "Role"]);
    let forwarder_policy_id = logical_id(&["AlarmForwarder", "Policy"]);

    stack.add_resource(
        Resource::new(logical_id(&["AuditErrors", "MetricFilter"]), ResourceKind::MetricFilter)
            .with_property("LogGroupName", Value::reference(&task.log_group))
            .with_property("FilterPattern", alarm.filter_pattern.as_str())
            .with_property(
                "MetricTransformations",
                Value::list([Value::map([
                    ("MetricNamespace", Value::from(alarm.namespace.as_str())),
                    ("MetricName", Value::from(alarm.metric_name.as_str())),
                    ("MetricValue", Value::from("1")),
                    ("DefaultValue", Value::Int(0)),
                ])]),
            ),
    )?;

    stack.add_resource(
        Resource::new(&topic_id, ResourceKind::SnsTopic)
            .with_property("DisplayName", format!("{} audit alarms", config.stack_name)),
    )?;

    stack.add_resource(
        Resource::new(logical_id(&["AuditErrors", "Alarm"]), ResourceKind::Alarm)
            .with_property("AlarmDescription", "The audit task logged errors")
            .with_property("Namespace", alarm.namespace.as_str())
            .with_property("MetricName", alarm.metric_name.as_str())
            .with_property("Statistic", "Sum")
            .with_property("Period", alarm.period_seconds)
            .with_property("EvaluationPeriods", alarm.evaluation_periods)
            .with_property("Threshold", alarm.threshold)
            .with_property("ComparisonOperator", "GreaterThanOrEqualToThreshold")
            .with_property("TreatMissingData", "notBreaching")
            .with_property("AlarmActions", Value::list([Value::reference(&topic_id)])),
    )?;

    stack.add_resource(
        Resource::new(&forwarder_role_id, ResourceKind::IamRole)
            .with_property(
                "AssumeRolePolicyDocument",
                PolicyDocument::assume_role("lambda.amazonaws.com"),
            )
            .with_property(
                "ManagedPolicyArns",
                Value::list([Value::sub(
                    "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole",
                )]),
            ),
    )?;

    stack.add_resource(
        Resource::new(&forwarder_policy_id, ResourceKind::IamPolicy)
            .with_property("PolicyName", "ForwardAuditAlarms")
            .with_property(
                "PolicyDocument",
                PolicyDocument::new().statement(
                    PolicyStatement::allow(["sns:Publish"]).on(config.alarm_destination.as_str()),
                ),
            )
            .with_property("Roles", Value::list([Value::reference(&forwarder_role_id)])),
    )?;

    stack.add_resource(
        Resource::new(&forwarder_id, ResourceKind::LambdaFunction)
            .with_property("Runtime", "python3.12")
            .with_property("Handler", "index.handler")
            .with_property("Timeout", 30_i64)
            .with_property("Role", Value::get_att(&forwarder_role_id, "Arn"))
            .with_property("Code", Value::map([("ZipFile", Value::from(FORWARDER_SOURCE))]))
            .with_property(
                "Environment",
                Value::map([(
                    "Variables",
                    Value::map([(
                        "DESTINATION_TOPIC_ARN",
                        Value::from(config.alarm_destination.as_str()),
                    )]),
                )]),
            )
            .with_depends_on(&forwarder_policy_id),
    )?;

    stack.add_resource(
        Resource::new(logical_id(&["AlarmForwarder", "Subscription"]), ResourceKind::SnsSubscription)
            .with_property("TopicArn", Value::reference(&topic_id))
            .with_property("Protocol", "lambda")
            .with_property("Endpoint", Value::get_att(&forwarder_id, "Arn")),
    )?;

    stack.add_resource(
        Resource::new(logical_id(&["AlarmForwarder", "Permission"]), ResourceKind::LambdaPermission)
            .with_property("Action", "lambda:InvokeFunction")
            .with_property("FunctionName", Value::reference(&forwarder_id))
            .with_property("Principal", "sns.amazonaws.com")
            .with_property("SourceArn", Value::reference(&topic_id)),
    )?;

    log::debug!("Alarms forward to {}", config.alarm_destination);
    Ok(topic_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::network::add_public_only_network;
    use crate::stack::task::add_audit_task;
    use crate::stack::tests::sample_config;
    use auditstack_core::template::synthesize;
    use serde_json::json;

    fn alarm_template() -> serde_json::Value {
        let config = sample_config();
        let mut stack = Stack::new("Audit");
        let (net, _) = add_public_only_network(&mut stack, &config.network).unwrap();
        let task = add_audit_task(&mut stack, &config, &net).unwrap();
        let topic = add_alarm_pipeline(&mut stack, &config, &task).unwrap();
        assert_eq!(topic, "AuditAlarmTopic");
        synthesize(&stack).unwrap()
    }

    #[test]
    fn alarm_notifies_local_topic() {
        let template = alarm_template();
        let alarm = &template["Resources"]["AuditErrorsAlarm"]["Properties"];

        assert_eq!(alarm["MetricName"], json!("AuditErrors"));
        assert_eq!(alarm["ComparisonOperator"], json!("GreaterThanOrEqualToThreshold"));
        assert_eq!(alarm["AlarmActions"], json!([{ "Ref": "AuditAlarmTopic" }]));

        let filter = &template["Resources"]["AuditErrorsMetricFilter"]["Properties"];
        assert_eq!(filter["LogGroupName"], json!({ "Ref": "AuditTaskLogGroup" }));
    }

    #[test]
    fn forwarder_publishes_to_destination_only() {
        let template = alarm_template();
        let destination = "arn:aws:sns:us-east-1:123456789012:ops-alarms";

        let policy = &template["Resources"]["AlarmForwarderPolicy"]["Properties"]["PolicyDocument"];
        assert_eq!(policy["Statement"][0]["Action"], json!("sns:Publish"));
        assert_eq!(policy["Statement"][0]["Resource"], json!(destination));

        let function = &template["Resources"]["AlarmForwarderFunction"];
        assert_eq!(
            function["Properties"]["Environment"]["Variables"]["DESTINATION_TOPIC_ARN"],
            json!(destination)
        );
        assert_eq!(function["DependsOn"], json!(["AlarmForwarderPolicy"]));
    }

    #[test]
    fn topic_may_invoke_forwarder() {
        let template = alarm_template();
        let permission = &template["Resources"]["AlarmForwarderPermission"]["Properties"];

        assert_eq!(permission["Principal"], json!("sns.amazonaws.com"));
        assert_eq!(permission["SourceArn"], json!({ "Ref": "AuditAlarmTopic" }));
    }
}
