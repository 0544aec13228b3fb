//! The scheduled audit task: cluster, task definition, roles, and schedule

use anyhow::Result;

use auditstack_core::iam::{PolicyDocument, PolicyStatement};
use auditstack_core::resource::{Resource, ResourceKind, Value, logical_id};
use auditstack_core::stack::Stack;

use super::network::NetworkRefs;
use crate::config::AuditConfig;

const CONTAINER_NAME: &str = "auditor";

/// Logical ids other parts of the stack refer to
pub struct TaskRefs {
    pub cluster: String,
    pub log_group: String,
}

pub fn add_audit_task(stack: &mut Stack, config: &AuditConfig, net: &NetworkRefs) -> Result<TaskRefs> {
    let id = |part: &str| logical_id(&["AuditTask", part]);
    let cluster_id = id("Cluster");
    let log_group_id = id("LogGroup");
    let security_group_id = id("SecurityGroup");
    let execution_role_id = id("ExecutionRole");
    let task_role_id = id("Role");
    let task_definition_id = id("Definition");
    let schedule_role_id = logical_id(&["AuditSchedule", "Role"]);

    stack.add_resource(Resource::new(&cluster_id, ResourceKind::EcsCluster))?;

    stack.add_resource(
        Resource::new(&log_group_id, ResourceKind::LogGroup)
            .with_property("RetentionInDays", config.task.log_retention_days),
    )?;

    // Egress only; the task is never reached from outside
    stack.add_resource(
        Resource::new(&security_group_id, ResourceKind::SecurityGroup)
            .with_property("GroupDescription", "Audit task, outbound only")
            .with_property("VpcId", Value::reference(&net.vpc))
            .with_property(
                "SecurityGroupEgress",
                Value::list([Value::map([
                    ("CidrIp", Value::from("0.0.0.0/0")),
                    ("IpProtocol", Value::from("-1")),
                    ("Description", Value::from("Allow all outbound traffic")),
                ])]),
            ),
    )?;

    stack.add_resource(
        Resource::new(&execution_role_id, ResourceKind::IamRole)
            .with_property(
                "AssumeRolePolicyDocument",
                PolicyDocument::assume_role("ecs-tasks.amazonaws.com"),
            )
            .with_property(
                "ManagedPolicyArns",
                Value::list([Value::sub(
                    "arn:${AWS::Partition}:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy",
                )]),
            ),
    )?;

    stack.add_resource(
        Resource::new(&task_role_id, ResourceKind::IamRole).with_property(
            "AssumeRolePolicyDocument",
            PolicyDocument::assume_role("ecs-tasks.amazonaws.com"),
        ),
    )?;

    stack.add_resource(
        Resource::new(id("RolePolicy"), ResourceKind::IamPolicy)
            .with_property("PolicyName", "AuditTaskPermissions")
            .with_property("PolicyDocument", task_permissions(config))
            .with_property("Roles", Value::list([Value::reference(&task_role_id)])),
    )?;

    stack.add_resource(
        Resource::new(&task_definition_id, ResourceKind::EcsTaskDefinition)
            .with_property("Family", format!("{}-audit", config.stack_name))
            .with_property("Cpu", config.task.cpu.to_string())
            .with_property("Memory", config.task.memory.to_string())
            .with_property("NetworkMode", "awsvpc")
            .with_property("RequiresCompatibilities", Value::list([Value::from("FARGATE")]))
            .with_property("ExecutionRoleArn", Value::get_att(&execution_role_id, "Arn"))
            .with_property("TaskRoleArn", Value::get_att(&task_role_id, "Arn"))
            .with_property("ContainerDefinitions", Value::list([container(config, &log_group_id)])),
    )?;

    let run_task = PolicyDocument::new()
        .statement(PolicyStatement::allow(["ecs:RunTask"]).on(Value::reference(&task_definition_id)))
        .statement(
            PolicyStatement::allow(["iam:PassRole"])
                .on(Value::get_att(&execution_role_id, "Arn"))
                .on(Value::get_att(&task_role_id, "Arn")),
        );
    stack.add_resource(
        Resource::new(&schedule_role_id, ResourceKind::IamRole)
            .with_property(
                "AssumeRolePolicyDocument",
                PolicyDocument::assume_role("events.amazonaws.com"),
            )
            .with_property(
                "Policies",
                Value::list([Value::map([
                    ("PolicyName", Value::from("RunAuditTask")),
                    ("PolicyDocument", run_task.into()),
                ])]),
            ),
    )?;

    // Public subnets with a public IP: there is no NAT to reach the registry or S3 through
    let target = Value::map([
        ("Id", Value::from("AuditTask")),
        ("Arn", Value::get_att(&cluster_id, "Arn")),
        ("RoleArn", Value::get_att(&schedule_role_id, "Arn")),
        (
            "EcsParameters",
            Value::map([
                ("TaskDefinitionArn", Value::reference(&task_definition_id)),
                ("TaskCount", Value::Int(1)),
                ("LaunchType", Value::from("FARGATE")),
                (
                    "NetworkConfiguration",
                    Value::map([(
                        "AwsVpcConfiguration",
                        Value::map([
                            ("AssignPublicIp", Value::from("ENABLED")),
                            ("Subnets", net.public_subnets.clone()),
                            (
                                "SecurityGroups",
                                Value::list([Value::get_att(&security_group_id, "GroupId")]),
                            ),
                        ]),
                    )]),
                ),
            ]),
        ),
    ]);
    stack.add_resource(
        Resource::new(logical_id(&["AuditSchedule", "Rule"]), ResourceKind::EventsRule)
            .with_property("Description", "Runs the audit task on schedule")
            .with_property("ScheduleExpression", config.task.schedule.as_str())
            .with_property("State", "ENABLED")
            .with_property("Targets", Value::list([target])),
    )?;

    Ok(TaskRefs {
        cluster: cluster_id,
        log_group: log_group_id,
    })
}

/// Read and write reports in the bucket, and assume the audit role
fn task_permissions(config: &AuditConfig) -> PolicyDocument {
    let bucket = format!("arn:${{AWS::Partition}}:s3:::{}", config.bucket_name);
    PolicyDocument::new()
        .statement(PolicyStatement::allow(["s3:ListBucket"]).on(Value::sub(bucket.clone())))
        .statement(
            PolicyStatement::allow(["s3:GetObject", "s3:PutObject"])
                .on(Value::sub(format!("{}/*", bucket))),
        )
        .statement(PolicyStatement::allow(["sts:AssumeRole"]).on(Value::sub(format!(
            "arn:${{AWS::Partition}}:iam::*:role/{}",
            config.role_name
        ))))
}

fn container(config: &AuditConfig, log_group_id: &str) -> Value {
    let env = |name: &str, value: &str| Value::map([("Name", Value::from(name)), ("Value", Value::from(value))]);
    let mut definition = vec![
        ("Name", Value::from(CONTAINER_NAME)),
        ("Image", Value::from(config.task.image.as_str())),
        ("Essential", Value::Bool(true)),
        (
            "Environment",
            Value::list([
                env("BUCKET_NAME", &config.bucket_name),
                env("ROLE_NAME", &config.role_name),
            ]),
        ),
        (
            "LogConfiguration",
            Value::map([
                ("LogDriver", Value::from("awslogs")),
                (
                    "Options",
                    Value::map([
                        ("awslogs-group", Value::reference(log_group_id)),
                        ("awslogs-region", Value::reference("AWS::Region")),
                        ("awslogs-stream-prefix", Value::from("audit")),
                    ]),
                ),
            ]),
        ),
    ];
    if !config.task.command.is_empty() {
        definition.push((
            "Command",
            Value::list(config.task.command.iter().map(|c| Value::from(c.as_str()))),
        ));
    }
    Value::map(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::network::add_public_only_network;
    use crate::stack::tests::sample_config;
    use auditstack_core::template::synthesize;
    use serde_json::json;

    fn task_template() -> serde_json::Value {
        let config = sample_config();
        let mut stack = Stack::new("Audit");
        let (net, _) = add_public_only_network(&mut stack, &config.network).unwrap();
        add_audit_task(&mut stack, &config, &net).unwrap();
        synthesize(&stack).unwrap()
    }

    #[test]
    fn schedule_runs_task_in_public_subnets_with_public_ip() {
        let template = task_template();
        let rule = &template["Resources"]["AuditScheduleRule"];

        assert_eq!(rule["Properties"]["ScheduleExpression"], json!("cron(0 3 * * ? *)"));
        let vpc_config =
            &rule["Properties"]["Targets"][0]["EcsParameters"]["NetworkConfiguration"]["AwsVpcConfiguration"];
        assert_eq!(vpc_config["AssignPublicIp"], json!("ENABLED"));
        assert_eq!(
            vpc_config["Subnets"],
            json!([{ "Ref": "VpcPublicSubnet1Subnet" }, { "Ref": "VpcPublicSubnet2Subnet" }])
        );
    }

    #[test]
    fn task_permissions_are_scoped_to_bucket_and_role() {
        let template = task_template();
        let statements = &template["Resources"]["AuditTaskRolePolicy"]["Properties"]["PolicyDocument"]["Statement"];

        assert_eq!(
            statements[0]["Resource"],
            json!({ "Fn::Sub": "arn:${AWS::Partition}:s3:::audit-reports" })
        );
        assert_eq!(
            statements[1]["Resource"],
            json!({ "Fn::Sub": "arn:${AWS::Partition}:s3:::audit-reports/*" })
        );
        assert_eq!(statements[2]["Action"], json!("sts:AssumeRole"));
        assert_eq!(
            statements[2]["Resource"],
            json!({ "Fn::Sub": "arn:${AWS::Partition}:iam::*:role/AuditReadOnly" })
        );
    }

    #[test]
    fn container_receives_configuration() {
        let template = task_template();
        let definition = &template["Resources"]["AuditTaskDefinition"]["Properties"];

        assert_eq!(definition["Cpu"], json!("256"));
        assert_eq!(definition["RequiresCompatibilities"], json!(["FARGATE"]));
        let container = &definition["ContainerDefinitions"][0];
        assert_eq!(
            container["Environment"],
            json!([
                { "Name": "BUCKET_NAME", "Value": "audit-reports" },
                { "Name": "ROLE_NAME", "Value": "AuditReadOnly" }
            ])
        );
        assert!(container.get("Command").is_none());
    }
}
