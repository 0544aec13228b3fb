//! Template - Synthesize a stack into a CloudFormation template
//!
//! Synthesis is the last point where the graph can be checked as a whole.
//! Anything CloudFormation would reject at change-set time (dangling
//! references, undeclared conditions, resources that outlive what they refer
//! to) is reported here instead.

use std::collections::HashMap;

use serde_json::{Map, json};
use thiserror::Error;

use crate::network::RouteTarget;
use crate::resource::{Resource, ResourceKind, is_valid_logical_id};
use crate::stack::Stack;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SynthError {
    #[error("Invalid logical id '{0}': must be 1-255 alphanumeric characters")]
    InvalidLogicalId(String),

    #[error("{resource} refers to unknown resource '{target}'")]
    UnknownReference { resource: String, target: String },

    #[error("{resource} is gated on condition '{condition}' which is not defined in the stack")]
    UnknownCondition { resource: String, condition: String },

    #[error("{resource} refers to '{target}', which only exists when condition '{condition}' holds")]
    ConditionalReference {
        resource: String,
        target: String,
        condition: String,
    },

    #[error("Route '{0}' has no target and no condition; it cannot be created")]
    RouteWithoutTarget(String),
}

/// Render `stack` as a template document
pub fn synthesize(stack: &Stack) -> Result<serde_json::Value, SynthError> {
    let by_id: HashMap<&str, &Resource> = stack
        .resources()
        .map(|r| (r.logical_id.as_str(), r))
        .collect();

    let mut resources = Map::new();
    for resource in stack.resources() {
        check_resource(stack, &by_id, resource)?;
        resources.insert(resource.logical_id.clone(), resource_json(resource));
    }

    let mut outputs = Map::new();
    for output in stack.outputs() {
        if !is_valid_logical_id(&output.logical_id) {
            return Err(SynthError::InvalidLogicalId(output.logical_id.clone()));
        }
        for target in output.value.references() {
            check_reference(&by_id, &output.logical_id, None, &target)?;
        }
        let mut entry = Map::new();
        if let Some(description) = &output.description {
            entry.insert("Description".to_string(), json!(description));
        }
        entry.insert("Value".to_string(), output.value.to_json());
        outputs.insert(output.logical_id.clone(), serde_json::Value::Object(entry));
    }

    let mut template = Map::new();
    template.insert(
        "AWSTemplateFormatVersion".to_string(),
        json!(TEMPLATE_FORMAT_VERSION),
    );
    if let Some(description) = stack.description() {
        template.insert("Description".to_string(), json!(description));
    }
    if !stack.conditions().is_empty() {
        let conditions: Map<String, serde_json::Value> = stack
            .conditions()
            .iter()
            .map(|c| (c.name().to_string(), c.expr().to_json()))
            .collect();
        template.insert(
            "Conditions".to_string(),
            serde_json::Value::Object(conditions),
        );
    }
    template.insert(
        "Resources".to_string(),
        serde_json::Value::Object(resources),
    );
    if !outputs.is_empty() {
        template.insert("Outputs".to_string(), serde_json::Value::Object(outputs));
    }

    log::info!(
        "Synthesized stack {}: {} resources, {} conditions, {} outputs",
        stack.name(),
        by_id.len(),
        stack.conditions().len(),
        stack.outputs().len()
    );
    Ok(serde_json::Value::Object(template))
}

fn check_resource(
    stack: &Stack,
    by_id: &HashMap<&str, &Resource>,
    resource: &Resource,
) -> Result<(), SynthError> {
    if !is_valid_logical_id(&resource.logical_id) {
        return Err(SynthError::InvalidLogicalId(resource.logical_id.clone()));
    }

    if let Some(condition) = resource.condition()
        && stack.condition(condition.name()).is_none()
    {
        return Err(SynthError::UnknownCondition {
            resource: resource.logical_id.clone(),
            condition: condition.name().to_string(),
        });
    }

    if resource.kind() == ResourceKind::Route
        && resource.condition().is_none()
        && RouteTarget::of(resource) == RouteTarget::None
    {
        return Err(SynthError::RouteWithoutTarget(resource.logical_id.clone()));
    }

    let own_condition = resource.condition().map(|c| c.name());
    for target in resource.references() {
        check_reference(by_id, &resource.logical_id, own_condition, &target)?;
    }
    Ok(())
}

fn check_reference(
    by_id: &HashMap<&str, &Resource>,
    from: &str,
    from_condition: Option<&str>,
    target: &str,
) -> Result<(), SynthError> {
    let Some(target_resource) = by_id.get(target) else {
        return Err(SynthError::UnknownReference {
            resource: from.to_string(),
            target: target.to_string(),
        });
    };
    if let Some(condition) = target_resource.condition()
        && from_condition != Some(condition.name())
    {
        return Err(SynthError::ConditionalReference {
            resource: from.to_string(),
            target: target.to_string(),
            condition: condition.name().to_string(),
        });
    }
    Ok(())
}

fn resource_json(resource: &Resource) -> serde_json::Value {
    let mut entry = Map::new();
    entry.insert("Type".to_string(), json!(resource.kind().cfn_type()));
    if !resource.properties.is_empty() {
        let properties: Map<String, serde_json::Value> = resource
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        entry.insert(
            "Properties".to_string(),
            serde_json::Value::Object(properties),
        );
    }
    if !resource.depends_on.is_empty() {
        entry.insert("DependsOn".to_string(), json!(resource.depends_on));
    }
    if let Some(condition) = resource.condition() {
        entry.insert("Condition".to_string(), json!(condition.name()));
    }
    serde_json::Value::Object(entry)
}
