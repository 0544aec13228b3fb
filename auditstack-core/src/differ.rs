//! Differ - Compare a deployed template with a newly synthesized one
//!
//! Resources are matched by logical id. A resource present on one side only
//! is added or removed; a resource on both sides is compared key by key, and
//! its properties one level deep.

use std::collections::BTreeSet;

use serde_json::{Map, Value as Json};
use thiserror::Error;

use crate::plan::{Change, ChangeSet};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiffError {
    #[error("{0} template has no Resources section")]
    MissingResources(&'static str),
}

/// Compare one resource across templates
pub fn diff_resource(logical_id: &str, previous: Option<&Json>, current: Option<&Json>) -> Option<Change> {
    match (previous, current) {
        (None, None) => None,
        (None, Some(current)) => Some(Change::Add {
            logical_id: logical_id.to_string(),
            resource_type: type_of(current),
        }),
        (Some(previous), None) => Some(Change::Remove {
            logical_id: logical_id.to_string(),
            resource_type: type_of(previous),
        }),
        (Some(previous), Some(current)) => {
            let changed = find_changed_keys(previous, current);
            if changed.is_empty() {
                None
            } else {
                Some(Change::Modify {
                    logical_id: logical_id.to_string(),
                    resource_type: type_of(current),
                    changed,
                })
            }
        }
    }
}

/// Compute the change set that takes `previous` to `current`
pub fn diff_templates(previous: &Json, current: &Json) -> Result<ChangeSet, DiffError> {
    let previous = resources_of(previous).ok_or(DiffError::MissingResources("Previous"))?;
    let current = resources_of(current).ok_or(DiffError::MissingResources("Current"))?;

    let mut changes = ChangeSet::new();
    for (logical_id, resource) in current {
        if let Some(change) = diff_resource(logical_id, previous.get(logical_id), Some(resource)) {
            changes.add(change);
        }
    }
    for (logical_id, resource) in previous {
        if !current.contains_key(logical_id)
            && let Some(change) = diff_resource(logical_id, Some(resource), None)
        {
            changes.add(change);
        }
    }

    log::debug!("Template diff: {}", changes.summary());
    Ok(changes)
}

fn resources_of(template: &Json) -> Option<&Map<String, Json>> {
    template.get("Resources")?.as_object()
}

fn type_of(resource: &Json) -> String {
    resource
        .get("Type")
        .and_then(|t| t.as_str())
        .unwrap_or("Unknown")
        .to_string()
}

fn find_changed_keys(previous: &Json, current: &Json) -> Vec<String> {
    let empty = Map::new();
    let previous = previous.as_object().unwrap_or(&empty);
    let current = current.as_object().unwrap_or(&empty);

    let keys: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    let mut changed = Vec::new();
    for key in keys {
        let (before, after) = (previous.get(key.as_str()), current.get(key.as_str()));
        if before == after {
            continue;
        }
        if key == "Properties" {
            let before = before.and_then(Json::as_object).unwrap_or(&empty);
            let after = after.and_then(Json::as_object).unwrap_or(&empty);
            let props: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
            for prop in props {
                if before.get(prop.as_str()) != after.get(prop.as_str()) {
                    changed.push(format!("Properties.{}", prop));
                }
            }
        } else {
            changed.push(key.clone());
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_templates_have_no_changes() {
        let template = json!({
            "Resources": {
                "Topic": { "Type": "AWS::SNS::Topic" }
            }
        });
        assert!(diff_templates(&template, &template).unwrap().is_empty());
    }

    #[test]
    fn added_and_removed_resources() {
        let previous = json!({
            "Resources": {
                "Nat": { "Type": "AWS::EC2::NatGateway" }
            }
        });
        let current = json!({
            "Resources": {
                "Topic": { "Type": "AWS::SNS::Topic" }
            }
        });

        let changes = diff_templates(&previous, &current).unwrap();
        assert_eq!(
            changes.changes(),
            &[
                Change::Add {
                    logical_id: "Topic".to_string(),
                    resource_type: "AWS::SNS::Topic".to_string(),
                },
                Change::Remove {
                    logical_id: "Nat".to_string(),
                    resource_type: "AWS::EC2::NatGateway".to_string(),
                },
            ]
        );
    }

    #[test]
    fn modified_properties_and_condition() {
        let previous = json!({
            "Resources": {
                "Route": {
                    "Type": "AWS::EC2::Route",
                    "Properties": {
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": { "Ref": "Nat" }
                    }
                }
            }
        });
        let current = json!({
            "Resources": {
                "Route": {
                    "Type": "AWS::EC2::Route",
                    "Properties": { "DestinationCidrBlock": "0.0.0.0/0" },
                    "Condition": "Never"
                }
            }
        });

        let change = diff_resource(
            "Route",
            previous["Resources"].get("Route"),
            current["Resources"].get("Route"),
        )
        .unwrap();
        match change {
            Change::Modify { changed, .. } => {
                assert_eq!(changed, vec!["Condition", "Properties.NatGatewayId"]);
            }
            other => panic!("Expected Modify, got {:?}", other),
        }
    }

    #[test]
    fn template_without_resources_is_an_error() {
        let template = json!({ "Resources": {} });
        assert_eq!(
            diff_templates(&json!({}), &template),
            Err(DiffError::MissingResources("Previous"))
        );
    }
}
