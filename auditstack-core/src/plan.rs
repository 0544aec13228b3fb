//! Plan - Change set between a deployed template and a newly synthesized one
//!
//! Nothing here touches a cloud account; the plan only describes what a
//! deployment of the new template would add, change, or remove.

use std::collections::BTreeMap;

/// Change to a single resource
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Resource only exists in the new template
    Add {
        logical_id: String,
        resource_type: String,
    },
    /// Resource exists in both with differences
    Modify {
        logical_id: String,
        resource_type: String,
        /// Changed keys (e.g., "Condition", "Properties.CidrBlock")
        changed: Vec<String>,
    },
    /// Resource only exists in the deployed template
    Remove {
        logical_id: String,
        resource_type: String,
    },
}

impl Change {
    pub fn logical_id(&self) -> &str {
        match self {
            Change::Add { logical_id, .. }
            | Change::Modify { logical_id, .. }
            | Change::Remove { logical_id, .. } => logical_id,
        }
    }

    pub fn resource_type(&self) -> &str {
        match self {
            Change::Add { resource_type, .. }
            | Change::Modify { resource_type, .. }
            | Change::Remove { resource_type, .. } => resource_type,
        }
    }

    /// A changed type or condition means the resource is recreated or dropped
    pub fn is_replacement(&self) -> bool {
        match self {
            Change::Modify { changed, .. } => {
                changed.iter().any(|c| c == "Type" || c == "Condition")
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for change in &self.changes {
            match change {
                Change::Add { .. } => summary.add += 1,
                Change::Modify { .. } => summary.modify += 1,
                Change::Remove { .. } => summary.remove += 1,
            }
        }
        summary
    }

    /// Changes grouped by resource type, types in alphabetical order
    pub fn group_by_type(&self) -> BTreeMap<&str, Vec<&Change>> {
        let mut groups: BTreeMap<&str, Vec<&Change>> = BTreeMap::new();
        for change in &self.changes {
            groups.entry(change.resource_type()).or_default().push(change);
        }
        groups
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub add: usize,
    pub modify: usize,
    pub remove: usize,
}

impl std::fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to remove",
            self.add, self.modify, self.remove
        )
    }
}

/// One-line form of a change, e.g. `+ VpcPublicSubnet1Subnet (AWS::EC2::Subnet)`
pub fn format_change_brief(change: &Change) -> String {
    match change {
        Change::Add {
            logical_id,
            resource_type,
        } => format!("+ {} ({})", logical_id, resource_type),
        Change::Modify {
            logical_id,
            resource_type,
            changed,
        } => format!("~ {} ({}): {}", logical_id, resource_type, changed.join(", ")),
        Change::Remove {
            logical_id,
            resource_type,
        } => format!("- {} ({})", logical_id, resource_type),
    }
}
