//! Stack - The unit of synthesis
//!
//! A stack collects the conditions, networks, and standalone resources that
//! make up one template. Conditions are registered once and handed out as
//! shared references so every gated resource points at the same instance.

use std::collections::HashSet;
use std::rc::Rc;

use thiserror::Error;

use crate::condition::Condition;
use crate::network::Network;
use crate::resource::{Resource, Value};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StackError {
    #[error("Condition '{0}' is already defined")]
    DuplicateCondition(String),

    #[error("Logical id '{0}' is already used in this stack")]
    DuplicateLogicalId(String),
}

/// Stack output
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub logical_id: String,
    pub value: Value,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Stack {
    name: String,
    description: Option<String>,
    conditions: Vec<Rc<Condition>>,
    networks: Vec<Network>,
    resources: Vec<Resource>,
    outputs: Vec<Output>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Register a condition and return the instance resources should share
    pub fn add_condition(&mut self, condition: Condition) -> Result<Rc<Condition>, StackError> {
        if self.condition(condition.name()).is_some() {
            return Err(StackError::DuplicateCondition(condition.name().to_string()));
        }
        let condition = Rc::new(condition);
        self.conditions.push(Rc::clone(&condition));
        Ok(condition)
    }

    pub fn condition(&self, name: &str) -> Option<&Rc<Condition>> {
        self.conditions.iter().find(|c| c.name() == name)
    }

    pub fn conditions(&self) -> &[Rc<Condition>] {
        &self.conditions
    }

    pub fn add_network(&mut self, network: Network) -> Result<(), StackError> {
        let ids: Vec<&str> = network.resources().map(|r| r.logical_id.as_str()).collect();
        self.check_unused(&ids)?;
        self.networks.push(network);
        Ok(())
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn network(&self, id: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.id() == id)
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<(), StackError> {
        self.check_unused(&[resource.logical_id.as_str()])?;
        self.resources.push(resource);
        Ok(())
    }

    pub fn add_output(&mut self, output: Output) -> Result<(), StackError> {
        if self.outputs.iter().any(|o| o.logical_id == output.logical_id) {
            return Err(StackError::DuplicateLogicalId(output.logical_id));
        }
        self.outputs.push(output);
        Ok(())
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Every resource in declaration order: networks first, then standalone resources
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.networks
            .iter()
            .flat_map(Network::resources)
            .chain(self.resources.iter())
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources().find(|r| r.logical_id == logical_id)
    }

    fn check_unused(&self, ids: &[&str]) -> Result<(), StackError> {
        let existing: HashSet<&str> = self.resources().map(|r| r.logical_id.as_str()).collect();
        let mut seen = HashSet::new();
        for id in ids {
            if existing.contains(id) || !seen.insert(*id) {
                return Err(StackError::DuplicateLogicalId(id.to_string()));
            }
        }
        Ok(())
    }
}
