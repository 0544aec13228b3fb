//! IAM policy documents

use crate::resource::Value;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// e.g. "ecs-tasks.amazonaws.com"
    Service(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
    pub principal: Option<Principal>,
}

impl PolicyStatement {
    pub fn allow<S: Into<String>>(actions: impl IntoIterator<Item = S>) -> Self {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            resources: Vec::new(),
            principal: None,
        }
    }

    pub fn on(mut self, resource: impl Into<Value>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    fn to_value(&self) -> Value {
        let mut entries = vec![("Effect", Value::from("Allow"))];

        let actions = if self.actions.len() == 1 {
            Value::from(self.actions[0].as_str())
        } else {
            Value::list(self.actions.iter().map(|a| Value::from(a.as_str())))
        };
        entries.push(("Action", actions));

        match self.resources.as_slice() {
            [] => {}
            [single] => entries.push(("Resource", single.clone())),
            many => entries.push(("Resource", Value::List(many.to_vec()))),
        }

        if let Some(Principal::Service(service)) = &self.principal {
            entries.push((
                "Principal",
                Value::map([("Service", Value::from(service.as_str()))]),
            ));
        }

        Value::map(entries)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDocument {
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statement(mut self, statement: PolicyStatement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Trust policy letting `service` assume the role
    pub fn assume_role(service: &str) -> Self {
        Self::new().statement(
            PolicyStatement::allow(["sts:AssumeRole"])
                .with_principal(Principal::Service(service.to_string())),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::map([
            ("Version", Value::from(POLICY_VERSION)),
            (
                "Statement",
                Value::list(self.statements.iter().map(PolicyStatement::to_value)),
            ),
        ])
    }
}

impl From<PolicyDocument> for Value {
    fn from(document: PolicyDocument) -> Self {
        document.to_value()
    }
}
