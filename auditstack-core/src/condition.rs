//! Condition - Creation conditions gating resource materialization
//!
//! A condition is a named boolean expression evaluated when the template is
//! provisioned. A resource carrying a condition that evaluates to false is left
//! out of the materialized infrastructure.

use std::collections::HashMap;

use serde_json::json;
use thiserror::Error;

/// Operand of an equality test
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Bool(bool),
    String(String),
    /// Value of a template parameter, known only at provisioning time
    Parameter(String),
}

impl Operand {
    /// Provisioning-time string form. Booleans compare as "true"/"false".
    fn resolve<'a>(&'a self, params: &'a HashMap<String, String>) -> Result<&'a str, &'a str> {
        match self {
            Operand::Bool(true) => Ok("true"),
            Operand::Bool(false) => Ok("false"),
            Operand::String(s) => Ok(s.as_str()),
            Operand::Parameter(name) => params
                .get(name)
                .map(String::as_str)
                .ok_or(name.as_str()),
        }
    }

    fn literal(&self) -> Option<&str> {
        match self {
            Operand::Bool(true) => Some("true"),
            Operand::Bool(false) => Some("false"),
            Operand::String(s) => Some(s.as_str()),
            Operand::Parameter(_) => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Operand::Bool(b) => json!(b),
            Operand::String(s) => json!(s),
            Operand::Parameter(name) => json!({ "Ref": name }),
        }
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Operand::Bool(*b)),
            serde_json::Value::String(s) => Some(Operand::String(s.clone())),
            serde_json::Value::Object(obj) if obj.len() == 1 => obj
                .get("Ref")
                .and_then(|r| r.as_str())
                .map(|name| Operand::Parameter(name.to_string())),
            _ => None,
        }
    }
}

/// Boolean expression of a condition
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    Equals(Operand, Operand),
    Not(Box<ConditionExpr>),
    And(Vec<ConditionExpr>),
    Or(Vec<ConditionExpr>),
}

impl ConditionExpr {
    fn evaluate(&self, params: &HashMap<String, String>) -> Result<bool, String> {
        match self {
            ConditionExpr::Equals(a, b) => {
                let a = a.resolve(params).map_err(str::to_string)?;
                let b = b.resolve(params).map_err(str::to_string)?;
                Ok(a == b)
            }
            ConditionExpr::Not(inner) => Ok(!inner.evaluate(params)?),
            ConditionExpr::And(exprs) => {
                for expr in exprs {
                    if !expr.evaluate(params)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConditionExpr::Or(exprs) => {
                for expr in exprs {
                    if expr.evaluate(params)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Value of the expression when it does not depend on any parameter
    pub fn constant_value(&self) -> Option<bool> {
        match self {
            ConditionExpr::Equals(a, b) => Some(a.literal()? == b.literal()?),
            ConditionExpr::Not(inner) => inner.constant_value().map(|v| !v),
            ConditionExpr::And(exprs) => {
                let values: Vec<_> = exprs.iter().map(ConditionExpr::constant_value).collect();
                if values.contains(&Some(false)) {
                    Some(false)
                } else if values.iter().all(|v| *v == Some(true)) {
                    Some(true)
                } else {
                    None
                }
            }
            ConditionExpr::Or(exprs) => {
                let values: Vec<_> = exprs.iter().map(ConditionExpr::constant_value).collect();
                if values.contains(&Some(true)) {
                    Some(true)
                } else if values.iter().all(|v| *v == Some(false)) {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ConditionExpr::Equals(a, b) => json!({ "Fn::Equals": [a.to_json(), b.to_json()] }),
            ConditionExpr::Not(inner) => json!({ "Fn::Not": [inner.to_json()] }),
            ConditionExpr::And(exprs) => {
                let exprs: Vec<_> = exprs.iter().map(ConditionExpr::to_json).collect();
                json!({ "Fn::And": exprs })
            }
            ConditionExpr::Or(exprs) => {
                let exprs: Vec<_> = exprs.iter().map(ConditionExpr::to_json).collect();
                json!({ "Fn::Or": exprs })
            }
        }
    }

    /// Parse a template condition. Returns None for forms this model does not cover,
    /// such as references to other named conditions.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 1 {
            return None;
        }
        let (function, args) = obj.iter().next()?;
        let args = args.as_array()?;
        match function.as_str() {
            "Fn::Equals" if args.len() == 2 => Some(ConditionExpr::Equals(
                Operand::from_json(&args[0])?,
                Operand::from_json(&args[1])?,
            )),
            "Fn::Not" if args.len() == 1 => {
                Some(ConditionExpr::Not(Box::new(Self::from_json(&args[0])?)))
            }
            "Fn::And" => args
                .iter()
                .map(Self::from_json)
                .collect::<Option<Vec<_>>>()
                .map(ConditionExpr::And),
            "Fn::Or" => args
                .iter()
                .map(Self::from_json)
                .collect::<Option<Vec<_>>>()
                .map(ConditionExpr::Or),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("Condition '{condition}' references unknown parameter '{parameter}'")]
    UnknownParameter { condition: String, parameter: String },
}

/// A named creation condition
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    name: String,
    expr: ConditionExpr,
}

impl Condition {
    pub fn new(name: impl Into<String>, expr: ConditionExpr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }

    /// `true == false`: never allows materialization, whatever the parameters
    pub fn always_false(name: impl Into<String>) -> Self {
        Self::new(
            name,
            ConditionExpr::Equals(Operand::Bool(true), Operand::Bool(false)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expr(&self) -> &ConditionExpr {
        &self.expr
    }

    pub fn evaluate(&self, params: &HashMap<String, String>) -> Result<bool, ConditionError> {
        self.expr
            .evaluate(params)
            .map_err(|parameter| ConditionError::UnknownParameter {
                condition: self.name.clone(),
                parameter,
            })
    }

    /// True when the expression is false independently of any parameter value
    pub fn is_always_false(&self) -> bool {
        self.expr.constant_value() == Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn always_false_never_evaluates_true() {
        let condition = Condition::always_false("Never");
        let cases = [
            params(&[]),
            params(&[("true", "false")]),
            params(&[("Env", "prod"), ("false", "true")]),
            params(&[("AWS::Region", "us-east-1")]),
        ];
        for p in &cases {
            assert_eq!(condition.evaluate(p), Ok(false));
        }
        assert!(condition.is_always_false());
    }

    #[test]
    fn always_false_renders_literal_equality() {
        let condition = Condition::always_false("Never");
        assert_eq!(
            condition.expr().to_json(),
            json!({ "Fn::Equals": [true, false] })
        );
    }

    #[test]
    fn parameter_equality_depends_on_input() {
        let condition = Condition::new(
            "IsProd",
            ConditionExpr::Equals(Operand::Parameter("Env".into()), Operand::String("prod".into())),
        );
        assert_eq!(condition.evaluate(&params(&[("Env", "prod")])), Ok(true));
        assert_eq!(condition.evaluate(&params(&[("Env", "dev")])), Ok(false));
        assert!(!condition.is_always_false());
        assert_eq!(
            condition.evaluate(&params(&[])),
            Err(ConditionError::UnknownParameter {
                condition: "IsProd".into(),
                parameter: "Env".into(),
            })
        );
    }

    #[test]
    fn bool_literal_compares_with_string_form() {
        let condition = Condition::new(
            "Enabled",
            ConditionExpr::Equals(Operand::Bool(true), Operand::Parameter("Flag".into())),
        );
        assert_eq!(condition.evaluate(&params(&[("Flag", "true")])), Ok(true));
    }

    #[test]
    fn constant_value_through_composites() {
        let never = ConditionExpr::Equals(Operand::Bool(true), Operand::Bool(false));
        let unknown =
            ConditionExpr::Equals(Operand::Parameter("P".into()), Operand::String("x".into()));

        assert_eq!(
            ConditionExpr::And(vec![never.clone(), unknown.clone()]).constant_value(),
            Some(false)
        );
        assert_eq!(
            ConditionExpr::Or(vec![never.clone(), unknown.clone()]).constant_value(),
            None
        );
        assert_eq!(
            ConditionExpr::Not(Box::new(never.clone())).constant_value(),
            Some(true)
        );
    }

    #[test]
    fn parse_template_condition() {
        let parsed = ConditionExpr::from_json(&json!({ "Fn::Equals": [true, false] })).unwrap();
        assert_eq!(parsed.constant_value(), Some(false));

        let parsed =
            ConditionExpr::from_json(&json!({ "Fn::Not": [{ "Fn::Equals": [{ "Ref": "Env" }, "prod"] }] }))
                .unwrap();
        assert_eq!(parsed.constant_value(), None);

        assert!(ConditionExpr::from_json(&json!({ "Condition": "Other" })).is_none());
    }
}
