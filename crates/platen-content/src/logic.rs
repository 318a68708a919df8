//! Conditional logic trees.
//!
//! A conditional node persists its logic under `attrs.logic` as a group of
//! conditions:
//!
//! ```json
//! {"operator": "and", "conditions": [
//!   {"variable": "country", "operator": "equal", "value": "DE"},
//!   {"operator": "or", "conditions": [
//!     {"variable": "total", "operator": "greater", "compare_to": "limit"}
//!   ]}
//! ]}
//! ```
//!
//! Leaves are rules `(variable, operator, value-or-variable)`; nested groups
//! recurse. Evaluation lives with the lowerer; this module owns the parsed
//! shape and the operator catalogue.

use std::collections::BTreeSet;

use anyhow::{Result, bail};
use serde_json::Value;

/// String-comparison operators.
pub const STRING_OPERATORS: &[&str] = &[
    "equal",
    "not_equal",
    "empty",
    "not_empty",
    "starts_with",
    "ends_with",
    "contains",
    "is_true",
    "is_false",
];

/// Operators that coerce both sides to numbers.
pub const NUMERIC_OPERATORS: &[&str] = &[
    "greater",
    "less",
    "greater_equal",
    "less_equal",
    "before",
    "after",
];

/// Whether `op` belongs to the closed operator set. Unknown operators are
/// not an error at render time (they evaluate false), but publish-time
/// validation rejects them.
pub fn known_operator(op: &str) -> bool {
    STRING_OPERATORS.contains(&op) || NUMERIC_OPERATORS.contains(&op)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOp {
    And,
    Or,
}

/// A leaf rule. `value` and `compare_to` are alternatives: when
/// `compare_to` is set, the right-hand side is another variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub variable: String,
    pub operator: String,
    pub value: Option<Value>,
    pub compare_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Rule(Rule),
    Group(LogicGroup),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicGroup {
    pub operator: GroupOp,
    pub conditions: Vec<Condition>,
}

impl LogicGroup {
    /// Every variable mentioned in this group, including `compare_to`
    /// right-hand sides.
    pub fn collect_variables(&self, out: &mut BTreeSet<String>) {
        for condition in &self.conditions {
            match condition {
                Condition::Rule(rule) => {
                    out.insert(rule.variable.clone());
                    if let Some(other) = &rule.compare_to {
                        out.insert(other.clone());
                    }
                }
                Condition::Group(group) => group.collect_variables(out),
            }
        }
    }

    /// Every leaf rule in this group, depth-first.
    pub fn rules(&self) -> Vec<&Rule> {
        let mut out = Vec::new();
        self.push_rules(&mut out);
        out
    }

    fn push_rules<'a>(&'a self, out: &mut Vec<&'a Rule>) {
        for condition in &self.conditions {
            match condition {
                Condition::Rule(rule) => out.push(rule),
                Condition::Group(group) => group.push_rules(out),
            }
        }
    }
}

/// Parse a persisted logic tree.
pub fn parse(raw: &Value) -> Result<LogicGroup> {
    let Some(obj) = raw.as_object() else {
        bail!("logic must be an object");
    };

    let operator = match obj.get("operator").and_then(Value::as_str) {
        Some("and") | None => GroupOp::And,
        Some("or") => GroupOp::Or,
        Some(other) => bail!("unknown group operator {other:?}"),
    };

    let mut conditions = Vec::new();
    if let Some(list) = obj.get("conditions") {
        let Some(list) = list.as_array() else {
            bail!("conditions must be an array");
        };
        for entry in list {
            conditions.push(parse_condition(entry)?);
        }
    }

    Ok(LogicGroup {
        operator,
        conditions,
    })
}

fn parse_condition(raw: &Value) -> Result<Condition> {
    let Some(obj) = raw.as_object() else {
        bail!("condition must be an object");
    };

    if obj.contains_key("conditions") {
        return Ok(Condition::Group(parse(raw)?));
    }

    let variable = obj
        .get("variable")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let Some(variable) = variable else {
        bail!("rule without a variable");
    };

    let Some(operator) = obj.get("operator").and_then(Value::as_str) else {
        bail!("rule without an operator");
    };

    Ok(Condition::Rule(Rule {
        variable: variable.to_string(),
        operator: operator.to_string(),
        value: obj.get("value").cloned(),
        compare_to: obj
            .get("compare_to")
            .and_then(Value::as_str)
            .map(String::from),
    }))
}
