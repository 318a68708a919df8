//! Conditional evaluation during lowering.
//!
//! The logic tree is evaluated left-to-right; `and` short-circuits on the
//! first false condition, `or` on the first true one. String operators
//! compare string representations; ordering operators coerce both sides to
//! numbers, with parse failures coercing to zero. The operator set is
//! closed — unknown operators evaluate false.

use platen_content::logic::{Condition, GroupOp, LogicGroup, Rule};
use platen_types::TypedValue;
use serde_json::Value;

/// Lookup for a variable's effective value (after the substitution chain).
pub type Lookup<'a> = dyn Fn(&str) -> Option<TypedValue> + 'a;

pub fn eval_group(group: &LogicGroup, lookup: &Lookup<'_>) -> bool {
    match group.operator {
        GroupOp::And => group.conditions.iter().all(|c| eval_condition(c, lookup)),
        GroupOp::Or => group.conditions.iter().any(|c| eval_condition(c, lookup)),
    }
}

fn eval_condition(condition: &Condition, lookup: &Lookup<'_>) -> bool {
    match condition {
        Condition::Rule(rule) => eval_rule(rule, lookup),
        Condition::Group(group) => eval_group(group, lookup),
    }
}

fn eval_rule(rule: &Rule, lookup: &Lookup<'_>) -> bool {
    let left = lookup(&rule.variable);
    let left_str = left
        .as_ref()
        .map(TypedValue::display_string)
        .unwrap_or_default();

    match rule.operator.as_str() {
        "equal" => left_str == right_str(rule, lookup),
        "not_equal" => left_str != right_str(rule, lookup),
        "empty" => left.as_ref().map(TypedValue::is_empty).unwrap_or(true),
        "not_empty" => !left.as_ref().map(TypedValue::is_empty).unwrap_or(true),
        "starts_with" => left_str.starts_with(&right_str(rule, lookup)),
        "ends_with" => left_str.ends_with(&right_str(rule, lookup)),
        "contains" => left_str.contains(&right_str(rule, lookup)),
        "is_true" => left_str.eq_ignore_ascii_case("true"),
        "is_false" => left_str.eq_ignore_ascii_case("false"),
        "greater" | "after" => left_number(&left, &left_str) > right_number(rule, lookup),
        "less" | "before" => left_number(&left, &left_str) < right_number(rule, lookup),
        "greater_equal" => left_number(&left, &left_str) >= right_number(rule, lookup),
        "less_equal" => left_number(&left, &left_str) <= right_number(rule, lookup),
        _ => false,
    }
}

fn left_number(left: &Option<TypedValue>, left_str: &str) -> f64 {
    match left {
        Some(value) => value.as_number(),
        None => left_str.trim().parse().unwrap_or(0.0),
    }
}

fn right_str(rule: &Rule, lookup: &Lookup<'_>) -> String {
    if let Some(other) = &rule.compare_to {
        return lookup(other)
            .map(|v| v.display_string())
            .unwrap_or_default();
    }
    match &rule.value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => platen_types::format_number_plain(n.as_f64().unwrap_or(0.0)),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn right_number(rule: &Rule, lookup: &Lookup<'_>) -> f64 {
    if let Some(other) = &rule.compare_to {
        return lookup(other).map(|v| v.as_number()).unwrap_or(0.0);
    }
    match &rule.value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}
