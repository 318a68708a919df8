//! Full content validation, run on publish and schedule.
//!
//! Draft saves only need the tree to be structurally sound; promoting a
//! version additionally requires that every referenced variable resolves
//! somewhere (registered injector, workspace injectable definition, or
//! system key) and that every conditional rule's operator/operand
//! combination is type-compatible.

use std::collections::BTreeMap;

use platen_cancel::CancelToken;
use platen_content::{Node, kinds, logic, referenced_variables, validate_structure};
use platen_inject::{DiscoveredInjectable, Registry};
use platen_types::{Error, Result, ValueType, is_system_key};

use crate::ports::DefinitionRepo;

/// System keys resolve to these value types.
fn system_key_type(code: &str) -> ValueType {
    match code {
        "current_date" | "current_time" => ValueType::Time,
        _ => ValueType::String,
    }
}

/// Validate a version's content against the registry, the workspace's
/// injectable definitions, and provider-discovered injectables. Returns
/// [`Error::ValidationFailed`] carrying every problem found.
pub fn validate_full(
    cancel: &CancelToken,
    content: &Node,
    workspace_id: &str,
    registry: &Registry,
    definitions: &dyn DefinitionRepo,
    discovered: &[DiscoveredInjectable],
) -> Result<()> {
    let mut errors = validate_structure(content);

    let mut known: BTreeMap<String, ValueType> = BTreeMap::new();
    for injector in registry.iter() {
        known.insert(injector.code().to_string(), injector.data_type());
    }
    for definition in definitions.for_workspace(cancel, workspace_id)? {
        known.entry(definition.key).or_insert(definition.data_type);
    }
    for injectable in discovered {
        known
            .entry(injectable.key.clone())
            .or_insert(injectable.data_type);
    }

    for variable in referenced_variables(content) {
        if !known.contains_key(&variable) && !is_system_key(&variable) {
            errors.push(format!("variable {variable:?} resolves to nothing"));
        }
    }

    let type_of = |code: &str| -> Option<ValueType> {
        known
            .get(code)
            .copied()
            .or_else(|| is_system_key(code).then(|| system_key_type(code)))
    };

    content.walk(&mut |node| {
        if node.kind != kinds::CONDITIONAL {
            return;
        }
        let Some(raw) = node.attrs.get("logic") else {
            return; // already flagged by validate_structure
        };
        let Ok(group) = logic::parse(raw) else {
            return;
        };
        for rule in group.rules() {
            check_rule(rule, &type_of, &mut errors);
        }
    });

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::ValidationFailed(errors))
    }
}

fn check_rule(
    rule: &logic::Rule,
    type_of: &dyn Fn(&str) -> Option<ValueType>,
    errors: &mut Vec<String>,
) {
    let op = rule.operator.as_str();
    if !logic::known_operator(op) {
        errors.push(format!(
            "rule on {:?} uses unknown operator {op:?}",
            rule.variable
        ));
        return;
    }

    let numeric = logic::NUMERIC_OPERATORS.contains(&op);
    let boolean = matches!(op, "is_true" | "is_false");

    if numeric {
        for side in [Some(rule.variable.as_str()), rule.compare_to.as_deref()]
            .into_iter()
            .flatten()
        {
            if let Some(value_type) = type_of(side)
                && !matches!(
                    value_type,
                    ValueType::Number | ValueType::Time | ValueType::String
                )
            {
                errors.push(format!(
                    "operator {op:?} cannot order {side:?} of type {value_type:?}"
                ));
            }
        }
    }

    if boolean
        && let Some(value_type) = type_of(&rule.variable)
        && value_type != ValueType::Bool
    {
        errors.push(format!(
            "operator {op:?} needs a BOOL variable, {:?} is {value_type:?}",
            rule.variable
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::testkit::simple_doc;
    use platen_content::Node;
    use platen_inject::{Injector, RegistryBuilder, ResolveContext};
    use platen_types::{InjectableDefinition, TypedValue};
    use serde_json::json;
    use std::sync::Arc;

    struct Typed(&'static str, ValueType);

    impl Injector for Typed {
        fn code(&self) -> &str {
            self.0
        }
        fn data_type(&self) -> ValueType {
            self.1
        }
        fn resolve(&self, _ctx: &ResolveContext) -> anyhow::Result<TypedValue> {
            Ok(TypedValue::zero(self.1))
        }
    }

    fn registry() -> Registry {
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::new(Typed("total", ValueType::Number)))
            .expect("register");
        builder
            .register(Arc::new(Typed("active", ValueType::Bool)))
            .expect("register");
        builder
            .register(Arc::new(Typed("logo", ValueType::Image)))
            .expect("register");
        builder.freeze().expect("freeze")
    }

    fn definitions() -> MemoryStore {
        let store = MemoryStore::new();
        DefinitionRepo::insert(
            &store,
            &CancelToken::new(),
            InjectableDefinition {
                id: String::new(),
                workspace_id: "ws-1".to_string(),
                key: "customer_name".to_string(),
                label: "Customer name".to_string(),
                description: None,
                data_type: ValueType::String,
                default_value: None,
                metadata: serde_json::Value::Null,
                is_active: true,
                is_deleted: false,
            },
        )
        .expect("insert definition");
        store
    }

    fn injectable(code: &str) -> Node {
        Node::block(platen_content::kinds::INJECTABLE).with_attr("variable", json!(code))
    }

    fn conditional(logic: serde_json::Value) -> Node {
        Node::with_children(
            kinds::CONDITIONAL,
            vec![Node::block(platen_content::kinds::PARAGRAPH)],
        )
        .with_attr("logic", logic)
    }

    #[test]
    fn accepts_known_variables_of_all_origins() {
        let doc = Node::with_children(
            platen_content::kinds::DOC,
            vec![
                injectable("total"),         // registry
                injectable("customer_name"), // workspace definition
                injectable("current_date"),  // system key
            ],
        );

        validate_full(
            &CancelToken::new(),
            &doc,
            "ws-1",
            &registry(),
            &definitions(),
            &[],
        )
        .expect("valid");
    }

    #[test]
    fn provider_discovered_injectables_are_known() {
        let doc = Node::with_children(
            platen_content::kinds::DOC,
            vec![injectable("crm_owner")],
        );
        let discovered = vec![DiscoveredInjectable {
            key: "crm_owner".to_string(),
            label: "Account owner".to_string(),
            data_type: ValueType::String,
            default_value: None,
        }];

        validate_full(
            &CancelToken::new(),
            &doc,
            "ws-1",
            &registry(),
            &definitions(),
            &discovered,
        )
        .expect("valid");
    }

    #[test]
    fn flags_unknown_variables() {
        let doc = simple_doc("x");
        let doc = Node {
            content: vec![doc.content[0].clone(), injectable("ghost")],
            ..doc
        };

        let err = validate_full(
            &CancelToken::new(),
            &doc,
            "ws-1",
            &registry(),
            &definitions(),
            &[],
        )
        .expect_err("must fail");
        match err {
            Error::ValidationFailed(errors) => {
                assert!(errors.iter().any(|e| e.contains("ghost")));
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn flags_incompatible_operator_types() {
        let doc = Node::with_children(
            platen_content::kinds::DOC,
            vec![
                conditional(json!({"conditions": [
                    {"variable": "logo", "operator": "greater", "value": 1}
                ]})),
                conditional(json!({"conditions": [
                    {"variable": "total", "operator": "is_true"}
                ]})),
            ],
        );

        let err = validate_full(
            &CancelToken::new(),
            &doc,
            "ws-1",
            &registry(),
            &definitions(),
            &[],
        )
        .expect_err("must fail");
        match err {
            Error::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("cannot order"));
                assert!(errors[1].contains("needs a BOOL"));
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn accepts_compatible_conditionals() {
        let doc = Node::with_children(
            platen_content::kinds::DOC,
            vec![
                conditional(json!({"conditions": [
                    {"variable": "total", "operator": "greater", "value": 100},
                    {"variable": "active", "operator": "is_true"},
                    {"variable": "customer_name", "operator": "contains", "value": "GmbH"}
                ]})),
            ],
        );

        validate_full(
            &CancelToken::new(),
            &doc,
            "ws-1",
            &registry(),
            &definitions(),
            &[],
        )
        .expect("valid");
    }

    #[test]
    fn flags_unknown_operator() {
        let doc = Node::with_children(
            platen_content::kinds::DOC,
            vec![conditional(json!({"conditions": [
                {"variable": "total", "operator": "matches_regex", "value": ".*"}
            ]}))],
        );

        let err = validate_full(
            &CancelToken::new(),
            &doc,
            "ws-1",
            &registry(),
            &definitions(),
            &[],
        )
        .expect_err("must fail");
        assert!(matches!(err, Error::ValidationFailed(_)));
    }
}
