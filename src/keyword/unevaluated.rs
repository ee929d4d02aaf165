//! Unevaluated vocabulary
//!
//! `unevaluatedProperties` and `unevaluatedItems` run after every applicator
//! on the node, including in-place ones; the evaluator resolves their
//! bindings against the annotations of all successful sibling applications
//! at the same instance location.

use std::sync::Arc;

use serde_json::Value;

use crate::compile::BuildContext;
use crate::dialect::Vocabulary;
use crate::error::Result;
use crate::keyword::{
    Binding, ChildConstraint, Constraint, KeywordCatalog, KeywordDescriptor, MODERN_DRAFTS,
};

/// Every keyword that can mark object members or array elements evaluated,
/// directly or through an in-place application
const APPLICATORS: &[&str] = &[
    "$ref",
    "$dynamicRef",
    "$recursiveRef",
    "allOf",
    "anyOf",
    "oneOf",
    "not",
    "if",
    "then",
    "else",
    "dependentSchemas",
    "dependencies",
    "properties",
    "patternProperties",
    "additionalProperties",
    "prefixItems",
    "items",
    "additionalItems",
    "contains",
];

pub(crate) fn register(catalog: &mut KeywordCatalog) {
    catalog.register(KeywordDescriptor {
        name: "unevaluatedItems",
        vocabulary: Vocabulary::Unevaluated,
        drafts: MODERN_DRAFTS,
        depends_on: APPLICATORS,
        build: build_unevaluated_items,
    });
    catalog.register(KeywordDescriptor {
        name: "unevaluatedProperties",
        vocabulary: Vocabulary::Unevaluated,
        drafts: MODERN_DRAFTS,
        depends_on: APPLICATORS,
        build: build_unevaluated_properties,
    });
}

fn build_unevaluated_items(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    let target = ctx.subschema(raw, &["unevaluatedItems"], true)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["unevaluatedItems".to_string()],
            binding: Binding::UnevaluatedItems,
            target,
        }],
        eval: Arc::new(|ev| {
            if !ev.instance().is_array() {
                ev.mark_skipped();
                return;
            }
            if !ev.children().is_empty() {
                ev.annotate(Value::Bool(true));
            }
            let failed: Vec<String> = ev
                .children()
                .iter()
                .filter(|c| !c.valid())
                .filter_map(|c| c.segment.clone())
                .collect();
            if !failed.is_empty() {
                ev.fail(format!(
                    "unevaluated items at indexes {} do not match",
                    failed.join(", ")
                ));
            }
        }),
    }))
}

fn build_unevaluated_properties(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    let target = ctx.subschema(raw, &["unevaluatedProperties"], true)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["unevaluatedProperties".to_string()],
            binding: Binding::UnevaluatedProperties,
            target,
        }],
        eval: Arc::new(|ev| {
            if !ev.instance().is_object() {
                ev.mark_skipped();
                return;
            }
            let evaluated: Vec<Value> = ev
                .children()
                .iter()
                .filter_map(|c| c.segment.clone())
                .map(Value::String)
                .collect();
            ev.annotate(Value::Array(evaluated));
            let failed: Vec<String> = ev
                .children()
                .iter()
                .filter(|c| !c.valid())
                .filter_map(|c| c.segment.clone())
                .collect();
            if !failed.is_empty() {
                ev.fail(format!(
                    "unevaluated properties {} do not match",
                    failed.join(", ")
                ));
            }
        }),
    }))
}
