//! Applicator vocabulary: keywords that apply subschemas
//!
//! Structural keywords declare how their subschemas bind to instance values;
//! the evaluator resolves those bindings and evaluates the applications
//! before each keyword's closure folds them.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::compile::BuildContext;
use crate::dialect::{Draft, Vocabulary};
use crate::error::Result;
use crate::eval::{ChildKeep, KeywordEvaluation};
use crate::keyword::{
    Binding, ChildConstraint, Constraint, KeywordCatalog, KeywordDescriptor, ALL_DRAFTS,
};

const LEGACY_DRAFTS: &[Draft] = &[Draft::V7, Draft::V2019_09];

pub(crate) fn register(catalog: &mut KeywordCatalog) {
    catalog.register(KeywordDescriptor {
        name: "allOf",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_all_of,
    });
    catalog.register(KeywordDescriptor {
        name: "anyOf",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_any_of,
    });
    catalog.register(KeywordDescriptor {
        name: "oneOf",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_one_of,
    });
    catalog.register(KeywordDescriptor {
        name: "not",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_not,
    });
    catalog.register(KeywordDescriptor {
        name: "if",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_if,
    });
    catalog.register(KeywordDescriptor {
        name: "then",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &["if"],
        build: build_then,
    });
    catalog.register(KeywordDescriptor {
        name: "else",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &["if"],
        build: build_else,
    });
    catalog.register(KeywordDescriptor {
        name: "dependentSchemas",
        vocabulary: Vocabulary::Applicator,
        drafts: &[Draft::V2019_09, Draft::V2020_12],
        depends_on: &[],
        build: build_dependent_schemas,
    });
    catalog.register(KeywordDescriptor {
        name: "dependencies",
        vocabulary: Vocabulary::Applicator,
        drafts: &[Draft::V7],
        depends_on: &[],
        build: build_dependencies,
    });
    catalog.register(KeywordDescriptor {
        name: "properties",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_properties,
    });
    catalog.register(KeywordDescriptor {
        name: "patternProperties",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_pattern_properties,
    });
    catalog.register(KeywordDescriptor {
        name: "additionalProperties",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &["properties", "patternProperties"],
        build: build_additional_properties,
    });
    catalog.register(KeywordDescriptor {
        name: "propertyNames",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_property_names,
    });
    catalog.register(KeywordDescriptor {
        name: "prefixItems",
        vocabulary: Vocabulary::Applicator,
        drafts: &[Draft::V2020_12],
        depends_on: &[],
        build: build_prefix_items,
    });
    catalog.register(KeywordDescriptor {
        name: "items",
        vocabulary: Vocabulary::Applicator,
        drafts: &[Draft::V2020_12],
        depends_on: &["prefixItems"],
        build: build_items,
    });
    catalog.register(KeywordDescriptor {
        name: "items",
        vocabulary: Vocabulary::Applicator,
        drafts: LEGACY_DRAFTS,
        depends_on: &[],
        build: build_items_legacy,
    });
    catalog.register(KeywordDescriptor {
        name: "additionalItems",
        vocabulary: Vocabulary::Applicator,
        drafts: LEGACY_DRAFTS,
        depends_on: &["items"],
        build: build_additional_items,
    });
    catalog.register(KeywordDescriptor {
        name: "contains",
        vocabulary: Vocabulary::Applicator,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_contains,
    });
}

fn subschema_array(
    ctx: &mut BuildContext<'_, '_>,
    keyword: &str,
    raw: &Value,
) -> Result<Vec<ChildConstraint>> {
    let items = raw
        .as_array()
        .ok_or_else(|| ctx.syntax("expected an array of schemas"))?;
    if items.is_empty() {
        return Err(ctx.syntax("expected at least one schema"));
    }
    let mut children = Vec::with_capacity(items.len());
    for (i, sub) in items.iter().enumerate() {
        let index = i.to_string();
        let target = ctx.subschema(sub, &[keyword, &index], false)?;
        children.push(ChildConstraint {
            path: vec![keyword.to_string(), index],
            binding: Binding::Local,
            target,
        });
    }
    Ok(children)
}

fn failed_segments(ev: &KeywordEvaluation<'_>) -> Vec<String> {
    ev.children()
        .iter()
        .filter(|c| !c.valid())
        .filter_map(|c| c.segment.clone())
        .collect()
}

fn build_all_of(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let children = subschema_array(ctx, "allOf", raw)?;
    Ok(Some(Constraint {
        children,
        eval: Arc::new(|ev| {
            let failed = ev.children().iter().filter(|c| !c.valid()).count();
            if failed > 0 {
                ev.fail(format!(
                    "{} of {} subschemas do not match",
                    failed,
                    ev.children().len()
                ));
            }
        }),
    }))
}

fn build_any_of(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let children = subschema_array(ctx, "anyOf", raw)?;
    Ok(Some(Constraint {
        children,
        eval: Arc::new(|ev| {
            if ev.children().iter().any(|c| c.valid()) {
                // Only chosen branches may contribute annotations.
                ev.keep_children(ChildKeep::ValidOnly);
            } else {
                ev.fail("no subschema matches");
            }
        }),
    }))
}

fn build_one_of(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let children = subschema_array(ctx, "oneOf", raw)?;
    Ok(Some(Constraint {
        children,
        eval: Arc::new(|ev| {
            let matched = ev.children().iter().filter(|c| c.valid()).count();
            if matched == 1 {
                ev.keep_children(ChildKeep::ValidOnly);
            } else {
                ev.fail(format!(
                    "expected exactly one matching subschema, {} match",
                    matched
                ));
            }
        }),
    }))
}

fn build_not(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let target = ctx.subschema(raw, &["not"], false)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["not".to_string()],
            binding: Binding::Local,
            target,
        }],
        eval: Arc::new(|ev| {
            // Results of the negated schema never carry into the report:
            // its errors are expected and its annotations are inverted away.
            ev.keep_children(ChildKeep::None);
            if ev.children().iter().all(|c| c.valid()) {
                ev.fail("the instance must not match the schema");
            }
        }),
    }))
}

fn build_if(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let target = ctx.subschema(raw, &["if"], false)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["if".to_string()],
            binding: Binding::Local,
            target,
        }],
        eval: Arc::new(|ev| {
            let matched = ev.children().iter().all(|c| c.valid());
            // The condition never fails its parent; the outcome feeds
            // `then`/`else` through the dependency order.
            ev.annotate(Value::Bool(matched));
            ev.keep_children(ChildKeep::ValidOnly);
        }),
    }))
}

fn build_conditional_branch(
    ctx: &mut BuildContext<'_, '_>,
    keyword: &'static str,
    raw: &Value,
    when: bool,
) -> Result<Option<Constraint>> {
    // Without a sibling condition the branch is never applicable.
    if ctx.peer("if").is_none() {
        return Ok(None);
    }
    let target = ctx.subschema(raw, &[keyword], false)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec![keyword.to_string()],
            binding: Binding::Local,
            target,
        }],
        eval: Arc::new(move |ev| {
            let applicable = ev
                .sibling("if")
                .filter(|o| !o.skipped)
                .and_then(|o| o.annotation.as_ref())
                .and_then(Value::as_bool)
                == Some(when);
            if !applicable {
                ev.mark_skipped();
                return;
            }
            if ev.children().iter().any(|c| !c.valid()) {
                ev.fail(format!("the \"{}\" schema does not match", keyword));
            }
        }),
    }))
}

fn build_then(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    build_conditional_branch(ctx, "then", raw, true)
}

fn build_else(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    build_conditional_branch(ctx, "else", raw, false)
}

fn build_dependent_schemas(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    let map = raw
        .as_object()
        .ok_or_else(|| ctx.syntax("expected an object of schemas"))?;
    let mut children = Vec::with_capacity(map.len());
    for (key, sub) in map {
        let target = ctx.subschema(sub, &["dependentSchemas", key], false)?;
        children.push(ChildConstraint {
            path: vec!["dependentSchemas".to_string(), key.clone()],
            binding: Binding::DependentSchema(key.clone()),
            target,
        });
    }
    Ok(Some(Constraint {
        children,
        eval: Arc::new(|ev| {
            if !ev.instance().is_object() {
                ev.mark_skipped();
                return;
            }
            let failed = ev.children().iter().filter(|c| !c.valid()).count();
            if failed > 0 {
                ev.fail(format!("{} dependent schemas do not match", failed));
            }
        }),
    }))
}

/// Draft 7 `dependencies`: array entries require sibling properties, schema
/// entries apply a dependent schema
fn build_dependencies(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let map = raw
        .as_object()
        .ok_or_else(|| ctx.syntax("expected an object"))?;
    let mut children = Vec::new();
    let mut required: Vec<(String, Vec<String>)> = Vec::new();
    for (key, entry) in map {
        match entry {
            Value::Array(names) => {
                let mut needed = Vec::with_capacity(names.len());
                for name in names {
                    let name = name
                        .as_str()
                        .ok_or_else(|| ctx.syntax("property dependencies must be strings"))?;
                    needed.push(name.to_string());
                }
                required.push((key.clone(), needed));
            }
            Value::Object(_) | Value::Bool(_) => {
                let target = ctx.subschema(entry, &["dependencies", key], false)?;
                children.push(ChildConstraint {
                    path: vec!["dependencies".to_string(), key.clone()],
                    binding: Binding::DependentSchema(key.clone()),
                    target,
                });
            }
            _ => return Err(ctx.syntax(format!("entry `{}` is neither schema nor array", key))),
        }
    }
    Ok(Some(Constraint {
        children,
        eval: Arc::new(move |ev| {
            let Some(object) = ev.instance().as_object() else {
                ev.mark_skipped();
                return;
            };
            for (key, needed) in &required {
                if !object.contains_key(key) {
                    continue;
                }
                let missing: Vec<&str> = needed
                    .iter()
                    .filter(|n| !object.contains_key(n.as_str()))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    ev.fail(format!(
                        "property `{}` requires missing properties: {}",
                        key,
                        missing.join(", ")
                    ));
                    return;
                }
            }
            if ev.children().iter().any(|c| !c.valid()) {
                ev.fail("a dependent schema does not match");
            }
        }),
    }))
}

fn build_properties(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let map = raw
        .as_object()
        .ok_or_else(|| ctx.syntax("expected an object of schemas"))?;
    let mut children = Vec::with_capacity(map.len());
    for (name, sub) in map {
        let target = ctx.subschema(sub, &["properties", name], true)?;
        children.push(ChildConstraint {
            path: vec!["properties".to_string(), name.clone()],
            binding: Binding::Property(name.clone()),
            target,
        });
    }
    Ok(Some(Constraint {
        children,
        eval: Arc::new(|ev| fold_member_applications(ev, "properties")),
    }))
}

fn build_pattern_properties(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    let map = raw
        .as_object()
        .ok_or_else(|| ctx.syntax("expected an object of schemas"))?;
    let mut children = Vec::with_capacity(map.len());
    for (pattern, sub) in map {
        let regex = Regex::new(pattern)
            .map_err(|e| ctx.syntax(format!("invalid pattern `{}`: {}", pattern, e)))?;
        let target = ctx.subschema(sub, &["patternProperties", pattern], true)?;
        children.push(ChildConstraint {
            path: vec!["patternProperties".to_string(), pattern.clone()],
            binding: Binding::PatternProperty(regex),
            target,
        });
    }
    Ok(Some(Constraint {
        children,
        eval: Arc::new(|ev| fold_member_applications(ev, "patternProperties")),
    }))
}

fn build_additional_properties(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    let target = ctx.subschema(raw, &["additionalProperties"], true)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["additionalProperties".to_string()],
            binding: Binding::UncoveredProperties,
            target,
        }],
        eval: Arc::new(|ev| fold_member_applications(ev, "additionalProperties")),
    }))
}

/// Shared fold for keywords that apply subschemas to object members and
/// annotate the member names they evaluated
fn fold_member_applications(ev: &mut KeywordEvaluation<'_>, keyword: &str) {
    if !ev.instance().is_object() {
        ev.mark_skipped();
        return;
    }
    let mut evaluated: Vec<Value> = Vec::new();
    for child in ev.children() {
        if let Some(segment) = &child.segment {
            let name = Value::String(segment.clone());
            if !evaluated.contains(&name) {
                evaluated.push(name);
            }
        }
    }
    ev.annotate(Value::Array(evaluated));
    let failed = failed_segments(ev);
    if !failed.is_empty() {
        ev.fail(format!(
            "{}: properties {} do not match",
            keyword,
            failed.join(", ")
        ));
    }
}

fn build_property_names(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let target = ctx.subschema(raw, &["propertyNames"], true)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["propertyNames".to_string()],
            binding: Binding::PropertyNames,
            target,
        }],
        eval: Arc::new(|ev| {
            if !ev.instance().is_object() {
                ev.mark_skipped();
                return;
            }
            let failed = failed_segments(ev);
            if !failed.is_empty() {
                ev.fail(format!("property names {} do not match", failed.join(", ")));
            }
        }),
    }))
}

fn build_prefix_items(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let children = tuple_children(ctx, "prefixItems", raw)?;
    Ok(Some(Constraint {
        children,
        eval: Arc::new(|ev| fold_tuple_applications(ev)),
    }))
}

fn tuple_children(
    ctx: &mut BuildContext<'_, '_>,
    keyword: &str,
    raw: &Value,
) -> Result<Vec<ChildConstraint>> {
    let items = raw
        .as_array()
        .ok_or_else(|| ctx.syntax("expected an array of schemas"))?;
    if items.is_empty() {
        return Err(ctx.syntax("expected at least one schema"));
    }
    let mut children = Vec::with_capacity(items.len());
    for (i, sub) in items.iter().enumerate() {
        let index = i.to_string();
        let target = ctx.subschema(sub, &[keyword, &index], true)?;
        children.push(ChildConstraint {
            path: vec![keyword.to_string(), index],
            binding: Binding::PrefixItem(i),
            target,
        });
    }
    Ok(children)
}

/// Fold per-index tuple applications: annotation is `true` when every
/// element was covered, otherwise the greatest index applied
fn fold_tuple_applications(ev: &mut KeywordEvaluation<'_>) {
    let Some(items) = ev.instance().as_array() else {
        ev.mark_skipped();
        return;
    };
    let applied = ev.children().len();
    if applied > 0 {
        if applied >= items.len() {
            ev.annotate(Value::Bool(true));
        } else {
            ev.annotate(Value::from(applied as u64 - 1));
        }
    }
    let failed = failed_segments(ev);
    if !failed.is_empty() {
        ev.fail(format!("items at indexes {} do not match", failed.join(", ")));
    }
}

fn build_items(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let start = ctx
        .peer("prefixItems")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    let target = ctx.subschema(raw, &["items"], true)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["items".to_string()],
            binding: Binding::ItemsFrom(start),
            target,
        }],
        eval: Arc::new(|ev| fold_rest_applications(ev, "items")),
    }))
}

/// Legacy `items`: a single schema for every element, or a tuple of schemas
fn build_items_legacy(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    if raw.is_array() {
        let children = tuple_children(ctx, "items", raw)?;
        return Ok(Some(Constraint {
            children,
            eval: Arc::new(|ev| fold_tuple_applications(ev)),
        }));
    }
    let target = ctx.subschema(raw, &["items"], true)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["items".to_string()],
            binding: Binding::ItemsFrom(0),
            target,
        }],
        eval: Arc::new(|ev| fold_rest_applications(ev, "items")),
    }))
}

fn build_additional_items(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    // Only meaningful after a tuple-form `items`.
    let Some(start) = ctx.peer("items").and_then(Value::as_array).map(Vec::len) else {
        return Ok(None);
    };
    let target = ctx.subschema(raw, &["additionalItems"], true)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["additionalItems".to_string()],
            binding: Binding::ItemsFrom(start),
            target,
        }],
        eval: Arc::new(|ev| fold_rest_applications(ev, "additionalItems")),
    }))
}

/// Fold applications covering every element from some index on; the `true`
/// annotation means all remaining elements were evaluated
fn fold_rest_applications(ev: &mut KeywordEvaluation<'_>, keyword: &str) {
    if !ev.instance().is_array() {
        ev.mark_skipped();
        return;
    }
    if !ev.children().is_empty() {
        ev.annotate(Value::Bool(true));
    }
    let failed = failed_segments(ev);
    if !failed.is_empty() {
        ev.fail(format!(
            "{}: items at indexes {} do not match",
            keyword,
            failed.join(", ")
        ));
    }
}

fn build_contains(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let target = ctx.subschema(raw, &["contains"], true)?;
    // minContains: 0 makes an empty match acceptable (2019-09 onward).
    let zero_ok = ctx.peer("minContains").and_then(Value::as_u64) == Some(0);
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["contains".to_string()],
            binding: Binding::Elements,
            target,
        }],
        eval: Arc::new(move |ev| {
            if !ev.instance().is_array() {
                ev.mark_skipped();
                return;
            }
            let matched: Vec<Value> = ev
                .children()
                .iter()
                .filter(|c| c.valid())
                .filter_map(|c| c.segment.as_ref())
                .filter_map(|s| s.parse::<u64>().ok())
                .map(Value::from)
                .collect();
            let any = !matched.is_empty();
            ev.annotate(Value::Array(matched));
            if any || zero_ok {
                ev.keep_children(ChildKeep::ValidOnly);
            } else {
                ev.fail("no array element matches the contains schema");
            }
        }),
    }))
}
