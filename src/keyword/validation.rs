//! Validation vocabulary: assertion keywords
//!
//! Type-conditional assertions mark themselves skipped when the instance is
//! not of the type they constrain, so they contribute neither errors nor
//! annotations to the containing node.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::compile::BuildContext;
use crate::dialect::Vocabulary;
use crate::error::Result;
use crate::eval::KeywordEvaluation;
use crate::keyword::{
    BuildFn, Constraint, KeywordCatalog, KeywordDescriptor, ALL_DRAFTS, MODERN_DRAFTS,
};
use crate::node::type_name;

pub(crate) fn register(catalog: &mut KeywordCatalog) {
    let leaf = |name: &'static str, build: BuildFn| KeywordDescriptor {
        name,
        vocabulary: Vocabulary::Validation,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build,
    };

    catalog.register(leaf("type", build_type));
    catalog.register(leaf("enum", build_enum));
    catalog.register(leaf("const", build_const));
    catalog.register(leaf("multipleOf", build_multiple_of));
    catalog.register(leaf("maximum", build_maximum));
    catalog.register(leaf("exclusiveMaximum", build_exclusive_maximum));
    catalog.register(leaf("minimum", build_minimum));
    catalog.register(leaf("exclusiveMinimum", build_exclusive_minimum));
    catalog.register(leaf("maxLength", build_max_length));
    catalog.register(leaf("minLength", build_min_length));
    catalog.register(leaf("pattern", build_pattern));
    catalog.register(leaf("maxItems", build_max_items));
    catalog.register(leaf("minItems", build_min_items));
    catalog.register(leaf("uniqueItems", build_unique_items));
    catalog.register(leaf("maxProperties", build_max_properties));
    catalog.register(leaf("minProperties", build_min_properties));
    catalog.register(leaf("required", build_required));
    catalog.register(KeywordDescriptor {
        name: "maxContains",
        vocabulary: Vocabulary::Validation,
        drafts: MODERN_DRAFTS,
        depends_on: &["contains"],
        build: build_max_contains,
    });
    catalog.register(KeywordDescriptor {
        name: "minContains",
        vocabulary: Vocabulary::Validation,
        drafts: MODERN_DRAFTS,
        depends_on: &["contains"],
        build: build_min_contains,
    });
    catalog.register(KeywordDescriptor {
        name: "dependentRequired",
        vocabulary: Vocabulary::Validation,
        drafts: MODERN_DRAFTS,
        depends_on: &[],
        build: build_dependent_required,
    });
}

const TYPE_NAMES: &[&str] = &[
    "null", "boolean", "object", "array", "number", "string", "integer",
];

fn matches_type(instance: &Value, name: &str) -> bool {
    match name {
        "integer" => match instance {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        "number" => instance.is_number(),
        other => type_name(instance) == other,
    }
}

fn build_type(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let expected: Vec<String> = match raw {
        Value::String(s) => vec![s.clone()],
        Value::Array(names) => {
            let mut out = Vec::with_capacity(names.len());
            for name in names {
                let name = name
                    .as_str()
                    .ok_or_else(|| ctx.syntax("type names must be strings"))?;
                out.push(name.to_string());
            }
            out
        }
        _ => return Err(ctx.syntax("expected a type name or array of type names")),
    };
    for name in &expected {
        if !TYPE_NAMES.contains(&name.as_str()) {
            return Err(ctx.syntax(format!("unknown type name `{}`", name)));
        }
    }
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        if !expected.iter().any(|t| matches_type(ev.instance(), t)) {
            ev.fail(format!(
                "value is \"{}\" but should be \"{}\"",
                type_name(ev.instance()),
                expected.join("\" or \"")
            ));
        }
    }))))
}

fn build_enum(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let allowed = raw
        .as_array()
        .ok_or_else(|| ctx.syntax("expected an array of values"))?
        .clone();
    if allowed.is_empty() {
        return Err(ctx.syntax("expected at least one value"));
    }
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        if !allowed.contains(ev.instance()) {
            ev.fail("value is not one of the allowed values");
        }
    }))))
}

fn build_const(_ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let expected = raw.clone();
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        if *ev.instance() != expected {
            ev.fail("value does not equal the constant");
        }
    }))))
}

fn number_value(ctx: &BuildContext<'_, '_>, raw: &Value) -> Result<f64> {
    raw.as_f64().ok_or_else(|| ctx.syntax("expected a number"))
}

fn unsigned_value(ctx: &BuildContext<'_, '_>, raw: &Value) -> Result<u64> {
    raw.as_u64()
        .ok_or_else(|| ctx.syntax("expected a non-negative integer"))
}

/// Numeric comparison constraint; skips non-numbers
fn numeric_constraint(
    limit: f64,
    check: fn(f64, f64) -> bool,
    describe: &'static str,
) -> Constraint {
    Constraint::leaf(Arc::new(move |ev| {
        let Some(value) = ev.instance().as_f64() else {
            ev.mark_skipped();
            return;
        };
        if !check(value, limit) {
            ev.fail(format!("{} is not {} {}", value, describe, limit));
        }
    }))
}

fn build_multiple_of(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let divisor = number_value(ctx, raw)?;
    if divisor <= 0.0 {
        return Err(ctx.syntax("expected a number greater than zero"));
    }
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        let Some(value) = ev.instance().as_f64() else {
            ev.mark_skipped();
            return;
        };
        let quotient = value / divisor;
        if (quotient - quotient.round()).abs() > 1e-8 * quotient.abs().max(1.0) {
            ev.fail(format!("{} is not a multiple of {}", value, divisor));
        }
    }))))
}

fn build_maximum(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = number_value(ctx, raw)?;
    Ok(Some(numeric_constraint(limit, |v, l| v <= l, "at most")))
}

fn build_exclusive_maximum(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    let limit = number_value(ctx, raw)?;
    Ok(Some(numeric_constraint(limit, |v, l| v < l, "less than")))
}

fn build_minimum(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = number_value(ctx, raw)?;
    Ok(Some(numeric_constraint(limit, |v, l| v >= l, "at least")))
}

fn build_exclusive_minimum(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    let limit = number_value(ctx, raw)?;
    Ok(Some(numeric_constraint(limit, |v, l| v > l, "greater than")))
}

fn build_max_length(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = unsigned_value(ctx, raw)?;
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        let Some(s) = ev.instance().as_str() else {
            ev.mark_skipped();
            return;
        };
        let length = s.chars().count() as u64;
        if length > limit {
            ev.fail(format!("string length {} exceeds maximum {}", length, limit));
        }
    }))))
}

fn build_min_length(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = unsigned_value(ctx, raw)?;
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        let Some(s) = ev.instance().as_str() else {
            ev.mark_skipped();
            return;
        };
        let length = s.chars().count() as u64;
        if length < limit {
            ev.fail(format!("string length {} is below minimum {}", length, limit));
        }
    }))))
}

fn build_pattern(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let source = raw.as_str().ok_or_else(|| ctx.syntax("expected a string"))?;
    let regex =
        Regex::new(source).map_err(|e| ctx.syntax(format!("invalid pattern `{}`: {}", source, e)))?;
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        let Some(s) = ev.instance().as_str() else {
            ev.mark_skipped();
            return;
        };
        if !regex.is_match(s) {
            ev.fail(format!("string does not match pattern `{}`", regex.as_str()));
        }
    }))))
}

fn count_constraint(
    limit: u64,
    count: fn(&Value) -> Option<u64>,
    check: fn(u64, u64) -> bool,
    message: &'static str,
) -> Constraint {
    Constraint::leaf(Arc::new(move |ev| {
        let Some(actual) = count(ev.instance()) else {
            ev.mark_skipped();
            return;
        };
        if !check(actual, limit) {
            ev.fail(format!("{}: found {}, limit {}", message, actual, limit));
        }
    }))
}

fn array_len(value: &Value) -> Option<u64> {
    value.as_array().map(|a| a.len() as u64)
}

fn object_len(value: &Value) -> Option<u64> {
    value.as_object().map(|o| o.len() as u64)
}

fn build_max_items(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = unsigned_value(ctx, raw)?;
    Ok(Some(count_constraint(limit, array_len, |a, l| a <= l, "too many items")))
}

fn build_min_items(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = unsigned_value(ctx, raw)?;
    Ok(Some(count_constraint(limit, array_len, |a, l| a >= l, "too few items")))
}

fn build_max_properties(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = unsigned_value(ctx, raw)?;
    Ok(Some(count_constraint(limit, object_len, |a, l| a <= l, "too many properties")))
}

fn build_min_properties(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = unsigned_value(ctx, raw)?;
    Ok(Some(count_constraint(limit, object_len, |a, l| a >= l, "too few properties")))
}

fn build_unique_items(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let unique = raw.as_bool().ok_or_else(|| ctx.syntax("expected a boolean"))?;
    if !unique {
        return Ok(None);
    }
    Ok(Some(Constraint::leaf(Arc::new(|ev| {
        let Some(items) = ev.instance().as_array() else {
            ev.mark_skipped();
            return;
        };
        for (i, a) in items.iter().enumerate() {
            for (j, b) in items.iter().enumerate().skip(i + 1) {
                if a == b {
                    ev.fail(format!("items at indexes {} and {} are equal", i, j));
                    return;
                }
            }
        }
    }))))
}

fn build_required(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let names = raw
        .as_array()
        .ok_or_else(|| ctx.syntax("expected an array of property names"))?;
    let mut required = Vec::with_capacity(names.len());
    for name in names {
        let name = name
            .as_str()
            .ok_or_else(|| ctx.syntax("property names must be strings"))?;
        required.push(name.to_string());
    }
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        let Some(object) = ev.instance().as_object() else {
            ev.mark_skipped();
            return;
        };
        let missing: Vec<&str> = required
            .iter()
            .filter(|n| !object.contains_key(n.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            ev.fail(format!("required properties are missing: {}", missing.join(", ")));
        }
    }))))
}

/// Matched-element count reported by the sibling `contains` annotation;
/// `None` when the count is unavailable and the keyword must be skipped
fn contains_count(ev: &KeywordEvaluation<'_>) -> Option<u64> {
    let outcome = ev.sibling("contains")?;
    if outcome.skipped || !outcome.valid {
        return None;
    }
    outcome
        .annotation
        .as_ref()
        .and_then(Value::as_array)
        .map(|a| a.len() as u64)
}

fn build_max_contains(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = unsigned_value(ctx, raw)?;
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        match contains_count(ev) {
            Some(count) if count > limit => {
                ev.fail(format!("{} elements match contains, limit {}", count, limit));
            }
            Some(_) => {}
            None => ev.mark_skipped(),
        }
    }))))
}

fn build_min_contains(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let limit = unsigned_value(ctx, raw)?;
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        match contains_count(ev) {
            Some(count) if count < limit => {
                ev.fail(format!("{} elements match contains, minimum {}", count, limit));
            }
            Some(_) => {}
            None => ev.mark_skipped(),
        }
    }))))
}

fn build_dependent_required(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    let map = raw.as_object().ok_or_else(|| ctx.syntax("expected an object"))?;
    let mut dependencies: Vec<(String, Vec<String>)> = Vec::with_capacity(map.len());
    for (key, names) in map {
        let names = names
            .as_array()
            .ok_or_else(|| ctx.syntax("expected arrays of property names"))?;
        let mut needed = Vec::with_capacity(names.len());
        for name in names {
            let name = name
                .as_str()
                .ok_or_else(|| ctx.syntax("property names must be strings"))?;
            needed.push(name.to_string());
        }
        dependencies.push((key.clone(), needed));
    }
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        let Some(object) = ev.instance().as_object() else {
            ev.mark_skipped();
            return;
        };
        for (key, needed) in &dependencies {
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
    }))))
}
