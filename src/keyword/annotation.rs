//! Metadata, format, and content vocabularies
//!
//! Pure annotation keywords carry their raw value into the results.
//! `format` additionally asserts when the engine has a registered checker
//! for the format name and assertion is enabled; checkers are supplied by
//! the caller, the core ships no format grammars.

use std::sync::Arc;

use serde_json::Value;

use crate::compile::BuildContext;
use crate::dialect::Vocabulary;
use crate::error::Result;
use crate::keyword::{core, BuildFn, Constraint, KeywordCatalog, KeywordDescriptor, ALL_DRAFTS};

pub(crate) fn register(catalog: &mut KeywordCatalog) {
    let meta = |name: &'static str, build: BuildFn| KeywordDescriptor {
        name,
        vocabulary: Vocabulary::MetaData,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build,
    };

    catalog.register(meta("title", build_string_annotation));
    catalog.register(meta("description", build_string_annotation));
    catalog.register(meta("default", build_any_annotation));
    catalog.register(meta("deprecated", build_bool_annotation));
    catalog.register(meta("readOnly", build_bool_annotation));
    catalog.register(meta("writeOnly", build_bool_annotation));
    catalog.register(meta("examples", build_array_annotation));

    catalog.register(KeywordDescriptor {
        name: "format",
        vocabulary: Vocabulary::FormatAnnotation,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_format,
    });

    let content = |name: &'static str, build: BuildFn| KeywordDescriptor {
        name,
        vocabulary: Vocabulary::Content,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build,
    };
    catalog.register(content("contentEncoding", build_string_annotation));
    catalog.register(content("contentMediaType", build_string_annotation));
    catalog.register(content("contentSchema", build_content_schema));
}

fn build_string_annotation(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    if !raw.is_string() {
        return Err(ctx.syntax("expected a string"));
    }
    Ok(Some(Constraint::simple_annotation(raw.clone())))
}

fn build_bool_annotation(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    if !raw.is_boolean() {
        return Err(ctx.syntax("expected a boolean"));
    }
    Ok(Some(Constraint::simple_annotation(raw.clone())))
}

fn build_array_annotation(
    ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    if !raw.is_array() {
        return Err(ctx.syntax("expected an array"));
    }
    Ok(Some(Constraint::simple_annotation(raw.clone())))
}

fn build_any_annotation(
    _ctx: &mut BuildContext<'_, '_>,
    raw: &Value,
) -> Result<Option<Constraint>> {
    Ok(Some(Constraint::simple_annotation(raw.clone())))
}

fn build_format(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let name = raw
        .as_str()
        .ok_or_else(|| ctx.syntax("expected a format name string"))?
        .to_string();
    let checker = if ctx.formats_asserted() {
        ctx.format_checker(&name)
    } else {
        None
    };
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        ev.annotate(Value::String(name.clone()));
        if let (Some(checker), Some(s)) = (&checker, ev.instance().as_str()) {
            if !checker(s) {
                ev.fail(format!("\"{}\" is not a valid {}", s, name));
            }
        }
    }))))
}

/// `contentSchema` annotates with the schema itself; it is not applied to
/// the instance
fn build_content_schema(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    core::check_schema_shape(ctx, raw)?;
    Ok(Some(Constraint::simple_annotation(raw.clone())))
}
