//! Core vocabulary: references and reserved locations

use std::sync::Arc;

use serde_json::Value;

use crate::compile::BuildContext;
use crate::dialect::{Draft, Vocabulary};
use crate::error::Result;
use crate::eval::KeywordEvaluation;
use crate::keyword::{
    Binding, ChildConstraint, Constraint, KeywordCatalog, KeywordDescriptor, ALL_DRAFTS,
    MODERN_DRAFTS,
};
use crate::node::SchemaNode;
use crate::pointer::Pointer;

pub(crate) fn register(catalog: &mut KeywordCatalog) {
    catalog.register(KeywordDescriptor {
        name: "$ref",
        vocabulary: Vocabulary::Core,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_ref,
    });
    catalog.register(KeywordDescriptor {
        name: "$dynamicRef",
        vocabulary: Vocabulary::Core,
        drafts: &[Draft::V2020_12],
        depends_on: &[],
        build: build_dynamic_ref,
    });
    catalog.register(KeywordDescriptor {
        name: "$recursiveRef",
        vocabulary: Vocabulary::Core,
        drafts: &[Draft::V2019_09],
        depends_on: &[],
        build: build_recursive_ref,
    });
    catalog.register(KeywordDescriptor {
        name: "$defs",
        vocabulary: Vocabulary::Core,
        drafts: MODERN_DRAFTS,
        depends_on: &[],
        build: build_defs,
    });
    catalog.register(KeywordDescriptor {
        name: "definitions",
        vocabulary: Vocabulary::Core,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_defs,
    });
    catalog.register(KeywordDescriptor {
        name: "$comment",
        vocabulary: Vocabulary::Core,
        drafts: ALL_DRAFTS,
        depends_on: &[],
        build: build_comment,
    });
}

fn fold_reference(ev: &mut KeywordEvaluation<'_>) {
    if ev.children().iter().any(|c| !c.valid()) {
        ev.fail("the referenced schema rejects the instance");
    }
}

fn build_ref(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let reference = raw
        .as_str()
        .ok_or_else(|| ctx.syntax("expected a URI reference string"))?;
    let target = ctx.static_ref(reference)?;
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["$ref".to_string()],
            binding: Binding::Local,
            target,
        }],
        eval: Arc::new(fold_reference),
    }))
}

fn build_dynamic_ref(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let reference = raw
        .as_str()
        .ok_or_else(|| ctx.syntax("expected a URI reference string"))?;
    let (target, anchor) = ctx.dynamic_ref(reference)?;
    // Without a matching $dynamicAnchor on the static target this behaves
    // exactly like $ref.
    let binding = match anchor {
        Some(anchor) => Binding::DynamicRef { anchor },
        None => Binding::Local,
    };
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["$dynamicRef".to_string()],
            binding,
            target,
        }],
        eval: Arc::new(fold_reference),
    }))
}

fn build_recursive_ref(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    if raw.as_str() != Some("#") {
        return Err(ctx.syntax("the only valid value is \"#\""));
    }
    let (target, anchor) = ctx.recursive_ref()?;
    let binding = match anchor {
        Some(anchor) => Binding::DynamicRef { anchor },
        None => Binding::Local,
    };
    Ok(Some(Constraint {
        children: vec![ChildConstraint {
            path: vec!["$recursiveRef".to_string()],
            binding,
            target,
        }],
        eval: Arc::new(fold_reference),
    }))
}

/// `$defs`/`definitions` reserve a location; entries compile lazily when
/// referenced, but the map shape is checked up front
fn build_defs(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    let map = raw
        .as_object()
        .ok_or_else(|| ctx.syntax("expected an object of schemas"))?;
    for (name, sub) in map {
        if !(sub.is_object() || sub.is_boolean()) {
            return Err(ctx.syntax(format!("entry `{}` is not a schema", name)));
        }
    }
    Ok(None)
}

fn build_comment(ctx: &mut BuildContext<'_, '_>, raw: &Value) -> Result<Option<Constraint>> {
    if !raw.is_string() {
        return Err(ctx.syntax("expected a string"));
    }
    Ok(None)
}

/// Check that a raw value parses as a schema without compiling it
pub(crate) fn check_schema_shape(
    ctx: &BuildContext<'_, '_>,
    raw: &Value,
) -> Result<()> {
    SchemaNode::parse(raw, &Pointer::root())
        .map(|_| ())
        .map_err(|_| ctx.syntax("expected a schema"))
}
