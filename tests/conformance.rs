//! Conformance tests for the evaluation engine
//!
//! Exercises the public API end to end: compilation, reference resolution,
//! dependency-ordered evaluation, annotation collection, and output
//! rendering, across the supported dialects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use keystone_schema::compile::BuildContext;
use keystone_schema::error::Result as CompileResult;
use keystone_schema::keyword::{Constraint, KeywordCatalog, KeywordDescriptor};
use keystone_schema::{
    CompileError, Dialect, Draft, Engine, EvaluateError, EvaluationOptions, EvaluationResults,
    OutputFormat, UnknownKeywordPolicy, Vocabulary,
};

const DRAFT_2019: &str = "https://json-schema.org/draft/2019-09/schema";
const DRAFT_7: &str = "http://json-schema.org/draft-07/schema#";

fn evaluate(schema: &Value, instance: &Value) -> EvaluationResults {
    let engine = Engine::new();
    let compiled = engine.compile(schema).expect("schema should compile");
    compiled
        .evaluate(instance, &EvaluationOptions::default())
        .expect("evaluation should complete")
}

fn valid(schema: &Value, instance: &Value) -> bool {
    evaluate(schema, instance).flag()
}

// =============================================================================
// Core properties
// =============================================================================

#[test]
fn test_evaluation_is_deterministic() {
    let schema = json!({
        "type": "object",
        "properties": {"a": {"type": "integer"}},
        "required": ["a"]
    });
    let engine = Engine::new();
    let compiled = engine.compile(&schema).unwrap();
    for instance in [json!({"a": 1}), json!({"a": "x"}), json!(null)] {
        let first = compiled.is_valid(&instance);
        for _ in 0..3 {
            assert_eq!(compiled.is_valid(&instance), first);
        }
    }
}

#[test]
fn test_boolean_schemas() {
    let instances = [
        json!(null),
        json!(true),
        json!(0),
        json!("s"),
        json!([1, 2]),
        json!({"a": 1}),
    ];
    for instance in &instances {
        assert!(valid(&json!(true), instance), "true accepts {}", instance);
        assert!(!valid(&json!(false), instance), "false rejects {}", instance);
    }
}

#[test]
fn test_all_of_truth_table() {
    let schema = json!({"allOf": [{"minimum": 2}, {"maximum": 5}]});
    assert!(valid(&schema, &json!(3)));
    assert!(!valid(&schema, &json!(1)));
    assert!(!valid(&schema, &json!(7)));
}

#[test]
fn test_any_of_truth_table() {
    // Branches engineered to pass 0, 1, and 2 times.
    let schema = json!({"anyOf": [{"multipleOf": 2}, {"multipleOf": 3}]});
    assert!(!valid(&schema, &json!(5)));
    assert!(valid(&schema, &json!(4)));
    assert!(valid(&schema, &json!(6)));
}

#[test]
fn test_one_of_truth_table() {
    let schema = json!({"oneOf": [{"multipleOf": 2}, {"multipleOf": 3}]});
    assert!(!valid(&schema, &json!(5)), "0 matching branches");
    assert!(valid(&schema, &json!(4)), "1 matching branch");
    assert!(!valid(&schema, &json!(6)), "2 matching branches");
}

#[test]
fn test_ref_matches_inlined_definition() {
    let by_ref = json!({
        "$id": "https://example.com/s",
        "type": "object",
        "properties": {"v": {"$ref": "#/definitions/x"}},
        "definitions": {"x": {"type": "integer", "minimum": 0}}
    });
    let inlined = json!({
        "type": "object",
        "properties": {"v": {"type": "integer", "minimum": 0}}
    });
    for instance in [
        json!({"v": 3}),
        json!({"v": -1}),
        json!({"v": "x"}),
        json!({}),
        json!(17),
    ] {
        assert_eq!(
            valid(&by_ref, &instance),
            valid(&inlined, &instance),
            "disagreement on {}",
            instance
        );
    }
}

// =============================================================================
// Dependency-ordered sibling reads
// =============================================================================

fn build_marker(_ctx: &mut BuildContext<'_, '_>, raw: &Value) -> CompileResult<Option<Constraint>> {
    let value = raw.clone();
    Ok(Some(Constraint::leaf(Arc::new(move |ev| {
        ev.annotate(value.clone())
    }))))
}

fn build_reader(_ctx: &mut BuildContext<'_, '_>, _raw: &Value) -> CompileResult<Option<Constraint>> {
    Ok(Some(Constraint::leaf(Arc::new(|ev| {
        // The dependency guarantees the marker outcome is terminal here.
        match ev.sibling("x-marker").and_then(|o| o.annotation.clone()) {
            Some(value) => ev.annotate(value),
            None => ev.fail("marker annotation not available"),
        }
    }))))
}

#[test]
fn test_dependent_keyword_sees_terminal_sibling() {
    let mut catalog = KeywordCatalog::standard();
    // Registered before the marker: only the declared dependency can order
    // the reader after it.
    catalog.register(KeywordDescriptor {
        name: "x-reader",
        vocabulary: Vocabulary::Validation,
        drafts: &[Draft::V2020_12],
        depends_on: &["x-marker"],
        build: build_reader,
    });
    catalog.register(KeywordDescriptor {
        name: "x-marker",
        vocabulary: Vocabulary::Validation,
        drafts: &[Draft::V2020_12],
        depends_on: &[],
        build: build_marker,
    });
    let engine = Engine::with_catalog(catalog);
    let compiled = engine
        .compile(&json!({"x-reader": true, "x-marker": 7}))
        .unwrap();
    let results = compiled
        .evaluate(&json!(null), &EvaluationOptions::default())
        .unwrap();
    assert!(results.flag());
    assert_eq!(results.annotation("x-reader"), Some(&json!(7)));
}

#[test]
fn test_min_contains_reads_contains_annotation() {
    let schema = json!({"contains": {"type": "integer"}, "minContains": 2});
    assert!(valid(&schema, &json!([1, "a", 2])));
    let results = evaluate(&schema, &json!([1, "a"]));
    assert!(!results.flag());
    assert!(results.error("minContains").is_some());

    let max = json!({"contains": {"type": "integer"}, "maxContains": 1});
    assert!(valid(&max, &json!([1, "a"])));
    assert!(!valid(&max, &json!([1, 2])));
}

#[test]
fn test_min_contains_zero_accepts_empty_match() {
    let schema = json!({"contains": {"type": "integer"}, "minContains": 0});
    assert!(valid(&schema, &json!(["a", "b"])));
    assert!(valid(&schema, &json!([])));
}

// =============================================================================
// Skipped evaluations
// =============================================================================

#[test]
fn test_skipped_keywords_contribute_nothing() {
    // Type-conditional keywords skip on mismatched instances instead of
    // failing the containing schema.
    assert!(valid(&json!({"maxLength": 3}), &json!(12345)));
    assert!(valid(&json!({"required": ["a"]}), &json!("not an object")));
    assert!(valid(&json!({"minItems": 2}), &json!({"a": 1})));

    let results = evaluate(&json!({"maxLength": 3}), &json!(12345));
    assert!(results.annotations.is_empty());
    assert!(results.errors.is_empty());
    assert!(results.details.is_empty());
}

#[test]
fn test_conditional_branch_skipped_when_inapplicable() {
    let schema = json!({
        "if": {"type": "string"},
        "then": {"maxLength": 2},
        "else": {"minimum": 10}
    });
    assert!(valid(&schema, &json!("ab")));
    assert!(!valid(&schema, &json!("abc")));
    assert!(valid(&schema, &json!(11)));
    assert!(!valid(&schema, &json!(3)));

    // The inapplicable branch leaves no trace in the report.
    let results = evaluate(&schema, &json!("ab"));
    assert!(results.error("else").is_none());
    assert!(results.flag());
}

// =============================================================================
// Output formats
// =============================================================================

#[test]
fn test_flag_equals_pruned_tree_errors() {
    let schema = json!({
        "type": "object",
        "properties": {"a": {"type": "integer"}}
    });
    let passing = evaluate(&schema, &json!({"a": 1}));
    assert!(passing.flag());
    assert!(!passing.has_errors());

    let failing = evaluate(&schema, &json!({"a": "x"}));
    assert!(!failing.flag());
    assert!(failing.has_errors());
    assert_eq!(passing.to_output(OutputFormat::Flag), json!({"valid": true}));
    assert_eq!(failing.to_output(OutputFormat::Flag), json!({"valid": false}));
}

#[test]
fn test_list_output_contains_locations() {
    let schema = json!({
        "type": "object",
        "properties": {"a": {"type": "integer"}}
    });
    let output = evaluate(&schema, &json!({"a": "x"})).to_output(OutputFormat::List);
    let details = output["details"].as_array().unwrap();
    assert!(!output["valid"].as_bool().unwrap());
    let unit = details
        .iter()
        .find(|u| u["keywordLocation"] == "/properties/a")
        .expect("per-property unit present");
    assert_eq!(unit["instanceLocation"], "/a");
    assert!(unit["errors"]["type"].is_string());
}

// =============================================================================
// The concrete scenario from the design notes
// =============================================================================

#[test]
fn test_object_properties_required_scenario() {
    let schema = json!({
        "type": "object",
        "properties": {"a": {"type": "integer"}},
        "required": ["a"]
    });

    assert!(valid(&schema, &json!({"a": 5})));

    let wrong_type = evaluate(&schema, &json!({"a": "x"}));
    assert!(!wrong_type.flag());
    let (location, _) = wrong_type.find_error("type").unwrap();
    assert_eq!(location.to_string(), "/a");

    let missing = evaluate(&schema, &json!({}));
    assert!(!missing.flag());
    let (location, message) = missing.find_error("required").unwrap();
    assert_eq!(location.to_string(), "");
    assert!(message.contains('a'));
}

// =============================================================================
// References
// =============================================================================

#[test]
fn test_external_resource_resolution() {
    let mut engine = Engine::new();
    engine
        .add_resource(&json!({
            "$id": "https://example.com/defs",
            "$defs": {
                "positive": {"$anchor": "positive", "type": "integer", "minimum": 1}
            }
        }))
        .unwrap();

    let by_pointer = engine
        .compile(&json!({"$ref": "https://example.com/defs#/$defs/positive"}))
        .unwrap();
    assert!(by_pointer.is_valid(&json!(3)));
    assert!(!by_pointer.is_valid(&json!(0)));

    let by_anchor = engine
        .compile(&json!({"$ref": "https://example.com/defs#positive"}))
        .unwrap();
    assert!(by_anchor.is_valid(&json!(3)));
    assert!(!by_anchor.is_valid(&json!("x")));
}

#[test]
fn test_dynamic_ref_resolves_outermost_anchor() {
    let tree = json!({
        "$id": "https://example.com/tree",
        "$dynamicAnchor": "node",
        "type": "object",
        "properties": {
            "data": true,
            "children": {
                "type": "array",
                "items": {"$dynamicRef": "#node"}
            }
        }
    });
    let strict_tree = json!({
        "$id": "https://example.com/strict-tree",
        "$dynamicAnchor": "node",
        "$ref": "tree",
        "unevaluatedProperties": false
    });

    let mut engine = Engine::new();
    engine.add_resource(&tree).unwrap();

    // Against the plain tree the stray property is merely unvalidated.
    let plain = engine.compile(&tree).unwrap();
    let sneaky = json!({"children": [{"daat": 1}]});
    assert!(plain.is_valid(&sneaky));

    // The strict wrapper's outermost $dynamicAnchor rebinds the recursion,
    // so unevaluatedProperties applies at every depth.
    let strict = engine.compile(&strict_tree).unwrap();
    assert!(!strict.is_valid(&sneaky));
    assert!(strict.is_valid(&json!({"data": 1, "children": [{"data": 2}]})));
}

#[test]
fn test_recursive_ref_2019() {
    let schema = json!({
        "$schema": DRAFT_2019,
        "$id": "https://example.com/rtree",
        "$recursiveAnchor": true,
        "type": "object",
        "properties": {
            "value": {"type": "integer"},
            "children": {"type": "array", "items": {"$recursiveRef": "#"}}
        }
    });
    assert!(valid(
        &schema,
        &json!({"value": 1, "children": [{"value": 2, "children": []}]})
    ));
    assert!(!valid(&schema, &json!({"value": 1, "children": [{"value": "x"}]})));
}

// =============================================================================
// Unevaluated vocabulary
// =============================================================================

#[test]
fn test_unevaluated_properties_across_all_of() {
    let schema = json!({
        "allOf": [{"properties": {"a": {"type": "integer"}}}],
        "properties": {"b": {"type": "string"}},
        "unevaluatedProperties": false
    });
    assert!(valid(&schema, &json!({"a": 1, "b": "x"})));
    assert!(!valid(&schema, &json!({"a": 1, "c": true})));
}

#[test]
fn test_unevaluated_items_after_prefix() {
    let schema = json!({
        "prefixItems": [{"type": "integer"}],
        "unevaluatedItems": {"type": "string"}
    });
    assert!(valid(&schema, &json!([1, "a", "b"])));
    assert!(!valid(&schema, &json!([1, "a", 2])));
}

// =============================================================================
// Dialects
// =============================================================================

#[test]
fn test_tuple_items_draft_2019() {
    let schema = json!({
        "$schema": DRAFT_2019,
        "items": [{"type": "integer"}, {"type": "string"}],
        "additionalItems": {"type": "boolean"}
    });
    assert!(valid(&schema, &json!([1, "a"])));
    assert!(valid(&schema, &json!([1, "a", true, false])));
    assert!(!valid(&schema, &json!([1, 2])));
    assert!(!valid(&schema, &json!([1, "a", "not a bool"])));
}

#[test]
fn test_array_items_rejected_in_2020() {
    // 2020-12 moved tuple validation to prefixItems; an array-valued items
    // is a syntax error there, not silently legacy-interpreted.
    let engine = Engine::new();
    let schema = json!({"items": [{"type": "integer"}]});
    assert!(matches!(
        engine.compile(&schema),
        Err(CompileError::SchemaSyntax { .. })
    ));
}

#[test]
fn test_dependencies_draft7() {
    let schema = json!({
        "$schema": DRAFT_7,
        "dependencies": {
            "credit_card": ["billing_address"],
            "shipping": {"required": ["address"]}
        }
    });
    assert!(valid(&schema, &json!({"credit_card": 1, "billing_address": "x"})));
    assert!(!valid(&schema, &json!({"credit_card": 1})));
    assert!(valid(&schema, &json!({"shipping": true, "address": "x"})));
    assert!(!valid(&schema, &json!({"shipping": true})));
    assert!(valid(&schema, &json!({})));
}

#[test]
fn test_unknown_keywords_annotated_in_2020() {
    let results = evaluate(&json!({"fooBar": 42, "type": "integer"}), &json!(3));
    assert!(results.flag());
    assert_eq!(results.annotation("fooBar"), Some(&json!(42)));
}

#[test]
fn test_unknown_keywords_ignored_in_draft7() {
    let results = evaluate(&json!({"$schema": DRAFT_7, "fooBar": 42}), &json!(3));
    assert!(results.flag());
    assert!(results.annotation("fooBar").is_none());
}

#[test]
fn test_strict_dialect_rejects_unknown_keywords() {
    let mut engine = Engine::new();
    engine.register_dialect(Dialect {
        id: "https://example.com/strict".to_string(),
        draft: Draft::V2020_12,
        vocabularies: vec![Vocabulary::Core, Vocabulary::Validation],
        unknown_keywords: UnknownKeywordPolicy::Error,
    });

    let ok = engine
        .compile(&json!({"$schema": "https://example.com/strict", "type": "integer"}))
        .unwrap();
    assert!(ok.is_valid(&json!(3)));

    match engine.compile(&json!({"$schema": "https://example.com/strict", "fooBar": 1})) {
        Err(CompileError::UnknownKeyword { keyword, .. }) => assert_eq!(keyword, "fooBar"),
        other => panic!("expected UnknownKeyword, got {:?}", other.err()),
    }

    // The Applicator vocabulary is not activated, so `properties` is
    // unrecognized under this dialect.
    assert!(matches!(
        engine.compile(&json!({"$schema": "https://example.com/strict", "properties": {}})),
        Err(CompileError::UnknownKeyword { .. })
    ));
}

// =============================================================================
// Annotations
// =============================================================================

#[test]
fn test_metadata_annotations_collected() {
    let schema = json!({
        "title": "Point",
        "properties": {"x": {"type": "number"}}
    });
    let results = evaluate(&schema, &json!({"x": 1.5}));
    assert!(results.flag());
    assert_eq!(results.annotation("title"), Some(&json!("Point")));
    assert_eq!(results.annotation("properties"), Some(&json!(["x"])));
}

#[test]
fn test_failed_any_of_branch_annotations_dropped() {
    let schema = json!({
        "anyOf": [
            {"properties": {"a": true}, "required": ["a"]},
            {"properties": {"b": true}, "required": ["b", "z"]}
        ],
        "unevaluatedProperties": false
    });
    assert!(valid(&schema, &json!({"a": 1})));
    // The second branch fails (no "z"), so its claim on "b" is dropped and
    // "b" is left for unevaluatedProperties to reject.
    assert!(!valid(&schema, &json!({"a": 1, "b": 2})));
}

#[test]
fn test_format_annotates_and_optionally_asserts() {
    let schema = json!({"format": "shouty"});

    let results = evaluate(&schema, &json!("quiet"));
    assert!(results.flag());
    assert_eq!(results.annotation("format"), Some(&json!("shouty")));

    let mut engine = Engine::new();
    engine.register_format(
        "shouty",
        Arc::new(|s: &str| s.chars().all(|c| c.is_uppercase())),
    );
    engine.set_assert_formats(true);
    let compiled = engine.compile(&schema).unwrap();
    assert!(compiled.is_valid(&json!("LOUD")));
    assert!(!compiled.is_valid(&json!("quiet")));
    // Non-strings only collect the annotation.
    assert!(compiled.is_valid(&json!(7)));
}

// =============================================================================
// Engine behavior
// =============================================================================

#[test]
fn test_cancellation_aborts_evaluation() {
    let engine = Engine::new();
    let compiled = engine.compile(&json!({"type": "object"})).unwrap();
    let cancel = Arc::new(AtomicBool::new(true));
    let options = EvaluationOptions {
        cancel: Some(cancel.clone()),
        ..EvaluationOptions::default()
    };
    assert_eq!(
        compiled.evaluate(&json!({}), &options).unwrap_err(),
        EvaluateError::Canceled
    );

    cancel.store(false, Ordering::Relaxed);
    assert!(compiled.evaluate(&json!({}), &options).unwrap().flag());
}

#[test]
fn test_depth_limit() {
    let engine = Engine::new();
    let compiled = engine
        .compile(&json!({"properties": {"a": {"$ref": "#"}}}))
        .unwrap();

    let mut deep = json!({});
    for _ in 0..64 {
        deep = json!({"a": deep});
    }
    let options = EvaluationOptions {
        max_depth: Some(16),
        ..EvaluationOptions::default()
    };
    assert_eq!(
        compiled.evaluate(&deep, &options).unwrap_err(),
        EvaluateError::DepthExceeded(16)
    );
    // Shallow instances stay well within the limit.
    assert!(compiled
        .evaluate(&json!({"a": {}}), &options)
        .unwrap()
        .flag());
}

#[test]
fn test_compile_error_precedes_evaluation() {
    // A malformed schema is a configuration error, never "instance invalid".
    let engine = Engine::new();
    let schema = json!({"minimum": "not a number"});
    match engine.compile(&schema) {
        Err(CompileError::SchemaSyntax { keyword, .. }) => assert_eq!(keyword, "minimum"),
        other => panic!("expected SchemaSyntax, got {:?}", other.err()),
    }
}
