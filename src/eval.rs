//! Evaluator
//!
//! Walks a compiled constraint graph against one instance, producing the
//! evaluation result tree. Each call owns its entire evaluation state; the
//! graph is only ever read, so any number of evaluations of the same
//! compiled schema may run concurrently.
//!
//! Keyword closures run in build order. Before a closure runs, the evaluator
//! resolves the keyword's child bindings against the instance (with read
//! access to already-terminal sibling outcomes) and recursively evaluates
//! the resulting subschema applications. The dynamic scope (the stack of
//! schema resources entered so far in this call) is threaded explicitly
//! through the recursion for `$dynamicRef` resolution.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::compile::{ConstraintGraph, ConstraintNode, GraphKind, ResourceAnchors};
use crate::error::EvaluateError;
use crate::keyword::{Binding, GraphTarget};
use crate::pointer::Pointer;
use crate::report::{EvaluationResults, OutputFormat};

/// Keyword evaluation closure, built once per compiled keyword
pub type EvalFn = Arc<dyn Fn(&mut KeywordEvaluation<'_>) + Send + Sync>;

/// Options for one evaluation call
#[derive(Clone, Default)]
pub struct EvaluationOptions {
    pub format: OutputFormat,
    /// Cooperative cancellation, checked before each subschema descent
    pub cancel: Option<Arc<AtomicBool>>,
    /// Backstop against pathological late-bound recursion
    pub max_depth: Option<usize>,
}

/// Which child result subtrees a keyword folds into the report
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ChildKeep {
    All,
    ValidOnly,
    None,
}

/// One evaluated subschema application belonging to a keyword
pub struct ChildOutcome {
    /// Index into the keyword's child constraints
    pub child: usize,
    /// Instance pointer token the application descended into, if any
    pub segment: Option<String>,
    pub results: EvaluationResults,
}

impl ChildOutcome {
    pub fn valid(&self) -> bool {
        self.results.valid
    }
}

/// Terminal outcome of one keyword at one schema application
pub struct KeywordOutcome {
    pub keyword: String,
    pub valid: bool,
    pub skipped: bool,
    /// Retained even when invalid, for dependent sibling reads; surfaced in
    /// the report only from valid outcomes
    pub annotation: Option<Value>,
    pub error: Option<String>,
    pub(crate) details: Vec<EvaluationResults>,
}

/// The mutable evaluation state a keyword closure operates on
///
/// Created when the evaluator reaches the keyword, executed exactly once,
/// and folded into the containing node after the closure returns.
pub struct KeywordEvaluation<'a> {
    instance: &'a Value,
    children: Vec<ChildOutcome>,
    siblings: &'a [KeywordOutcome],
    valid: bool,
    skipped: bool,
    annotation: Option<Value>,
    error: Option<String>,
    keep: ChildKeep,
}

impl<'a> KeywordEvaluation<'a> {
    /// The local instance value being checked
    pub fn instance(&self) -> &'a Value {
        self.instance
    }

    /// Evaluated subschema applications, in plan order
    pub fn children(&self) -> &[ChildOutcome] {
        &self.children
    }

    /// A sibling keyword's terminal outcome
    ///
    /// Only dependencies declared in the descriptor are guaranteed to have
    /// run already.
    pub fn sibling(&self, keyword: &str) -> Option<&KeywordOutcome> {
        self.siblings.iter().find(|o| o.keyword == keyword)
    }

    /// Record an annotation
    pub fn annotate(&mut self, value: Value) {
        self.annotation = Some(value);
    }

    /// Record a failure with a human-readable message
    pub fn fail(&mut self, message: impl Into<String>) {
        self.valid = false;
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    /// Exclude this keyword from the containing node entirely: no
    /// annotations, no errors, children not folded upward
    pub fn mark_skipped(&mut self) {
        self.skipped = true;
    }

    /// Choose which child subtrees are folded into the report
    pub fn keep_children(&mut self, keep: ChildKeep) {
        self.keep = keep;
    }
}

pub(crate) fn evaluate_root(
    root: &Arc<ConstraintGraph>,
    instance: &Value,
    options: &EvaluationOptions,
) -> Result<EvaluationResults, EvaluateError> {
    let mut scope = Vec::new();
    eval_graph(
        root,
        instance,
        Pointer::root(),
        Pointer::root(),
        &mut scope,
        options,
        0,
    )
}

fn eval_graph(
    graph: &ConstraintGraph,
    instance: &Value,
    instance_location: Pointer,
    evaluation_path: Pointer,
    scope: &mut Vec<Arc<ResourceAnchors>>,
    options: &EvaluationOptions,
    depth: usize,
) -> Result<EvaluationResults, EvaluateError> {
    if let Some(cancel) = &options.cancel {
        if cancel.load(Ordering::Relaxed) {
            return Err(EvaluateError::Canceled);
        }
    }
    if let Some(max) = options.max_depth {
        if depth > max {
            return Err(EvaluateError::DepthExceeded(max));
        }
    }

    let mut results = EvaluationResults::new(instance_location, evaluation_path);
    results.absolute_keyword_location = graph.absolute_location();

    let constraints = match graph.kind() {
        GraphKind::Boolean(true) => return Ok(results),
        GraphKind::Boolean(false) => {
            results.valid = false;
            results
                .errors
                .insert(String::new(), "the false schema permits no instance".to_string());
            return Ok(results);
        }
        GraphKind::Object(constraints) => constraints,
    };

    let pushed = graph.is_resource_root();
    if pushed {
        scope.push(graph.resource().clone());
    }
    let outcome = eval_object(constraints, instance, &mut results, scope, options, depth);
    if pushed {
        scope.pop();
    }
    outcome?;
    Ok(results)
}

fn eval_object(
    constraints: &[ConstraintNode],
    instance: &Value,
    results: &mut EvaluationResults,
    scope: &mut Vec<Arc<ResourceAnchors>>,
    options: &EvaluationOptions,
    depth: usize,
) -> Result<(), EvaluateError> {
    let mut outcomes: Vec<KeywordOutcome> = Vec::with_capacity(constraints.len());

    for node in constraints {
        let plan = plan_children(node, instance, &outcomes, &results.instance_location, scope);

        let mut children = Vec::with_capacity(plan.len());
        for app in plan {
            let child_location = match &app.segment {
                Some(token) => results.instance_location.push(token.clone()),
                None => results.instance_location.clone(),
            };
            let child_path = results.keyword_location.join(&app.path);
            let value = match &app.value {
                PlanValue::Borrowed(v) => *v,
                PlanValue::Owned(v) => v,
            };
            let child_results = eval_graph(
                &app.graph,
                value,
                child_location,
                child_path,
                scope,
                options,
                depth + 1,
            )?;
            children.push(ChildOutcome {
                child: app.child,
                segment: app.segment,
                results: child_results,
            });
        }

        let mut evaluation = KeywordEvaluation {
            instance,
            children,
            siblings: &outcomes,
            valid: true,
            skipped: false,
            annotation: None,
            error: None,
            keep: ChildKeep::All,
        };
        (node.eval)(&mut evaluation);

        let KeywordEvaluation {
            children,
            valid,
            skipped,
            annotation,
            error,
            keep,
            ..
        } = evaluation;

        let details = if skipped {
            Vec::new()
        } else {
            children
                .into_iter()
                .filter(|c| match keep {
                    ChildKeep::All => true,
                    ChildKeep::ValidOnly => c.valid(),
                    ChildKeep::None => false,
                })
                .map(|c| c.results)
                .collect()
        };

        let failed = !skipped && !valid;
        outcomes.push(KeywordOutcome {
            keyword: node.keyword.clone(),
            valid: skipped || valid,
            skipped,
            annotation,
            error,
            details,
        });

        // With only a pass/fail flag requested there is nothing further
        // siblings could contribute once the node has failed.
        if failed && options.format == OutputFormat::Flag {
            break;
        }
    }

    for outcome in outcomes {
        if outcome.skipped {
            continue;
        }
        if outcome.valid {
            if let Some(annotation) = outcome.annotation {
                results.annotations.insert(outcome.keyword.clone(), annotation);
            }
        } else {
            results.valid = false;
            let message = outcome
                .error
                .unwrap_or_else(|| "instance does not satisfy the keyword".to_string());
            results.errors.insert(outcome.keyword.clone(), message);
        }
        results.details.extend(outcome.details);
    }
    Ok(())
}

enum PlanValue<'i> {
    Borrowed(&'i Value),
    Owned(Value),
}

struct PlannedApp<'i> {
    child: usize,
    segment: Option<String>,
    path: Vec<String>,
    graph: Arc<ConstraintGraph>,
    value: PlanValue<'i>,
}

fn target_graph(target: &GraphTarget) -> Arc<ConstraintGraph> {
    match target {
        GraphTarget::Inline(graph) => graph.clone(),
        GraphTarget::Slot(slot) => slot.get(),
    }
}

fn plan_children<'i>(
    node: &ConstraintNode,
    instance: &'i Value,
    siblings: &[KeywordOutcome],
    instance_location: &Pointer,
    scope: &[Arc<ResourceAnchors>],
) -> Vec<PlannedApp<'i>> {
    let mut plan = Vec::new();
    for (index, child) in node.children.iter().enumerate() {
        match &child.binding {
            Binding::Local => plan.push(PlannedApp {
                child: index,
                segment: None,
                path: child.path.clone(),
                graph: target_graph(&child.target),
                value: PlanValue::Borrowed(instance),
            }),
            Binding::DynamicRef { anchor } => {
                // Outermost matching anchor in the dynamic scope wins; the
                // static target is the fallback.
                let graph = scope
                    .iter()
                    .find_map(|resource| resource.dynamic_slot(anchor))
                    .map(|slot| slot.get())
                    .unwrap_or_else(|| target_graph(&child.target));
                plan.push(PlannedApp {
                    child: index,
                    segment: None,
                    path: child.path.clone(),
                    graph,
                    value: PlanValue::Borrowed(instance),
                });
            }
            Binding::Property(name) => {
                if let Some(value) = instance.as_object().and_then(|o| o.get(name)) {
                    plan.push(PlannedApp {
                        child: index,
                        segment: Some(name.clone()),
                        path: child.path.clone(),
                        graph: target_graph(&child.target),
                        value: PlanValue::Borrowed(value),
                    });
                }
            }
            Binding::PatternProperty(regex) => {
                if let Some(object) = instance.as_object() {
                    for (name, value) in object {
                        if regex.is_match(name) {
                            plan.push(PlannedApp {
                                child: index,
                                segment: Some(name.clone()),
                                path: child.path.clone(),
                                graph: target_graph(&child.target),
                                value: PlanValue::Borrowed(value),
                            });
                        }
                    }
                }
            }
            Binding::UncoveredProperties => {
                if let Some(object) = instance.as_object() {
                    let covered = sibling_property_annotations(
                        siblings,
                        &["properties", "patternProperties"],
                    );
                    for (name, value) in object {
                        if !covered.contains(name.as_str()) {
                            plan.push(PlannedApp {
                                child: index,
                                segment: Some(name.clone()),
                                path: child.path.clone(),
                                graph: target_graph(&child.target),
                                value: PlanValue::Borrowed(value),
                            });
                        }
                    }
                }
            }
            Binding::PropertyNames => {
                if let Some(object) = instance.as_object() {
                    for name in object.keys() {
                        plan.push(PlannedApp {
                            child: index,
                            segment: Some(name.clone()),
                            path: child.path.clone(),
                            graph: target_graph(&child.target),
                            value: PlanValue::Owned(Value::String(name.clone())),
                        });
                    }
                }
            }
            Binding::PrefixItem(i) => {
                if let Some(value) = instance.as_array().and_then(|a| a.get(*i)) {
                    plan.push(PlannedApp {
                        child: index,
                        segment: Some(i.to_string()),
                        path: child.path.clone(),
                        graph: target_graph(&child.target),
                        value: PlanValue::Borrowed(value),
                    });
                }
            }
            Binding::ItemsFrom(start) => {
                if let Some(items) = instance.as_array() {
                    for (i, value) in items.iter().enumerate().skip(*start) {
                        plan.push(PlannedApp {
                            child: index,
                            segment: Some(i.to_string()),
                            path: child.path.clone(),
                            graph: target_graph(&child.target),
                            value: PlanValue::Borrowed(value),
                        });
                    }
                }
            }
            Binding::Elements => {
                if let Some(items) = instance.as_array() {
                    for (i, value) in items.iter().enumerate() {
                        plan.push(PlannedApp {
                            child: index,
                            segment: Some(i.to_string()),
                            path: child.path.clone(),
                            graph: target_graph(&child.target),
                            value: PlanValue::Borrowed(value),
                        });
                    }
                }
            }
            Binding::DependentSchema(key) => {
                if instance.as_object().is_some_and(|o| o.contains_key(key)) {
                    plan.push(PlannedApp {
                        child: index,
                        segment: None,
                        path: child.path.clone(),
                        graph: target_graph(&child.target),
                        value: PlanValue::Borrowed(instance),
                    });
                }
            }
            Binding::UnevaluatedProperties => {
                if let Some(object) = instance.as_object() {
                    let covered = evaluated_properties(siblings, instance_location);
                    for (name, value) in object {
                        if !covered.contains(name.as_str()) {
                            plan.push(PlannedApp {
                                child: index,
                                segment: Some(name.clone()),
                                path: child.path.clone(),
                                graph: target_graph(&child.target),
                                value: PlanValue::Borrowed(value),
                            });
                        }
                    }
                }
            }
            Binding::UnevaluatedItems => {
                if let Some(items) = instance.as_array() {
                    let coverage = evaluated_items(siblings, instance_location, items.len());
                    for (i, value) in items.iter().enumerate() {
                        if !coverage.contains(&i) {
                            plan.push(PlannedApp {
                                child: index,
                                segment: Some(i.to_string()),
                                path: child.path.clone(),
                                graph: target_graph(&child.target),
                                value: PlanValue::Borrowed(value),
                            });
                        }
                    }
                }
            }
        }
    }
    plan
}

const PROPERTY_ANNOTATIONS: &[&str] = &[
    "properties",
    "patternProperties",
    "additionalProperties",
    "unevaluatedProperties",
];

const ITEM_ANNOTATIONS: &[&str] = &[
    "prefixItems",
    "items",
    "additionalItems",
    "contains",
    "unevaluatedItems",
];

/// Property names claimed by direct sibling annotations
fn sibling_property_annotations(siblings: &[KeywordOutcome], keywords: &[&str]) -> HashSet<String> {
    let mut covered = HashSet::new();
    for outcome in siblings {
        if outcome.skipped || !keywords.contains(&outcome.keyword.as_str()) {
            continue;
        }
        collect_property_names(outcome.annotation.as_ref(), &mut covered);
    }
    covered
}

fn collect_property_names(annotation: Option<&Value>, covered: &mut HashSet<String>) {
    if let Some(Value::Array(names)) = annotation {
        for name in names {
            if let Some(name) = name.as_str() {
                covered.insert(name.to_string());
            }
        }
    }
}

/// Property names evaluated by any successful sibling application at the
/// same instance location, including those nested under in-place applicators
fn evaluated_properties(siblings: &[KeywordOutcome], location: &Pointer) -> HashSet<String> {
    let mut covered = HashSet::new();
    for outcome in siblings {
        if outcome.skipped {
            continue;
        }
        if PROPERTY_ANNOTATIONS.contains(&outcome.keyword.as_str()) {
            collect_property_names(outcome.annotation.as_ref(), &mut covered);
        }
        for detail in &outcome.details {
            collect_nested(detail, location, &mut |annotations| {
                for keyword in PROPERTY_ANNOTATIONS {
                    collect_property_names(annotations.get(*keyword), &mut covered);
                }
            });
        }
    }
    covered
}

/// Item indexes evaluated by any successful sibling application at the same
/// instance location
fn evaluated_items(siblings: &[KeywordOutcome], location: &Pointer, len: usize) -> HashSet<usize> {
    let mut covered = HashSet::new();
    let mut absorb = |keyword: &str, annotation: &Value| match annotation {
        // `items`-family annotations: true means every element was covered,
        // a number is the greatest index covered.
        Value::Bool(true) => covered.extend(0..len),
        Value::Number(n) => {
            if let Some(max) = n.as_u64() {
                covered.extend(0..(max as usize + 1).min(len));
            }
        }
        // contains reports the matched indexes individually.
        Value::Array(indexes) if keyword == "contains" => {
            for index in indexes {
                if let Some(i) = index.as_u64() {
                    covered.insert(i as usize);
                }
            }
        }
        _ => {}
    };
    for outcome in siblings {
        if outcome.skipped {
            continue;
        }
        if ITEM_ANNOTATIONS.contains(&outcome.keyword.as_str()) {
            if let Some(annotation) = &outcome.annotation {
                absorb(&outcome.keyword, annotation);
            }
        }
        for detail in &outcome.details {
            collect_nested(detail, location, &mut |annotations| {
                for keyword in ITEM_ANNOTATIONS {
                    if let Some(annotation) = annotations.get(*keyword) {
                        absorb(keyword, annotation);
                    }
                }
            });
        }
    }
    covered
}

/// Visit annotation maps of successful nested results at `location`
fn collect_nested(
    results: &EvaluationResults,
    location: &Pointer,
    visit: &mut impl FnMut(&indexmap::IndexMap<String, Value>),
) {
    if !results.valid {
        return;
    }
    if results.instance_location == *location {
        visit(&results.annotations);
        for detail in &results.details {
            collect_nested(detail, location, visit);
        }
    }
}
