//! Constraint builder
//!
//! Turns a schema document into a reusable, dependency-ordered constraint
//! graph. Graphs are immutable after construction and shared by reference
//! across concurrent evaluations; the engine caches them per
//! (content checksum, dialect) pair.
//!
//! Reference targets compile into shared slots: a slot created for an
//! in-progress graph is reused when a cycle returns to it, so recursive
//! schemas terminate at build time. A cycle that returns to an in-progress
//! graph purely through in-place applicators (references, `allOf` branches)
//! would never consume the instance and is rejected as a build error.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde_json::Value;
use tracing::debug;

use crate::checksum::Checksum;
use crate::dialect::{Dialect, DialectRegistry, Draft, UnknownKeywordPolicy, DRAFT_2020_12_ID};
use crate::error::{CompileError, EvaluateError, Result};
use crate::eval::{self, EvaluationOptions};
use crate::keyword::{ChildConstraint, Constraint, GraphTarget, KeywordCatalog};
use crate::node::{ObjectSchema, SchemaNode};
use crate::pointer::Pointer;
use crate::report::{EvaluationResults, OutputFormat};
use crate::resolver::{join_reference, Fragment, SchemaStore, StoredResource};

/// A shareable, late-filled handle to a constraint graph
///
/// Reference targets point at slots rather than graphs directly so that
/// cyclic references can share a graph that is still under construction.
/// Every slot is filled before compilation returns.
#[derive(Clone)]
pub struct GraphSlot(Arc<OnceLock<Arc<ConstraintGraph>>>);

impl GraphSlot {
    fn new() -> Self {
        Self(Arc::new(OnceLock::new()))
    }

    fn filled(graph: Arc<ConstraintGraph>) -> Self {
        let slot = Self::new();
        slot.fill(graph);
        slot
    }

    fn fill(&self, graph: Arc<ConstraintGraph>) {
        let _ = self.0.set(graph);
    }

    /// The compiled graph. Slots are filled before compilation completes;
    /// an empty slot here is an engine defect, not a validation outcome.
    pub fn get(&self) -> Arc<ConstraintGraph> {
        self.0
            .get()
            .cloned()
            .expect("constraint graph slot filled during compilation")
    }
}

/// Per-resource anchor table, shared by every graph in the resource
///
/// Dynamic anchors are written while the resource compiles and only read
/// afterwards, from any number of concurrent evaluations.
pub struct ResourceAnchors {
    base: String,
    synthetic: bool,
    dynamic: RwLock<HashMap<String, GraphSlot>>,
}

impl ResourceAnchors {
    fn new(base: String, synthetic: bool) -> Self {
        Self {
            base,
            synthetic,
            dynamic: RwLock::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn register_dynamic(&self, name: &str, slot: GraphSlot) {
        self.dynamic.write().entry(name.to_string()).or_insert(slot);
    }

    pub(crate) fn dynamic_slot(&self, name: &str) -> Option<GraphSlot> {
        self.dynamic.read().get(name).cloned()
    }
}

/// The compiled form of one schema node
pub struct ConstraintGraph {
    kind: GraphKind,
    pointer: Pointer,
    resource: Arc<ResourceAnchors>,
    is_resource_root: bool,
}

pub(crate) enum GraphKind {
    Boolean(bool),
    Object(Vec<ConstraintNode>),
}

/// One keyword's compiled constraint, in dependency order
pub struct ConstraintNode {
    pub keyword: String,
    pub children: Vec<ChildConstraint>,
    pub eval: crate::eval::EvalFn,
}

impl ConstraintGraph {
    pub(crate) fn kind(&self) -> &GraphKind {
        &self.kind
    }

    pub(crate) fn resource(&self) -> &Arc<ResourceAnchors> {
        &self.resource
    }

    pub(crate) fn is_resource_root(&self) -> bool {
        self.is_resource_root
    }

    /// `base#pointer` for resources with an explicit base URI
    pub fn absolute_location(&self) -> Option<String> {
        if self.resource.synthetic {
            None
        } else {
            Some(format!("{}#{}", self.resource.base, self.pointer))
        }
    }
}

/// Checker for one `format` name; the external-collaborator boundary
pub type FormatChecker = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Compilation and evaluation engine
///
/// Owns the keyword catalog, dialect registry, schema store, and the
/// compiled-schema cache. All configuration happens before compiling;
/// `compile` and everything downstream take `&self`.
pub struct Engine {
    catalog: Arc<KeywordCatalog>,
    dialects: DialectRegistry,
    store: SchemaStore,
    formats: HashMap<String, FormatChecker>,
    assert_formats: bool,
    default_dialect: String,
    cache: RwLock<HashMap<(String, String), Arc<CompiledSchema>>>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(KeywordCatalog::standard()),
            dialects: DialectRegistry::standard(),
            store: SchemaStore::new(),
            formats: HashMap::new(),
            assert_formats: false,
            default_dialect: DRAFT_2020_12_ID.to_string(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Use a custom keyword catalog
    pub fn with_catalog(catalog: KeywordCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            ..Self::new()
        }
    }

    /// Dialect assumed when a schema declares no `$schema`
    pub fn set_default_dialect(&mut self, id: impl Into<String>) {
        self.default_dialect = id.into();
    }

    /// Register a custom dialect
    pub fn register_dialect(&mut self, dialect: Dialect) {
        self.dialects.register(dialect);
    }

    /// Add a resolvable schema resource (root must declare `$id`)
    pub fn add_resource(&mut self, raw: &Value) -> Result<String> {
        self.store.add(raw)
    }

    /// Register a checker for a `format` name
    pub fn register_format(&mut self, name: impl Into<String>, checker: FormatChecker) {
        self.formats.insert(name.into(), checker);
    }

    /// Turn `format` from an annotation into an assertion where a checker
    /// is registered
    pub fn set_assert_formats(&mut self, assert: bool) {
        self.assert_formats = assert;
    }

    /// Compile a schema document into a shareable constraint graph
    pub fn compile(&self, raw: &Value) -> Result<Arc<CompiledSchema>> {
        let checksum = Checksum::from_json(raw);
        let declared = raw.get("$schema").and_then(Value::as_str);
        let dialect_id = declared.unwrap_or(&self.default_dialect);
        let dialect = self
            .dialects
            .get(dialect_id)
            .ok_or_else(|| CompileError::UnknownDialect(dialect_id.to_string()))?
            .clone();

        let cache_key = (checksum.as_str().to_string(), dialect.id.clone());
        if let Some(compiled) = self.cache.read().get(&cache_key) {
            return Ok(compiled.clone());
        }

        debug!(checksum = checksum.short(), dialect = %dialect.id, "compiling schema");

        let synthetic_base = format!("https://inline.invalid/{}", checksum.short());
        let synthetic = !matches!(raw.get("$id"), Some(Value::String(_)));
        let mut overlay = SchemaStore::new();
        let base_url = crate::resolver::parse_base(&synthetic_base, &Pointer::root())?;
        let root_base = overlay.add_with_base(raw, &base_url)?;

        let mut builder = Builder {
            engine: self,
            overlay,
            slots: HashMap::new(),
            resources: HashMap::new(),
            synthetic_base: if synthetic { Some(root_base.clone()) } else { None },
        };
        let mut chain = Vec::new();
        let slot = builder.graph_for(&root_base, &Pointer::root(), &dialect, &mut chain, None)?;

        let compiled = Arc::new(CompiledSchema {
            root: slot.get(),
            checksum,
            dialect_id: dialect.id.clone(),
        });
        self.cache.write().insert(cache_key, compiled.clone());
        Ok(compiled)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled schema, safe to share across threads and evaluations
pub struct CompiledSchema {
    root: Arc<ConstraintGraph>,
    checksum: Checksum,
    dialect_id: String,
}

impl CompiledSchema {
    /// Evaluate an instance against this schema
    ///
    /// Invalid instances are reported in the results, not as an `Err`;
    /// `EvaluateError` covers cancellation and depth exhaustion only.
    pub fn evaluate(
        &self,
        instance: &Value,
        options: &EvaluationOptions,
    ) -> std::result::Result<EvaluationResults, EvaluateError> {
        eval::evaluate_root(&self.root, instance, options)
    }

    /// Pass/fail convenience using the flag output format
    pub fn is_valid(&self, instance: &Value) -> bool {
        let options = EvaluationOptions {
            format: OutputFormat::Flag,
            ..EvaluationOptions::default()
        };
        self.evaluate(instance, &options)
            .map(|r| r.flag())
            .unwrap_or(false)
    }

    pub fn dialect(&self) -> &str {
        &self.dialect_id
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }
}

type SlotKey = (String, String, String);

struct Builder<'e> {
    engine: &'e Engine,
    overlay: SchemaStore,
    slots: HashMap<SlotKey, GraphSlot>,
    resources: HashMap<String, Arc<ResourceAnchors>>,
    synthetic_base: Option<String>,
}

/// A located schema target: effective resource base and pointer within it
struct Location {
    base: String,
    pointer: Pointer,
    raw: Value,
    resource: Arc<StoredResource>,
}

impl<'e> Builder<'e> {
    fn lookup(&self, base: &str) -> Option<Arc<StoredResource>> {
        self.overlay
            .lookup(base)
            .or_else(|| self.engine.store.lookup(base))
    }

    fn anchors_for(&mut self, base: &str) -> Arc<ResourceAnchors> {
        if let Some(existing) = self.resources.get(base) {
            return existing.clone();
        }
        let synthetic = self.synthetic_base.as_deref() == Some(base);
        let anchors = Arc::new(ResourceAnchors::new(base.to_string(), synthetic));
        self.resources.insert(base.to_string(), anchors.clone());
        anchors
    }

    /// Resolve (base, pointer) to its effective resource, accounting for
    /// embedded `$id` boundaries the pointer crosses
    fn locate(
        &self,
        base: &str,
        pointer: &Pointer,
        reference: &str,
        ref_location: &Pointer,
    ) -> Result<Location> {
        let resource = self
            .lookup(base)
            .ok_or_else(|| CompileError::ReferenceResolution {
                reference: reference.to_string(),
                location: ref_location.clone(),
                reason: format!("unknown schema resource `{}`", base),
            })?;

        let raw_root = resource.raw.clone();
        let mut effective_base = base.to_string();
        let mut effective_resource = resource;
        let mut effective_pointer = Pointer::root();
        let mut current: &Value = &raw_root;
        for token in pointer.tokens() {
            current = match current {
                Value::Object(map) => {
                    map.get(token)
                        .ok_or_else(|| CompileError::ReferenceResolution {
                            reference: reference.to_string(),
                            location: ref_location.clone(),
                            reason: format!("pointer token `{}` not found", token),
                        })?
                }
                Value::Array(items) => token
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i))
                    .ok_or_else(|| CompileError::ReferenceResolution {
                        reference: reference.to_string(),
                        location: ref_location.clone(),
                        reason: format!("pointer token `{}` out of bounds", token),
                    })?,
                _ => {
                    return Err(CompileError::ReferenceResolution {
                        reference: reference.to_string(),
                        location: ref_location.clone(),
                        reason: format!("pointer token `{}` applied to a scalar", token),
                    })
                }
            };
            // Crossing into an embedded resource re-bases the remainder.
            if let Some(id) = current.get("$id").and_then(Value::as_str) {
                let joined = url::Url::parse(&effective_base)
                    .and_then(|b| b.join(id))
                    .map_err(|e| CompileError::ReferenceResolution {
                        reference: reference.to_string(),
                        location: ref_location.clone(),
                        reason: e.to_string(),
                    })?;
                let mut fragmentless = joined;
                fragmentless.set_fragment(None);
                effective_base = fragmentless.to_string();
                effective_resource =
                    self.lookup(&effective_base)
                        .ok_or_else(|| CompileError::ReferenceResolution {
                            reference: reference.to_string(),
                            location: ref_location.clone(),
                            reason: format!("unknown embedded resource `{}`", effective_base),
                        })?;
                effective_pointer = Pointer::root();
                continue;
            }
            effective_pointer = effective_pointer.push(token.clone());
        }

        Ok(Location {
            base: effective_base,
            pointer: effective_pointer,
            raw: current.clone(),
            resource: effective_resource,
        })
    }

    /// Graph for a (base, pointer) target, through the per-build slot cache
    ///
    /// `chain` tracks targets under construction along the current in-place
    /// path; revisiting one means the schema expands without consuming the
    /// instance.
    fn graph_for(
        &mut self,
        base: &str,
        pointer: &Pointer,
        dialect: &Dialect,
        chain: &mut Vec<SlotKey>,
        reference: Option<(&str, &Pointer)>,
    ) -> Result<GraphSlot> {
        let (ref_str, ref_loc) = match reference {
            Some((r, l)) => (r.to_string(), l.clone()),
            None => (String::new(), Pointer::root()),
        };
        let location = self.locate(base, pointer, &ref_str, &ref_loc)?;

        // The target resource may pin its own dialect.
        let dialect = match &location.resource.dialect {
            Some(id) => self
                .engine
                .dialects
                .get(id)
                .ok_or_else(|| CompileError::UnknownDialect(id.clone()))?
                .clone(),
            None => dialect.clone(),
        };

        let key = (
            location.base.clone(),
            location.pointer.to_string(),
            dialect.id.clone(),
        );
        if chain.contains(&key) {
            return Err(CompileError::InfiniteExpansion {
                reference: ref_str,
                location: ref_loc,
            });
        }
        if let Some(slot) = self.slots.get(&key) {
            return Ok(slot.clone());
        }

        debug!(base = %location.base, pointer = %location.pointer, "building constraint graph");
        let slot = GraphSlot::new();
        self.slots.insert(key.clone(), slot.clone());
        chain.push(key);
        let anchors = self.anchors_for(&location.base);
        let built = self.build_graph(
            &location.raw,
            &location.base,
            &location.pointer,
            &anchors,
            &dialect,
            chain,
        );
        chain.pop();
        let graph = built?;
        slot.fill(graph);

        // Make dynamic anchors on otherwise-unreferenced subschemas of this
        // resource resolvable before evaluation begins.
        if location.pointer.is_root() {
            let targets: Vec<Pointer> = location
                .resource
                .dynamic_anchors
                .values()
                .filter(|p| !p.is_root())
                .cloned()
                .collect();
            for target in targets {
                let mut fresh = Vec::new();
                self.graph_for(&location.base, &target, &dialect, &mut fresh, None)?;
            }
        }

        Ok(slot)
    }

    fn build_graph(
        &mut self,
        raw: &Value,
        base: &str,
        pointer: &Pointer,
        anchors: &Arc<ResourceAnchors>,
        dialect: &Dialect,
        chain: &mut Vec<SlotKey>,
    ) -> Result<Arc<ConstraintGraph>> {
        let node = SchemaNode::parse(raw, pointer)?;
        let graph = match &node {
            SchemaNode::Bool(b) => Arc::new(ConstraintGraph {
                kind: GraphKind::Boolean(*b),
                pointer: pointer.clone(),
                resource: anchors.clone(),
                is_resource_root: pointer.is_root(),
            }),
            SchemaNode::Object(obj) => {
                let constraints =
                    self.build_constraints(obj, base, pointer, anchors, dialect, chain)?;
                Arc::new(ConstraintGraph {
                    kind: GraphKind::Object(constraints),
                    pointer: pointer.clone(),
                    resource: anchors.clone(),
                    is_resource_root: pointer.is_root(),
                })
            }
        };

        if let Some(obj) = node.as_object() {
            if let Some(anchor) = &obj.dynamic_anchor {
                anchors.register_dynamic(anchor, GraphSlot::filled(graph.clone()));
            }
            if obj.recursive_anchor {
                anchors.register_dynamic("", GraphSlot::filled(graph.clone()));
            }
        }
        Ok(graph)
    }

    fn build_constraints(
        &mut self,
        obj: &ObjectSchema,
        base: &str,
        pointer: &Pointer,
        anchors: &Arc<ResourceAnchors>,
        dialect: &Dialect,
        chain: &mut Vec<SlotKey>,
    ) -> Result<Vec<ConstraintNode>> {
        struct Pending {
            order: usize,
            name: String,
            depends_on: &'static [&'static str],
            constraint: Constraint,
        }

        let mut pending: Vec<Pending> = Vec::new();
        let catalog_len = self.engine.catalog.len();
        let catalog = self.engine.catalog.clone();

        for (decl_index, (name, raw)) in obj.keywords.iter().enumerate() {
            match catalog.descriptor_for(name, dialect) {
                Some((descriptor, order)) => {
                    let mut ctx = BuildContext {
                        builder: &mut *self,
                        node: obj,
                        base,
                        pointer,
                        anchors,
                        dialect,
                        chain: &mut *chain,
                        keyword: descriptor.name,
                    };
                    if let Some(constraint) = (descriptor.build)(&mut ctx, raw)? {
                        pending.push(Pending {
                            order,
                            name: name.clone(),
                            depends_on: descriptor.depends_on,
                            constraint,
                        });
                    }
                }
                None => match dialect.unknown_keywords {
                    UnknownKeywordPolicy::Error => {
                        return Err(CompileError::UnknownKeyword {
                            keyword: name.clone(),
                            location: pointer.clone(),
                        })
                    }
                    UnknownKeywordPolicy::Annotate => pending.push(Pending {
                        order: catalog_len + decl_index,
                        name: name.clone(),
                        depends_on: &[],
                        constraint: Constraint::simple_annotation(raw.clone()),
                    }),
                    UnknownKeywordPolicy::Ignore => {}
                },
            }
        }

        // Dependency-respecting order: declared dependencies become edges,
        // ties resolved by catalog registration order.
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let indices: Vec<NodeIndex> = (0..pending.len()).map(|i| graph.add_node(i)).collect();
        let by_name: HashMap<&str, usize> = pending
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();
        for (i, entry) in pending.iter().enumerate() {
            for dep in entry.depends_on {
                if let Some(&j) = by_name.get(dep) {
                    graph.add_edge(indices[j], indices[i], ());
                }
            }
        }

        let mut in_degree: Vec<usize> = indices
            .iter()
            .map(|&ix| graph.neighbors_directed(ix, Direction::Incoming).count())
            .collect();
        let mut placed = vec![false; pending.len()];
        let mut order = Vec::with_capacity(pending.len());
        while order.len() < pending.len() {
            let next = (0..pending.len())
                .filter(|&i| !placed[i] && in_degree[i] == 0)
                .min_by_key(|&i| pending[i].order);
            let Some(next) = next else {
                let cycle: Vec<String> = (0..pending.len())
                    .filter(|&i| !placed[i])
                    .map(|i| pending[i].name.clone())
                    .collect();
                return Err(CompileError::DependencyCycle { keywords: cycle });
            };
            placed[next] = true;
            for succ in graph.neighbors_directed(indices[next], Direction::Outgoing) {
                in_degree[graph[succ]] -= 1;
            }
            order.push(next);
        }

        // Consume in topological order without disturbing indices.
        let mut slots: Vec<Option<Pending>> = pending.into_iter().map(Some).collect();
        let mut constraints = Vec::with_capacity(order.len());
        for i in order {
            let Some(entry) = slots[i].take() else { continue };
            constraints.push(ConstraintNode {
                keyword: entry.name,
                children: entry.constraint.children,
                eval: entry.constraint.eval,
            });
        }
        Ok(constraints)
    }
}

/// Build-time context handed to keyword build functions
pub struct BuildContext<'b, 'e> {
    builder: &'b mut Builder<'e>,
    node: &'b ObjectSchema,
    base: &'b str,
    pointer: &'b Pointer,
    anchors: &'b Arc<ResourceAnchors>,
    dialect: &'b Dialect,
    chain: &'b mut Vec<SlotKey>,
    keyword: &'static str,
}

impl BuildContext<'_, '_> {
    /// Raw value of a sibling keyword on the same schema node
    pub fn peer(&self, name: &str) -> Option<&Value> {
        self.node.keywords.get(name)
    }

    /// Location of the owning schema node within its resource
    pub fn location(&self) -> Pointer {
        self.pointer.clone()
    }

    /// Location of the current keyword
    pub fn keyword_location(&self) -> Pointer {
        self.pointer.push(self.keyword)
    }

    pub fn draft(&self) -> Draft {
        self.dialect.draft
    }

    /// A syntax error attributed to the current keyword
    pub fn syntax(&self, reason: impl Into<String>) -> CompileError {
        CompileError::syntax(self.keyword, self.keyword_location(), reason)
    }

    pub fn format_checker(&self, name: &str) -> Option<FormatChecker> {
        self.builder.engine.formats.get(name).cloned()
    }

    pub fn formats_asserted(&self) -> bool {
        self.builder.engine.assert_formats
    }

    /// Build an inline subschema owned by the current keyword
    ///
    /// `rel` is the schema-relative path under the owning node (keyword name
    /// first). `advances_instance` states whether applications of this child
    /// move to a different instance location; in-place children keep the
    /// current expansion chain so degenerate reference cycles are caught.
    pub fn subschema(
        &mut self,
        raw: &Value,
        rel: &[&str],
        advances_instance: bool,
    ) -> Result<GraphTarget> {
        // A child that opens its own resource compiles through the slot
        // cache under its own base.
        if let Some(id) = raw.get("$id").and_then(Value::as_str) {
            let joined = url::Url::parse(self.base)
                .and_then(|b| b.join(id))
                .map_err(|e| self.syntax(format!("invalid $id `{}`: {}", id, e)))?;
            let mut fragmentless = joined;
            fragmentless.set_fragment(None);
            let base = fragmentless.to_string();
            let slot = if advances_instance {
                let mut fresh = Vec::new();
                self.builder
                    .graph_for(&base, &Pointer::root(), self.dialect, &mut fresh, None)?
            } else {
                self.builder
                    .graph_for(&base, &Pointer::root(), self.dialect, self.chain, None)?
            };
            return Ok(GraphTarget::Slot(slot));
        }

        let child_pointer = {
            let mut p = self.pointer.clone();
            for token in rel {
                p = p.push(*token);
            }
            p
        };
        let graph = if advances_instance {
            let mut fresh = Vec::new();
            self.builder.build_graph(
                raw,
                self.base,
                &child_pointer,
                self.anchors,
                self.dialect,
                &mut fresh,
            )?
        } else {
            self.builder.build_graph(
                raw,
                self.base,
                &child_pointer,
                self.anchors,
                self.dialect,
                self.chain,
            )?
        };
        Ok(GraphTarget::Inline(graph))
    }

    /// Resolve a static reference to a shared graph slot
    pub fn static_ref(&mut self, reference: &str) -> Result<GraphTarget> {
        let (slot, _) = self.resolve_reference(reference)?;
        Ok(GraphTarget::Slot(slot))
    }

    /// Resolve `$dynamicRef`: static fallback slot plus the anchor name to
    /// search the dynamic scope for, when the static target declares a
    /// matching `$dynamicAnchor`
    pub fn dynamic_ref(&mut self, reference: &str) -> Result<(GraphTarget, Option<String>)> {
        let (slot, anchor) = self.resolve_reference(reference)?;
        Ok((GraphTarget::Slot(slot), anchor))
    }

    /// Resolve 2019-09 `$recursiveRef` (always `#`)
    pub fn recursive_ref(&mut self) -> Result<(GraphTarget, Option<String>)> {
        let location = self.keyword_location();
        let slot = self.builder.graph_for(
            self.base,
            &Pointer::root(),
            self.dialect,
            self.chain,
            Some(("#", &location)),
        )?;
        let anchored = self
            .builder
            .lookup(self.base)
            .map(|r| r.dynamic_anchors.contains_key(""))
            .unwrap_or(false);
        Ok((
            GraphTarget::Slot(slot),
            anchored.then(String::new),
        ))
    }

    fn resolve_reference(&mut self, reference: &str) -> Result<(GraphSlot, Option<String>)> {
        let location = self.keyword_location();
        let (target_base, fragment) = join_reference(self.base, reference, &location)?;
        let resource =
            self.builder
                .lookup(&target_base)
                .ok_or_else(|| CompileError::ReferenceResolution {
                    reference: reference.to_string(),
                    location: location.clone(),
                    reason: format!("unknown schema resource `{}`", target_base),
                })?;
        let (pointer, anchor_name) = match fragment {
            Fragment::None => (Pointer::root(), None),
            Fragment::Pointer(p) => (p, None),
            Fragment::Anchor(name) => {
                let p = resource.anchors.get(&name).cloned().ok_or_else(|| {
                    CompileError::ReferenceResolution {
                        reference: reference.to_string(),
                        location: location.clone(),
                        reason: format!("anchor `{}` not found in `{}`", name, target_base),
                    }
                })?;
                (p, Some(name))
            }
        };
        // Dynamic behavior applies only when the statically resolved target
        // itself declares a matching $dynamicAnchor.
        let dynamic = anchor_name.filter(|name| {
            resource
                .dynamic_anchors
                .get(name)
                .is_some_and(|p| *p == pointer)
        });
        let slot = self.builder.graph_for(
            &target_base,
            &pointer,
            self.dialect,
            self.chain,
            Some((reference, &location)),
        )?;
        Ok((slot, dynamic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_cache_reuse() {
        let engine = Engine::new();
        let schema = json!({"type": "object"});
        let first = engine.compile(&schema).unwrap();
        let second = engine.compile(&schema).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_dialect() {
        let engine = Engine::new();
        let schema = json!({"$schema": "https://example.com/no-such-dialect"});
        match engine.compile(&schema) {
            Err(CompileError::UnknownDialect(id)) => {
                assert_eq!(id, "https://example.com/no-such-dialect")
            }
            other => panic!("expected UnknownDialect, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_malformed_keyword_names_location() {
        let engine = Engine::new();
        let schema = json!({"properties": {"a": {"type": 12}}});
        match engine.compile(&schema) {
            Err(CompileError::SchemaSyntax { keyword, location, .. }) => {
                assert_eq!(keyword, "type");
                assert_eq!(location.to_string(), "/properties/a/type");
            }
            other => panic!("expected SchemaSyntax, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_in_place_reference_cycle_rejected() {
        let engine = Engine::new();
        for schema in [
            json!({"$ref": "#"}),
            json!({"allOf": [{"$ref": "#"}]}),
            json!({
                "$ref": "#/$defs/a",
                "$defs": {
                    "a": {"$ref": "#/$defs/b"},
                    "b": {"$ref": "#/$defs/a"}
                }
            }),
        ] {
            match engine.compile(&schema) {
                Err(CompileError::InfiniteExpansion { .. }) => {}
                other => panic!(
                    "expected InfiniteExpansion for {}, got {:?}",
                    schema,
                    other.err()
                ),
            }
        }
    }

    #[test]
    fn test_recursion_through_properties_compiles() {
        let engine = Engine::new();
        let schema = json!({
            "$ref": "#/$defs/node",
            "$defs": {
                "node": {
                    "properties": {
                        "child": {"$ref": "#/$defs/node"},
                        "value": {"type": "integer"}
                    }
                }
            }
        });
        let compiled = engine.compile(&schema).unwrap();
        assert!(compiled.is_valid(&json!({"child": {"child": {"value": 3}}, "value": 1})));
        assert!(!compiled.is_valid(&json!({"child": {"value": "x"}})));
    }

    #[test]
    fn test_unresolvable_reference() {
        let engine = Engine::new();
        let schema = json!({"$ref": "https://example.com/nowhere"});
        match engine.compile(&schema) {
            Err(CompileError::ReferenceResolution { reference, .. }) => {
                assert_eq!(reference, "https://example.com/nowhere")
            }
            other => panic!("expected ReferenceResolution, got {:?}", other.err()),
        }
    }

    fn build_marker(
        _ctx: &mut BuildContext<'_, '_>,
        raw: &Value,
    ) -> Result<Option<Constraint>> {
        Ok(Some(Constraint::simple_annotation(raw.clone())))
    }

    #[test]
    fn test_keyword_dependency_cycle_is_build_error() {
        use crate::dialect::Vocabulary;
        use crate::keyword::KeywordDescriptor;

        let mut catalog = KeywordCatalog::standard();
        catalog.register(KeywordDescriptor {
            name: "x-first",
            vocabulary: Vocabulary::Validation,
            drafts: crate::keyword::ALL_DRAFTS,
            depends_on: &["x-second"],
            build: build_marker,
        });
        catalog.register(KeywordDescriptor {
            name: "x-second",
            vocabulary: Vocabulary::Validation,
            drafts: crate::keyword::ALL_DRAFTS,
            depends_on: &["x-first"],
            build: build_marker,
        });
        let engine = Engine::with_catalog(catalog);
        let schema = json!({"x-first": 1, "x-second": 2});
        match engine.compile(&schema) {
            Err(CompileError::DependencyCycle { keywords }) => {
                assert!(keywords.contains(&"x-first".to_string()));
                assert!(keywords.contains(&"x-second".to_string()));
            }
            other => panic!("expected DependencyCycle, got {:?}", other.err()),
        }
    }
}
