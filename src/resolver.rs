//! Schema resource store and reference resolution
//!
//! The store is the registry collaborator: callers populate it with every
//! schema resource reachable via `$ref` before compiling. Adding a document
//! walks it once, splitting embedded resources at `$id` boundaries and
//! indexing `$anchor`/`$dynamicAnchor`/`$recursiveAnchor` declarations per
//! resource. Resolution is a pure in-memory lookup; no network fetching.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{CompileError, Result};
use crate::pointer::Pointer;

/// One schema resource: a document or an embedded `$id` subtree
#[derive(Debug, Clone)]
pub struct StoredResource {
    /// Absolute base URI, fragmentless
    pub base: String,
    /// The resource's raw schema value
    pub raw: Value,
    /// `$anchor` (and `$dynamicAnchor`) plain names → location in resource
    pub anchors: HashMap<String, Pointer>,
    /// `$dynamicAnchor` names → location; `$recursiveAnchor: true` registers
    /// the empty name
    pub dynamic_anchors: HashMap<String, Pointer>,
    /// `$schema` declared at the resource root
    pub dialect: Option<String>,
}

/// In-memory schema resource registry
#[derive(Debug, Clone, Default)]
pub struct SchemaStore {
    resources: HashMap<String, Arc<StoredResource>>,
}

/// A reference fragment, split from the joined URI
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    None,
    Pointer(Pointer),
    Anchor(String),
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document whose root declares `$id`
    ///
    /// Returns the root resource's base URI.
    pub fn add(&mut self, raw: &Value) -> Result<String> {
        let id = raw
            .get("$id")
            .and_then(Value::as_str)
            .ok_or_else(|| CompileError::ReferenceResolution {
                reference: String::new(),
                location: Pointer::root(),
                reason: "document root has no $id; use add_with_base".to_string(),
            })?;
        let base = parse_base(id, &Pointer::root())?;
        self.add_with_base(raw, &base)?;
        Ok(strip_fragment(&base))
    }

    /// Add a document under an explicit base URI
    ///
    /// A root `$id` still takes precedence, resolved against `base`.
    pub fn add_with_base(&mut self, raw: &Value, base: &Url) -> Result<String> {
        let mut walker = ResourceWalker {
            store: self,
            pending: Vec::new(),
        };
        walker.walk_root(raw, base)
    }

    /// Look up a resource by fragmentless base URI
    pub fn lookup(&self, base: &str) -> Option<Arc<StoredResource>> {
        self.resources.get(base).cloned()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn insert(&mut self, resource: StoredResource) {
        debug!(base = %resource.base, anchors = resource.anchors.len(), "registered schema resource");
        self.resources
            .insert(resource.base.clone(), Arc::new(resource));
    }
}

/// Join a reference against a base URI and split the fragment
pub fn join_reference(
    scope_base: &str,
    reference: &str,
    location: &Pointer,
) -> Result<(String, Fragment)> {
    let base = Url::parse(scope_base).map_err(|e| CompileError::ReferenceResolution {
        reference: reference.to_string(),
        location: location.clone(),
        reason: format!("invalid base URI `{}`: {}", scope_base, e),
    })?;
    let joined = base
        .join(reference)
        .map_err(|e| CompileError::ReferenceResolution {
            reference: reference.to_string(),
            location: location.clone(),
            reason: e.to_string(),
        })?;
    let fragment = match joined.fragment() {
        None | Some("") => Fragment::None,
        Some(f) if f.starts_with('/') => {
            let pointer = Pointer::parse(f).ok_or_else(|| CompileError::ReferenceResolution {
                reference: reference.to_string(),
                location: location.clone(),
                reason: format!("malformed pointer fragment `{}`", f),
            })?;
            Fragment::Pointer(pointer)
        }
        Some(f) => Fragment::Anchor(f.to_string()),
    };
    let mut fragmentless = joined;
    fragmentless.set_fragment(None);
    Ok((fragmentless.to_string(), fragment))
}

/// Parse a `$id` into an absolute fragmentless base
pub fn parse_base(id: &str, location: &Pointer) -> Result<Url> {
    let mut url = Url::parse(id).map_err(|e| CompileError::ReferenceResolution {
        reference: id.to_string(),
        location: location.clone(),
        reason: format!("$id must be an absolute URI: {}", e),
    })?;
    url.set_fragment(None);
    Ok(url)
}

fn strip_fragment(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

struct ResourceWalker<'s> {
    store: &'s mut SchemaStore,
    pending: Vec<StoredResource>,
}

impl ResourceWalker<'_> {
    fn walk_root(&mut self, raw: &Value, base: &Url) -> Result<String> {
        let root_base = match raw.get("$id").and_then(Value::as_str) {
            Some(id) => base.join(id).map_err(|e| CompileError::ReferenceResolution {
                reference: id.to_string(),
                location: Pointer::root(),
                reason: e.to_string(),
            })?,
            None => base.clone(),
        };
        let root_base = strip_fragment(&root_base);
        self.open_resource(raw, root_base.clone())?;
        Ok(root_base)
    }

    fn open_resource(&mut self, raw: &Value, base: String) -> Result<()> {
        let dialect = raw
            .get("$schema")
            .and_then(Value::as_str)
            .map(str::to_owned);
        self.pending.push(StoredResource {
            base,
            raw: raw.clone(),
            anchors: HashMap::new(),
            dynamic_anchors: HashMap::new(),
            dialect,
        });
        self.scan(raw, &Pointer::root(), true)?;
        if let Some(resource) = self.pending.pop() {
            self.store.insert(resource);
        }
        Ok(())
    }

    fn scan(&mut self, value: &Value, pointer: &Pointer, at_resource_root: bool) -> Result<()> {
        let Some(map) = value.as_object() else {
            return Ok(());
        };

        // A nested $id opens a new resource; the subtree is indexed under its
        // own base and not scanned into the enclosing resource.
        if !at_resource_root {
            if let Some(id) = map.get("$id").and_then(Value::as_str) {
                let current = self
                    .pending
                    .last()
                    .map(|r| r.base.clone())
                    .unwrap_or_default();
                let base = Url::parse(&current)
                    .and_then(|b| b.join(id))
                    .map_err(|e| CompileError::ReferenceResolution {
                        reference: id.to_string(),
                        location: pointer.clone(),
                        reason: e.to_string(),
                    })?;
                return self.open_resource(value, strip_fragment(&base));
            }
        }

        if let Some(resource) = self.pending.last_mut() {
            if let Some(anchor) = map.get("$anchor").and_then(Value::as_str) {
                resource.anchors.insert(anchor.to_string(), pointer.clone());
            }
            if let Some(anchor) = map.get("$dynamicAnchor").and_then(Value::as_str) {
                resource.anchors.insert(anchor.to_string(), pointer.clone());
                resource
                    .dynamic_anchors
                    .insert(anchor.to_string(), pointer.clone());
            }
            if map.get("$recursiveAnchor").and_then(Value::as_bool) == Some(true) {
                resource
                    .dynamic_anchors
                    .insert(String::new(), pointer.clone());
            }
        }

        for (keyword, child) in map {
            match keyword.as_str() {
                // map of subschemas
                "properties" | "patternProperties" | "dependentSchemas" | "$defs"
                | "definitions" => {
                    if let Some(children) = child.as_object() {
                        for (name, sub) in children {
                            self.scan(sub, &pointer.push(keyword).push(name), false)?;
                        }
                    }
                }
                // list of subschemas
                "allOf" | "anyOf" | "oneOf" | "prefixItems" => {
                    if let Some(children) = child.as_array() {
                        for (i, sub) in children.iter().enumerate() {
                            self.scan(sub, &pointer.push(keyword).push_index(i), false)?;
                        }
                    }
                }
                // single subschema (items may also be a list in older drafts)
                "items" | "additionalItems" | "additionalProperties" | "unevaluatedItems"
                | "unevaluatedProperties" | "contains" | "propertyNames" | "not" | "if"
                | "then" | "else" | "contentSchema" => match child {
                    Value::Array(children) => {
                        for (i, sub) in children.iter().enumerate() {
                            self.scan(sub, &pointer.push(keyword).push_index(i), false)?;
                        }
                    }
                    _ => self.scan(child, &pointer.push(keyword), false)?,
                },
                // draft 7 dependencies: schema-valued entries only
                "dependencies" => {
                    if let Some(children) = child.as_object() {
                        for (name, sub) in children {
                            if sub.is_object() || sub.is_boolean() {
                                self.scan(sub, &pointer.push(keyword).push(name), false)?;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_requires_id() {
        let mut store = SchemaStore::new();
        assert!(store.add(&json!({"type": "object"})).is_err());
    }

    #[test]
    fn test_anchor_indexing() {
        let mut store = SchemaStore::new();
        let base = store
            .add(&json!({
                "$id": "https://example.com/root",
                "$defs": {
                    "a": {"$anchor": "first", "type": "string"},
                    "b": {"$dynamicAnchor": "second", "type": "number"}
                }
            }))
            .unwrap();
        let resource = store.lookup(&base).unwrap();
        assert_eq!(
            resource.anchors.get("first"),
            Some(&Pointer::parse("/$defs/a").unwrap())
        );
        // $dynamicAnchor doubles as a static anchor
        assert!(resource.anchors.contains_key("second"));
        assert!(resource.dynamic_anchors.contains_key("second"));
    }

    #[test]
    fn test_embedded_resource_split() {
        let mut store = SchemaStore::new();
        store
            .add(&json!({
                "$id": "https://example.com/outer",
                "$defs": {
                    "inner": {
                        "$id": "inner",
                        "$anchor": "here",
                        "type": "integer"
                    }
                }
            }))
            .unwrap();
        let inner = store.lookup("https://example.com/inner").unwrap();
        // Anchor belongs to the embedded resource, at its own root.
        assert_eq!(inner.anchors.get("here"), Some(&Pointer::root()));
        let outer = store.lookup("https://example.com/outer").unwrap();
        assert!(!outer.anchors.contains_key("here"));
    }

    #[test]
    fn test_join_reference_fragments() {
        let loc = Pointer::root();
        let (base, frag) =
            join_reference("https://example.com/s", "#/definitions/x", &loc).unwrap();
        assert_eq!(base, "https://example.com/s");
        assert_eq!(frag, Fragment::Pointer(Pointer::parse("/definitions/x").unwrap()));

        let (base, frag) = join_reference("https://example.com/a/b", "other#anchor", &loc).unwrap();
        assert_eq!(base, "https://example.com/a/other");
        assert_eq!(frag, Fragment::Anchor("anchor".to_string()));
    }
}
