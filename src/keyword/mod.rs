//! Keyword catalog
//!
//! Each supported keyword registers a [`KeywordDescriptor`]: the vocabularies
//! and drafts it belongs to, the sibling keywords it depends on, and a build
//! function that parses the raw value and produces a [`Constraint`]. The
//! evaluator never inspects keyword names; adding a keyword means adding a
//! descriptor, not touching the evaluator.

pub mod annotation;
pub mod applicator;
pub mod core;
pub mod unevaluated;
pub mod validation;

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::compile::{BuildContext, GraphSlot};
use crate::dialect::{Dialect, Draft, Vocabulary};
use crate::error::Result;
use crate::eval::EvalFn;

pub(crate) const ALL_DRAFTS: &[Draft] = &[Draft::V7, Draft::V2019_09, Draft::V2020_12];
pub(crate) const MODERN_DRAFTS: &[Draft] = &[Draft::V2019_09, Draft::V2020_12];

/// Parses a raw keyword value and builds its constraint
///
/// `Ok(None)` means the keyword reserves a location but constrains nothing
/// (`$defs`, `$comment`).
pub type BuildFn = fn(&mut BuildContext<'_, '_>, &Value) -> Result<Option<Constraint>>;

/// Behavior descriptor for one keyword
pub struct KeywordDescriptor {
    pub name: &'static str,
    pub vocabulary: Vocabulary,
    /// Drafts in which this descriptor applies; a name may have different
    /// descriptors in disjoint draft sets (e.g. `items`)
    pub drafts: &'static [Draft],
    /// Sibling keywords whose evaluation must be terminal before this one runs
    pub depends_on: &'static [&'static str],
    pub build: BuildFn,
}

/// A built constraint: owned subschemas plus the evaluation closure
pub struct Constraint {
    pub children: Vec<ChildConstraint>,
    pub eval: EvalFn,
}

impl Constraint {
    /// A constraint with no subschemas
    pub fn leaf(eval: EvalFn) -> Self {
        Self {
            children: Vec::new(),
            eval,
        }
    }

    /// A constraint that unconditionally produces `value` as its annotation
    pub fn simple_annotation(value: Value) -> Self {
        Self::leaf(Arc::new(move |ev| ev.annotate(value.clone())))
    }
}

/// A subschema owned by a keyword
pub struct ChildConstraint {
    /// Schema-relative path tokens under the owning node, e.g.
    /// `["properties", "a"]`; appended to the evaluation path
    pub path: Vec<String>,
    /// How the evaluator maps this subschema onto instance values
    pub binding: Binding,
    pub target: GraphTarget,
}

/// Instance binding for a child constraint, resolved per evaluation
#[derive(Clone)]
pub enum Binding {
    /// Apply to the node's own instance (in-place applicators, `$ref`)
    Local,
    /// `$dynamicRef`/`$recursiveRef`: consult the dynamic scope for the
    /// outermost matching anchor, falling back to the static target
    DynamicRef { anchor: String },
    /// Apply to the named member, when present
    Property(String),
    /// Apply to every member whose name matches
    PatternProperty(Regex),
    /// Apply to members not claimed by `properties`/`patternProperties`
    UncoveredProperties,
    /// Apply to each member *name* as a string instance
    PropertyNames,
    /// Apply to the array element at a fixed index
    PrefixItem(usize),
    /// Apply to every array element from an index on
    ItemsFrom(usize),
    /// Apply to every array element (`contains`)
    Elements,
    /// Apply to the whole instance when the named member is present
    DependentSchema(String),
    /// Apply to members no successful sibling application evaluated
    UnevaluatedProperties,
    /// Apply to elements no successful sibling application evaluated
    UnevaluatedItems,
}

/// The compiled graph a child constraint points at
#[derive(Clone)]
pub enum GraphTarget {
    /// Built inline with the owning node
    Inline(Arc<crate::compile::ConstraintGraph>),
    /// Shared slot, used for reference targets (fillable cycle-safe)
    Slot(GraphSlot),
}

/// Process-wide keyword registry, read-only after construction
///
/// Registration order is the default evaluation order for keywords with no
/// declared dependencies.
pub struct KeywordCatalog {
    entries: Vec<KeywordDescriptor>,
    by_name: HashMap<&'static str, Vec<usize>>,
}

impl KeywordCatalog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// The full standard keyword set
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        core::register(&mut catalog);
        applicator::register(&mut catalog);
        validation::register(&mut catalog);
        unevaluated::register(&mut catalog);
        annotation::register(&mut catalog);
        catalog
    }

    pub fn register(&mut self, descriptor: KeywordDescriptor) {
        let index = self.entries.len();
        self.by_name.entry(descriptor.name).or_default().push(index);
        self.entries.push(descriptor);
    }

    /// The active descriptor for `name` under `dialect`, with its
    /// registration index
    ///
    /// When several registered descriptors match (vocabulary collisions), the
    /// dialect's vocabulary priority wins, then registration order.
    pub fn descriptor_for(&self, name: &str, dialect: &Dialect) -> Option<(&KeywordDescriptor, usize)> {
        let candidates = self.by_name.get(name)?;
        candidates
            .iter()
            .filter_map(|&i| {
                let d = &self.entries[i];
                if !d.drafts.contains(&dialect.draft) {
                    return None;
                }
                let priority = dialect.priority(d.vocabulary)?;
                Some((priority, i))
            })
            .min()
            .map(|(_, i)| (&self.entries[i], i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for KeywordCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_not_empty() {
        let catalog = KeywordCatalog::standard();
        assert!(catalog.len() > 40);
    }

    #[test]
    fn test_items_differs_by_draft() {
        let catalog = KeywordCatalog::standard();
        let modern = Dialect::draft2020_12();
        let legacy = Dialect::draft2019_09();
        let (modern_items, _) = catalog.descriptor_for("items", &modern).unwrap();
        let (legacy_items, _) = catalog.descriptor_for("items", &legacy).unwrap();
        assert!(modern_items.drafts.contains(&Draft::V2020_12));
        assert!(!legacy_items.drafts.contains(&Draft::V2020_12));
        assert!(legacy_items.drafts.contains(&Draft::V2019_09));
    }

    #[test]
    fn test_vocabulary_gating() {
        let catalog = KeywordCatalog::standard();
        let draft7 = Dialect::draft7();
        // unevaluatedProperties belongs to the Unevaluated vocabulary, which
        // draft 7 does not activate.
        assert!(catalog.descriptor_for("unevaluatedProperties", &draft7).is_none());
        assert!(catalog
            .descriptor_for("unevaluatedProperties", &Dialect::draft2020_12())
            .is_some());
    }

    #[test]
    fn test_dependencies_declared() {
        let catalog = KeywordCatalog::standard();
        let dialect = Dialect::draft2020_12();
        let (additional, _) = catalog.descriptor_for("additionalProperties", &dialect).unwrap();
        assert!(additional.depends_on.contains(&"properties"));
        let (then, _) = catalog.descriptor_for("then", &dialect).unwrap();
        assert_eq!(then.depends_on, &["if"]);
    }
}
