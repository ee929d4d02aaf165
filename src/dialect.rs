//! Dialect and vocabulary registry
//!
//! A dialect (a draft, or a custom meta-schema URI) activates an ordered set
//! of vocabularies; vocabularies enable subsets of the keyword catalog. The
//! registry is an explicit, caller-constructed object passed into the
//! compiler so strict and lenient configurations can coexist in one process.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Supported schema syntax families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Draft {
    V7,
    V2019_09,
    V2020_12,
}

/// The standard vocabulary groupings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vocabulary {
    Core,
    Applicator,
    Validation,
    Unevaluated,
    MetaData,
    FormatAnnotation,
    Content,
}

/// How a dialect treats keywords no active vocabulary recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKeywordPolicy {
    /// Compilation fails (strict dialects)
    Error,
    /// Collected as an annotation carrying the raw value (2019-09+)
    Annotate,
    /// Silently ignored (draft 7)
    Ignore,
}

/// A dialect: an identifier plus the vocabularies it activates
#[derive(Debug, Clone)]
pub struct Dialect {
    /// The `$schema` URI selecting this dialect
    pub id: String,
    /// Which syntax family the keyword catalog should use
    pub draft: Draft,
    /// Active vocabularies, in priority order for keyword collisions
    pub vocabularies: Vec<Vocabulary>,
    /// Treatment of unrecognized keywords
    pub unknown_keywords: UnknownKeywordPolicy,
}

pub const DRAFT_7_ID: &str = "http://json-schema.org/draft-07/schema";
pub const DRAFT_2019_09_ID: &str = "https://json-schema.org/draft/2019-09/schema";
pub const DRAFT_2020_12_ID: &str = "https://json-schema.org/draft/2020-12/schema";

impl Dialect {
    /// Draft 7: modern vocabularies minus Unevaluated, lenient
    pub fn draft7() -> Self {
        Self {
            id: DRAFT_7_ID.to_string(),
            draft: Draft::V7,
            vocabularies: vec![
                Vocabulary::Core,
                Vocabulary::Applicator,
                Vocabulary::Validation,
                Vocabulary::MetaData,
                Vocabulary::FormatAnnotation,
                Vocabulary::Content,
            ],
            unknown_keywords: UnknownKeywordPolicy::Ignore,
        }
    }

    /// Draft 2019-09
    pub fn draft2019_09() -> Self {
        Self {
            id: DRAFT_2019_09_ID.to_string(),
            draft: Draft::V2019_09,
            vocabularies: standard_vocabularies(),
            unknown_keywords: UnknownKeywordPolicy::Annotate,
        }
    }

    /// Draft 2020-12
    pub fn draft2020_12() -> Self {
        Self {
            id: DRAFT_2020_12_ID.to_string(),
            draft: Draft::V2020_12,
            vocabularies: standard_vocabularies(),
            unknown_keywords: UnknownKeywordPolicy::Annotate,
        }
    }

    /// Whether a vocabulary is active in this dialect
    pub fn activates(&self, vocabulary: Vocabulary) -> bool {
        self.vocabularies.contains(&vocabulary)
    }

    /// Priority of a vocabulary (lower wins on keyword collisions)
    pub fn priority(&self, vocabulary: Vocabulary) -> Option<usize> {
        self.vocabularies.iter().position(|v| *v == vocabulary)
    }
}

fn standard_vocabularies() -> Vec<Vocabulary> {
    vec![
        Vocabulary::Core,
        Vocabulary::Applicator,
        Vocabulary::Validation,
        Vocabulary::Unevaluated,
        Vocabulary::MetaData,
        Vocabulary::FormatAnnotation,
        Vocabulary::Content,
    ]
}

/// Maps dialect identifiers to dialect definitions
#[derive(Debug, Clone)]
pub struct DialectRegistry {
    dialects: HashMap<String, Dialect>,
}

impl DialectRegistry {
    /// A registry with the three standard dialects
    pub fn standard() -> Self {
        let mut registry = Self {
            dialects: HashMap::new(),
        };
        registry.register(Dialect::draft7());
        registry.register(Dialect::draft2019_09());
        registry.register(Dialect::draft2020_12());
        registry
    }

    /// Register a dialect, replacing any previous definition of the same id
    pub fn register(&mut self, dialect: Dialect) {
        self.dialects.insert(normalize_id(&dialect.id), dialect);
    }

    /// Look up a dialect by `$schema` URI
    ///
    /// Trailing empty fragments are ignored, so draft 7's historical
    /// `...schema#` form matches.
    pub fn get(&self, id: &str) -> Option<&Dialect> {
        self.dialects.get(&normalize_id(id))
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn normalize_id(id: &str) -> String {
    id.strip_suffix('#').unwrap_or(id).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_lookup() {
        let registry = DialectRegistry::standard();
        assert_eq!(registry.get(DRAFT_2020_12_ID).unwrap().draft, Draft::V2020_12);
        assert_eq!(registry.get(DRAFT_7_ID).unwrap().draft, Draft::V7);
    }

    #[test]
    fn test_trailing_fragment_ignored() {
        let registry = DialectRegistry::standard();
        let dialect = registry.get("http://json-schema.org/draft-07/schema#").unwrap();
        assert_eq!(dialect.draft, Draft::V7);
    }

    #[test]
    fn test_draft7_lacks_unevaluated() {
        let dialect = Dialect::draft7();
        assert!(!dialect.activates(Vocabulary::Unevaluated));
        assert_eq!(dialect.unknown_keywords, UnknownKeywordPolicy::Ignore);
    }

    #[test]
    fn test_custom_strict_dialect() {
        let mut registry = DialectRegistry::standard();
        registry.register(Dialect {
            id: "https://example.com/strict".to_string(),
            draft: Draft::V2020_12,
            vocabularies: vec![Vocabulary::Core, Vocabulary::Validation],
            unknown_keywords: UnknownKeywordPolicy::Error,
        });
        let dialect = registry.get("https://example.com/strict").unwrap();
        assert!(!dialect.activates(Vocabulary::Applicator));
        assert_eq!(dialect.unknown_keywords, UnknownKeywordPolicy::Error);
    }
}
