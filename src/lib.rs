//! Keystone Schema
//!
//! A dialect-aware JSON Schema compilation and evaluation engine.
//!
//! ## Features
//!
//! - **Compiled Constraint Graphs**: schemas compile once into immutable,
//!   dependency-ordered graphs, cached by content checksum and shared across
//!   concurrent evaluations
//! - **Multiple Dialects**: draft 7, 2019-09, and 2020-12 coexist in one
//!   process; custom dialects register their own vocabulary sets
//! - **Reference Resolution**: `$ref`, `$dynamicRef`, and `$recursiveRef`
//!   against a caller-populated resource store, with build-time detection of
//!   non-terminating reference cycles
//! - **Structured Reports**: annotation and error trees rendered as flag,
//!   list, or hierarchical output
//!
//! ## Architecture
//!
//! ```text
//! schema JSON ──> Engine::compile ──> CompiledSchema (cached)
//!                    │  keyword catalog + dialect registry
//!                    │  schema store ($ref resolution)
//!                    ▼
//!               constraint graph ──> evaluate(instance) ──> results tree
//! ```
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//!
//! let schema = json!({"type": "object", "required": ["a"]});
//! assert!(keystone_schema::is_valid(&schema, &json!({"a": 1})));
//! assert!(!keystone_schema::is_valid(&schema, &json!({})));
//! ```

pub mod checksum;
pub mod compile;
pub mod dialect;
pub mod error;
pub mod eval;
pub mod keyword;
pub mod node;
pub mod pointer;
pub mod report;
pub mod resolver;

pub use checksum::Checksum;
pub use compile::{CompiledSchema, Engine, FormatChecker};
pub use dialect::{Dialect, DialectRegistry, Draft, UnknownKeywordPolicy, Vocabulary};
pub use error::{CompileError, EvaluateError};
pub use eval::{EvaluationOptions, KeywordEvaluation};
pub use keyword::{KeywordCatalog, KeywordDescriptor};
pub use node::SchemaNode;
pub use pointer::Pointer;
pub use report::{EvaluationResults, OutputFormat};
pub use resolver::SchemaStore;

use once_cell::sync::Lazy;
use serde_json::Value;

static DEFAULT_ENGINE: Lazy<Engine> = Lazy::new(Engine::new);

/// Compile with the default engine and evaluate one instance
pub fn validate(schema: &Value, instance: &Value) -> Result<EvaluationResults, CompileError> {
    let compiled = DEFAULT_ENGINE.compile(schema)?;
    // Default options carry no cancellation signal or depth limit, so the
    // evaluation itself cannot abort.
    Ok(compiled
        .evaluate(instance, &EvaluationOptions::default())
        .expect("evaluation without cancellation or depth limit cannot abort"))
}

/// Validates `instance` against `schema` with the default engine
///
/// A schema that fails to compile validates nothing.
pub fn is_valid(schema: &Value, instance: &Value) -> bool {
    DEFAULT_ENGINE
        .compile(schema)
        .map(|compiled| compiled.is_valid(instance))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_valid() {
        let schema = json!({"minLength": 5});
        assert!(is_valid(&schema, &json!("foobar")));
        assert!(!is_valid(&schema, &json!("foo")));
    }

    #[test]
    fn test_validate_reports_locations() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}},
            "required": ["a"]
        });
        let results = validate(&schema, &json!({"a": "x"})).unwrap();
        assert!(!results.flag());
        let (location, _) = results.find_error("type").unwrap();
        assert_eq!(location.to_string(), "/a");
    }
}
