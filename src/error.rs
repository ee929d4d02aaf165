//! Error types for schema compilation and evaluation
//!
//! Two disjoint families: [`CompileError`] is raised while turning a schema
//! into a constraint graph and is always fatal to that compilation.
//! [`EvaluateError`] reports an engine condition (cancellation, depth
//! exhaustion) during evaluation. An *invalid instance* is neither: it is
//! carried as data in the evaluation results.

use thiserror::Error;

use crate::pointer::Pointer;

/// Result type for compilation
pub type Result<T> = std::result::Result<T, CompileError>;

/// Schema compilation errors
#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error("invalid value for keyword `{keyword}` at {location}: {reason}")]
    SchemaSyntax {
        keyword: String,
        location: Pointer,
        reason: String,
    },

    #[error("cannot resolve reference `{reference}` at {location}: {reason}")]
    ReferenceResolution {
        reference: String,
        location: Pointer,
        reason: String,
    },

    #[error("reference `{reference}` at {location} expands without consuming the instance")]
    InfiniteExpansion { reference: String, location: Pointer },

    #[error("keyword dependency cycle: {}", keywords.join(" -> "))]
    DependencyCycle { keywords: Vec<String> },

    #[error("unknown dialect `{0}`")]
    UnknownDialect(String),

    #[error("unknown keyword `{keyword}` at {location} (dialect forbids unrecognized keywords)")]
    UnknownKeyword { keyword: String, location: Pointer },
}

impl CompileError {
    /// Shorthand for a [`CompileError::SchemaSyntax`] at a known location
    pub fn syntax(keyword: impl Into<String>, location: Pointer, reason: impl Into<String>) -> Self {
        CompileError::SchemaSyntax {
            keyword: keyword.into(),
            location,
            reason: reason.into(),
        }
    }
}

/// Engine-side evaluation errors
///
/// Distinct from validation failures: a schema that rejects an instance
/// produces an invalid *result*, not an `EvaluateError`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluateError {
    #[error("evaluation canceled")]
    Canceled,

    #[error("evaluation exceeded maximum depth {0}")]
    DepthExceeded(usize),
}
