//! Evaluation results and output rendering
//!
//! One result node per schema application. Skipped evaluations are pruned
//! before results are assembled, so the tree only ever contains outcomes
//! that participated: a node is valid iff it has no errors and every child
//! is valid.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};

use crate::pointer::Pointer;

/// Requested output shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Single boolean
    Flag,
    /// Flattened sequence of per-application outcomes
    List,
    /// The result tree itself
    #[default]
    Hierarchical,
}

/// One node of the evaluation result tree
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResults {
    pub valid: bool,
    /// JSON Pointer into the instance
    #[serde(rename = "instanceLocation")]
    pub instance_location: Pointer,
    /// Evaluation path: keywords traversed from the root, including `$ref`
    #[serde(rename = "keywordLocation")]
    pub keyword_location: Pointer,
    /// `base#pointer` when the resource has an explicit base URI
    #[serde(rename = "absoluteKeywordLocation", skip_serializing_if = "Option::is_none")]
    pub absolute_keyword_location: Option<String>,
    /// Keyword name → produced annotation, from successful keywords
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, Value>,
    /// Keyword name → human-readable message, from failed keywords
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub errors: IndexMap<String, String>,
    /// Nested subschema applications
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<EvaluationResults>,
}

impl EvaluationResults {
    pub(crate) fn new(instance_location: Pointer, keyword_location: Pointer) -> Self {
        Self {
            valid: true,
            instance_location,
            keyword_location,
            absolute_keyword_location: None,
            annotations: IndexMap::new(),
            errors: IndexMap::new(),
            details: Vec::new(),
        }
    }

    /// The flag-format boolean
    pub fn flag(&self) -> bool {
        self.valid
    }

    /// Annotation produced by a keyword at this node
    pub fn annotation(&self, keyword: &str) -> Option<&Value> {
        self.annotations.get(keyword)
    }

    /// Error produced by a keyword at this node
    pub fn error(&self, keyword: &str) -> Option<&str> {
        self.errors.get(keyword).map(String::as_str)
    }

    /// Depth-first search for the first error attributed to `keyword`
    pub fn find_error(&self, keyword: &str) -> Option<(&Pointer, &str)> {
        if let Some(message) = self.errors.get(keyword) {
            return Some((&self.instance_location, message));
        }
        self.details.iter().find_map(|d| d.find_error(keyword))
    }

    /// Whether any node in the tree carries an error
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.details.iter().any(EvaluationResults::has_errors)
    }

    /// Render the requested output shape as JSON
    pub fn to_output(&self, format: OutputFormat) -> Value {
        match format {
            OutputFormat::Flag => json!({ "valid": self.valid }),
            OutputFormat::Hierarchical => {
                serde_json::to_value(self).unwrap_or_else(|_| json!({ "valid": self.valid }))
            }
            OutputFormat::List => {
                let mut units = Vec::new();
                self.flatten(&mut units);
                json!({ "valid": self.valid, "details": units })
            }
        }
    }

    fn flatten(&self, units: &mut Vec<Value>) {
        let mut unit = json!({
            "valid": self.valid,
            "instanceLocation": self.instance_location.to_string(),
            "keywordLocation": self.keyword_location.to_string(),
        });
        if let Some(abs) = &self.absolute_keyword_location {
            unit["absoluteKeywordLocation"] = json!(abs);
        }
        if !self.annotations.is_empty() {
            unit["annotations"] = serde_json::to_value(&self.annotations).unwrap_or(Value::Null);
        }
        if !self.errors.is_empty() {
            unit["errors"] = serde_json::to_value(&self.errors).unwrap_or(Value::Null);
        }
        units.push(unit);
        for detail in &self.details {
            detail.flatten(units);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EvaluationResults {
        let mut root = EvaluationResults::new(Pointer::root(), Pointer::root());
        let mut child = EvaluationResults::new(
            Pointer::root().push("a"),
            Pointer::root().push("properties").push("a"),
        );
        child.valid = false;
        child
            .errors
            .insert("type".to_string(), "expected integer".to_string());
        root.valid = false;
        root.details.push(child);
        root
    }

    #[test]
    fn test_flag_matches_tree_errors() {
        let results = sample();
        assert_eq!(results.flag(), false);
        assert_eq!(results.flag(), !results.has_errors());

        let passing = EvaluationResults::new(Pointer::root(), Pointer::root());
        assert!(passing.flag());
        assert!(!passing.has_errors());
    }

    #[test]
    fn test_find_error_location() {
        let results = sample();
        let (location, message) = results.find_error("type").unwrap();
        assert_eq!(location.to_string(), "/a");
        assert_eq!(message, "expected integer");
        assert!(results.find_error("required").is_none());
    }

    #[test]
    fn test_list_output_flattens() {
        let output = sample().to_output(OutputFormat::List);
        let details = output["details"].as_array().unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[1]["keywordLocation"], "/properties/a");
        assert_eq!(details[1]["errors"]["type"], "expected integer");
    }

    #[test]
    fn test_flag_output_shape() {
        let output = sample().to_output(OutputFormat::Flag);
        assert_eq!(output, json!({"valid": false}));
    }
}
