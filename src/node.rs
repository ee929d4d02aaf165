//! Schema Node Model
//!
//! A schema is either a boolean or an ordered set of uniquely-named keyword
//! declarations. Nodes are immutable once parsed. Identifier keywords
//! (`$id`, `$anchor`, `$dynamicAnchor`, `$recursiveAnchor`, `$schema`,
//! `$vocabulary`) are extracted into typed fields at parse time and do not
//! appear in the keyword map; they scope resolution and dialect selection
//! rather than constrain instances.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{CompileError, Result};
use crate::pointer::Pointer;

/// A parsed schema node
#[derive(Debug, Clone)]
pub enum SchemaNode {
    /// `true` accepts every instance, `false` rejects every instance
    Bool(bool),
    /// An object schema: ordered keyword declarations plus identifiers
    Object(ObjectSchema),
}

/// The object form of a schema node
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    /// Base identifier for reference resolution scoping
    pub id: Option<String>,
    /// Plain-name fragment anchor
    pub anchor: Option<String>,
    /// Late-bound anchor, resolved through the dynamic scope
    pub dynamic_anchor: Option<String>,
    /// 2019-09 recursive anchor (`$recursiveAnchor: true`)
    pub recursive_anchor: bool,
    /// Declared dialect (`$schema`), honored at resource roots
    pub dialect: Option<String>,
    /// Raw `$vocabulary` declaration, kept for meta-schema introspection
    pub vocabulary: Option<Value>,
    /// Non-identifier keywords in declaration order, names unique
    pub keywords: IndexMap<String, Value>,
}

impl SchemaNode {
    /// Parse a raw JSON value into a schema node
    ///
    /// Only booleans and objects are schemas; anything else is a syntax
    /// error. Keyword uniqueness holds by construction (JSON object keys).
    pub fn parse(raw: &Value, location: &Pointer) -> Result<Self> {
        match raw {
            Value::Bool(b) => Ok(SchemaNode::Bool(*b)),
            Value::Object(map) => {
                let mut schema = ObjectSchema::default();
                for (name, value) in map {
                    match name.as_str() {
                        "$id" => schema.id = Some(identifier_str("$id", value, location)?),
                        "$anchor" => {
                            schema.anchor = Some(identifier_str("$anchor", value, location)?)
                        }
                        "$dynamicAnchor" => {
                            schema.dynamic_anchor =
                                Some(identifier_str("$dynamicAnchor", value, location)?)
                        }
                        "$recursiveAnchor" => {
                            schema.recursive_anchor = value.as_bool().ok_or_else(|| {
                                CompileError::syntax(
                                    "$recursiveAnchor",
                                    location.clone(),
                                    "expected a boolean",
                                )
                            })?
                        }
                        "$schema" => {
                            schema.dialect = Some(identifier_str("$schema", value, location)?)
                        }
                        "$vocabulary" => schema.vocabulary = Some(value.clone()),
                        _ => {
                            schema.keywords.insert(name.clone(), value.clone());
                        }
                    }
                }
                Ok(SchemaNode::Object(schema))
            }
            other => {
                let keyword = location
                    .tokens()
                    .last()
                    .cloned()
                    .unwrap_or_else(|| "schema".to_string());
                Err(CompileError::syntax(
                    keyword,
                    location.clone(),
                    format!("expected a boolean or object schema, found {}", type_name(other)),
                ))
            }
        }
    }

    /// Whether this is a boolean schema
    pub fn is_boolean(&self) -> bool {
        matches!(self, SchemaNode::Bool(_))
    }

    /// Raw value of a keyword declared on this node
    pub fn keyword(&self, name: &str) -> Option<&Value> {
        match self {
            SchemaNode::Bool(_) => None,
            SchemaNode::Object(obj) => obj.keywords.get(name),
        }
    }

    /// The object form, if any
    pub fn as_object(&self) -> Option<&ObjectSchema> {
        match self {
            SchemaNode::Bool(_) => None,
            SchemaNode::Object(obj) => Some(obj),
        }
    }
}

fn identifier_str(keyword: &str, value: &Value, location: &Pointer) -> Result<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| CompileError::syntax(keyword, location.clone(), "expected a string"))
}

/// JSON type name for diagnostics
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boolean_schemas() {
        let node = SchemaNode::parse(&json!(true), &Pointer::root()).unwrap();
        assert!(node.is_boolean());
        let node = SchemaNode::parse(&json!(false), &Pointer::root()).unwrap();
        assert!(matches!(node, SchemaNode::Bool(false)));
    }

    #[test]
    fn test_non_schema_value_rejected() {
        let err = SchemaNode::parse(&json!(42), &Pointer::root()).unwrap_err();
        assert!(matches!(err, CompileError::SchemaSyntax { .. }));
    }

    #[test]
    fn test_identifiers_extracted() {
        let raw = json!({
            "$id": "https://example.com/s",
            "$anchor": "root",
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object"
        });
        let node = SchemaNode::parse(&raw, &Pointer::root()).unwrap();
        let obj = node.as_object().unwrap();
        assert_eq!(obj.id.as_deref(), Some("https://example.com/s"));
        assert_eq!(obj.anchor.as_deref(), Some("root"));
        assert!(obj.dialect.is_some());
        assert_eq!(obj.keywords.len(), 1);
        assert_eq!(node.keyword("type"), Some(&json!("object")));
        assert_eq!(node.keyword("$id"), None);
    }

    #[test]
    fn test_keyword_order_preserved() {
        let raw = json!({"minimum": 1, "type": "integer", "maximum": 3});
        let node = SchemaNode::parse(&raw, &Pointer::root()).unwrap();
        let names: Vec<_> = node
            .as_object()
            .unwrap()
            .keywords
            .keys()
            .cloned()
            .collect();
        assert_eq!(names, vec!["minimum", "type", "maximum"]);
    }

    #[test]
    fn test_bad_identifier_type() {
        let err = SchemaNode::parse(&json!({"$id": 7}), &Pointer::root()).unwrap_err();
        match err {
            CompileError::SchemaSyntax { keyword, .. } => assert_eq!(keyword, "$id"),
            other => panic!("expected SchemaSyntax, got {:?}", other),
        }
    }
}
