//! Slash-delimited JSON Pointer locations
//!
//! Used for both instance locations and schema (keyword) locations in
//! evaluation results. Tokens are stored unescaped; `~0`/`~1` escaping is
//! applied on display and removed on parse per RFC 6901.

use std::fmt;

use serde::{Serialize, Serializer};

/// An RFC 6901 JSON Pointer
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Pointer {
    tokens: Vec<String>,
}

impl Pointer {
    /// The root pointer (empty string)
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse from the string form, e.g. `/properties/a`
    ///
    /// The empty string is the root pointer. A non-empty pointer must start
    /// with `/`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return Some(Self::root());
        }
        if !s.starts_with('/') {
            return None;
        }
        let tokens = s[1..]
            .split('/')
            .map(|t| t.replace("~1", "/").replace("~0", "~"))
            .collect();
        Some(Self { tokens })
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Return a new pointer with one token appended
    pub fn push(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token.into());
        Self { tokens }
    }

    /// Return a new pointer with an array index appended
    pub fn push_index(&self, index: usize) -> Self {
        self.push(index.to_string())
    }

    /// Return a new pointer with several tokens appended
    pub fn join(&self, tokens: &[String]) -> Self {
        let mut out = self.tokens.clone();
        out.extend(tokens.iter().cloned());
        Self { tokens: out }
    }

    /// Evaluate this pointer against a JSON value
    pub fn resolve<'v>(&self, value: &'v serde_json::Value) -> Option<&'v serde_json::Value> {
        let mut current = value;
        for token in &self.tokens {
            current = match current {
                serde_json::Value::Object(map) => map.get(token)?,
                serde_json::Value::Array(items) => {
                    let idx: usize = token.parse().ok()?;
                    items.get(idx)?
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", token.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

impl Serialize for Pointer {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_displays_empty() {
        assert_eq!(Pointer::root().to_string(), "");
        assert!(Pointer::root().is_root());
    }

    #[test]
    fn test_push_and_display() {
        let p = Pointer::root().push("properties").push("a");
        assert_eq!(p.to_string(), "/properties/a");
    }

    #[test]
    fn test_escaping_round_trip() {
        let p = Pointer::root().push("a/b").push("c~d");
        assert_eq!(p.to_string(), "/a~1b/c~0d");
        let parsed = Pointer::parse("/a~1b/c~0d").unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn test_resolve() {
        let value = json!({"a": {"b": [10, 20]}});
        let p = Pointer::parse("/a/b/1").unwrap();
        assert_eq!(p.resolve(&value), Some(&json!(20)));
        assert_eq!(Pointer::parse("/a/x").unwrap().resolve(&value), None);
    }
}
