//! Fact model: the tagged value union and the fact document.
//!
//! Values never coerce. JSON `null` and floats have no counterpart here, so
//! conversion from `serde_json::Value` rejects them instead of guessing; an
//! absent fact is modelled by omitting its key.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// A single fact value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    Doc(Document),
    Seq(Vec<Value>),
}

impl Value {
    /// Type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Doc(_) => "document",
            Value::Seq(_) => "sequence",
        }
    }

    pub fn same_type(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert a JSON value. `null` and non-integral numbers are rejected.
    pub fn from_json(json: serde_json::Value) -> Result<Self, FactError> {
        convert(json, &mut Vec::new())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Doc(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Seq(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Doc(d) => d.serialize(serializer),
            Value::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Fact conversion failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactError {
    #[error("fact document root must be an object")]
    RootNotObject,
    #[error("null is not a fact value (at {0})")]
    Null(String),
    #[error("unsupported number {value} (at {path}): only 64-bit integers are allowed")]
    Number { path: String, value: String },
}

/// One step of a fact path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Path below the `input` root, e.g. `input.user.roles[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FactPath {
    segments: Vec<PathSegment>,
}

impl FactPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Build a path from dotted keys (`"user.name"`). An empty string is the root.
    pub fn parse_dotted(s: &str) -> Self {
        let segments = s
            .split('.')
            .filter(|p| !p.is_empty())
            .map(|p| PathSegment::Key(p.to_string()))
            .collect();
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for FactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("input")?;
        for seg in &self.segments {
            match seg {
                PathSegment::Key(k) => write!(f, ".{k}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// Result of walking a [`FactPath`].
#[derive(Debug, PartialEq)]
pub enum Lookup<'a> {
    Found(&'a Value),
    Missing,
    /// A segment tried to step into a scalar, or used the wrong kind of
    /// selector (index on a document, key on a sequence).
    NotTraversable { depth: usize, found: &'static str },
}

/// Immutable, ordered key -> value mapping with unique keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    entries: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a repeated key replaces the earlier value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Convert a JSON object into a document.
    pub fn from_json(json: serde_json::Value) -> Result<Self, FactError> {
        match json {
            serde_json::Value::Object(_) => match convert(json, &mut Vec::new())? {
                Value::Doc(d) => Ok(d),
                _ => Err(FactError::RootNotObject),
            },
            _ => Err(FactError::RootNotObject),
        }
    }

    /// Walk `path` from this document.
    pub fn lookup(&self, path: &FactPath) -> Lookup<'_> {
        let mut segments = path.segments().iter().enumerate();
        let Some((_, first)) = segments.next() else {
            return Lookup::NotTraversable {
                depth: 0,
                found: "document",
            };
        };
        let mut current = match first {
            PathSegment::Key(k) => match self.entries.get(k) {
                Some(v) => v,
                None => return Lookup::Missing,
            },
            PathSegment::Index(_) => {
                return Lookup::NotTraversable {
                    depth: 0,
                    found: "document",
                }
            }
        };

        for (depth, seg) in segments {
            current = match (current, seg) {
                (Value::Doc(d), PathSegment::Key(k)) => match d.entries.get(k) {
                    Some(v) => v,
                    None => return Lookup::Missing,
                },
                (Value::Seq(items), PathSegment::Index(i)) => match items.get(*i) {
                    Some(v) => v,
                    None => return Lookup::Missing,
                },
                (other, _) => {
                    return Lookup::NotTraversable {
                        depth,
                        found: other.type_name(),
                    }
                }
            };
        }
        Lookup::Found(current)
    }

    /// Total number of values reachable from this document and the deepest
    /// nesting level (the document itself is level 1).
    pub fn measure(&self) -> FactStats {
        let mut stats = FactStats::default();
        measure_doc(self, 1, &mut stats);
        stats
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Size figures checked at session binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactStats {
    pub nodes: usize,
    pub depth: usize,
}

fn measure_doc(doc: &Document, level: usize, stats: &mut FactStats) {
    stats.depth = stats.depth.max(level);
    for v in doc.entries.values() {
        measure_value(v, level + 1, stats);
    }
}

fn measure_value(v: &Value, level: usize, stats: &mut FactStats) {
    stats.nodes += 1;
    stats.depth = stats.depth.max(level);
    match v {
        Value::Doc(d) => measure_doc(d, level, stats),
        Value::Seq(items) => {
            for item in items {
                measure_value(item, level + 1, stats);
            }
        }
        _ => {}
    }
}

fn convert(json: serde_json::Value, path: &mut Vec<String>) -> Result<Value, FactError> {
    use serde_json::Value as J;

    Ok(match json {
        J::Null => return Err(FactError::Null(render_path(path))),
        J::Bool(b) => Value::Bool(b),
        J::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => {
                return Err(FactError::Number {
                    path: render_path(path),
                    value: n.to_string(),
                })
            }
        },
        J::String(s) => Value::Str(s),
        J::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                path.push(format!("[{i}]"));
                out.push(convert(item, path)?);
                path.pop();
            }
            Value::Seq(out)
        }
        J::Object(map) => {
            let mut entries = BTreeMap::new();
            for (k, v) in map {
                path.push(format!(".{k}"));
                let converted = convert(v, path)?;
                path.pop();
                entries.insert(k, converted);
            }
            Value::Doc(Document { entries })
        }
    })
}

fn render_path(path: &[String]) -> String {
    let mut s = String::from("input");
    for p in path {
        s.push_str(p);
    }
    s
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_json(json!({
            "uid": 7,
            "user": { "name": "alan", "roles": ["admin", "dev"] }
        }))
        .unwrap()
    }

    #[test]
    fn lookup_nested_and_indexed() {
        let d = doc();
        let path = FactPath::new(vec![
            PathSegment::Key("user".into()),
            PathSegment::Key("roles".into()),
            PathSegment::Index(1),
        ]);
        assert_eq!(d.lookup(&path), Lookup::Found(&Value::Str("dev".into())));
        assert_eq!(path.to_string(), "input.user.roles[1]");
    }

    #[test]
    fn lookup_missing_is_distinct_from_scalar_traversal() {
        let d = doc();
        assert_eq!(d.lookup(&FactPath::parse_dotted("user.email")), Lookup::Missing);
        assert_eq!(
            d.lookup(&FactPath::parse_dotted("uid.high")),
            Lookup::NotTraversable {
                depth: 1,
                found: "integer"
            }
        );
    }

    #[test]
    fn null_and_float_are_rejected() {
        let err = Document::from_json(json!({"a": {"b": null}})).unwrap_err();
        assert_eq!(err, FactError::Null("input.a.b".into()));

        let err = Document::from_json(json!({"ratio": 0.5})).unwrap_err();
        assert!(matches!(err, FactError::Number { .. }));

        assert_eq!(
            Document::from_json(json!([1, 2])).unwrap_err(),
            FactError::RootNotObject
        );
    }

    #[test]
    fn measure_counts_nodes_and_depth() {
        let stats = doc().measure();
        // uid, user, name, roles, "admin", "dev"
        assert_eq!(stats.nodes, 6);
        assert_eq!(stats.depth, 4);
    }

    #[test]
    fn serializes_back_to_json() {
        let d = Document::new().with("ok", true).with("n", 3i64);
        assert_eq!(serde_json::to_value(&d).unwrap(), json!({"n": 3, "ok": true}));
    }
}
