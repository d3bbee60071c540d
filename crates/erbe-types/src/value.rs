//! The recursive value tree that represents a world record.
//!
//! [`Value`] is a closed tagged union: every consumer matches exhaustively
//! over its six variants instead of inspecting types at runtime. Maps keep
//! their keys sorted ([`BTreeMap`]) so traversal order, diff output, and the
//! persisted document are all deterministic.
//!
//! Numbers are always `f64`. On serialization, integral values within the
//! exactly-representable range are written as JSON integers so counters like
//! `world_age` stay readable on disk.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::path::{Path, PathToken};

/// String-keyed map node of a [`Value`] tree.
pub type ValueMap = BTreeMap<String, Value>;

/// Largest magnitude at which every integer is exactly representable in `f64`.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A node in the world record tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent or explicit null.
    #[default]
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Any number. Persisted numbers must be finite.
    Number(f64),
    /// UTF-8 text.
    String(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// String-keyed mapping with unique keys.
    Map(ValueMap),
}

/// The variant of a [`Value`] without its payload, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// [`Value::Null`].
    Null,
    /// [`Value::Bool`].
    Bool,
    /// [`Value::Number`].
    Number,
    /// [`Value::String`].
    String,
    /// [`Value::List`].
    List,
    /// [`Value::Map`].
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::List => "list",
            Self::Map => "map",
        };
        f.write_str(name)
    }
}

impl Value {
    /// An empty map node.
    pub const fn empty_map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// An empty list node.
    pub const fn empty_list() -> Self {
        Self::List(Vec::new())
    }

    /// The variant of this value.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Number(_) => ValueKind::Number,
            Self::String(_) => ValueKind::String,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
        }
    }

    /// Whether this value is a map.
    pub const fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    /// Whether this value is a list or a map.
    pub const fn is_container(&self) -> bool {
        matches!(self, Self::Map(_) | Self::List(_))
    }

    /// Borrow the map payload, if this is a map.
    pub const fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Mutably borrow the map payload, if this is a map.
    pub const fn as_map_mut(&mut self) -> Option<&mut ValueMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow the list payload, if this is a list.
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Mutably borrow the list payload, if this is a list.
    pub const fn as_list_mut(&mut self) -> Option<&mut Vec<Self>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// The numeric payload, if this is a number.
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean payload, if this is a bool.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read a non-negative integral number as a count.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            Self::Number(n) if *n >= 0.0 && *n < MAX_EXACT_INTEGER && n.fract() == 0.0 => Some(*n as usize),
            _ => None,
        }
    }

    /// Coerce this node into a map, discarding any other payload.
    pub fn ensure_map(&mut self) -> &mut ValueMap {
        match self {
            Self::Map(map) => map,
            other => {
                *other = Self::empty_map();
                other.ensure_map()
            }
        }
    }

    /// Coerce this node into a list, discarding any other payload.
    pub fn ensure_list(&mut self) -> &mut Vec<Self> {
        match self {
            Self::List(items) => items,
            other => {
                *other = Self::empty_list();
                other.ensure_list()
            }
        }
    }

    /// Look up a key on a map node. Returns `None` for non-maps.
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Mutable key lookup on a map node. Returns `None` for non-maps.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Self> {
        self.as_map_mut().and_then(|map| map.get_mut(key))
    }

    /// Resolve a [`Path`] against this tree without mutating it.
    ///
    /// Key tokens that address a list are read as decimal indices, and
    /// index tokens that address a map are read as their decimal key.
    pub fn pointer(&self, path: &Path) -> Option<&Self> {
        let mut current = self;
        for token in path.tokens() {
            current = match (current, token) {
                (Self::Map(map), token) => map.get(&*token.as_key())?,
                (Self::List(items), token) => items.get(token.as_index()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Locate the first non-finite number in depth-first, key-sorted order.
    ///
    /// Returns the path of the offending leaf, or `None` if every number in
    /// the tree is finite and the tree is safe to persist.
    pub fn first_non_finite(&self) -> Option<Path> {
        let mut path = Path::root();
        if find_non_finite(self, &mut path) {
            Some(path)
        } else {
            None
        }
    }
}

fn find_non_finite(value: &Value, path: &mut Path) -> bool {
    match value {
        Value::Number(n) => !n.is_finite(),
        Value::List(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(PathToken::Index(index));
                if find_non_finite(item, path) {
                    return true;
                }
                path.pop();
            }
            false
        }
        Value::Map(map) => {
            for (key, item) in map {
                path.push(PathToken::Key(key.clone()));
                if find_non_finite(item, path) {
                    return true;
                }
                path.pop();
            }
            false
        }
        Value::Null | Value::Bool(_) | Value::String(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u64> for Value {
    /// Counters above 2^53 lose precision.
    #[allow(clippy::cast_precision_loss)]
    fn from(n: u64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::List(items)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Self::Map(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(key, item)| (key, Self::from(item)))
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde
// ---------------------------------------------------------------------------

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => serialize_number(*n, serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, item) in map {
                    out.serialize_entry(key, item)?;
                }
                out.end()
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn serialize_number<S: Serializer>(n: f64, serializer: S) -> Result<S::Ok, S::Error> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_EXACT_INTEGER {
        // Exact: integral and inside the 53-bit mantissa range.
        serializer.serialize_i64(n as i64)
    } else {
        serializer.serialize_f64(n)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON-like value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, item)) = access.next_entry::<String, Value>()? {
            map.insert(key, item);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn converts_from_json_preserving_shape() {
        let value = Value::from(json!({"zones": {"a": {"energy": 2}}, "tags": ["x", null]}));
        assert_eq!(
            value.pointer(&"/zones/a/energy".parse().unwrap()),
            Some(&Value::Number(2.0))
        );
        assert_eq!(value.get("tags").and_then(Value::as_list).map(<[Value]>::len), Some(2));
    }

    #[test]
    fn integral_numbers_serialize_as_integers() {
        let value = Value::from(json!({"age": 3, "density": 0.25}));
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"age":3,"density":0.25}"#);
    }

    #[test]
    fn deserializes_back_to_same_tree() {
        let value = Value::from(json!({"a": [1, 2.5, true, "s", null, {"b": {}}]}));
        let text = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn pointer_reads_list_index_tokens() {
        let value = Value::from(json!({"log": [0.1, 0.2, 0.3]}));
        let path: Path = "/log/2".parse().unwrap();
        assert_eq!(value.pointer(&path).and_then(Value::as_f64), Some(0.3));
        let missing: Path = "/log/9".parse().unwrap();
        assert!(value.pointer(&missing).is_none());
    }

    #[test]
    fn first_non_finite_reports_path() {
        let mut value = Value::from(json!({"a": {"b": [1.0, 2.0]}, "c": 1}));
        assert!(value.first_non_finite().is_none());

        if let Some(Value::List(items)) = value.get_mut("a").and_then(|a| a.get_mut("b")) {
            items.push(Value::Number(f64::NAN));
        }
        let path = value.first_non_finite().unwrap();
        assert_eq!(path.to_string(), "/a/b/2");
    }

    #[test]
    fn kind_names_are_lowercase() {
        assert_eq!(Value::empty_map().kind().to_string(), "map");
        assert_eq!(Value::Number(1.0).kind().to_string(), "number");
    }

    #[test]
    fn ensure_map_replaces_scalars_only() {
        let mut scalar = Value::from("storm");
        scalar.ensure_map().insert("dominant".to_owned(), Value::from("storm"));
        assert_eq!(scalar.get("dominant").and_then(Value::as_str), Some("storm"));

        let mut map = Value::from(serde_json::json!({"a": 1}));
        assert_eq!(map.ensure_map().len(), 1);
    }

    #[test]
    fn as_usize_rejects_fractions_and_negatives() {
        assert_eq!(Value::Number(800.0).as_usize(), Some(800));
        assert_eq!(Value::Number(1.5).as_usize(), None);
        assert_eq!(Value::Number(-1.0).as_usize(), None);
        assert_eq!(Value::from("8").as_usize(), None);
    }
}
