//! Items and Attribute Values
//!
//! An [`Item`] is an ordered map from attribute name to [`AttributeValue`], a
//! closed variant type covering everything the store can hold. Ordering the
//! map by name gives every item a single canonical string form, which the
//! overlap termination policy uses for deduplication.
//!
//! The serde bridge ([`from_item`], [`to_item`]) is the unmarshalling
//! boundary: caller types derive `Serialize`/`Deserialize` and are converted
//! through plain JSON.

pub mod identity;
pub mod projection;

pub use identity::{merge_projection, unique_id, UniqueIdentifierSpec};
pub use projection::Projection;

use crate::error::{QueryError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

/// A single typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// UTF-8 string
    S(String),
    /// Number, kept in its decimal string form to avoid precision loss
    N(String),
    Bool(bool),
    /// Binary blob
    B(Bytes),
    L(Vec<AttributeValue>),
    M(BTreeMap<String, AttributeValue>),
    Null,
}

impl AttributeValue {
    /// Build a number from anything displayable as a decimal
    pub fn number(n: impl fmt::Display) -> Self {
        AttributeValue::N(n.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::N(n) => n.parse().ok(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::B(_) => "B",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
            AttributeValue::Null => "NULL",
        }
    }

    /// Order two scalar values of the same type (S, N or B).
    ///
    /// Returns `None` for mismatched types or non-scalar values, which is how
    /// comparisons in key conditions and filters evaluate to false.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
            (AttributeValue::N(a), AttributeValue::N(b)) => {
                let a: f64 = a.parse().ok()?;
                let b: f64 = b.parse().ok()?;
                Some(a.total_cmp(&b))
            }
            (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Approximate stored size, used against the per-response byte cap
    pub fn size_bytes(&self) -> usize {
        match self {
            AttributeValue::S(s) => s.len(),
            AttributeValue::N(n) => n.len().div_ceil(2) + 1,
            AttributeValue::B(b) => b.len(),
            AttributeValue::Bool(_) | AttributeValue::Null => 1,
            AttributeValue::L(values) => 3 + values.iter().map(|v| 1 + v.size_bytes()).sum::<usize>(),
            AttributeValue::M(map) => {
                3 + map
                    .iter()
                    .map(|(k, v)| 1 + k.len() + v.size_bytes())
                    .sum::<usize>()
            }
        }
    }

    /// Stable string form; equal values always produce equal strings
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            AttributeValue::S(s) => {
                out.push_str("S:");
                write_quoted(out, s);
            }
            AttributeValue::N(n) => {
                out.push_str("N:");
                out.push_str(n);
            }
            AttributeValue::Bool(b) => {
                let _ = write!(out, "BOOL:{}", b);
            }
            AttributeValue::B(bytes) => {
                out.push_str("B:");
                write_hex(out, bytes);
            }
            AttributeValue::L(values) => {
                out.push_str("L:[");
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    v.write_canonical(out);
                }
                out.push(']');
            }
            AttributeValue::M(map) => {
                out.push_str("M:");
                write_canonical_map(out, map);
            }
            AttributeValue::Null => out.push_str("NULL"),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            AttributeValue::S(s) => Value::String(s.clone()),
            AttributeValue::N(n) => {
                if let Ok(i) = n.parse::<i64>() {
                    Value::from(i)
                } else if let Ok(u) = n.parse::<u64>() {
                    Value::from(u)
                } else {
                    n.parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or_else(|| Value::String(n.clone()))
                }
            }
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::B(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            AttributeValue::L(values) => Value::Array(values.iter().map(|v| v.to_json()).collect()),
            AttributeValue::M(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            AttributeValue::Null => Value::Null,
        }
    }

    fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::String(s) => AttributeValue::S(s),
            Value::Number(n) => AttributeValue::N(n.to_string()),
            Value::Bool(b) => AttributeValue::Bool(b),
            Value::Null => AttributeValue::Null,
            Value::Array(values) => {
                AttributeValue::L(values.into_iter().map(AttributeValue::from_json).collect())
            }
            Value::Object(map) => AttributeValue::M(
                map.into_iter()
                    .map(|(k, v)| (k, AttributeValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Renders the value the way it appears inside an identifier string:
/// scalars bare, containers in canonical form.
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::S(s) => f.write_str(s),
            AttributeValue::N(n) => f.write_str(n),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Null => f.write_str("null"),
            AttributeValue::B(bytes) => {
                let mut out = String::with_capacity(bytes.len() * 2);
                write_hex(&mut out, bytes);
                f.write_str(&out)
            }
            other => f.write_str(&other.canonical_string()),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::S(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::S(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::number(n)
    }
}

impl From<u64> for AttributeValue {
    fn from(n: u64) -> Self {
        AttributeValue::number(n)
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::number(n)
    }
}

impl From<Bytes> for AttributeValue {
    fn from(b: Bytes) -> Self {
        AttributeValue::B(b)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(values: Vec<AttributeValue>) -> Self {
        AttributeValue::L(values)
    }
}

/// A record: attribute name to value, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(BTreeMap<String, AttributeValue>);

impl Item {
    pub fn new() -> Self {
        Item(BTreeMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Keep only the attributes named by `projection`
    pub fn project(&self, projection: &Projection) -> Item {
        Item(
            self.0
                .iter()
                .filter(|(name, _)| projection.contains(name))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Approximate stored size: attribute names plus values
    pub fn size_bytes(&self) -> usize {
        self.0.iter().map(|(k, v)| k.len() + v.size_bytes()).sum()
    }

    /// Stable string form; equal items always produce equal strings
    pub fn canonical_string(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 16);
        write_canonical_map(&mut out, &self.0);
        out
    }
}

impl FromIterator<(String, AttributeValue)> for Item {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Item(iter.into_iter().collect())
    }
}

impl IntoIterator for Item {
    type Item = (String, AttributeValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, AttributeValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<BTreeMap<String, AttributeValue>> for Item {
    fn from(map: BTreeMap<String, AttributeValue>) -> Self {
        Item(map)
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

/// Unmarshal an item into a caller type
pub fn from_item<T: DeserializeOwned>(item: Item) -> Result<T> {
    let object: serde_json::Map<String, serde_json::Value> = item
        .0
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}

/// Unmarshal a sequence of items, failing on the first bad one
pub fn from_items<T: DeserializeOwned>(items: Vec<Item>) -> Result<Vec<T>> {
    items.into_iter().map(from_item).collect()
}

/// Marshal a caller type into an item. The value must serialize to a map.
pub fn to_item<T: Serialize>(value: &T) -> Result<Item> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, AttributeValue::from_json(v)))
            .collect()),
        other => Err(QueryError::Unmarshal(format!(
            "expected a map-like value, got {}",
            other
        ))),
    }
}

fn write_canonical_map(out: &mut String, map: &BTreeMap<String, AttributeValue>) {
    out.push('{');
    for (i, (k, v)) in map.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_quoted(out, k);
        out.push('=');
        v.write_canonical(out);
    }
    out.push('}');
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_hex(out: &mut String, bytes: &[u8]) {
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
}
