//! Item Identity
//!
//! The bidirectional scanner decides that its two frontiers have met when the
//! same identifier shows up from both directions. Identifiers are derived from
//! one or two key attributes:
//!
//! ```text
//! hash_key:<value>                       (primary key only)
//! hash_key:<value>|range_key:<value>     (primary + sort key)
//! ```
//!
//! ## Precondition
//!
//! The configured attributes MUST uniquely identify an item within the
//! partition. If they do not (for example the sort key is omitted on a table
//! that has one), two distinct items can collide across directions and stop
//! the scan early with items missing from the result. Same-direction repeats
//! are detected and rejected by the scanner; cross-direction false collisions
//! cannot be told apart from a genuine meet and are not detected.

use crate::error::{QueryError, Result};
use crate::item::{Item, Projection};
use serde::{Deserialize, Serialize};

/// Names of the attributes that together identify an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueIdentifierSpec {
    pub primary_key: String,
    #[serde(default)]
    pub sort_key: Option<String>,
}

impl Default for UniqueIdentifierSpec {
    fn default() -> Self {
        UniqueIdentifierSpec {
            primary_key: "hash_key".to_string(),
            sort_key: Some("range_key".to_string()),
        }
    }
}

impl UniqueIdentifierSpec {
    /// Identity on the primary key alone
    pub fn new(primary_key: impl Into<String>) -> Self {
        UniqueIdentifierSpec {
            primary_key: primary_key.into(),
            sort_key: None,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_key.as_str()).chain(self.sort_key.as_deref())
    }
}

/// Compute the identifier of `item` under `spec`.
///
/// Depends on the key attributes only, so repeated reads of the same record
/// always produce the same string.
pub fn unique_id(item: &Item, spec: &UniqueIdentifierSpec) -> Result<String> {
    let primary = key_value(item, &spec.primary_key)?;
    let mut id = format!("{}:{}", spec.primary_key, primary);

    if let Some(sort_key) = &spec.sort_key {
        let sort = key_value(item, sort_key)?;
        id.push('|');
        id.push_str(sort_key);
        id.push(':');
        id.push_str(&sort.to_string());
    }

    Ok(id)
}

/// Union of the requested projection and the identity attributes
pub fn merge_projection(requested: &Projection, spec: &UniqueIdentifierSpec) -> Projection {
    let mut merged = requested.clone();
    for name in spec.attribute_names() {
        merged.insert(name);
    }
    merged
}

fn key_value<'a>(item: &'a Item, attribute: &str) -> Result<&'a crate::item::AttributeValue> {
    item.get(attribute)
        .ok_or_else(|| QueryError::MissingKeyAttribute {
            attribute: attribute.to_string(),
            item: item.canonical_string(),
        })
}
