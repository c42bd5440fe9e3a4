//! Result projections

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Set of attribute names a query should return
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Projection(BTreeSet<String>);

impl Projection {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection(
            names
                .into_iter()
                .map(Into::into)
                .filter(|n: &String| !n.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated attribute list such as `"hash_key, range_key"`.
    /// Entries are trimmed; empty entries are dropped.
    pub fn parse(expression: &str) -> Self {
        Projection::new(expression.split(',').map(str::trim))
    }

    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.0.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_and_drops_empty() {
        let p = Projection::parse(" hash_key ,range_key,, description ,");
        assert_eq!(p.len(), 3);
        assert!(p.contains("hash_key"));
        assert!(p.contains("range_key"));
        assert!(p.contains("description"));
    }

    #[test]
    fn test_parse_dedupes() {
        let p = Projection::parse("a, a, b");
        assert_eq!(p.len(), 2);
        assert_eq!(p.to_string(), "a, b");
    }
}
