//! Key conditions and filter predicates
//!
//! Typed counterparts of the store's key-condition and filter expressions.
//! A key condition narrows which items are read at all; a filter is applied
//! to items after they have been read.

use crate::item::{AttributeValue, Item};
use std::cmp::Ordering;

/// Partition equality plus an optional sort-key range
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub partition_key: String,
    pub partition_value: AttributeValue,
    pub sort_key: Option<SortKeyCondition>,
}

impl KeyCondition {
    pub fn partition(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        KeyCondition {
            partition_key: name.into(),
            partition_value: value.into(),
            sort_key: None,
        }
    }

    pub fn with_sort_key(mut self, name: impl Into<String>, predicate: SortKeyPredicate) -> Self {
        self.sort_key = Some(SortKeyCondition {
            attribute: name.into(),
            predicate,
        });
        self
    }

    /// Whether `item` lies in the addressed partition and sort-key range
    pub fn matches(&self, item: &Item) -> bool {
        let in_partition = item.get(&self.partition_key) == Some(&self.partition_value);
        match &self.sort_key {
            Some(cond) if in_partition => item
                .get(&cond.attribute)
                .is_some_and(|v| cond.predicate.matches(v)),
            _ => in_partition,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKeyCondition {
    pub attribute: String,
    pub predicate: SortKeyPredicate,
}

/// Range predicates the store can apply to a sort key
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyPredicate {
    Eq(AttributeValue),
    Lt(AttributeValue),
    Le(AttributeValue),
    Gt(AttributeValue),
    Ge(AttributeValue),
    /// Inclusive on both ends
    Between(AttributeValue, AttributeValue),
    BeginsWith(String),
}

impl SortKeyPredicate {
    pub fn matches(&self, value: &AttributeValue) -> bool {
        match self {
            SortKeyPredicate::Eq(v) => value.compare(v) == Some(Ordering::Equal),
            SortKeyPredicate::Lt(v) => value.compare(v) == Some(Ordering::Less),
            SortKeyPredicate::Le(v) => {
                matches!(value.compare(v), Some(Ordering::Less | Ordering::Equal))
            }
            SortKeyPredicate::Gt(v) => value.compare(v) == Some(Ordering::Greater),
            SortKeyPredicate::Ge(v) => {
                matches!(value.compare(v), Some(Ordering::Greater | Ordering::Equal))
            }
            SortKeyPredicate::Between(lo, hi) => {
                matches!(value.compare(lo), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(value.compare(hi), Some(Ordering::Less | Ordering::Equal))
            }
            SortKeyPredicate::BeginsWith(prefix) => {
                value.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Post-read predicate over arbitrary attributes
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        attribute: String,
        op: Comparison,
        value: AttributeValue,
    },
    BeginsWith {
        attribute: String,
        prefix: String,
    },
    Exists(String),
    NotExists(String),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(
        attribute: impl Into<String>,
        op: Comparison,
        value: impl Into<AttributeValue>,
    ) -> Self {
        Filter::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn equals(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Filter::compare(attribute, Comparison::Eq, value)
    }

    pub fn gt(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Filter::compare(attribute, Comparison::Gt, value)
    }

    pub fn lt(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Filter::compare(attribute, Comparison::Lt, value)
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Filter::BeginsWith {
            attribute: attribute.into(),
            prefix: prefix.into(),
        }
    }

    pub fn exists(attribute: impl Into<String>) -> Self {
        Filter::Exists(attribute.into())
    }

    pub fn and(self, other: Filter) -> Self {
        Filter::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Filter::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Filter::Compare {
                attribute,
                op,
                value,
            } => {
                let Some(actual) = item.get(attribute) else {
                    // Missing attributes only satisfy "not equal"
                    return *op == Comparison::Ne;
                };
                match op {
                    Comparison::Eq => actual == value,
                    Comparison::Ne => actual != value,
                    Comparison::Lt => actual.compare(value) == Some(Ordering::Less),
                    Comparison::Le => {
                        matches!(actual.compare(value), Some(Ordering::Less | Ordering::Equal))
                    }
                    Comparison::Gt => actual.compare(value) == Some(Ordering::Greater),
                    Comparison::Ge => matches!(
                        actual.compare(value),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                }
            }
            Filter::BeginsWith { attribute, prefix } => item
                .get(attribute)
                .and_then(AttributeValue::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            Filter::Exists(attribute) => item.contains(attribute),
            Filter::NotExists(attribute) => !item.contains(attribute),
            Filter::And(a, b) => a.matches(item) && b.matches(item),
            Filter::Or(a, b) => a.matches(item) || b.matches(item),
            Filter::Not(inner) => !inner.matches(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: i64) -> Item {
        Item::new()
            .with("hash_key", "hk")
            .with("range_key", format!("rk-{:04}", n))
            .with("number", n)
    }

    #[test]
    fn test_key_condition_partition_and_prefix() {
        let cond = KeyCondition::partition("hash_key", "hk")
            .with_sort_key("range_key", SortKeyPredicate::BeginsWith("rk-00".into()));
        assert!(cond.matches(&item(5)));
        assert!(!cond.matches(&item(500)));

        let other = Item::new().with("hash_key", "other").with("range_key", "rk-0001");
        assert!(!cond.matches(&other));
    }

    #[test]
    fn test_sort_key_between_inclusive() {
        let p = SortKeyPredicate::Between(AttributeValue::from(3i64), AttributeValue::from(5i64));
        assert!(p.matches(&AttributeValue::from(3i64)));
        assert!(p.matches(&AttributeValue::from(5i64)));
        assert!(!p.matches(&AttributeValue::from(6i64)));
        assert!(!p.matches(&AttributeValue::from("4")));
    }

    #[test]
    fn test_filter_numeric_comparison() {
        let f = Filter::gt("number", 10i64);
        assert!(f.matches(&item(11)));
        assert!(!f.matches(&item(10)));
        assert!(!f.matches(&Item::new()));
    }

    #[test]
    fn test_filter_combinators() {
        let f = Filter::gt("number", 2i64)
            .and(Filter::lt("number", 5i64))
            .or(Filter::equals("number", 100i64));
        let hits: Vec<i64> = [1, 3, 4, 5, 100].into_iter().filter(|n| f.matches(&item(*n))).collect();
        assert_eq!(hits, vec![3, 4, 100]);

        assert!(Filter::exists("number").matches(&item(1)));
        assert!(Filter::exists("missing").negate().matches(&item(1)));
        assert!(Filter::begins_with("range_key", "rk-").matches(&item(1)));
    }

    #[test]
    fn test_filter_missing_attribute_not_equal() {
        let f = Filter::compare("missing", Comparison::Ne, "x");
        assert!(f.matches(&item(1)));
    }
}
