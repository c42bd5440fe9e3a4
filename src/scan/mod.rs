//! Partition Scanners
//!
//! Two ways of reading every item of one partition/sort-key range through a
//! [`PageSource`]:
//!
//! - [`RegularScanner`]: one forward cursor, one round trip after another.
//!   The reference behavior the other scanner is checked against.
//! - [`BidirectionalScanner`]: a forward and a backward cursor fetched
//!   concurrently each round, stopping once the two frontiers meet. Roughly
//!   halves the number of sequential round trips.
//!
//! ## Round model
//!
//! ```text
//! round 1:  [F0 ->]                          [<- B0]
//! round 2:        [F1 ->]              [<- B1]
//! round 3:              [F2 ->][<- B2]          <- identifier seen from both sides
//! ```
//!
//! Both fetches of a round are outstanding at the same time; round n+1 is not
//! issued until both responses of round n are in hand, because each cursor
//! depends on the previous response in its direction.

pub mod bidirectional;
pub mod regular;

pub use bidirectional::{BidirectionalScanner, TerminationPolicy};
pub use regular::RegularScanner;

use crate::config::ScanConfig;
use crate::error::Result;
use crate::item::{from_items, Item};
use crate::store::{PageSource, QuerySpec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which scanner `query` drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScanStrategy {
    /// Sequential forward pagination
    Regular,
    /// Meet-in-the-middle with the given termination policy
    Bidirectional {
        #[serde(default)]
        policy: TerminationPolicy,
    },
}

impl Default for ScanStrategy {
    fn default() -> Self {
        ScanStrategy::Bidirectional {
            policy: TerminationPolicy::IdentityMap,
        }
    }
}

/// Counters collected while scanning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Sequential rounds (a bidirectional round is one round, two fetches)
    pub rounds: usize,
    /// Page fetches issued
    pub fetches: usize,
    /// Items returned by the store before deduplication
    pub items_fetched: usize,
    /// Items the store evaluated, including those a filter dropped
    pub items_scanned: usize,
    /// Items discarded because they were already collected
    pub duplicates: usize,
}

/// Items of a finished scan plus how it got there
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutput {
    pub items: Vec<Item>,
    pub stats: ScanStats,
}

impl ScanOutput {
    /// Unmarshal every item into the caller's type
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        from_items(self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Scan `spec` with the strategy and identity from `config`
pub async fn query<S: PageSource + ?Sized>(
    source: Arc<S>,
    spec: &QuerySpec,
    config: &ScanConfig,
) -> Result<ScanOutput> {
    match config.strategy {
        ScanStrategy::Regular => RegularScanner::new(source).scan(spec).await,
        ScanStrategy::Bidirectional { policy } => {
            BidirectionalScanner::new(source)
                .with_identity(config.identity.clone())
                .with_policy(policy)
                .scan(spec)
                .await
        }
    }
}

/// Typed variant of [`query`]
pub async fn query_into<S: PageSource + ?Sized, T: DeserializeOwned>(
    source: Arc<S>,
    spec: &QuerySpec,
    config: &ScanConfig,
) -> Result<Vec<T>> {
    query(source, spec, config).await?.into_typed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryTable, KeyCondition, KeySchema};

    fn populated(n: usize) -> Arc<InMemoryTable> {
        let table = InMemoryTable::new("t", KeySchema::new("hash_key", Some("range_key")));
        for i in 0..n {
            table
                .put_item(
                    Item::new()
                        .with("hash_key", "hk")
                        .with("range_key", format!("rk-{:04}", i))
                        .with("n", i as i64),
                )
                .unwrap();
        }
        Arc::new(table.with_max_page_bytes(256))
    }

    #[test]
    fn test_strategy_default_is_identity_map() {
        assert_eq!(
            ScanStrategy::default(),
            ScanStrategy::Bidirectional {
                policy: TerminationPolicy::IdentityMap
            }
        );
    }

    #[test]
    fn test_strategy_serde_forms() {
        let regular: ScanStrategy = serde_json::from_str(r#"{"mode":"regular"}"#).unwrap();
        assert_eq!(regular, ScanStrategy::Regular);

        let overlap: ScanStrategy =
            serde_json::from_str(r#"{"mode":"bidirectional","policy":"overlap"}"#).unwrap();
        assert_eq!(
            overlap,
            ScanStrategy::Bidirectional {
                policy: TerminationPolicy::Overlap
            }
        );

        let defaulted: ScanStrategy = serde_json::from_str(r#"{"mode":"bidirectional"}"#).unwrap();
        assert_eq!(defaulted, ScanStrategy::default());
    }

    #[tokio::test]
    async fn test_query_dispatch_same_items() {
        let table = populated(40);
        let spec = QuerySpec::new("t", KeyCondition::partition("hash_key", "hk"));

        let regular = ScanConfig {
            strategy: ScanStrategy::Regular,
            ..ScanConfig::default()
        };
        let a = query(table.clone(), &spec, &regular).await.unwrap();
        let b = query(table.clone(), &spec, &ScanConfig::default()).await.unwrap();

        assert_eq!(a.items, b.items);
        assert!(b.stats.rounds < a.stats.rounds);
    }

    #[tokio::test]
    async fn test_query_into_typed() {
        #[derive(Deserialize)]
        struct Row {
            range_key: String,
            n: i64,
        }

        let table = populated(5);
        let spec = QuerySpec::new("t", KeyCondition::partition("hash_key", "hk"));
        let rows: Vec<Row> = query_into(table, &spec, &ScanConfig::default()).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[3].range_key, "rk-0003");
        assert_eq!(rows[3].n, 3);
    }
}
