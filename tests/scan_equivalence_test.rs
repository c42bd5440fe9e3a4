//! Scanner Equivalence Tests
//!
//! The bidirectional scanner (both termination policies) must return the same
//! items as the regular scanner, with fewer sequential rounds, and must fail
//! exactly when a page fetch fails.

use ahash::AHashSet;
use rangescan::error::{QueryError, StoreError};
use rangescan::io::simulation::SimulatedRng;
use rangescan::store::{SimulatedStore, SimulatedStoreConfig, StoreResult};
use rangescan::{
    query, unique_id, BatchConfig, BatchMutator, BidirectionalScanner, Cursor, Direction, Filter,
    InMemoryTable, Item, KeyCondition, KeySchema, Page, PageSource, Projection, QuerySpec,
    RegularScanner, ScanConfig, ScanStrategy, SortKeyPredicate, TerminationPolicy,
    UniqueIdentifierSpec,
};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TABLE: &str = "items";

fn new_table() -> InMemoryTable {
    InMemoryTable::new(TABLE, KeySchema::new("hash_key", Some("range_key")))
}

fn item(partition: &str, i: usize, payload_bytes: usize) -> Item {
    Item::new()
        .with("hash_key", partition)
        .with("range_key", format!("rk-{:05}", i))
        .with("description", format!("item number {}", i))
        .with("n", i as u64)
        .with("payload", "p".repeat(payload_bytes))
}

fn partition_spec(partition: &str) -> QuerySpec {
    QuerySpec::new(TABLE, KeyCondition::partition("hash_key", partition))
}

fn ids(items: &[Item]) -> Vec<String> {
    let identity = UniqueIdentifierSpec::default();
    items.iter().map(|i| unique_id(i, &identity).unwrap()).collect()
}

// =============================================================================
// Scenario: 3000 items in one partition
// =============================================================================

#[tokio::test]
async fn test_3000_items_key_projection_no_duplicates() {
    let table = Arc::new(new_table().with_max_page_bytes(64 * 1024));

    let items: Vec<Item> = (0..3000).map(|i| item("hk", i, 1024)).collect();
    let mutator = BatchMutator::new(table.clone(), BatchConfig::test());
    let report = mutator.insert_many(TABLE, items).await;
    assert!(report.is_complete());
    assert_eq!(report.len(), 120);
    assert_eq!(table.partition_len(&"hk".into()), 3000);

    let spec = partition_spec("hk").with_projection(Projection::parse("hash_key, range_key"));
    let out = BidirectionalScanner::new(table.clone()).scan(&spec).await.unwrap();

    assert_eq!(out.len(), 3000);
    let unique: AHashSet<String> = ids(&out.items).into_iter().collect();
    assert_eq!(unique.len(), 3000);
    assert!(out.items.iter().all(|i| i.len() == 2));

    let regular = RegularScanner::new(table).scan(&spec).await.unwrap();
    assert_eq!(regular.items, out.items);
    assert!(out.stats.rounds < regular.stats.rounds);
    assert!(out.stats.rounds <= regular.stats.fetches.div_ceil(2) + 1);
}

// =============================================================================
// Scenario: empty partition
// =============================================================================

#[tokio::test]
async fn test_empty_partition_single_round_trip() {
    let table = new_table();
    table.put_item(item("other", 1, 0)).unwrap();
    let store = Arc::new(SimulatedStore::new(
        Arc::new(table),
        SimulatedRng::new(1),
        SimulatedStoreConfig::no_faults(),
    ));
    let spec = partition_spec("empty");

    let regular = RegularScanner::new(store.clone()).scan(&spec).await.unwrap();
    assert!(regular.is_empty());
    assert_eq!(store.stats().query_attempts, 1);

    for policy in [TerminationPolicy::IdentityMap, TerminationPolicy::Overlap] {
        store.reset_stats();
        let out = BidirectionalScanner::new(store.clone())
            .with_policy(policy)
            .scan(&spec)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(out.stats.rounds, 1);
        assert_eq!(store.stats().query_attempts, 2);
    }
}

// =============================================================================
// Equivalence across page shapes
// =============================================================================

#[tokio::test]
async fn test_equivalence_across_sizes_and_limits() {
    for n in [1usize, 2, 3, 10, 57, 200] {
        let table = Arc::new(new_table());
        for i in 0..n {
            table.put_item(item("hk", i, 16)).unwrap();
        }
        for limit in [1usize, 2, 7, 25, 1000] {
            let spec = partition_spec("hk").with_limit(limit);
            let regular = RegularScanner::new(table.clone()).scan(&spec).await.unwrap();
            assert_eq!(regular.len(), n);

            for policy in [TerminationPolicy::IdentityMap, TerminationPolicy::Overlap] {
                let out = BidirectionalScanner::new(table.clone())
                    .with_policy(policy)
                    .scan(&spec)
                    .await
                    .unwrap();
                assert_eq!(
                    ids(&out.items),
                    ids(&regular.items),
                    "n={} limit={} policy={}",
                    n,
                    limit,
                    policy
                );
            }
        }
    }
}

#[tokio::test]
async fn test_round_bound_item_per_page() {
    for n in 0..40usize {
        let table = Arc::new(new_table());
        for i in 0..n {
            table.put_item(item("hk", i, 0)).unwrap();
        }
        let out = BidirectionalScanner::new(table)
            .scan(&partition_spec("hk").with_limit(1))
            .await
            .unwrap();
        assert_eq!(out.len(), n);
        assert!(
            out.stats.rounds <= n.div_ceil(2) + 1,
            "n={} took {} rounds",
            n,
            out.stats.rounds
        );
    }
}

#[tokio::test]
async fn test_filter_with_empty_pages() {
    let table = Arc::new(new_table());
    for i in 0..100 {
        table.put_item(item("hk", i, 0)).unwrap();
    }
    // Only the middle band survives; most pages come back empty with a cursor
    let spec = partition_spec("hk")
        .with_limit(5)
        .with_filter(Filter::gt("n", 44u64).and(Filter::lt("n", 52u64)));

    let regular = RegularScanner::new(table.clone()).scan(&spec).await.unwrap();
    assert_eq!(regular.len(), 7);

    for policy in [TerminationPolicy::IdentityMap, TerminationPolicy::Overlap] {
        let out = BidirectionalScanner::new(table.clone())
            .with_policy(policy)
            .scan(&spec)
            .await
            .unwrap();
        assert_eq!(out.items, regular.items, "policy={}", policy);
    }
}

#[tokio::test]
async fn test_sort_key_range_is_respected() {
    let table = Arc::new(new_table());
    for i in 0..300 {
        table.put_item(item("hk", i, 0)).unwrap();
    }
    let mut spec = partition_spec("hk").with_limit(10);
    spec.key_condition = spec.key_condition.with_sort_key(
        "range_key",
        SortKeyPredicate::Between("rk-00100".into(), "rk-00149".into()),
    );

    let out = BidirectionalScanner::new(table).scan(&spec).await.unwrap();
    assert_eq!(out.len(), 50);
    assert_eq!(out.items[0].get("range_key").unwrap().to_string(), "rk-00100");
    assert_eq!(out.items[49].get("range_key").unwrap().to_string(), "rk-00149");
}

#[tokio::test]
async fn test_numeric_sort_keys() {
    let table = Arc::new(InMemoryTable::new(TABLE, KeySchema::new("pk", Some("ts"))));
    for ts in [5u64, 100, 20, 3, 1000, 64, 7] {
        table
            .put_item(Item::new().with("pk", "device").with("ts", ts))
            .unwrap();
    }
    let spec = QuerySpec::new(TABLE, KeyCondition::partition("pk", "device")).with_limit(2);
    let out = BidirectionalScanner::new(table)
        .with_identity(UniqueIdentifierSpec::new("pk").with_sort_key("ts"))
        .scan(&spec)
        .await
        .unwrap();

    let order: Vec<f64> = out
        .items
        .iter()
        .map(|i| i.get("ts").unwrap().as_f64().unwrap())
        .collect();
    assert_eq!(order, vec![3.0, 5.0, 7.0, 20.0, 64.0, 100.0, 1000.0]);
}

// =============================================================================
// Projection augmentation
// =============================================================================

#[tokio::test]
async fn test_projection_augmented_on_the_wire() {
    /// Records the projection of every request
    struct Recording {
        inner: InMemoryTable,
        seen: parking_lot::Mutex<Vec<Option<Projection>>>,
    }

    impl PageSource for Recording {
        fn fetch_page<'a>(
            &'a self,
            spec: &'a QuerySpec,
            direction: Direction,
            cursor: Option<&'a Cursor>,
        ) -> Pin<Box<dyn Future<Output = StoreResult<Page>> + Send + 'a>> {
            self.seen.lock().push(spec.projection.clone());
            self.inner.fetch_page(spec, direction, cursor)
        }
    }

    let inner = new_table();
    for i in 0..4 {
        inner.put_item(item("hk", i, 0)).unwrap();
    }
    let source = Arc::new(Recording {
        inner,
        seen: parking_lot::Mutex::new(Vec::new()),
    });

    let spec = partition_spec("hk").with_projection(Projection::parse("description"));
    let out = BidirectionalScanner::new(source.clone()).scan(&spec).await.unwrap();

    let expected = Projection::new(["description", "hash_key", "range_key"]);
    let seen = source.seen.lock().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|p| p.as_ref() == Some(&expected)));

    // Caller's spec untouched, identity attributes visible in the result
    assert_eq!(spec.projection, Some(Projection::parse("description")));
    assert!(out.items.iter().all(|i| i.contains("range_key") && !i.contains("n")));
}

// =============================================================================
// Concurrency: both fetches of a round are in flight together
// =============================================================================

#[tokio::test]
async fn test_round_fetches_overlap() {
    let table = Arc::new(new_table());
    for i in 0..20 {
        table.put_item(item("hk", i, 0)).unwrap();
    }
    let store = Arc::new(SimulatedStore::new(
        table,
        SimulatedRng::new(5),
        SimulatedStoreConfig::latency_only(Duration::from_millis(3)),
    ));
    let spec = partition_spec("hk").with_limit(3);

    RegularScanner::new(store.clone()).scan(&spec).await.unwrap();
    assert_eq!(store.stats().max_in_flight_queries, 1);

    store.reset_stats();
    let out = BidirectionalScanner::new(store.clone()).scan(&spec).await.unwrap();
    assert_eq!(out.len(), 20);
    let stats = store.stats();
    assert_eq!(stats.max_in_flight_queries, 2);
    assert_eq!(stats.query_attempts as usize, out.stats.fetches);
}

// =============================================================================
// Error propagation
// =============================================================================

/// Fails the backward fetch of the given round
struct FailingBackward {
    inner: InMemoryTable,
    fail_on_call: usize,
    backward_calls: AtomicUsize,
}

impl PageSource for FailingBackward {
    fn fetch_page<'a>(
        &'a self,
        spec: &'a QuerySpec,
        direction: Direction,
        cursor: Option<&'a Cursor>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Page>> + Send + 'a>> {
        if direction == Direction::Backward
            && self.backward_calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on_call
        {
            return Box::pin(async { Err(StoreError::Transport("connection reset".into())) });
        }
        self.inner.fetch_page(spec, direction, cursor)
    }
}

#[tokio::test]
async fn test_backward_failure_aborts_scan() {
    let inner = new_table();
    for i in 0..50 {
        inner.put_item(item("hk", i, 0)).unwrap();
    }
    let source = Arc::new(FailingBackward {
        inner,
        fail_on_call: 3,
        backward_calls: AtomicUsize::new(0),
    });

    for policy in [TerminationPolicy::IdentityMap, TerminationPolicy::Overlap] {
        source.backward_calls.store(0, Ordering::SeqCst);
        let err = BidirectionalScanner::new(source.clone())
            .with_policy(policy)
            .scan(&partition_spec("hk").with_limit(5))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::Store(StoreError::Transport("connection reset".into()))
        );
    }
}

#[tokio::test]
async fn test_injected_fault_surfaces_unchanged() {
    let table = new_table();
    table.put_item(item("hk", 0, 0)).unwrap();
    let store = Arc::new(SimulatedStore::new(
        Arc::new(table),
        SimulatedRng::new(9),
        SimulatedStoreConfig {
            query_timeout_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        },
    ));

    let err = RegularScanner::new(store.clone())
        .scan(&partition_spec("hk"))
        .await
        .unwrap_err();
    assert!(matches!(err.store_error(), Some(StoreError::Timeout(_))));

    let err = BidirectionalScanner::new(store)
        .scan(&partition_spec("hk"))
        .await
        .unwrap_err();
    assert!(err.store_error().is_some_and(StoreError::is_retryable));
}

// =============================================================================
// Dispatch and unmarshalling
// =============================================================================

#[derive(Debug, Deserialize, PartialEq)]
struct Record {
    hash_key: String,
    range_key: String,
    description: String,
    n: u64,
}

#[tokio::test]
async fn test_query_dispatch_typed() {
    let table = Arc::new(new_table());
    for i in 0..30 {
        table.put_item(item("hk", i, 0)).unwrap();
    }
    let spec = partition_spec("hk").with_limit(4);

    for strategy in [
        ScanStrategy::Regular,
        ScanStrategy::Bidirectional {
            policy: TerminationPolicy::IdentityMap,
        },
        ScanStrategy::Bidirectional {
            policy: TerminationPolicy::Overlap,
        },
    ] {
        let config = ScanConfig {
            strategy,
            ..ScanConfig::default()
        };
        let records: Vec<Record> = query(table.clone(), &spec, &config)
            .await
            .unwrap()
            .into_typed()
            .unwrap();
        assert_eq!(records.len(), 30);
        assert_eq!(
            records[7],
            Record {
                hash_key: "hk".into(),
                range_key: "rk-00007".into(),
                description: "item number 7".into(),
                n: 7,
            }
        );
    }
}

#[tokio::test]
async fn test_scan_into_unmarshal_error() {
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Wrong {
        n: String,
    }

    let table = Arc::new(new_table());
    table.put_item(item("hk", 1, 0)).unwrap();
    let err = RegularScanner::new(table)
        .scan_into::<Wrong>(&partition_spec("hk"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Unmarshal(_)));
}
