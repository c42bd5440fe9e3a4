//! Scan Deterministic Simulation Tests
//!
//! Multi-seed runs of the scan/batch harness: random partitions loaded through
//! the batch mutator, scanned with every scanner and policy, and checked
//! against a fault-free reference scan.

use rangescan::buggify::faults;
use rangescan::dst::{run_scan_dst_batch, summarize_scan_dst_batch, ScanDSTConfig, ScanDSTHarness};

// =============================================================================
// Calm Configuration - 50 Seeds
// =============================================================================

#[tokio::test]
async fn test_scan_dst_50_seeds_calm() {
    let results = run_scan_dst_batch(0, 50, ScanDSTConfig::calm).await;
    let summary = summarize_scan_dst_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 50, "All 50 seeds should pass without faults");
    assert!(results.iter().all(|r| r.scan_failures == 0));
}

// =============================================================================
// Throttling - unprocessed operations only
// =============================================================================

#[tokio::test]
async fn test_scan_dst_50_seeds_throttled() {
    let results = run_scan_dst_batch(1000, 50, ScanDSTConfig::throttled).await;
    let summary = summarize_scan_dst_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 50, "Throttling must never break scan equivalence");

    // Resends actually happened
    let injected: u64 = results
        .iter()
        .map(|r| r.store_stats.operations_unprocessed)
        .sum();
    assert!(injected > 0);

    // Every unprocessed reply was an injected fault
    for r in &results {
        let triggered = r
            .fault_stats
            .triggers
            .get(faults::store::UNPROCESSED_OP)
            .copied()
            .unwrap_or(0);
        assert_eq!(triggered, r.store_stats.operations_unprocessed, "seed {}", r.seed);
    }
}

// =============================================================================
// Fault injection - scans may fail, invariants may not
// =============================================================================

#[tokio::test]
async fn test_scan_dst_20_seeds_default_faults() {
    let results = run_scan_dst_batch(2000, 20, ScanDSTConfig::new).await;
    let summary = summarize_scan_dst_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 20, "Injected faults must surface as errors, not wrong results");
}

#[tokio::test]
async fn test_scan_dst_10_seeds_chaos() {
    let results = run_scan_dst_batch(3000, 10, |seed| ScanDSTConfig {
        max_items: 120,
        ..ScanDSTConfig::chaos(seed)
    })
    .await;
    let summary = summarize_scan_dst_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 10, "Chaos may fail scans but never corrupt them");
}

// =============================================================================
// Single-page limits exercise the round bound hardest
// =============================================================================

#[tokio::test]
async fn test_scan_dst_single_item_pages() {
    let results = run_scan_dst_batch(4000, 20, |seed| ScanDSTConfig {
        max_items: 60,
        max_page_limit: 1,
        filter_probability: 0.0,
        ..ScanDSTConfig::calm(seed)
    })
    .await;
    println!("{}", summarize_scan_dst_batch(&results));

    for r in &results {
        assert!(r.is_success(), "seed {}: {:?}", r.seed, r.invariant_violations);
    }
    let saved: u64 = results.iter().map(|r| r.rounds_saved).sum();
    assert!(saved > 0, "Bidirectional scans should save rounds");
}

#[tokio::test]
async fn test_scan_dst_seed_replay() {
    let config = ScanDSTConfig::throttled(777);

    let mut first = ScanDSTHarness::new(config.clone());
    first.run().await;
    let mut second = ScanDSTHarness::new(config);
    second.run().await;

    assert_eq!(first.result().summary(), second.result().summary());
    assert_eq!(first.result().store_stats, second.result().store_stats);
}
