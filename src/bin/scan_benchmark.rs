//! Scan Benchmark
//!
//! Populates an in-memory table behind a latency-simulating store, then times
//! the regular scanner against both bidirectional policies on a large and a
//! small partition.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | SCAN_BIG_ITEMS | 1000 | Items in the large partition |
//! | SCAN_SMALL_ITEMS | 40 | Items in the small partition |
//! | SCAN_ITEM_BYTES | 16384 | Payload size per item |
//! | SCAN_LATENCY_MS | 20 | Simulated round-trip latency |
//! | SCAN_RUNS | 3 | Timed runs per scanner |
//! | RANGESCAN_CONFIG | (unset) | Optional TOML config for identity and batch settings |
//! | RUST_LOG | info | Log filter |

use rangescan::io::simulation::SimulatedRng;
use rangescan::store::{SimulatedStore, SimulatedStoreConfig};
use rangescan::{
    BatchMutator, BidirectionalScanner, InMemoryTable, Item, KeyCondition, KeySchema,
    OptimizerConfig, PageSource, QuerySpec, RegularScanner, ScanOutput, TerminationPolicy,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TABLE: &str = "scan-benchmark";
const BIG_PARTITION: &str = "hk-big";
const SMALL_PARTITION: &str = "hk-small";

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn make_items(partition: &str, count: usize, payload_bytes: usize) -> Vec<Item> {
    (0..count)
        .map(|i| {
            Item::new()
                .with("hash_key", partition)
                .with("range_key", format!("rk-{:06}", i))
                .with("description", format!("benchmark item {}", i))
                .with("payload", "x".repeat(payload_bytes))
        })
        .collect()
}

async fn time_runs<F, Fut>(runs: usize, mut scan: F) -> rangescan::Result<(Duration, ScanOutput)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = rangescan::Result<ScanOutput>>,
{
    let mut total = Duration::ZERO;
    let mut last = ScanOutput::default();
    for _ in 0..runs.max(1) {
        let start = Instant::now();
        last = scan().await?;
        total += start.elapsed();
    }
    Ok((total / runs.max(1) as u32, last))
}

async fn bench_partition<S: PageSource>(
    store: Arc<S>,
    config: &OptimizerConfig,
    partition: &str,
    runs: usize,
) -> rangescan::Result<()> {
    let spec = QuerySpec::new(TABLE, KeyCondition::partition("hash_key", partition));

    let regular = RegularScanner::new(store.clone());
    let identity_map = BidirectionalScanner::new(store.clone())
        .with_identity(config.scan.identity.clone())
        .with_policy(TerminationPolicy::IdentityMap);
    let overlap = BidirectionalScanner::new(store)
        .with_identity(config.scan.identity.clone())
        .with_policy(TerminationPolicy::Overlap);

    let (regular_time, regular_out) = time_runs(runs, || regular.scan(&spec)).await?;
    let (identity_time, identity_out) = time_runs(runs, || identity_map.scan(&spec)).await?;
    let (overlap_time, overlap_out) = time_runs(runs, || overlap.scan(&spec)).await?;

    println!("Partition {}:", partition);
    for (name, time, out) in [
        ("regular", regular_time, &regular_out),
        ("identity_map", identity_time, &identity_out),
        ("overlap", overlap_time, &overlap_out),
    ] {
        println!(
            "  {:<13} {:>5} items  {:>3} rounds  {:>3} fetches  {:>8.1} ms",
            name,
            out.items.len(),
            out.stats.rounds,
            out.stats.fetches,
            time.as_secs_f64() * 1000.0
        );
    }
    if identity_time > Duration::ZERO {
        println!(
            "  speedup (regular / identity_map): {:.2}x\n",
            regular_time.as_secs_f64() / identity_time.as_secs_f64()
        );
    }

    if regular_out.items != identity_out.items || regular_out.items != overlap_out.items {
        tracing::error!("scanners disagree on partition {}", partition);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let big_items: usize = env_or("SCAN_BIG_ITEMS", 1000);
    let small_items: usize = env_or("SCAN_SMALL_ITEMS", 40);
    let item_bytes: usize = env_or("SCAN_ITEM_BYTES", 16 * 1024);
    let latency_ms: u64 = env_or("SCAN_LATENCY_MS", 20);
    let runs: usize = env_or("SCAN_RUNS", 3);

    let config = match std::env::var("RANGESCAN_CONFIG") {
        Ok(path) => OptimizerConfig::from_file(path)?,
        Err(_) => OptimizerConfig::default(),
    };

    println!("Bidirectional Scan Benchmark");
    println!("============================");
    println!();
    println!("Configuration:");
    println!("  Large partition: {} items", big_items);
    println!("  Small partition: {} items", small_items);
    println!("  Item payload:    {} bytes", item_bytes);
    println!("  Round trip:      {} ms", latency_ms);
    println!("  Runs:            {}", runs);
    println!();

    let table = Arc::new(InMemoryTable::new(
        TABLE,
        KeySchema::new("hash_key", Some("range_key")),
    ));
    let store = Arc::new(SimulatedStore::new(
        table.clone(),
        SimulatedRng::new(0),
        SimulatedStoreConfig::latency_only(Duration::from_millis(latency_ms)),
    ));

    let mutator = BatchMutator::new(table.clone(), config.batch.clone());
    let start = Instant::now();
    let mut report = mutator
        .insert_many(TABLE, make_items(BIG_PARTITION, big_items, item_bytes))
        .await;
    report.results.extend(
        mutator
            .insert_many(TABLE, make_items(SMALL_PARTITION, small_items, item_bytes))
            .await
            .results,
    );
    info!(
        "populated {} items in {} chunks ({:.1} ms), {} unprocessed",
        report.applied_count(),
        report.len(),
        start.elapsed().as_secs_f64() * 1000.0,
        report.unprocessed_count()
    );

    bench_partition(store.clone(), &config, BIG_PARTITION, runs).await?;
    bench_partition(store, &config, SMALL_PARTITION, runs).await?;

    println!("Benchmark complete.");
    Ok(())
}
