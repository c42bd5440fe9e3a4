//! Deterministic Simulation Testing for Scans and Batch Writes
//!
//! Seeded harness that:
//! - Generates a random partition (size, sort-key type, payload sizes)
//! - Loads it through the batch mutator over a fault-injecting store
//! - Runs the regular scanner and both bidirectional policies with random
//!   page limits, filters and projections
//! - Checks invariants against the fault-free inner table
//!
//! ## Invariants
//!
//! 1. Every operation the batch report counts as applied is in the table, and
//!    nothing it reports unprocessed is.
//! 2. Both bidirectional policies return exactly the items of a regular scan
//!    of the same effective query, in the same order, with no duplicate
//!    identifiers.
//! 3. Without a filter, the identity-map scan finishes within
//!    `ceil(pages / 2) + 1` rounds, where `pages` is the regular page count.
//! 4. A failed scan fails with a transport-level error, never anything else.
//! 5. After a purge, the partition holds exactly the operations the purge
//!    report lists as unprocessed.
//!
//! ```text
//! for seed in 0..1000 {
//!     let mut harness = ScanDSTHarness::new(ScanDSTConfig::new(seed));
//!     harness.run().await;
//!     assert!(harness.result().is_success(), "seed {}", seed);
//! }
//! ```

use crate::batch::{BatchMutator, BatchReport};
use crate::buggify::{self, BuggifyStats};
use crate::config::BatchConfig;
use crate::error::QueryError;
use crate::io::simulation::SimulatedRng;
use crate::io::Rng;
use crate::item::{unique_id, AttributeValue, Item, Projection, UniqueIdentifierSpec};
use crate::scan::{BidirectionalScanner, RegularScanner, ScanOutput, TerminationPolicy};
use crate::store::{
    Filter, InMemoryTable, KeyCondition, KeySchema, OperationKind, QuerySpec, SimulatedStore,
    SimulatedStoreConfig, SimulatedStoreStats,
};
use ahash::AHashSet;
use std::sync::Arc;

const TABLE: &str = "dst";
const MAIN_PARTITION: &str = "hk-main";
const SIDE_PARTITION: &str = "hk-side";

/// Configuration for scan DST
#[derive(Debug, Clone)]
pub struct ScanDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Store fault configuration
    pub store_config: SimulatedStoreConfig,
    /// Batch mutator settings used to load and purge
    pub batch_config: BatchConfig,
    /// Upper bound on items in the scanned partition
    pub max_items: usize,
    /// Upper bound on the per-page item limit
    pub max_page_limit: usize,
    /// Number of random queries to check per run
    pub scans_per_run: usize,
    /// Probability a query carries a filter
    pub filter_probability: f64,
    /// Probability a query carries a projection
    pub projection_probability: f64,
    /// Purge the partition at the end of the run
    pub purge: bool,
}

impl Default for ScanDSTConfig {
    fn default() -> Self {
        ScanDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            batch_config: BatchConfig::immediate(),
            max_items: 300,
            max_page_limit: 40,
            scans_per_run: 4,
            filter_probability: 0.3,
            projection_probability: 0.3,
            purge: true,
        }
    }
}

impl ScanDSTConfig {
    pub fn new(seed: u64) -> Self {
        ScanDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no fault injection
    pub fn calm(seed: u64) -> Self {
        ScanDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            ..Default::default()
        }
    }

    /// Only throttling: batch operations come back unprocessed
    pub fn throttled(seed: u64) -> Self {
        ScanDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::throttled(0.25),
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        ScanDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            ..Default::default()
        }
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct ScanDSTResult {
    /// Seed used
    pub seed: u64,
    /// Items offered to the loader
    pub items_generated: usize,
    /// Items the loader reported applied
    pub items_loaded: usize,
    /// Queries checked
    pub scans_checked: u64,
    /// Scans that failed with an injected store fault
    pub scan_failures: u64,
    /// Rounds saved by the identity-map scanner versus the regular scanner
    pub rounds_saved: u64,
    /// Store fault statistics
    pub store_stats: SimulatedStoreStats,
    /// Fault-injection checks and triggers by fault id
    pub fault_stats: BuggifyStats,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
}

impl ScanDSTResult {
    pub fn new(seed: u64) -> Self {
        ScanDSTResult {
            seed,
            items_generated: 0,
            items_loaded: 0,
            scans_checked: 0,
            scan_failures: 0,
            rounds_saved: 0,
            store_stats: SimulatedStoreStats::default(),
            fault_stats: BuggifyStats::new(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {}/{} items loaded, {} scans checked ({} failed), {} rounds saved, {} violations",
            self.seed,
            self.items_loaded,
            self.items_generated,
            self.scans_checked,
            self.scan_failures,
            self.rounds_saved,
            self.invariant_violations.len()
        )
    }
}

type DSTStore = SimulatedStore<InMemoryTable, SimulatedRng>;

/// Main DST harness for scans and batch writes
pub struct ScanDSTHarness {
    config: ScanDSTConfig,
    rng: SimulatedRng,
    table: Arc<InMemoryTable>,
    store: Arc<DSTStore>,
    mutator: BatchMutator<DSTStore, SimulatedRng>,
    identity: UniqueIdentifierSpec,
    result: ScanDSTResult,
}

impl ScanDSTHarness {
    pub fn new(config: ScanDSTConfig) -> Self {
        let mut rng = SimulatedRng::new(config.seed);
        let schema = KeySchema::new("hash_key", Some("range_key"));
        let identity = schema.identity();
        let table = Arc::new(InMemoryTable::new(TABLE, schema));
        let store = Arc::new(SimulatedStore::new(
            table.clone(),
            rng.fork(),
            config.store_config.clone(),
        ));
        let mutator =
            BatchMutator::with_rng(store.clone(), config.batch_config.clone(), rng.fork());
        let result = ScanDSTResult::new(config.seed);

        ScanDSTHarness {
            config,
            rng,
            table,
            store,
            mutator,
            identity,
            result,
        }
    }

    /// Load, scan and (optionally) purge.
    ///
    /// Fault tallies in `fault_stats` are thread-local, so drive this on a
    /// current-thread runtime (the `#[tokio::test]` default). On a
    /// multi-threaded runtime they miss faults decided on other workers.
    pub async fn run(&mut self) {
        buggify::reset_stats();
        self.load().await;
        for _ in 0..self.config.scans_per_run {
            self.check_random_query().await;
        }
        if self.config.purge {
            self.check_purge().await;
        }
        self.result.store_stats = self.store.stats();
        self.result.fault_stats = buggify::get_stats();
    }

    pub fn result(&self) -> &ScanDSTResult {
        &self.result
    }

    pub fn into_result(self) -> ScanDSTResult {
        self.result
    }

    fn violation(&mut self, message: String) {
        self.result.invariant_violations.push(message);
    }

    fn generate_items(&mut self) -> Vec<Item> {
        let count = self.rng.gen_range(0, self.config.max_items as u64 + 1) as usize;
        let numeric = self.rng.gen_bool(0.5);

        let mut sort_values = AHashSet::with_capacity(count);
        let mut items = Vec::with_capacity(count + 8);
        while sort_values.len() < count {
            let v = self.rng.gen_range(0, 1_000_000);
            if !sort_values.insert(v) {
                continue;
            }
            let range_key = if numeric {
                AttributeValue::from(v)
            } else {
                AttributeValue::from(format!("rk-{:07}", v))
            };
            let payload_len = self.rng.gen_range(0, 64) as usize;
            items.push(
                Item::new()
                    .with("hash_key", MAIN_PARTITION)
                    .with("range_key", range_key)
                    .with("n", v % 100)
                    .with("payload", "x".repeat(payload_len)),
            );
        }

        // Neighbouring partition that no query should ever return
        for i in 0..8u64 {
            let range_key = if numeric {
                AttributeValue::from(i)
            } else {
                AttributeValue::from(format!("rk-{:07}", i))
            };
            items.push(
                Item::new()
                    .with("hash_key", SIDE_PARTITION)
                    .with("range_key", range_key)
                    .with("n", i),
            );
        }

        self.rng.shuffle(&mut items);
        items
    }

    async fn load(&mut self) {
        let items = self.generate_items();
        self.result.items_generated = items.len();

        let report = self.mutator.insert_many(TABLE, items.clone()).await;
        self.result.items_loaded = report.applied_count();

        if report.submitted_count() != items.len() {
            self.violation(format!(
                "loader accounted for {} of {} items",
                report.submitted_count(),
                items.len()
            ));
        }
        self.check_report_against_table(&report, "load");
    }

    /// Invariant 1: applied operations are present, unprocessed ones are not
    fn check_report_against_table(&mut self, report: &BatchReport, phase: &str) {
        let mut problems = Vec::new();
        for op in report.unprocessed() {
            let present = matches!(self.table.get_item(op.payload()), Ok(Some(_)));
            let expected_present = op.kind() == OperationKind::Delete;
            if present != expected_present {
                problems.push(format!(
                    "{}: unprocessed {} of {} was applied anyway",
                    phase,
                    op.kind(),
                    op.payload()
                ));
            }
        }
        if phase == "load" && self.table.len() != report.applied_count() {
            problems.push(format!(
                "load: table holds {} items, report says {} applied",
                self.table.len(),
                report.applied_count()
            ));
        }
        for p in problems {
            self.violation(p);
        }
    }

    fn random_query(&mut self) -> QuerySpec {
        let limit = self.rng.gen_range(1, self.config.max_page_limit as u64 + 1) as usize;
        let mut spec = QuerySpec::new(TABLE, KeyCondition::partition("hash_key", MAIN_PARTITION))
            .with_limit(limit);

        if self.rng.gen_bool(self.config.filter_probability) {
            let threshold = self.rng.gen_range(0, 100);
            spec = spec.with_filter(Filter::gt("n", threshold));
        }
        if self.rng.gen_bool(self.config.projection_probability) {
            spec = spec.with_projection(Projection::parse("n"));
        }
        spec
    }

    /// Fault-free reference: regular scan of the inner table
    async fn reference_scan(&mut self, spec: &QuerySpec) -> Option<ScanOutput> {
        match RegularScanner::new(self.table.clone()).scan(spec).await {
            Ok(out) => Some(out),
            Err(e) => {
                self.violation(format!("reference scan failed: {}", e));
                None
            }
        }
    }

    fn classify_failure(&mut self, label: &str, err: QueryError) {
        match err.store_error() {
            Some(e) if e.is_retryable() => self.result.scan_failures += 1,
            _ => self.violation(format!("{} scan failed with non-transport error: {}", label, err)),
        }
    }

    fn check_unique(&mut self, label: &str, out: &ScanOutput) {
        let mut ids = AHashSet::with_capacity(out.items.len());
        for item in &out.items {
            match unique_id(item, &self.identity) {
                Ok(id) => {
                    if !ids.insert(id.clone()) {
                        self.violation(format!("{}: duplicate identifier {}", label, id));
                    }
                }
                Err(e) => self.violation(format!("{}: {}", label, e)),
            }
        }
    }

    async fn check_random_query(&mut self) {
        let spec = self.random_query();
        self.result.scans_checked += 1;

        let identity_scanner = BidirectionalScanner::new(self.store.clone())
            .with_identity(self.identity.clone())
            .with_policy(TerminationPolicy::IdentityMap);
        let effective = identity_scanner.effective_spec(&spec);

        let Some(reference) = self.reference_scan(&effective).await else {
            return;
        };

        // Regular scanner through the faulty store
        match RegularScanner::new(self.store.clone()).scan(&effective).await {
            Ok(out) => {
                if out.items != reference.items {
                    self.violation(format!(
                        "regular scan returned {} items, reference {}",
                        out.items.len(),
                        reference.items.len()
                    ));
                }
            }
            Err(e) => self.classify_failure("regular", e),
        }

        // Invariants 2 and 3
        match identity_scanner.scan(&spec).await {
            Ok(out) => {
                self.check_unique("identity_map", &out);
                if out.items != reference.items {
                    self.violation(format!(
                        "identity_map scan returned {} items, reference {} (limit {:?})",
                        out.items.len(),
                        reference.items.len(),
                        spec.limit
                    ));
                }
                let pages = reference.stats.fetches;
                if spec.filter.is_none() && out.stats.rounds > pages.div_ceil(2) + 1 {
                    self.violation(format!(
                        "identity_map scan took {} rounds for {} pages",
                        out.stats.rounds, pages
                    ));
                }
                self.result.rounds_saved +=
                    reference.stats.rounds.saturating_sub(out.stats.rounds) as u64;
            }
            Err(e) => self.classify_failure("identity_map", e),
        }

        let overlap_scanner = BidirectionalScanner::new(self.store.clone())
            .with_identity(self.identity.clone())
            .with_policy(TerminationPolicy::Overlap);
        match overlap_scanner.scan(&spec).await {
            Ok(out) => {
                self.check_unique("overlap", &out);
                if out.items != reference.items {
                    self.violation(format!(
                        "overlap scan returned {} items, reference {}",
                        out.items.len(),
                        reference.items.len()
                    ));
                }
            }
            Err(e) => self.classify_failure("overlap", e),
        }
    }

    /// Invariant 5
    async fn check_purge(&mut self) {
        let spec = QuerySpec::new(TABLE, KeyCondition::partition("hash_key", MAIN_PARTITION));
        match self.mutator.purge_partition(&spec, &self.identity).await {
            Ok(report) => {
                let remaining = self
                    .table
                    .partition_len(&AttributeValue::from(MAIN_PARTITION));
                if remaining != report.unprocessed_count() {
                    self.violation(format!(
                        "purge left {} items, report lists {} unprocessed",
                        remaining,
                        report.unprocessed_count()
                    ));
                }
                self.check_report_against_table(&report, "purge");
                if self.table.partition_len(&AttributeValue::from(SIDE_PARTITION)) != 8
                    && self.result.items_loaded == self.result.items_generated
                {
                    self.violation("purge touched a neighbouring partition".to_string());
                }
            }
            Err(e) => self.classify_failure("purge", e),
        }
    }
}

/// Run a batch of DST runs with consecutive seeds
pub async fn run_scan_dst_batch(
    base_seed: u64,
    count: usize,
    config_fn: impl Fn(u64) -> ScanDSTConfig,
) -> Vec<ScanDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = ScanDSTHarness::new(config_fn(seed));
        harness.run().await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_scan_dst_batch(results: &[ScanDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_scans: u64 = results.iter().map(|r| r.scans_checked).sum();
    let total_failures: u64 = results.iter().map(|r| r.scan_failures).sum();
    let total_saved: u64 = results.iter().map(|r| r.rounds_saved).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} scans checked, {} failed under faults, {} rounds saved",
        passed, total, total_scans, total_failures, total_saved
    );

    for fault_id in buggify::faults::ALL_FAULTS {
        let triggers: u64 = results
            .iter()
            .filter_map(|r| r.fault_stats.triggers.get(*fault_id))
            .sum();
        if triggers > 0 {
            summary.push_str(&format!("\n  {}: {} triggered", fault_id, triggers));
        }
    }

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}
