//! Simulated Store with Fault Injection
//!
//! DST-compatible wrapper around any `PageSource`/`BatchWriter` that injects
//! latency, transport failures and "unprocessed" batch operations using
//! buggify. Follows FoundationDB patterns for deterministic simulation testing.
//!
//! Also tracks how many page fetches are outstanding at once, which is how the
//! tests check that the bidirectional scanner really overlaps its two fetches.

use crate::buggify::faults::store as faults;
use crate::error::StoreError;
use crate::io::Rng;
use crate::store::{
    BatchWriteOutput, BatchWriter, Cursor, Direction, Page, PageSource, QuerySpec, StoreResult,
    WriteOperation,
};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of a page fetch failing with a transport error
    pub query_fail_prob: f64,
    /// Probability of a page fetch timing out
    pub query_timeout_prob: f64,
    /// Probability of a whole batch request failing
    pub batch_fail_prob: f64,
    /// Probability of each batch operation being reported unprocessed
    pub unprocessed_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            query_fail_prob: 0.01,          // 1%
            query_timeout_prob: 0.005,      // 0.5%
            batch_fail_prob: 0.01,          // 1%
            unprocessed_prob: 0.05,         // 5% per operation
            latency_range_us: (100, 2_000), // 0.1ms - 2ms
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            query_fail_prob: 0.05,
            query_timeout_prob: 0.02,
            batch_fail_prob: 0.05,
            unprocessed_prob: 0.30,
            latency_range_us: (500, 5_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            query_fail_prob: 0.0,
            query_timeout_prob: 0.0,
            batch_fail_prob: 0.0,
            unprocessed_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }

    /// Only throttling: operations come back unprocessed, nothing fails outright
    pub fn throttled(unprocessed_prob: f64) -> Self {
        SimulatedStoreConfig {
            unprocessed_prob,
            ..Self::no_faults()
        }
    }

    /// No faults, fixed round-trip latency
    pub fn latency_only(latency: Duration) -> Self {
        let us = latency.as_micros() as u64;
        SimulatedStoreConfig {
            latency_range_us: (us, us),
            ..Self::no_faults()
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub query_attempts: u64,
    pub query_failures: u64,
    pub query_timeouts: u64,
    pub batch_attempts: u64,
    pub batch_failures: u64,
    pub operations_submitted: u64,
    pub operations_unprocessed: u64,
    /// Peak number of page fetches outstanding at the same time
    pub max_in_flight_queries: usize,
    /// Peak number of batch requests outstanding at the same time
    pub max_in_flight_batches: usize,
}

struct SimulatedStoreInner<R: Rng> {
    rng: R,
    stats: SimulatedStoreStats,
}

/// Simulated store that wraps another store and injects faults
pub struct SimulatedStore<S, R: Rng> {
    inner_store: Arc<S>,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner<R>>>,
    in_flight: Arc<AtomicUsize>,
    batches_in_flight: Arc<AtomicUsize>,
}

impl<S, R: Rng> SimulatedStore<S, R> {
    /// Create a new simulated store with the given RNG
    pub fn new(inner_store: Arc<S>, rng: R, config: SimulatedStoreConfig) -> Self {
        SimulatedStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng,
                stats: SimulatedStoreStats::default(),
            })),
            in_flight: Arc::new(AtomicUsize::new(0)),
            batches_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner_store
    }

    async fn simulate_latency(&self) {
        let (min, max) = self.config.latency_range_us;
        if min == 0 && max == 0 {
            return;
        }
        let latency_us = {
            let mut s = self.state.lock();
            if max > min {
                s.rng.gen_range(min, max)
            } else {
                min
            }
        };
        if latency_us > 0 {
            tokio::time::sleep(Duration::from_micros(latency_us)).await;
        }
    }

    /// Decide a fault while holding the lock only for the decision itself
    fn roll(&self, fault_id: &str, probability: f64) -> bool {
        let mut s = self.state.lock();
        crate::buggify!(&mut s.rng, fault_id, probability)
    }
}

/// Decrements an in-flight counter when a request finishes, however it finishes
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<S: PageSource, R: Rng> PageSource for SimulatedStore<S, R> {
    fn fetch_page<'a>(
        &'a self,
        spec: &'a QuerySpec,
        direction: Direction,
        cursor: Option<&'a Cursor>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Page>> + Send + 'a>> {
        Box::pin(async move {
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlightGuard(self.in_flight.clone());
            {
                let mut s = self.state.lock();
                s.stats.query_attempts += 1;
                s.stats.max_in_flight_queries = s.stats.max_in_flight_queries.max(now_in_flight);
            }

            self.simulate_latency().await;

            if self.roll(faults::QUERY_TIMEOUT, self.config.query_timeout_prob) {
                self.state.lock().stats.query_timeouts += 1;
                return Err(StoreError::Timeout(format!(
                    "simulated timeout on {} page fetch",
                    direction
                )));
            }

            if self.roll(faults::QUERY_FAIL, self.config.query_fail_prob) {
                self.state.lock().stats.query_failures += 1;
                return Err(StoreError::Transport(format!(
                    "simulated connection reset on {} page fetch",
                    direction
                )));
            }

            self.inner_store.fetch_page(spec, direction, cursor).await
        })
    }
}

impl<S: BatchWriter, R: Rng> BatchWriter for SimulatedStore<S, R> {
    fn batch_write<'a>(
        &'a self,
        table: &'a str,
        operations: Vec<WriteOperation>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<BatchWriteOutput>> + Send + 'a>> {
        Box::pin(async move {
            let now_in_flight = self.batches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlightGuard(self.batches_in_flight.clone());
            {
                let mut s = self.state.lock();
                s.stats.batch_attempts += 1;
                s.stats.operations_submitted += operations.len() as u64;
                s.stats.max_in_flight_batches = s.stats.max_in_flight_batches.max(now_in_flight);
            }

            self.simulate_latency().await;

            if self.roll(faults::BATCH_FAIL, self.config.batch_fail_prob) {
                self.state.lock().stats.batch_failures += 1;
                return Err(StoreError::Transport(
                    "simulated batch write failure".to_string(),
                ));
            }

            let (skipped, accepted): (Vec<_>, Vec<_>) = operations
                .into_iter()
                .partition(|_| self.roll(faults::UNPROCESSED_OP, self.config.unprocessed_prob));

            let mut output = if accepted.is_empty() {
                BatchWriteOutput::default()
            } else {
                self.inner_store.batch_write(table, accepted).await?
            };

            self.state.lock().stats.operations_unprocessed += skipped.len() as u64;
            output.unprocessed.extend(skipped);
            Ok(output)
        })
    }
}
