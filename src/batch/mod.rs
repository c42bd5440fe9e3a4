//! Batch Mutator
//!
//! Bulk put/delete against one table through a [`BatchWriter`]:
//!
//! 1. Wrap every payload as a put or delete and split the list into chunks of
//!    at most [`MAX_BATCH_SIZE`] operations.
//! 2. Dispatch chunks with bounded concurrency. Chunks are independent; a
//!    failing chunk never cancels or blocks its siblings.
//! 3. Per chunk, resend only the operations the store reported unprocessed,
//!    with backoff, until nothing is left or the retry budget runs out.
//!
//! The mutator never fails as a whole. Leftover unprocessed operations and
//! chunk-level store errors are reported in the returned [`BatchReport`] and
//! the caller decides what to do with them.
//!
//! ## Retry budget
//!
//! Defaults come from [`BatchConfig`] (3 for inserts, 0 for deletes). Any
//! budget, configured or passed explicitly, is clamped to
//! [`MAX_RETRY_BUDGET`]. A chunk makes at most `1 + budget` store calls.

pub mod retry;

pub use retry::RetryConfig;

use crate::config::BatchConfig;
use crate::error::{Result, StoreError};
use crate::io::{ProductionRng, Rng};
use crate::item::{Item, Projection, UniqueIdentifierSpec};
use crate::scan::RegularScanner;
use crate::store::{
    BatchWriter, OperationKind, PageSource, QuerySpec, WriteOperation, MAX_BATCH_SIZE,
};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hard ceiling on any retry budget
pub const MAX_RETRY_BUDGET: u32 = 10;

/// Outcome of one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
    /// Position of the chunk in the input order
    pub chunk: usize,
    /// Operations in the chunk
    pub submitted: usize,
    /// Store calls made for the chunk
    pub attempts: u32,
    /// Operations the store never applied
    pub unprocessed: Vec<WriteOperation>,
    /// Store error that ended the chunk early, if any
    pub error: Option<StoreError>,
}

impl MutationResult {
    pub fn is_complete(&self) -> bool {
        self.unprocessed.is_empty() && self.error.is_none()
    }

    /// Operations the store accepted. A writer that reports more unprocessed
    /// operations than it was sent counts as zero applied.
    pub fn applied(&self) -> usize {
        self.submitted.saturating_sub(self.unprocessed.len())
    }
}

/// Per-chunk outcomes of one `execute` call, in chunk order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub results: Vec<MutationResult>,
}

impl BatchReport {
    /// Every operation applied and no chunk failed
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(MutationResult::is_complete)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn submitted_count(&self) -> usize {
        self.results.iter().map(|r| r.submitted).sum()
    }

    pub fn applied_count(&self) -> usize {
        self.results.iter().map(MutationResult::applied).sum()
    }

    pub fn unprocessed_count(&self) -> usize {
        self.results.iter().map(|r| r.unprocessed.len()).sum()
    }

    pub fn total_attempts(&self) -> u32 {
        self.results.iter().map(|r| r.attempts).sum()
    }

    pub fn unprocessed(&self) -> impl Iterator<Item = &WriteOperation> {
        self.results.iter().flat_map(|r| r.unprocessed.iter())
    }

    pub fn into_unprocessed(self) -> Vec<WriteOperation> {
        self.results
            .into_iter()
            .flat_map(|r| r.unprocessed)
            .collect()
    }

    pub fn errors(&self) -> impl Iterator<Item = &StoreError> {
        self.results.iter().filter_map(|r| r.error.as_ref())
    }
}

/// Chunked, concurrent, partially-retrying bulk writer
pub struct BatchMutator<W: ?Sized, R: Rng = ProductionRng> {
    writer: Arc<W>,
    config: BatchConfig,
    rng: Mutex<R>,
}

impl<W: BatchWriter + ?Sized> BatchMutator<W> {
    pub fn new(writer: Arc<W>, config: BatchConfig) -> Self {
        Self::with_rng(writer, config, ProductionRng::new())
    }
}

impl<W: BatchWriter + ?Sized, R: Rng> BatchMutator<W, R> {
    /// Use `rng` for retry jitter
    pub fn with_rng(writer: Arc<W>, config: BatchConfig, rng: R) -> Self {
        BatchMutator {
            writer,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Default retry budget for `kind`, clamped
    pub fn default_retries(&self, kind: OperationKind) -> u32 {
        let configured = match kind {
            OperationKind::Put => self.config.insert_retries,
            OperationKind::Delete => self.config.delete_retries,
        };
        configured.min(MAX_RETRY_BUDGET)
    }

    /// Apply `payloads` (items for puts, keys for deletes) to `table` with the
    /// default retry budget for `kind`
    pub async fn execute(&self, table: &str, payloads: Vec<Item>, kind: OperationKind) -> BatchReport {
        let retries = self.default_retries(kind);
        self.execute_with_retries(table, payloads, kind, retries).await
    }

    /// As [`execute`](Self::execute) with an explicit budget (still clamped)
    pub async fn execute_with_retries(
        &self,
        table: &str,
        payloads: Vec<Item>,
        kind: OperationKind,
        retries: u32,
    ) -> BatchReport {
        let budget = retries.min(MAX_RETRY_BUDGET);
        let chunk_size = self.config.chunk_size.clamp(1, MAX_BATCH_SIZE);
        let concurrency = self.config.concurrency.max(1);

        let chunks = chunk_operations(payloads, kind, chunk_size);
        if chunks.is_empty() {
            return BatchReport::default();
        }

        debug!(
            "{} {} chunks into {} (budget {}, concurrency {})",
            kind,
            chunks.len(),
            table,
            budget,
            concurrency
        );

        let mut results: Vec<MutationResult> = stream::iter(
            chunks
                .into_iter()
                .enumerate()
                .map(|(index, operations)| self.run_chunk(table, index, operations, budget)),
        )
        .buffer_unordered(concurrency)
        .collect()
        .await;

        results.sort_by_key(|r| r.chunk);
        BatchReport { results }
    }

    /// Put `items` with the insert budget (default 3)
    pub async fn insert_many(&self, table: &str, items: Vec<Item>) -> BatchReport {
        self.execute(table, items, OperationKind::Put).await
    }

    pub async fn insert_many_with_retries(
        &self,
        table: &str,
        items: Vec<Item>,
        retries: u32,
    ) -> BatchReport {
        self.execute_with_retries(table, items, OperationKind::Put, retries)
            .await
    }

    /// Delete `keys` with the delete budget (default 0)
    pub async fn delete_many(&self, table: &str, keys: Vec<Item>) -> BatchReport {
        self.execute(table, keys, OperationKind::Delete).await
    }

    pub async fn delete_many_with_retries(
        &self,
        table: &str,
        keys: Vec<Item>,
        retries: u32,
    ) -> BatchReport {
        self.execute_with_retries(table, keys, OperationKind::Delete, retries)
            .await
    }

    async fn run_chunk(
        &self,
        table: &str,
        index: usize,
        operations: Vec<WriteOperation>,
        budget: u32,
    ) -> MutationResult {
        let submitted = operations.len();
        let mut pending = operations;
        let mut attempts = 0u32;
        let mut retries_left = budget;
        let mut error = None;

        loop {
            attempts += 1;
            match self.writer.batch_write(table, pending.clone()).await {
                Ok(output) => {
                    pending = output.unprocessed;
                    if pending.is_empty() {
                        break;
                    }
                    if retries_left == 0 {
                        warn!(
                            "chunk {} on {}: {} operations unprocessed after {} attempts, giving up",
                            index,
                            table,
                            pending.len(),
                            attempts
                        );
                        break;
                    }
                    warn!(
                        "chunk {} on {}: resending {} unprocessed operations ({} retries left)",
                        index,
                        table,
                        pending.len(),
                        retries_left
                    );
                }
                Err(e) => {
                    let retryable = self.config.retry_transport_errors && e.is_retryable();
                    if !retryable || retries_left == 0 {
                        warn!(
                            "chunk {} on {} failed after {} attempts: {}",
                            index, table, attempts, e
                        );
                        error = Some(e);
                        break;
                    }
                    warn!(
                        "chunk {} on {}: {}, resending ({} retries left)",
                        index, table, e, retries_left
                    );
                }
            }

            let delay = {
                let mut rng = self.rng.lock();
                self.config.retry.delay(budget - retries_left, &mut *rng)
            };
            retries_left -= 1;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        MutationResult {
            chunk: index,
            submitted,
            attempts,
            unprocessed: pending,
            error,
        }
    }
}

impl<W: BatchWriter + PageSource + ?Sized, R: Rng> BatchMutator<W, R> {
    /// Delete every item of the partition `spec` addresses.
    ///
    /// Scans the partition forward reading only the `keys` attributes, then
    /// deletes each key with the delete budget. Scan errors are returned;
    /// delete outcomes are in the report.
    pub async fn purge_partition(
        &self,
        spec: &QuerySpec,
        keys: &UniqueIdentifierSpec,
    ) -> Result<BatchReport> {
        let mut key_spec = spec.clone();
        key_spec.projection = Some(Projection::new(keys.attribute_names()));

        let scanned = RegularScanner::new(self.writer.clone())
            .scan(&key_spec)
            .await?;

        debug!(
            "purging {} items from {} ({} round trips to list keys)",
            scanned.items.len(),
            spec.table,
            scanned.stats.fetches
        );

        Ok(self.delete_many(&spec.table, scanned.items).await)
    }
}

/// Wrap payloads as `kind` operations in chunks of `chunk_size`
fn chunk_operations(payloads: Vec<Item>, kind: OperationKind, chunk_size: usize) -> Vec<Vec<WriteOperation>> {
    let mut chunks = Vec::with_capacity(payloads.len().div_ceil(chunk_size));
    let mut operations = payloads.into_iter().map(|p| kind.wrap(p)).peekable();
    while operations.peek().is_some() {
        chunks.push(operations.by_ref().take(chunk_size).collect());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::simulation::SimulatedRng;
    use crate::store::{BatchWriteOutput, StoreResult};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;

    /// Replays scripted responses: each entry is how many of the submitted
    /// operations come back unprocessed (or an error)
    struct ScriptedWriter {
        script: Mutex<VecDeque<StoreResult<usize>>>,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedWriter {
        fn new(script: Vec<StoreResult<usize>>) -> Arc<Self> {
            Arc::new(ScriptedWriter {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().clone()
        }
    }

    impl BatchWriter for ScriptedWriter {
        fn batch_write<'a>(
            &'a self,
            _table: &'a str,
            mut operations: Vec<WriteOperation>,
        ) -> Pin<Box<dyn Future<Output = StoreResult<BatchWriteOutput>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.lock().push(operations.len());
                let step = self.script.lock().pop_front().unwrap_or(Ok(0));
                let unprocessed = step?.min(operations.len());
                let keep = operations.len() - unprocessed;
                Ok(BatchWriteOutput {
                    unprocessed: operations.split_off(keep),
                })
            })
        }
    }

    fn items(n: usize) -> Vec<Item> {
        (0..n)
            .map(|i| {
                Item::new()
                    .with("hash_key", "hk")
                    .with("range_key", format!("rk-{:04}", i))
            })
            .collect()
    }

    fn mutator(writer: Arc<ScriptedWriter>) -> BatchMutator<ScriptedWriter, SimulatedRng> {
        BatchMutator::with_rng(writer, BatchConfig::test(), SimulatedRng::new(0))
    }

    #[test]
    fn test_chunking_57() {
        let chunks = chunk_operations(items(57), OperationKind::Put, 25);
        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![25, 25, 7]);
        assert!(chunks.iter().flatten().all(|op| op.kind() == OperationKind::Put));
    }

    #[tokio::test]
    async fn test_retries_only_unprocessed() {
        let writer = ScriptedWriter::new(vec![Ok(4), Ok(0)]);
        let report = mutator(writer.clone())
            .insert_many_with_retries("t", items(10), 3)
            .await;

        assert_eq!(writer.calls(), vec![10, 4]);
        assert_eq!(report.len(), 1);
        assert_eq!(report.results[0].attempts, 2);
        assert!(report.is_complete());
        assert_eq!(report.applied_count(), 10);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_reports_leftovers() {
        let writer = ScriptedWriter::new(vec![Ok(5), Ok(3), Ok(2)]);
        let report = mutator(writer.clone())
            .insert_many_with_retries("t", items(10), 2)
            .await;

        assert_eq!(writer.calls(), vec![10, 5, 3]);
        assert_eq!(report.unprocessed_count(), 2);
        assert!(!report.is_complete());
        assert!(report.errors().next().is_none());
    }

    #[tokio::test]
    async fn test_delete_default_budget_is_zero() {
        let writer = ScriptedWriter::new(vec![Ok(3)]);
        let report = mutator(writer.clone()).delete_many("t", items(5)).await;
        assert_eq!(writer.calls(), vec![5]);
        assert_eq!(report.unprocessed_count(), 3);
        assert!(report.unprocessed().all(|op| op.kind() == OperationKind::Delete));
    }

    #[tokio::test]
    async fn test_budget_clamped_to_ceiling() {
        let writer = ScriptedWriter::new(vec![Ok(1); 50]);
        let report = mutator(writer.clone())
            .insert_many_with_retries("t", items(1), 1000)
            .await;
        assert_eq!(writer.calls().len(), 1 + MAX_RETRY_BUDGET as usize);
        assert_eq!(report.results[0].attempts, 1 + MAX_RETRY_BUDGET);
    }

    #[tokio::test]
    async fn test_transport_error_captured_not_retried() {
        let writer = ScriptedWriter::new(vec![Err(StoreError::Transport("reset".into()))]);
        let report = mutator(writer.clone()).insert_many("t", items(3)).await;

        assert_eq!(writer.calls(), vec![3]);
        let result = &report.results[0];
        assert_eq!(result.error, Some(StoreError::Transport("reset".into())));
        assert_eq!(result.unprocessed.len(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_retried_when_enabled() {
        let writer = ScriptedWriter::new(vec![Err(StoreError::Timeout("slow".into())), Ok(0)]);
        let config = BatchConfig {
            retry_transport_errors: true,
            ..BatchConfig::test()
        };
        let report = BatchMutator::with_rng(writer.clone(), config, SimulatedRng::new(0))
            .insert_many("t", items(3))
            .await;
        assert_eq!(writer.calls(), vec![3, 3]);
        assert!(report.is_complete());
    }

    #[test]
    fn test_applied_with_oversized_unprocessed_list() {
        let op = OperationKind::Put.wrap(items(1).remove(0));
        let result = MutationResult {
            chunk: 0,
            submitted: 1,
            attempts: 1,
            unprocessed: vec![op.clone(), op],
            error: None,
        };
        assert_eq!(result.applied(), 0);
        assert!(!result.is_complete());
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let writer = ScriptedWriter::new(vec![]);
        let report = mutator(writer.clone()).insert_many("t", Vec::new()).await;
        assert!(report.is_empty());
        assert!(writer.calls().is_empty());
    }
}
