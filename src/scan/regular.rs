//! Sequential forward pagination
//!
//! `start -> fetching -> (cursor? fetching : done)`. One page per round trip,
//! each request resuming from the previous response's cursor.

use crate::error::Result;
use crate::scan::{ScanOutput, ScanStats};
use crate::store::{Cursor, Direction, PageSource, QuerySpec};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Forward-only scanner over a [`PageSource`]
pub struct RegularScanner<S: ?Sized> {
    source: Arc<S>,
}

impl<S: PageSource + ?Sized> RegularScanner<S> {
    pub fn new(source: Arc<S>) -> Self {
        RegularScanner { source }
    }

    /// Collect every item matching `spec`, in ascending sort-key order.
    ///
    /// The first page-fetch error is returned unchanged; nothing collected
    /// before it is returned.
    pub async fn scan(&self, spec: &QuerySpec) -> Result<ScanOutput> {
        let mut items = Vec::new();
        let mut stats = ScanStats::default();
        let mut cursor: Option<Cursor> = None;

        loop {
            let page = self
                .source
                .fetch_page(spec, Direction::Forward, cursor.as_ref())
                .await?;

            stats.rounds += 1;
            stats.fetches += 1;
            stats.items_fetched += page.items.len();
            stats.items_scanned += page.scanned_count;
            items.extend(page.items);

            debug!(
                "regular scan round {}: {} items so far, more={}",
                stats.rounds,
                items.len(),
                page.next_cursor.is_some()
            );

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(
            "regular scan of {} done: {} items in {} round trips",
            spec.table,
            items.len(),
            stats.fetches
        );

        Ok(ScanOutput { items, stats })
    }

    /// Scan and unmarshal into the caller's type
    pub async fn scan_into<T: DeserializeOwned>(&self, spec: &QuerySpec) -> Result<Vec<T>> {
        self.scan(spec).await?.into_typed()
    }
}
