//! Bidirectional Meet-in-the-Middle Scanner
//!
//! Each round issues one forward and one backward page fetch for the same
//! query, concurrently, and waits for both before deciding whether to go on.
//!
//! ## Termination policies
//!
//! - [`TerminationPolicy::IdentityMap`]: every returned item is keyed by its
//!   identifier (see [`crate::item::identity`]). An identifier already
//!   collected from the other direction means the frontiers have met. The
//!   scan also stops as soon as either direction runs out of cursor, since
//!   that direction has then seen the whole range by itself.
//! - [`TerminationPolicy::Overlap`]: legacy behavior. Keeps one list per
//!   direction and compares them item by item (full attribute equality,
//!   O(n·m) per round). Stops on the first overlap or once both directions
//!   are exhausted, then deduplicates by canonical item form.
//!
//! ## Projection
//!
//! A restricted projection is widened with the identity attributes before
//! anything is sent to the store. The extra attributes stay in the returned
//! items.
//!
//! ## Result order
//!
//! Forward-collected items followed by backward-collected items reversed,
//! which is ascending sort-key order.

use crate::error::{QueryError, Result};
use crate::item::{merge_projection, unique_id, Item, UniqueIdentifierSpec};
use crate::scan::{ScanOutput, ScanStats};
use crate::store::{Cursor, Direction, Page, PageSource, QuerySpec, StoreResult};
use ahash::{AHashMap, AHashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// How the scanner decides the two directions have covered the range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Identifier collision across directions, or either direction exhausted
    #[default]
    IdentityMap,
    /// Deep-equality overlap between the two lists, or both exhausted
    Overlap,
}

impl std::fmt::Display for TerminationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationPolicy::IdentityMap => f.write_str("identity_map"),
            TerminationPolicy::Overlap => f.write_str("overlap"),
        }
    }
}

/// Per-direction scan state
#[derive(Debug, Default)]
struct Frontier {
    cursor: Option<Cursor>,
    exhausted: bool,
    items: Vec<Item>,
}

impl Frontier {
    fn advance(&mut self, next: Option<Cursor>) {
        self.exhausted = next.is_none();
        self.cursor = next;
    }
}

/// Meet-in-the-middle scanner over a [`PageSource`]
pub struct BidirectionalScanner<S: ?Sized> {
    source: Arc<S>,
    identity: UniqueIdentifierSpec,
    policy: TerminationPolicy,
}

impl<S: PageSource + ?Sized> BidirectionalScanner<S> {
    /// Identity-map policy with `hash_key`/`range_key` identity
    pub fn new(source: Arc<S>) -> Self {
        BidirectionalScanner {
            source,
            identity: UniqueIdentifierSpec::default(),
            policy: TerminationPolicy::default(),
        }
    }

    pub fn with_identity(mut self, identity: UniqueIdentifierSpec) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_policy(mut self, policy: TerminationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn identity(&self) -> &UniqueIdentifierSpec {
        &self.identity
    }

    pub fn policy(&self) -> TerminationPolicy {
        self.policy
    }

    /// The query actually sent to the store: `spec` with its projection (if
    /// any) widened to include the identity attributes
    pub fn effective_spec(&self, spec: &QuerySpec) -> QuerySpec {
        let mut effective = spec.clone();
        if let Some(projection) = &spec.projection {
            effective.projection = Some(merge_projection(projection, &self.identity));
        }
        effective
    }

    /// Collect every item matching `spec`.
    ///
    /// Fails with the first page-fetch error of any round; no partial result
    /// is returned.
    pub async fn scan(&self, spec: &QuerySpec) -> Result<ScanOutput> {
        let spec = self.effective_spec(spec);
        let output = match self.policy {
            TerminationPolicy::IdentityMap => self.scan_identity_map(&spec).await?,
            TerminationPolicy::Overlap => self.scan_overlap(&spec).await?,
        };

        info!(
            "bidirectional scan of {} ({}) done: {} items, {} rounds, {} fetches, {} duplicates",
            spec.table,
            self.policy,
            output.items.len(),
            output.stats.rounds,
            output.stats.fetches,
            output.stats.duplicates
        );

        Ok(output)
    }

    /// Scan and unmarshal into the caller's type
    pub async fn scan_into<T: DeserializeOwned>(&self, spec: &QuerySpec) -> Result<Vec<T>> {
        self.scan(spec).await?.into_typed()
    }

    async fn fetch(
        &self,
        spec: &QuerySpec,
        direction: Direction,
        frontier: &Frontier,
    ) -> StoreResult<Option<Page>> {
        if frontier.exhausted {
            return Ok(None);
        }
        self.source
            .fetch_page(spec, direction, frontier.cursor.as_ref())
            .await
            .map(Some)
    }

    /// One round: both directions in flight together, first error wins
    async fn round(
        &self,
        spec: &QuerySpec,
        forward: &Frontier,
        backward: &Frontier,
    ) -> StoreResult<(Option<Page>, Option<Page>)> {
        futures::future::try_join(
            self.fetch(spec, Direction::Forward, forward),
            self.fetch(spec, Direction::Backward, backward),
        )
        .await
    }

    async fn scan_identity_map(&self, spec: &QuerySpec) -> Result<ScanOutput> {
        let mut stats = ScanStats::default();
        let mut forward = Frontier::default();
        let mut backward = Frontier::default();
        let mut seen: AHashMap<String, Direction> = AHashMap::new();
        let mut middle_reached = false;

        loop {
            let (forward_page, backward_page) = self.round(spec, &forward, &backward).await?;
            stats.rounds += 1;

            for (direction, page) in [
                (Direction::Forward, forward_page),
                (Direction::Backward, backward_page),
            ] {
                let Some(page) = page else {
                    continue;
                };
                let frontier = match direction {
                    Direction::Forward => &mut forward,
                    Direction::Backward => &mut backward,
                };
                stats.fetches += 1;
                stats.items_fetched += page.items.len();
                stats.items_scanned += page.scanned_count;
                frontier.advance(page.next_cursor);

                for item in page.items {
                    let id = unique_id(&item, &self.identity)?;
                    match seen.get(&id) {
                        Some(&from) if from == direction => {
                            return Err(QueryError::NonUniqueIdentifier { id });
                        }
                        Some(_) => {
                            middle_reached = true;
                            stats.duplicates += 1;
                        }
                        None => {
                            seen.insert(id, direction);
                            frontier.items.push(item);
                        }
                    }
                }
            }

            debug!(
                "round {}: {} forward, {} backward, met={}",
                stats.rounds,
                forward.items.len(),
                backward.items.len(),
                middle_reached
            );

            if middle_reached || forward.exhausted || backward.exhausted {
                break;
            }
        }

        Ok(ScanOutput {
            items: assemble(forward.items, backward.items),
            stats,
        })
    }

    async fn scan_overlap(&self, spec: &QuerySpec) -> Result<ScanOutput> {
        let mut stats = ScanStats::default();
        let mut forward = Frontier::default();
        let mut backward = Frontier::default();

        loop {
            let (forward_page, backward_page) = self.round(spec, &forward, &backward).await?;
            stats.rounds += 1;

            for (frontier, page) in [(&mut forward, forward_page), (&mut backward, backward_page)]
            {
                let Some(page) = page else {
                    continue;
                };
                stats.fetches += 1;
                stats.items_fetched += page.items.len();
                stats.items_scanned += page.scanned_count;
                frontier.advance(page.next_cursor);
                frontier.items.extend(page.items);
            }

            let overlap = forward
                .items
                .iter()
                .any(|f| backward.items.iter().any(|b| f == b));

            debug!(
                "round {}: {} forward, {} backward, overlap={}",
                stats.rounds,
                forward.items.len(),
                backward.items.len(),
                overlap
            );

            if overlap || (forward.exhausted && backward.exhausted) {
                break;
            }
        }

        let collected = assemble(forward.items, backward.items);
        let mut keys = AHashSet::with_capacity(collected.len());
        let mut items = Vec::with_capacity(collected.len());
        for item in collected {
            if keys.insert(item.canonical_string()) {
                items.push(item);
            } else {
                stats.duplicates += 1;
            }
        }

        Ok(ScanOutput { items, stats })
    }
}

/// Forward items as collected, then backward items in reverse
fn assemble(mut forward: Vec<Item>, backward: Vec<Item>) -> Vec<Item> {
    forward.reserve(backward.len());
    forward.extend(backward.into_iter().rev());
    forward
}
