//! Store Boundary
//!
//! The scanners and the batch mutator talk to the underlying store through two
//! narrow traits, following the boxed-future style of the object store
//! abstraction this crate grew out of:
//!
//! - [`PageSource`]: one cursor-paginated range-query round trip
//! - [`BatchWriter`]: one batch put/delete round trip, possibly partially applied
//!
//! Implementations:
//! - `memory::InMemoryTable`: sorted reference store for tests and benchmarks
//! - `simulated::SimulatedStore`: fault-injecting, latency-adding wrapper for DST
//!
//! A store handle is injected into every component at construction and must be
//! safe to share across tasks; no component owns or mutates its lifecycle.

pub mod expression;
pub mod memory;
pub mod simulated;

pub use expression::{Comparison, Filter, KeyCondition, SortKeyCondition, SortKeyPredicate};
pub use memory::{InMemoryTable, KeySchema};
pub use simulated::{SimulatedStore, SimulatedStoreConfig, SimulatedStoreStats};

use crate::error::StoreError;
use crate::item::{Item, Projection};
use std::future::Future;
use std::pin::Pin;

/// Maximum number of operations the store accepts in one batch request
pub const MAX_BATCH_SIZE: usize = 25;

/// Default hard cap on the data evaluated per query response (1 MiB)
pub const DEFAULT_MAX_PAGE_BYTES: usize = 1024 * 1024;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Scan direction along the sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending sort-key order
    Forward,
    /// Descending sort-key order
    Backward,
}

impl Direction {
    /// The store's native sort-order flag (`true` = ascending)
    pub fn scan_index_forward(self) -> bool {
        matches!(self, Direction::Forward)
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Backward => f.write_str("backward"),
        }
    }
}

/// Opaque resume position after the last item evaluated in one direction.
///
/// A cursor is only valid for the direction and query that produced it;
/// stores reject a cursor presented with the other direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    direction: Direction,
    key: Item,
}

impl Cursor {
    /// Created by store implementations only; callers pass cursors back as-is
    pub fn new(direction: Direction, key: Item) -> Self {
        Cursor { direction, key }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Key attributes of the last evaluated item
    pub fn key(&self) -> &Item {
        &self.key
    }
}

/// Immutable description of one range query.
///
/// Holds no direction or resume position; those are local to each scan.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    /// Target table
    pub table: String,
    /// Partition equality plus optional sort-key range
    pub key_condition: KeyCondition,
    /// Predicate applied after items are read; non-matching items still count
    /// against the page limits
    pub filter: Option<Filter>,
    /// Attributes to return; `None` returns whole items
    pub projection: Option<Projection>,
    /// Maximum items evaluated per page
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn new(table: impl Into<String>, key_condition: KeyCondition) -> Self {
        QuerySpec {
            table: table.into(),
            key_condition,
            filter: None,
            projection: None,
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One response: the items that survived filtering plus the resume cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    /// `None` means nothing is left in this direction
    pub next_cursor: Option<Cursor>,
    /// Items evaluated before filtering
    pub scanned_count: usize,
}

/// A single batch operation
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// Insert or replace the whole item
    Put(Item),
    /// Remove the item with this key
    Delete(Item),
}

impl WriteOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            WriteOperation::Put(_) => OperationKind::Put,
            WriteOperation::Delete(_) => OperationKind::Delete,
        }
    }

    /// The item (put) or key (delete)
    pub fn payload(&self) -> &Item {
        match self {
            WriteOperation::Put(item) | WriteOperation::Delete(item) => item,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Put,
    Delete,
}

impl OperationKind {
    pub fn wrap(self, payload: Item) -> WriteOperation {
        match self {
            OperationKind::Put => WriteOperation::Put(payload),
            OperationKind::Delete => WriteOperation::Delete(payload),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Put => f.write_str("put"),
            OperationKind::Delete => f.write_str("delete"),
        }
    }
}

/// Outcome of one batch request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteOutput {
    /// Operations the store did not apply; safe to resend
    pub unprocessed: Vec<WriteOperation>,
}

/// One cursor-paginated range-query round trip
pub trait PageSource: Send + Sync + 'static {
    /// Fetch the next page of `spec` in `direction`, resuming after `cursor`.
    ///
    /// Must not mutate `spec`. Transport failures surface as
    /// `StoreError::Transport`/`Timeout`; a malformed spec or a cursor from
    /// the other direction as `StoreError::Validation`.
    fn fetch_page<'a>(
        &'a self,
        spec: &'a QuerySpec,
        direction: Direction,
        cursor: Option<&'a Cursor>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Page>> + Send + 'a>>;
}

/// One batch mutation round trip
pub trait BatchWriter: Send + Sync + 'static {
    /// Apply up to [`MAX_BATCH_SIZE`] operations against `table`.
    ///
    /// A successful response may still list operations the store did not apply.
    fn batch_write<'a>(
        &'a self,
        table: &'a str,
        operations: Vec<WriteOperation>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<BatchWriteOutput>> + Send + 'a>>;
}
