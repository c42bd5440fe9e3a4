pub mod io;
pub mod buggify;
pub mod error;
pub mod item;
pub mod store;
pub mod scan;
pub mod batch;
pub mod config;
pub mod dst;

pub use batch::{BatchMutator, BatchReport, MutationResult, RetryConfig, MAX_RETRY_BUDGET};
pub use config::{BatchConfig, OptimizerConfig, ScanConfig};
pub use error::{QueryError, Result, StoreError};
pub use item::{merge_projection, unique_id, AttributeValue, Item, Projection, UniqueIdentifierSpec};
pub use scan::{
    query, query_into, BidirectionalScanner, RegularScanner, ScanOutput, ScanStats, ScanStrategy,
    TerminationPolicy,
};
pub use store::{
    BatchWriteOutput, BatchWriter, Cursor, Direction, Filter, InMemoryTable, KeyCondition,
    KeySchema, OperationKind, Page, PageSource, QuerySpec, SortKeyPredicate, WriteOperation,
};
