//! Fault identifiers
//!
//! Named injection points, grouped by the component that checks them.

/// Faults injected by `store::simulated::SimulatedStore`
pub mod store {
    /// Page fetch fails with a transport error
    pub const QUERY_FAIL: &str = "store.query_fail";
    /// Page fetch times out
    pub const QUERY_TIMEOUT: &str = "store.query_timeout";
    /// Whole batch request fails with a transport error
    pub const BATCH_FAIL: &str = "store.batch_fail";
    /// A single operation in a batch is reported back as unprocessed
    pub const UNPROCESSED_OP: &str = "store.unprocessed_op";
}

/// All fault ids, for reporting
pub const ALL_FAULTS: &[&str] = &[
    store::QUERY_FAIL,
    store::QUERY_TIMEOUT,
    store::BATCH_FAIL,
    store::UNPROCESSED_OP,
];
