//! BUGGIFY - FoundationDB-Style Fault Injection
//!
//! Every decision point in the simulated store is a potential fault injection
//! site. Decisions are drawn from the caller's [`Rng`](crate::io::Rng), so a
//! failing simulation replays exactly from its seed.
//!
//! # Usage
//!
//! ```ignore
//! use rangescan::buggify::faults;
//!
//! if rangescan::buggify!(&mut rng, faults::store::QUERY_FAIL, 0.05) {
//!     return Err(StoreError::Transport("simulated".into()));
//! }
//! ```
//!
//! Checks and triggers are tallied per thread so a DST run can report how
//! often each fault fired.

pub mod faults;

use std::cell::RefCell;
use std::collections::HashMap;

/// Statistics tracking for fault injection
#[derive(Debug, Clone, Default)]
pub struct BuggifyStats {
    /// Number of times each fault was checked
    pub checks: HashMap<String, u64>,
    /// Number of times each fault was triggered
    pub triggers: HashMap<String, u64>,
}

impl BuggifyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_check(&mut self, fault_id: &str) {
        *self.checks.entry(fault_id.to_string()).or_insert(0) += 1;
    }

    pub fn record_trigger(&mut self, fault_id: &str) {
        *self.triggers.entry(fault_id.to_string()).or_insert(0) += 1;
    }

    pub fn trigger_rate(&self, fault_id: &str) -> f64 {
        let checks = self.checks.get(fault_id).copied().unwrap_or(0);
        let triggers = self.triggers.get(fault_id).copied().unwrap_or(0);
        if checks == 0 {
            0.0
        } else {
            triggers as f64 / checks as f64
        }
    }

    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push("BUGGIFY Statistics:".to_string());

        let mut sorted_faults: Vec<_> = self.checks.keys().collect();
        sorted_faults.sort();

        for fault_id in sorted_faults {
            let checks = self.checks.get(fault_id).copied().unwrap_or(0);
            let triggers = self.triggers.get(fault_id).copied().unwrap_or(0);
            lines.push(format!(
                "  {}: {}/{} ({:.2}%)",
                fault_id,
                triggers,
                checks,
                self.trigger_rate(fault_id) * 100.0
            ));
        }

        lines.join("\n")
    }
}

thread_local! {
    static BUGGIFY_CONTEXT: RefCell<BuggifyContext> = RefCell::new(BuggifyContext::default());
}

#[derive(Debug, Default)]
struct BuggifyContext {
    stats: BuggifyStats,
}

/// Get current buggify stats for the thread
pub fn get_stats() -> BuggifyStats {
    BUGGIFY_CONTEXT.with(|ctx| ctx.borrow().stats.clone())
}

/// Reset stats for the current thread
pub fn reset_stats() {
    BUGGIFY_CONTEXT.with(|ctx| {
        ctx.borrow_mut().stats = BuggifyStats::new();
    });
}

/// Core check - called by the macro. Returns true if the fault should fire.
#[inline]
pub fn should_buggify_with_prob<R: crate::io::Rng>(
    rng: &mut R,
    fault_id: &str,
    probability: f64,
) -> bool {
    BUGGIFY_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();

        ctx.stats.record_check(fault_id);

        if probability <= 0.0 {
            return false;
        }

        let random_value = rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0;
        let triggered = random_value < probability.clamp(0.0, 1.0);

        if triggered {
            ctx.stats.record_trigger(fault_id);
        }

        triggered
    })
}

/// BUGGIFY macro - the main interface for fault injection
#[macro_export]
macro_rules! buggify {
    ($rng:expr, $fault_id:expr, $prob:expr) => {
        $crate::buggify::should_buggify_with_prob($rng, $fault_id, $prob)
    };
}
