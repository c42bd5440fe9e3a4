//! Configuration
//!
//! Scanner and batch-mutator settings, loadable from TOML:
//!
//! ```toml
//! [scan.strategy]
//! mode = "bidirectional"
//! policy = "identity_map"
//!
//! [scan.identity]
//! primary_key = "hash_key"
//! sort_key = "range_key"
//!
//! [batch]
//! chunk_size = 25
//! concurrency = 100
//! insert_retries = 3
//! delete_retries = 0
//!
//! [batch.retry]
//! initial_delay = 50
//! max_delay = 2000
//! jitter = true
//! ```
//!
//! Every section and field is optional; missing values take their defaults.

use crate::batch::RetryConfig;
use crate::error::{QueryError, Result};
use crate::item::UniqueIdentifierSpec;
use crate::scan::ScanStrategy;
use crate::store::MAX_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub scan: ScanConfig,
    pub batch: BatchConfig,
}

impl OptimizerConfig {
    /// Configuration for tests (fast retries)
    pub fn test() -> Self {
        OptimizerConfig {
            scan: ScanConfig::default(),
            batch: BatchConfig::test(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: OptimizerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            QueryError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.scan.validate()?;
        self.batch.validate()
    }
}

/// Scanner settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Which scanner `scan::query` uses (default: bidirectional, identity map)
    pub strategy: ScanStrategy,
    /// Attributes that identify an item (default: `hash_key` + `range_key`)
    pub identity: UniqueIdentifierSpec,
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.identity.primary_key.is_empty() {
            return Err(QueryError::InvalidConfig(
                "scan.identity.primary_key must not be empty".to_string(),
            ));
        }
        if self.identity.sort_key.as_deref() == Some("") {
            return Err(QueryError::InvalidConfig(
                "scan.identity.sort_key must not be empty when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Batch mutator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Operations per store request, 1..=25 (default: 25)
    pub chunk_size: usize,
    /// Chunks in flight at once (default: 100)
    pub concurrency: usize,
    /// Resends of unprocessed puts (default: 3, clamped to 10)
    pub insert_retries: u32,
    /// Resends of unprocessed deletes (default: 0, clamped to 10)
    pub delete_retries: u32,
    /// Also resend a chunk after a transport error or timeout (default: false)
    pub retry_transport_errors: bool,
    /// Backoff between resends
    pub retry: RetryConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            chunk_size: MAX_BATCH_SIZE,
            concurrency: 100,
            insert_retries: 3,
            delete_retries: 0,
            retry_transport_errors: false,
            retry: RetryConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Configuration for tests (millisecond backoff, no jitter)
    pub fn test() -> Self {
        BatchConfig {
            retry: RetryConfig::test(),
            ..Default::default()
        }
    }

    /// No backoff between resends
    pub fn immediate() -> Self {
        BatchConfig {
            retry: RetryConfig::immediate(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_BATCH_SIZE {
            return Err(QueryError::InvalidConfig(format!(
                "batch.chunk_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.chunk_size
            )));
        }
        if self.concurrency == 0 {
            return Err(QueryError::InvalidConfig(
                "batch.concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(QueryError::InvalidConfig(
                "batch.retry.initial_delay exceeds max_delay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
