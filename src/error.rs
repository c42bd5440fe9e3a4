//! Error types
//!
//! `StoreError` is what a store implementation reports at the page/batch
//! boundary. `QueryError` is what the scanners and helpers surface to callers;
//! store failures pass through it unchanged.

use std::fmt;

/// Error reported by a `PageSource` or `BatchWriter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network or protocol failure talking to the store
    Transport(String),
    /// Request did not complete in time
    Timeout(String),
    /// Malformed request (key condition, projection, cursor, batch size)
    Validation(String),
}

impl StoreError {
    /// Transport-level failures may succeed on resend; validation never will
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transport(_) | StoreError::Timeout(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Transport(msg) => write!(f, "Transport error: {}", msg),
            StoreError::Timeout(msg) => write!(f, "Request timed out: {}", msg),
            StoreError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Error surfaced by scanners, the batch mutator and configuration loading
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Store failure, propagated unchanged
    Store(StoreError),
    /// A returned item lacks one of the configured identity attributes
    MissingKeyAttribute { attribute: String, item: String },
    /// The same identifier came back twice from one scan direction, so the
    /// configured identity attributes do not uniquely identify items
    NonUniqueIdentifier { id: String },
    /// Item could not be converted to or from the caller's type
    Unmarshal(String),
    /// Configuration rejected by `validate()` or failed to parse
    InvalidConfig(String),
}

impl QueryError {
    /// The underlying store error, if this is one
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            QueryError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Store(e) => write!(f, "{}", e),
            QueryError::MissingKeyAttribute { attribute, item } => write!(
                f,
                "Item is missing identity attribute '{}': {}",
                attribute, item
            ),
            QueryError::NonUniqueIdentifier { id } => write!(
                f,
                "Identifier '{}' returned twice by one scan direction; identity attributes are not unique",
                id
            ),
            QueryError::Unmarshal(msg) => write!(f, "Unmarshal error: {}", msg),
            QueryError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::Store(e)
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Unmarshal(e.to_string())
    }
}

impl From<toml::de::Error> for QueryError {
    fn from(e: toml::de::Error) -> Self {
        QueryError::InvalidConfig(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Transport("reset".into()).is_retryable());
        assert!(StoreError::Timeout("5s".into()).is_retryable());
        assert!(!StoreError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_store_error_passes_through_unchanged() {
        let inner = StoreError::Transport("connection reset".into());
        let err: QueryError = inner.clone().into();
        assert_eq!(err.store_error(), Some(&inner));
        assert_eq!(err.to_string(), inner.to_string());
    }

    #[test]
    fn test_display_messages() {
        let err = QueryError::MissingKeyAttribute {
            attribute: "range_key".into(),
            item: "{}".into(),
        };
        assert!(err.to_string().contains("range_key"));

        let err = QueryError::NonUniqueIdentifier {
            id: "hash_key:a".into(),
        };
        assert!(err.to_string().contains("hash_key:a"));
    }
}
