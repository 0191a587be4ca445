//! Error types for description cache operations
//!
//! Every failure is local to a single cache key: a failed fetch or store
//! operation is reported to the callers of that key and never aborts the
//! sweeper or other in-flight fetches.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the description cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// The content fetcher failed (network error, bad status, malformed page)
    #[error("Fetch error for '{key}': {message}")]
    Fetch { key: String, message: String },

    /// Reading or writing the persistent store failed
    #[error("Store error for '{key}': {message}")]
    Store { key: String, message: String },

    /// A waiter gave up while another caller was still fetching
    #[error("Timed out after {}ms waiting for '{key}'", .waited.as_millis())]
    Timeout { key: String, waited: Duration },

    /// The owning fetch for this key failed; seen by waiters
    #[error("Description for '{0}' could not be fetched")]
    FetchFailed(String),

    /// The operation was aborted by a cancellation request
    #[error("Operation cancelled for '{0}'")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn fetch(key: impl Into<String>, message: impl ToString) -> Self {
        CacheError::Fetch {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn store(key: impl Into<String>, message: impl ToString) -> Self {
        CacheError::Store {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error was caused by a cancellation request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled(_))
    }

    /// Whether the error is a waiter timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::Timeout { .. })
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
