//! Unified error type for the store
//!
//! Failures never escape the interpreter: operation errors and cancellations
//! are handed to the caller-supplied error mapper and turned back into
//! effects. The remaining variants are surfaced by fallible setup APIs
//! (configuration, building outside a runtime) and by wait helpers.

use std::time::Duration;

/// Unified error type for all store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A suspended operation observed a cooperative cancellation signal
    #[error("Cancelled")]
    Cancelled,

    /// An asynchronous operation failed
    #[error("Operation failed: {message}")]
    Operation {
        /// Error message describing the failure
        message: String,
    },

    /// A wait helper's deadline elapsed before its condition held
    #[error("Timed out after {waited_ms}ms")]
    Timeout {
        /// How long the helper waited, in milliseconds
        waited_ms: u64,
    },

    /// Configuration is invalid or could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// The store was built outside a Tokio runtime
    #[error("No Tokio runtime available")]
    NoRuntime,

    /// The store is deactivated
    #[error("Store is inactive")]
    Inactive,
}

impl StoreError {
    /// Create an operation failure
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error for the given wait duration
    pub fn timeout(waited: Duration) -> Self {
        Self::Timeout {
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether this error is a cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Standard Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::operation(err.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}
