//! Error types for adobridge
//!
//! Every failure surfaced by the engine falls into one of a small set of
//! categories so callers can decide what to do without string matching:
//! - Lookup failures (unknown connection, recordset or field)
//! - State violations (closed connection, cursor at BOF/EOF)
//! - Lock violations (mutating a read-only recordset)
//! - Pool timeouts (retriable by the caller)
//! - Provider failures (wrapped driver errors tagged with the backend)
//! - Validation failures (malformed connection strings, empty SQL)

use std::fmt;
use thiserror::Error;

use crate::provider::ProviderKind;

/// Result type for adobridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unknown connection, recordset, pool or field
    NotFound,
    /// Entity closed or cursor has no current record
    InvalidState,
    /// Mutation attempted under a read-only lock
    ReadOnly,
    /// Pool acquisition or connection creation timed out (retriable)
    Timeout,
    /// Backend driver or pool construction failure
    ProviderFailure,
    /// Malformed input
    Validation,
    /// Bad engine configuration
    Configuration,
    /// Cache payload could not be (de)serialized
    Serialization,
    /// Capability not offered by a backend
    Unsupported,
}

impl ErrorCategory {
    /// Whether errors in this category are worth retrying by the caller.
    ///
    /// The engine itself never retries.
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Main error type for adobridge
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Entity lookup failed
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation not allowed in the current state
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// Mutation attempted on a read-only recordset
    #[error("read-only: {message}")]
    ReadOnly { message: String },

    /// Timed out waiting on a pool
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Backend failure, tagged with the provider that raised it
    #[error("{provider} provider failure: {message}")]
    ProviderFailure {
        provider: ProviderKind,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed connection string, empty SQL, parameter mismatch
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Cache payload (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidState { .. } => ErrorCategory::InvalidState,
            Self::ReadOnly { .. } => ErrorCategory::ReadOnly,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::ProviderFailure { .. } => ErrorCategory::ProviderFailure,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a not-found error
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a read-only error
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::ReadOnly {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a provider failure without an underlying cause
    pub fn provider(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::ProviderFailure {
            provider,
            message: message.into(),
            source: None,
        }
    }

    /// Create a provider failure wrapping the driver error
    pub fn provider_with_source(
        provider: ProviderKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ProviderFailure {
            provider,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// The provider tag, for provider failures
    pub fn provider_kind(&self) -> Option<ProviderKind> {
        match self {
            Self::ProviderFailure { provider, .. } => Some(*provider),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidState => write!(f, "invalid_state"),
            Self::ReadOnly => write!(f, "read_only"),
            Self::Timeout => write!(f, "timeout"),
            Self::ProviderFailure => write!(f, "provider_failure"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
            Self::Serialization => write!(f, "serialization"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_are_retriable() {
        assert!(ErrorCategory::Timeout.is_retriable());

        assert!(!ErrorCategory::NotFound.is_retriable());
        assert!(!ErrorCategory::ReadOnly.is_retriable());
        assert!(!ErrorCategory::ProviderFailure.is_retriable());
        assert!(!ErrorCategory::Validation.is_retriable());
    }

    #[test]
    fn test_provider_failure_carries_tag_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::provider_with_source(ProviderKind::PostgreSql, "connect failed", io);

        assert_eq!(err.category(), ErrorCategory::ProviderFailure);
        assert_eq!(err.provider_kind(), Some(ProviderKind::PostgreSql));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("PostgreSQL"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::not_found("connection", "abc");
        assert_eq!(err.to_string(), "connection not found: abc");

        let err = Error::invalid_state("no current record");
        assert!(err.to_string().contains("no current record"));
    }
}
