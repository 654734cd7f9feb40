//! Error types for the RGB++ resolver

use thiserror::Error;

/// Main error type for resolution operations.
///
/// Cloneable so a single batch failure can be handed to every caller that
/// was waiting on that batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("{service} returned a malformed response: {message}")]
    UpstreamProtocol { service: String, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Output index {index} out of range for transaction {tx_hash} ({len} outputs)")]
    IndexOutOfRange {
        tx_hash: String,
        index: u32,
        len: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolveError {
    pub fn unavailable(service: impl Into<String>, message: impl ToString) -> Self {
        ResolveError::UpstreamUnavailable {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn protocol(service: impl Into<String>, message: impl ToString) -> Self {
        ResolveError::UpstreamProtocol {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        ResolveError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Check if error is retryable (by a provider, never by the coalescer)
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::UpstreamUnavailable { .. })
    }

    /// Check if the entity was simply absent upstream
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound { .. })
    }

    /// Whether the failure came from an upstream system rather than the caller
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ResolveError::UpstreamUnavailable { .. } | ResolveError::UpstreamProtocol { .. }
        )
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::UpstreamUnavailable { .. } => "upstream_unavailable",
            ResolveError::UpstreamProtocol { .. } => "upstream_protocol",
            ResolveError::NotFound { .. } => "not_found",
            ResolveError::InvalidArgument(_) => "invalid_argument",
            ResolveError::IndexOutOfRange { .. } => "index_out_of_range",
            ResolveError::Config(_) => "config",
            ResolveError::Internal(_) => "internal",
        }
    }

    /// Map a reqwest failure; timeouts and connection errors are transport
    /// failures, body decoding failures are protocol failures.
    pub fn from_http(service: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            ResolveError::protocol(service, err)
        } else {
            ResolveError::unavailable(service, err)
        }
    }
}

/// Result type for resolution operations
pub type ResolveResult<T> = Result<T, ResolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = ResolveError::unavailable("esplora", "connection refused");
        assert!(err.is_retryable());
        assert!(err.is_upstream());
        assert!(!err.is_not_found());

        let err = ResolveError::not_found("ckb transaction", "0xabc");
        assert!(err.is_not_found());
        assert!(!err.is_upstream());
        assert_eq!(err.to_string(), "ckb transaction 0xabc not found");
    }
}
