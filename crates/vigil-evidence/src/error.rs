//! Error types for evidence collection.

use std::time::Duration;

use crate::query::QuerySignature;

/// Provider call errors, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider rate limit hit.
    #[error("throttled: retry after {retry_after:?}")]
    Throttled { retry_after: Option<Duration> },

    /// Network hiccup or 5xx-style failure.
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// Credentials missing, expired or rejected.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Credentials valid but lacking permission for the scope.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// Resource type or scope does not exist.
    #[error("not found: {resource_type}")]
    NotFound { resource_type: String },

    /// Provider answered with something we could not interpret.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
}

impl ProviderError {
    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Transient { .. })
    }

    /// Provider-supplied delay hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Evidence for a query could not be produced.
///
/// Local to the controls that depend on the query: evaluators turn it into an
/// `Error` verdict, the run itself continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("evidence unavailable for {signature} after {attempts} attempt(s): {reason}")]
pub struct EvidenceUnavailable {
    pub signature: QuerySignature,
    pub reason: String,
    pub attempts: u32,
}

impl EvidenceUnavailable {
    pub fn new(signature: QuerySignature, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            signature,
            reason: reason.into(),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Throttled { retry_after: None }.is_retryable());
        assert!(ProviderError::Transient {
            message: "reset".into()
        }
        .is_retryable());

        assert!(!ProviderError::Unauthorized {
            message: "expired".into()
        }
        .is_retryable());
        assert!(!ProviderError::Forbidden {
            message: "no reader role".into()
        }
        .is_retryable());
        assert!(!ProviderError::NotFound {
            resource_type: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_retry_after_only_for_throttle() {
        let hint = Duration::from_secs(2);
        assert_eq!(
            ProviderError::Throttled {
                retry_after: Some(hint)
            }
            .retry_after(),
            Some(hint)
        );
        assert_eq!(
            ProviderError::Transient {
                message: "x".into()
            }
            .retry_after(),
            None
        );
    }
}
