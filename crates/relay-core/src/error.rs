use thiserror::Error;

use crate::push::PushError;

/// Failure taxonomy shared by every trigger handler and callable.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("caller is not authenticated")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Push provider or store call failed. Redelivery is left to the
    /// invoking runtime.
    #[error("transient provider failure: {0:#}")]
    TransientProviderFailure(anyhow::Error),

    /// A sweep batch failed; the current run is aborted.
    #[error("sweep batch failed: {0:#}")]
    FatalBatchFailure(anyhow::Error),
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProviderFailure(_))
    }

    /// Kebab-case code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied(_) => "permission-denied",
            Self::NotFound(_) => "not-found",
            Self::InvalidArgument(_) => "invalid-argument",
            Self::AlreadyExists(_) => "already-exists",
            Self::TransientProviderFailure(_) => "unavailable",
            Self::FatalBatchFailure(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(e: anyhow::Error) -> Self {
        Self::TransientProviderFailure(e)
    }
}

impl From<PushError> for RelayError {
    fn from(e: PushError) -> Self {
        Self::TransientProviderFailure(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(RelayError::TransientProviderFailure(anyhow::anyhow!("timeout")).is_retryable());
        assert!(!RelayError::PermissionDenied("domain".into()).is_retryable());
        assert!(!RelayError::FatalBatchFailure(anyhow::anyhow!("disk")).is_retryable());
        assert!(!RelayError::Unauthenticated.is_retryable());
    }

    #[test]
    fn push_errors_surface_as_transient() {
        let err: RelayError = PushError::Malformed("no tokens".into()).into();
        assert!(matches!(err, RelayError::TransientProviderFailure(_)));
        assert_eq!(err.code(), "unavailable");
    }
}
