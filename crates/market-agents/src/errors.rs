//! Error taxonomy for the ensemble orchestrator with retry classification.
//!
//! Only [`EnsembleError`] ever reaches the caller of the engine. Backend and
//! analyzer errors are absorbed: an analyzer either falls back locally or is
//! marked failed, and synthesis failures become the local fallback answer.
//!
//! ## Retry categories
//!
//! | Category  | Retriable | Typical source                       |
//! |-----------|-----------|--------------------------------------|
//! | Transient | yes       | 5xx, timeout, connection reset       |
//! | RateLimit | yes       | HTTP 429, 503 while a model loads    |
//! | Permanent | no        | 4xx, malformed payload, missing key  |

use std::fmt;

use coordination::ModelId;
use thiserror::Error;

/// Classification used by `call_with_retry` to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Network blip or backend crash. Retry after a short delay.
    Transient,
    /// Provider throttling. Retry with exponential back-off.
    RateLimit,
    /// Retrying cannot help.
    Permanent,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Failure of a single remote inference call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Non-2xx HTTP response.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// No response within the call deadline. The request was aborted.
    #[error("backend {backend} timed out after {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u64 },

    /// Connection or protocol failure before a status was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// 2xx response whose body did not match any known output shape.
    #[error("malformed backend payload: {0}")]
    Malformed(String),

    /// The credential for this backend is not configured.
    #[error("missing credential: {0}")]
    MissingCredential(String),
}

impl BackendError {
    /// Classify this error for retry logic.
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Status { status, .. } => match *status {
                429 | 503 => RetryCategory::RateLimit,
                s if s >= 500 => RetryCategory::Transient,
                _ => RetryCategory::Permanent,
            },
            Self::Timeout { .. } | Self::Transport(_) => RetryCategory::Transient,
            Self::Malformed(_) | Self::MissingCredential(_) => RetryCategory::Permanent,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }
}

/// Failure of one analyzer. Converted into a per-analyzer failure marker by
/// the engine, never surfaced to its caller.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("{model} backend failed: {source}")]
    Backend {
        model: ModelId,
        #[source]
        source: BackendError,
    },
}

impl AnalyzerError {
    pub fn backend(model: ModelId, source: BackendError) -> Self {
        Self::Backend { model, source }
    }
}

/// Errors returned to the caller of `generate_ensemble_response`.
#[derive(Debug, Error)]
pub enum EnsembleError {
    /// A credential required by the enabled analyzers is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The query is empty or otherwise unusable.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = BackendError::Status {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(err.retry_category(), RetryCategory::Transient);
        assert!(err.is_retriable());
    }

    #[test]
    fn throttling_is_rate_limit() {
        for status in [429, 503] {
            let err = BackendError::Status {
                status,
                body: String::new(),
            };
            assert_eq!(err.retry_category(), RetryCategory::RateLimit);
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        let err = BackendError::Status {
            status: 401,
            body: "unauthorized".into(),
        };
        assert!(!err.is_retriable());
        assert!(!BackendError::Malformed("{}".into()).is_retriable());
        assert!(!BackendError::MissingCredential("HUGGINGFACE_API_KEY".into()).is_retriable());
    }

    #[test]
    fn timeout_is_transient() {
        let err = BackendError::Timeout {
            backend: "huggingface:ElKulako/cryptobert".into(),
            timeout_ms: 10_000,
        };
        assert!(matches!(err, BackendError::Timeout { .. }));
        assert_eq!(err.retry_category(), RetryCategory::Transient);
        assert_eq!(
            err.to_string(),
            "backend huggingface:ElKulako/cryptobert timed out after 10000ms"
        );
    }

    #[test]
    fn analyzer_error_names_model() {
        let err = AnalyzerError::backend(ModelId::NewsRoberta, BackendError::Transport("reset".into()));
        assert_eq!(err.to_string(), "newsRoberta backend failed: transport error: reset");
    }
}
