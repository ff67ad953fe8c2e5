//! Inference Backend Adapter: uniform call interface to remote models.
//!
//! Every analyzer talks to its model through [`InferenceBackend::call`]. The
//! adapter enforces the per-call deadline and translates HTTP failures into
//! [`BackendError`]; it never retries. Retrying is the analyzer's decision and
//! goes through [`call_with_retry`].

pub mod http;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use coordination::{ClassScore, ModelConfig};
use tracing::warn;

use crate::errors::BackendError;

pub use http::HttpBackend;

/// First back-off delay; doubled after every retry.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Identifies one remote model endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendId {
    /// Gemini `generateContent`, by model name
    Gemini(String),
    /// HuggingFace Inference API, by repository id
    HuggingFace(String),
}

impl BackendId {
    pub fn model(&self) -> &str {
        match self {
            Self::Gemini(m) | Self::HuggingFace(m) => m,
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini(m) => write!(f, "gemini:{m}"),
            Self::HuggingFace(m) => write!(f, "huggingface:{m}"),
        }
    }
}

/// Backend output normalized to the two shapes analyzers consume.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// Free text from a generative model
    Text(String),
    /// Class scores from a classifier, in backend order
    Classes(Vec<ClassScore>),
}

impl RawOutput {
    pub fn into_text(self) -> Result<String, BackendError> {
        match self {
            Self::Text(t) => Ok(t),
            Self::Classes(_) => Err(BackendError::Malformed(
                "expected generated text, got class scores".to_string(),
            )),
        }
    }

    pub fn into_classes(self) -> Result<Vec<ClassScore>, BackendError> {
        match self {
            Self::Classes(c) if !c.is_empty() => Ok(c),
            Self::Classes(_) => Err(BackendError::Malformed(
                "empty classification output".to_string(),
            )),
            Self::Text(_) => Err(BackendError::Malformed(
                "expected class scores, got generated text".to_string(),
            )),
        }
    }
}

/// One remote inference call with a hard deadline.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Call `backend` with `input`. Must give up and abort the request once
    /// `timeout` elapses, returning [`BackendError::Timeout`].
    async fn call(
        &self,
        backend: &BackendId,
        input: &str,
        timeout: Duration,
    ) -> Result<RawOutput, BackendError>;
}

/// Deadline and retry allowance for one analyzer's backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBudget {
    pub timeout: Duration,
    /// Retries after the first attempt
    pub retries: u32,
}

impl CallBudget {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
        }
    }

    /// Lower the timeout to `cap` if it is tighter.
    pub fn capped(mut self, cap: Option<Duration>) -> Self {
        if let Some(cap) = cap {
            self.timeout = self.timeout.min(cap);
        }
        self
    }
}

/// Call a backend, retrying transient and rate-limit failures with
/// exponential back-off.
pub async fn call_with_retry(
    backend: &dyn InferenceBackend,
    id: &BackendId,
    input: &str,
    budget: CallBudget,
) -> Result<RawOutput, BackendError> {
    let mut attempt: u32 = 0;
    loop {
        match backend.call(id, input, budget.timeout).await {
            Ok(output) => return Ok(output),
            Err(e) if e.is_retriable() && attempt < budget.retries => {
                let delay = INITIAL_BACKOFF * 2u32.saturating_pow(attempt);
                warn!(
                    backend = %id,
                    attempt = attempt + 1,
                    category = %e.retry_category(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying backend call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given status a fixed number of times, then succeeds.
    struct Flaky {
        failures: u32,
        status: u16,
        calls: AtomicU32,
    }

    #[async_trait]
    impl InferenceBackend for Flaky {
        async fn call(
            &self,
            _backend: &BackendId,
            _input: &str,
            _timeout: Duration,
        ) -> Result<RawOutput, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(BackendError::Status {
                    status: self.status,
                    body: "unavailable".into(),
                })
            } else {
                Ok(RawOutput::Text("ok".into()))
            }
        }
    }

    fn flaky(failures: u32, status: u16) -> Flaky {
        Flaky {
            failures,
            status,
            calls: AtomicU32::new(0),
        }
    }

    fn budget(retries: u32) -> CallBudget {
        CallBudget {
            timeout: Duration::from_secs(1),
            retries,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let backend = flaky(2, 502);
        let id = BackendId::HuggingFace("ProsusAI/finbert".into());
        let started = tokio::time::Instant::now();

        let out = call_with_retry(&backend, &id, "btc", budget(2)).await.unwrap();

        assert_eq!(out, RawOutput::Text("ok".into()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        // 200ms + 400ms of back-off
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_budget() {
        let backend = flaky(5, 429);
        let id = BackendId::HuggingFace("ElKulako/cryptobert".into());

        let err = call_with_retry(&backend, &id, "btc", budget(1))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Status { status: 429, .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let backend = flaky(1, 401);
        let id = BackendId::Gemini("gemini-1.5-flash".into());

        let err = call_with_retry(&backend, &id, "btc", budget(3))
            .await
            .unwrap_err();

        assert!(!err.is_retriable());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn budget_cap_only_tightens() {
        let b = budget(1);
        assert_eq!(b.capped(Some(Duration::from_millis(500))).timeout, Duration::from_millis(500));
        assert_eq!(b.capped(Some(Duration::from_secs(5))).timeout, Duration::from_secs(1));
        assert_eq!(b.capped(None), b);
    }

    #[test]
    fn raw_output_shape_mismatch_is_malformed() {
        assert!(matches!(
            RawOutput::Text("hi".into()).into_classes(),
            Err(BackendError::Malformed(_))
        ));
        assert!(matches!(
            RawOutput::Classes(vec![]).into_classes(),
            Err(BackendError::Malformed(_))
        ));
        assert!(RawOutput::Classes(vec![]).into_text().is_err());
    }

    #[test]
    fn backend_id_display() {
        assert_eq!(
            BackendId::HuggingFace("ProsusAI/finbert".into()).to_string(),
            "huggingface:ProsusAI/finbert"
        );
        assert_eq!(BackendId::Gemini("gemini-1.5-flash".into()).model(), "gemini-1.5-flash");
    }
}
