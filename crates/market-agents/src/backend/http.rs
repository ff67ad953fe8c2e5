//! reqwest-based backend for Gemini and the HuggingFace Inference API.

use std::time::Duration;

use async_trait::async_trait;
use coordination::ClassScore;
use serde::Deserialize;
use tracing::debug;

use super::{BackendId, InferenceBackend, RawOutput};
use crate::config::EnsembleConfig;
use crate::errors::BackendError;

/// Production [`InferenceBackend`] over HTTPS.
///
/// Deadlines use reqwest's per-request timeout, so an expired call drops the
/// in-flight connection instead of leaving it running in the background.
pub struct HttpBackend {
    client: reqwest::Client,
    config: EnsembleConfig,
}

impl HttpBackend {
    pub fn new(config: EnsembleConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn call_gemini(
        &self,
        id: &BackendId,
        model: &str,
        input: &str,
        timeout: Duration,
    ) -> Result<RawOutput, BackendError> {
        let api_key = self
            .config
            .gemini_api_key
            .as_deref()
            .ok_or_else(|| BackendError::MissingCredential("GEMINI_API_KEY".to_string()))?;

        let request_body = serde_json::json!({
            "contents": [{
                "parts": [{ "text": input }]
            }],
            "generationConfig": {
                "temperature": 0.4,
                "maxOutputTokens": 1024
            }
        });
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.gemini_base_url.trim_end_matches('/'),
            model
        );

        let request = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&request_body);
        let body = send(id, request, timeout).await?;
        parse_gemini_text(&body).map(RawOutput::Text)
    }

    async fn call_huggingface(
        &self,
        id: &BackendId,
        model: &str,
        input: &str,
        timeout: Duration,
    ) -> Result<RawOutput, BackendError> {
        let api_key = self
            .config
            .huggingface_api_key
            .as_deref()
            .ok_or_else(|| BackendError::MissingCredential("HUGGINGFACE_API_KEY".to_string()))?;

        let request_body = serde_json::json!({
            "inputs": input,
            "options": { "wait_for_model": true }
        });
        let url = format!(
            "{}/{}",
            self.config.hf_inference_url.trim_end_matches('/'),
            model
        );

        let request = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request_body);
        let body = send(id, request, timeout).await?;
        parse_huggingface_output(body)
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn call(
        &self,
        backend: &BackendId,
        input: &str,
        timeout: Duration,
    ) -> Result<RawOutput, BackendError> {
        let start = std::time::Instant::now();
        let result = match backend {
            BackendId::Gemini(model) => self.call_gemini(backend, model, input, timeout).await,
            BackendId::HuggingFace(model) => {
                self.call_huggingface(backend, model, input, timeout).await
            }
        };
        debug!(
            backend = %backend,
            ok = result.is_ok(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Backend call finished"
        );
        result
    }
}

async fn send(
    id: &BackendId,
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<serde_json::Value, BackendError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| map_reqwest_error(id, timeout, e))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status { status, body });
    }

    response
        .json()
        .await
        .map_err(|e| map_reqwest_error(id, timeout, e))
}

fn map_reqwest_error(id: &BackendId, timeout: Duration, e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout {
            backend: id.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if e.is_decode() {
        BackendError::Malformed(e.to_string())
    } else {
        BackendError::Transport(e.to_string())
    }
}

/// Extract `candidates[0].content.parts[0].text` from a Gemini response.
pub(crate) fn parse_gemini_text(body: &serde_json::Value) -> Result<String, BackendError> {
    body["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BackendError::Malformed("Gemini response had no candidate text".to_string()))
}

#[derive(Deserialize)]
struct GeneratedText {
    generated_text: String,
}

/// The output shapes the HuggingFace Inference API returns for the tasks we use.
#[derive(Deserialize)]
#[serde(untagged)]
enum HfOutput {
    /// Text classification on a single input: `[[{label, score}, ...]]`
    Nested(Vec<Vec<ClassScore>>),
    /// `[{label, score}, ...]`
    Flat(Vec<ClassScore>),
    /// `{label, score}`
    Single(ClassScore),
    /// Text2text generation: `[{generated_text}]`
    Generated(Vec<GeneratedText>),
}

pub(crate) fn parse_huggingface_output(body: serde_json::Value) -> Result<RawOutput, BackendError> {
    let parsed: HfOutput = serde_json::from_value(body)
        .map_err(|e| BackendError::Malformed(format!("unrecognized HuggingFace output: {e}")))?;
    let output = match parsed {
        HfOutput::Nested(batches) => {
            RawOutput::Classes(batches.into_iter().next().unwrap_or_default())
        }
        HfOutput::Flat(classes) => RawOutput::Classes(classes),
        HfOutput::Single(class) => RawOutput::Classes(vec![class]),
        HfOutput::Generated(generated) => RawOutput::Text(
            generated
                .into_iter()
                .next()
                .map(|g| g.generated_text)
                .unwrap_or_default(),
        ),
    };
    Ok(output)
}
