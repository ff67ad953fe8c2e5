use coordination::ModelId;

use crate::errors::EnsembleError;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_HF_INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";

/// Credentials and endpoints for the ensemble backends.
///
/// Per-model metadata (timeouts, retries, cost) lives in
/// [`coordination::ModelRegistry`]; this struct only carries what comes from
/// the environment.
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Gemini API key. Required: synthesis always runs on Gemini.
    pub gemini_api_key: Option<String>,
    /// HuggingFace Inference API token, needed by the classifier analyzers.
    pub huggingface_api_key: Option<String>,
    pub gemini_base_url: String,
    pub hf_inference_url: String,
    /// Gemini model override. `None` uses the registry endpoint.
    pub gemini_model: Option<String>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            huggingface_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.into(),
            hf_inference_url: DEFAULT_HF_INFERENCE_URL.into(),
            gemini_model: None,
        }
    }
}

impl EnsembleConfig {
    /// Read configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            huggingface_api_key: non_empty_var("HUGGINGFACE_API_KEY"),
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.into()),
            hf_inference_url: std::env::var("HF_INFERENCE_URL")
                .unwrap_or_else(|_| DEFAULT_HF_INFERENCE_URL.into()),
            gemini_model: non_empty_var("GEMINI_MODEL"),
        }
    }

    pub fn with_gemini_key(mut self, key: impl Into<String>) -> Self {
        self.gemini_api_key = Some(key.into());
        self
    }

    pub fn with_huggingface_key(mut self, key: impl Into<String>) -> Self {
        self.huggingface_api_key = Some(key.into());
        self
    }

    /// Check that every credential needed by `models` is present.
    ///
    /// The Gemini key is always required since synthesis uses it.
    pub fn validate(&self, models: &[ModelId]) -> Result<(), EnsembleError> {
        if self.gemini_api_key.is_none() {
            return Err(EnsembleError::Configuration(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }
        let needs_hf = models.iter().any(|m| *m != ModelId::Gemini);
        if needs_hf && self.huggingface_api_key.is_none() {
            return Err(EnsembleError::Configuration(
                "HUGGINGFACE_API_KEY is not set but classifier models are enabled".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
