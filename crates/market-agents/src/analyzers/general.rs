use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use coordination::{AnalysisMethod, AnalyzerPayload, MarketContext, ModelId, ModelResponse};
use coordination::ensemble::TextPayload;

use super::Analyzer;
use crate::backend::{call_with_retry, BackendId, CallBudget, InferenceBackend};
use crate::errors::{AnalyzerError, BackendError};

/// Gemini returns prose, not a score, so confidence is a fixed prior.
pub const GENERAL_CONFIDENCE: f64 = 0.85;

/// General reasoning over the query and the full market context.
///
/// Has no local fallback; a backend failure drops Gemini from the ensemble.
pub struct GeneralAnalyzer {
    backend: Arc<dyn InferenceBackend>,
    backend_id: BackendId,
}

impl GeneralAnalyzer {
    pub fn new(backend: Arc<dyn InferenceBackend>, backend_id: BackendId) -> Self {
        Self {
            backend,
            backend_id,
        }
    }
}

#[async_trait]
impl Analyzer for GeneralAnalyzer {
    fn model(&self) -> ModelId {
        ModelId::Gemini
    }

    async fn analyze(
        &self,
        query: &str,
        context: &MarketContext,
        budget: CallBudget,
    ) -> Result<ModelResponse, AnalyzerError> {
        let start = Instant::now();
        let prompt = build_prompt(query, context);

        let text = call_with_retry(self.backend.as_ref(), &self.backend_id, &prompt, budget)
            .await
            .and_then(|out| out.into_text())
            .map_err(|e| AnalyzerError::backend(ModelId::Gemini, e))?;
        let text = text.trim();
        if text.is_empty() {
            return Err(AnalyzerError::backend(
                ModelId::Gemini,
                BackendError::Malformed("empty answer".to_string()),
            ));
        }

        Ok(ModelResponse::new(
            ModelId::Gemini,
            GENERAL_CONFIDENCE,
            AnalyzerPayload::Text(TextPayload {
                text: text.to_string(),
                method: AnalysisMethod::Model,
            }),
            start.elapsed().as_millis() as u64,
        ))
    }
}

pub(crate) fn build_prompt(query: &str, context: &MarketContext) -> String {
    let context_block = if context.is_empty() {
        "No market context was provided.".to_string()
    } else {
        serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string())
    };
    format!(
        "You are a cryptocurrency market analyst. Answer the user's question using the \
         market context below. Cite the figures you rely on and say so when the data is \
         not enough to answer.\n\n\
         ## Market context\n{}\n\n\
         ## Question\n{}",
        context_block,
        query.trim()
    )
}
