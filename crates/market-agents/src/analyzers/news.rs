use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use coordination::ensemble::SentimentPayload;
use coordination::{AnalysisMethod, AnalyzerPayload, MarketContext, ModelId, ModelResponse};

use super::{aggregate_sentiment, classify_all, Analyzer};
use crate::backend::{BackendId, CallBudget, InferenceBackend};
use crate::errors::{AnalyzerError, BackendError};

/// Headlines classified alongside the query
pub const MAX_HEADLINES: usize = 3;

/// Financial-news RoBERTa over the query and recent headlines.
///
/// Any failed sub-call fails the analyzer; there is no local fallback.
pub struct NewsSentimentAnalyzer {
    backend: Arc<dyn InferenceBackend>,
    backend_id: BackendId,
}

impl NewsSentimentAnalyzer {
    pub fn new(backend: Arc<dyn InferenceBackend>, backend_id: BackendId) -> Self {
        Self {
            backend,
            backend_id,
        }
    }
}

#[async_trait]
impl Analyzer for NewsSentimentAnalyzer {
    fn model(&self) -> ModelId {
        ModelId::NewsRoberta
    }

    async fn analyze(
        &self,
        query: &str,
        context: &MarketContext,
        budget: CallBudget,
    ) -> Result<ModelResponse, AnalyzerError> {
        let start = Instant::now();
        let mut texts = vec![query.trim().to_string()];
        texts.extend(
            context
                .recent_headlines(MAX_HEADLINES)
                .into_iter()
                .map(str::to_string),
        );

        let results = classify_all(self.backend.as_ref(), &self.backend_id, &texts, budget)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, BackendError>>()
            .map_err(|e| AnalyzerError::backend(ModelId::NewsRoberta, e))?;

        let aggregate = aggregate_sentiment(&results).ok_or_else(|| {
            AnalyzerError::backend(
                ModelId::NewsRoberta,
                BackendError::Malformed("no classification results".into()),
            )
        })?;

        Ok(ModelResponse::new(
            ModelId::NewsRoberta,
            aggregate.confidence,
            AnalyzerPayload::Sentiment(SentimentPayload {
                sentiment: aggregate.sentiment,
                scores: aggregate.scores,
                samples: aggregate.samples,
                method: AnalysisMethod::Model,
                keyword_hits: None,
            }),
            start.elapsed().as_millis() as u64,
        ))
    }
}
