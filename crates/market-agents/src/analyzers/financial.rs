use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use coordination::ensemble::SentimentPayload;
use coordination::{AnalysisMethod, AnalyzerPayload, MarketContext, ModelId, ModelResponse};
use tracing::debug;

use super::{aggregate_sentiment, classify_all, Analyzer};
use crate::backend::{BackendId, CallBudget, InferenceBackend};
use crate::errors::{AnalyzerError, BackendError};

/// FinBERT over the query plus short sentences derived from market context.
///
/// Sub-calls run concurrently. Failed sub-calls are skipped; the analyzer
/// only fails when every sub-call failed.
pub struct FinancialSentimentAnalyzer {
    backend: Arc<dyn InferenceBackend>,
    backend_id: BackendId,
}

impl FinancialSentimentAnalyzer {
    pub fn new(backend: Arc<dyn InferenceBackend>, backend_id: BackendId) -> Self {
        Self {
            backend,
            backend_id,
        }
    }
}

#[async_trait]
impl Analyzer for FinancialSentimentAnalyzer {
    fn model(&self) -> ModelId {
        ModelId::FinBert
    }

    async fn analyze(
        &self,
        query: &str,
        context: &MarketContext,
        budget: CallBudget,
    ) -> Result<ModelResponse, AnalyzerError> {
        let start = Instant::now();
        let mut texts = vec![query.trim().to_string()];
        texts.extend(context_sentences(context));

        let mut succeeded = Vec::with_capacity(texts.len());
        let mut last_error: Option<BackendError> = None;
        for result in classify_all(self.backend.as_ref(), &self.backend_id, &texts, budget).await {
            match result {
                Ok(classes) => succeeded.push(classes),
                Err(e) => {
                    debug!(model = %ModelId::FinBert, error = %e, "Sub-call failed");
                    last_error = Some(e);
                }
            }
        }

        let Some(aggregate) = aggregate_sentiment(&succeeded) else {
            let error = last_error
                .unwrap_or_else(|| BackendError::Malformed("no classification results".into()));
            return Err(AnalyzerError::backend(ModelId::FinBert, error));
        };

        Ok(ModelResponse::new(
            ModelId::FinBert,
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

/// One or two plain sentences describing price movement, e.g.
/// "Bitcoin is up 3.20% in the last 24 hours."
pub(crate) fn context_sentences(context: &MarketContext) -> Vec<String> {
    let mut sentences = Vec::new();
    if let Some(coin) = &context.top_coin {
        sentences.push(format!(
            "{} is {} {:.2}% in the last 24 hours.",
            coin.display_name(),
            direction(coin.price_change_24h),
            coin.price_change_24h.abs()
        ));
    }
    if !context.coins.is_empty() {
        let avg = context.coins.iter().map(|c| c.price_change_24h).sum::<f64>()
            / context.coins.len() as f64;
        sentences.push(format!(
            "The crypto market is {} {:.2}% on average across the top {} coins.",
            direction(avg),
            avg.abs(),
            context.coins.len()
        ));
    }
    sentences
}

fn direction(change: f64) -> &'static str {
    if change < 0.0 {
        "down"
    } else {
        "up"
    }
}
