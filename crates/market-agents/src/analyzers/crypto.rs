use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use coordination::ensemble::{KeywordHits, SentimentPayload};
use coordination::{
    AnalysisMethod, AnalyzerPayload, ClassScore, MarketContext, ModelId, ModelResponse, Sentiment,
};
use tracing::warn;

use super::{aggregate_sentiment, Analyzer};
use crate::backend::{call_with_retry, BackendId, CallBudget, InferenceBackend};
use crate::errors::{AnalyzerError, BackendError};

const POSITIVE_WORDS: &[&str] = &[
    "moon", "mooning", "hodl", "bullish", "pump", "pumping", "lambo", "ath", "rally", "gains",
    "wagmi", "surge", "breakout", "green",
];

const NEGATIVE_WORDS: &[&str] = &[
    "dump", "dumping", "crash", "crashing", "bearish", "rekt", "fud", "scam", "rug", "rugpull",
    "ngmi", "selloff", "plunge", "capitulation",
];

/// Confidence of a lexicon verdict never exceeds this.
pub const FALLBACK_CONFIDENCE_CAP: f64 = 0.8;
const FALLBACK_BASE_CONFIDENCE: f64 = 0.5;
const FALLBACK_CONFIDENCE_PER_HIT: f64 = 0.1;

/// CryptoBERT on the query, falling back to a slang lexicon when the
/// backend is unavailable.
pub struct CryptoSentimentAnalyzer {
    backend: Arc<dyn InferenceBackend>,
    backend_id: BackendId,
}

impl CryptoSentimentAnalyzer {
    pub fn new(backend: Arc<dyn InferenceBackend>, backend_id: BackendId) -> Self {
        Self {
            backend,
            backend_id,
        }
    }
}

#[async_trait]
impl Analyzer for CryptoSentimentAnalyzer {
    fn model(&self) -> ModelId {
        ModelId::CryptoBert
    }

    async fn analyze(
        &self,
        query: &str,
        _context: &MarketContext,
        budget: CallBudget,
    ) -> Result<ModelResponse, AnalyzerError> {
        let start = Instant::now();
        let result = call_with_retry(self.backend.as_ref(), &self.backend_id, query, budget)
            .await
            .and_then(|out| out.into_classes());

        let (confidence, payload) = match result {
            Ok(classes) => {
                let aggregate = aggregate_sentiment(std::slice::from_ref(&classes))
                    .ok_or_else(|| {
                        AnalyzerError::backend(
                            ModelId::CryptoBert,
                            BackendError::Malformed("no classification results".into()),
                        )
                    })?;
                (
                    aggregate.confidence,
                    SentimentPayload {
                        sentiment: aggregate.sentiment,
                        scores: aggregate.scores,
                        samples: 1,
                        method: AnalysisMethod::Model,
                        keyword_hits: None,
                    },
                )
            }
            Err(e) => {
                warn!(
                    model = %ModelId::CryptoBert,
                    error = %e,
                    "Backend unavailable, using keyword fallback"
                );
                let verdict = keyword_sentiment(query);
                (
                    verdict.confidence,
                    SentimentPayload {
                        sentiment: verdict.sentiment,
                        scores: vec![ClassScore {
                            label: verdict.sentiment.to_string(),
                            score: verdict.confidence,
                        }],
                        samples: 1,
                        method: AnalysisMethod::LocalFallback,
                        keyword_hits: Some(verdict.hits),
                    },
                )
            }
        };

        Ok(ModelResponse::new(
            ModelId::CryptoBert,
            confidence,
            AnalyzerPayload::Sentiment(payload),
            start.elapsed().as_millis() as u64,
        ))
    }
}

/// Result of the lexicon heuristic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordVerdict {
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub hits: KeywordHits,
}

/// Classify `text` by counting crypto slang words.
///
/// Confidence starts at 0.5 and grows by 0.1 per hit of margin between the
/// positive and negative counts, capped at [`FALLBACK_CONFIDENCE_CAP`]. A tie
/// (including no hits) is neutral at 0.5.
pub fn keyword_sentiment(text: &str) -> KeywordVerdict {
    let lower = text.to_lowercase();
    let mut hits = KeywordHits {
        positive: 0,
        negative: 0,
    };
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        if POSITIVE_WORDS.iter().any(|w| *w == word) {
            hits.positive += 1;
        } else if NEGATIVE_WORDS.iter().any(|w| *w == word) {
            hits.negative += 1;
        }
    }

    let margin = hits.positive.abs_diff(hits.negative);
    let sentiment = match hits.positive.cmp(&hits.negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    };
    let confidence = (FALLBACK_BASE_CONFIDENCE + FALLBACK_CONFIDENCE_PER_HIT * margin as f64)
        .min(FALLBACK_CONFIDENCE_CAP);

    KeywordVerdict {
        sentiment,
        confidence,
        hits,
    }
}
