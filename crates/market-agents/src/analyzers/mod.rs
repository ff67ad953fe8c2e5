//! Model Analyzers: one per ensemble model.
//!
//! Each analyzer turns a query plus [`MarketContext`] into a [`ModelResponse`].
//! Analyzers with a local fallback (crypto sentiment, technical patterns) only
//! fail on programming errors; the others surface backend failures so the
//! engine can drop them from the ensemble.
//!
//! | Analyzer  | Backend                 | Fallback                      |
//! |-----------|-------------------------|-------------------------------|
//! | general   | Gemini                  | none (essential)              |
//! | financial | FinBERT                 | none, tolerates partial calls |
//! | crypto    | CryptoBERT              | slang lexicon                 |
//! | news      | financial-news RoBERTa  | none                          |
//! | technical | flan-t5                 | rule-based trend/volume       |

pub mod crypto;
pub mod financial;
pub mod general;
pub mod news;
pub mod technical;

use std::sync::Arc;

use async_trait::async_trait;
use coordination::{ClassScore, MarketContext, ModelId, ModelRegistry, ModelResponse, Sentiment};
use futures::future::join_all;

use crate::backend::{call_with_retry, BackendId, CallBudget, InferenceBackend};
use crate::config::EnsembleConfig;
use crate::errors::{AnalyzerError, BackendError};

pub use crypto::CryptoSentimentAnalyzer;
pub use financial::FinancialSentimentAnalyzer;
pub use general::GeneralAnalyzer;
pub use news::NewsSentimentAnalyzer;
pub use technical::TechnicalAnalyzer;

/// One ensemble member.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// The model this analyzer reports as
    fn model(&self) -> ModelId;

    async fn analyze(
        &self,
        query: &str,
        context: &MarketContext,
        budget: CallBudget,
    ) -> Result<ModelResponse, AnalyzerError>;
}

/// Backend endpoint for a model. `GEMINI_MODEL` overrides the Gemini entry;
/// everything else comes from the registry endpoint.
pub fn backend_id_for(model: ModelId, config: &EnsembleConfig, registry: &ModelRegistry) -> BackendId {
    let endpoint = || {
        registry
            .config(model)
            .endpoint
            .clone()
            .unwrap_or_else(|| model.as_str().to_string())
    };
    match model {
        ModelId::Gemini => BackendId::Gemini(config.gemini_model.clone().unwrap_or_else(endpoint)),
        _ => BackendId::HuggingFace(endpoint()),
    }
}

/// Build all five analyzers on top of one backend.
pub fn default_analyzers(
    config: &EnsembleConfig,
    registry: &ModelRegistry,
    backend: Arc<dyn InferenceBackend>,
) -> Vec<Arc<dyn Analyzer>> {
    let id = |m| backend_id_for(m, config, registry);
    vec![
        Arc::new(GeneralAnalyzer::new(backend.clone(), id(ModelId::Gemini))),
        Arc::new(FinancialSentimentAnalyzer::new(
            backend.clone(),
            id(ModelId::FinBert),
        )),
        Arc::new(CryptoSentimentAnalyzer::new(
            backend.clone(),
            id(ModelId::CryptoBert),
        )),
        Arc::new(NewsSentimentAnalyzer::new(
            backend.clone(),
            id(ModelId::NewsRoberta),
        )),
        Arc::new(TechnicalAnalyzer::new(backend, id(ModelId::TechnicalAnalyzer))),
    ]
}

// ===== Classification helpers =====

/// Highest-scoring class
pub(crate) fn top_class(classes: &[ClassScore]) -> Option<&ClassScore> {
    classes.iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Classify several texts concurrently against one backend.
pub(crate) async fn classify_all(
    backend: &dyn InferenceBackend,
    id: &BackendId,
    texts: &[String],
    budget: CallBudget,
) -> Vec<Result<Vec<ClassScore>, BackendError>> {
    let calls = texts.iter().map(|text| async move {
        call_with_retry(backend, id, text, budget)
            .await
            .and_then(|out| out.into_classes())
    });
    join_all(calls).await
}

/// Sentiment aggregated over several classification sub-calls.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AggregatedSentiment {
    pub sentiment: Sentiment,
    /// Average of each sub-call's top score
    pub confidence: f64,
    /// Mean score per normalized sentiment label
    pub scores: Vec<ClassScore>,
    pub samples: usize,
}

/// Merge classifier outputs. Labels are normalized before averaging so
/// `LABEL_2`, `positive` and `Bullish` all count toward the same class.
/// Returns `None` for empty input.
pub(crate) fn aggregate_sentiment(results: &[Vec<ClassScore>]) -> Option<AggregatedSentiment> {
    if results.is_empty() {
        return None;
    }
    let n = results.len() as f64;
    let labels = [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral];
    let mut sums = [0.0_f64; 3];
    let mut top_total = 0.0;

    for classes in results {
        for class in classes {
            let idx = match Sentiment::from_label(&class.label) {
                Sentiment::Positive => 0,
                Sentiment::Negative => 1,
                Sentiment::Neutral => 2,
            };
            sums[idx] += class.score;
        }
        top_total += top_class(classes).map_or(0.0, |c| c.score);
    }

    // A tie for first place reads as neutral
    let max = sums.iter().copied().fold(f64::MIN, f64::max);
    let leaders: Vec<usize> = (0..3).filter(|&i| (sums[i] - max).abs() < 1e-12).collect();
    let best = if leaders.len() == 1 { leaders[0] } else { 2 };

    Some(AggregatedSentiment {
        sentiment: labels[best],
        confidence: top_total / n,
        scores: labels
            .iter()
            .zip(sums.iter())
            .map(|(label, sum)| ClassScore {
                label: label.to_string(),
                score: sum / n,
            })
            .collect(),
        samples: results.len(),
    })
}
