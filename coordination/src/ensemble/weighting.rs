//! Weighting strategies for combining model responses.
//!
//! Each strategy is a pure function from a slice of [`ModelResponse`] to a
//! same-length weight vector summing to 1. Strategies are a closed enum
//! dispatched through `match`, so they can be selected by name at runtime and
//! tested in isolation.
//!
//! | Strategy       | Weight of response *i*                                      |
//! |----------------|-------------------------------------------------------------|
//! | `confidence`   | cᵢ / Σc                                                      |
//! | `equal`        | 1 / n                                                        |
//! | `performance`  | historical accuracy of the source, normalized               |
//! | `adaptive`     | same as `confidence`                                         |
//! | `fastResponse` | (1 / tᵢ), normalized                                         |
//! | `highAccuracy` | 0.7·cᵢ + 0.3·(1 − \|cᵢ − mean(c)\|), normalized             |
//!
//! Every strategy also carries thresholds ([`EnsembleStrategy`]) which the
//! orchestrator enforces; the weight functions themselves never look at them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::ModelResponse;

/// Historical accuracy by source name, used by the `performance` strategy
const HISTORICAL_ACCURACY: &[(&str, f64)] = &[
    ("gemini", 0.85),
    ("finbert", 0.78),
    ("cryptobert", 0.72),
    ("newsRoberta", 0.75),
    ("technicalAnalyzer", 0.68),
];

/// Accuracy assumed for sources missing from the table
pub const DEFAULT_HISTORICAL_ACCURACY: f64 = 0.6;

/// Look up a source's historical accuracy
pub fn historical_accuracy(source: &str) -> f64 {
    HISTORICAL_ACCURACY
        .iter()
        .find(|(name, _)| *name == source)
        .map(|(_, acc)| *acc)
        .unwrap_or(DEFAULT_HISTORICAL_ACCURACY)
}

/// Named weighting policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WeightingStrategy {
    #[default]
    Confidence,
    Equal,
    Performance,
    Adaptive,
    FastResponse,
    HighAccuracy,
}

/// Error for unknown strategy names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown weighting strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl WeightingStrategy {
    pub fn all() -> &'static [WeightingStrategy] {
        &[
            WeightingStrategy::Confidence,
            WeightingStrategy::Equal,
            WeightingStrategy::Performance,
            WeightingStrategy::Adaptive,
            WeightingStrategy::FastResponse,
            WeightingStrategy::HighAccuracy,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confidence => "confidence",
            Self::Equal => "equal",
            Self::Performance => "performance",
            Self::Adaptive => "adaptive",
            Self::FastResponse => "fastResponse",
            Self::HighAccuracy => "highAccuracy",
        }
    }

    /// Compute normalized weights for `responses`.
    ///
    /// Returns an empty vector for empty input. For non-empty input the
    /// result has the same length and sums to 1; if every raw weight is zero
    /// (e.g. all confidences are 0) the weights fall back to uniform.
    pub fn weights(&self, responses: &[ModelResponse]) -> Vec<f64> {
        if responses.is_empty() {
            return Vec::new();
        }

        let raw: Vec<f64> = match self {
            Self::Confidence | Self::Adaptive => {
                responses.iter().map(|r| r.confidence).collect()
            }
            Self::Equal => vec![1.0; responses.len()],
            Self::Performance => responses
                .iter()
                .map(|r| historical_accuracy(r.source.as_str()))
                .collect(),
            Self::FastResponse => responses
                .iter()
                .map(|r| 1.0 / r.processing_time_ms.max(1) as f64)
                .collect(),
            Self::HighAccuracy => {
                let mean = responses.iter().map(|r| r.confidence).sum::<f64>()
                    / responses.len() as f64;
                responses
                    .iter()
                    .map(|r| 0.7 * r.confidence + 0.3 * (1.0 - (r.confidence - mean).abs()))
                    .collect()
            }
        };

        normalize(raw)
    }

    /// Thresholds and fallback for this strategy
    pub fn descriptor(&self) -> EnsembleStrategy {
        match self {
            Self::Confidence => EnsembleStrategy {
                strategy: *self,
                description: "Weights each model by its own confidence",
                consensus_threshold: 0.6,
                require_minimum_models: 2,
                max_processing_time_ms: 30_000,
                fallback_strategy: Some(Self::Equal),
            },
            Self::Equal => EnsembleStrategy {
                strategy: *self,
                description: "Gives every responding model the same weight",
                consensus_threshold: 0.5,
                require_minimum_models: 1,
                max_processing_time_ms: 30_000,
                fallback_strategy: None,
            },
            Self::Performance => EnsembleStrategy {
                strategy: *self,
                description: "Weights models by historical accuracy",
                consensus_threshold: 0.7,
                require_minimum_models: 2,
                max_processing_time_ms: 30_000,
                fallback_strategy: Some(Self::Confidence),
            },
            Self::Adaptive => EnsembleStrategy {
                strategy: *self,
                description: "Confidence weighting, reserved for query-specific tuning",
                consensus_threshold: 0.65,
                require_minimum_models: 2,
                max_processing_time_ms: 45_000,
                fallback_strategy: Some(Self::Confidence),
            },
            Self::FastResponse => EnsembleStrategy {
                strategy: *self,
                description: "Favors the fastest models for urgent queries",
                consensus_threshold: 0.5,
                require_minimum_models: 1,
                max_processing_time_ms: 15_000,
                fallback_strategy: Some(Self::Equal),
            },
            Self::HighAccuracy => EnsembleStrategy {
                strategy: *self,
                description: "Rewards high confidence and agreement with the ensemble mean",
                consensus_threshold: 0.8,
                require_minimum_models: 3,
                max_processing_time_ms: 60_000,
                fallback_strategy: Some(Self::Performance),
            },
        }
    }
}

impl std::fmt::Display for WeightingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WeightingStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(needle))
            .or_else(|| match needle.to_lowercase().as_str() {
                "fast" | "fast_response" => Some(Self::FastResponse),
                "high_accuracy" | "accurate" => Some(Self::HighAccuracy),
                _ => None,
            })
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// Static description of a weighting policy and the limits the orchestrator
/// enforces around it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleStrategy {
    pub strategy: WeightingStrategy,
    pub description: &'static str,
    /// Consensus score below which the answer is flagged as contested
    pub consensus_threshold: f64,
    /// Fewest successful responses this strategy is meaningful for
    pub require_minimum_models: usize,
    /// Soft budget for the whole request
    pub max_processing_time_ms: u64,
    /// Strategy to use when `require_minimum_models` cannot be met
    pub fallback_strategy: Option<WeightingStrategy>,
}

/// Pick the strategy to apply given how many responses succeeded.
///
/// Follows `fallback_strategy` links while the current strategy's minimum
/// model count is not met. A strategy without a fallback is used as-is.
pub fn resolve_strategy(requested: WeightingStrategy, available: usize) -> WeightingStrategy {
    let mut current = requested;
    // Chains are short and acyclic; the bound only guards against a bad table.
    for _ in 0..WeightingStrategy::all().len() {
        let descriptor = current.descriptor();
        if available >= descriptor.require_minimum_models {
            return current;
        }
        match descriptor.fallback_strategy {
            Some(next) => {
                debug!(
                    from = %current,
                    to = %next,
                    available,
                    required = descriptor.require_minimum_models,
                    "Strategy minimum not met, falling back"
                );
                current = next;
            }
            None => return current,
        }
    }
    current
}

/// Scale raw weights to sum to 1, falling back to uniform on a degenerate sum
fn normalize(raw: Vec<f64>) -> Vec<f64> {
    let n = raw.len();
    if n == 0 {
        return raw;
    }
    let sum: f64 = raw.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![1.0 / n as f64; n];
    }
    raw.into_iter()
        .map(|w| if w.is_finite() && w > 0.0 { w / sum } else { 0.0 })
        .collect()
}
