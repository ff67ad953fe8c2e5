//! Model Registry: per-model configuration and rolling performance history
//!
//! Holds the static metadata of every ensemble model (cost, timeout, rate
//! limits, strengths), selects an "optimal" model subset and weighting
//! strategy for a classified query, and tracks per-model latency and
//! confidence observations.
//!
//! Static configuration is immutable after construction. Performance history
//! is the only mutable state: a bounded ring buffer per model (at most
//! [`MAX_HISTORY`] samples, oldest dropped first) behind a `RwLock`. Updates
//! only append and trim, never edit an existing sample.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ensemble::{ModelId, WeightingStrategy};
use crate::router::{Complexity, QueryAnalysis, Urgency};

/// Maximum performance samples retained per model
pub const MAX_HISTORY: usize = 100;

/// Timeout used when no rule overrides it
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Timeout for urgent queries
pub const URGENT_TIMEOUT_MS: u64 = 15_000;
/// Timeout for high-complexity queries
pub const COMPLEX_TIMEOUT_MS: u64 = 60_000;
/// Models kept for urgent queries
pub const URGENT_MODEL_LIMIT: usize = 2;

/// Shared reference to a ModelRegistry
pub type SharedModelRegistry = Arc<ModelRegistry>;

/// Request budget for one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests_per_minute: u32,
    pub burst: u32,
}

/// Static configuration for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: ModelId,
    /// Backend model identifier (HuggingFace repo or Gemini model name);
    /// `None` for purely local analyzers
    pub endpoint: Option<String>,
    /// Static prior weight of this model
    pub weight: f64,
    pub timeout_ms: u64,
    /// Retries after the first attempt for retriable backend errors
    pub retries: u32,
    pub rate_limit: RateLimit,
    /// Estimated cost per request in USD
    pub cost_per_request: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub optimal_use_cases: Vec<String>,
    /// Responses below this confidence count as unsuccessful in metrics
    pub min_confidence: f64,
    pub enabled: bool,
}

fn tags(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl ModelConfig {
    /// Built-in configuration for `id`
    pub fn default_for(id: ModelId) -> Self {
        match id {
            ModelId::Gemini => Self {
                id,
                endpoint: Some("gemini-1.5-flash".to_string()),
                weight: 0.35,
                timeout_ms: 30_000,
                retries: 1,
                rate_limit: RateLimit {
                    requests_per_minute: 60,
                    burst: 10,
                },
                cost_per_request: 0.002,
                strengths: tags(&["reasoning", "explanation", "synthesis", "context"]),
                weaknesses: tags(&["latency", "no calibrated confidence"]),
                optimal_use_cases: tags(&["general questions", "education", "synthesis"]),
                min_confidence: 0.5,
                enabled: true,
            },
            ModelId::FinBert => Self {
                id,
                endpoint: Some("ProsusAI/finbert".to_string()),
                weight: 0.2,
                timeout_ms: 10_000,
                retries: 2,
                rate_limit: RateLimit {
                    requests_per_minute: 120,
                    burst: 20,
                },
                cost_per_request: 0.0005,
                strengths: tags(&["financial sentiment", "fast"]),
                weaknesses: tags(&["crypto slang", "short texts only"]),
                optimal_use_cases: tags(&["market sentiment", "earnings-style language"]),
                min_confidence: 0.6,
                enabled: true,
            },
            ModelId::CryptoBert => Self {
                id,
                endpoint: Some("ElKulako/cryptobert".to_string()),
                weight: 0.2,
                timeout_ms: 10_000,
                retries: 2,
                rate_limit: RateLimit {
                    requests_per_minute: 120,
                    burst: 20,
                },
                cost_per_request: 0.0005,
                strengths: tags(&["crypto slang", "social sentiment"]),
                weaknesses: tags(&["formal financial text"]),
                optimal_use_cases: tags(&["community mood", "social posts"]),
                min_confidence: 0.55,
                enabled: true,
            },
            ModelId::NewsRoberta => Self {
                id,
                endpoint: Some(
                    "mrm8488/distilroberta-finetuned-financial-news-sentiment-analysis"
                        .to_string(),
                ),
                weight: 0.15,
                timeout_ms: 10_000,
                retries: 2,
                rate_limit: RateLimit {
                    requests_per_minute: 120,
                    burst: 20,
                },
                cost_per_request: 0.0005,
                strengths: tags(&["news headlines", "event sentiment"]),
                weaknesses: tags(&["needs recent headlines"]),
                optimal_use_cases: tags(&["news impact", "event-driven moves"]),
                min_confidence: 0.6,
                enabled: true,
            },
            ModelId::TechnicalAnalyzer => Self {
                id,
                endpoint: Some("google/flan-t5-large".to_string()),
                weight: 0.1,
                timeout_ms: 8_000,
                retries: 1,
                rate_limit: RateLimit {
                    requests_per_minute: 60,
                    burst: 10,
                },
                cost_per_request: 0.0008,
                strengths: tags(&["price action", "volume"]),
                weaknesses: tags(&["no order book data", "24h window only"]),
                optimal_use_cases: tags(&["trend questions", "chart patterns"]),
                min_confidence: 0.5,
                enabled: true,
            },
        }
    }

    /// Built-in configuration for every model, in dispatch order
    pub fn defaults() -> Vec<ModelConfig> {
        ModelId::all().iter().map(|id| Self::default_for(*id)).collect()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// One latency/confidence observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub response_time_ms: u64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    pub fn now(response_time_ms: u64, confidence: f64) -> Self {
        Self {
            response_time_ms,
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded ring buffer of performance samples
#[derive(Debug, Clone)]
pub struct PerformanceHistory {
    samples: VecDeque<PerformanceSample>,
    capacity: usize,
}

impl PerformanceHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, dropping the oldest when full
    pub fn push(&mut self, sample: PerformanceSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.samples.iter()
    }

    /// Summarize the history; `min_confidence` decides which samples count
    /// as successful.
    pub fn summarize(&self, min_confidence: f64) -> ModelPerformance {
        let n = self.samples.len();
        if n == 0 {
            return ModelPerformance::NoData;
        }
        let total_time: u64 = self.samples.iter().map(|s| s.response_time_ms).sum();
        let total_conf: f64 = self.samples.iter().map(|s| s.confidence).sum();
        let successes = self
            .samples
            .iter()
            .filter(|s| s.confidence >= min_confidence)
            .count();
        ModelPerformance::Observed {
            average_response_time_ms: total_time as f64 / n as f64,
            average_confidence: total_conf / n as f64,
            success_rate: successes as f64 / n as f64,
            sample_count: n,
            last_updated: self.samples.back().map(|s| s.timestamp),
        }
    }
}

impl Default for PerformanceHistory {
    fn default() -> Self {
        Self::new(MAX_HISTORY)
    }
}

/// Aggregated performance of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelPerformance {
    /// No samples recorded yet
    NoData,
    Observed {
        average_response_time_ms: f64,
        average_confidence: f64,
        /// Fraction of samples at or above the model's `min_confidence`
        success_rate: f64,
        sample_count: usize,
        last_updated: Option<DateTime<Utc>>,
    },
}

impl ModelPerformance {
    pub fn has_data(&self) -> bool {
        matches!(self, Self::Observed { .. })
    }
}

/// Result of [`ModelRegistry::get_optimal_configuration`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalConfiguration {
    pub enabled_models: Vec<ModelId>,
    pub strategy: WeightingStrategy,
    pub timeout_ms: u64,
    /// Sum of the selected models' cost per request
    pub expected_cost: f64,
}

/// Process-wide model configuration and performance tracking
#[derive(Debug)]
pub struct ModelRegistry {
    configs: Vec<ModelConfig>,
    history: RwLock<HashMap<ModelId, PerformanceHistory>>,
}

static GLOBAL_REGISTRY: OnceLock<SharedModelRegistry> = OnceLock::new();

impl ModelRegistry {
    /// Registry with the built-in model table
    pub fn new() -> Self {
        Self::with_configs(ModelConfig::defaults())
    }

    /// Registry with custom configs; models missing from `configs` use
    /// their built-in defaults.
    pub fn with_configs(configs: Vec<ModelConfig>) -> Self {
        let mut ordered = Vec::with_capacity(ModelId::all().len());
        for id in ModelId::all() {
            let config = configs
                .iter()
                .find(|c| c.id == *id)
                .cloned()
                .unwrap_or_else(|| ModelConfig::default_for(*id));
            ordered.push(config);
        }
        Self {
            configs: ordered,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedModelRegistry {
        Arc::new(self)
    }

    /// The process-wide registry, created on first use with the built-in table
    pub fn global() -> SharedModelRegistry {
        GLOBAL_REGISTRY
            .get_or_init(|| ModelRegistry::new().shared())
            .clone()
    }

    /// Configuration for a model
    pub fn config(&self, id: ModelId) -> &ModelConfig {
        // with_configs fills every ModelId, so the lookup always succeeds
        self.configs
            .iter()
            .find(|c| c.id == id)
            .unwrap_or_else(|| &self.configs[0])
    }

    /// All configurations, in dispatch order
    pub fn configs(&self) -> &[ModelConfig] {
        &self.configs
    }

    pub fn is_enabled(&self, id: ModelId) -> bool {
        self.config(id).enabled
    }

    /// Pick models, strategy and timeout for a classified query.
    ///
    /// Deterministic rule table; see the `router` module docs.
    pub fn get_optimal_configuration(&self, analysis: &QueryAnalysis) -> OptimalConfiguration {
        let mut models = vec![ModelId::Gemini];
        let mut strategy = WeightingStrategy::Adaptive;
        let mut timeout_ms = DEFAULT_TIMEOUT_MS;

        let add = |models: &mut Vec<ModelId>, id: ModelId| {
            if !models.contains(&id) {
                models.push(id);
            }
        };

        if analysis.is_sentiment_query {
            add(&mut models, ModelId::FinBert);
            add(&mut models, ModelId::CryptoBert);
            add(&mut models, ModelId::NewsRoberta);
        }
        if analysis.is_technical_query {
            add(&mut models, ModelId::TechnicalAnalyzer);
            add(&mut models, ModelId::FinBert);
        }
        if analysis.is_educational_query {
            add(&mut models, ModelId::FinBert);
            strategy = WeightingStrategy::Confidence;
        }

        if analysis.urgency == Urgency::High {
            strategy = WeightingStrategy::FastResponse;
            timeout_ms = URGENT_TIMEOUT_MS;
            models.truncate(URGENT_MODEL_LIMIT);
        } else if analysis.complexity == Complexity::High {
            strategy = WeightingStrategy::HighAccuracy;
            timeout_ms = COMPLEX_TIMEOUT_MS;
        }

        models.retain(|id| self.is_enabled(*id));
        let expected_cost = models
            .iter()
            .map(|id| self.config(*id).cost_per_request)
            .sum();

        debug!(
            analysis = %analysis.summary(),
            models = ?models,
            strategy = %strategy,
            timeout_ms,
            "Selected ensemble configuration"
        );

        OptimalConfiguration {
            enabled_models: models,
            strategy,
            timeout_ms,
            expected_cost,
        }
    }

    /// Record one observation for a model
    pub fn update_performance_metrics(&self, id: ModelId, sample: PerformanceSample) {
        let mut history = self.write_history();
        history.entry(id).or_default().push(sample);
    }

    /// Aggregated performance for a model, `NoData` if nothing was recorded
    pub fn get_model_performance(&self, id: ModelId) -> ModelPerformance {
        let min_confidence = self.config(id).min_confidence;
        self.read_history()
            .get(&id)
            .map(|h| h.summarize(min_confidence))
            .unwrap_or(ModelPerformance::NoData)
    }

    /// Performance of every model, in dispatch order
    pub fn all_performance(&self) -> Vec<(ModelId, ModelPerformance)> {
        ModelId::all()
            .iter()
            .map(|id| (*id, self.get_model_performance(*id)))
            .collect()
    }

    /// Number of samples currently held for a model
    pub fn history_len(&self, id: ModelId) -> usize {
        self.read_history().get(&id).map_or(0, |h| h.len())
    }

    fn read_history(&self) -> RwLockReadGuard<'_, HashMap<ModelId, PerformanceHistory>> {
        self.history.read().unwrap_or_else(|poisoned| {
            warn!("Performance history lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_history(&self) -> RwLockWriteGuard<'_, HashMap<ModelId, PerformanceHistory>> {
        self.history.write().unwrap_or_else(|poisoned| {
            warn!("Performance history lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
