//! Consensus & Synthesis Engine.
//!
//! ```text
//!  validate ──► select analyzers ──► JoinSet fan-out (all settle)
//!                                          │
//!                         ┌────────────────┴───────────────┐
//!                   none succeeded                  ≥1 succeeded
//!                         │                                │
//!                 degraded apology         consensus ► weights ► synthesis
//!                                                          │   (local fallback)
//!                                                          ▼
//!                                           record performance ► response
//! ```
//!
//! Only configuration and query validation errors reach the caller. Every
//! other failure degrades into the returned [`EnsembleResponse`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use coordination::ensemble::{
    build_synthesis_prompt, describe_methodology, local_synthesis, NO_RESPONSE_APOLOGY,
    NO_RESPONSE_METHODOLOGY,
};
use coordination::registry::PerformanceSample;
use coordination::{
    consensus_score, resolve_strategy, AnalysisMethod, DegradationLevel, EnsembleResponse,
    MarketContext, ModelId, ModelRegistry, ModelResponse, OptimalConfiguration, QueryAnalysis,
    QueryClassifier, SharedModelRegistry, WeightingStrategy,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analyzers::{backend_id_for, default_analyzers, Analyzer};
use crate::backend::{call_with_retry, CallBudget, HttpBackend, InferenceBackend};
use crate::config::EnsembleConfig;
use crate::errors::{AnalyzerError, BackendError, EnsembleError};

/// Longest accepted query, in characters
pub const MAX_QUERY_CHARS: usize = 4_000;

/// Per-request selection of analyzers and weighting strategy.
///
/// Deserializes from the camelCase shape route handlers send
/// (`{"useGemini": true, "weightingStrategy": "equal"}`); missing fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnsembleOptions {
    pub use_gemini: bool,
    pub use_financial_bert: bool,
    pub use_crypto_bert: bool,
    pub use_news_analysis: bool,
    pub use_technical_analysis: bool,
    pub weighting_strategy: WeightingStrategy,
    /// Upper bound on each backend call and on each analyzer as a whole
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        Self {
            use_gemini: true,
            use_financial_bert: true,
            use_crypto_bert: true,
            use_news_analysis: true,
            use_technical_analysis: true,
            weighting_strategy: WeightingStrategy::default(),
            timeout_ms: None,
        }
    }
}

impl EnsembleOptions {
    /// Options enabling exactly `models`
    pub fn for_models(models: &[ModelId], strategy: WeightingStrategy) -> Self {
        Self {
            use_gemini: models.contains(&ModelId::Gemini),
            use_financial_bert: models.contains(&ModelId::FinBert),
            use_crypto_bert: models.contains(&ModelId::CryptoBert),
            use_news_analysis: models.contains(&ModelId::NewsRoberta),
            use_technical_analysis: models.contains(&ModelId::TechnicalAnalyzer),
            weighting_strategy: strategy,
            timeout_ms: None,
        }
    }

    /// Options matching a registry plan, including its timeout
    pub fn from_plan(plan: &OptimalConfiguration) -> Self {
        Self {
            timeout_ms: Some(plan.timeout_ms),
            ..Self::for_models(&plan.enabled_models, plan.strategy)
        }
    }

    pub fn with_strategy(mut self, strategy: WeightingStrategy) -> Self {
        self.weighting_strategy = strategy;
        self
    }

    pub fn includes(&self, model: ModelId) -> bool {
        match model {
            ModelId::Gemini => self.use_gemini,
            ModelId::FinBert => self.use_financial_bert,
            ModelId::CryptoBert => self.use_crypto_bert,
            ModelId::NewsRoberta => self.use_news_analysis,
            ModelId::TechnicalAnalyzer => self.use_technical_analysis,
        }
    }

    /// Enabled models in dispatch order
    pub fn enabled_models(&self) -> Vec<ModelId> {
        ModelId::all()
            .iter()
            .copied()
            .filter(|m| self.includes(*m))
            .collect()
    }
}

/// Multi-model ensemble orchestrator
pub struct EnsembleEngine {
    config: EnsembleConfig,
    backend: Arc<dyn InferenceBackend>,
    registry: SharedModelRegistry,
    analyzers: Vec<Arc<dyn Analyzer>>,
    classifier: QueryClassifier,
}

impl EnsembleEngine {
    /// Engine over HTTPS backends and the process-wide model registry.
    pub fn new(config: EnsembleConfig) -> Result<Self, EnsembleError> {
        let backend = HttpBackend::new(config.clone())
            .map_err(|e| EnsembleError::Configuration(e.to_string()))?;
        Ok(Self::with_backend(
            config,
            Arc::new(backend),
            ModelRegistry::global(),
        ))
    }

    /// Engine with the five standard analyzers on top of `backend`.
    pub fn with_backend(
        config: EnsembleConfig,
        backend: Arc<dyn InferenceBackend>,
        registry: SharedModelRegistry,
    ) -> Self {
        let analyzers = default_analyzers(&config, &registry, backend.clone());
        Self {
            config,
            backend,
            registry,
            analyzers,
            classifier: QueryClassifier::new(),
        }
    }

    /// Replace the analyzer set. At most one analyzer per model is used; the
    /// first one wins.
    pub fn with_analyzers(mut self, analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        self.analyzers = analyzers;
        self
    }

    pub fn registry(&self) -> &SharedModelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Classify `query` and pick models, strategy and timeout for it.
    pub fn plan(&self, query: &str) -> (QueryAnalysis, OptimalConfiguration) {
        let analysis = self.classifier.analyze(query);
        let plan = self.registry.get_optimal_configuration(&analysis);
        (analysis, plan)
    }

    /// Run the ensemble with the configuration the registry picks for `query`.
    pub async fn generate_optimized_response(
        &self,
        query: &str,
        context: &MarketContext,
    ) -> Result<EnsembleResponse, EnsembleError> {
        let (analysis, plan) = self.plan(query);
        info!(
            analysis = %analysis.summary(),
            models = ?plan.enabled_models,
            strategy = %plan.strategy,
            expected_cost = plan.expected_cost,
            "Optimized ensemble plan"
        );
        self.generate_ensemble_response(query, context, &EnsembleOptions::from_plan(&plan))
            .await
    }

    /// Fan `query` out to the enabled analyzers and merge what comes back.
    pub async fn generate_ensemble_response(
        &self,
        query: &str,
        context: &MarketContext,
        options: &EnsembleOptions,
    ) -> Result<EnsembleResponse, EnsembleError> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "ensemble_request",
            %request_id,
            strategy = %options.weighting_strategy
        );
        self.run(request_id, query, context, options)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        request_id: Uuid,
        query: &str,
        context: &MarketContext,
        options: &EnsembleOptions,
    ) -> Result<EnsembleResponse, EnsembleError> {
        let start = Instant::now();
        let query = validate_query(query)?;

        // ── Phase 1: configuration ──────────────────────────────────────────
        let models: Vec<ModelId> = options
            .enabled_models()
            .into_iter()
            .filter(|m| self.registry.is_enabled(*m))
            .collect();
        self.config.validate(&models)?;
        let timeout_cap = options.timeout_ms.map(Duration::from_millis);

        // ── Phase 2: fan-out / fan-in ───────────────────────────────────────
        let selected = self.select_analyzers(&models);
        debug!(models = ?models, analyzers = selected.len(), "Dispatching analyzers");
        let (mut succeeded, failed) = self
            .dispatch(query, context, selected, timeout_cap)
            .await;
        succeeded.sort_by_key(|r| r.source);

        if succeeded.is_empty() {
            warn!(failed = ?failed, "No analyzer responded, returning degraded response");
            return Ok(EnsembleResponse {
                request_id,
                final_response: NO_RESPONSE_APOLOGY.to_string(),
                model_contributions: Vec::new(),
                weights: Vec::new(),
                consensus_score: 0.0,
                total_processing_time_ms: start.elapsed().as_millis() as u64,
                methodology: NO_RESPONSE_METHODOLOGY.to_string(),
                strategy: None,
                degradation: DegradationLevel::Unavailable,
                timestamp: Utc::now(),
            });
        }

        // ── Phase 3: consensus and weighting ────────────────────────────────
        let consensus = consensus_score(&succeeded);
        let requested = options.weighting_strategy;
        let strategy = resolve_strategy(requested, succeeded.len());
        let weights = strategy.weights(&succeeded);

        // ── Phase 4: synthesis ──────────────────────────────────────────────
        let (final_response, synthesized) = match self
            .synthesize(query, &succeeded, &weights, timeout_cap)
            .await
        {
            Ok(text) => (text, true),
            Err(e) => {
                warn!(error = %e, "Synthesis failed, assembling answer locally");
                (local_synthesis(&succeeded), false)
            }
        };

        // ── Phase 5: bookkeeping ────────────────────────────────────────────
        for response in &succeeded {
            self.registry.update_performance_metrics(
                response.source,
                PerformanceSample::now(response.processing_time_ms, response.confidence),
            );
        }

        let used_fallback = succeeded
            .iter()
            .any(|r| r.data.method() != AnalysisMethod::Model);
        let degradation = if failed.is_empty() && !used_fallback && synthesized {
            DegradationLevel::Full
        } else {
            DegradationLevel::Partial
        };

        let mut response = EnsembleResponse {
            request_id,
            final_response,
            model_contributions: succeeded,
            weights,
            consensus_score: consensus,
            total_processing_time_ms: start.elapsed().as_millis() as u64,
            methodology: String::new(),
            strategy: Some(strategy),
            degradation,
            timestamp: Utc::now(),
        };
        response.methodology = self.methodology(&response, requested, &failed, synthesized);

        info!(
            models = response.model_contributions.len(),
            failed = failed.len(),
            consensus = response.consensus_score,
            strategy = %strategy,
            degradation = %response.degradation,
            elapsed_ms = response.total_processing_time_ms,
            "Ensemble response complete"
        );
        Ok(response)
    }

    fn select_analyzers(&self, models: &[ModelId]) -> Vec<Arc<dyn Analyzer>> {
        let mut seen = BTreeSet::new();
        self.analyzers
            .iter()
            .filter(|a| models.contains(&a.model()) && seen.insert(a.model()))
            .cloned()
            .collect()
    }

    /// Run every analyzer concurrently and wait for all of them to settle.
    async fn dispatch(
        &self,
        query: &str,
        context: &MarketContext,
        analyzers: Vec<Arc<dyn Analyzer>>,
        timeout_cap: Option<Duration>,
    ) -> (Vec<ModelResponse>, Vec<ModelId>) {
        let query: Arc<str> = Arc::from(query);
        let context = Arc::new(context.clone());
        let mut join_set: JoinSet<(ModelId, Result<ModelResponse, AnalyzerError>)> =
            JoinSet::new();
        let mut pending: BTreeSet<ModelId> = BTreeSet::new();

        for analyzer in analyzers {
            let model = analyzer.model();
            let budget = CallBudget::from_config(self.registry.config(model)).capped(timeout_cap);
            let query = query.clone();
            let context = context.clone();
            pending.insert(model);

            join_set.spawn(async move {
                let call = analyzer.analyze(&query, &context, budget);
                let result = match timeout_cap {
                    // Caps the whole analyzer, retries and back-off included
                    Some(cap) => tokio::time::timeout(cap, call).await.unwrap_or_else(|_| {
                        Err(AnalyzerError::backend(
                            model,
                            BackendError::Timeout {
                                backend: model.to_string(),
                                timeout_ms: cap.as_millis() as u64,
                            },
                        ))
                    }),
                    None => call.await,
                };
                (model, result)
            });
        }

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((model, Ok(response))) => {
                    pending.remove(&model);
                    debug!(
                        model = %model,
                        confidence = response.confidence,
                        method = ?response.data.method(),
                        elapsed_ms = response.processing_time_ms,
                        "Analyzer succeeded"
                    );
                    succeeded.push(response);
                }
                Ok((model, Err(e))) => {
                    pending.remove(&model);
                    warn!(model = %model, error = %e, "Analyzer failed");
                    failed.push(model);
                }
                Err(e) => {
                    // The panicked analyzer is identified below by elimination
                    warn!(error = %e, "Analyzer task panicked");
                }
            }
        }
        failed.extend(pending);
        failed.sort();

        (succeeded, failed)
    }

    async fn synthesize(
        &self,
        query: &str,
        responses: &[ModelResponse],
        weights: &[f64],
        timeout_cap: Option<Duration>,
    ) -> Result<String, BackendError> {
        let prompt = build_synthesis_prompt(query, responses, weights);
        let budget =
            CallBudget::from_config(self.registry.config(ModelId::Gemini)).capped(timeout_cap);
        let id = backend_id_for(ModelId::Gemini, &self.config, &self.registry);

        let text = call_with_retry(self.backend.as_ref(), &id, &prompt, budget)
            .await?
            .into_text()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(BackendError::Malformed("empty synthesis".to_string()));
        }
        Ok(text.to_string())
    }

    /// Methodology line plus notes on anything that did not go to plan.
    fn methodology(
        &self,
        response: &EnsembleResponse,
        requested: WeightingStrategy,
        failed: &[ModelId],
        synthesized: bool,
    ) -> String {
        let mut notes = vec![describe_methodology(response)];
        let contributions = &response.model_contributions;

        if let Some(applied) = response.strategy {
            if applied != requested {
                notes.push(format!(
                    "{} strategy needs {} models but {} responded, fell back to {}",
                    requested,
                    requested.descriptor().require_minimum_models,
                    contributions.len(),
                    applied
                ));
            }
            let descriptor = applied.descriptor();
            if response.consensus_score < descriptor.consensus_threshold {
                warn!(
                    consensus = response.consensus_score,
                    threshold = descriptor.consensus_threshold,
                    "Consensus below strategy threshold"
                );
                notes.push(format!(
                    "consensus {:.2} is below the {:.2} threshold",
                    response.consensus_score, descriptor.consensus_threshold
                ));
            }
            if response.total_processing_time_ms > descriptor.max_processing_time_ms {
                warn!(
                    elapsed_ms = response.total_processing_time_ms,
                    max_ms = descriptor.max_processing_time_ms,
                    "Ensemble exceeded strategy time budget"
                );
                notes.push(format!(
                    "took {}ms, over the {}ms budget",
                    response.total_processing_time_ms, descriptor.max_processing_time_ms
                ));
            }
        }

        if !failed.is_empty() {
            notes.push(format!("unavailable: {}", join_models(failed.iter().copied())));
        }

        let fallbacks: Vec<ModelId> = contributions
            .iter()
            .filter(|r| r.data.method() != AnalysisMethod::Model)
            .map(|r| r.source)
            .collect();
        if !fallbacks.is_empty() {
            notes.push(format!("local fallback: {}", join_models(fallbacks)));
        }

        let low: Vec<ModelId> = contributions
            .iter()
            .filter(|r| r.confidence < self.registry.config(r.source).min_confidence)
            .map(|r| r.source)
            .collect();
        if !low.is_empty() {
            notes.push(format!("below minimum confidence: {}", join_models(low)));
        }

        if !synthesized {
            notes.push("synthesized locally".to_string());
        }

        notes.join("; ")
    }
}

fn join_models(models: impl IntoIterator<Item = ModelId>) -> String {
    models
        .into_iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn validate_query(query: &str) -> Result<&str, EnsembleError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(EnsembleError::InvalidQuery(
            "query must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(EnsembleError::InvalidQuery(format!(
            "query exceeds {MAX_QUERY_CHARS} characters"
        )));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_enable_everything() {
        let options = EnsembleOptions::default();
        assert_eq!(options.enabled_models(), ModelId::all().to_vec());
        assert_eq!(options.weighting_strategy, WeightingStrategy::Confidence);
    }

    #[test]
    fn options_deserialize_from_camel_case() {
        let options: EnsembleOptions = serde_json::from_str(
            r#"{"useGemini": true, "useCryptoBert": false, "weightingStrategy": "equal"}"#,
        )
        .unwrap();
        assert!(options.use_financial_bert);
        assert!(!options.use_crypto_bert);
        assert_eq!(options.weighting_strategy, WeightingStrategy::Equal);
        assert_eq!(options.timeout_ms, None);
    }

    #[test]
    fn options_from_plan_carry_timeout() {
        let plan = OptimalConfiguration {
            enabled_models: vec![ModelId::Gemini, ModelId::FinBert],
            strategy: WeightingStrategy::FastResponse,
            timeout_ms: 15_000,
            expected_cost: 0.0025,
        };
        let options = EnsembleOptions::from_plan(&plan);
        assert_eq!(options.enabled_models(), plan.enabled_models);
        assert_eq!(options.timeout_ms, Some(15_000));
        assert_eq!(options.weighting_strategy, WeightingStrategy::FastResponse);
    }

    #[test]
    fn query_validation() {
        assert!(matches!(validate_query("   "), Err(EnsembleError::InvalidQuery(_))));
        assert!(validate_query(&"a".repeat(MAX_QUERY_CHARS + 1)).is_err());
        assert_eq!(validate_query("  BTC?  ").unwrap(), "BTC?");
    }

    #[test]
    fn model_lists_join_with_commas() {
        assert_eq!(
            join_models([ModelId::FinBert, ModelId::NewsRoberta]),
            "finbert, newsRoberta"
        );
    }
}
