//! Ensemble engine integration tests.
//!
//! Exercise the full request path with in-process fake analyzers and
//! backends; no inference endpoint required. Tests that hit retry back-off
//! run with paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::ensemble::{
    variance, TextPayload, FALLBACK_DISCLAIMER, NO_RESPONSE_APOLOGY, NO_RESPONSE_METHODOLOGY,
};
use coordination::{
    AnalysisMethod, AnalyzerPayload, DegradationLevel, MarketContext, ModelId, ModelRegistry,
    ModelResponse, SharedModelRegistry, WeightingStrategy,
};
use market_agents::analyzers::{Analyzer, CryptoSentimentAnalyzer};
use market_agents::backend::{BackendId, CallBudget, InferenceBackend, RawOutput};
use market_agents::{
    AnalyzerError, BackendError, EnsembleConfig, EnsembleEngine, EnsembleError, EnsembleOptions,
};
use mockall::mock;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config() -> EnsembleConfig {
    EnsembleConfig::default()
        .with_gemini_key("test-gemini")
        .with_huggingface_key("test-hf")
}

fn registry() -> SharedModelRegistry {
    ModelRegistry::new().shared()
}

fn tolerance_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed(f64),
    Fail,
    Panic,
    Sleep(Duration, f64),
}

/// Analyzer with a scripted outcome.
struct FakeAnalyzer {
    model: ModelId,
    behavior: Behavior,
}

fn fake(model: ModelId, behavior: Behavior) -> Arc<dyn Analyzer> {
    Arc::new(FakeAnalyzer { model, behavior })
}

fn text_response(model: ModelId, confidence: f64) -> ModelResponse {
    ModelResponse::new(
        model,
        confidence,
        AnalyzerPayload::Text(TextPayload {
            text: format!("{} thinks the market is steady.", model),
            method: AnalysisMethod::Model,
        }),
        25,
    )
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    fn model(&self) -> ModelId {
        self.model
    }

    async fn analyze(
        &self,
        _query: &str,
        _context: &MarketContext,
        _budget: CallBudget,
    ) -> Result<ModelResponse, AnalyzerError> {
        match self.behavior {
            Behavior::Succeed(confidence) => Ok(text_response(self.model, confidence)),
            Behavior::Fail => Err(AnalyzerError::backend(
                self.model,
                BackendError::Status {
                    status: 500,
                    body: "boom".into(),
                },
            )),
            Behavior::Panic => panic!("analyzer bug"),
            Behavior::Sleep(delay, confidence) => {
                tokio::time::sleep(delay).await;
                Ok(text_response(self.model, confidence))
            }
        }
    }
}

/// Answers synthesis on Gemini; every classifier call times out.
#[derive(Default)]
struct SynthesisOnly {
    gemini_calls: AtomicUsize,
}

#[async_trait]
impl InferenceBackend for SynthesisOnly {
    async fn call(
        &self,
        backend: &BackendId,
        _input: &str,
        timeout: Duration,
    ) -> Result<RawOutput, BackendError> {
        match backend {
            BackendId::Gemini(_) => {
                self.gemini_calls.fetch_add(1, Ordering::SeqCst);
                Ok(RawOutput::Text("Unified answer from the ensemble.".into()))
            }
            BackendId::HuggingFace(_) => Err(BackendError::Timeout {
                backend: backend.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// Every call fails.
struct Unreachable;

#[async_trait]
impl InferenceBackend for Unreachable {
    async fn call(
        &self,
        _backend: &BackendId,
        _input: &str,
        _timeout: Duration,
    ) -> Result<RawOutput, BackendError> {
        Err(BackendError::Transport("connection refused".into()))
    }
}

mock! {
    pub Backend {}

    #[async_trait]
    impl InferenceBackend for Backend {
        async fn call(
            &self,
            backend: &BackendId,
            input: &str,
            timeout: Duration,
        ) -> Result<RawOutput, BackendError>;
    }
}

fn engine(backend: Arc<dyn InferenceBackend>, analyzers: Vec<Arc<dyn Analyzer>>) -> EnsembleEngine {
    EnsembleEngine::with_backend(config(), backend, registry()).with_analyzers(analyzers)
}

// ── Total failure ────────────────────────────────────────────────────────────

#[tokio::test]
async fn all_analyzers_failing_returns_degraded_response() {
    let analyzers = ModelId::all()
        .iter()
        .map(|m| fake(*m, Behavior::Fail))
        .collect();
    let engine = engine(Arc::new(SynthesisOnly::default()), analyzers);

    let response = engine
        .generate_ensemble_response(
            "What's the Bitcoin sentiment?",
            &MarketContext::default(),
            &EnsembleOptions::default(),
        )
        .await
        .expect("total failure must not be an error");

    assert!(response.model_contributions.is_empty());
    assert!(response.weights.is_empty());
    assert_eq!(response.consensus_score, 0.0);
    assert_eq!(response.final_response, NO_RESPONSE_APOLOGY);
    assert!(!response.final_response.is_empty());
    assert_eq!(response.methodology, NO_RESPONSE_METHODOLOGY);
    assert_eq!(response.strategy, None);
    assert_eq!(response.degradation, DegradationLevel::Unavailable);
}

#[tokio::test]
async fn panicking_analyzer_counts_as_failure() {
    let engine = engine(
        Arc::new(SynthesisOnly::default()),
        vec![
            fake(ModelId::Gemini, Behavior::Succeed(0.85)),
            fake(ModelId::FinBert, Behavior::Panic),
            fake(ModelId::CryptoBert, Behavior::Succeed(0.7)),
        ],
    );
    let options = EnsembleOptions::for_models(
        &[ModelId::Gemini, ModelId::FinBert, ModelId::CryptoBert],
        WeightingStrategy::Confidence,
    );

    let response = engine
        .generate_ensemble_response("Is ETH bullish?", &MarketContext::default(), &options)
        .await
        .unwrap();

    assert_eq!(response.model_contributions.len(), 2);
    assert_eq!(response.degradation, DegradationLevel::Partial);
    assert!(response.methodology.contains("unavailable: finbert"));
}

// ── Synthesis fallback ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn synthesis_failure_falls_back_to_local_answer() {
    let engine = engine(
        Arc::new(Unreachable),
        vec![
            fake(ModelId::Gemini, Behavior::Fail),
            fake(ModelId::FinBert, Behavior::Succeed(0.72)),
            fake(ModelId::NewsRoberta, Behavior::Succeed(0.64)),
        ],
    );
    let options = EnsembleOptions::default().with_strategy(WeightingStrategy::Equal);

    let response = engine
        .generate_ensemble_response("How is the news flow?", &MarketContext::default(), &options)
        .await
        .unwrap();

    assert_eq!(response.model_contributions.len(), 2);
    assert!(!response.final_response.is_empty());
    assert!(response.final_response.contains("finbert"));
    assert!(response.final_response.ends_with(FALLBACK_DISCLAIMER));
    assert!(response.methodology.contains("synthesized locally"));
    assert_eq!(response.degradation, DegradationLevel::Partial);
}

// ── Full scenario ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn five_analyzers_with_crypto_timeout_fallback() {
    let backend = Arc::new(SynthesisOnly::default());
    let crypto: Arc<dyn Analyzer> = Arc::new(CryptoSentimentAnalyzer::new(
        backend.clone(),
        BackendId::HuggingFace("ElKulako/cryptobert".into()),
    ));
    let engine = engine(
        backend.clone(),
        vec![
            fake(ModelId::Gemini, Behavior::Succeed(0.9)),
            fake(ModelId::FinBert, Behavior::Succeed(0.7)),
            crypto,
            fake(ModelId::NewsRoberta, Behavior::Succeed(0.6)),
            fake(ModelId::TechnicalAnalyzer, Behavior::Succeed(0.8)),
        ],
    );

    let response = engine
        .generate_ensemble_response(
            "What's the Bitcoin sentiment?",
            &MarketContext::default(),
            &EnsembleOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.model_contributions.len(), 5);
    let crypto = response
        .model_contributions
        .iter()
        .find(|r| r.source == ModelId::CryptoBert)
        .unwrap();
    assert_eq!(crypto.data.method(), AnalysisMethod::LocalFallback);

    let confidences: Vec<f64> = response
        .model_contributions
        .iter()
        .map(|r| r.confidence)
        .collect();
    let expected = (1.0 - variance(&confidences)).clamp(0.1, 0.95);
    assert!(tolerance_eq(response.consensus_score, expected));

    assert_eq!(response.strategy, Some(WeightingStrategy::Confidence));
    let sum: f64 = response.weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6);
    let total: f64 = confidences.iter().sum();
    for (w, c) in response.weights.iter().zip(&confidences) {
        assert!(tolerance_eq(*w, c / total));
    }

    assert_eq!(response.final_response, "Unified answer from the ensemble.");
    assert_eq!(backend.gemini_calls.load(Ordering::SeqCst), 1);
    assert_eq!(response.degradation, DegradationLevel::Partial);
    assert!(response.methodology.contains("local fallback: cryptobert"));
}

#[tokio::test(start_paused = true)]
async fn analyzers_run_concurrently() {
    let analyzers = ModelId::all()
        .iter()
        .map(|m| fake(*m, Behavior::Sleep(Duration::from_secs(5), 0.8)))
        .collect();
    let engine = engine(Arc::new(SynthesisOnly::default()), analyzers);
    let started = tokio::time::Instant::now();

    let response = engine
        .generate_ensemble_response("BTC outlook?", &MarketContext::default(), &EnsembleOptions::default())
        .await
        .unwrap();

    assert_eq!(response.model_contributions.len(), 5);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(response.degradation, DegradationLevel::Full);
}

#[tokio::test(start_paused = true)]
async fn timeout_cap_bounds_whole_analyzer() {
    let engine = engine(
        Arc::new(SynthesisOnly::default()),
        vec![
            fake(ModelId::Gemini, Behavior::Succeed(0.85)),
            fake(ModelId::FinBert, Behavior::Sleep(Duration::from_secs(60), 0.9)),
        ],
    );
    let options = EnsembleOptions {
        timeout_ms: Some(15_000),
        ..EnsembleOptions::for_models(
            &[ModelId::Gemini, ModelId::FinBert],
            WeightingStrategy::FastResponse,
        )
    };
    let started = tokio::time::Instant::now();

    let response = engine
        .generate_ensemble_response("Quick! BTC now?", &MarketContext::default(), &options)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(response.model_contributions.len(), 1);
    assert_eq!(response.model_contributions[0].source, ModelId::Gemini);
    assert_eq!(response.degradation, DegradationLevel::Partial);
}

// ── Strategy handling ────────────────────────────────────────────────────────

#[tokio::test]
async fn too_few_models_follow_strategy_fallback() {
    let engine = engine(
        Arc::new(SynthesisOnly::default()),
        vec![
            fake(ModelId::Gemini, Behavior::Succeed(0.85)),
            fake(ModelId::FinBert, Behavior::Succeed(0.75)),
            fake(ModelId::CryptoBert, Behavior::Fail),
        ],
    );
    let options = EnsembleOptions::default().with_strategy(WeightingStrategy::HighAccuracy);

    let response = engine
        .generate_ensemble_response("Deep dive on BTC", &MarketContext::default(), &options)
        .await
        .unwrap();

    // highAccuracy needs 3 models; performance needs 2
    assert_eq!(response.strategy, Some(WeightingStrategy::Performance));
    assert!(response.methodology.contains("fell back to performance"));
    let sum: f64 = response.weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn single_response_has_fixed_consensus() {
    let engine = engine(
        Arc::new(SynthesisOnly::default()),
        vec![fake(ModelId::Gemini, Behavior::Succeed(0.85))],
    );
    let options = EnsembleOptions::for_models(&[ModelId::Gemini], WeightingStrategy::Confidence);

    let response = engine
        .generate_ensemble_response("What is staking?", &MarketContext::default(), &options)
        .await
        .unwrap();

    assert_eq!(response.consensus_score, 0.5);
    assert_eq!(response.weights, vec![1.0]);
    // confidence needs 2 models and falls back to equal
    assert_eq!(response.strategy, Some(WeightingStrategy::Equal));
}

// ── Validation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_huggingface_key_is_configuration_error() {
    let engine = EnsembleEngine::with_backend(
        EnsembleConfig::default().with_gemini_key("g"),
        Arc::new(SynthesisOnly::default()),
        registry(),
    );

    let err = engine
        .generate_ensemble_response("BTC?", &MarketContext::default(), &EnsembleOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EnsembleError::Configuration(_)));

    // Gemini alone only needs the Gemini key
    let options = EnsembleOptions::for_models(&[ModelId::Gemini], WeightingStrategy::Equal);
    let engine = engine.with_analyzers(vec![fake(ModelId::Gemini, Behavior::Succeed(0.85))]);
    assert!(engine
        .generate_ensemble_response("BTC?", &MarketContext::default(), &options)
        .await
        .is_ok());
}

#[tokio::test]
async fn missing_gemini_key_is_configuration_error() {
    let engine = EnsembleEngine::with_backend(
        EnsembleConfig::default().with_huggingface_key("hf"),
        Arc::new(SynthesisOnly::default()),
        registry(),
    );
    let err = engine
        .generate_ensemble_response("BTC?", &MarketContext::default(), &EnsembleOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("GEMINI_API_KEY"));
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let engine = engine(Arc::new(SynthesisOnly::default()), vec![]);
    let err = engine
        .generate_ensemble_response("   ", &MarketContext::default(), &EnsembleOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EnsembleError::InvalidQuery(_)));
}

// ── Bookkeeping ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn contributing_models_are_recorded_in_registry() {
    let engine = engine(
        Arc::new(SynthesisOnly::default()),
        vec![
            fake(ModelId::Gemini, Behavior::Succeed(0.85)),
            fake(ModelId::FinBert, Behavior::Succeed(0.7)),
            fake(ModelId::CryptoBert, Behavior::Fail),
        ],
    );
    let options = EnsembleOptions::for_models(
        &[ModelId::Gemini, ModelId::FinBert, ModelId::CryptoBert],
        WeightingStrategy::Confidence,
    );

    engine
        .generate_ensemble_response("BTC?", &MarketContext::default(), &options)
        .await
        .unwrap();

    let registry = engine.registry();
    assert!(registry.get_model_performance(ModelId::Gemini).has_data());
    assert!(registry.get_model_performance(ModelId::FinBert).has_data());
    assert!(!registry.get_model_performance(ModelId::CryptoBert).has_data());
    assert_eq!(registry.history_len(ModelId::FinBert), 1);
}

#[tokio::test]
async fn synthesis_called_once_on_gemini() {
    let mut backend = MockBackend::new();
    backend
        .expect_call()
        .withf(|id, input, _| matches!(id, BackendId::Gemini(_)) && input.contains("Is SOL overheated?"))
        .times(1)
        .returning(|_, _, _| Ok(RawOutput::Text("  Merged view.  ".into())));

    let engine = engine(
        Arc::new(backend),
        vec![
            fake(ModelId::Gemini, Behavior::Succeed(0.85)),
            fake(ModelId::FinBert, Behavior::Succeed(0.7)),
        ],
    );
    let options = EnsembleOptions::for_models(
        &[ModelId::Gemini, ModelId::FinBert],
        WeightingStrategy::Confidence,
    );

    let response = engine
        .generate_ensemble_response("Is SOL overheated?", &MarketContext::default(), &options)
        .await
        .unwrap();

    assert_eq!(response.final_response, "Merged view.");
    assert_eq!(response.degradation, DegradationLevel::Full);
}

// ── Optimized entry point ────────────────────────────────────────────────────

#[tokio::test]
async fn optimized_response_uses_registry_plan() {
    let analyzers = ModelId::all()
        .iter()
        .map(|m| fake(*m, Behavior::Succeed(0.75)))
        .collect();
    let engine = engine(Arc::new(SynthesisOnly::default()), analyzers);

    let (_, plan) = engine.plan("What's the Bitcoin sentiment?");
    assert_eq!(plan.strategy, WeightingStrategy::Adaptive);

    let response = engine
        .generate_optimized_response("What's the Bitcoin sentiment?", &MarketContext::default())
        .await
        .unwrap();

    let sources: Vec<ModelId> = response
        .model_contributions
        .iter()
        .map(|r| r.source)
        .collect();
    assert_eq!(sources, plan.enabled_models);
    assert!(!sources.contains(&ModelId::TechnicalAnalyzer));
    assert_eq!(response.strategy, Some(WeightingStrategy::Adaptive));
}
