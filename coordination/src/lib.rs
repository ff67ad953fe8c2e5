//! Market Ensemble Coordination Library
//!
//! Pure, network-free core of the multi-model crypto market analysis
//! ensemble:
//! - Shared data model (`ModelId`, `ModelResponse`, `EnsembleResponse`)
//! - Weighting strategies and consensus scoring
//! - Synthesis prompt construction and the local fallback answer
//! - Model registry with static configuration and bounded performance history
//! - Keyword query classification feeding optimal model selection
//!
//! The async orchestrator that actually calls models lives in the
//! `market-agents` crate.

#![allow(clippy::uninlined_format_args)]

pub mod ensemble;
pub mod registry;
pub mod router;

// Re-export key ensemble types
pub use ensemble::{
    consensus_score, resolve_strategy, AnalysisMethod, AnalyzerPayload, ClassScore,
    DegradationLevel, EnsembleResponse, EnsembleStrategy, MarketContext, ModelId, ModelResponse,
    Sentiment, WeightingStrategy,
};

// Re-export model registry types
pub use registry::{
    ModelConfig, ModelPerformance, ModelRegistry, OptimalConfiguration, PerformanceSample,
    SharedModelRegistry,
};

// Re-export query routing types
pub use router::{Complexity, QueryAnalysis, QueryClassifier, Urgency};
