//! Multi-model ensemble primitives
//!
//! Network-free building blocks of the market analysis ensemble. The
//! orchestrator in `market-agents` fans a query out to several analyzers and
//! then uses this module to weigh, score and merge what came back.
//!
//! # Architecture
//!
//! ```text
//!   query + MarketContext
//!            │
//!            ▼
//!   ┌─────────────────────────────────────────────┐
//!   │  analyzers (market-agents, concurrent)      │
//!   └──────────────────────┬──────────────────────┘
//!                          │ Vec<ModelResponse>
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!    ┌───────────┐   ┌───────────┐   ┌────────────┐
//!    │ Weighting │   │ Consensus │   │ Synthesis  │
//!    │ strategy  │   │  score    │   │ prompt /   │
//!    │           │   │           │   │ fallback   │
//!    └───────────┘   └───────────┘   └────────────┘
//!                          │
//!                          ▼
//!                  EnsembleResponse
//! ```
//!
//! # Components
//!
//! - **types**: `ModelId`, `ModelResponse`, `AnalyzerPayload`, `EnsembleResponse`
//! - **context**: `MarketContext` supplied by the caller
//! - **weighting**: named weighting strategies and their thresholds
//! - **consensus**: variance-based consensus score
//! - **synthesis**: synthesis prompt and local fallback answer

pub mod consensus;
pub mod context;
pub mod synthesis;
pub mod types;
pub mod weighting;

pub use consensus::{consensus_score, variance};
pub use context::{CoinSnapshot, MarketContext, NewsHeadline, SocialMentions};
pub use synthesis::{
    build_synthesis_prompt, describe_methodology, local_synthesis, FALLBACK_DISCLAIMER,
    NO_RESPONSE_APOLOGY, NO_RESPONSE_METHODOLOGY,
};
pub use types::{
    AnalysisMethod, AnalyzerPayload, ClassScore, DegradationLevel, EnsembleResponse, KeywordHits,
    ModelId, ModelResponse, Sentiment, SentimentPayload, TechnicalPayload, TextPayload,
    TrendClass, VolumeClass,
};
pub use weighting::{resolve_strategy, EnsembleStrategy, UnknownStrategy, WeightingStrategy};
