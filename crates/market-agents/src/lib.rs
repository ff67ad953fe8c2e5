//! Multi-model ensemble orchestrator for crypto market analysis.
//!
//! Fans a user query out to a general LLM and several specialized sentiment
//! and pattern models, tolerates partial failure, weighs the answers, and
//! synthesizes one response. Pure scoring and configuration logic lives in
//! the `coordination` crate; this crate owns everything that touches the
//! network.

pub mod analyzers;
pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;

pub use config::EnsembleConfig;
pub use engine::{EnsembleEngine, EnsembleOptions};
pub use errors::{AnalyzerError, BackendError, EnsembleError, RetryCategory};
