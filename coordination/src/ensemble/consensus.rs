//! Consensus scoring over an ensemble's confidences.
//!
//! The score is `1 − variance(confidences)` clamped to `[0.1, 0.95]` for two or
//! more responses, a fixed `0.5` for a single response and `0.0` when nothing
//! responded. It measures spread of self-reported confidence, which is only a
//! proxy for agreement between the models' actual conclusions.

use super::types::ModelResponse;

/// Lower clamp for multi-model consensus
pub const MIN_CONSENSUS: f64 = 0.1;
/// Upper clamp for multi-model consensus
pub const MAX_CONSENSUS: f64 = 0.95;
/// Consensus reported when exactly one model responded
pub const SINGLE_MODEL_CONSENSUS: f64 = 0.5;

/// Population variance of `values` (0 for fewer than one value)
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Consensus score for a set of successful responses
pub fn consensus_score(responses: &[ModelResponse]) -> f64 {
    match responses.len() {
        0 => 0.0,
        1 => SINGLE_MODEL_CONSENSUS,
        _ => {
            let confidences: Vec<f64> = responses.iter().map(|r| r.confidence).collect();
            (1.0 - variance(&confidences)).clamp(MIN_CONSENSUS, MAX_CONSENSUS)
        }
    }
}
