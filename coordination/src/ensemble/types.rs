//! Core ensemble types: model identities, per-model responses, and the
//! orchestrator's final answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::weighting::WeightingStrategy;

/// Identifier for each model participating in the ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelId {
    /// General-purpose LLM (Gemini) - reasoning and synthesis
    Gemini,
    /// FinBERT - financial sentiment classification
    #[serde(rename = "finbert")]
    FinBert,
    /// CryptoBERT - crypto-specialized sentiment classification
    #[serde(rename = "cryptobert")]
    CryptoBert,
    /// DistilRoBERTa fine-tuned on financial news headlines
    NewsRoberta,
    /// Pattern-recognition model over price/volume summaries
    TechnicalAnalyzer,
}

impl ModelId {
    /// Stable name used in configuration, logs and prompts
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gemini => "gemini",
            ModelId::FinBert => "finbert",
            ModelId::CryptoBert => "cryptobert",
            ModelId::NewsRoberta => "newsRoberta",
            ModelId::TechnicalAnalyzer => "technicalAnalyzer",
        }
    }

    /// Short label for the kind of analysis this model contributes
    pub fn analysis_type(&self) -> &'static str {
        match self {
            ModelId::Gemini => "general reasoning",
            ModelId::FinBert => "financial sentiment",
            ModelId::CryptoBert => "crypto sentiment",
            ModelId::NewsRoberta => "news sentiment",
            ModelId::TechnicalAnalyzer => "technical patterns",
        }
    }

    /// All models, in dispatch order
    pub fn all() -> &'static [ModelId] {
        &[
            ModelId::Gemini,
            ModelId::FinBert,
            ModelId::CryptoBert,
            ModelId::NewsRoberta,
            ModelId::TechnicalAnalyzer,
        ]
    }

    /// Parse a model name as written in configuration (case-insensitive)
    pub fn parse(name: &str) -> Option<ModelId> {
        ModelId::all()
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized sentiment label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    /// Normalize a classifier label into a sentiment.
    ///
    /// Handles the label vocabularies of the financial and crypto classifiers
    /// (`positive`, `Bullish`, ...) as well as the positional `LABEL_n` form
    /// emitted by three-class RoBERTa heads (0 = negative, 1 = neutral, 2 = positive).
    pub fn from_label(label: &str) -> Sentiment {
        match label.trim().to_lowercase().as_str() {
            "positive" | "bullish" | "pos" | "label_2" => Sentiment::Positive,
            "negative" | "bearish" | "neg" | "label_0" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// One `{label, score}` pair returned by a classification backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: String,
    pub score: f64,
}

/// How an analyzer produced its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    /// The remote model answered
    Model,
    /// The remote model failed and a local heuristic answered instead
    LocalFallback,
    /// Not enough input to analyze; a fixed low-confidence answer was returned
    InsufficientData,
}

/// Keyword match counts from the local sentiment lexicon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordHits {
    pub positive: usize,
    pub negative: usize,
}

/// Sentiment classification output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentPayload {
    pub sentiment: Sentiment,
    /// Mean score per normalized label across sub-calls
    pub scores: Vec<ClassScore>,
    /// Number of texts classified
    pub samples: usize,
    pub method: AnalysisMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_hits: Option<KeywordHits>,
}

/// Free-text model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub text: String,
    pub method: AnalysisMethod,
}

/// 24h price-change classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendClass {
    StrongBullish,
    ModerateBullish,
    Sideways,
    ModerateBearish,
    StrongBearish,
}

impl TrendClass {
    /// Classify a 24h percentage change.
    ///
    /// Above 5% is strong bullish, (2, 5] moderate bullish, [-2, 2] sideways,
    /// [-5, -2) moderate bearish, below -5% strong bearish.
    pub fn from_change(change_pct: f64) -> TrendClass {
        if change_pct > 5.0 {
            TrendClass::StrongBullish
        } else if change_pct > 2.0 {
            TrendClass::ModerateBullish
        } else if change_pct >= -2.0 {
            TrendClass::Sideways
        } else if change_pct >= -5.0 {
            TrendClass::ModerateBearish
        } else {
            TrendClass::StrongBearish
        }
    }
}

impl std::fmt::Display for TrendClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBullish => write!(f, "strong bullish"),
            Self::ModerateBullish => write!(f, "moderate bullish"),
            Self::Sideways => write!(f, "sideways"),
            Self::ModerateBearish => write!(f, "moderate bearish"),
            Self::StrongBearish => write!(f, "strong bearish"),
        }
    }
}

/// 24h volume classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeClass {
    High,
    Normal,
}

/// Volume above this (quote currency) counts as high
pub const HIGH_VOLUME_THRESHOLD: f64 = 1e8;

impl VolumeClass {
    pub fn from_volume(volume_24h: f64) -> VolumeClass {
        if volume_24h > HIGH_VOLUME_THRESHOLD {
            VolumeClass::High
        } else {
            VolumeClass::Normal
        }
    }
}

impl std::fmt::Display for VolumeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
        }
    }
}

/// Technical-pattern output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeClass>,
    /// Textual price/volume summary that was analyzed
    pub summary: String,
    /// Model interpretation, absent when the rule-based fallback answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    pub method: AnalysisMethod,
}

/// Analyzer output, normalized per analyzer family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalyzerPayload {
    Sentiment(SentimentPayload),
    Text(TextPayload),
    Technical(TechnicalPayload),
}

impl AnalyzerPayload {
    pub fn method(&self) -> AnalysisMethod {
        match self {
            Self::Sentiment(p) => p.method,
            Self::Text(p) => p.method,
            Self::Technical(p) => p.method,
        }
    }

    /// One-paragraph human-readable rendering of the payload
    pub fn summary(&self) -> String {
        match self {
            Self::Sentiment(p) => format!(
                "Sentiment reads {} across {} sample{}.",
                p.sentiment,
                p.samples,
                if p.samples == 1 { "" } else { "s" }
            ),
            Self::Text(p) => p.text.trim().to_string(),
            Self::Technical(p) => match &p.interpretation {
                Some(interp) => format!("{} {}", p.summary, interp.trim()),
                None => p.summary.clone(),
            },
        }
    }
}

/// One analyzer's output within a single ensemble request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Model that produced this response
    pub source: ModelId,
    /// Analyzer-specific quality estimate (0.0-1.0)
    pub confidence: f64,
    pub data: AnalyzerPayload,
    /// Wall-clock time of this analyzer call in milliseconds
    pub processing_time_ms: u64,
}

impl ModelResponse {
    pub fn new(
        source: ModelId,
        confidence: f64,
        data: AnalyzerPayload,
        processing_time_ms: u64,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            source,
            confidence,
            data,
            processing_time_ms,
        }
    }
}

/// How much of the ensemble answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Every enabled model answered from its backend and synthesis succeeded.
    Full,
    /// Some models failed or used a local fallback, or synthesis fell back.
    Partial,
    /// No model answered.
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// The orchestrator's final answer for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleResponse {
    pub request_id: Uuid,
    /// Synthesized answer text
    pub final_response: String,
    /// Successful analyzer outputs, in dispatch order
    pub model_contributions: Vec<ModelResponse>,
    /// Weight of each contribution (same order), summing to 1
    pub weights: Vec<f64>,
    /// Agreement among contributing models (0.0-1.0)
    pub consensus_score: f64,
    pub total_processing_time_ms: u64,
    pub methodology: String,
    /// Weighting strategy actually applied, absent when nothing responded
    pub strategy: Option<WeightingStrategy>,
    pub degradation: DegradationLevel,
    pub timestamp: DateTime<Utc>,
}

impl EnsembleResponse {
    /// Contribution with the highest confidence, if any
    pub fn top_contribution(&self) -> Option<&ModelResponse> {
        self.model_contributions
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}
