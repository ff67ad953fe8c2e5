//! Lightweight keyword classification of user queries.
//!
//! Produces the flags the model registry uses to pick an ensemble subset
//! and weighting strategy. Matching is case-insensitive substring search,
//! deliberately cheap so it can run before every request.

use serde::{Deserialize, Serialize};

/// Estimated reasoning depth a query needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// How quickly the caller needs an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Classification flags for one query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub is_technical_query: bool,
    pub is_sentiment_query: bool,
    pub is_educational_query: bool,
    pub complexity: Complexity,
    pub urgency: Urgency,
    /// Keywords that triggered the flags above
    pub keywords: Vec<String>,
}

impl QueryAnalysis {
    /// Compact summary for logging
    pub fn summary(&self) -> String {
        format!(
            "technical={} sentiment={} educational={} complexity={} urgency={}",
            self.is_technical_query,
            self.is_sentiment_query,
            self.is_educational_query,
            self.complexity,
            self.urgency
        )
    }
}

const TECHNICAL_KEYWORDS: &[&str] = &[
    "chart",
    "support",
    "resistance",
    "rsi",
    "macd",
    "moving average",
    "volume",
    "trend",
    "pattern",
    "technical",
    "breakout",
    "candle",
    "price action",
    "indicator",
];

const SENTIMENT_KEYWORDS: &[&str] = &[
    "sentiment",
    "feel",
    "mood",
    "bullish",
    "bearish",
    "fear",
    "greed",
    "news",
    "social",
    "twitter",
    "hype",
    "opinion",
    "think about",
    "community",
];

const EDUCATIONAL_KEYWORDS: &[&str] = &[
    "what is",
    "what are",
    "how does",
    "how do",
    "explain",
    "learn",
    "beginner",
    "difference between",
    "define",
    "meaning of",
];

const COMPLEX_KEYWORDS: &[&str] = &[
    "compare",
    "correlation",
    "portfolio",
    "strategy",
    "risk",
    "volatility",
    "long term",
    "long-term",
    "forecast",
    "predict",
    "macro",
    "regulation",
    "why",
    "in depth",
    "detailed",
];

const URGENT_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "right now",
    "immediately",
    "quick",
    "quickly",
    "fast",
];

/// Queries longer than this add one complexity point
const LONG_QUERY_CHARS: usize = 200;

/// Keyword-based query classifier
#[derive(Debug, Clone, Default)]
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a query
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let q = query.to_lowercase();
        let mut keywords = Vec::new();
        let mut hits = |list: &[&str]| -> usize {
            let found: Vec<&str> = list.iter().copied().filter(|k| q.contains(k)).collect();
            keywords.extend(found.iter().map(|k| k.to_string()));
            found.len()
        };

        let technical = hits(TECHNICAL_KEYWORDS);
        let sentiment = hits(SENTIMENT_KEYWORDS);
        let educational = hits(EDUCATIONAL_KEYWORDS);
        let complex = hits(COMPLEX_KEYWORDS);
        let urgent = hits(URGENT_KEYWORDS);

        let mut score = complex;
        if query.len() > LONG_QUERY_CHARS {
            score += 1;
        }
        // Asking for several kinds of analysis at once is itself a sign of depth
        if [technical, sentiment, educational].iter().filter(|n| **n > 0).count() >= 2 {
            score += 1;
        }
        let complexity = match score {
            0 => Complexity::Low,
            1 | 2 => Complexity::Medium,
            _ => Complexity::High,
        };

        let urgency = if urgent > 0 {
            Urgency::High
        } else {
            Urgency::Normal
        };

        QueryAnalysis {
            is_technical_query: technical > 0,
            is_sentiment_query: sentiment > 0,
            is_educational_query: educational > 0,
            complexity,
            urgency,
            keywords,
        }
    }
}
