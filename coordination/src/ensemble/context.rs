//! Market context supplied by the caller alongside each query.
//!
//! The ensemble never fetches market data itself; route handlers assemble a
//! [`MarketContext`] from whatever providers they use and hand it over as plain
//! data. Every field is optional so partially-populated context still works.

use serde::{Deserialize, Serialize};

/// Snapshot of one asset's market state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinSnapshot {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    /// 24h change in percent
    #[serde(default)]
    pub price_change_24h: f64,
    #[serde(default)]
    pub volume_24h: f64,
    #[serde(default)]
    pub market_cap: f64,
}

impl CoinSnapshot {
    /// Name for prose, falling back to the ticker symbol
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.symbol
        } else {
            &self.name
        }
    }
}

/// A recent news headline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsHeadline {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

/// Aggregate social-media activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialMentions {
    #[serde(default)]
    pub mentions: u64,
    /// Net sentiment in [-1, 1], if the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trending_terms: Vec<String>,
}

/// Market data accompanying a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketContext {
    /// Primary asset the query is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_coin: Option<CoinSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coins: Vec<CoinSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub news: Vec<NewsHeadline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social: Option<SocialMentions>,
}

impl MarketContext {
    /// Up to `limit` non-empty headline titles, most recent first as supplied
    pub fn recent_headlines(&self, limit: usize) -> Vec<&str> {
        self.news
            .iter()
            .map(|n| n.title.trim())
            .filter(|t| !t.is_empty())
            .take(limit)
            .collect()
    }

    /// Whether no market data was supplied at all
    pub fn is_empty(&self) -> bool {
        self.top_coin.is_none()
            && self.coins.is_empty()
            && self.news.is_empty()
            && self.social.is_none()
    }
}
