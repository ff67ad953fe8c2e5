use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use coordination::ensemble::{CoinSnapshot, TechnicalPayload, TrendClass, VolumeClass};
use coordination::{AnalysisMethod, AnalyzerPayload, MarketContext, ModelId, ModelResponse};
use tracing::warn;

use super::Analyzer;
use crate::backend::{call_with_retry, BackendId, CallBudget, InferenceBackend};
use crate::errors::{AnalyzerError, BackendError};

pub const MODEL_CONFIDENCE: f64 = 0.7;
pub const RULE_BASED_CONFIDENCE: f64 = 0.6;
pub const INSUFFICIENT_DATA_CONFIDENCE: f64 = 0.1;

/// Pattern interpretation of the primary asset's price and volume.
///
/// Falls back to a rule-based trend/volume classification when the backend
/// fails. Without a primary asset in context it answers with a fixed
/// low-confidence "insufficient data" response instead of failing.
pub struct TechnicalAnalyzer {
    backend: Arc<dyn InferenceBackend>,
    backend_id: BackendId,
}

impl TechnicalAnalyzer {
    pub fn new(backend: Arc<dyn InferenceBackend>, backend_id: BackendId) -> Self {
        Self {
            backend,
            backend_id,
        }
    }
}

#[async_trait]
impl Analyzer for TechnicalAnalyzer {
    fn model(&self) -> ModelId {
        ModelId::TechnicalAnalyzer
    }

    async fn analyze(
        &self,
        _query: &str,
        context: &MarketContext,
        budget: CallBudget,
    ) -> Result<ModelResponse, AnalyzerError> {
        let start = Instant::now();
        let Some(coin) = &context.top_coin else {
            return Ok(ModelResponse::new(
                ModelId::TechnicalAnalyzer,
                INSUFFICIENT_DATA_CONFIDENCE,
                AnalyzerPayload::Technical(insufficient_data()),
                start.elapsed().as_millis() as u64,
            ));
        };

        let summary = market_summary(coin);
        let prompt = format!(
            "Interpret this crypto market data as a technical analyst. Name the trend, \
             momentum and any notable pattern in two sentences.\n\n{summary}"
        );

        let interpretation = call_with_retry(self.backend.as_ref(), &self.backend_id, &prompt, budget)
            .await
            .and_then(|out| out.into_text())
            .and_then(|text| {
                let text = text.trim().to_string();
                if text.is_empty() {
                    Err(BackendError::Malformed("empty interpretation".into()))
                } else {
                    Ok(text)
                }
            });

        let (confidence, payload) = match interpretation {
            Ok(text) => (
                MODEL_CONFIDENCE,
                TechnicalPayload {
                    symbol: Some(coin.symbol.clone()),
                    trend: Some(TrendClass::from_change(coin.price_change_24h)),
                    volume: Some(VolumeClass::from_volume(coin.volume_24h)),
                    summary,
                    interpretation: Some(text),
                    method: AnalysisMethod::Model,
                },
            ),
            Err(e) => {
                warn!(
                    model = %ModelId::TechnicalAnalyzer,
                    error = %e,
                    "Backend unavailable, using rule-based analysis"
                );
                (RULE_BASED_CONFIDENCE, rule_based(coin))
            }
        };

        Ok(ModelResponse::new(
            ModelId::TechnicalAnalyzer,
            confidence,
            AnalyzerPayload::Technical(payload),
            start.elapsed().as_millis() as u64,
        ))
    }
}

/// Plain-text price, volume and market-cap line for the primary asset.
pub fn market_summary(coin: &CoinSnapshot) -> String {
    format!(
        "{} ({}) trades at ${:.2}, {:+.2}% over 24h, with 24h volume ${:.0} and market cap ${:.0}.",
        coin.display_name(),
        coin.symbol,
        coin.price,
        coin.price_change_24h,
        coin.volume_24h,
        coin.market_cap
    )
}

/// Deterministic trend and volume classification.
pub fn rule_based(coin: &CoinSnapshot) -> TechnicalPayload {
    let trend = TrendClass::from_change(coin.price_change_24h);
    let volume = VolumeClass::from_volume(coin.volume_24h);
    TechnicalPayload {
        symbol: Some(coin.symbol.clone()),
        trend: Some(trend),
        volume: Some(volume),
        summary: format!(
            "{} shows a {} trend ({:+.2}% over 24h) on {} volume.",
            coin.symbol, trend, coin.price_change_24h, volume
        ),
        interpretation: None,
        method: AnalysisMethod::LocalFallback,
    }
}

fn insufficient_data() -> TechnicalPayload {
    TechnicalPayload {
        symbol: None,
        trend: None,
        volume: None,
        summary: "Not enough market data for technical analysis.".to_string(),
        interpretation: None,
        method: AnalysisMethod::InsufficientData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RawOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceBackend for Counting {
        async fn call(
            &self,
            _backend: &BackendId,
            _input: &str,
            _timeout: Duration,
        ) -> Result<RawOutput, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(text) => Ok(RawOutput::Text(text.to_string())),
                None => Err(BackendError::Transport("refused".into())),
            }
        }
    }

    fn backend(reply: Option<&'static str>) -> Arc<Counting> {
        Arc::new(Counting {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn coin(change: f64, volume: f64) -> CoinSnapshot {
        CoinSnapshot {
            symbol: "BTC".into(),
            name: "Bitcoin".into(),
            price: 64123.456,
            price_change_24h: change,
            volume_24h: volume,
            market_cap: 1.26e12,
        }
    }

    fn with_coin(coin: CoinSnapshot) -> MarketContext {
        MarketContext {
            top_coin: Some(coin),
            ..Default::default()
        }
    }

    fn budget() -> CallBudget {
        CallBudget {
            timeout: Duration::from_secs(8),
            retries: 0,
        }
    }

    #[test]
    fn rule_based_strong_bullish() {
        let payload = rule_based(&coin(7.5, 3.2e10));
        assert_eq!(payload.trend, Some(TrendClass::StrongBullish));
        assert_eq!(payload.volume, Some(VolumeClass::High));
        assert!(payload.summary.contains("strong bullish"));
    }

    #[test]
    fn rule_based_sideways() {
        let payload = rule_based(&coin(-1.0, 5e7));
        assert_eq!(payload.trend, Some(TrendClass::Sideways));
        assert_eq!(payload.volume, Some(VolumeClass::Normal));
    }

    #[test]
    fn summary_formats_figures() {
        let summary = market_summary(&coin(-2.5, 1.5e9));
        assert!(summary.starts_with("Bitcoin (BTC) trades at $64123.46, -2.50% over 24h"));
    }

    #[tokio::test]
    async fn no_top_coin_is_insufficient_data_without_calling_backend() {
        let backend = backend(Some("uptrend"));
        let analyzer =
            TechnicalAnalyzer::new(backend.clone(), BackendId::HuggingFace("t".into()));
        let response = analyzer
            .analyze("chart?", &MarketContext::default(), budget())
            .await
            .unwrap();
        assert_eq!(response.confidence, INSUFFICIENT_DATA_CONFIDENCE);
        assert_eq!(response.data.method(), AnalysisMethod::InsufficientData);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn backend_interpretation_is_kept() {
        let analyzer = TechnicalAnalyzer::new(
            backend(Some(" Higher highs on rising volume. ")),
            BackendId::HuggingFace("t".into()),
        );
        let response = analyzer
            .analyze("chart?", &with_coin(coin(3.0, 2e9)), budget())
            .await
            .unwrap();
        assert_eq!(response.confidence, MODEL_CONFIDENCE);
        match response.data {
            AnalyzerPayload::Technical(p) => {
                assert_eq!(p.interpretation.as_deref(), Some("Higher highs on rising volume."));
                assert_eq!(p.trend, Some(TrendClass::ModerateBullish));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_failure_uses_rules() {
        let analyzer = TechnicalAnalyzer::new(backend(None), BackendId::HuggingFace("t".into()));
        let response = analyzer
            .analyze("chart?", &with_coin(coin(7.5, 2e9)), budget())
            .await
            .unwrap();
        assert_eq!(response.confidence, RULE_BASED_CONFIDENCE);
        assert_eq!(response.data.method(), AnalysisMethod::LocalFallback);
    }
}
