use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use super::Timeframe;
use crate::api::MarketData;
use crate::indicators;
use crate::models::Candle;
use crate::{Result, TradeError};

/// Enriched multi-timeframe view of one symbol, ready for prompting.
///
/// Built once, then shared read-only with the agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub current_price: f64,
    pub candles: BTreeMap<Timeframe, Vec<Candle>>,
}

impl MarketSnapshot {
    /// `current_price` line followed by one block per timeframe.
    pub fn render_market_data(&self, precision: usize, blank_after_header: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "current_price: {:.6}\n", self.current_price);
        for (tf, candles) in &self.candles {
            let _ = writeln!(out, "Market Data ({}, last {} candles):", tf, candles.len());
            if blank_after_header {
                out.push('\n');
            }
            for (i, candle) in candles.iter().enumerate() {
                out.push_str(&render_candle_line(i + 1, candle, precision));
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }

    /// Candles and indicators only, with no instructions attached.
    pub fn chart_prompt(&self) -> String {
        format!(
            "Candles and Indicators for {}\n\n{}",
            self.symbol,
            self.render_market_data(7, false)
        )
    }
}

pub fn render_candle_line(index: usize, c: &Candle, precision: usize) -> String {
    format!(
        "Candle {}: OpenTime: {}, Open: {:.p$}, High: {:.p$}, Low: {:.p$}, Close: {:.p$}, Volume: {:.2}, Trades: {}, RSI: {:.2}, MACD: {:.5}, OBV: {:.0}",
        index,
        c.open_time,
        c.open,
        c.high,
        c.low,
        c.close,
        c.volume,
        c.trade_count,
        c.rsi,
        c.macd,
        c.obv,
        p = precision
    )
}

pub struct SnapshotBuilder {
    market: Arc<dyn MarketData>,
    candle_limit: usize,
    prompt_window: usize,
}

impl SnapshotBuilder {
    pub fn new(market: Arc<dyn MarketData>, candle_limit: usize, prompt_window: usize) -> Self {
        Self {
            market,
            candle_limit,
            prompt_window,
        }
    }

    /// Fetch, enrich and trim candles for every timeframe, then the price.
    ///
    /// Indicators are computed over the full `candle_limit` history so the
    /// retained window carries warmed-up values.
    pub async fn build(&self, symbol: &str, timeframes: &[Timeframe]) -> Result<MarketSnapshot> {
        if symbol.trim().is_empty() {
            return Err(TradeError::InvalidInput("symbol is required".to_string()));
        }
        if timeframes.is_empty() {
            return Err(TradeError::InvalidInput(
                "at least one timeframe is required".to_string(),
            ));
        }

        let mut candles = BTreeMap::new();
        for &tf in timeframes {
            let mut series = self
                .market
                .candles(symbol, tf, self.candle_limit)
                .await
                .map_err(|e| match e {
                    TradeError::Upstream(msg) => TradeError::Upstream(format!(
                        "failed to fetch market data for {}: {}",
                        tf, msg
                    )),
                    other => other,
                })?;

            indicators::enrich(&mut series);

            let keep_from = series.len().saturating_sub(self.prompt_window);
            series.drain(..keep_from);
            candles.insert(tf, series);
        }

        let current_price = match self.market.current_price(symbol).await {
            Ok(ticker) => ticker.price,
            Err(e) => {
                tracing::warn!(symbol = %symbol, "Price fetch failed: {}", e);
                0.0
            }
        };
        if current_price.is_nan() || current_price <= 0.0 {
            return Err(TradeError::PriceUnavailable(symbol.to_string()));
        }

        tracing::info!(
            symbol = %symbol,
            "Snapshot built: price {:.6}, {} timeframe(s)",
            current_price,
            candles.len()
        );

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            current_price,
            candles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PriceTicker, SymbolConstraints};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeMarket {
        price: f64,
        candle_count: usize,
        requested: Mutex<Vec<(Timeframe, usize)>>,
    }

    impl FakeMarket {
        fn new(price: f64, candle_count: usize) -> Self {
            Self {
                price,
                candle_count,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MarketData for FakeMarket {
        async fn current_price(&self, _symbol: &str) -> Result<PriceTicker> {
            Ok(PriceTicker {
                price: self.price,
                change_24h: 0.0,
                volume: 0.0,
            })
        }

        async fn candles(&self, _symbol: &str, tf: Timeframe, limit: usize) -> Result<Vec<Candle>> {
            self.requested.lock().unwrap().push((tf, limit));
            Ok((0..self.candle_count.min(limit))
                .map(|i| {
                    let c = 100.0 + (i % 7) as f64;
                    Candle::new(i as i64 * 60_000, c, c + 1.0, c - 1.0, c, 10.0, 3)
                })
                .collect())
        }

        async fn symbol_constraints(&self, _symbol: &str) -> Result<SymbolConstraints> {
            Ok(SymbolConstraints {
                step_size: 0.001,
                min_quantity: 0.001,
            })
        }
    }

    #[tokio::test]
    async fn test_build_keeps_last_window_with_warm_indicators() {
        let market = Arc::new(FakeMarket::new(101.0, 70));
        let builder = SnapshotBuilder::new(market.clone(), 70, 35);

        let snap = builder
            .build("BTCUSDT", &[Timeframe::H1, Timeframe::M15])
            .await
            .unwrap();

        assert_eq!(snap.current_price, 101.0);
        let keys: Vec<Timeframe> = snap.candles.keys().copied().collect();
        assert_eq!(keys, vec![Timeframe::M15, Timeframe::H1]);
        let h1 = &snap.candles[&Timeframe::H1];
        assert_eq!(h1.len(), 35);
        assert_eq!(h1[0].open_time, 35 * 60_000);
        assert!(h1.iter().all(|c| !c.rsi.is_nan() && !c.macd.is_nan()));
        assert!(market.requested.lock().unwrap().iter().all(|(_, l)| *l == 70));
    }

    #[tokio::test]
    async fn test_short_history_is_kept_whole() {
        let builder = SnapshotBuilder::new(Arc::new(FakeMarket::new(101.0, 20)), 70, 35);
        let snap = builder.build("BTCUSDT", &[Timeframe::H1]).await.unwrap();
        assert_eq!(snap.candles[&Timeframe::H1].len(), 20);
    }

    #[tokio::test]
    async fn test_zero_price_is_unavailable() {
        let builder = SnapshotBuilder::new(Arc::new(FakeMarket::new(0.0, 70)), 70, 35);
        let err = builder.build("BTCUSDT", &[Timeframe::H1]).await.unwrap_err();
        assert!(matches!(err, TradeError::PriceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_timeframes_rejected() {
        let builder = SnapshotBuilder::new(Arc::new(FakeMarket::new(1.0, 70)), 70, 35);
        let err = builder.build("BTCUSDT", &[]).await.unwrap_err();
        assert!(matches!(err, TradeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_chart_prompt_format() {
        let builder = SnapshotBuilder::new(Arc::new(FakeMarket::new(101.5, 70)), 70, 35);
        let snap = builder.build("ETHUSDT", &[Timeframe::M5]).await.unwrap();
        let prompt = snap.chart_prompt();
        assert!(prompt.starts_with("Candles and Indicators for ETHUSDT\n\ncurrent_price: 101.500000"));
        assert!(prompt.contains("Market Data (5m, last 35 candles):\nCandle 1: OpenTime: "));
        assert!(prompt.contains("Candle 35: "));
    }

    #[test]
    fn test_candle_line_renders_undefined_indicators() {
        let line = render_candle_line(1, &Candle::new(0, 1.0, 2.0, 0.5, 1.5, 10.0, 3), 6);
        assert_eq!(
            line,
            "Candle 1: OpenTime: 0, Open: 1.000000, High: 2.000000, Low: 0.500000, Close: 1.500000, Volume: 10.00, Trades: 3, RSI: NaN, MACD: NaN, OBV: NaN"
        );
    }
}
