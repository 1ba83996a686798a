use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::MarketData;
use crate::market::Timeframe;
use crate::models::{Candle, PriceTicker, SymbolConstraints};
use crate::{Result, TradeError};

const RATE_LIMIT_PER_SECOND: u32 = 20;
const MAX_RETRIES: u32 = 3;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Public USDⓈ-M futures market data.
///
/// Cloneable; clones share the rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<BinanceRateLimiter>,
}

/// Response from /fapi/v1/ticker/24hr
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    last_price: String,
    #[serde(default)]
    price_change_percent: String,
    #[serde(default)]
    volume: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    min_qty: Option<String>,
    #[serde(default)]
    step_size: Option<String>,
}

impl BinanceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TradeError::Upstream(format!("Failed to build HTTP client: {}", e)))?;

        let quota = Quota::per_second(
            NonZeroU32::new(RATE_LIMIT_PER_SECOND).unwrap_or(NonZeroU32::MIN),
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Rate-limited GET with retry on 429 and 5xx.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let response = match self.client.get(&url).query(query).send().await {
                Ok(r) => r,
                Err(e) if attempt < MAX_RETRIES && !e.is_timeout() => {
                    tracing::warn!(
                        "Network error from Binance: {}, retrying (attempt {}/{})",
                        e,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response.text().await?);
            }

            if (status.as_u16() == 429 || status.is_server_error()) && attempt < MAX_RETRIES {
                tracing::warn!(
                    "Binance returned {}, backing off (attempt {}/{})",
                    status,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff(attempt)).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(TradeError::Upstream(format!(
                "Binance API error ({}): {}",
                status, body
            )));
        }

        Err(TradeError::Upstream(format!(
            "Binance request to {} failed after {} attempts",
            path, MAX_RETRIES
        )))
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(250 * 2u64.pow(attempt))
}

fn parse_f64(raw: &str, field: &str) -> Result<f64> {
    raw.parse()
        .map_err(|_| TradeError::Upstream(format!("invalid {} value {:?}", field, raw)))
}

fn parse_kline(row: &[Value]) -> Result<Candle> {
    if row.len() < 9 {
        return Err(TradeError::Upstream(format!(
            "kline row has {} fields, expected at least 9",
            row.len()
        )));
    }
    let num = |i: usize, field: &str| -> Result<f64> {
        match &row[i] {
            Value::String(s) => parse_f64(s, field),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| TradeError::Upstream(format!("invalid {}", field))),
            _ => Err(TradeError::Upstream(format!("invalid {}", field))),
        }
    };

    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| TradeError::Upstream("invalid kline open time".to_string()))?;
    let trades = row[8].as_u64().unwrap_or(0);

    Ok(Candle::new(
        open_time,
        num(1, "open")?,
        num(2, "high")?,
        num(3, "low")?,
        num(4, "close")?,
        num(5, "volume")?,
        trades,
    ))
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn current_price(&self, symbol: &str) -> Result<PriceTicker> {
        let body = self
            .get("/fapi/v1/ticker/24hr", &[("symbol", symbol.to_string())])
            .await?;
        let ticker: Ticker24h = serde_json::from_str(&body)
            .map_err(|e| TradeError::Upstream(format!("failed to parse ticker: {}", e)))?;

        Ok(PriceTicker {
            price: parse_f64(&ticker.last_price, "lastPrice")?,
            change_24h: ticker.price_change_percent.parse().unwrap_or(0.0),
            volume: ticker.volume.parse().unwrap_or(0.0),
        })
    }

    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let body = self
            .get(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", timeframe.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let rows: Vec<Vec<Value>> = serde_json::from_str(&body)
            .map_err(|e| TradeError::Upstream(format!("failed to parse klines: {}", e)))?;

        let candles = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            symbol = %symbol,
            timeframe = %timeframe,
            "Fetched {} candles",
            candles.len()
        );
        Ok(candles)
    }

    async fn symbol_constraints(&self, symbol: &str) -> Result<SymbolConstraints> {
        let body = self.get("/fapi/v1/exchangeInfo", &[]).await?;
        let info: ExchangeInfo = serde_json::from_str(&body)
            .map_err(|e| TradeError::Upstream(format!("failed to parse exchange info: {}", e)))?;

        let lot_size = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .and_then(|s| s.filters.iter().find(|f| f.filter_type == "LOT_SIZE"))
            .ok_or_else(|| TradeError::Upstream(format!("symbol {} not found", symbol)))?;

        let step_size = parse_f64(lot_size.step_size.as_deref().unwrap_or("0"), "stepSize")?;
        let min_quantity = parse_f64(lot_size.min_qty.as_deref().unwrap_or("0"), "minQty")?;
        if step_size <= 0.0 {
            return Err(TradeError::Upstream(format!(
                "symbol {} has no usable step size",
                symbol
            )));
        }

        Ok(SymbolConstraints {
            step_size,
            min_quantity,
        })
    }
}
