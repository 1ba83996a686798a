use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TradeError;

pub mod position;
pub mod requests;
pub mod signal;

pub use position::{Position, PositionStatus, Transaction, TransactionStatus, TransactionType};
pub use requests::*;
pub use signal::{SignalStatus, TradingSignal, TradingSignalResponse};

/// Current time at the precision the store keeps (microseconds).
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Trade direction. Serialized as `LONG` / `SHORT`; parsing is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// Order side that opens a position in this direction.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position in this direction.
    pub fn exit_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(TradeError::InvalidInput(format!(
                "direction must be LONG or SHORT, got {:?}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Direction {
    type Error = TradeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Direction> for String {
    fn from(d: Direction) -> Self {
        d.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Which exchange environment an order goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Testnet,
    Live,
}

impl Environment {
    pub fn from_testnet(is_testnet: bool) -> Self {
        if is_testnet {
            Environment::Testnet
        } else {
            Environment::Live
        }
    }

    pub fn is_testnet(&self) -> bool {
        matches!(self, Environment::Testnet)
    }

    /// Prefix used in transaction ids.
    pub fn label(&self) -> &'static str {
        match self {
            Environment::Testnet => "testnet",
            Environment::Live => "live",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// OHLCV candle enriched in place with indicator values.
///
/// Indicator fields are `NaN` until computed or while still inside their
/// warm-up window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub obv: f64,
}

impl Candle {
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        trade_count: u64,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            trade_count,
            rsi: f64::NAN,
            macd: f64::NAN,
            macd_signal: f64::NAN,
            macd_hist: f64::NAN,
            obv: f64::NAN,
        }
    }
}

/// Latest ticker for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTicker {
    pub price: f64,
    pub change_24h: f64,
    pub volume: f64,
}

/// Exchange lot-size filter for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolConstraints {
    pub step_size: f64,
    pub min_quantity: f64,
}

/// A single agent's (or the meta-aggregator's) trade recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOpinion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub direction: Direction,
    pub entry: f64,
    #[serde(rename = "sl")]
    pub stop_loss: f64,
    #[serde(rename = "tp")]
    pub take_profit: f64,
    #[serde(rename = "rr", default)]
    pub risk_reward: f64,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: u8,
    #[serde(default)]
    pub thoughts: String,
}

impl TradeOpinion {
    /// LONG: stop < entry < target. SHORT: target < entry < stop.
    pub fn validate_prices(&self) -> crate::Result<()> {
        let ordered = match self.direction {
            Direction::Long => self.stop_loss < self.entry && self.entry < self.take_profit,
            Direction::Short => self.take_profit < self.entry && self.entry < self.stop_loss,
        };
        if ordered && self.stop_loss > 0.0 && self.take_profit > 0.0 {
            Ok(())
        } else {
            Err(TradeError::MalformedOutput(format!(
                "inconsistent {} bracket: entry {}, sl {}, tp {}",
                self.direction, self.entry, self.stop_loss, self.take_profit
            )))
        }
    }

    /// Reward distance over risk distance, derived from the prices.
    pub fn computed_risk_reward(&self) -> Option<f64> {
        let (reward, risk) = match self.direction {
            Direction::Long => (self.take_profit - self.entry, self.entry - self.stop_loss),
            Direction::Short => (self.entry - self.take_profit, self.stop_loss - self.entry),
        };
        if risk > 0.0 {
            Some(reward / risk)
        } else {
            None
        }
    }

    /// Zero confidence is the "no valid setup" answer.
    pub fn is_actionable(&self) -> bool {
        self.confidence > 0
    }
}

/// Accepts integers or floats and clamps into 0..=100.
fn deserialize_confidence<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() {
        return Err(serde::de::Error::custom("confidence must be a finite number"));
    }
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}
