use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{now_micros, Direction, TradeOpinion};

/// Lifecycle of a signal. The only transition is `Active -> Executed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Active,
    Executed,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Active => "Active",
            SignalStatus::Executed => "Executed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" | "active" => Some(SignalStatus::Active),
            "Executed" | "executed" => Some(SignalStatus::Executed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
    pub confidence: u8,
    pub thoughts: String,
    pub leverage: u32,
    pub status: SignalStatus,
    pub model_used: String,
    pub timeframes_analyzed: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    pub execution_price: Option<f64>,
    pub is_testnet: bool,
}

impl TradingSignal {
    /// Build a fresh Active signal from an aggregated opinion.
    pub fn from_opinion(
        opinion: TradeOpinion,
        symbol: &str,
        model: &str,
        leverage: u32,
        timeframes: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction: opinion.direction,
            entry: opinion.entry,
            stop_loss: opinion.stop_loss,
            take_profit: opinion.take_profit,
            risk_reward: opinion.risk_reward,
            confidence: opinion.confidence,
            thoughts: opinion.thoughts,
            leverage,
            status: SignalStatus::Active,
            model_used: model.to_string(),
            timeframes_analyzed: timeframes,
            created_at: now_micros(),
            executed_at: None,
            transaction_id: None,
            execution_price: None,
            is_testnet: false,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.status == SignalStatus::Executed
    }

    /// First eight hex characters of the id, used in transaction ids.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub fn to_response(&self) -> TradingSignalResponse {
        TradingSignalResponse {
            id: self.id.to_string(),
            symbol: self.symbol.clone(),
            direction: self.direction,
            entry: self.entry,
            sl: self.stop_loss,
            tp: self.take_profit,
            rr: self.risk_reward,
            confidence: self.confidence,
            thoughts: self.thoughts.clone(),
            leverage: self.leverage,
            status: self.status,
            model: self.model_used.clone(),
            timeframes_analyzed: self.timeframes_analyzed.clone(),
            timestamp: self.created_at.to_rfc3339(),
            executed_at: self.executed_at.map(|t| t.to_rfc3339()),
            transaction_id: self.transaction_id.clone(),
            execution_price: self.execution_price,
            is_testnet: self.is_testnet,
        }
    }
}

/// Outward-facing shape of a signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingSignalResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub rr: f64,
    pub confidence: u8,
    pub thoughts: String,
    pub leverage: u32,
    pub status: SignalStatus,
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeframes_analyzed: Vec<String>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_price: Option<f64>,
    pub is_testnet: bool,
}
