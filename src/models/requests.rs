use serde::{Deserialize, Serialize};

use super::signal::TradingSignalResponse;
use super::{Direction, Position, Transaction};
use crate::error::ErrorKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateSignalRequest {
    pub symbol: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeframes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTradeRequest {
    pub signal_id: String,
    #[serde(default)]
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTradeResponse {
    pub success: bool,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteManualSignalRequest {
    pub signal_json: String,
    #[serde(default)]
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteManualSignalResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<TradingSignalResponse>,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Raw, user-supplied signal document. Everything optional so validation can
/// report what is missing instead of a serde error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManualSignal {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub entry: Option<f64>,
    #[serde(default)]
    pub sl: Option<f64>,
    #[serde(default)]
    pub tp: Option<f64>,
    #[serde(default)]
    pub rr: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub thoughts: Option<String>,
    #[serde(default)]
    pub leverage: Option<u32>,
}

/// Generic `{ success, message }` envelope for operations without a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl<T> OperationResult<T> {
    pub fn from_result(result: crate::Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                message: String::new(),
                error_kind: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                message: e.to_string(),
                error_kind: Some(e.kind()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionResponse {
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    #[serde(rename = "totalPnL")]
    pub total_pnl: f64,
    pub win_rate: f64,
    pub closed_trades: usize,
}

/// Manually opened ledger position, not tied to a signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePositionRequest {
    pub symbol: String,
    pub direction: String,
    pub size: f64,
    pub entry_price: f64,
    pub leverage: u32,
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub take_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub asset: String,
    pub wallet_balance: f64,
    pub available_balance: f64,
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResponse {
    pub symbol: String,
    pub current_price: f64,
    #[serde(rename = "volume24h")]
    pub volume_24h: f64,
    #[serde(rename = "percentChange24h")]
    pub percent_change_24h: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub market_data: bool,
    pub reasoning: bool,
    pub brokerage_live: bool,
    pub brokerage_testnet: bool,
    pub database: bool,
    pub last_checked: chrono::DateTime<chrono::Utc>,
}

/// Direction helper used when validating manual signals.
pub(crate) fn parse_direction(raw: Option<&str>) -> crate::Result<Direction> {
    match raw {
        Some(s) if !s.trim().is_empty() => s.parse(),
        _ => Err(crate::TradeError::InvalidInput(
            "Invalid signal: missing required fields".to_string(),
        )),
    }
}
