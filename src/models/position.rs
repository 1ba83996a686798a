use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "Open",
            PositionStatus::Closed => "Closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Open" => Some(PositionStatus::Open),
            "Closed" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

/// A leveraged position opened by executing a signal.
///
/// For open positions `current_price`, `pnl` and `pnl_percentage` are derived
/// at read time and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub leverage: u32,
    pub status: PositionStatus,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub pnl: f64,
    pub pnl_percentage: f64,
    pub is_testnet: bool,
    pub signal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_price: Option<f64>,
}

impl Position {
    /// Leveraged PnL at `price`, and its percentage of `entry * size`.
    pub fn pnl_at(&self, price: f64) -> (f64, f64) {
        let lev = self.leverage as f64;
        let pnl = match self.direction {
            Direction::Long => (price - self.entry_price) * self.size * lev,
            Direction::Short => (self.entry_price - price) * self.size * lev,
        };
        let basis = self.entry_price * self.size;
        let pct = if basis > 0.0 { pnl / basis * 100.0 } else { 0.0 };
        (pnl, pct)
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Buy,
    Sell,
    StopLoss,
    TakeProfit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
            TransactionType::StopLoss => "STOP_LOSS",
            TransactionType::TakeProfit => "TAKE_PROFIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(TransactionType::Buy),
            "SELL" => Some(TransactionType::Sell),
            "STOP_LOSS" => Some(TransactionType::StopLoss),
            "TAKE_PROFIT" => Some(TransactionType::TakeProfit),
            _ => None,
        }
    }

    /// BUY opens a LONG, SELL opens a SHORT.
    pub fn opening(direction: Direction) -> Self {
        match direction {
            Direction::Long => TransactionType::Buy,
            Direction::Short => TransactionType::Sell,
        }
    }

    /// The opposite side, used when a position is closed.
    pub fn closing(direction: Direction) -> Self {
        Self::opening(direction.opposite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Success,
    Failed,
    Pending,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "Success",
            TransactionStatus::Failed => "Failed",
            TransactionStatus::Pending => "Pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Success" => Some(TransactionStatus::Success),
            "Failed" => Some(TransactionStatus::Failed),
            "Pending" => Some(TransactionStatus::Pending),
            _ => None,
        }
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: f64,
    pub price: f64,
    pub status: TransactionStatus,
    pub pnl: f64,
    pub position_id: Option<Uuid>,
    pub signal_id: Option<Uuid>,
    pub is_testnet: bool,
    pub order_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(direction: Direction) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            direction,
            size: 1.0,
            entry_price: 100.0,
            current_price: 100.0,
            leverage: 20,
            status: PositionStatus::Open,
            stop_loss: 95.0,
            take_profit: 110.0,
            pnl: 0.0,
            pnl_percentage: 0.0,
            is_testnet: true,
            signal_id: None,
            created_at: Utc::now(),
            closed_at: None,
            close_price: None,
        }
    }

    #[test]
    fn test_long_pnl() {
        let (pnl, pct) = position(Direction::Long).pnl_at(102.0);
        assert_eq!(pnl, 40.0);
        assert_eq!(pct, 40.0);
    }

    #[test]
    fn test_short_pnl() {
        let (pnl, pct) = position(Direction::Short).pnl_at(102.0);
        assert_eq!(pnl, -40.0);
        assert_eq!(pct, -40.0);
    }

    #[test]
    fn test_zero_basis_has_zero_percentage() {
        let mut p = position(Direction::Long);
        p.entry_price = 0.0;
        let (_, pct) = p.pnl_at(5.0);
        assert_eq!(pct, 0.0);
    }

    #[test]
    fn test_transaction_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&TransactionType::TakeProfit).unwrap(),
            "\"TAKE_PROFIT\""
        );
        assert_eq!(TransactionType::opening(Direction::Short), TransactionType::Sell);
        assert_eq!(TransactionType::parse("STOP_LOSS"), Some(TransactionType::StopLoss));
    }
}
