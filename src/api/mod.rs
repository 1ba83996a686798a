//! External collaborators: market data, text generation and the brokerage.
//!
//! Each is a trait so the pipeline can run against the real HTTP clients or
//! in-process fakes.

pub mod binance;
pub mod binance_futures;
pub mod openai;

pub use binance::BinanceClient;
pub use binance_futures::BinanceFuturesClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::market::Timeframe;
use crate::models::{Candle, Environment, OrderSide, PriceTicker, SymbolConstraints};
use crate::Result;

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<PriceTicker>;

    /// Most recent `limit` candles, oldest first.
    async fn candles(&self, symbol: &str, timeframe: Timeframe, limit: usize)
        -> Result<Vec<Candle>>;

    async fn symbol_constraints(&self, symbol: &str) -> Result<SymbolConstraints>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn complete(&self, model: &str, prompt: &str) -> Result<String>;
}

/// Futures brokerage for one environment.
#[async_trait]
pub trait Brokerage: Send + Sync {
    /// False means no credentials; execution then takes the simulated path.
    fn is_configured(&self) -> bool;

    fn environment(&self) -> Environment;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn account_info(&self) -> Result<AccountInfo>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<OrderAck>;

    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<OrderAck>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub wallet_balance: f64,
    pub available_balance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub position_side: String,
    /// Signed; negative for shorts.
    pub amount: f64,
    pub entry_price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<AssetBalance>,
    pub positions: Vec<ExchangePosition>,
}

impl AccountInfo {
    pub fn balance(&self, asset: &str) -> Option<&AssetBalance> {
        self.balances.iter().find(|b| b.asset == asset)
    }

    pub fn available_balance(&self, asset: &str) -> f64 {
        self.balance(asset).map(|b| b.available_balance).unwrap_or(0.0)
    }

    /// Absolute one-way (`BOTH`) position size for `symbol`, 0 if flat.
    pub fn position_size(&self, symbol: &str) -> f64 {
        self.positions
            .iter()
            .find(|p| p.symbol == symbol && p.position_side == "BOTH" && p.amount != 0.0)
            .map(|p| p.amount.abs())
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub stop_price: Option<f64>,
    pub reduce_only: bool,
    /// One-way mode, always `BOTH`.
    pub position_side: &'static str,
    pub working_type: Option<&'static str>,
    pub time_in_force: Option<&'static str>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            stop_price: None,
            reduce_only: false,
            position_side: "BOTH",
            working_type: None,
            time_in_force: None,
        }
    }

    /// Reduce-only trigger order on mark price, good till the position closes.
    pub fn trigger(
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        stop_price: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            stop_price: Some(stop_price),
            reduce_only: true,
            position_side: "BOTH",
            working_type: Some("MARK_PRICE"),
            time_in_force: Some("GTE_GTC"),
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
    pub price: f64,
    pub avg_price: f64,
    pub executed_qty: f64,
}

impl OrderAck {
    /// Average fill price, else the order price, when positive.
    pub fn fill_price(&self) -> Option<f64> {
        [self.avg_price, self.price].into_iter().find(|p| *p > 0.0)
    }
}
