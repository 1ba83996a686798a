//! Persistence for signals, positions and transactions.
//!
//! The store is constructed once at startup and handed to every component as
//! `Arc<dyn RecordStore>`. Every mutation touches a single record; state
//! transitions are conditional on the current status so concurrent callers
//! cannot both win.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Position, PositionStatus, Transaction, TradingSignal};
use crate::Result;

/// Bookkeeping written together with the `Active -> Executed` transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalExecution {
    pub executed_at: DateTime<Utc>,
    pub execution_price: f64,
    pub transaction_id: String,
    pub is_testnet: bool,
}

/// Fields written together with the `Open -> Closed` transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionClose {
    pub closed_at: DateTime<Utc>,
    pub close_price: f64,
    pub pnl: f64,
    pub pnl_percentage: f64,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_signal(&self, signal: &TradingSignal) -> Result<()>;

    async fn get_signal(&self, id: Uuid) -> Result<Option<TradingSignal>>;

    /// Most recent first.
    async fn list_signals(&self, limit: usize) -> Result<Vec<TradingSignal>>;

    /// Returns false when the signal is missing or no longer Active.
    async fn mark_signal_executed(&self, id: Uuid, execution: &SignalExecution) -> Result<bool>;

    async fn insert_position(&self, position: &Position) -> Result<()>;

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>>;

    /// Most recent first.
    async fn list_positions(&self) -> Result<Vec<Position>>;

    async fn list_positions_by_status(&self, status: PositionStatus) -> Result<Vec<Position>>;

    /// Returns false when the position is missing or no longer Open.
    async fn close_position(&self, id: Uuid, close: &PositionClose) -> Result<bool>;

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()>;

    /// Most recent first.
    async fn list_transactions(&self, limit: usize) -> Result<Vec<Transaction>>;

    async fn ping(&self) -> Result<()>;

    async fn close(&self);
}
