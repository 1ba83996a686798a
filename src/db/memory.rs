use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PositionClose, RecordStore, SignalExecution};
use crate::models::{Position, PositionStatus, SignalStatus, Transaction, TradingSignal};
use crate::Result;

#[derive(Default)]
struct Records {
    signals: HashMap<Uuid, TradingSignal>,
    positions: HashMap<Uuid, Position>,
    transactions: Vec<Transaction>,
}

/// In-process store used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_signal(&self, signal: &TradingSignal) -> Result<()> {
        self.records
            .write()
            .await
            .signals
            .insert(signal.id, signal.clone());
        Ok(())
    }

    async fn get_signal(&self, id: Uuid) -> Result<Option<TradingSignal>> {
        Ok(self.records.read().await.signals.get(&id).cloned())
    }

    async fn list_signals(&self, limit: usize) -> Result<Vec<TradingSignal>> {
        let records = self.records.read().await;
        let mut signals: Vec<TradingSignal> = records.signals.values().cloned().collect();
        signals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        signals.truncate(limit);
        Ok(signals)
    }

    async fn mark_signal_executed(&self, id: Uuid, execution: &SignalExecution) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.signals.get_mut(&id) {
            Some(signal) if signal.status == SignalStatus::Active => {
                signal.status = SignalStatus::Executed;
                signal.executed_at = Some(execution.executed_at);
                signal.execution_price = Some(execution.execution_price);
                signal.transaction_id = Some(execution.transaction_id.clone());
                signal.is_testnet = execution.is_testnet;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_position(&self, position: &Position) -> Result<()> {
        self.records
            .write()
            .await
            .positions
            .insert(position.id, position.clone());
        Ok(())
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>> {
        Ok(self.records.read().await.positions.get(&id).cloned())
    }

    async fn list_positions(&self) -> Result<Vec<Position>> {
        let records = self.records.read().await;
        let mut positions: Vec<Position> = records.positions.values().cloned().collect();
        positions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(positions)
    }

    async fn list_positions_by_status(&self, status: PositionStatus) -> Result<Vec<Position>> {
        Ok(self
            .list_positions()
            .await?
            .into_iter()
            .filter(|p| p.status == status)
            .collect())
    }

    async fn close_position(&self, id: Uuid, close: &PositionClose) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.positions.get_mut(&id) {
            Some(position) if position.status == PositionStatus::Open => {
                position.status = PositionStatus::Closed;
                position.closed_at = Some(close.closed_at);
                position.close_price = Some(close.close_price);
                position.current_price = close.close_price;
                position.pnl = close.pnl;
                position.pnl_percentage = close.pnl_percentage;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.records
            .write()
            .await
            .transactions
            .push(transaction.clone());
        Ok(())
    }

    async fn list_transactions(&self, limit: usize) -> Result<Vec<Transaction>> {
        let records = self.records.read().await;
        let mut transactions = records.transactions.clone();
        // Stable sort keeps insertion order reversed among equal timestamps.
        transactions.reverse();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        transactions.truncate(limit);
        Ok(transactions)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
