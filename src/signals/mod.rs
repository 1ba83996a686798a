//! Signal lifecycle: `Active -> Executed`, exactly once.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::db::{RecordStore, SignalExecution};
use crate::models::{now_micros, Environment, TradingSignal};
use crate::{Result, TradeError};

#[derive(Clone)]
pub struct SignalLifecycle {
    store: Arc<dyn RecordStore>,
}

/// Parse a signal id. Malformed ids are reported as missing.
pub fn parse_signal_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id.trim()).map_err(|_| TradeError::NotFound(format!("signal {}", id)))
}

impl SignalLifecycle {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, signal: &TradingSignal) -> Result<()> {
        self.store.insert_signal(signal).await.map_err(persistence)?;
        info!(signal_id = %signal.id, "Saved {} signal for {}", signal.direction, signal.symbol);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<TradingSignal> {
        self.store
            .get_signal(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| TradeError::NotFound(format!("signal {}", id)))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<TradingSignal> {
        self.get(parse_signal_id(id)?).await
    }

    /// Most recent first, at most `limit`.
    pub async fn list(&self, limit: usize) -> Result<Vec<TradingSignal>> {
        self.store.list_signals(limit).await.map_err(persistence)
    }

    /// Compare-and-set on status; a second call fails with `AlreadyExecuted`.
    pub async fn mark_executed(
        &self,
        id: Uuid,
        execution_price: f64,
        transaction_id: &str,
        environment: Environment,
    ) -> Result<()> {
        let execution = SignalExecution {
            executed_at: now_micros(),
            execution_price,
            transaction_id: transaction_id.to_string(),
            is_testnet: environment.is_testnet(),
        };

        if self
            .store
            .mark_signal_executed(id, &execution)
            .await
            .map_err(persistence)?
        {
            info!(signal_id = %id, "Signal marked executed ({})", transaction_id);
            return Ok(());
        }

        // Lost the race or never existed; tell the two apart.
        match self.store.get_signal(id).await.map_err(persistence)? {
            Some(_) => Err(TradeError::AlreadyExecuted(id.to_string())),
            None => Err(TradeError::NotFound(format!("signal {}", id))),
        }
    }
}

/// Store failures surface as persistence errors whatever the backend said.
fn persistence(e: TradeError) -> TradeError {
    match e {
        TradeError::Persistence(_) => e,
        other => TradeError::Persistence(other.to_string()),
    }
}
