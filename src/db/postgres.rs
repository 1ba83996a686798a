use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use super::{PositionClose, RecordStore, SignalExecution};
use crate::models::{
    Direction, Position, PositionStatus, SignalStatus, Transaction, TransactionStatus,
    TransactionType, TradingSignal,
};
use crate::{Result, TradeError};

const SIGNAL_COLUMNS: &str = r#"
    id, symbol, direction, entry, stop_loss, take_profit, risk_reward,
    confidence, thoughts, leverage, status, model_used, timeframes_analyzed,
    created_at, executed_at, transaction_id, execution_price, is_testnet
"#;

const POSITION_COLUMNS: &str = r#"
    id, symbol, direction, size, entry_price, current_price, leverage, status,
    stop_loss, take_profit, pnl, pnl_percentage, is_testnet, signal_id,
    created_at, closed_at, close_price
"#;

const TRANSACTION_COLUMNS: &str = r#"
    id, symbol, kind, amount, price, status, pnl, position_id, signal_id,
    is_testnet, order_id, description, created_at
"#;

/// Postgres persistence for signals, positions and transactions
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and run pending migrations
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    /// Delete every record (testing only)
    #[cfg(test)]
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query("TRUNCATE transactions, positions, trading_signals")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn to_f64(value: Decimal) -> Result<f64> {
    value
        .to_string()
        .parse()
        .map_err(|e| TradeError::Persistence(format!("numeric column {}: {}", value, e)))
}

/// Exact decimal for an f64, so it reads back bit-identical.
fn numeric(value: f64) -> Result<Decimal> {
    Decimal::from_f64_retain(value)
        .ok_or_else(|| TradeError::Persistence(format!("cannot store non-finite value {}", value)))
}

fn invalid(column: &str, value: &str) -> TradeError {
    TradeError::Persistence(format!("invalid {} value {:?}", column, value))
}

fn signal_from_row(row: &PgRow) -> Result<TradingSignal> {
    let direction: String = row.get("direction");
    let status: String = row.get("status");
    let confidence: i16 = row.get("confidence");
    let leverage: i32 = row.get("leverage");
    let execution_price: Option<Decimal> = row.get("execution_price");

    Ok(TradingSignal {
        id: row.get("id"),
        symbol: row.get("symbol"),
        direction: direction
            .parse::<Direction>()
            .map_err(|_| invalid("direction", &direction))?,
        entry: to_f64(row.get("entry"))?,
        stop_loss: to_f64(row.get("stop_loss"))?,
        take_profit: to_f64(row.get("take_profit"))?,
        risk_reward: to_f64(row.get("risk_reward"))?,
        confidence: confidence.clamp(0, 100) as u8,
        thoughts: row.get("thoughts"),
        leverage: leverage.max(0) as u32,
        status: SignalStatus::parse(&status).ok_or_else(|| invalid("status", &status))?,
        model_used: row.get("model_used"),
        timeframes_analyzed: row.get("timeframes_analyzed"),
        created_at: row.get("created_at"),
        executed_at: row.get("executed_at"),
        transaction_id: row.get("transaction_id"),
        execution_price: execution_price.map(to_f64).transpose()?,
        is_testnet: row.get("is_testnet"),
    })
}

fn position_from_row(row: &PgRow) -> Result<Position> {
    let direction: String = row.get("direction");
    let status: String = row.get("status");
    let leverage: i32 = row.get("leverage");
    let close_price: Option<Decimal> = row.get("close_price");

    Ok(Position {
        id: row.get("id"),
        symbol: row.get("symbol"),
        direction: direction
            .parse::<Direction>()
            .map_err(|_| invalid("direction", &direction))?,
        size: to_f64(row.get("size"))?,
        entry_price: to_f64(row.get("entry_price"))?,
        current_price: to_f64(row.get("current_price"))?,
        leverage: leverage.max(0) as u32,
        status: PositionStatus::parse(&status).ok_or_else(|| invalid("status", &status))?,
        stop_loss: to_f64(row.get("stop_loss"))?,
        take_profit: to_f64(row.get("take_profit"))?,
        pnl: to_f64(row.get("pnl"))?,
        pnl_percentage: to_f64(row.get("pnl_percentage"))?,
        is_testnet: row.get("is_testnet"),
        signal_id: row.get("signal_id"),
        created_at: row.get("created_at"),
        closed_at: row.get("closed_at"),
        close_price: close_price.map(to_f64).transpose()?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");

    Ok(Transaction {
        id: row.get("id"),
        symbol: row.get("symbol"),
        kind: TransactionType::parse(&kind).ok_or_else(|| invalid("kind", &kind))?,
        amount: to_f64(row.get("amount"))?,
        price: to_f64(row.get("price"))?,
        status: TransactionStatus::parse(&status).ok_or_else(|| invalid("status", &status))?,
        pnl: to_f64(row.get("pnl"))?,
        position_id: row.get("position_id"),
        signal_id: row.get("signal_id"),
        is_testnet: row.get("is_testnet"),
        order_id: row.get("order_id"),
        description: row.get("description"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn insert_signal(&self, signal: &TradingSignal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_signals (
                id, symbol, direction, entry, stop_loss, take_profit, risk_reward,
                confidence, thoughts, leverage, status, model_used, timeframes_analyzed,
                created_at, executed_at, transaction_id, execution_price, is_testnet
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(signal.id)
        .bind(&signal.symbol)
        .bind(signal.direction.as_str())
        .bind(numeric(signal.entry)?)
        .bind(numeric(signal.stop_loss)?)
        .bind(numeric(signal.take_profit)?)
        .bind(numeric(signal.risk_reward)?)
        .bind(signal.confidence as i16)
        .bind(&signal.thoughts)
        .bind(signal.leverage as i32)
        .bind(signal.status.as_str())
        .bind(&signal.model_used)
        .bind(&signal.timeframes_analyzed)
        .bind(signal.created_at)
        .bind(signal.executed_at)
        .bind(&signal.transaction_id)
        .bind(signal.execution_price.map(numeric).transpose()?)
        .bind(signal.is_testnet)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved signal {} for {} to Postgres", signal.id, signal.symbol);

        Ok(())
    }

    async fn get_signal(&self, id: Uuid) -> Result<Option<TradingSignal>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trading_signals WHERE id = $1",
            SIGNAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(signal_from_row).transpose()
    }

    async fn list_signals(&self, limit: usize) -> Result<Vec<TradingSignal>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trading_signals ORDER BY created_at DESC LIMIT $1",
            SIGNAL_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn mark_signal_executed(&self, id: Uuid, execution: &SignalExecution) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trading_signals
            SET status = 'Executed',
                executed_at = $2,
                execution_price = $3,
                transaction_id = $4,
                is_testnet = $5
            WHERE id = $1 AND status = 'Active'
            "#,
        )
        .bind(id)
        .bind(execution.executed_at)
        .bind(numeric(execution.execution_price)?)
        .bind(&execution.transaction_id)
        .bind(execution.is_testnet)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, symbol, direction, size, entry_price, current_price, leverage, status,
                stop_loss, take_profit, pnl, pnl_percentage, is_testnet, signal_id,
                created_at, closed_at, close_price
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(position.id)
        .bind(&position.symbol)
        .bind(position.direction.as_str())
        .bind(numeric(position.size)?)
        .bind(numeric(position.entry_price)?)
        .bind(numeric(position.current_price)?)
        .bind(position.leverage as i32)
        .bind(position.status.as_str())
        .bind(numeric(position.stop_loss)?)
        .bind(numeric(position.take_profit)?)
        .bind(numeric(position.pnl)?)
        .bind(numeric(position.pnl_percentage)?)
        .bind(position.is_testnet)
        .bind(position.signal_id)
        .bind(position.created_at)
        .bind(position.closed_at)
        .bind(position.close_price.map(numeric).transpose()?)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved position {} for {} to Postgres",
            position.id,
            position.symbol
        );

        Ok(())
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE id = $1",
            POSITION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn list_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM positions ORDER BY created_at DESC",
            POSITION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_from_row).collect()
    }

    async fn list_positions_by_status(&self, status: PositionStatus) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE status = $1 ORDER BY created_at DESC",
            POSITION_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_from_row).collect()
    }

    async fn close_position(&self, id: Uuid, close: &PositionClose) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'Closed',
                closed_at = $2,
                close_price = $3,
                current_price = $3,
                pnl = $4,
                pnl_percentage = $5
            WHERE id = $1 AND status = 'Open'
            "#,
        )
        .bind(id)
        .bind(close.closed_at)
        .bind(numeric(close.close_price)?)
        .bind(numeric(close.pnl)?)
        .bind(numeric(close.pnl_percentage)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, symbol, kind, amount, price, status, pnl, position_id, signal_id,
                is_testnet, order_id, description, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.symbol)
        .bind(transaction.kind.as_str())
        .bind(numeric(transaction.amount)?)
        .bind(numeric(transaction.price)?)
        .bind(transaction.status.as_str())
        .bind(numeric(transaction.pnl)?)
        .bind(transaction.position_id)
        .bind(transaction.signal_id)
        .bind(transaction.is_testnet)
        .bind(&transaction.order_id)
        .bind(&transaction.description)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_transactions(&self, limit: usize) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions ORDER BY created_at DESC LIMIT $1",
            TRANSACTION_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Postgres pool closed");
    }
}
