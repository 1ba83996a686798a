use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::ledger::Ledger;
use crate::agents::strip_code_fence;
use crate::api::{Brokerage, MarketData, OrderRequest, OrderType};
use crate::models::{
    now_micros, parse_direction, ClosePositionResponse, Direction, Environment, ManualSignal, Position,
    SignalStatus, Transaction, TransactionStatus, TransactionType, TradingSignal,
};
use crate::risk::RiskPolicy;
use crate::signals::SignalLifecycle;
use crate::{Result, TradeError};

const PERSIST_ATTEMPTS: u32 = 3;
const MOCK_FAILURE_MESSAGE: &str = "Insufficient margin or market conditions unfavorable";

/// Outcome of a successful execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub transaction_id: String,
    pub message: String,
    pub execution_price: f64,
    pub simulated: bool,
    pub position: Position,
    pub transaction: Transaction,
    /// Best-effort steps that did not go through (bracket orders).
    pub warnings: Vec<String>,
}

/// Broker-side result of placing the entry.
struct Fill {
    transaction_id: String,
    message: String,
    simulated: bool,
    warnings: Vec<String>,
}

pub struct ExecutionEngine {
    lifecycle: SignalLifecycle,
    ledger: Ledger,
    market: Arc<dyn MarketData>,
    live: Arc<dyn Brokerage>,
    testnet: Arc<dyn Brokerage>,
    policy: RiskPolicy,
    mock_success_rate: f64,
    rng: Mutex<StdRng>,
    persist_backoff: Duration,
    in_flight: Mutex<HashSet<Uuid>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Exclusive claim on a signal while it is being executed.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<Uuid>>, id: Uuid) -> Option<Self> {
        if lock(set).insert(id) {
            Some(Self { set, id })
        } else {
            None
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}

impl ExecutionEngine {
    pub fn new(
        lifecycle: SignalLifecycle,
        ledger: Ledger,
        market: Arc<dyn MarketData>,
        live: Arc<dyn Brokerage>,
        testnet: Arc<dyn Brokerage>,
        policy: RiskPolicy,
        mock_success_rate: f64,
    ) -> Self {
        Self {
            lifecycle,
            ledger,
            market,
            live,
            testnet,
            policy,
            mock_success_rate,
            rng: Mutex::new(StdRng::from_entropy()),
            persist_backoff: Duration::from_millis(200),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Deterministic simulated fills.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_persist_backoff(mut self, backoff: Duration) -> Self {
        self.persist_backoff = backoff;
        self
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    pub fn lifecycle(&self) -> &SignalLifecycle {
        &self.lifecycle
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn broker(&self, environment: Environment) -> &Arc<dyn Brokerage> {
        match environment {
            Environment::Live => &self.live,
            Environment::Testnet => &self.testnet,
        }
    }

    /// Place the trade for an Active signal and record it.
    ///
    /// Without brokerage credentials the fill is simulated. Once the entry is
    /// filled nothing is unwound: ledger failures after that point surface
    /// as `PartialExecution`.
    ///
    /// A signal is claimed before any brokerage call, so concurrent calls for
    /// the same id place at most one entry.
    pub async fn execute(
        &self,
        signal: &TradingSignal,
        environment: Environment,
    ) -> Result<ExecutionReport> {
        if signal.entry.is_nan() || signal.entry <= 0.0 {
            return Err(TradeError::InvalidInput(format!(
                "signal {} has no entry price",
                signal.id
            )));
        }
        if signal.is_executed() {
            return Err(TradeError::AlreadyExecuted(signal.id.to_string()));
        }

        let _claim = InFlight::claim(&self.in_flight, signal.id)
            .ok_or_else(|| TradeError::AlreadyExecuted(signal.id.to_string()))?;
        // The caller's copy may be stale.
        if self.lifecycle.get(signal.id).await?.is_executed() {
            return Err(TradeError::AlreadyExecuted(signal.id.to_string()));
        }

        let broker = self.broker(environment);
        let fill = if broker.is_configured() {
            self.live_fill(broker.as_ref(), signal, environment).await?
        } else {
            info!(
                signal_id = %signal.id,
                "{} brokerage not configured, simulating execution",
                environment
            );
            self.mock_fill(signal, environment)?
        };

        let execution_price = match self.market.current_price(&signal.symbol).await {
            Ok(ticker) if ticker.price > 0.0 => ticker.price,
            Ok(_) => signal.entry,
            Err(e) => {
                warn!(symbol = %signal.symbol, "Price fetch after fill failed, using entry: {}", e);
                signal.entry
            }
        };

        self.record_execution(signal, environment, fill, execution_price)
            .await
    }

    async fn live_fill(
        &self,
        broker: &dyn Brokerage,
        signal: &TradingSignal,
        environment: Environment,
    ) -> Result<Fill> {
        let symbol = signal.symbol.as_str();

        if let Err(e) = broker.set_leverage(symbol, signal.leverage).await {
            warn!(symbol = %symbol, "Failed to set leverage {}x: {}", signal.leverage, e);
        }

        let account = broker.account_info().await?;
        let available = account.available_balance(&self.policy.quote_asset);
        if available <= 0.0 {
            return Err(TradeError::NoBalance(self.policy.quote_asset.clone()));
        }

        let constraints = self.market.symbol_constraints(symbol).await?;
        let sizing = self.policy.size_order(
            symbol,
            available,
            signal.leverage,
            signal.entry,
            &constraints,
        )?;
        let margin =
            self.policy
                .check_margin(sizing.quantity, signal.entry, signal.leverage, available)?;

        info!(
            symbol = %symbol,
            env = %broker.environment(),
            "Sizing {}: balance {:.2}, notional {:.2}, quantity {} (margin {:.2})",
            signal.direction,
            available,
            sizing.notional,
            sizing.quantity,
            margin
        );

        let entry = OrderRequest::market(symbol, signal.direction.entry_side(), sizing.quantity);
        let ack = broker
            .place_order(&entry)
            .await
            .map_err(|e| TradeError::OrderRejected(e.to_string()))?;

        let exit_side = signal.direction.exit_side();
        let brackets = [
            ("stop-loss", OrderType::StopMarket, signal.stop_loss),
            ("take-profit", OrderType::TakeProfitMarket, signal.take_profit),
        ];
        let mut warnings = Vec::new();
        for (label, order_type, trigger) in brackets {
            if trigger <= 0.0 {
                warnings.push(format!("No {} price on signal, order not placed", label));
                continue;
            }
            let order =
                OrderRequest::trigger(symbol, exit_side, order_type, sizing.quantity, trigger);
            if let Err(e) = broker.place_order(&order).await {
                warn!(symbol = %symbol, "Failed to place {} order at {}: {}", label, trigger, e);
                warnings.push(format!("Failed to place {} order: {}", label, e));
            }
        }

        Ok(Fill {
            transaction_id: format!(
                "{}_{}_{}",
                environment.label(),
                ack.order_id,
                signal.short_id()
            ),
            message: format!(
                "Successfully executed {} trade for {} - OrderID: {}",
                signal.direction, symbol, ack.order_id
            ),
            simulated: false,
            warnings,
        })
    }

    fn mock_fill(&self, signal: &TradingSignal, environment: Environment) -> Result<Fill> {
        let roll: f64 = lock(&self.rng).gen();

        if roll >= self.mock_success_rate {
            return Err(TradeError::OrderRejected(MOCK_FAILURE_MESSAGE.to_string()));
        }

        Ok(Fill {
            transaction_id: format!(
                "{}_{}_{}",
                environment.label(),
                Utc::now().timestamp(),
                signal.short_id()
            ),
            message: format!(
                "Successfully executed {} trade for {}",
                signal.direction, signal.symbol
            ),
            simulated: true,
            warnings: Vec::new(),
        })
    }

    /// Position, then transaction, then the signal transition.
    async fn record_execution(
        &self,
        signal: &TradingSignal,
        environment: Environment,
        fill: Fill,
        execution_price: f64,
    ) -> Result<ExecutionReport> {
        let position = match self
            .with_retry("position", || self.ledger.open_position(signal, environment))
            .await
        {
            Ok(p) => p,
            Err(e) => {
                return Err(self
                    .partial(signal, environment, &fill, None, execution_price, e)
                    .await)
            }
        };

        let transaction =
            Ledger::opening_transaction(signal, position.id, &fill.transaction_id, environment);
        if let Err(e) = self
            .with_retry("transaction", || self.ledger.record_transaction(&transaction))
            .await
        {
            return Err(self
                .partial(signal, environment, &fill, Some(position.id), execution_price, e)
                .await);
        }

        if let Err(e) = self
            .lifecycle
            .mark_executed(signal.id, execution_price, &fill.transaction_id, environment)
            .await
        {
            error!(signal_id = %signal.id, "Trade recorded but signal not marked executed: {}", e);
            return Err(TradeError::PartialExecution {
                position_id: position.id.to_string(),
                transaction_id: fill.transaction_id,
                reason: format!("signal status not updated: {}", e),
            });
        }

        info!(
            signal_id = %signal.id,
            position_id = %position.id,
            "{}",
            fill.message
        );

        Ok(ExecutionReport {
            transaction_id: fill.transaction_id,
            message: fill.message,
            execution_price,
            simulated: fill.simulated,
            position,
            transaction,
            warnings: fill.warnings,
        })
    }

    /// The entry is real but the ledger is incomplete. The signal is still
    /// marked Executed so it cannot be traded twice.
    async fn partial(
        &self,
        signal: &TradingSignal,
        environment: Environment,
        fill: &Fill,
        position_id: Option<Uuid>,
        execution_price: f64,
        cause: TradeError,
    ) -> TradeError {
        error!(
            signal_id = %signal.id,
            "Entry filled ({}) but ledger write failed: {}",
            fill.transaction_id,
            cause
        );
        if let Err(e) = self
            .lifecycle
            .mark_executed(signal.id, execution_price, &fill.transaction_id, environment)
            .await
        {
            error!(signal_id = %signal.id, "Could not mark signal executed: {}", e);
        }
        TradeError::PartialExecution {
            position_id: position_id.map(|id| id.to_string()).unwrap_or_default(),
            transaction_id: fill.transaction_id.clone(),
            reason: cause.to_string(),
        }
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < PERSIST_ATTEMPTS => {
                    warn!(
                        "Failed to record {}: {}, retrying (attempt {}/{})",
                        what, e, attempt, PERSIST_ATTEMPTS
                    );
                    tokio::time::sleep(self.persist_backoff * 2u32.pow(attempt - 1)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Flatten the exchange position behind an Open ledger position.
    ///
    /// The exchange-reported size is authoritative over the stored size.
    pub async fn close_position(&self, id: Uuid) -> Result<ClosePositionResponse> {
        let position = self.ledger.get_position(id).await?;
        if !position.is_open() {
            return Err(TradeError::NotOpen(id.to_string()));
        }

        let environment = Environment::from_testnet(position.is_testnet);
        let broker = self.broker(environment);
        if !broker.is_configured() {
            return Err(TradeError::Unconfigured("binance API".to_string()));
        }

        let account = broker.account_info().await?;
        let size = account.position_size(&position.symbol);
        if size <= 0.0 {
            return Err(TradeError::NoOpenPosition(position.symbol.clone()));
        }

        let order = OrderRequest::market(&position.symbol, position.direction.exit_side(), size)
            .reduce_only();
        let ack = broker
            .place_order(&order)
            .await
            .map_err(|e| TradeError::CloseOrderFailed(e.to_string()))?;

        let close_price = match ack.fill_price() {
            Some(price) => price,
            None => {
                let mut latest = position.clone();
                self.ledger.recompute_pnl(&mut latest).await;
                latest.current_price
            }
        };

        let order_id = format!(
            "{}_{}_{}",
            environment.label(),
            ack.order_id,
            &position.id.simple().to_string()[..8]
        );
        let closed = match self
            .with_retry("position close", || {
                self.ledger.close_position(&position, close_price)
            })
            .await
        {
            Ok(closed) => closed,
            Err(e) => {
                error!(
                    position_id = %position.id,
                    "Exchange position closed ({}) but ledger not updated: {}",
                    order_id,
                    e
                );
                return Err(TradeError::PartialClose {
                    position_id: position.id.to_string(),
                    order_id,
                    close_price,
                    reason: e.to_string(),
                });
            }
        };
        info!(
            position_id = %closed.id,
            "Closed {} {} at {} (PnL {:.2})",
            closed.direction,
            closed.symbol,
            close_price,
            closed.pnl
        );

        let transaction = Transaction {
            id: Uuid::new_v4(),
            symbol: closed.symbol.clone(),
            kind: TransactionType::closing(closed.direction),
            amount: size,
            price: close_price,
            status: TransactionStatus::Success,
            pnl: closed.pnl,
            position_id: Some(closed.id),
            signal_id: closed.signal_id,
            is_testnet: closed.is_testnet,
            order_id,
            description: format!("{} {} position closed", closed.direction, closed.symbol),
            created_at: now_micros(),
        };
        let transaction = match self.ledger.record_transaction(&transaction).await {
            Ok(()) => Some(transaction),
            Err(e) => {
                warn!(position_id = %closed.id, "Failed to record closing transaction: {}", e);
                None
            }
        };

        Ok(ClosePositionResponse {
            position: closed,
            transaction,
        })
    }

    /// Validate a user-supplied signal document, save it, then execute it.
    ///
    /// Returns the saved signal even when execution fails afterwards.
    pub async fn execute_manual(
        &self,
        raw: &str,
        environment: Environment,
    ) -> (Option<TradingSignal>, Result<ExecutionReport>) {
        let signal = match self.manual_signal(raw, environment) {
            Ok(s) => s,
            Err(e) => return (None, Err(e)),
        };
        if let Err(e) = self.lifecycle.save(&signal).await {
            return (None, Err(e));
        }

        let result = self.execute(&signal, environment).await;
        let latest = match self.lifecycle.get(signal.id).await {
            Ok(s) => s,
            Err(_) => signal,
        };
        (Some(latest), result)
    }

    fn manual_signal(&self, raw: &str, environment: Environment) -> Result<TradingSignal> {
        let doc: ManualSignal = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| TradeError::InvalidInput(format!("Invalid JSON format: {}", e)))?;

        let symbol = match doc.symbol.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_ascii_uppercase(),
            _ => return Err(missing_fields()),
        };
        let direction = parse_direction(doc.direction.as_deref())?;
        let entry = match doc.entry {
            Some(e) if e > 0.0 => e,
            _ => return Err(missing_fields()),
        };

        let mut signal = TradingSignal {
            id: Uuid::new_v4(),
            symbol,
            direction,
            entry,
            stop_loss: doc.sl.unwrap_or(0.0),
            take_profit: doc.tp.unwrap_or(0.0),
            risk_reward: doc.rr.unwrap_or(0.0),
            confidence: doc
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.round().clamp(0.0, 100.0) as u8)
                .unwrap_or(0),
            thoughts: doc.thoughts.unwrap_or_default(),
            leverage: doc
                .leverage
                .filter(|l| *l > 0)
                .unwrap_or(self.policy.default_leverage),
            status: SignalStatus::Active,
            model_used: "manual".to_string(),
            timeframes_analyzed: Vec::new(),
            created_at: now_micros(),
            executed_at: None,
            transaction_id: None,
            execution_price: None,
            is_testnet: environment.is_testnet(),
        };

        let (reward, risk) = match direction {
            Direction::Long => (signal.take_profit - entry, entry - signal.stop_loss),
            Direction::Short => (entry - signal.take_profit, signal.stop_loss - entry),
        };
        if signal.stop_loss > 0.0 && signal.take_profit > 0.0 && risk > 0.0 && reward > 0.0 {
            signal.risk_reward = reward / risk;
        }
        Ok(signal)
    }
}

fn missing_fields() -> TradeError {
    TradeError::InvalidInput("Invalid signal: missing required fields".to_string())
}
