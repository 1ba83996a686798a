//! Request-level operations: generate, execute, close, and the read views.
//!
//! `TradingService` owns every collaborator. They are built once (from
//! [`Settings`] or injected directly) and handed to each component.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agents::SignalGenerator;
use crate::api::{
    BinanceClient, BinanceFuturesClient, Brokerage, MarketData, OpenAiClient, TextGenerator,
};
use crate::config::Settings;
use crate::db::{MemoryStore, PostgresStore, RecordStore};
use crate::execution::{ExecutionEngine, ExecutionReport, Ledger};
use crate::market::{SnapshotBuilder, Timeframe};
use crate::models::{
    now_micros, BalanceResponse, ClosePositionResponse, ConnectionStatus, CreatePositionRequest,
    Environment, ExecuteManualSignalRequest, ExecuteManualSignalResponse, ExecuteTradeRequest,
    ExecuteTradeResponse, GenerateSignalRequest, PerformanceSummary, Position, PriceResponse,
    Transaction, TradingSignalResponse,
};
use crate::risk::RiskPolicy;
use crate::signals::SignalLifecycle;
use crate::{Result, TradeError};

/// Symbol priced by `connection_status`.
const HEALTH_CHECK_SYMBOL: &str = "BTCUSDT";

pub struct TradingService {
    settings: Settings,
    store: Arc<dyn RecordStore>,
    market: Arc<dyn MarketData>,
    llm: Arc<dyn TextGenerator>,
    generator: SignalGenerator,
    engine: ExecutionEngine,
}

impl TradingService {
    /// Wire the real HTTP clients and pick the store from the settings.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let market: Arc<dyn MarketData> = Arc::new(BinanceClient::new(
            &settings.market.base_url,
            Duration::from_secs(settings.market.timeout_secs),
        )?);
        let llm: Arc<dyn TextGenerator> = Arc::new(OpenAiClient::new(&settings.llm)?);

        let brokerage_timeout = Duration::from_secs(settings.brokerage.timeout_secs);
        let live: Arc<dyn Brokerage> = Arc::new(BinanceFuturesClient::new(
            settings.brokerage.endpoint(Environment::Live),
            Environment::Live,
            brokerage_timeout,
        )?);
        let testnet: Arc<dyn Brokerage> = Arc::new(BinanceFuturesClient::new(
            settings.brokerage.endpoint(Environment::Testnet),
            Environment::Testnet,
            brokerage_timeout,
        )?);

        let store: Arc<dyn RecordStore> = match settings.database.url.as_deref() {
            Some(url) => {
                Arc::new(PostgresStore::new(url, settings.database.max_connections).await?)
            }
            None => {
                warn!("DATABASE_URL not set, records are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        info!(
            reasoning = llm.is_configured(),
            live = live.is_configured(),
            testnet = testnet.is_configured(),
            "Service initialized"
        );

        Ok(Self::new(settings, store, market, llm, live, testnet))
    }

    pub fn new(
        settings: Settings,
        store: Arc<dyn RecordStore>,
        market: Arc<dyn MarketData>,
        llm: Arc<dyn TextGenerator>,
        live: Arc<dyn Brokerage>,
        testnet: Arc<dyn Brokerage>,
    ) -> Self {
        let policy = RiskPolicy::from(&settings.risk);

        let snapshots = SnapshotBuilder::new(
            market.clone(),
            settings.market.candle_limit,
            settings.market.prompt_window,
        );
        let generator = SignalGenerator::new(
            snapshots,
            llm.clone(),
            settings.llm.timeout(),
            policy.default_leverage,
        );

        let lifecycle = SignalLifecycle::new(store.clone());
        let ledger = Ledger::new(store.clone(), market.clone());
        let engine = ExecutionEngine::new(
            lifecycle,
            ledger,
            market.clone(),
            live,
            testnet,
            policy,
            settings.risk.mock_success_rate,
        );

        Self {
            settings,
            store,
            market,
            llm,
            generator,
            engine,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Run the agents for a symbol and persist the resulting Active signal.
    ///
    /// Nothing is saved unless the whole pipeline succeeds.
    pub async fn generate_signal(
        &self,
        request: GenerateSignalRequest,
    ) -> Result<TradingSignalResponse> {
        let symbol = request.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(TradeError::InvalidInput("symbol is required".to_string()));
        }

        let model = self.settings.llm.resolve_model(request.model.as_deref());
        let timeframes = self.timeframes(&request.timeframes)?;

        let signal = match self.generator.generate(&symbol, &model, &timeframes).await {
            Ok(signal) => signal,
            Err(e) if e.is_upstream() => {
                warn!(symbol = %symbol, model = %model, "Signal generation aborted by collaborator: {}", e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.engine.lifecycle().save(&signal).await?;
        Ok(signal.to_response())
    }

    /// Execute a stored signal. Failures come back in the response body.
    pub async fn execute_signal(&self, request: ExecuteTradeRequest) -> ExecuteTradeResponse {
        let environment = Environment::from_testnet(request.is_testnet);
        let result = match self.engine.lifecycle().get_by_id(&request.signal_id).await {
            Ok(signal) => self.engine.execute(&signal, environment).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(report) => trade_success(report),
            Err(e) => {
                warn!(signal_id = %request.signal_id, "Trade execution failed: {}", e);
                trade_failure(e)
            }
        }
    }

    pub async fn execute_manual(
        &self,
        request: ExecuteManualSignalRequest,
    ) -> ExecuteManualSignalResponse {
        let environment = Environment::from_testnet(request.is_testnet);
        let (signal, result) = self
            .engine
            .execute_manual(&request.signal_json, environment)
            .await;
        let signal = signal.map(|s| s.to_response());

        match result {
            Ok(report) => ExecuteManualSignalResponse {
                success: true,
                signal,
                transaction_id: report.transaction_id,
                message: "Manual signal executed successfully".to_string(),
                error_kind: None,
            },
            Err(e) => {
                warn!("Manual signal execution failed: {}", e);
                let transaction_id = match &e {
                    TradeError::PartialExecution { transaction_id, .. } => transaction_id.clone(),
                    _ => String::new(),
                };
                ExecuteManualSignalResponse {
                    success: false,
                    signal,
                    transaction_id,
                    message: e.to_string(),
                    error_kind: Some(e.kind()),
                }
            }
        }
    }

    pub async fn close_position(&self, id: &str) -> Result<ClosePositionResponse> {
        let id = uuid::Uuid::parse_str(id.trim())
            .map_err(|_| TradeError::NotFound(format!("position {}", id)))?;
        self.engine.close_position(id).await
    }

    pub async fn positions(&self) -> Result<Vec<Position>> {
        self.engine.ledger().list_positions().await
    }

    pub async fn transactions(&self, limit: Option<usize>) -> Result<Vec<Transaction>> {
        let limit = limit.unwrap_or(self.settings.signals.list_limit);
        self.engine.ledger().list_transactions(limit).await
    }

    pub async fn performance(&self) -> Result<PerformanceSummary> {
        self.engine.ledger().aggregate_performance().await
    }

    pub async fn signal(&self, id: &str) -> Result<TradingSignalResponse> {
        let signal = self.engine.lifecycle().get_by_id(id).await?;
        Ok(signal.to_response())
    }

    /// Record a position by hand. No order is placed.
    pub async fn create_position(&self, request: CreatePositionRequest) -> Result<Position> {
        let position = self.engine.ledger().create_position(&request).await?;
        info!(position_id = %position.id, "Successfully created position");
        Ok(position)
    }

    /// Quote-asset balance of the brokerage account.
    pub async fn balance(&self, environment: Environment) -> Result<BalanceResponse> {
        let broker = self.engine.broker(environment);
        if !broker.is_configured() {
            return Err(TradeError::Unconfigured("binance API".to_string()));
        }

        let account = broker.account_info().await?;
        let asset = self.engine.policy().quote_asset.clone();
        let (wallet_balance, available_balance) = account
            .balance(&asset)
            .map(|b| (b.wallet_balance, b.available_balance))
            .unwrap_or((0.0, 0.0));

        Ok(BalanceResponse {
            asset,
            wallet_balance,
            available_balance,
            is_testnet: environment.is_testnet(),
        })
    }

    /// Latest ticker. Bare base assets get the quote asset appended.
    pub async fn price(&self, symbol: &str) -> Result<PriceResponse> {
        let symbol = self.normalize_symbol(symbol)?;
        let ticker = self.market.current_price(&symbol).await?;
        Ok(PriceResponse {
            symbol,
            current_price: ticker.price,
            volume_24h: ticker.volume,
            percent_change_24h: ticker.change_24h,
            timestamp: now_micros(),
        })
    }

    pub async fn signals(&self, limit: Option<usize>) -> Result<Vec<TradingSignalResponse>> {
        let limit = limit.unwrap_or(self.settings.signals.list_limit);
        let signals = self.engine.lifecycle().list(limit).await?;
        Ok(signals.iter().map(|s| s.to_response()).collect())
    }

    /// Candles and indicators for a symbol, rendered without instructions.
    pub async fn chart_data(&self, symbol: &str, timeframes: &[String]) -> Result<String> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let timeframes = self.timeframes(timeframes)?;
        let snapshot = self.generator.snapshots().build(&symbol, &timeframes).await?;
        Ok(snapshot.chart_prompt())
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        let market_data = match self.market.current_price(HEALTH_CHECK_SYMBOL).await {
            Ok(ticker) => ticker.price > 0.0,
            Err(e) => {
                warn!("Market data check failed: {}", e);
                false
            }
        };
        let database = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Database check failed: {}", e);
                false
            }
        };

        ConnectionStatus {
            market_data,
            reasoning: self.llm.is_configured(),
            brokerage_live: self.engine.broker(Environment::Live).is_configured(),
            brokerage_testnet: self.engine.broker(Environment::Testnet).is_configured(),
            database,
            last_checked: Utc::now(),
        }
    }

    /// Release the store's connections.
    pub async fn shutdown(&self) {
        self.store.close().await;
        info!("Service shut down");
    }

    fn normalize_symbol(&self, raw: &str) -> Result<String> {
        let symbol = raw.trim().to_ascii_uppercase();
        if symbol.len() < 3 {
            return Err(TradeError::InvalidInput(format!("Invalid symbol {:?}", raw)));
        }
        let quote = self.engine.policy().quote_asset.as_str();
        if symbol.ends_with(quote) {
            Ok(symbol)
        } else {
            Ok(format!("{}{}", symbol, quote))
        }
    }

    /// Requested timeframes, or the configured default when none are given.
    fn timeframes(&self, requested: &[String]) -> Result<Vec<Timeframe>> {
        if requested.is_empty() {
            return Timeframe::parse_list(&[self.settings.signals.default_timeframe.as_str()]);
        }
        Timeframe::parse_list(requested)
    }
}

fn trade_success(report: ExecutionReport) -> ExecuteTradeResponse {
    ExecuteTradeResponse {
        success: true,
        transaction_id: report.transaction_id,
        message: report.message,
        error_kind: None,
        position_id: Some(report.position.id.to_string()),
        warnings: report.warnings,
    }
}

fn trade_failure(e: TradeError) -> ExecuteTradeResponse {
    let (transaction_id, position_id) = match &e {
        TradeError::PartialExecution {
            position_id,
            transaction_id,
            ..
        } => (
            transaction_id.clone(),
            Some(position_id.clone()).filter(|id| !id.is_empty()),
        ),
        _ => (String::new(), None),
    };
    ExecuteTradeResponse {
        success: false,
        transaction_id,
        message: e.to_string(),
        error_kind: Some(e.kind()),
        position_id,
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_partial_execution_keeps_reconciliation_ids() {
        let response = trade_failure(TradeError::PartialExecution {
            position_id: "p1".to_string(),
            transaction_id: "live_9_abcdef12".to_string(),
            reason: "db down".to_string(),
        });
        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ErrorKind::PartialExecution));
        assert_eq!(response.transaction_id, "live_9_abcdef12");
        assert_eq!(response.position_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_plain_failure_has_no_ids() {
        let response = trade_failure(TradeError::AlreadyExecuted("x".to_string()));
        assert_eq!(response.error_kind, Some(ErrorKind::AlreadyExecuted));
        assert!(response.transaction_id.is_empty());
        assert!(response.position_id.is_none());
        assert_eq!(response.message, "Signal x is already executed");
    }
}
