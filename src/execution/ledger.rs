use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::MarketData;
use crate::db::{PositionClose, RecordStore};
use crate::models::{
    now_micros, CreatePositionRequest, Direction, Environment, PerformanceSummary, Position,
    PositionStatus, Transaction, TransactionStatus, TransactionType, TradingSignal,
};
use crate::{Result, TradeError};

/// Positions and the transaction log. Open-position PnL is derived on read.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn RecordStore>,
    market: Arc<dyn MarketData>,
}

impl Ledger {
    pub fn new(store: Arc<dyn RecordStore>, market: Arc<dyn MarketData>) -> Self {
        Self { store, market }
    }

    /// Refresh `current_price` and PnL of an open position from the market.
    ///
    /// A failed price fetch leaves the position untouched.
    pub async fn recompute_pnl(&self, position: &mut Position) {
        if !position.is_open() {
            return;
        }
        match self.market.current_price(&position.symbol).await {
            Ok(ticker) if ticker.price > 0.0 => {
                let (pnl, pct) = position.pnl_at(ticker.price);
                position.current_price = ticker.price;
                position.pnl = pnl;
                position.pnl_percentage = pct;
            }
            Ok(ticker) => warn!(
                symbol = %position.symbol,
                "Ignoring non-positive price {} for PnL refresh",
                ticker.price
            ),
            Err(e) => warn!(symbol = %position.symbol, "PnL refresh failed: {}", e),
        }
    }

    /// Every position, newest first, open ones with fresh PnL.
    pub async fn list_positions(&self) -> Result<Vec<Position>> {
        let mut positions = self.store.list_positions().await?;
        for position in positions.iter_mut().filter(|p| p.is_open()) {
            self.recompute_pnl(position).await;
        }
        Ok(positions)
    }

    pub async fn get_position(&self, id: Uuid) -> Result<Position> {
        self.store
            .get_position(id)
            .await?
            .ok_or_else(|| TradeError::NotFound(format!("position {}", id)))
    }

    pub async fn aggregate_performance(&self) -> Result<PerformanceSummary> {
        let closed = self
            .store
            .list_positions_by_status(PositionStatus::Closed)
            .await?;
        Ok(summarize(&closed))
    }

    pub async fn list_transactions(&self, limit: usize) -> Result<Vec<Transaction>> {
        self.store.list_transactions(limit).await
    }

    /// Record the one-unit position opened by executing `signal`.
    pub async fn open_position(
        &self,
        signal: &TradingSignal,
        environment: Environment,
    ) -> Result<Position> {
        let position = Position {
            id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            size: 1.0,
            entry_price: signal.entry,
            current_price: signal.entry,
            leverage: signal.leverage,
            status: PositionStatus::Open,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            pnl: 0.0,
            pnl_percentage: 0.0,
            is_testnet: environment.is_testnet(),
            signal_id: Some(signal.id),
            created_at: now_micros(),
            closed_at: None,
            close_price: None,
        };
        self.store.insert_position(&position).await?;
        debug!(position_id = %position.id, "Opened {} {} position", position.direction, position.symbol);
        Ok(position)
    }

    /// Record a position opened outside the signal flow. Nothing is sent to
    /// the exchange.
    pub async fn create_position(&self, request: &CreatePositionRequest) -> Result<Position> {
        let symbol = request.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(invalid("Symbol is required"));
        }
        let direction = match request.direction.trim().to_ascii_uppercase().as_str() {
            "LONG" => Direction::Long,
            "SHORT" => Direction::Short,
            _ => return Err(invalid("Direction must be LONG or SHORT")),
        };
        if request.size.is_nan() || request.size <= 0.0 {
            return Err(invalid("Size must be greater than 0"));
        }
        if request.entry_price.is_nan() || request.entry_price <= 0.0 {
            return Err(invalid("Entry price must be greater than 0"));
        }
        if !(1..=125).contains(&request.leverage) {
            return Err(invalid("Leverage must be between 1 and 125"));
        }

        let position = Position {
            id: Uuid::new_v4(),
            symbol,
            direction,
            size: request.size,
            entry_price: request.entry_price,
            current_price: request.entry_price,
            leverage: request.leverage,
            status: PositionStatus::Open,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            pnl: 0.0,
            pnl_percentage: 0.0,
            is_testnet: request.is_testnet,
            signal_id: None,
            created_at: now_micros(),
            closed_at: None,
            close_price: None,
        };
        self.store.insert_position(&position).await?;
        debug!(position_id = %position.id, "Created {} {} position", position.direction, position.symbol);
        Ok(position)
    }

    /// Opening transaction for a freshly executed signal.
    pub fn opening_transaction(
        signal: &TradingSignal,
        position_id: Uuid,
        order_id: &str,
        environment: Environment,
    ) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            kind: TransactionType::opening(signal.direction),
            amount: 1.0,
            price: signal.entry,
            status: TransactionStatus::Success,
            pnl: 0.0,
            position_id: Some(position_id),
            signal_id: Some(signal.id),
            is_testnet: environment.is_testnet(),
            order_id: order_id.to_string(),
            description: format!(
                "{} {} position opened via AI signal",
                signal.direction, signal.symbol
            ),
            created_at: now_micros(),
        }
    }

    pub async fn record_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.store.insert_transaction(transaction).await
    }

    /// Transition `Open -> Closed` with realized PnL at `close_price`.
    ///
    /// Returns the closed position, or `NotOpen` if someone else closed it
    /// first.
    pub async fn close_position(&self, position: &Position, close_price: f64) -> Result<Position> {
        let (pnl, pnl_percentage) = position.pnl_at(close_price);
        let close = PositionClose {
            closed_at: now_micros(),
            close_price,
            pnl,
            pnl_percentage,
        };
        if !self.store.close_position(position.id, &close).await? {
            return Err(TradeError::NotOpen(position.id.to_string()));
        }

        let mut closed = position.clone();
        closed.status = PositionStatus::Closed;
        closed.closed_at = Some(close.closed_at);
        closed.close_price = Some(close_price);
        closed.current_price = close_price;
        closed.pnl = pnl;
        closed.pnl_percentage = pnl_percentage;
        Ok(closed)
    }
}

fn invalid(message: &str) -> TradeError {
    TradeError::InvalidInput(message.to_string())
}

/// Total PnL, win rate in percent and count over closed positions.
pub fn summarize(closed: &[Position]) -> PerformanceSummary {
    if closed.is_empty() {
        return PerformanceSummary::default();
    }
    let total_pnl: f64 = closed.iter().map(|p| p.pnl).sum();
    let wins = closed.iter().filter(|p| p.pnl > 0.0).count();
    PerformanceSummary {
        total_pnl,
        win_rate: wins as f64 / closed.len() as f64 * 100.0,
        closed_trades: closed.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::market::Timeframe;
    use crate::models::{Candle, Direction, PriceTicker, SymbolConstraints};
    use chrono::Utc;
    use async_trait::async_trait;

    struct FixedPrice(f64);

    #[async_trait]
    impl MarketData for FixedPrice {
        async fn current_price(&self, _symbol: &str) -> Result<PriceTicker> {
            if self.0 > 0.0 {
                Ok(PriceTicker {
                    price: self.0,
                    change_24h: 0.0,
                    volume: 0.0,
                })
            } else {
                Err(TradeError::Upstream("down".to_string()))
            }
        }

        async fn candles(&self, _s: &str, _tf: Timeframe, _l: usize) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn symbol_constraints(&self, _symbol: &str) -> Result<SymbolConstraints> {
            Err(TradeError::Upstream("unused".to_string()))
        }
    }

    fn position(pnl: f64, status: PositionStatus) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Short,
            size: 1.0,
            entry_price: 100.0,
            current_price: 100.0,
            leverage: 10,
            status,
            stop_loss: 105.0,
            take_profit: 90.0,
            pnl,
            pnl_percentage: 0.0,
            is_testnet: true,
            signal_id: None,
            created_at: Utc::now(),
            closed_at: None,
            close_price: None,
        }
    }

    #[test]
    fn test_summarize() {
        let closed = vec![
            position(50.0, PositionStatus::Closed),
            position(-20.0, PositionStatus::Closed),
            position(0.0, PositionStatus::Closed),
            position(30.0, PositionStatus::Closed),
        ];
        let summary = summarize(&closed);
        assert_eq!(summary.total_pnl, 60.0);
        assert_eq!(summary.win_rate, 50.0);
        assert_eq!(summary.closed_trades, 4);
        assert_eq!(summarize(&[]), PerformanceSummary::default());
    }

    #[tokio::test]
    async fn test_list_recomputes_only_open_positions() {
        let store = Arc::new(MemoryStore::new());
        let open = position(0.0, PositionStatus::Open);
        let mut closed = position(12.0, PositionStatus::Closed);
        closed.current_price = 98.8;
        store.insert_position(&open).await.unwrap();
        store.insert_position(&closed).await.unwrap();

        let ledger = Ledger::new(store, Arc::new(FixedPrice(98.0)));
        let listed = ledger.list_positions().await.unwrap();

        let o = listed.iter().find(|p| p.id == open.id).unwrap();
        assert_eq!(o.current_price, 98.0);
        assert_eq!(o.pnl, 20.0);
        assert_eq!(o.pnl_percentage, 20.0);

        let c = listed.iter().find(|p| p.id == closed.id).unwrap();
        assert_eq!(c.pnl, 12.0);
        assert_eq!(c.current_price, 98.8);
    }

    #[tokio::test]
    async fn test_price_failure_keeps_stored_values() {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), Arc::new(FixedPrice(0.0)));
        let mut p = position(3.0, PositionStatus::Open);
        ledger.recompute_pnl(&mut p).await;
        assert_eq!(p.pnl, 3.0);
        assert_eq!(p.current_price, 100.0);
    }

    fn create_request() -> CreatePositionRequest {
        CreatePositionRequest {
            symbol: " ethusdt".to_string(),
            direction: "short".to_string(),
            size: 0.5,
            entry_price: 3000.0,
            leverage: 10,
            is_testnet: true,
            stop_loss: 3100.0,
            take_profit: 2800.0,
        }
    }

    #[tokio::test]
    async fn test_create_position_opens_at_entry() {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), Arc::new(FixedPrice(0.0)));
        let p = ledger.create_position(&create_request()).await.unwrap();
        assert_eq!(p.symbol, "ETHUSDT");
        assert_eq!(p.direction, Direction::Short);
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(p.current_price, 3000.0);
        assert_eq!(p.pnl, 0.0);
        assert!(p.signal_id.is_none());
        assert_eq!(ledger.get_position(p.id).await.unwrap(), p);
    }

    #[tokio::test]
    async fn test_create_position_validation_messages() {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), Arc::new(FixedPrice(0.0)));
        let cases = [
            (CreatePositionRequest { symbol: "".into(), ..create_request() }, "Symbol is required"),
            (CreatePositionRequest { direction: "FLAT".into(), ..create_request() }, "Direction must be LONG or SHORT"),
            (CreatePositionRequest { size: 0.0, ..create_request() }, "Size must be greater than 0"),
            (CreatePositionRequest { entry_price: -1.0, ..create_request() }, "Entry price must be greater than 0"),
            (CreatePositionRequest { leverage: 0, ..create_request() }, "Leverage must be between 1 and 125"),
            (CreatePositionRequest { leverage: 126, ..create_request() }, "Leverage must be between 1 and 125"),
        ];
        for (request, message) in cases {
            let err = ledger.create_position(&request).await.unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid input: {}", message));
        }
        assert!(ledger.list_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_single_shot() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store, Arc::new(FixedPrice(98.0)));
        let p = position(0.0, PositionStatus::Open);
        ledger.store.insert_position(&p).await.unwrap();

        let closed = ledger.close_position(&p, 95.0).await.unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.pnl, 50.0);
        assert_eq!(closed.close_price, Some(95.0));

        let err = ledger.close_position(&p, 95.0).await.unwrap_err();
        assert!(matches!(err, TradeError::NotOpen(_)));

        let perf = ledger.aggregate_performance().await.unwrap();
        assert_eq!(perf.closed_trades, 1);
        assert_eq!(perf.win_rate, 100.0);
    }
}
