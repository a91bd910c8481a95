//! Mocked broker gateway for testing without a terminal connection

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use prop_engine::{
    AccountSnapshot, BrokerError, BrokerGateway, Candle, HistoricalOrder, OrderRequest, Position,
    Timeframe,
};

/// Scriptable gateway: market state, account, positions, and failure
/// injection are all controlled by the test
pub struct MockGateway {
    account: Mutex<AccountSnapshot>,
    positions: Mutex<Vec<Position>>,
    history: Mutex<Vec<HistoricalOrder>>,
    bars: Mutex<Vec<Candle>>,
    market_open: AtomicBool,
    fail_closures: AtomicBool,
    close_calls: AtomicUsize,
    placed_orders: Mutex<Vec<OrderRequest>>,
    server_offset: FixedOffset,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            account: Mutex::new(AccountSnapshot {
                balance: Decimal::from(10_000),
                equity: Decimal::from(10_000),
                profit: Decimal::ZERO,
                margin: Decimal::ZERO,
                margin_free: Decimal::from(10_000),
            }),
            positions: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            bars: Mutex::new(Vec::new()),
            market_open: AtomicBool::new(true),
            fail_closures: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            placed_orders: Mutex::new(Vec::new()),
            server_offset: FixedOffset::east_opt(0).unwrap(),
        }
    }

    pub fn with_market_open(self, open: bool) -> Self {
        self.market_open.store(open, Ordering::SeqCst);
        self
    }

    pub fn with_positions(self, positions: Vec<Position>) -> Self {
        *self.positions.lock().unwrap() = positions;
        self
    }

    pub fn with_account(self, account: AccountSnapshot) -> Self {
        *self.account.lock().unwrap() = account;
        self
    }

    pub fn with_server_offset(mut self, offset: FixedOffset) -> Self {
        self.server_offset = offset;
        self
    }

    pub fn with_failing_closures(self) -> Self {
        self.fail_closures.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_market_open(&self, open: bool) {
        self.market_open.store(open, Ordering::SeqCst);
    }

    pub fn set_fail_closures(&self, fail: bool) {
        self.fail_closures.store(fail, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed_orders.lock().unwrap().clone()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerGateway for MockGateway {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, BrokerError> {
        Ok(*self.account.lock().unwrap())
    }

    async fn open_positions(&self) -> Result<Vec<Position>, BrokerError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn trade_history(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoricalOrder>, BrokerError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.executed_at >= since)
            .cloned()
            .collect())
    }

    async fn is_market_open(&self) -> bool {
        self.market_open.load(Ordering::SeqCst)
    }

    async fn close_position(&self, ticket: u64) -> Result<(), BrokerError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_closures.load(Ordering::SeqCst) {
            return Err(BrokerError::Rejected(format!(
                "closure of {} rejected",
                ticket
            )));
        }
        self.positions.lock().unwrap().retain(|p| p.ticket != ticket);
        Ok(())
    }

    async fn place_order(&self, order: OrderRequest) -> Result<(), BrokerError> {
        if !self.market_open.load(Ordering::SeqCst) {
            return Err(BrokerError::Rejected("market closed".to_string()));
        }
        self.placed_orders.lock().unwrap().push(order);
        Ok(())
    }

    async fn price_bars(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, BrokerError> {
        let bars = self.bars.lock().unwrap();
        let start = bars.len().saturating_sub(count);
        Ok(bars[start..].to_vec())
    }

    fn server_utc_offset(&self) -> FixedOffset {
        self.server_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use prop_engine::PositionSide;

    fn sample_position(ticket: u64) -> Position {
        Position {
            ticket,
            symbol: "EURUSD".to_string(),
            direction: PositionSide::Buy,
            volume: Decimal::new(1, 2),
            open_price: Decimal::new(11000, 4),
            current_price: Decimal::new(11010, 4),
            stop_loss: None,
            take_profit: None,
            profit: Decimal::from(10),
            opened_at: (Utc::now() - Duration::minutes(30)).naive_utc(),
        }
    }

    #[tokio::test]
    async fn close_removes_the_position_and_counts_the_call() {
        let gateway = MockGateway::new().with_positions(vec![sample_position(42)]);

        gateway.close_position(42).await.unwrap();
        assert_eq!(gateway.close_calls(), 1);
        assert!(gateway.open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_injection_rejects_closures_and_keeps_the_position() {
        let gateway = MockGateway::new()
            .with_positions(vec![sample_position(42)])
            .with_failing_closures();

        assert!(gateway.close_position(42).await.is_err());
        assert_eq!(gateway.close_calls(), 1);
        assert_eq!(gateway.open_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn orders_are_rejected_while_the_market_is_closed() {
        let gateway = MockGateway::new().with_market_open(false);
        let order = OrderRequest {
            symbol: "EURUSD".to_string(),
            direction: prop_engine::SignalDirection::Buy,
            volume: Decimal::new(1, 2),
            price: None,
            stop_loss: None,
            take_profit: None,
            comment: None,
        };

        assert!(gateway.place_order(order).await.is_err());
        assert!(gateway.placed_orders().is_empty());
    }
}
