//! Collaborator interfaces - broker terminal, clock, notification sink
//!
//! The engine never talks to a terminal directly; everything goes through
//! these traits so tests can script market state and hosts can plug in a
//! real connection.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::signal::{Candle, SignalDirection, Timeframe};

/// Errors surfaced by the broker collaborator.
///
/// These are recoverable from the engine's point of view: monitoring passes
/// degrade or retry, they never abort.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker data unavailable: {0}")]
    Unavailable(String),
    #[error("broker rejected request: {0}")]
    Rejected(String),
}

/// Account state snapshot from the broker terminal
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub equity: Decimal,
    /// Floating profit of the current day, negative when losing
    pub profit: Decimal,
    pub margin: Decimal,
    pub margin_free: Decimal,
}

/// Side of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Buy,
    Sell,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Buy => write!(f, "buy"),
            PositionSide::Sell => write!(f, "sell"),
        }
    }
}

/// A live broker position. Read-only value object: the engine requests
/// closures through the gateway, it never mutates these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub direction: PositionSide,
    pub volume: Decimal,
    pub open_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub profit: Decimal,
    /// Open time on the broker SERVER clock. Convert with the gateway's
    /// `server_utc_offset` before any duration arithmetic.
    pub opened_at: NaiveDateTime,
}

/// A filled order from broker trade history, used for trading-day counting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalOrder {
    pub ticket: u64,
    pub symbol: String,
    pub volume: Decimal,
    pub profit: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// New order request passed to the gateway
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: SignalDirection,
    pub volume: Decimal,
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub comment: Option<String>,
}

/// Broker terminal capabilities the core consumes.
///
/// Implementations should impose their own timeouts and map failures to
/// `BrokerError::Unavailable` rather than hanging the polling loop.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, BrokerError>;

    async fn open_positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Filled orders since `since`, used for the trading-day ledger
    async fn trade_history(&self, since: DateTime<Utc>)
        -> Result<Vec<HistoricalOrder>, BrokerError>;

    async fn is_market_open(&self) -> bool;

    async fn close_position(&self, ticket: u64) -> Result<(), BrokerError>;

    async fn place_order(&self, order: OrderRequest) -> Result<(), BrokerError>;

    async fn price_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, BrokerError>;

    /// Current UTC offset of the broker server clock. Resolved dynamically so
    /// DST transitions do not skew duration math.
    fn server_utc_offset(&self) -> FixedOffset;
}

/// Injectable time source so duration math is testable without wall clocks
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used by hosts
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fire-and-forget notification channel. The engine never depends on
/// delivery succeeding.
pub trait NotificationSink: Send + Sync {
    fn log_warning(&self, category: &str, message: &str);
    fn log_violation(&self, category: &str, message: &str);
}

/// Default sink that forwards to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn log_warning(&self, category: &str, message: &str) {
        warn!(category, "{}", message);
    }

    fn log_violation(&self, category: &str, message: &str) {
        error!(category, "{}", message);
    }
}
