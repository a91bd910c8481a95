//! Core signal and market-data types
//!
//! These types define the contract between signal providers, the aggregator,
//! and the rule engine.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction carried by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Buy,
    Sell,
    /// Close any open exposure for the symbol
    Close,
    /// No opinion / insufficient data
    Hold,
}

impl SignalDirection {
    /// Directions that open new exposure and therefore require price fields
    pub fn is_entry(&self) -> bool {
        matches!(self, SignalDirection::Buy | SignalDirection::Sell)
    }
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalDirection::Buy => write!(f, "buy"),
            SignalDirection::Sell => write!(f, "sell"),
            SignalDirection::Close => write!(f, "close"),
            SignalDirection::Hold => write!(f, "hold"),
        }
    }
}

/// One provider's opinion for one symbol at one instant.
///
/// Immutable once produced; a provider supersedes it with its next call and
/// keeps the prior one as "last signal for symbol".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: SignalDirection,
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    /// Name of the provider that emitted this signal
    pub provider: String,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Lot size; providers fall back to a small default when unset
    pub volume: Option<Decimal>,
    pub note: Option<String>,
}

impl Signal {
    /// A hold signal with an explanatory note (insufficient data etc.)
    pub fn hold(symbol: &str, provider: &str, note: &str) -> Self {
        Self {
            direction: SignalDirection::Hold,
            symbol: symbol.to_string(),
            generated_at: Utc::now(),
            provider: provider.to_string(),
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            volume: None,
            note: Some(note.to_string()),
        }
    }

    /// Entry signals need all four price/size fields; close/hold need none.
    pub fn is_valid(&self) -> bool {
        if self.symbol.is_empty() {
            return false;
        }
        if self.direction.is_entry() {
            return self.entry_price.is_some()
                && self.stop_loss.is_some()
                && self.take_profit.is_some()
                && self.volume.is_some();
        }
        true
    }
}

/// One OHLCV candle, broker timestamps already normalized to UTC
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

/// Chart timeframe for price-bar requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        };
        write!(f, "{}", s)
    }
}

/// Whether the newest bar is older than `max_age`.
///
/// Stale bars are a warning, not an error: callers decide whether to treat
/// the market as effectively closed for the tick.
pub fn bars_are_stale(bars: &[Candle], now: DateTime<Utc>, max_age: Duration) -> bool {
    match bars.last() {
        Some(last) => now - last.timestamp > max_age,
        None => true,
    }
}
