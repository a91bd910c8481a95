//! Signal providers - pluggable strategy implementations
//!
//! A provider turns recent price bars into a trading opinion. Providers are
//! independent of each other and never fail: when data is insufficient they
//! emit a hold signal with an explanatory note.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::pip;
use crate::signal::{Candle, Signal, SignalDirection, Timeframe};

/// Bars considered when placing stops around recent extremes
const STOP_LOOKBACK_BARS: usize = 5;

/// Stop distance buffer beyond the recent extreme, in pips
const STOP_BUFFER_PIPS: i64 = 10;

/// Default lot size when a caller does not override the volume
const DEFAULT_VOLUME: &str = "0.01";

/// Strategy contract: bars in, signal out.
///
/// `calculate_signal` must not fail; insufficient data yields a hold signal.
/// Parameters travel as JSON values so hosts can persist and edit them
/// without knowing each strategy's shape.
pub trait SignalProvider: Send {
    fn name(&self) -> &str;

    /// Symbols this provider watches
    fn symbols(&self) -> &[String];

    fn timeframe(&self) -> Timeframe;

    fn is_active(&self) -> bool;

    /// Toggle without removing; inactive providers are skipped by the
    /// aggregator but keep their state
    fn set_active(&mut self, active: bool);

    /// Compute a signal from `bars` (oldest first). Valid entry signals are
    /// remembered as the last signal for the symbol.
    fn calculate_signal(&mut self, symbol: &str, bars: &[Candle]) -> Signal;

    fn validate_parameters(&self, params: &Value) -> bool;

    /// Apply new parameters; rejects and leaves state unchanged when invalid
    fn update_parameters(&mut self, params: &Value) -> bool;

    /// Most recent valid signal emitted for `symbol`, if any
    fn last_signal(&self, symbol: &str) -> Option<&Signal>;
}

/// Moving-average crossover parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MaParameters {
    pub fast_period: usize,
    pub slow_period: usize,
    /// Quote digits of the traded symbols, used to derive pip size
    #[serde(default = "default_digits")]
    pub digits: u32,
}

fn default_digits() -> u32 {
    5
}

impl Default for MaParameters {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 20,
            digits: 5,
        }
    }
}

impl MaParameters {
    fn is_valid(&self) -> bool {
        self.fast_period > 0 && self.slow_period > 0 && self.fast_period < self.slow_period
    }
}

/// Simple moving-average crossover provider.
///
/// Buys when the fast MA is above the slow MA with the stop below the recent
/// low, sells mirrored, and holds when the averages are equal.
pub struct MovingAverageProvider {
    name: String,
    symbols: Vec<String>,
    timeframe: Timeframe,
    active: bool,
    params: MaParameters,
    last_signals: HashMap<String, Signal>,
}

impl MovingAverageProvider {
    pub fn new(name: &str, symbols: Vec<String>, timeframe: Timeframe) -> Self {
        Self {
            name: name.to_string(),
            symbols,
            timeframe,
            active: true,
            params: MaParameters::default(),
            last_signals: HashMap::new(),
        }
    }

    pub fn with_parameters(mut self, params: MaParameters) -> Self {
        if params.is_valid() {
            self.params = params;
        }
        self
    }

    pub fn parameters(&self) -> MaParameters {
        self.params
    }

    fn mean_close(bars: &[Candle], period: usize) -> Decimal {
        let tail = &bars[bars.len() - period..];
        let sum: Decimal = tail.iter().map(|c| c.close).sum();
        sum / Decimal::from(period as u64)
    }
}

impl SignalProvider for MovingAverageProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn calculate_signal(&mut self, symbol: &str, bars: &[Candle]) -> Signal {
        if bars.len() < self.params.slow_period {
            return Signal::hold(symbol, &self.name, "Insufficient data");
        }

        let fast_ma = Self::mean_close(bars, self.params.fast_period);
        let slow_ma = Self::mean_close(bars, self.params.slow_period);
        let entry = bars[bars.len() - 1].close;
        let buffer = pip::pips(STOP_BUFFER_PIPS, self.params.digits);
        let recent = &bars[bars.len().saturating_sub(STOP_LOOKBACK_BARS)..];

        let (direction, stop_loss, take_profit) = if fast_ma > slow_ma {
            let low = recent.iter().map(|c| c.low).min().unwrap_or(entry);
            let stop = low - buffer;
            (
                SignalDirection::Buy,
                stop,
                entry + (entry - stop) * Decimal::from(2),
            )
        } else if fast_ma < slow_ma {
            let high = recent.iter().map(|c| c.high).max().unwrap_or(entry);
            let stop = high + buffer;
            (
                SignalDirection::Sell,
                stop,
                entry - (stop - entry) * Decimal::from(2),
            )
        } else {
            return Signal::hold(symbol, &self.name, "Averages equal");
        };

        let signal = Signal {
            direction,
            symbol: symbol.to_string(),
            generated_at: Utc::now(),
            provider: self.name.clone(),
            entry_price: Some(entry),
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            volume: Some(DEFAULT_VOLUME.parse().unwrap_or(Decimal::ZERO)),
            note: Some(format!(
                "MA{}/{} crossover",
                self.params.fast_period, self.params.slow_period
            )),
        };

        if signal.is_valid() {
            debug!(
                provider = %self.name,
                symbol,
                direction = %signal.direction,
                "signal generated"
            );
            self.last_signals.insert(symbol.to_string(), signal.clone());
        }
        signal
    }

    fn validate_parameters(&self, params: &Value) -> bool {
        serde_json::from_value::<MaParameters>(params.clone())
            .map(|p| p.is_valid())
            .unwrap_or(false)
    }

    fn update_parameters(&mut self, params: &Value) -> bool {
        match serde_json::from_value::<MaParameters>(params.clone()) {
            Ok(parsed) if parsed.is_valid() => {
                self.params = parsed;
                true
            }
            _ => false,
        }
    }

    fn last_signal(&self, symbol: &str) -> Option<&Signal> {
        self.last_signals.get(symbol)
    }
}
