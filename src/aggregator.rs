//! Signal aggregation - collects provider signals and computes consensus

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::provider::SignalProvider;
use crate::signal::{Candle, Signal, SignalDirection};

/// Default share of providers that must agree before a consensus forms
pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.66;

/// How long a symbol's collected signals stay cached
const SIGNAL_CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedSignals {
    signals: Vec<Signal>,
    fetched_at: Instant,
}

/// Coordinates multiple signal providers for the trading loop.
///
/// The per-symbol cache is purely a performance optimization: correctness
/// never depends on it and `refresh_signals` bypasses it entirely.
pub struct SignalAggregator {
    providers: Vec<Box<dyn SignalProvider>>,
    cache: HashMap<String, CachedSignals>,
    cache_ttl: Duration,
    consensus_threshold: f64,
}

impl SignalAggregator {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            cache: HashMap::new(),
            cache_ttl: SIGNAL_CACHE_TTL,
            consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
        }
    }

    pub fn with_consensus_threshold(mut self, threshold: f64) -> Self {
        self.consensus_threshold = threshold;
        self
    }

    #[cfg(test)]
    fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Register a provider. Names must be unique; duplicates are rejected.
    pub fn add_provider(&mut self, provider: Box<dyn SignalProvider>) -> bool {
        if self.providers.iter().any(|p| p.name() == provider.name()) {
            warn!(name = provider.name(), "provider already registered");
            return false;
        }
        debug!(name = provider.name(), "provider registered");
        self.providers.push(provider);
        true
    }

    pub fn remove_provider(&mut self, name: &str) -> bool {
        let before = self.providers.len();
        self.providers.retain(|p| p.name() != name);
        self.providers.len() != before
    }

    pub fn set_provider_active(&mut self, name: &str, active: bool) -> bool {
        match self.providers.iter_mut().find(|p| p.name() == name) {
            Some(p) => {
                p.set_active(active);
                true
            }
            None => false,
        }
    }

    /// Symbols covered by at least one active provider
    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .providers
            .iter()
            .filter(|p| p.is_active())
            .flat_map(|p| p.symbols().iter().cloned())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn active_providers(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.name())
            .collect()
    }

    /// Valid signals for `symbol` from every active provider covering it.
    /// Serves from the cache when fresh.
    pub fn get_signals(&mut self, symbol: &str, bars: &[Candle]) -> Vec<Signal> {
        if let Some(cached) = self.cache.get(symbol) {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                debug!(symbol, "serving signals from cache");
                return cached.signals.clone();
            }
        }
        self.refresh_signals(symbol, bars)
    }

    /// Re-invoke providers regardless of cache state and repopulate it
    pub fn refresh_signals(&mut self, symbol: &str, bars: &[Candle]) -> Vec<Signal> {
        let mut signals = Vec::new();
        for provider in &mut self.providers {
            if !provider.is_active() || !provider.symbols().iter().any(|s| s == symbol) {
                continue;
            }
            let signal = provider.calculate_signal(symbol, bars);
            if signal.is_valid() {
                signals.push(signal);
            } else {
                warn!(
                    provider = provider.name(),
                    symbol, "discarding invalid signal"
                );
            }
        }

        self.cache.insert(
            symbol.to_string(),
            CachedSignals {
                signals: signals.clone(),
                fetched_at: Instant::now(),
            },
        );
        signals
    }

    /// Drop any cached signals for `symbol`
    pub fn invalidate(&mut self, symbol: &str) {
        self.cache.remove(symbol);
    }

    /// Consensus across providers: the plurality direction must hold at
    /// least `consensus_threshold` of all signals. Price fields are averaged
    /// over the agreeing signals that supplied them; a tie for plurality
    /// yields no consensus.
    pub fn consensus_signal(&mut self, symbol: &str, bars: &[Candle]) -> Option<Signal> {
        let signals = self.get_signals(symbol, bars);
        if signals.is_empty() {
            return None;
        }

        let mut counts: HashMap<SignalDirection, usize> = HashMap::new();
        for signal in &signals {
            *counts.entry(signal.direction).or_insert(0) += 1;
        }

        let max_count = counts.values().copied().max().unwrap_or(0);
        let mut leaders = counts
            .iter()
            .filter(|(_, &count)| count == max_count)
            .map(|(&direction, _)| direction);
        let direction = leaders.next()?;
        if leaders.next().is_some() {
            debug!(symbol, "plurality tie, no consensus");
            return None;
        }

        let share = max_count as f64 / signals.len() as f64;
        if share < self.consensus_threshold {
            debug!(symbol, share, "below consensus threshold");
            return None;
        }

        let agreeing: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.direction == direction)
            .collect();

        Some(Signal {
            direction,
            symbol: symbol.to_string(),
            generated_at: Utc::now(),
            provider: "consensus".to_string(),
            entry_price: mean_of(&agreeing, |s| s.entry_price),
            stop_loss: mean_of(&agreeing, |s| s.stop_loss),
            take_profit: mean_of(&agreeing, |s| s.take_profit),
            volume: mean_of(&agreeing, |s| s.volume),
            note: Some(format!("Consensus of {}/{}", max_count, signals.len())),
        })
    }
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Arithmetic mean over the signals that supplied the field; `None` when no
/// signal did
fn mean_of(signals: &[&Signal], field: impl Fn(&Signal) -> Option<Decimal>) -> Option<Decimal> {
    let values: Vec<Decimal> = signals.iter().filter_map(|s| field(s)).collect();
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().copied().sum();
    Some(sum / Decimal::from(values.len() as u64))
}
