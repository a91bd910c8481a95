//! Signal eligibility evaluation - the go/no-go gate before order placement
//!
//! Pure computation over signals and open positions; all broker interaction
//! stays with the caller. An evaluation never errors: a signal that cannot
//! be assessed simply fails its check.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::broker::Position;
use crate::signal::{Signal, SignalDirection};

/// Eligibility thresholds. Defaults mirror the production account limits:
/// one position per symbol, three overall, 2:1 reward-to-risk.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorConfig {
    pub required_signal_strength: f64,
    pub max_positions_per_symbol: usize,
    pub max_total_positions: usize,
    pub min_risk_reward: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            required_signal_strength: 0.7,
            max_positions_per_symbol: 1,
            max_total_positions: 3,
            min_risk_reward: 2.0,
        }
    }
}

/// Qualitative strength band for dashboards and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Strong,
    Moderate,
    Weak,
}

/// Position-limit sub-check outcome
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PositionLimitCheck {
    pub symbol_positions: usize,
    pub total_positions: usize,
    pub within_limits: bool,
}

/// Risk/reward sub-check outcome. `best_ratio` is the highest ratio among
/// signals that carried all three prices, if any did.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskRewardCheck {
    pub best_ratio: Option<f64>,
    pub acceptable: bool,
}

/// Per-check detail retained alongside the verdict
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationDetails {
    /// Share of signals agreeing with the plurality direction, 0 when none
    pub consensus_strength: f64,
    pub consensus_direction: Option<SignalDirection>,
    pub position_limits: PositionLimitCheck,
    pub risk_reward: RiskRewardCheck,
    pub total_signals: usize,
}

/// Outcome of one evaluation pass for one symbol
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub symbol: String,
    pub signal_strength: f64,
    pub trading_eligible: bool,
    pub status: SignalStatus,
    pub details: EvaluationDetails,
    pub evaluated_at: DateTime<Utc>,
}

/// Stateless eligibility evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Assess whether `signals` justify opening a position on `symbol` given
    /// the currently open `positions`.
    pub fn evaluate(
        &self,
        symbol: &str,
        signals: &[Signal],
        positions: &[Position],
    ) -> EvaluationResult {
        let (strength, direction) = consensus_strength(signals);
        let position_limits = self.check_position_limits(symbol, positions);
        let risk_reward = self.check_risk_reward(signals);

        let trading_eligible = strength >= self.config.required_signal_strength
            && direction.map(|d| d.is_entry()).unwrap_or(false)
            && position_limits.within_limits
            && risk_reward.acceptable;

        // Strength alone never rates a signal: an ineligible read is Weak
        // no matter how unanimous it is
        let status = if trading_eligible && strength >= 0.8 {
            SignalStatus::Strong
        } else if trading_eligible && strength >= 0.6 {
            SignalStatus::Moderate
        } else {
            SignalStatus::Weak
        };

        debug!(
            symbol,
            strength, trading_eligible, "signal evaluation complete"
        );

        EvaluationResult {
            symbol: symbol.to_string(),
            signal_strength: strength,
            trading_eligible,
            status,
            details: EvaluationDetails {
                consensus_strength: strength,
                consensus_direction: direction,
                position_limits,
                risk_reward,
                total_signals: signals.len(),
            },
            evaluated_at: Utc::now(),
        }
    }

    fn check_position_limits(&self, symbol: &str, positions: &[Position]) -> PositionLimitCheck {
        let symbol_positions = positions.iter().filter(|p| p.symbol == symbol).count();
        let total_positions = positions.len();
        PositionLimitCheck {
            symbol_positions,
            total_positions,
            within_limits: symbol_positions < self.config.max_positions_per_symbol
                && total_positions < self.config.max_total_positions,
        }
    }

    fn check_risk_reward(&self, signals: &[Signal]) -> RiskRewardCheck {
        let best_ratio = signals
            .iter()
            .filter_map(risk_reward_ratio)
            .fold(None::<f64>, |best, ratio| {
                Some(best.map_or(ratio, |b| b.max(ratio)))
            });
        RiskRewardCheck {
            best_ratio,
            acceptable: best_ratio.map_or(false, |r| r >= self.config.min_risk_reward),
        }
    }
}

/// Plurality share of the strongest direction; ties count as the share of
/// either leader, which downstream eligibility rejects via the direction
fn consensus_strength(signals: &[Signal]) -> (f64, Option<SignalDirection>) {
    if signals.is_empty() {
        return (0.0, None);
    }
    let mut counts: HashMap<SignalDirection, usize> = HashMap::new();
    for signal in signals {
        *counts.entry(signal.direction).or_insert(0) += 1;
    }
    let max_count = counts.values().copied().max().unwrap_or(0);
    let mut leaders = counts
        .iter()
        .filter(|(_, &count)| count == max_count)
        .map(|(&direction, _)| direction);
    let leader = leaders.next();
    let direction = if leaders.next().is_some() { None } else { leader };

    (max_count as f64 / signals.len() as f64, direction)
}

/// `|tp - entry| / |entry - sl|`, `None` when a price is missing or the stop
/// sits on the entry
fn risk_reward_ratio(signal: &Signal) -> Option<f64> {
    let entry = signal.entry_price?;
    let stop = signal.stop_loss?;
    let target = signal.take_profit?;

    let risk = (entry - stop).abs();
    if risk == Decimal::ZERO {
        return None;
    }
    let reward = (target - entry).abs();
    (reward / risk).to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PositionSide;
    use chrono::NaiveDate;

    fn entry_signal(direction: SignalDirection, entry: i64, stop: i64, target: i64) -> Signal {
        Signal {
            direction,
            symbol: "EURUSD".to_string(),
            generated_at: Utc::now(),
            provider: "test".to_string(),
            entry_price: Some(Decimal::new(entry, 4)),
            stop_loss: Some(Decimal::new(stop, 4)),
            take_profit: Some(Decimal::new(target, 4)),
            volume: Some(Decimal::new(1, 2)),
            note: None,
        }
    }

    fn open_position(symbol: &str) -> Position {
        Position {
            ticket: 1,
            symbol: symbol.to_string(),
            direction: PositionSide::Buy,
            volume: Decimal::new(1, 2),
            open_price: Decimal::new(11000, 4),
            current_price: Decimal::new(11010, 4),
            stop_loss: None,
            take_profit: None,
            profit: Decimal::from(10),
            opened_at: NaiveDate::from_ymd_opt(2026, 8, 28)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn unanimous_buys_with_good_risk_reward_are_eligible() {
        let evaluator = Evaluator::default();
        // Risk 50 points, reward 150: ratio 3.0
        let signals = vec![
            entry_signal(SignalDirection::Buy, 11000, 10950, 11150),
            entry_signal(SignalDirection::Buy, 11000, 10950, 11150),
        ];

        let result = evaluator.evaluate("EURUSD", &signals, &[]);
        assert!(result.trading_eligible);
        assert_eq!(result.status, SignalStatus::Strong);
        assert_eq!(result.details.risk_reward.best_ratio, Some(3.0));
    }

    #[test]
    fn poor_risk_reward_blocks_eligibility() {
        let evaluator = Evaluator::default();
        // Risk 50 points, reward 80: ratio 1.6
        let signals = vec![entry_signal(SignalDirection::Buy, 11000, 10950, 11080)];

        let result = evaluator.evaluate("EURUSD", &signals, &[]);
        assert!(!result.trading_eligible);
        assert!(!result.details.risk_reward.acceptable);
    }

    #[test]
    fn stop_on_entry_fails_that_signal_without_erroring() {
        let evaluator = Evaluator::default();
        let degenerate = entry_signal(SignalDirection::Buy, 11000, 11000, 11150);
        let result = evaluator.evaluate("EURUSD", &[degenerate], &[]);
        assert_eq!(result.details.risk_reward.best_ratio, None);
        assert!(!result.trading_eligible);

        // A healthy sibling signal still satisfies the check
        let healthy = entry_signal(SignalDirection::Buy, 11000, 10950, 11150);
        let degenerate = entry_signal(SignalDirection::Buy, 11000, 11000, 11150);
        let result = evaluator.evaluate("EURUSD", &[degenerate, healthy], &[]);
        assert!(result.details.risk_reward.acceptable);
        assert!(result.trading_eligible);
    }

    #[test]
    fn weak_consensus_blocks_eligibility() {
        let evaluator = Evaluator::default();
        // Two of three agree: 0.666 < 0.7 required strength
        let signals = vec![
            entry_signal(SignalDirection::Buy, 11000, 10950, 11150),
            entry_signal(SignalDirection::Buy, 11000, 10950, 11150),
            entry_signal(SignalDirection::Sell, 11000, 11050, 10850),
        ];

        let result = evaluator.evaluate("EURUSD", &signals, &[]);
        assert!(!result.trading_eligible);
        assert!(result.signal_strength < 0.7);
    }

    #[test]
    fn existing_position_on_symbol_blocks_new_entries() {
        let evaluator = Evaluator::default();
        let signals = vec![entry_signal(SignalDirection::Buy, 11000, 10950, 11150)];
        let positions = vec![open_position("EURUSD")];

        let result = evaluator.evaluate("EURUSD", &signals, &positions);
        assert!(!result.details.position_limits.within_limits);
        assert!(!result.trading_eligible);
    }

    #[test]
    fn total_position_cap_applies_across_symbols() {
        let evaluator = Evaluator::default();
        let signals = vec![entry_signal(SignalDirection::Buy, 11000, 10950, 11150)];
        let positions = vec![
            open_position("GBPUSD"),
            open_position("USDJPY"),
            open_position("AUDUSD"),
        ];

        let result = evaluator.evaluate("EURUSD", &signals, &positions);
        assert_eq!(result.details.position_limits.symbol_positions, 0);
        assert!(!result.details.position_limits.within_limits);
        assert!(!result.trading_eligible);
    }

    #[test]
    fn unanimous_holds_are_never_eligible() {
        let evaluator = Evaluator::default();
        let signals = vec![
            Signal::hold("EURUSD", "a", "flat"),
            Signal::hold("EURUSD", "b", "flat"),
        ];

        let result = evaluator.evaluate("EURUSD", &signals, &[]);
        assert_eq!(result.signal_strength, 1.0);
        assert!(!result.trading_eligible);
        // Full agreement on Hold is still a Weak read
        assert_eq!(result.status, SignalStatus::Weak);
    }

    #[test]
    fn ineligible_signals_rate_weak_regardless_of_strength() {
        let evaluator = Evaluator::default();
        // Unanimous buys with good risk/reward, but the symbol cap is hit
        let signals = vec![
            entry_signal(SignalDirection::Buy, 11000, 10950, 11150),
            entry_signal(SignalDirection::Buy, 11000, 10950, 11150),
        ];
        let positions = vec![open_position("EURUSD")];

        let result = evaluator.evaluate("EURUSD", &signals, &positions);
        assert_eq!(result.signal_strength, 1.0);
        assert!(!result.trading_eligible);
        assert_eq!(result.status, SignalStatus::Weak);
    }

    #[test]
    fn no_signals_yield_a_weak_empty_result() {
        let evaluator = Evaluator::default();
        let result = evaluator.evaluate("EURUSD", &[], &[]);
        assert_eq!(result.signal_strength, 0.0);
        assert_eq!(result.status, SignalStatus::Weak);
        assert!(!result.trading_eligible);
        assert_eq!(result.details.total_signals, 0);
    }
}
