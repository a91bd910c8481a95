//! Prop-firm rule set - static configuration loaded once at startup

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fatal configuration errors. The engine refuses to initialize on any of
/// these rather than run with partial rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("failed to load rule set: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid rule set: {0}")]
    Invalid(String),
}

/// Static prop-firm rule set. Immutable after load; changing rules requires
/// re-initializing the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Daily loss limit expressed as a negative profit, e.g. -500.
    /// Breached when account profit <= this value.
    pub max_daily_loss: Decimal,
    /// Balance floor. Breached when account balance <= this value.
    pub max_total_loss: Decimal,
    pub max_position_duration_minutes: i64,
    /// Fraction of the duration limit at which positions start warning
    #[serde(default = "default_warning_threshold")]
    pub duration_warning_threshold: f64,
    #[serde(default = "default_min_trading_days")]
    pub min_trading_days: u32,
    pub profit_target: Decimal,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    pub max_lot_size: Decimal,
    /// Reference drawdown envelope as a percentage of peak balance. Status
    /// bands sit at 90/70/50 % of this value.
    #[serde(default = "default_max_drawdown_percent")]
    pub max_drawdown_percent: f64,
}

fn default_warning_threshold() -> f64 {
    0.75
}
fn default_min_trading_days() -> u32 {
    4
}
fn default_max_open_positions() -> usize {
    3
}
fn default_max_drawdown_percent() -> f64 {
    10.0
}

impl RuleSet {
    /// Load and validate a rule set from a config file (JSON or TOML)
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let rules: RuleSet = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        rules.validate()?;
        Ok(rules)
    }

    /// Reject rule sets the engine cannot safely enforce
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.max_position_duration_minutes <= 0 {
            return Err(RuleError::Invalid(
                "max_position_duration_minutes must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.duration_warning_threshold)
            || self.duration_warning_threshold == 0.0
        {
            return Err(RuleError::Invalid(
                "duration_warning_threshold must be in (0, 1]".to_string(),
            ));
        }
        if self.max_daily_loss > Decimal::ZERO {
            return Err(RuleError::Invalid(
                "max_daily_loss must be expressed as a negative profit".to_string(),
            ));
        }
        if self.max_lot_size <= Decimal::ZERO {
            return Err(RuleError::Invalid(
                "max_lot_size must be positive".to_string(),
            ));
        }
        if self.max_open_positions == 0 {
            return Err(RuleError::Invalid(
                "max_open_positions must be at least 1".to_string(),
            ));
        }
        if self.max_drawdown_percent <= 0.0 {
            return Err(RuleError::Invalid(
                "max_drawdown_percent must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn sample_rules() -> RuleSet {
        RuleSet {
            max_daily_loss: Decimal::from(-500),
            max_total_loss: Decimal::from(9_000),
            max_position_duration_minutes: 60,
            duration_warning_threshold: 0.75,
            min_trading_days: 4,
            profit_target: Decimal::from(1_000),
            max_open_positions: 3,
            max_lot_size: Decimal::new(5, 1), // 0.5 lots
            max_drawdown_percent: 10.0,
        }
    }

    #[test]
    fn valid_rules_pass_validation() {
        assert!(sample_rules().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_duration() {
        let mut rules = sample_rules();
        rules.max_position_duration_minutes = 0;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_warning_threshold() {
        let mut rules = sample_rules();
        rules.duration_warning_threshold = 1.5;
        assert!(rules.validate().is_err());
        rules.duration_warning_threshold = 0.0;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn rejects_positive_daily_loss_limit() {
        let mut rules = sample_rules();
        rules.max_daily_loss = Decimal::from(500);
        assert!(rules.validate().is_err());
    }

    #[test]
    fn round_trips_through_the_loader() {
        let rules = sample_rules();
        let json = serde_json::to_string_pretty(&rules).unwrap();

        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let reloaded = RuleSet::load(file.path()).unwrap();
        assert_eq!(reloaded, rules);
    }
}
