//! Compliance rule engine - loss limits, drawdown, durations, trading days
//!
//! The engine is the single authority on prop-firm account rules. It owns all
//! mutable compliance state (peak balance, daily marks, per-position duration
//! states, queued closures) and is driven by one polling loop, so no internal
//! locking is needed. Broker failures degrade the affected report; they never
//! abort a monitoring pass.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::{AccountSnapshot, BrokerGateway, HistoricalOrder, NotificationSink, Position};
use crate::rules::{RuleError, RuleSet};

/// Reason strings returned by `check_position_allowed`
const ALLOWED: &str = "Position allowed";
const DAILY_LOSS_REACHED: &str = "Daily loss limit reached";
const TOTAL_LOSS_REACHED: &str = "Total loss limit reached";
const LOT_TOO_LARGE: &str = "Position size exceeds maximum allowed";

/// Severity band of the current drawdown relative to the configured envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawdownStatus {
    Normal,
    Caution,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DrawdownReport {
    pub peak_balance: Decimal,
    pub daily_equity_high: Decimal,
    /// Distance of current equity below the all-time peak, never negative
    pub drawdown_from_peak: Decimal,
    pub drawdown_percent: f64,
    pub daily_drawdown: Decimal,
    pub daily_drawdown_percent: f64,
    pub status: DrawdownStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitStatus {
    TargetReached,
    NearTarget,
    OnTrack,
    InProgress,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProfitReport {
    /// Balance gain over the starting balance
    pub current_profit: Decimal,
    pub profit_target: Decimal,
    pub progress_percent: f64,
    pub status: ProfitStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingDaysStatus {
    Compliant,
    Insufficient,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TradingDaysReport {
    pub days_traded: u32,
    pub min_trading_days: u32,
    pub days_remaining: u32,
    pub status: TradingDaysStatus,
}

/// Lifecycle of a position under duration monitoring.
///
/// `Closed` and a pruned entry are both terminal; `QueuedClosure` means the
/// market was closed when the limit hit and the ticket waits for reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationState {
    Ok,
    Warning,
    DueForClosure,
    QueuedClosure,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DurationReport {
    pub ticket: u64,
    pub symbol: String,
    pub minutes_open: i64,
    pub limit_minutes: i64,
    pub warning: bool,
    pub needs_closure: bool,
    pub state: DurationState,
    /// Set when the open timestamp could not be interpreted; the other
    /// fields are then zeroed and the state is left untouched
    pub error: Option<String>,
}

/// Outcome of one closure attempt for a queued ticket
#[derive(Debug, Clone, Serialize)]
pub struct ClosureAttempt {
    pub ticket: u64,
    pub closed: bool,
    pub error: Option<String>,
}

/// A hard rule breach. Reported, never acted on: closing positions in
/// response to a loss breach is the account owner's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleViolation {
    DailyLossBreached { profit: Decimal, limit: Decimal },
    TotalLossBreached { balance: Decimal, floor: Decimal },
    PositionOverDuration { ticket: u64, minutes_open: i64, limit_minutes: i64 },
}

impl std::fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleViolation::DailyLossBreached { profit, limit } => {
                write!(f, "daily loss limit breached: profit {} <= {}", profit, limit)
            }
            RuleViolation::TotalLossBreached { balance, floor } => {
                write!(f, "total loss limit breached: balance {} <= {}", balance, floor)
            }
            RuleViolation::PositionOverDuration {
                ticket,
                minutes_open,
                limit_minutes,
            } => write!(
                f,
                "position {} open {} minutes, limit {}",
                ticket, minutes_open, limit_minutes
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub compliant: bool,
    pub violations: Vec<RuleViolation>,
    pub warnings: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct DailyStats {
    total_profit: Decimal,
    positions_opened: u32,
    max_drawdown: Decimal,
}

/// Stateful compliance engine over a static `RuleSet`
pub struct RuleEngine {
    rules: RuleSet,
    sink: Arc<dyn NotificationSink>,
    initial_balance: Decimal,
    peak_balance: Decimal,
    daily_equity_high: Decimal,
    daily_stats: DailyStats,
    last_reset: NaiveDate,
    trading_days: BTreeSet<NaiveDate>,
    duration_states: HashMap<u64, DurationState>,
    queued_closures: BTreeSet<u64>,
}

impl RuleEngine {
    /// Build an engine from a validated rule set and the starting account
    /// state. Refuses to start on an invalid rule set rather than enforce a
    /// partial one.
    pub fn new(
        rules: RuleSet,
        initial: &AccountSnapshot,
        today: NaiveDate,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, RuleError> {
        rules.validate()?;
        info!(
            balance = %initial.balance,
            equity = %initial.equity,
            "rule engine initialized"
        );
        Ok(Self {
            rules,
            sink,
            initial_balance: initial.balance,
            peak_balance: initial.balance,
            daily_equity_high: initial.equity,
            daily_stats: DailyStats::default(),
            last_reset: today,
            trading_days: BTreeSet::new(),
            duration_states: HashMap::new(),
            queued_closures: BTreeSet::new(),
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Pre-trade gate: may a new position of `lot` size be opened right now?
    /// The first failing rule wins; the reason string is stable for hosts.
    pub fn check_position_allowed(
        &self,
        account: &AccountSnapshot,
        lot: Decimal,
    ) -> (bool, &'static str) {
        if account.profit <= self.rules.max_daily_loss {
            return (false, DAILY_LOSS_REACHED);
        }
        if account.balance <= self.rules.max_total_loss {
            return (false, TOTAL_LOSS_REACHED);
        }
        if lot > self.rules.max_lot_size {
            return (false, LOT_TOO_LARGE);
        }
        (true, ALLOWED)
    }

    /// Update the peak/daily equity marks and report current drawdown.
    /// Repeated calls with the same snapshot produce the same report.
    pub fn monitor_drawdown(
        &mut self,
        account: &AccountSnapshot,
        today: NaiveDate,
    ) -> DrawdownReport {
        self.roll_day(today, account.equity);

        if account.balance > self.peak_balance {
            self.peak_balance = account.balance;
        }
        if account.equity > self.daily_equity_high {
            self.daily_equity_high = account.equity;
        }

        let drawdown_from_peak = (self.peak_balance - account.equity).max(Decimal::ZERO);
        let drawdown_percent = percent_of(drawdown_from_peak, self.peak_balance);
        let daily_drawdown = (self.daily_equity_high - account.equity).max(Decimal::ZERO);
        let daily_drawdown_percent = percent_of(daily_drawdown, self.daily_equity_high);

        if daily_drawdown > self.daily_stats.max_drawdown {
            self.daily_stats.max_drawdown = daily_drawdown;
        }

        let envelope = self.rules.max_drawdown_percent;
        let status = if drawdown_percent >= envelope * 0.9 {
            DrawdownStatus::Critical
        } else if drawdown_percent >= envelope * 0.7 {
            DrawdownStatus::Warning
        } else if drawdown_percent >= envelope * 0.5 {
            DrawdownStatus::Caution
        } else {
            DrawdownStatus::Normal
        };

        if status != DrawdownStatus::Normal {
            self.sink.log_warning(
                "drawdown",
                &format!("drawdown at {:.2}% of peak balance", drawdown_percent),
            );
        }

        DrawdownReport {
            peak_balance: self.peak_balance,
            daily_equity_high: self.daily_equity_high,
            drawdown_from_peak,
            drawdown_percent,
            daily_drawdown,
            daily_drawdown_percent,
            status,
        }
    }

    /// Progress toward the account profit target, measured on balance
    pub fn track_profit_target(&self, account: &AccountSnapshot) -> ProfitReport {
        let current_profit = account.balance - self.initial_balance;
        let progress_percent = if self.rules.profit_target == Decimal::ZERO {
            0.0
        } else {
            percent_of(current_profit, self.rules.profit_target)
        };

        let status = if progress_percent >= 100.0 {
            ProfitStatus::TargetReached
        } else if progress_percent >= 75.0 {
            ProfitStatus::NearTarget
        } else if progress_percent >= 50.0 {
            ProfitStatus::OnTrack
        } else {
            ProfitStatus::InProgress
        };

        ProfitReport {
            current_profit,
            profit_target: self.rules.profit_target,
            progress_percent,
            status,
        }
    }

    /// Count distinct calendar dates with at least one filled order. The
    /// caller supplies the history window (typically the last 30 days); the
    /// ledger is rebuilt from it each call, so dates that roll out of the
    /// window stop counting.
    pub fn track_trading_days(&mut self, orders: &[HistoricalOrder]) -> TradingDaysReport {
        self.trading_days = orders
            .iter()
            .map(|order| order.executed_at.date_naive())
            .collect();

        let days_traded = self.trading_days.len() as u32;
        let days_remaining = self.rules.min_trading_days.saturating_sub(days_traded);
        let status = if days_traded >= self.rules.min_trading_days {
            TradingDaysStatus::Compliant
        } else {
            TradingDaysStatus::Insufficient
        };

        TradingDaysReport {
            days_traded,
            min_trading_days: self.rules.min_trading_days,
            days_remaining,
            status,
        }
    }

    /// Evaluate one position against the duration limit and advance its
    /// state machine. Broker timestamps are on the server clock; the caller
    /// passes the server's current UTC offset.
    pub fn check_position_duration(
        &mut self,
        position: &Position,
        now: DateTime<Utc>,
        server_offset: chrono::FixedOffset,
    ) -> DurationReport {
        let limit = self.rules.max_position_duration_minutes;

        let opened_utc = server_offset
            .from_local_datetime(&position.opened_at)
            .single()
            .map(|dt| dt.with_timezone(&Utc));

        let minutes_open = match opened_utc {
            Some(opened) if opened <= now => (now - opened).num_minutes(),
            Some(_) => {
                return self.degraded_duration_report(
                    position,
                    "position open time is in the future",
                )
            }
            None => {
                return self.degraded_duration_report(
                    position,
                    "position open time is not representable in the server offset",
                )
            }
        };

        let warning = minutes_open as f64 >= limit as f64 * self.rules.duration_warning_threshold;
        let needs_closure = minutes_open >= limit;

        let previous = self
            .duration_states
            .get(&position.ticket)
            .copied()
            .unwrap_or(DurationState::Ok);

        // Terminal and queued states never regress from a recheck
        let state = match previous {
            DurationState::Closed | DurationState::QueuedClosure => previous,
            _ if needs_closure => DurationState::DueForClosure,
            _ if warning => DurationState::Warning,
            _ => DurationState::Ok,
        };

        if state != previous {
            match state {
                DurationState::Warning => self.sink.log_warning(
                    "position_duration",
                    &format!(
                        "position {} on {} open {} of {} minutes",
                        position.ticket, position.symbol, minutes_open, limit
                    ),
                ),
                DurationState::DueForClosure => self.sink.log_warning(
                    "position_duration",
                    &format!(
                        "position {} on {} exceeded the {}-minute limit",
                        position.ticket, position.symbol, limit
                    ),
                ),
                _ => {}
            }
        }
        self.duration_states.insert(position.ticket, state);

        DurationReport {
            ticket: position.ticket,
            symbol: position.symbol.clone(),
            minutes_open,
            limit_minutes: limit,
            warning,
            needs_closure,
            state,
            error: None,
        }
    }

    fn degraded_duration_report(&self, position: &Position, error: &str) -> DurationReport {
        warn!(ticket = position.ticket, error, "duration check degraded");
        DurationReport {
            ticket: position.ticket,
            symbol: position.symbol.clone(),
            minutes_open: 0,
            limit_minutes: self.rules.max_position_duration_minutes,
            warning: false,
            needs_closure: false,
            state: self
                .duration_states
                .get(&position.ticket)
                .copied()
                .unwrap_or(DurationState::Ok),
            error: Some(error.to_string()),
        }
    }

    /// One duration pass over all open positions: checks each one and acts
    /// on those due for closure. With the market closed, due tickets are
    /// queued instead; closure failures stay due and retry next pass.
    pub async fn enforce_durations(
        &mut self,
        positions: &[Position],
        now: DateTime<Utc>,
        gateway: &dyn BrokerGateway,
    ) -> Vec<DurationReport> {
        self.prune_departed(positions);

        let offset = gateway.server_utc_offset();
        let market_open = gateway.is_market_open().await;
        let mut reports = Vec::with_capacity(positions.len());

        for position in positions {
            let mut report = self.check_position_duration(position, now, offset);
            if report.state != DurationState::DueForClosure {
                reports.push(report);
                continue;
            }

            if !market_open {
                self.queued_closures.insert(position.ticket);
                self.duration_states
                    .insert(position.ticket, DurationState::QueuedClosure);
                report.state = DurationState::QueuedClosure;
                self.sink.log_warning(
                    "position_duration",
                    &format!(
                        "market closed, queued closure of position {}",
                        position.ticket
                    ),
                );
                reports.push(report);
                continue;
            }

            match gateway.close_position(position.ticket).await {
                Ok(()) => {
                    self.duration_states
                        .insert(position.ticket, DurationState::Closed);
                    report.state = DurationState::Closed;
                    info!(ticket = position.ticket, "closed over-duration position");
                }
                Err(err) => {
                    // Stays DueForClosure; retried on the next pass
                    self.sink.log_warning(
                        "position_duration",
                        &format!("failed to close position {}: {}", position.ticket, err),
                    );
                }
            }
            reports.push(report);
        }
        reports
    }

    /// Attempt every queued closure once. A no-op while the market is
    /// closed; successes leave the queue, so repeat invocations after a
    /// full success make no further broker calls.
    pub async fn process_queued_closures(
        &mut self,
        gateway: &dyn BrokerGateway,
    ) -> Vec<ClosureAttempt> {
        if self.queued_closures.is_empty() || !gateway.is_market_open().await {
            return Vec::new();
        }

        let tickets: Vec<u64> = self.queued_closures.iter().copied().collect();
        let mut attempts = Vec::with_capacity(tickets.len());

        for ticket in tickets {
            match gateway.close_position(ticket).await {
                Ok(()) => {
                    self.queued_closures.remove(&ticket);
                    self.duration_states.insert(ticket, DurationState::Closed);
                    info!(ticket, "closed queued position");
                    attempts.push(ClosureAttempt {
                        ticket,
                        closed: true,
                        error: None,
                    });
                }
                Err(err) => {
                    self.sink.log_warning(
                        "position_duration",
                        &format!("queued closure of {} failed: {}", ticket, err),
                    );
                    attempts.push(ClosureAttempt {
                        ticket,
                        closed: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        attempts
    }

    pub fn queued_closures(&self) -> &BTreeSet<u64> {
        &self.queued_closures
    }

    /// Full compliance sweep: hard breaches become violations,
    /// approaching-limit conditions become warnings at 80 % of each limit.
    pub fn check_compliance(
        &mut self,
        account: &AccountSnapshot,
        positions: &[Position],
        now: DateTime<Utc>,
        server_offset: chrono::FixedOffset,
    ) -> ComplianceReport {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        if account.profit <= self.rules.max_daily_loss {
            violations.push(RuleViolation::DailyLossBreached {
                profit: account.profit,
                limit: self.rules.max_daily_loss,
            });
        } else if account.profit <= self.rules.max_daily_loss * Decimal::new(8, 1) {
            warnings.push(format!(
                "approaching daily loss limit: profit {} of {}",
                account.profit, self.rules.max_daily_loss
            ));
        }

        if account.balance <= self.rules.max_total_loss {
            violations.push(RuleViolation::TotalLossBreached {
                balance: account.balance,
                floor: self.rules.max_total_loss,
            });
        } else {
            // Warn when 80% of the headroom between the starting balance
            // and the floor has been consumed
            let buffer = self.initial_balance - self.rules.max_total_loss;
            let remaining = account.balance - self.rules.max_total_loss;
            if buffer > Decimal::ZERO && remaining <= buffer * Decimal::new(2, 1) {
                warnings.push(format!(
                    "approaching total loss limit: balance {} against floor {}",
                    account.balance, self.rules.max_total_loss
                ));
            }
        }

        for position in positions {
            let report = self.check_position_duration(position, now, server_offset);
            if let Some(error) = report.error {
                warnings.push(format!(
                    "duration check for position {} degraded: {}",
                    position.ticket, error
                ));
            } else if report.needs_closure {
                violations.push(RuleViolation::PositionOverDuration {
                    ticket: position.ticket,
                    minutes_open: report.minutes_open,
                    limit_minutes: report.limit_minutes,
                });
            } else if report.warning {
                warnings.push(format!(
                    "position {} open {} of {} minutes",
                    position.ticket, report.minutes_open, report.limit_minutes
                ));
            }
        }

        for violation in &violations {
            self.sink.log_violation("compliance", &violation.to_string());
        }

        debug!(
            violations = violations.len(),
            warnings = warnings.len(),
            "compliance sweep complete"
        );

        ComplianceReport {
            compliant: violations.is_empty(),
            violations,
            warnings,
            checked_at: now,
        }
    }

    /// Keep the daily performance counters current; rolls them over on the
    /// first call of a new day
    pub fn monitor_daily_performance(&mut self, account: &AccountSnapshot, today: NaiveDate) {
        self.roll_day(today, account.equity);
        self.daily_stats.total_profit = account.profit;
    }

    /// Record that the orchestrator opened a new position today
    pub fn record_position_opened(&mut self) {
        self.daily_stats.positions_opened += 1;
    }

    pub fn positions_opened_today(&self) -> u32 {
        self.daily_stats.positions_opened
    }

    fn roll_day(&mut self, today: NaiveDate, equity: Decimal) {
        if today != self.last_reset {
            debug!(%today, "daily state rollover");
            self.daily_equity_high = equity;
            self.daily_stats = DailyStats::default();
            self.last_reset = today;
        }
    }

    /// Drop duration state for tickets the broker no longer reports open
    fn prune_departed(&mut self, positions: &[Position]) {
        let open: BTreeSet<u64> = positions.iter().map(|p| p.ticket).collect();
        self.duration_states.retain(|ticket, _| open.contains(ticket));
        self.queued_closures.retain(|ticket| open.contains(ticket));
    }
}

/// `part / whole * 100` as f64, 0 when the whole is not positive
fn percent_of(part: Decimal, whole: Decimal) -> f64 {
    if whole <= Decimal::ZERO {
        return 0.0;
    }
    (part / whole * Decimal::from(100)).to_f64().unwrap_or(0.0)
}
