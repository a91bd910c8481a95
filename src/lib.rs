//! Prop Engine Library
//!
//! Rule and consensus core for a prop-firm forex trading bot: signal
//! providers, multi-provider consensus, eligibility gating, and the
//! compliance rule engine (loss limits, drawdown, position duration,
//! trading-day minimums). Broker connectivity, dashboards, and persistence
//! are collaborator traits implemented elsewhere.

pub mod aggregator;
pub mod broker;
pub mod engine;
pub mod evaluator;
pub mod pip;
pub mod provider;
pub mod rules;
pub mod runner;
pub mod signal;

// Re-export main types for convenience
pub use aggregator::SignalAggregator;
pub use broker::{
    AccountSnapshot, BrokerError, BrokerGateway, Clock, HistoricalOrder, NotificationSink,
    OrderRequest, Position, PositionSide, SystemClock, TracingSink,
};
pub use engine::{
    ClosureAttempt, ComplianceReport, DrawdownReport, DrawdownStatus, DurationReport,
    DurationState, ProfitReport, ProfitStatus, RuleEngine, RuleViolation, TradingDaysReport,
    TradingDaysStatus,
};
pub use evaluator::{EvaluationResult, Evaluator, EvaluatorConfig, SignalStatus};
pub use provider::{MovingAverageProvider, SignalProvider};
pub use rules::{RuleError, RuleSet};
pub use runner::{OrchestratorConfig, TradingOrchestrator};
pub use signal::{Candle, Signal, SignalDirection, Timeframe};
