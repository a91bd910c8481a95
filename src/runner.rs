//! Trading orchestrator - main polling loop
//!
//! Thin coordination layer over the aggregator, evaluator, and rule engine.
//! Owns the only mutable reference to the engine, so every rule check and
//! state update is serialized through this loop.

use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::aggregator::SignalAggregator;
use crate::broker::{BrokerGateway, Clock, OrderRequest};
use crate::engine::RuleEngine;
use crate::evaluator::Evaluator;
use crate::signal::{bars_are_stale, Timeframe};

/// Loop timings and data-freshness settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    /// Bars requested per symbol each evaluation
    pub bar_count: usize,
    pub trading_interval: Duration,
    pub compliance_interval: Duration,
    pub closure_retry_interval: Duration,
    /// Bars older than this are treated as a closed market for the tick
    pub max_bar_age: ChronoDuration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            timeframe: Timeframe::H1,
            bar_count: 100,
            trading_interval: Duration::from_secs(60),
            compliance_interval: Duration::from_secs(30),
            closure_retry_interval: Duration::from_secs(120),
            max_bar_age: ChronoDuration::minutes(90),
        }
    }
}

/// Main orchestrator driving the trading and compliance cycles
pub struct TradingOrchestrator {
    gateway: Arc<dyn BrokerGateway>,
    clock: Arc<dyn Clock>,
    aggregator: SignalAggregator,
    evaluator: Evaluator,
    engine: RuleEngine,
    config: OrchestratorConfig,
}

impl TradingOrchestrator {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        clock: Arc<dyn Clock>,
        aggregator: SignalAggregator,
        evaluator: Evaluator,
        engine: RuleEngine,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gateway,
            clock,
            aggregator,
            evaluator,
            engine,
            config,
        }
    }

    /// Run the main loop. Cycle errors are logged and the loop continues;
    /// only construction can refuse to start.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            symbols = ?self.config.symbols,
            timeframe = %self.config.timeframe,
            "orchestrator starting main loop"
        );

        let mut trading_interval = interval(self.config.trading_interval);
        let mut compliance_interval = interval(self.config.compliance_interval);
        let mut closure_interval = interval(self.config.closure_retry_interval);

        loop {
            tokio::select! {
                _ = trading_interval.tick() => {
                    if let Err(e) = self.run_trading_cycle().await {
                        error!("Trading cycle error: {}", e);
                    }
                }
                _ = compliance_interval.tick() => {
                    if let Err(e) = self.run_compliance_cycle().await {
                        error!("Compliance cycle error: {}", e);
                    }
                }
                _ = closure_interval.tick() => {
                    let attempts = self
                        .engine
                        .process_queued_closures(self.gateway.as_ref())
                        .await;
                    for attempt in attempts {
                        if !attempt.closed {
                            warn!(ticket = attempt.ticket, "queued closure still pending");
                        }
                    }
                }
            }
        }
    }

    /// One pass over all configured symbols. Per-symbol failures are
    /// logged and do not stop the remaining symbols.
    async fn run_trading_cycle(&mut self) -> anyhow::Result<()> {
        let symbols = self.config.symbols.clone();
        for symbol in &symbols {
            let symbol = symbol.as_str();
            match self.evaluate_and_trade(symbol).await {
                Ok(true) => info!(symbol, "position opened"),
                Ok(false) => debug!(symbol, "no trade this tick"),
                Err(e) => warn!(symbol, "error evaluating symbol: {}", e),
            }
        }
        Ok(())
    }

    /// Evaluate one symbol and place an order when every gate passes
    async fn evaluate_and_trade(&mut self, symbol: &str) -> anyhow::Result<bool> {
        let bars = self
            .gateway
            .price_bars(symbol, self.config.timeframe, self.config.bar_count)
            .await?;

        let now = self.clock.now();
        if bars_are_stale(&bars, now, self.config.max_bar_age) {
            warn!(symbol, "stale price bars, skipping symbol this tick");
            return Ok(false);
        }

        let signals = self.aggregator.get_signals(symbol, &bars);
        let consensus = match self.aggregator.consensus_signal(symbol, &bars) {
            Some(signal) if signal.direction.is_entry() => signal,
            _ => return Ok(false),
        };

        let positions = self.gateway.open_positions().await?;
        let evaluation = self.evaluator.evaluate(symbol, &signals, &positions);
        if !evaluation.trading_eligible {
            debug!(
                symbol,
                strength = evaluation.signal_strength,
                "signal not eligible"
            );
            return Ok(false);
        }

        let account = self.gateway.account_snapshot().await?;
        let volume = consensus.volume.unwrap_or(Decimal::new(1, 2));
        let (allowed, reason) = self.engine.check_position_allowed(&account, volume);
        if !allowed {
            warn!(symbol, reason, "trade blocked by account rules");
            return Ok(false);
        }

        let order = OrderRequest {
            symbol: symbol.to_string(),
            direction: consensus.direction,
            volume,
            price: consensus.entry_price,
            stop_loss: consensus.stop_loss,
            take_profit: consensus.take_profit,
            comment: consensus.note.clone(),
        };
        self.gateway.place_order(order).await?;
        self.engine.record_position_opened();
        Ok(true)
    }

    /// One compliance sweep: account health, drawdown, profit progress,
    /// trading days, and position durations
    async fn run_compliance_cycle(&mut self) -> anyhow::Result<()> {
        let account = self.gateway.account_snapshot().await?;
        let positions = self.gateway.open_positions().await?;
        let now = self.clock.now();
        let today = now.date_naive();

        self.engine.monitor_daily_performance(&account, today);

        let drawdown = self.engine.monitor_drawdown(&account, today);
        debug!(
            percent = drawdown.drawdown_percent,
            status = ?drawdown.status,
            "drawdown checked"
        );

        let profit = self.engine.track_profit_target(&account);
        debug!(
            progress = profit.progress_percent,
            status = ?profit.status,
            "profit target tracked"
        );

        match self.gateway.trade_history(now - ChronoDuration::days(30)).await {
            Ok(orders) => {
                let days = self.engine.track_trading_days(&orders);
                debug!(
                    traded = days.days_traded,
                    remaining = days.days_remaining,
                    "trading days tracked"
                );
            }
            Err(e) => warn!("trade history unavailable, skipping day count: {}", e),
        }

        self.engine
            .enforce_durations(&positions, now, self.gateway.as_ref())
            .await;

        let offset = self.gateway.server_utc_offset();
        let compliance = self
            .engine
            .check_compliance(&account, &positions, now, offset);
        if !compliance.compliant {
            for violation in &compliance.violations {
                error!("rule violation: {}", violation);
            }
        }

        Ok(())
    }
}
