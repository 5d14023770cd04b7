//! Day-stepped backtest engine.
//!
//! Runs the simulation loop once per snapshot:
//! 1. Mark every open position to the day's snapshot
//! 2. Check exit conditions, closing at most one reason per position
//! 3. Open a new position if cadence and capacity allow
//! 4. Record daily equity
//!
//! Positions still open after the last snapshot are closed as end of period.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::chain::{select_legs, ChainCache, ChainConfig};
use crate::data::MarketSnapshot;
use crate::metrics::{MetricsCalculator, PerformanceMetrics};
use crate::strategy::{ConfigError, StrategyConfig};

use super::commission::CommissionModel;
use super::trade::{ExitReason, Position, PositionError, PositionLeg, Trade};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BacktestError {
    #[error("No snapshots to simulate")]
    EmptyWindow,

    #[error("Snapshots out of order: {next} follows {previous}")]
    UnorderedSnapshots {
        previous: NaiveDate,
        next: NaiveDate,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Strategy(#[from] ConfigError),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error("Chain cache was built with a different chain configuration")]
    CacheMismatch,
}

/// Configuration for backtest execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Starting equity.
    #[serde(default = "default_initial_equity")]
    pub initial_equity: Decimal,

    /// Synthetic chain shape.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Commission model.
    #[serde(default)]
    pub commission: CommissionModel,

    /// Log every entry and exit at info level.
    #[serde(default)]
    pub verbose: bool,
}

fn default_initial_equity() -> Decimal {
    Decimal::from(100_000)
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_equity: default_initial_equity(),
            chain: ChainConfig::default(),
            commission: CommissionModel::default(),
            verbose: false,
        }
    }
}

/// Daily equity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_positions: usize,
    pub daily_pnl: Decimal,
}

/// Result of a completed backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Strategy name.
    pub strategy: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    /// Daily equity curve.
    pub equity_curve: Vec<EquityPoint>,
    /// Completed trades in exit order.
    pub trade_log: Vec<Trade>,
    pub metrics: PerformanceMetrics,
    /// Days where an entry was due but pricing or leg selection failed.
    pub skipped_entries: usize,
}

/// First satisfied exit condition, in priority order: profit target, stop
/// loss, max hold (days held or days to expiration), expiration.
pub fn evaluate_exit(
    position: &Position,
    strategy: &StrategyConfig,
    date: NaiveDate,
) -> Option<ExitReason> {
    if position.is_profit_target_hit(strategy.profit_target_pct) {
        return Some(ExitReason::ProfitTarget);
    }
    if position.is_stop_loss_hit(strategy.stop_loss_pct) {
        return Some(ExitReason::StopLoss);
    }
    if let Some(max_hold) = strategy.max_hold_days {
        if position.days_held(date) >= i64::from(max_hold) {
            return Some(ExitReason::MaxHold);
        }
    }
    if let Some(exit_dte) = strategy.exit_dte {
        if position.is_time_exit(date, exit_dte) {
            return Some(ExitReason::MaxHold);
        }
    }
    if position.is_expired(date) {
        return Some(ExitReason::Expiration);
    }
    None
}

/// The backtesting engine.
pub struct BacktestEngine<'a> {
    config: BacktestConfig,
    strategy: StrategyConfig,
    cache: &'a ChainCache,
}

/// Mutable state of one run.
struct RunState {
    open: Vec<Position>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    realized: Decimal,
    last_entry: Option<NaiveDate>,
    next_id: u64,
    skipped_entries: usize,
}

impl<'a> BacktestEngine<'a> {
    /// Create an engine. The cache must have been built for `config.chain`.
    pub fn new(
        config: BacktestConfig,
        strategy: StrategyConfig,
        cache: &'a ChainCache,
    ) -> Result<Self, BacktestError> {
        strategy.validate()?;

        if config.initial_equity <= Decimal::ZERO {
            return Err(BacktestError::InvalidConfig(format!(
                "initial_equity must be positive, got {}",
                config.initial_equity
            )));
        }
        if config.chain.strike_increment <= Decimal::ZERO
            || config.chain.min_dte > config.chain.max_dte
        {
            return Err(BacktestError::InvalidConfig(
                "chain needs a positive strike increment and min_dte <= max_dte".to_string(),
            ));
        }
        if cache.config() != &config.chain {
            return Err(BacktestError::CacheMismatch);
        }

        Ok(Self {
            config,
            strategy,
            cache,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn strategy(&self) -> &StrategyConfig {
        &self.strategy
    }

    /// Simulate the strategy over `snapshots`, which must be strictly
    /// ascending by date.
    pub fn run(&self, snapshots: &[MarketSnapshot]) -> Result<BacktestResult, BacktestError> {
        let (first, last) = match (snapshots.first(), snapshots.last()) {
            (Some(first), Some(last)) => (first.date, last.date),
            _ => return Err(BacktestError::EmptyWindow),
        };
        if let Some(pair) = snapshots.windows(2).find(|w| w[1].date <= w[0].date) {
            return Err(BacktestError::UnorderedSnapshots {
                previous: pair[0].date,
                next: pair[1].date,
            });
        }

        let mut state = RunState {
            open: Vec::new(),
            trades: Vec::new(),
            equity_curve: Vec::with_capacity(snapshots.len()),
            realized: Decimal::ZERO,
            last_entry: None,
            next_id: 1,
            skipped_entries: 0,
        };

        for snapshot in snapshots {
            self.process_day(&mut state, snapshot)?;
        }

        self.close_remaining_positions(&mut state, last)?;

        let initial = self.config.initial_equity;
        let final_equity = state
            .equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial);
        let metrics = MetricsCalculator::calculate(initial, &state.equity_curve, &state.trades);

        if self.config.verbose {
            info!(
                strategy = %self.strategy.name,
                trades = state.trades.len(),
                final_equity = %final_equity,
                sharpe = metrics.sharpe_ratio,
                skipped = state.skipped_entries,
                "Backtest complete"
            );
        }

        Ok(BacktestResult {
            strategy: self.strategy.name.clone(),
            start_date: first,
            end_date: last,
            initial_equity: initial,
            final_equity,
            equity_curve: state.equity_curve,
            trade_log: state.trades,
            metrics,
            skipped_entries: state.skipped_entries,
        })
    }

    fn process_day(
        &self,
        state: &mut RunState,
        snapshot: &MarketSnapshot,
    ) -> Result<(), BacktestError> {
        let date = snapshot.date;

        // 1. Mark
        for position in &mut state.open {
            if let Err(e) = position.mark(snapshot) {
                warn!(position = position.id, %date, error = %e, "Mark failed, keeping previous mark");
            }
        }

        // 2. Exits
        let mut still_open = Vec::with_capacity(state.open.len());
        for mut position in state.open.drain(..) {
            match evaluate_exit(&position, &self.strategy, date) {
                Some(reason) => {
                    let fee = self.config.commission.order(position.total_contracts());
                    let trade = position.close(date, reason, fee)?;
                    self.log_exit(&trade);
                    state.realized += trade.realized_pnl;
                    state.trades.push(trade);
                }
                None => still_open.push(position),
            }
        }
        state.open = still_open;

        // 3. Entry
        if state.open.len() < self.strategy.entry.capacity()
            && self.strategy.entry.cadence.allows(date, state.last_entry)
        {
            self.try_enter(state, snapshot)?;
        }

        // 4. Equity
        let unrealized: Decimal = state.open.iter().map(|p| p.net_unrealized_pnl()).sum();
        let equity = self.config.initial_equity + state.realized + unrealized;
        let previous = state
            .equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.config.initial_equity);

        state.equity_curve.push(EquityPoint {
            date,
            equity,
            realized_pnl: state.realized,
            unrealized_pnl: unrealized,
            open_positions: state.open.len(),
            daily_pnl: equity - previous,
        });

        Ok(())
    }

    fn try_enter(&self, state: &mut RunState, snapshot: &MarketSnapshot) -> Result<(), BacktestError> {
        let date = snapshot.date;

        let chain = match self.cache.chain_for(snapshot) {
            Ok(chain) => chain,
            Err(e) => {
                debug!(%date, error = %e, "Chain pricing failed, skipping entry");
                state.skipped_entries += 1;
                return Ok(());
            }
        };

        let contracts = match select_legs(&chain, &self.strategy) {
            Ok(contracts) => contracts,
            Err(e) => {
                debug!(%date, error = %e, "Leg selection failed, skipping entry");
                state.skipped_entries += 1;
                return Ok(());
            }
        };

        let legs = contracts
            .into_iter()
            .zip(&self.strategy.legs)
            .map(|(contract, spec)| PositionLeg::new(contract, spec.side, spec.quantity))
            .collect();

        let mut position = Position::pending(state.next_id, &self.strategy.name, date, legs)?;
        let fee = self.config.commission.order(position.total_contracts());
        position.open(fee)?;

        if self.config.verbose {
            info!(
                position = position.id,
                %date,
                premium = %position.entry_premium,
                legs = position.legs.len(),
                "Opened position"
            );
        } else {
            trace!(position = position.id, %date, premium = %position.entry_premium, "Opened position");
        }

        state.next_id += 1;
        state.last_entry = Some(date);
        state.open.push(position);
        Ok(())
    }

    fn close_remaining_positions(
        &self,
        state: &mut RunState,
        last: NaiveDate,
    ) -> Result<(), BacktestError> {
        if state.open.is_empty() {
            return Ok(());
        }

        for mut position in state.open.drain(..) {
            let fee = self.config.commission.order(position.total_contracts());
            let trade = position.close(last, ExitReason::EndOfPeriod, fee)?;
            self.log_exit(&trade);
            state.realized += trade.realized_pnl;
            state.trades.push(trade);
        }

        // Restate the final day with every position realized.
        if let Some(point) = state.equity_curve.last_mut() {
            let equity = self.config.initial_equity + state.realized;
            point.daily_pnl += equity - point.equity;
            point.equity = equity;
            point.realized_pnl = state.realized;
            point.unrealized_pnl = Decimal::ZERO;
            point.open_positions = 0;
        }
        Ok(())
    }

    fn log_exit(&self, trade: &Trade) {
        if self.config.verbose {
            info!(
                position = trade.position_id,
                exit = %trade.exit_date,
                reason = trade.exit_reason.as_str(),
                pnl = %trade.realized_pnl,
                days = trade.days_held,
                "Closed position"
            );
        } else {
            debug!(
                position = trade.position_id,
                reason = trade.exit_reason.as_str(),
                pnl = %trade.realized_pnl,
                "Closed position"
            );
        }
    }
}

/// Build a cache for `config.chain` and run one backtest.
pub fn run_backtest(
    config: &BacktestConfig,
    strategy: &StrategyConfig,
    snapshots: &[MarketSnapshot],
) -> Result<BacktestResult, BacktestError> {
    let cache = ChainCache::new(config.chain.clone());
    BacktestEngine::new(config.clone(), strategy.clone(), &cache)?.run(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::OptionContract;
    use crate::data::{Greeks, OptionType, SyntheticSeries};
    use crate::strategy::{EntryCadence, EntryRules, LegSide};
    use rust_decimal_macros::dec;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn zero_commission() -> BacktestConfig {
        BacktestConfig {
            commission: CommissionModel::zero(),
            ..BacktestConfig::default()
        }
    }

    fn open_short_put(price: f64, expiration: NaiveDate) -> Position {
        let contract = OptionContract {
            strike: dec!(95),
            expiration,
            dte: 30,
            option_type: OptionType::Put,
            price,
            greeks: Greeks::default(),
        };
        let leg = PositionLeg::new(contract, LegSide::Short, 1);
        let mut position = Position::pending(1, "s", date(3, 1), vec![leg]).unwrap();
        position.open(Decimal::ZERO).unwrap();
        position
    }

    fn marked(mut position: Position, day: NaiveDate, price: f64) -> Position {
        let mut quote = position.legs[0].contract.clone();
        quote.price = price;
        position.apply_marks(day, &[quote]);
        position
    }

    #[test]
    fn test_exit_priority() {
        let strategy = StrategyConfig::single(OptionType::Put, LegSide::Short, 0.3, 20, 40)
            .with_exits(0.5, 1.0, Some(5));

        // Profit target and expiration both hold: profit target wins
        let position = marked(open_short_put(2.0, date(3, 10)), date(3, 10), 0.5);
        assert_eq!(
            evaluate_exit(&position, &strategy, date(3, 10)),
            Some(ExitReason::ProfitTarget)
        );

        // Stop loss beats max hold
        let position = marked(open_short_put(2.0, date(3, 30)), date(3, 8), 4.5);
        assert_eq!(
            evaluate_exit(&position, &strategy, date(3, 8)),
            Some(ExitReason::StopLoss)
        );

        // Max hold beats expiration
        let position = marked(open_short_put(2.0, date(3, 6)), date(3, 6), 1.8);
        assert_eq!(
            evaluate_exit(&position, &strategy, date(3, 6)),
            Some(ExitReason::MaxHold)
        );

        let position = marked(open_short_put(2.0, date(3, 4)), date(3, 4), 1.8);
        assert_eq!(
            evaluate_exit(&position, &strategy, date(3, 4)),
            Some(ExitReason::Expiration)
        );

        let position = marked(open_short_put(2.0, date(3, 30)), date(3, 2), 1.8);
        assert_eq!(evaluate_exit(&position, &strategy, date(3, 2)), None);
    }

    #[test]
    fn test_days_held_and_dte_exits_disagree() {
        // Entered 2024-03-01, expiring 2024-04-15 (45 DTE)
        let expiry = date(4, 15);
        let by_days = StrategyConfig::single(OptionType::Put, LegSide::Short, 0.3, 20, 50)
            .with_exits(0.5, 2.0, Some(21));
        let by_dte = StrategyConfig::single(OptionType::Put, LegSide::Short, 0.3, 20, 50)
            .with_exits(0.5, 2.0, None)
            .with_exit_dte(Some(21));

        // Day 21 held, 24 DTE left
        let position = marked(open_short_put(2.0, expiry), date(3, 22), 1.8);
        assert_eq!(
            evaluate_exit(&position, &by_days, date(3, 22)),
            Some(ExitReason::MaxHold)
        );
        assert_eq!(evaluate_exit(&position, &by_dte, date(3, 22)), None);

        // Day 24 held, 21 DTE left
        let position = marked(open_short_put(2.0, expiry), date(3, 25), 1.8);
        assert_eq!(position.dte_remaining(date(3, 25)), Some(21));
        assert_eq!(
            evaluate_exit(&position, &by_dte, date(3, 25)),
            Some(ExitReason::MaxHold)
        );

        // Stop loss still outranks the DTE exit
        let position = marked(open_short_put(2.0, expiry), date(3, 25), 6.5);
        assert_eq!(
            evaluate_exit(&position, &by_dte, date(3, 25)),
            Some(ExitReason::StopLoss)
        );
    }

    fn synthetic_series(days: usize) -> Vec<MarketSnapshot> {
        let mut series = SyntheticSeries::new(date(1, 2), days, 11);
        series.realized_volatility = 0.15;
        series.implied_volatility = 0.18;
        series.generate().unwrap()
    }

    #[test]
    fn test_run_produces_consistent_result() {
        let strategy = StrategyConfig::bull_put_spread(0.30, dec!(5), 25, 45)
            .with_exits(0.5, 2.0, Some(21));
        let snapshots = synthetic_series(120);

        let result = run_backtest(&zero_commission(), &strategy, &snapshots).unwrap();

        assert_eq!(result.equity_curve.len(), snapshots.len());
        assert!(!result.trade_log.is_empty());
        assert_eq!(result.start_date, snapshots[0].date);

        // One position at a time, each with a single exit reason
        for trade in &result.trade_log {
            assert!(trade.exit_date >= trade.entry_date);
            assert!(trade.entry_premium > Decimal::ZERO);
        }
        for w in result.trade_log.windows(2) {
            assert!(w[1].entry_date >= w[0].exit_date);
        }
        assert!(result.equity_curve.iter().all(|p| p.open_positions <= 1));

        // Final equity reconciles with realized P&L
        let total: Decimal = result.trade_log.iter().map(|t| t.realized_pnl).sum();
        assert_eq!(result.final_equity, result.initial_equity + total);
        assert_eq!(result.equity_curve.last().unwrap().open_positions, 0);
        assert_eq!(result.metrics.total_trades, result.trade_log.len());

        // Deterministic
        assert_eq!(run_backtest(&zero_commission(), &strategy, &snapshots).unwrap(), result);
    }

    #[test]
    fn test_layering_respects_cap() {
        let strategy = StrategyConfig::short_strangle(0.16, 30, 45)
            .with_exits(0.9, 5.0, None)
            .with_entry(EntryRules {
                cadence: EntryCadence::Interval { days: 3 },
                allow_layering: true,
                max_open_positions: 3,
            });

        let result = run_backtest(&zero_commission(), &strategy, &synthetic_series(60)).unwrap();
        let peak = result
            .equity_curve
            .iter()
            .map(|p| p.open_positions)
            .max()
            .unwrap_or(0);
        assert!(peak > 1 && peak <= 3);
    }

    #[test]
    fn test_unordered_snapshots_rejected() {
        let strategy = StrategyConfig::short_strangle(0.16, 30, 45);
        let mut snapshots = synthetic_series(5);
        snapshots.swap(1, 2);

        let err = run_backtest(&zero_commission(), &strategy, &snapshots).unwrap_err();
        assert!(matches!(err, BacktestError::UnorderedSnapshots { .. }));

        let err = run_backtest(&zero_commission(), &strategy, &[]).unwrap_err();
        assert_eq!(err, BacktestError::EmptyWindow);
    }

    #[test]
    fn test_unreachable_window_skips_entries() {
        // No weekly expiration 100-120 days out inside the default 60 DTE chain
        let strategy = StrategyConfig::short_strangle(0.16, 100, 120);
        let result = run_backtest(&zero_commission(), &strategy, &synthetic_series(10)).unwrap();

        assert!(result.trade_log.is_empty());
        assert_eq!(result.skipped_entries, 10);
        assert_eq!(result.metrics.sharpe_ratio, 0.0);
        assert_eq!(result.metrics.win_rate, None);
    }

    #[test]
    fn test_cache_must_match_config() {
        let cache = ChainCache::new(ChainConfig {
            max_dte: 30,
            ..ChainConfig::default()
        });
        let strategy = StrategyConfig::short_strangle(0.16, 20, 30);
        assert!(matches!(
            BacktestEngine::new(BacktestConfig::default(), strategy, &cache),
            Err(BacktestError::CacheMismatch)
        ));
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let cache = ChainCache::new(ChainConfig::default());
        let strategy = StrategyConfig::short_strangle(0.16, 45, 30);
        assert!(matches!(
            BacktestEngine::new(BacktestConfig::default(), strategy, &cache),
            Err(BacktestError::Strategy(_))
        ));
    }

    #[test]
    fn test_commissions_reduce_equity() {
        let strategy = StrategyConfig::bull_put_spread(0.30, dec!(5), 25, 45);
        let snapshots = synthetic_series(40);

        let free = run_backtest(&zero_commission(), &strategy, &snapshots).unwrap();
        let paid = run_backtest(&BacktestConfig::default(), &strategy, &snapshots).unwrap();

        assert_eq!(free.trade_log.len(), paid.trade_log.len());
        let fees: Decimal = paid.trade_log.iter().map(|t| t.commissions).sum();
        assert_eq!(fees, Decimal::from(4 * paid.trade_log.len() as i64));
        assert_eq!(free.final_equity - paid.final_equity, fees);
    }
}
