//! Performance metrics calculator.
//!
//! Calculates trading performance statistics from an equity curve and a
//! trade log. Degenerate inputs (no trades, flat equity) produce zeros or
//! `None`, never NaN.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::{EquityPoint, ExitReason, Trade};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Performance metrics for one backtest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Basic statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// `None` when there were no trades.
    pub win_rate: Option<f64>,

    // P&L metrics
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    /// `None` when there were no losing trades.
    pub profit_factor: Option<f64>,
    pub avg_trade_pnl: Decimal,
    pub avg_winner: Decimal,
    pub avg_loser: Decimal,
    pub largest_winner: Decimal,
    pub largest_loser: Decimal,

    // Return metrics
    pub total_return_pct: f64,
    pub cagr: f64,

    // Risk metrics
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub drawdown_duration_days: i64,

    // Risk-adjusted returns
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    // Time metrics
    pub trading_days: usize,
    pub avg_days_held: f64,
    pub avg_days_to_profit_target: f64,
    pub avg_days_to_stop_loss: f64,

    // Exits and costs
    pub exit_reasons: BTreeMap<ExitReason, usize>,
    pub total_commission: Decimal,
}

impl PerformanceMetrics {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        let pct = |v: Option<f64>| match v {
            Some(v) => format!("{:.1}%", v * 100.0),
            None => "n/a".to_string(),
        };
        let ratio = |v: Option<f64>| match v {
            Some(v) => format!("{:.2}", v),
            None => "n/a".to_string(),
        };

        format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Trades: {} (W: {}, L: {})\n\
             Win Rate: {}\n\
             Profit Factor: {}\n\
             \n\
             Total P&L: ${:.2}\n\
             Avg Trade: ${:.2}\n\
             Avg Winner: ${:.2}\n\
             Avg Loser: ${:.2}\n\
             \n\
             Total Return: {:.2}%\n\
             CAGR: {:.2}%\n\
             Max Drawdown: ${:.2} ({:.2}%)\n\
             \n\
             Sharpe Ratio: {:.2}\n\
             Sortino Ratio: {:.2}\n\
             Calmar Ratio: {:.2}\n\
             \n\
             Avg Days Held: {:.1}\n\
             Commission: ${:.2}",
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            pct(self.win_rate),
            ratio(self.profit_factor),
            self.total_pnl,
            self.avg_trade_pnl,
            self.avg_winner,
            self.avg_loser,
            self.total_return_pct,
            self.cagr,
            self.max_drawdown,
            self.max_drawdown_pct,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.avg_days_held,
            self.total_commission,
        )
    }
}

/// Drawdown analysis details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownAnalysis {
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub max_drawdown_date: Option<NaiveDate>,
    pub peak_date: Option<NaiveDate>,
    pub duration_days: i64,
}

fn to_f64(value: Decimal) -> f64 {
    value.try_into().unwrap_or(0.0)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn calculate(
        initial_equity: Decimal,
        equity_curve: &[EquityPoint],
        trades: &[Trade],
    ) -> PerformanceMetrics {
        // Basic counts
        let total_trades = trades.len();
        let winning_trades = trades.iter().filter(|t| t.is_winner()).count();
        let losing_trades = trades.iter().filter(|t| t.is_loser()).count();
        let win_rate = if total_trades > 0 {
            Some(winning_trades as f64 / total_trades as f64)
        } else {
            None
        };

        // P&L calculations
        let total_pnl: Decimal = trades.iter().map(|t| t.realized_pnl).sum();
        let gross_profit: Decimal = trades
            .iter()
            .filter(|t| t.is_winner())
            .map(|t| t.realized_pnl)
            .sum();
        let gross_loss: Decimal = trades
            .iter()
            .filter(|t| t.is_loser())
            .map(|t| t.realized_pnl)
            .sum();
        let profit_factor = Self::calculate_profit_factor(gross_profit, gross_loss);

        let average = |total: Decimal, count: usize| {
            if count > 0 {
                total / Decimal::from(count as u64)
            } else {
                Decimal::ZERO
            }
        };

        let largest_winner = trades
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|p| *p > Decimal::ZERO)
            .max()
            .unwrap_or(Decimal::ZERO);
        let largest_loser = trades
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|p| *p < Decimal::ZERO)
            .min()
            .unwrap_or(Decimal::ZERO);

        // Return metrics
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_equity);
        let initial = to_f64(initial_equity);
        let total_return_pct = if initial > 0.0 {
            finite_or_zero((to_f64(final_equity) - initial) / initial * 100.0)
        } else {
            0.0
        };
        let trading_days = equity_curve.len();
        let cagr = Self::calculate_cagr(initial_equity, final_equity, trading_days);

        // Drawdown and risk-adjusted returns
        let drawdown = Self::analyze_drawdown(initial_equity, equity_curve);
        let returns = Self::daily_returns(initial_equity, equity_curve);
        let sharpe_ratio = Self::calculate_sharpe(&returns);
        let sortino_ratio = Self::calculate_sortino(&returns);
        let calmar_ratio = if drawdown.max_drawdown_pct > 0.0 {
            finite_or_zero(cagr / drawdown.max_drawdown_pct)
        } else {
            0.0
        };

        // Time metrics
        let avg_days_held = if total_trades > 0 {
            trades.iter().map(|t| t.days_held as f64).sum::<f64>() / total_trades as f64
        } else {
            0.0
        };

        let mut exit_reasons = BTreeMap::new();
        for trade in trades {
            *exit_reasons.entry(trade.exit_reason).or_insert(0) += 1;
        }

        PerformanceMetrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            total_pnl,
            gross_profit,
            gross_loss,
            profit_factor,
            avg_trade_pnl: average(total_pnl, total_trades),
            avg_winner: average(gross_profit, winning_trades),
            avg_loser: average(gross_loss, losing_trades),
            largest_winner,
            largest_loser,
            total_return_pct,
            cagr,
            max_drawdown: drawdown.max_drawdown,
            max_drawdown_pct: drawdown.max_drawdown_pct,
            drawdown_duration_days: drawdown.duration_days,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            trading_days,
            avg_days_held,
            avg_days_to_profit_target: Self::avg_days_by_exit_reason(
                trades,
                ExitReason::ProfitTarget,
            ),
            avg_days_to_stop_loss: Self::avg_days_by_exit_reason(trades, ExitReason::StopLoss),
            exit_reasons,
            total_commission: trades.iter().map(|t| t.commissions).sum(),
        }
    }

    /// Gross profit over |gross loss|; `None` without losing trades.
    fn calculate_profit_factor(gross_profit: Decimal, gross_loss: Decimal) -> Option<f64> {
        let loss = to_f64(gross_loss.abs());
        if loss == 0.0 {
            return None;
        }
        Some(finite_or_zero(to_f64(gross_profit) / loss))
    }

    /// Calculate CAGR (Compound Annual Growth Rate), in percent.
    fn calculate_cagr(initial: Decimal, final_val: Decimal, trading_days: usize) -> f64 {
        let init = to_f64(initial);
        let fin = to_f64(final_val);

        if init <= 0.0 || fin <= 0.0 || trading_days == 0 {
            return 0.0;
        }

        let years = trading_days as f64 / TRADING_DAYS_PER_YEAR;
        finite_or_zero(((fin / init).powf(1.0 / years) - 1.0) * 100.0)
    }

    /// Simple daily returns, starting from the initial equity.
    pub fn daily_returns(initial_equity: Decimal, equity_curve: &[EquityPoint]) -> Vec<f64> {
        let mut previous = to_f64(initial_equity);
        let mut returns = Vec::with_capacity(equity_curve.len());

        for point in equity_curve {
            let current = to_f64(point.equity);
            let r = if previous != 0.0 {
                (current - previous) / previous
            } else {
                0.0
            };
            returns.push(finite_or_zero(r));
            previous = current;
        }
        returns
    }

    /// Annualized Sharpe ratio (risk-free rate 0, population deviation).
    pub fn calculate_sharpe(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt();

        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }

        finite_or_zero(mean * TRADING_DAYS_PER_YEAR.sqrt() / std_dev)
    }

    /// Annualized Sortino ratio (downside deviation).
    pub fn calculate_sortino(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;

        // Downside deviation (only negative returns)
        let downside_variance = returns
            .iter()
            .filter(|&&r| r < 0.0)
            .map(|r| r.powi(2))
            .sum::<f64>()
            / returns.len() as f64;
        let downside_dev = downside_variance.sqrt();

        if downside_dev == 0.0 || !downside_dev.is_finite() {
            return 0.0;
        }

        finite_or_zero(mean * TRADING_DAYS_PER_YEAR.sqrt() / downside_dev)
    }

    /// Peak-to-trough drawdown in dollars and percent of the peak.
    pub fn analyze_drawdown(initial_equity: Decimal, equity_curve: &[EquityPoint]) -> DrawdownAnalysis {
        let mut analysis = DrawdownAnalysis {
            max_drawdown: Decimal::ZERO,
            max_drawdown_pct: 0.0,
            max_drawdown_date: None,
            peak_date: None,
            duration_days: 0,
        };

        let mut peak = initial_equity;
        let mut peak_date: Option<NaiveDate> = None;

        for point in equity_curve {
            if point.equity >= peak {
                peak = point.equity;
                peak_date = Some(point.date);
                continue;
            }

            let drawdown = peak - point.equity;
            if drawdown > analysis.max_drawdown {
                analysis.max_drawdown = drawdown;
                analysis.max_drawdown_pct = if peak > Decimal::ZERO {
                    finite_or_zero(to_f64(drawdown) / to_f64(peak) * 100.0)
                } else {
                    0.0
                };
                analysis.max_drawdown_date = Some(point.date);
                analysis.peak_date = peak_date;
                analysis.duration_days = peak_date
                    .map(|d| (point.date - d).num_days())
                    .unwrap_or(0);
            }
        }

        analysis
    }

    /// Average days held for trades closed with `reason`.
    fn avg_days_by_exit_reason(trades: &[Trade], reason: ExitReason) -> f64 {
        let matching: Vec<_> = trades.iter().filter(|t| t.exit_reason == reason).collect();

        if matching.is_empty() {
            return 0.0;
        }

        matching.iter().map(|t| t.days_held as f64).sum::<f64>() / matching.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn point(day: u32, equity: Decimal) -> EquityPoint {
        EquityPoint {
            date: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
            equity,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            open_positions: 0,
            daily_pnl: Decimal::ZERO,
        }
    }

    fn trade(pnl: Decimal, reason: ExitReason, days: i64) -> Trade {
        let entry = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        Trade {
            position_id: 1,
            strategy: "s".to_string(),
            entry_date: entry,
            exit_date: entry + chrono::Duration::days(days),
            exit_reason: reason,
            entry_premium: dec!(200),
            exit_cost: dec!(200) - pnl,
            commissions: Decimal::ZERO,
            realized_pnl: pnl,
            max_adverse_excursion: pnl.min(Decimal::ZERO),
            max_favorable_excursion: pnl.max(Decimal::ZERO),
            days_held: days,
            legs: Vec::new(),
        }
    }

    #[test]
    fn test_profit_factor() {
        let pf = MetricsCalculator::calculate_profit_factor(dec!(15000), dec!(-5000));
        assert_eq!(pf, Some(3.0));
        assert_eq!(
            MetricsCalculator::calculate_profit_factor(dec!(100), Decimal::ZERO),
            None
        );
    }

    #[test]
    fn test_cagr() {
        // 100K -> 121K over 2 years (504 days) = 10% CAGR
        let cagr = MetricsCalculator::calculate_cagr(dec!(100000), dec!(121000), 504);
        assert_relative_eq!(cagr, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_trades_is_not_an_error() {
        let curve = vec![point(1, dec!(100000)), point(2, dec!(100000))];
        let metrics = MetricsCalculator::calculate(dec!(100000), &curve, &[]);

        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, None);
        assert_eq!(metrics.profit_factor, None);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_trade_statistics() {
        let trades = vec![
            trade(dec!(100), ExitReason::ProfitTarget, 10),
            trade(dec!(-250), ExitReason::StopLoss, 4),
            trade(dec!(60), ExitReason::ProfitTarget, 16),
        ];
        let curve = vec![point(1, dec!(100100)), point(2, dec!(99850)), point(3, dec!(99910))];
        let metrics = MetricsCalculator::calculate(dec!(100000), &curve, &trades);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert_relative_eq!(metrics.win_rate.unwrap(), 2.0 / 3.0);
        assert_eq!(metrics.total_pnl, dec!(-90));
        assert_relative_eq!(metrics.profit_factor.unwrap(), 160.0 / 250.0);
        assert_eq!(metrics.largest_loser, dec!(-250));
        assert_relative_eq!(metrics.avg_days_held, 10.0);
        assert_relative_eq!(metrics.avg_days_to_profit_target, 13.0);
        assert_eq!(metrics.exit_reasons.get(&ExitReason::ProfitTarget), Some(&2));

        // Peak 100100 -> trough 99850
        assert_eq!(metrics.max_drawdown, dec!(250));
        assert_relative_eq!(metrics.max_drawdown_pct, 250.0 / 100100.0 * 100.0, epsilon = 1e-12);
        assert!(metrics.sharpe_ratio < 0.0);
    }

    #[test]
    fn test_sharpe_matches_hand_computation() {
        let returns = [0.01, -0.005, 0.002, 0.003];
        let mean = 0.0025;
        let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / 4.0;
        let expected = mean * 252f64.sqrt() / var.sqrt();

        assert_relative_eq!(
            MetricsCalculator::calculate_sharpe(&returns),
            expected,
            epsilon = 1e-12
        );
        assert_eq!(MetricsCalculator::calculate_sharpe(&[0.0, 0.0, 0.0]), 0.0);
    }
}
