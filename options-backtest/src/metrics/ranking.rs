//! Ranking metrics for comparing backtests.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::BacktestResult;

/// Compact summary of one backtest, kept per parameter combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub total_trades: usize,
    pub win_rate: Option<f64>,
    pub profit_factor: Option<f64>,
    pub total_pnl: Decimal,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub avg_days_held: f64,
    pub final_equity: Decimal,
    pub skipped_entries: usize,
}

impl From<&BacktestResult> for BacktestSummary {
    fn from(result: &BacktestResult) -> Self {
        let m = &result.metrics;
        Self {
            total_trades: m.total_trades,
            win_rate: m.win_rate,
            profit_factor: m.profit_factor,
            total_pnl: m.total_pnl,
            total_return_pct: m.total_return_pct,
            max_drawdown_pct: m.max_drawdown_pct,
            sharpe_ratio: m.sharpe_ratio,
            sortino_ratio: m.sortino_ratio,
            calmar_ratio: m.calmar_ratio,
            avg_days_held: m.avg_days_held,
            final_equity: result.final_equity,
            skipped_entries: result.skipped_entries,
        }
    }
}

/// Metric the optimizer maximizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    #[default]
    SharpeRatio,
    SortinoRatio,
    CalmarRatio,
    TotalPnl,
    TotalReturn,
    WinRate,
    ProfitFactor,
    /// Smaller drawdown ranks higher.
    MaxDrawdown,
}

impl RankMetric {
    pub const ALL: [RankMetric; 8] = [
        Self::SharpeRatio,
        Self::SortinoRatio,
        Self::CalmarRatio,
        Self::TotalPnl,
        Self::TotalReturn,
        Self::WinRate,
        Self::ProfitFactor,
        Self::MaxDrawdown,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::SharpeRatio => "sharpe_ratio",
            Self::SortinoRatio => "sortino_ratio",
            Self::CalmarRatio => "calmar_ratio",
            Self::TotalPnl => "total_pnl",
            Self::TotalReturn => "total_return",
            Self::WinRate => "win_rate",
            Self::ProfitFactor => "profit_factor",
            Self::MaxDrawdown => "max_drawdown",
        }
    }

    /// Higher is better. `None` when the metric is undefined for this run.
    pub fn score(&self, summary: &BacktestSummary) -> Option<f64> {
        match self {
            Self::SharpeRatio => Some(summary.sharpe_ratio),
            Self::SortinoRatio => Some(summary.sortino_ratio),
            Self::CalmarRatio => Some(summary.calmar_ratio),
            Self::TotalPnl => summary.total_pnl.try_into().ok(),
            Self::TotalReturn => Some(summary.total_return_pct),
            Self::WinRate => summary.win_rate,
            Self::ProfitFactor => match summary.profit_factor {
                Some(pf) => Some(pf),
                // Winners without a single loser
                None if summary.win_rate.is_some_and(|w| w > 0.0) => Some(f64::INFINITY),
                None => None,
            },
            Self::MaxDrawdown => Some(-summary.max_drawdown_pct),
        }
    }
}

impl fmt::Display for RankMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RankMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sharpe" | "sharpe_ratio" => Ok(Self::SharpeRatio),
            "sortino" | "sortino_ratio" => Ok(Self::SortinoRatio),
            "calmar" | "calmar_ratio" => Ok(Self::CalmarRatio),
            "pnl" | "total_pnl" => Ok(Self::TotalPnl),
            "return" | "total_return" => Ok(Self::TotalReturn),
            "win_rate" => Ok(Self::WinRate),
            "profit_factor" => Ok(Self::ProfitFactor),
            "drawdown" | "max_drawdown" => Ok(Self::MaxDrawdown),
            other => Err(format!(
                "unknown metric '{}', expected one of: {}",
                other,
                Self::ALL.map(|m| m.name()).join(", ")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn summary() -> BacktestSummary {
        BacktestSummary {
            total_trades: 12,
            win_rate: Some(0.75),
            profit_factor: None,
            total_pnl: dec!(1250.50),
            total_return_pct: 1.2505,
            max_drawdown_pct: 3.5,
            sharpe_ratio: 1.4,
            sortino_ratio: 2.1,
            calmar_ratio: 0.9,
            avg_days_held: 11.5,
            final_equity: dec!(101250.50),
            skipped_entries: 0,
        }
    }

    #[test]
    fn test_metric_names_roundtrip() {
        for metric in RankMetric::ALL {
            assert_eq!(metric.name().parse::<RankMetric>(), Ok(metric));
        }
        assert_eq!("Sharpe".parse::<RankMetric>(), Ok(RankMetric::SharpeRatio));
        assert!("alpha".parse::<RankMetric>().is_err());
    }

    #[test]
    fn test_scores() {
        let s = summary();
        assert_eq!(RankMetric::SharpeRatio.score(&s), Some(1.4));
        assert_eq!(RankMetric::TotalPnl.score(&s), Some(1250.5));
        assert_eq!(RankMetric::MaxDrawdown.score(&s), Some(-3.5));
        assert_eq!(RankMetric::ProfitFactor.score(&s), Some(f64::INFINITY));
        assert_eq!(RankMetric::default(), RankMetric::SharpeRatio);
    }

    #[test]
    fn test_profit_factor_without_losers() {
        let no_trades = BacktestSummary {
            total_trades: 0,
            win_rate: None,
            profit_factor: None,
            ..summary()
        };
        assert_eq!(RankMetric::ProfitFactor.score(&no_trades), None);

        let all_flat = BacktestSummary {
            win_rate: Some(0.0),
            ..no_trades.clone()
        };
        assert_eq!(RankMetric::ProfitFactor.score(&all_flat), None);

        let lossy = BacktestSummary {
            win_rate: Some(0.1),
            profit_factor: Some(0.2),
            ..summary()
        };
        assert_eq!(RankMetric::ProfitFactor.score(&lossy), Some(0.2));
    }
}
