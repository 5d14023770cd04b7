//! Performance metrics.
//!
//! - Win rate, profit factor
//! - Sharpe, Sortino and Calmar ratios
//! - Maximum drawdown, CAGR
//! - Ranking metrics used by the optimizer

pub mod calculator;
pub mod ranking;

pub use calculator::{DrawdownAnalysis, MetricsCalculator, PerformanceMetrics};
pub use ranking::{BacktestSummary, RankMetric};
