//! Backtesting engine for options strategies.
//!
//! - Position lifecycle (pending entry, open, closed)
//! - Mark-to-market valuation against each day's snapshot
//! - Commission tracking
//! - Equity curve and trade log

pub mod commission;
pub mod engine;
pub mod trade;

pub use commission::CommissionModel;
pub use engine::{
    evaluate_exit, run_backtest, BacktestConfig, BacktestEngine, BacktestError, BacktestResult,
    EquityPoint,
};
pub use trade::{
    to_money, ExitReason, Position, PositionError, PositionLeg, PositionStatus, Trade,
    CONTRACT_MULTIPLIER,
};
