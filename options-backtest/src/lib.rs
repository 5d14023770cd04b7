pub mod backtest;
pub mod chain;
pub mod data;
pub mod metrics;
pub mod optimizer;
pub mod pricing;
pub mod strategy;

// Re-export commonly used types
pub use data::{MarketSnapshot, OptionType, SnapshotLoader, SyntheticSeries};
pub use pricing::{BlackScholes, PricingError, PricingInputs};
pub use chain::{ChainCache, ChainConfig, OptionContract, OptionsChain};
pub use strategy::{StrategyConfig, StrategyLegSpec};
pub use backtest::{BacktestConfig, BacktestEngine, BacktestResult, Position, Trade};
pub use metrics::{MetricsCalculator, PerformanceMetrics, RankMetric};
pub use optimizer::{OptimizationReport, ParameterOptimizer, ParameterSpace, StopSignal};
