//! End-to-end: generate a series, persist it, backtest it, and optimize
//! over it with an interruption in the middle.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::tempdir;

use options_backtest::backtest::{run_backtest, BacktestConfig, CommissionModel, ExitReason};
use options_backtest::data::{MarketSnapshot, SnapshotLoader, SyntheticSeries};
use options_backtest::metrics::RankMetric;
use options_backtest::optimizer::{
    NoProgress, OptimizationCheckpoint, OptimizerConfig, OptimizerError, ParameterDomain,
    ParameterOptimizer, ParameterSpace, ProgressEvent, StopSignal,
};
use options_backtest::strategy::StrategyConfig;

fn series() -> Vec<MarketSnapshot> {
    let start = NaiveDate::from_ymd_opt(2023, 3, 1).unwrap();
    SyntheticSeries::new(start, 160, 11).generate().unwrap()
}

#[test]
fn backtest_from_persisted_series() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("series.csv");
    let generated = series();
    SnapshotLoader::save(&path, &generated).unwrap();
    let loaded = SnapshotLoader::load(&path).unwrap();
    assert_eq!(loaded.len(), generated.len());

    let config = BacktestConfig::default();
    let strategy = StrategyConfig::iron_condor(0.20, dec!(5), 25, 45).with_exits(0.5, 2.0, Some(21));
    let result = run_backtest(&config, &strategy, &loaded).unwrap();

    assert_eq!(result.equity_curve.len(), loaded.len());
    assert!(!result.trade_log.is_empty());

    let realized: Decimal = result.trade_log.iter().map(|t| t.realized_pnl).sum();
    assert_eq!(result.final_equity, config.initial_equity + realized);
    assert_eq!(result.metrics.total_trades, result.trade_log.len());

    for trade in &result.trade_log {
        assert!(trade.exit_date >= trade.entry_date);
        assert_eq!(trade.legs.len(), 4);
        assert!(trade.days_held <= 21 || trade.exit_reason == ExitReason::EndOfPeriod);
        assert!(trade.commissions > Decimal::ZERO);
    }

    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("\"trade_log\""));
    assert!(json.contains("\"equity_curve\""));
}

#[test]
fn optimization_resumes_to_same_ranking() {
    let data = series();
    let dir = tempdir().unwrap();
    let checkpoint = dir.path().join("run").join("checkpoint.json");

    let backtest = BacktestConfig {
        commission: CommissionModel::zero(),
        ..Default::default()
    };
    let strategy = StrategyConfig::bull_put_spread(0.30, dec!(5), 20, 40);
    let space: ParameterSpace = serde_json::from_str(
        r#"{
            "profit_target_pct": {"kind": "values", "values": [0.3, 0.6]},
            "legs.0.target_abs_delta": {"kind": "float_range", "min": 0.2, "max": 0.3, "step": 0.05}
        }"#,
    )
    .unwrap();
    assert_eq!(space.total_combinations().unwrap(), 6);

    let run = |config: OptimizerConfig| {
        ParameterOptimizer::new(backtest.clone(), strategy.clone(), space.clone(), config)
    };

    let reference = run(OptimizerConfig {
        metric: RankMetric::TotalPnl,
        ..Default::default()
    })
    .optimize(&data, &StopSignal::new(), &NoProgress)
    .unwrap();
    assert_eq!(reference.evaluated, 6);

    let resumable = OptimizerConfig {
        metric: RankMetric::TotalPnl,
        checkpoint_path: Some(checkpoint.clone()),
        checkpoint_every: 2,
        workers: Some(3),
        ..Default::default()
    };

    let stop = StopSignal::new();
    let trip = stop.clone();
    let halfway = move |event: &ProgressEvent| {
        if event.completed >= 3 {
            trip.stop();
        }
    };
    let interrupted = run(resumable.clone()).optimize(&data, &stop, &halfway);
    match interrupted {
        Err(OptimizerError::Interrupted { completed, total }) => {
            assert_eq!(total, 6);
            assert!(completed >= 3 && completed < 6);
        }
        other => panic!("expected interruption, got {:?}", other.map(|r| r.evaluated)),
    }

    let partial = OptimizationCheckpoint::load(&checkpoint).unwrap().unwrap();
    assert!(partial.completed_combinations.len() < 6);

    let resumed = run(resumable)
        .optimize(&data, &StopSignal::new(), &NoProgress)
        .unwrap();
    assert_eq!(resumed.ranked, reference.ranked);

    let mut changed_metric = OptimizerConfig {
        metric: RankMetric::SharpeRatio,
        checkpoint_path: Some(checkpoint),
        ..Default::default()
    };
    changed_metric.top_n = 3;
    assert!(matches!(
        run(changed_metric).optimize(&data, &StopSignal::new(), &NoProgress),
        Err(OptimizerError::Checkpoint(_))
    ));
}
