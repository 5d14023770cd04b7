//! Parallel parameter search with resumable checkpoints.
//!
//! Combinations run on a bounded rayon pool in batches of
//! `checkpoint_every`. The calling thread coordinates: it records each
//! outcome in order, emits progress, and rewrites the checkpoint after every
//! batch. Workers share only the snapshots and the chain cache.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::backtest::{BacktestConfig, BacktestEngine, BacktestError};
use crate::chain::ChainCache;
use crate::data::MarketSnapshot;
use crate::metrics::{BacktestSummary, RankMetric};
use crate::strategy::{ConfigError, StrategyConfig};

use super::checkpoint::{CheckpointError, OptimizationCheckpoint, ResultRow};
use super::progress::{ProgressEvent, ProgressSink, StopSignal};
use super::space::{ParameterSpace, ParameterTuple, SearchMode};

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Backtest failed for {key}: {source}")]
    Backtest {
        key: String,
        #[source]
        source: BacktestError,
    },

    #[error("Optimization interrupted after {completed}/{total} combinations")]
    Interrupted { completed: usize, total: usize },

    #[error("Failed to start worker pool: {0}")]
    WorkerPool(String),
}

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub search: SearchMode,

    /// Metric to maximize.
    #[serde(default)]
    pub metric: RankMetric,

    /// Rows returned by [`OptimizationReport::top`].
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Checkpoint file. `None` disables checkpointing.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,

    /// Flush the checkpoint after this many combinations.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Worker threads. `None` uses every core.
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_top_n() -> usize {
    10
}

fn default_checkpoint_every() -> usize {
    25
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            search: SearchMode::Grid,
            metric: RankMetric::default(),
            top_n: default_top_n(),
            checkpoint_path: None,
            checkpoint_every: default_checkpoint_every(),
            workers: None,
        }
    }
}

/// One row of the ranked results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// 1-based.
    pub rank: usize,
    pub key: String,
    pub parameters: ParameterTuple,
    pub score: Option<f64>,
    pub summary: BacktestSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub metric: RankMetric,
    /// Combinations in the search.
    pub total: usize,
    /// Combinations that produced a backtest.
    pub evaluated: usize,
    /// Combinations with an invalid config, and why.
    pub skipped: BTreeMap<String, String>,
    /// Every evaluated combination, best first.
    pub ranked: Vec<RankedResult>,
    pub top_n: usize,
}

impl OptimizationReport {
    pub fn top(&self) -> &[RankedResult] {
        &self.ranked[..self.top_n.min(self.ranked.len())]
    }

    pub fn best(&self) -> Option<&RankedResult> {
        self.ranked.first()
    }
}

/// Higher score first, undefined scores last, then key ascending.
fn rank_order(a: (Option<f64>, &str), b: (Option<f64>, &str)) -> Ordering {
    let by_score = match (a.0, b.0) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_score.then_with(|| a.1.cmp(b.1))
}

/// Metric score for ordering. `+inf` is kept so a profit factor with no
/// losing trades ranks first; NaN is undefined.
fn ranking_score(metric: RankMetric, summary: &BacktestSummary) -> Option<f64> {
    metric.score(summary).filter(|s| !s.is_nan())
}

enum Outcome {
    Evaluated(ResultRow),
    Skipped { key: String, reason: String },
    Failed { key: String, source: BacktestError },
    Cancelled,
}

/// Best row seen so far, for progress events.
#[derive(Default)]
struct Leader {
    key: Option<String>,
    score: Option<f64>,
}

impl Leader {
    fn offer(&mut self, key: &str, score: Option<f64>) {
        let better = match &self.key {
            None => true,
            Some(best) => rank_order((score, key), (self.score, best.as_str())) == Ordering::Less,
        };
        if better {
            self.key = Some(key.to_string());
            self.score = score;
        }
    }
}

/// Drives the backtest engine across a parameter space.
pub struct ParameterOptimizer {
    backtest: BacktestConfig,
    strategy: StrategyConfig,
    space: ParameterSpace,
    config: OptimizerConfig,
}

impl ParameterOptimizer {
    pub fn new(
        backtest: BacktestConfig,
        strategy: StrategyConfig,
        space: ParameterSpace,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            backtest,
            strategy,
            space,
            config,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// Run (or resume) the search.
    ///
    /// Returns [`OptimizerError::Interrupted`] after a final checkpoint flush
    /// if `stop` is raised before every combination has finished.
    pub fn optimize(
        &self,
        snapshots: &[MarketSnapshot],
        stop: &StopSignal,
        progress: &dyn ProgressSink,
    ) -> Result<OptimizationReport, OptimizerError> {
        let metric = self.config.metric;
        let search = self.config.search;

        self.space.validate(&self.strategy)?;
        let combinations = self.space.combinations(&search)?;
        let total = combinations.len();

        let path = self.config.checkpoint_path.as_deref();
        let mut checkpoint = match path {
            Some(path) => match OptimizationCheckpoint::load(path)? {
                Some(existing) => {
                    existing.ensure_compatible(path, metric, &search)?;
                    info!(
                        "Resuming from {} ({} combinations completed)",
                        path.display(),
                        existing.completed_combinations.len()
                    );
                    existing
                }
                None => OptimizationCheckpoint::new(metric, search),
            },
            None => OptimizationCheckpoint::new(metric, search),
        };

        let pending: Vec<&ParameterTuple> = combinations
            .iter()
            .filter(|tuple| !checkpoint.is_completed(&tuple.key()))
            .collect();
        let mut completed = total - pending.len();

        let mut leader = Leader::default();
        for row in &checkpoint.partial_results {
            leader.offer(&row.key, ranking_score(metric, &row.summary));
        }

        info!(
            "Parameter combinations: {} ({} pending), ranking by {}",
            total,
            pending.len(),
            metric
        );

        let mut backtest = self.backtest.clone();
        backtest.verbose = false;
        let cache = ChainCache::new(backtest.chain.clone());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.unwrap_or(0))
            .build()
            .map_err(|e| OptimizerError::WorkerPool(e.to_string()))?;

        let flush = |checkpoint: &mut OptimizationCheckpoint| -> Result<(), OptimizerError> {
            if let Some(path) = path {
                checkpoint.save(path)?;
                debug!(
                    "Checkpoint written: {} combinations",
                    checkpoint.completed_combinations.len()
                );
            }
            Ok(())
        };

        for batch in pending.chunks(self.config.checkpoint_every.max(1)) {
            if stop.is_stopped() {
                flush(&mut checkpoint)?;
                return Err(OptimizerError::Interrupted { completed, total });
            }

            let outcomes: Vec<Outcome> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|tuple| {
                        if stop.is_stopped() {
                            Outcome::Cancelled
                        } else {
                            self.evaluate(tuple, &backtest, &cache, snapshots)
                        }
                    })
                    .collect()
            });

            for outcome in outcomes {
                let (key, score) = match outcome {
                    Outcome::Evaluated(row) => {
                        let score = ranking_score(metric, &row.summary);
                        let key = row.key.clone();
                        leader.offer(&key, score);
                        checkpoint.record(row);
                        (key, score)
                    }
                    Outcome::Skipped { key, reason } => {
                        debug!("Skipping {}: {}", key, reason);
                        checkpoint.record_skipped(key.clone(), reason);
                        (key, None)
                    }
                    Outcome::Failed { key, source } => {
                        flush(&mut checkpoint)?;
                        return Err(OptimizerError::Backtest { key, source });
                    }
                    Outcome::Cancelled => continue,
                };

                completed += 1;
                progress.on_progress(&ProgressEvent {
                    completed,
                    total,
                    key,
                    metric: score,
                    best_key: leader.key.clone(),
                    best_metric: leader.score,
                });
            }

            flush(&mut checkpoint)?;

            if stop.is_stopped() && completed < total {
                info!("Stop requested at {}/{} combinations", completed, total);
                return Err(OptimizerError::Interrupted { completed, total });
            }
        }

        flush(&mut checkpoint)?;

        let report = self.report(&combinations, &checkpoint);
        if let Some(best) = report.best() {
            info!(
                "Best of {} by {}: {} ({})",
                report.evaluated,
                metric,
                best.key,
                best.score
                    .map(|s| format!("{:.4}", s))
                    .unwrap_or_else(|| "undefined".to_string())
            );
        }
        Ok(report)
    }

    fn evaluate(
        &self,
        tuple: &ParameterTuple,
        backtest: &BacktestConfig,
        cache: &ChainCache,
        snapshots: &[MarketSnapshot],
    ) -> Outcome {
        let key = tuple.key();
        let strategy = match tuple.apply_to(&self.strategy) {
            Ok(strategy) => strategy,
            Err(e) => {
                return Outcome::Skipped {
                    key,
                    reason: e.to_string(),
                }
            }
        };

        let result = BacktestEngine::new(backtest.clone(), strategy, cache)
            .and_then(|engine| engine.run(snapshots));
        match result {
            Ok(result) => Outcome::Evaluated(ResultRow {
                key,
                parameters: tuple.clone(),
                summary: BacktestSummary::from(&result),
            }),
            Err(BacktestError::Strategy(e)) => Outcome::Skipped {
                key,
                reason: e.to_string(),
            },
            Err(source) => Outcome::Failed { key, source },
        }
    }

    /// Rank the checkpoint rows that belong to this search.
    fn report(
        &self,
        combinations: &[ParameterTuple],
        checkpoint: &OptimizationCheckpoint,
    ) -> OptimizationReport {
        let metric = self.config.metric;
        let keys: BTreeSet<String> = combinations.iter().map(ParameterTuple::key).collect();

        let mut ranked: Vec<RankedResult> = checkpoint
            .partial_results
            .iter()
            .filter(|row| keys.contains(&row.key))
            .map(|row| RankedResult {
                rank: 0,
                key: row.key.clone(),
                parameters: row.parameters.clone(),
                score: ranking_score(metric, &row.summary),
                summary: row.summary.clone(),
            })
            .collect();
        ranked.sort_by(|a, b| rank_order((a.score, a.key.as_str()), (b.score, b.key.as_str())));
        for (i, row) in ranked.iter_mut().enumerate() {
            row.rank = i + 1;
        }

        let skipped: BTreeMap<String, String> = checkpoint
            .skipped_combinations
            .iter()
            .filter(|(key, _)| keys.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        OptimizationReport {
            metric,
            total: combinations.len(),
            evaluated: ranked.len(),
            skipped,
            ranked,
            top_n: self.config.top_n,
        }
    }
}
