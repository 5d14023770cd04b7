//! Options backtest CLI
//!
//! # Usage
//!
//! ```bash
//! # Generate a simulated snapshot series
//! options-backtest synth --start 2022-01-03 --days 500 --seed 7 --output data/spy.parquet
//!
//! # Run a single backtest
//! options-backtest run --job jobs/iron_condor.json --data data/spy.parquet
//!
//! # Optimize, checkpointing every 25 combinations
//! options-backtest optimize --job jobs/iron_condor.json --data data/spy.parquet \
//!     --checkpoint results/ic.ckpt.json --stop-file results/STOP
//!
//! # Resume after an interruption: rerun the same command
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use options_backtest::backtest::{run_backtest, BacktestConfig};
use options_backtest::data::{MarketSnapshot, SnapshotLoader, SyntheticSeries};
use options_backtest::metrics::RankMetric;
use options_backtest::optimizer::{
    OptimizationReport, OptimizerConfig, OptimizerError, ParameterOptimizer, ParameterSpace,
    ProgressEvent, ProgressSink, StopSignal,
};
use options_backtest::strategy::StrategyConfig;

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "options-backtest")]
#[command(about = "Multi-leg options backtester and parameter optimizer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest
    Run {
        /// Job file (JSON)
        #[arg(short, long)]
        job: PathBuf,

        /// Snapshot file (parquet, csv or json)
        #[arg(short, long)]
        data: PathBuf,

        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Log every entry and exit
        #[arg(short, long)]
        verbose: bool,
    },

    /// Search the job's parameter space
    Optimize {
        /// Job file (JSON)
        #[arg(short, long)]
        job: PathBuf,

        /// Snapshot file (parquet, csv or json)
        #[arg(short, long)]
        data: PathBuf,

        /// Checkpoint file; an existing one is resumed
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Combinations between checkpoint flushes
        #[arg(long)]
        checkpoint_every: Option<usize>,

        /// Worker threads (default: all cores)
        #[arg(long)]
        workers: Option<usize>,

        /// Ranking metric (sharpe, sortino, calmar, pnl, return, win_rate, profit_factor, drawdown)
        #[arg(long)]
        metric: Option<RankMetric>,

        /// Rows to print
        #[arg(long)]
        top: Option<usize>,

        /// Stop cleanly once this file exists
        #[arg(long)]
        stop_file: Option<PathBuf>,

        /// Write the full report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a simulated snapshot series
    Synth {
        /// First date (YYYY-MM-DD)
        #[arg(long, default_value = "2022-01-03")]
        start: String,

        /// Trading days to generate
        #[arg(long, default_value_t = 252)]
        days: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        #[arg(long, default_value_t = 100.0)]
        initial_price: f64,

        /// Annual drift
        #[arg(long, default_value_t = 0.0)]
        drift: f64,

        /// Annual volatility of the simulated path
        #[arg(long, default_value_t = 0.20)]
        volatility: f64,

        /// Implied volatility recorded on every snapshot
        #[arg(long, default_value_t = 0.20)]
        implied_volatility: f64,

        /// Output file; format follows the extension
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Job file: backtest settings, base strategy, and optional search space.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobFile {
    #[serde(default)]
    backtest: BacktestConfig,
    strategy: StrategyConfig,
    #[serde(default)]
    space: ParameterSpace,
    #[serde(default)]
    optimizer: OptimizerConfig,
}

impl JobFile {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse job file {}", path.display()))
    }
}

/// Renders progress events on a bar and polls the stop file between combinations.
struct BarProgress {
    bar: ProgressBar,
    stop: StopSignal,
    stop_file: Option<PathBuf>,
}

impl ProgressSink for BarProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.bar.set_length(event.total as u64);
        self.bar.set_position(event.completed as u64);
        if let (Some(key), Some(score)) = (&event.best_key, event.best_metric) {
            self.bar.set_message(format!("best {:.4} {}", score, key));
        }

        if let Some(path) = &self.stop_file {
            if !self.stop.is_stopped() && path.exists() {
                warn!("Stop file {} found, finishing current batch", path.display());
                self.stop.stop();
            }
        }
    }
}

fn load_snapshots(path: &Path) -> Result<Vec<MarketSnapshot>> {
    let snapshots = SnapshotLoader::load(path)
        .with_context(|| format!("Failed to load snapshots from {}", path.display()))?;
    info!("Loaded {} snapshots from {}", snapshots.len(), path.display());
    Ok(snapshots)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn cmd_run(job: PathBuf, data: PathBuf, output: Option<PathBuf>, verbose: bool) -> Result<()> {
    let mut job = JobFile::load(&job)?;
    job.backtest.verbose |= verbose;
    let snapshots = load_snapshots(&data)?;

    let result = run_backtest(&job.backtest, &job.strategy, &snapshots)
        .with_context(|| format!("Backtest of {} failed", job.strategy.name))?;

    println!("{}", SEPARATOR);
    println!(
        "{}: {} to {}",
        result.strategy, result.start_date, result.end_date
    );
    println!("{}", SEPARATOR);
    println!("{}", result.metrics.summary());
    println!("  Final equity: {}", result.final_equity);
    println!("  Skipped entries: {}", result.skipped_entries);

    if let Some(path) = output {
        write_json(&path, &result)?;
        println!("\nResult written to {}", path.display());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_optimize(
    job: PathBuf,
    data: PathBuf,
    checkpoint: Option<PathBuf>,
    checkpoint_every: Option<usize>,
    workers: Option<usize>,
    metric: Option<RankMetric>,
    top: Option<usize>,
    stop_file: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let job = JobFile::load(&job)?;
    let snapshots = load_snapshots(&data)?;

    let mut config = job.optimizer;
    if checkpoint.is_some() {
        config.checkpoint_path = checkpoint;
    }
    if let Some(every) = checkpoint_every {
        config.checkpoint_every = every;
    }
    if workers.is_some() {
        config.workers = workers;
    }
    if let Some(metric) = metric {
        config.metric = metric;
    }
    if let Some(top) = top {
        config.top_n = top;
    }

    if let Some(path) = &stop_file {
        if path.exists() {
            warn!("Removing stale stop file {}", path.display());
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }

    let stop = StopSignal::new();
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    let sink = BarProgress {
        bar,
        stop: stop.clone(),
        stop_file,
    };

    let optimizer = ParameterOptimizer::new(job.backtest, job.strategy, job.space, config);
    let outcome = optimizer.optimize(&snapshots, &stop, &sink);
    sink.bar.finish_and_clear();

    let report = match outcome {
        Ok(report) => report,
        Err(OptimizerError::Interrupted { completed, total }) => {
            println!(
                "Interrupted after {}/{} combinations. Rerun the same command to resume.",
                completed, total
            );
            return Ok(());
        }
        Err(e) => return Err(e).context("Optimization failed"),
    };

    print_report(&report);

    if let Some(path) = output {
        write_json(&path, &report)?;
        println!("\nReport written to {}", path.display());
    }
    Ok(())
}

fn print_report(report: &OptimizationReport) {
    println!("{}", SEPARATOR);
    println!(
        "Ranked by {}: {} evaluated, {} skipped, {} total",
        report.metric,
        report.evaluated,
        report.skipped.len(),
        report.total
    );
    println!("{}", SEPARATOR);
    for row in report.top() {
        let score = row
            .score
            .map(|s| format!("{:>10.4}", s))
            .unwrap_or_else(|| format!("{:>10}", "n/a"));
        println!(
            "{:>3}. {}  trades={:<4} pnl={:<12} {}",
            row.rank, score, row.summary.total_trades, row.summary.total_pnl, row.key
        );
    }
    for (key, reason) in &report.skipped {
        println!("  skipped {}: {}", key, reason);
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_synth(
    start: String,
    days: usize,
    seed: u64,
    initial_price: f64,
    drift: f64,
    volatility: f64,
    implied_volatility: f64,
    output: PathBuf,
) -> Result<()> {
    let start = NaiveDate::parse_from_str(&start, "%Y-%m-%d").context("Invalid start date format")?;

    let series = SyntheticSeries {
        initial_price,
        drift,
        realized_volatility: volatility,
        implied_volatility,
        ..SyntheticSeries::new(start, days, seed)
    };
    let snapshots = series.generate().context("Failed to generate series")?;
    SnapshotLoader::save(&output, &snapshots)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Wrote {} snapshots ({} to {}) to {}",
        snapshots.len(),
        snapshots.first().map(|s| s.date.to_string()).unwrap_or_default(),
        snapshots.last().map(|s| s.date.to_string()).unwrap_or_default(),
        output.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("options_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            job,
            data,
            output,
            verbose,
        } => cmd_run(job, data, output, verbose),
        Commands::Optimize {
            job,
            data,
            checkpoint,
            checkpoint_every,
            workers,
            metric,
            top,
            stop_file,
            output,
        } => cmd_optimize(
            job,
            data,
            checkpoint,
            checkpoint_every,
            workers,
            metric,
            top,
            stop_file,
            output,
        ),
        Commands::Synth {
            start,
            days,
            seed,
            initial_price,
            drift,
            volatility,
            implied_volatility,
            output,
        } => cmd_synth(
            start,
            days,
            seed,
            initial_price,
            drift,
            volatility,
            implied_volatility,
            output,
        ),
    }
}
