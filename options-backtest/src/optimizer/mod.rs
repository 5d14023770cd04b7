//! Parameter optimization.
//!
//! Searches a [`ParameterSpace`] over a base strategy, ranks every
//! combination by a [`RankMetric`](crate::metrics::RankMetric), and persists
//! progress so an interrupted run can resume where it stopped.

pub mod checkpoint;
pub mod progress;
pub mod search;
pub mod space;

pub use checkpoint::{CheckpointError, OptimizationCheckpoint, ResultRow, CHECKPOINT_VERSION};
pub use progress::{LogProgress, NoProgress, ProgressEvent, ProgressSink, StopSignal};
pub use search::{
    OptimizationReport, OptimizerConfig, OptimizerError, ParameterOptimizer, RankedResult,
};
pub use space::{ParamValue, ParameterDomain, ParameterSpace, ParameterTuple, SearchMode};
