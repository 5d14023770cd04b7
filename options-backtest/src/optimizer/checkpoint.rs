//! Resumable optimization state.
//!
//! The checkpoint is a JSON file rewritten atomically: the new state goes to
//! a temp file in the same directory, is synced, then renamed over the old
//! file. A crash mid-write leaves the previous checkpoint intact.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::{BacktestSummary, RankMetric};

use super::space::{ParameterTuple, SearchMode};

/// Current checkpoint schema.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Incompatible checkpoint {path}: {reason}")]
    Incompatible { path: PathBuf, reason: String },

    #[error("Checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Metrics row for one evaluated combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub key: String,
    pub parameters: ParameterTuple,
    pub summary: BacktestSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationCheckpoint {
    pub version: u32,
    pub metric_name: String,
    pub timestamp: DateTime<Utc>,
    pub search: SearchMode,
    /// Keys of every finished combination, evaluated or skipped.
    pub completed_combinations: BTreeSet<String>,
    /// Rows in completion order.
    pub partial_results: Vec<ResultRow>,
    /// Combinations whose config was invalid, with the reason.
    #[serde(default)]
    pub skipped_combinations: BTreeMap<String, String>,
    /// Seed the random sampler was built from; `None` for grid search.
    #[serde(default)]
    pub rng_state: Option<u64>,
}

impl OptimizationCheckpoint {
    pub fn new(metric: RankMetric, search: SearchMode) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            metric_name: metric.name().to_string(),
            timestamp: Utc::now(),
            search,
            completed_combinations: BTreeSet::new(),
            partial_results: Vec::new(),
            skipped_combinations: BTreeMap::new(),
            rng_state: search.seed(),
        }
    }

    pub fn is_completed(&self, key: &str) -> bool {
        self.completed_combinations.contains(key)
    }

    pub fn record(&mut self, row: ResultRow) {
        if self.completed_combinations.insert(row.key.clone()) {
            self.partial_results.push(row);
        }
    }

    pub fn record_skipped(&mut self, key: String, reason: String) {
        if self.completed_combinations.insert(key.clone()) {
            self.skipped_combinations.insert(key, reason);
        }
    }

    /// Load a checkpoint. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Option<Self>, CheckpointError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let incompatible = |reason: String| CheckpointError::Incompatible {
            path: path.to_path_buf(),
            reason,
        };

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| incompatible(format!("unreadable JSON: {}", e)))?;

        match value.get("version").and_then(serde_json::Value::as_u64) {
            Some(v) if v == u64::from(CHECKPOINT_VERSION) => {}
            Some(v) => {
                return Err(incompatible(format!(
                    "schema version {} (expected {})",
                    v, CHECKPOINT_VERSION
                )))
            }
            None => return Err(incompatible("missing schema version".to_string())),
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| incompatible(format!("malformed checkpoint: {}", e)))
    }

    /// Reject a checkpoint written by a run with a different metric or search.
    pub fn ensure_compatible(
        &self,
        path: &Path,
        metric: RankMetric,
        search: &SearchMode,
    ) -> Result<(), CheckpointError> {
        let incompatible = |reason: String| CheckpointError::Incompatible {
            path: path.to_path_buf(),
            reason,
        };

        if self.metric_name != metric.name() {
            return Err(incompatible(format!(
                "ranked by {}, this run ranks by {}",
                self.metric_name,
                metric.name()
            )));
        }
        if &self.search != search {
            return Err(incompatible(format!(
                "search mode {:?} differs from {:?}",
                self.search, search
            )));
        }
        if self.rng_state != search.seed() {
            return Err(incompatible("random sampler state differs".to_string()));
        }
        Ok(())
    }

    /// Stamp and persist atomically.
    pub fn save(&mut self, path: &Path) -> Result<(), CheckpointError> {
        self.timestamp = Utc::now();
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Sibling of `path` with `.tmp` appended to the full file name.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write to `<path>.tmp`, fsync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let temp_path = temp_path(path);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path)
}
