//! Snapshot loader.
//!
//! Reads one market snapshot per row from Parquet, CSV or JSON files.
//! Tabular files carry the columns:
//! - date (`%Y-%m-%d` string or a date column)
//! - underlying_price, risk_free_rate, volatility
//! - dividend_yield (optional, defaults to 0)

use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::*;
use thiserror::Error;

use super::types::MarketSnapshot;

/// Columns every tabular snapshot file must contain.
pub const REQUIRED_COLUMNS: &[&str] = &["date", "underlying_price", "risk_free_rate", "volatility"];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file extension: {0}")]
    UnsupportedFormat(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File formats the loader understands, picked from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Parquet,
    Csv,
    Json,
}

impl SnapshotFormat {
    pub fn from_path(path: &Path) -> Result<Self, LoaderError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "parquet" | "pq" => Ok(Self::Parquet),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(LoaderError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Loads and writes ordered snapshot series.
pub struct SnapshotLoader;

impl SnapshotLoader {
    /// Load snapshots and check they are well formed and strictly ascending.
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<MarketSnapshot>, LoaderError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoaderError::FileNotFound(path.display().to_string()));
        }

        let snapshots = match SnapshotFormat::from_path(path)? {
            SnapshotFormat::Parquet => {
                let df = LazyFrame::scan_parquet(path, ScanArgsParquet::default())?.collect()?;
                dataframe_to_snapshots(&df)?
            }
            SnapshotFormat::Csv => {
                let df = LazyCsvReader::new(path)
                    .with_has_header(true)
                    .finish()?
                    .collect()?;
                dataframe_to_snapshots(&df)?
            }
            SnapshotFormat::Json => {
                let file = File::open(path)?;
                serde_json::from_reader(std::io::BufReader::new(file))?
            }
        };

        validate_series(&snapshots)?;
        Ok(snapshots)
    }

    /// Write snapshots in the format implied by the extension.
    pub fn save(path: impl AsRef<Path>, snapshots: &[MarketSnapshot]) -> Result<(), LoaderError> {
        let path = path.as_ref();
        match SnapshotFormat::from_path(path)? {
            SnapshotFormat::Json => {
                let file = File::create(path)?;
                serde_json::to_writer_pretty(std::io::BufWriter::new(file), snapshots)?;
            }
            SnapshotFormat::Csv => {
                let mut df = snapshots_to_dataframe(snapshots)?;
                let mut file = File::create(path)?;
                CsvWriter::new(&mut file).finish(&mut df)?;
            }
            SnapshotFormat::Parquet => {
                let mut df = snapshots_to_dataframe(snapshots)?;
                let file = File::create(path)?;
                ParquetWriter::new(file).finish(&mut df)?;
            }
        }
        Ok(())
    }
}

/// Reject series with malformed rows or dates that are not strictly ascending.
pub fn validate_series(snapshots: &[MarketSnapshot]) -> Result<(), LoaderError> {
    if let Some(bad) = snapshots.iter().find(|s| !s.is_well_formed()) {
        return Err(LoaderError::InvalidData(format!(
            "Malformed snapshot on {}",
            bad.date
        )));
    }

    if let Some(pair) = snapshots.windows(2).find(|w| w[1].date <= w[0].date) {
        return Err(LoaderError::InvalidData(format!(
            "Snapshot dates not strictly ascending: {} then {}",
            pair[0].date, pair[1].date
        )));
    }

    Ok(())
}

/// Convert days since Unix epoch to NaiveDate.
fn date_from_days(days: i32) -> NaiveDate {
    NaiveDate::from_num_days_from_ce_opt(days + 719163).unwrap_or_default()
}

fn date_column(df: &DataFrame) -> Result<Vec<Option<NaiveDate>>, LoaderError> {
    let dates_col = df.column("date")?;

    // Handle both string and date column types
    if let Ok(str_col) = dates_col.str() {
        Ok(str_col
            .into_iter()
            .map(|s| s.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()))
            .collect())
    } else if let Ok(date_col) = dates_col.date() {
        Ok(date_col
            .into_iter()
            .map(|d| d.map(date_from_days))
            .collect())
    } else {
        Err(LoaderError::InvalidData(
            "date column has unexpected type".to_string(),
        ))
    }
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, LoaderError> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

fn dataframe_to_snapshots(df: &DataFrame) -> Result<Vec<MarketSnapshot>, LoaderError> {
    let names = df.get_column_names();
    for required in REQUIRED_COLUMNS {
        if !names.iter().any(|n| n.as_str() == *required) {
            return Err(LoaderError::InvalidData(format!(
                "Missing column: {}",
                required
            )));
        }
    }

    let dates = date_column(df)?;
    let prices = float_column(df, "underlying_price")?;
    let rates = float_column(df, "risk_free_rate")?;
    let vols = float_column(df, "volatility")?;
    let dividends = if names.iter().any(|n| n.as_str() == "dividend_yield") {
        float_column(df, "dividend_yield")?
    } else {
        vec![Some(0.0); df.height()]
    };

    let mut snapshots = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let row_err = |field: &str| {
            LoaderError::InvalidData(format!("Row {}: missing or invalid {}", idx, field))
        };

        snapshots.push(MarketSnapshot {
            date: dates[idx].ok_or_else(|| row_err("date"))?,
            underlying_price: prices[idx].ok_or_else(|| row_err("underlying_price"))?,
            risk_free_rate: rates[idx].ok_or_else(|| row_err("risk_free_rate"))?,
            dividend_yield: dividends[idx].unwrap_or(0.0),
            volatility: vols[idx].ok_or_else(|| row_err("volatility"))?,
        });
    }

    Ok(snapshots)
}

fn snapshots_to_dataframe(snapshots: &[MarketSnapshot]) -> Result<DataFrame, LoaderError> {
    let dates: Vec<String> = snapshots.iter().map(|s| s.date.to_string()).collect();
    let prices: Vec<f64> = snapshots.iter().map(|s| s.underlying_price).collect();
    let rates: Vec<f64> = snapshots.iter().map(|s| s.risk_free_rate).collect();
    let dividends: Vec<f64> = snapshots.iter().map(|s| s.dividend_yield).collect();
    let vols: Vec<f64> = snapshots.iter().map(|s| s.volatility).collect();

    let df = DataFrame::new(vec![
        Series::new("date".into(), dates).into(),
        Series::new("underlying_price".into(), prices).into(),
        Series::new("risk_free_rate".into(), rates).into(),
        Series::new("dividend_yield".into(), dividends).into(),
        Series::new("volatility".into(), vols).into(),
    ])?;
    Ok(df)
}
