//! Parameter space and search modes.
//!
//! A [`ParameterSpace`] maps dot-path parameter names onto the base
//! [`StrategyConfig`]. Combinations are addressed by mixed-radix index, so
//! random search can sample from very large grids without materializing them.

use std::collections::BTreeMap;
use std::fmt;

use rand::seq::index;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::strategy::{ConfigError, EntryCadence, StrategyConfig};

const FLOAT_STEP_EPSILON: f64 = 1e-9;
const FLOAT_ROUNDING: f64 = 1e10;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Integer value. Floats are accepted only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{:?}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Values a parameter ranges over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterDomain {
    Values { values: Vec<ParamValue> },
    IntRange { min: i64, max: i64, step: i64 },
    FloatRange { min: f64, max: f64, step: f64 },
}

impl ParameterDomain {
    pub fn values(values: Vec<ParamValue>) -> Self {
        Self::Values { values }
    }

    pub fn floats(values: &[f64]) -> Self {
        Self::values(values.iter().map(|v| ParamValue::Float(*v)).collect())
    }

    pub fn ints(values: &[i64]) -> Self {
        Self::values(values.iter().map(|v| ParamValue::Int(*v)).collect())
    }

    /// Expand the domain into its ordered values.
    pub fn expand(&self) -> Result<Vec<ParamValue>, String> {
        match self {
            Self::Values { values } => {
                if values.is_empty() {
                    return Err("value list is empty".to_string());
                }
                Ok(values.clone())
            }
            Self::IntRange { min, max, step } => {
                if *step <= 0 || min > max {
                    return Err(format!(
                        "int range needs step > 0 and min <= max, got [{}, {}] step {}",
                        min, max, step
                    ));
                }
                let mut out = Vec::new();
                let mut v = *min;
                while v <= *max {
                    out.push(ParamValue::Int(v));
                    v = match v.checked_add(*step) {
                        Some(next) => next,
                        None => break,
                    };
                }
                Ok(out)
            }
            Self::FloatRange { min, max, step } => {
                if !(min.is_finite() && max.is_finite() && step.is_finite())
                    || *step <= 0.0
                    || min > max
                {
                    return Err(format!(
                        "float range needs finite bounds, step > 0 and min <= max, got [{}, {}] step {}",
                        min, max, step
                    ));
                }
                let count = ((max - min) / step + FLOAT_STEP_EPSILON).floor() as usize + 1;
                Ok((0..count)
                    .map(|i| {
                        let raw = min + i as f64 * step;
                        ParamValue::Float((raw * FLOAT_ROUNDING).round() / FLOAT_ROUNDING)
                    })
                    .collect())
            }
        }
    }
}

/// How combinations are drawn from the space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchMode {
    /// Every combination, in grid order.
    #[default]
    Grid,
    /// `samples` distinct combinations drawn with a seeded PCG64.
    Random { samples: usize, seed: u64 },
}

impl SearchMode {
    pub fn seed(&self) -> Option<u64> {
        match self {
            Self::Grid => None,
            Self::Random { seed, .. } => Some(*seed),
        }
    }
}

/// One parameter combination, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterTuple(BTreeMap<String, ParamValue>);

impl ParameterTuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical key, stable across runs and grid reorderings.
    pub fn key(&self) -> String {
        if self.0.is_empty() {
            return "base".to_string();
        }
        self.0
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Apply every parameter to a copy of `base` and validate the result.
    pub fn apply_to(&self, base: &StrategyConfig) -> Result<StrategyConfig, ConfigError> {
        let mut config = base.clone();
        for (name, value) in &self.0 {
            ParamPath::parse(name, base)?.apply(&mut config, name, value)?;
        }
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Display for ParameterTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegField {
    TargetAbsDelta,
    DteMin,
    DteMax,
    Quantity,
    RelativeOffset,
}

/// A resolved parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamPath {
    ProfitTarget,
    StopLoss,
    MaxHoldDays,
    ExitDte,
    EntryIntervalDays,
    EntryMaxOpen,
    Leg { index: usize, field: LegField },
}

impl ParamPath {
    fn parse(name: &str, base: &StrategyConfig) -> Result<Self, ConfigError> {
        let unknown = || ConfigError::UnknownParameter(name.to_string());
        let parts: Vec<&str> = name.split('.').collect();

        let path = match parts.as_slice() {
            ["profit_target_pct"] => Self::ProfitTarget,
            ["stop_loss_pct"] => Self::StopLoss,
            ["max_hold_days"] => Self::MaxHoldDays,
            ["exit_dte"] => Self::ExitDte,
            ["entry", "interval_days"] => Self::EntryIntervalDays,
            ["entry", "max_open_positions"] => Self::EntryMaxOpen,
            ["legs", index, field] => {
                let index: usize = index.parse().map_err(|_| unknown())?;
                let leg = base.legs.get(index).ok_or_else(unknown)?;
                let field = match *field {
                    "target_abs_delta" => LegField::TargetAbsDelta,
                    "dte_min" => LegField::DteMin,
                    "dte_max" => LegField::DteMax,
                    "quantity" => LegField::Quantity,
                    "relative_offset" if leg.relative_offset.is_some() => LegField::RelativeOffset,
                    _ => return Err(unknown()),
                };
                Self::Leg { index, field }
            }
            _ => return Err(unknown()),
        };
        Ok(path)
    }

    fn apply(
        &self,
        config: &mut StrategyConfig,
        name: &str,
        value: &ParamValue,
    ) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidParameterValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let float = || value.as_f64().ok_or_else(|| invalid("expected a number"));
        let int = || value.as_i64().ok_or_else(|| invalid("expected an integer"));
        let unsigned = || {
            int().and_then(|v| u32::try_from(v).map_err(|_| invalid("expected a non-negative integer")))
        };

        match *self {
            Self::ProfitTarget => config.profit_target_pct = float()?,
            Self::StopLoss => config.stop_loss_pct = float()?,
            Self::MaxHoldDays => {
                config.max_hold_days = match value {
                    ParamValue::Text(t) if t.eq_ignore_ascii_case("none") => None,
                    _ => Some(unsigned()?),
                };
            }
            Self::ExitDte => {
                config.exit_dte = match value {
                    ParamValue::Text(t) if t.eq_ignore_ascii_case("none") => None,
                    _ => Some(unsigned()?),
                };
            }
            Self::EntryIntervalDays => {
                config.entry.cadence = EntryCadence::Interval { days: unsigned()? };
            }
            Self::EntryMaxOpen => {
                let n = unsigned()?;
                if n == 0 {
                    return Err(invalid("at least one open position is required"));
                }
                config.entry.max_open_positions = n as usize;
                config.entry.allow_layering = n > 1;
            }
            Self::Leg { index, field } => {
                let leg = config
                    .legs
                    .get_mut(index)
                    .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;
                match field {
                    LegField::TargetAbsDelta => leg.target_abs_delta = float()?,
                    LegField::DteMin => {
                        leg.dte_min = i32::try_from(int()?).map_err(|_| invalid("out of range"))?
                    }
                    LegField::DteMax => {
                        leg.dte_max = i32::try_from(int()?).map_err(|_| invalid("out of range"))?
                    }
                    LegField::Quantity => leg.quantity = unsigned()?,
                    LegField::RelativeOffset => {
                        let offset = Decimal::from_f64_retain(float()?)
                            .ok_or_else(|| invalid("not representable"))?
                            .round_dp(6);
                        match leg.relative_offset.as_mut() {
                            Some(rel) => rel.strike_offset = offset,
                            None => return Err(ConfigError::UnknownParameter(name.to_string())),
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Named parameter domains, in name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpace(BTreeMap<String, ParameterDomain>);

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, domain: ParameterDomain) -> Self {
        self.0.insert(name.into(), domain);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Check every name resolves against `base` and every domain is non-empty.
    pub fn validate(&self, base: &StrategyConfig) -> Result<(), ConfigError> {
        for (name, domain) in &self.0 {
            ParamPath::parse(name, base)?;
            domain
                .expand()
                .map_err(|reason| ConfigError::InvalidSpace(format!("{}: {}", name, reason)))?;
        }
        Ok(())
    }

    fn expanded(&self) -> Result<Vec<(&String, Vec<ParamValue>)>, ConfigError> {
        self.0
            .iter()
            .map(|(name, domain)| {
                domain
                    .expand()
                    .map(|values| (name, values))
                    .map_err(|reason| ConfigError::InvalidSpace(format!("{}: {}", name, reason)))
            })
            .collect()
    }

    /// Number of grid points. An empty space has one: the base config.
    pub fn total_combinations(&self) -> Result<usize, ConfigError> {
        self.expanded()?
            .iter()
            .try_fold(1usize, |acc, (_, values)| acc.checked_mul(values.len()))
            .ok_or_else(|| ConfigError::InvalidSpace("grid size overflows".to_string()))
    }

    /// Combinations for `mode`. Grid order is lexicographic with the last
    /// name varying fastest; random samples come back in grid order too.
    pub fn combinations(&self, mode: &SearchMode) -> Result<Vec<ParameterTuple>, ConfigError> {
        let expanded = self.expanded()?;
        let total = self.total_combinations()?;

        let indices: Vec<usize> = match mode {
            SearchMode::Grid => (0..total).collect(),
            SearchMode::Random { samples, seed } => {
                if *samples == 0 {
                    return Err(ConfigError::InvalidSpace(
                        "random search needs at least one sample".to_string(),
                    ));
                }
                let mut rng = Pcg64::seed_from_u64(*seed);
                let mut picked = index::sample(&mut rng, total, (*samples).min(total)).into_vec();
                picked.sort_unstable();
                picked
            }
        };

        Ok(indices
            .into_iter()
            .map(|i| tuple_at(&expanded, i))
            .collect())
    }
}

/// Decode a grid index as a mixed-radix number over the expanded domains.
fn tuple_at(expanded: &[(&String, Vec<ParamValue>)], mut index: usize) -> ParameterTuple {
    let mut tuple = ParameterTuple::new();
    for (name, values) in expanded.iter().rev() {
        let radix = values.len();
        tuple.0.insert((*name).clone(), values[index % radix].clone());
        index /= radix;
    }
    tuple
}
