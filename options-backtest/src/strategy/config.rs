//! Strategy configuration.
//!
//! A [`StrategyConfig`] is the unit the optimizer varies: an ordered list of
//! leg specs plus the exit and entry rules the simulator applies. Every
//! supported shape is just a different leg list, so one engine runs them all.

use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::OptionType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid strategy '{name}': {reason}")]
    InvalidStrategy { name: String, reason: String },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value {value} for parameter {name}: {reason}")]
    InvalidParameterValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid parameter space: {0}")]
    InvalidSpace(String),
}

/// Whether a leg is sold or bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegSide {
    Short,
    Long,
}

impl LegSide {
    /// +1 for premium received, -1 for premium paid.
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Short => Decimal::ONE,
            Self::Long => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Strike offset from an earlier leg, resolved on that leg's expiration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeOffset {
    /// Index of the earlier leg this one is placed against.
    pub leg: usize,

    /// Signed strike distance (e.g. -5 for a put wing 5 points lower).
    pub strike_offset: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyLegSpec {
    pub option_type: OptionType,
    pub side: LegSide,

    #[serde(default = "default_quantity")]
    pub quantity: u32,

    /// Target |delta| in [0, 1]; ignored for offset legs.
    #[serde(default)]
    pub target_abs_delta: f64,

    pub dte_min: i32,
    pub dte_max: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_offset: Option<RelativeOffset>,
}

fn default_quantity() -> u32 {
    1
}

impl StrategyLegSpec {
    pub fn delta(
        option_type: OptionType,
        side: LegSide,
        target_abs_delta: f64,
        dte_min: i32,
        dte_max: i32,
    ) -> Self {
        Self {
            option_type,
            side,
            quantity: 1,
            target_abs_delta,
            dte_min,
            dte_max,
            relative_offset: None,
        }
    }

    pub fn offset(
        option_type: OptionType,
        side: LegSide,
        leg: usize,
        strike_offset: Decimal,
        dte_min: i32,
        dte_max: i32,
    ) -> Self {
        Self {
            option_type,
            side,
            quantity: 1,
            target_abs_delta: 0.0,
            dte_min,
            dte_max,
            relative_offset: Some(RelativeOffset { leg, strike_offset }),
        }
    }
}

/// Named spread shapes. `Custom` covers any other leg list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    BullPutSpread,
    BearCallSpread,
    IronCondor,
    ShortStrangle,
    Single,
    Custom,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BullPutSpread => "bull_put_spread",
            Self::BearCallSpread => "bear_call_spread",
            Self::IronCondor => "iron_condor",
            Self::ShortStrangle => "short_strangle",
            Self::Single => "single",
            Self::Custom => "custom",
        }
    }

    /// Number of legs the shape requires, if fixed.
    pub fn leg_count(&self) -> Option<usize> {
        match self {
            Self::BullPutSpread | Self::BearCallSpread | Self::ShortStrangle => Some(2),
            Self::IronCondor => Some(4),
            Self::Single => Some(1),
            Self::Custom => None,
        }
    }
}

/// How often a new position may be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryCadence {
    /// Every trading day.
    #[default]
    Daily,
    /// At least `days` calendar days after the previous entry.
    Interval { days: u32 },
    /// Only on the given weekday.
    Weekly { weekday: Weekday },
}

impl EntryCadence {
    pub fn allows(&self, date: NaiveDate, last_entry: Option<NaiveDate>) -> bool {
        match self {
            Self::Daily => true,
            Self::Interval { days } => match last_entry {
                Some(last) => (date - last).num_days() >= i64::from(*days),
                None => true,
            },
            Self::Weekly { weekday } => date.weekday() == *weekday,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRules {
    #[serde(default)]
    pub cadence: EntryCadence,

    /// Allow a new position while others are still open.
    #[serde(default)]
    pub allow_layering: bool,

    /// Cap on concurrent positions when layering.
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
}

fn default_max_open_positions() -> usize {
    1
}

impl Default for EntryRules {
    fn default() -> Self {
        Self {
            cadence: EntryCadence::Daily,
            allow_layering: false,
            max_open_positions: default_max_open_positions(),
        }
    }
}

impl EntryRules {
    /// Concurrent positions the rules allow.
    pub fn capacity(&self) -> usize {
        if self.allow_layering {
            self.max_open_positions
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,

    #[serde(default = "default_kind")]
    pub kind: StrategyKind,

    pub legs: Vec<StrategyLegSpec>,

    /// Profit target as a fraction of |entry premium| (0.5 = 50%).
    #[serde(default = "default_profit_target")]
    pub profit_target_pct: f64,

    /// Stop loss as a fraction of |entry premium| (1.25 = 125%).
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: f64,

    /// Close after this many calendar days held.
    #[serde(default)]
    pub max_hold_days: Option<u32>,

    /// Close once the nearest leg expiration is this many calendar days
    /// away or closer.
    #[serde(default)]
    pub exit_dte: Option<u32>,

    #[serde(default)]
    pub entry: EntryRules,
}

fn default_kind() -> StrategyKind {
    StrategyKind::Custom
}

fn default_profit_target() -> f64 {
    0.5
}

fn default_stop_loss() -> f64 {
    1.25
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>, kind: StrategyKind, legs: Vec<StrategyLegSpec>) -> Self {
        Self {
            name: name.into(),
            kind,
            legs,
            profit_target_pct: default_profit_target(),
            stop_loss_pct: default_stop_loss(),
            max_hold_days: None,
            exit_dte: None,
            entry: EntryRules::default(),
        }
    }

    /// Short put at the target delta, long put `width` points lower.
    pub fn bull_put_spread(short_delta: f64, width: Decimal, dte_min: i32, dte_max: i32) -> Self {
        Self::new(
            "bull_put_spread",
            StrategyKind::BullPutSpread,
            vec![
                StrategyLegSpec::delta(OptionType::Put, LegSide::Short, short_delta, dte_min, dte_max),
                StrategyLegSpec::offset(OptionType::Put, LegSide::Long, 0, -width, dte_min, dte_max),
            ],
        )
    }

    /// Short call at the target delta, long call `width` points higher.
    pub fn bear_call_spread(short_delta: f64, width: Decimal, dte_min: i32, dte_max: i32) -> Self {
        Self::new(
            "bear_call_spread",
            StrategyKind::BearCallSpread,
            vec![
                StrategyLegSpec::delta(OptionType::Call, LegSide::Short, short_delta, dte_min, dte_max),
                StrategyLegSpec::offset(OptionType::Call, LegSide::Long, 0, width, dte_min, dte_max),
            ],
        )
    }

    /// Bull put spread plus bear call spread on the same window.
    pub fn iron_condor(short_delta: f64, width: Decimal, dte_min: i32, dte_max: i32) -> Self {
        Self::new(
            "iron_condor",
            StrategyKind::IronCondor,
            vec![
                StrategyLegSpec::delta(OptionType::Put, LegSide::Short, short_delta, dte_min, dte_max),
                StrategyLegSpec::offset(OptionType::Put, LegSide::Long, 0, -width, dte_min, dte_max),
                StrategyLegSpec::delta(OptionType::Call, LegSide::Short, short_delta, dte_min, dte_max),
                StrategyLegSpec::offset(OptionType::Call, LegSide::Long, 2, width, dte_min, dte_max),
            ],
        )
    }

    pub fn short_strangle(short_delta: f64, dte_min: i32, dte_max: i32) -> Self {
        Self::new(
            "short_strangle",
            StrategyKind::ShortStrangle,
            vec![
                StrategyLegSpec::delta(OptionType::Put, LegSide::Short, short_delta, dte_min, dte_max),
                StrategyLegSpec::delta(OptionType::Call, LegSide::Short, short_delta, dte_min, dte_max),
            ],
        )
    }

    pub fn single(
        option_type: OptionType,
        side: LegSide,
        target_abs_delta: f64,
        dte_min: i32,
        dte_max: i32,
    ) -> Self {
        Self::new(
            "single",
            StrategyKind::Single,
            vec![StrategyLegSpec::delta(option_type, side, target_abs_delta, dte_min, dte_max)],
        )
    }

    pub fn with_exits(
        mut self,
        profit_target_pct: f64,
        stop_loss_pct: f64,
        max_hold_days: Option<u32>,
    ) -> Self {
        self.profit_target_pct = profit_target_pct;
        self.stop_loss_pct = stop_loss_pct;
        self.max_hold_days = max_hold_days;
        self
    }

    pub fn with_exit_dte(mut self, exit_dte: Option<u32>) -> Self {
        self.exit_dte = exit_dte;
        self
    }

    pub fn with_entry(mut self, entry: EntryRules) -> Self {
        self.entry = entry;
        self
    }

    /// Index of the leg other legs are placed against: the first short leg,
    /// or the first leg when every leg is long.
    pub fn anchor_index(&self) -> usize {
        self.legs
            .iter()
            .position(|l| l.side == LegSide::Short)
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidStrategy {
            name: self.name.clone(),
            reason,
        };

        if self.legs.is_empty() {
            return Err(invalid("strategy has no legs".to_string()));
        }
        if let Some(expected) = self.kind.leg_count() {
            if self.legs.len() != expected {
                return Err(invalid(format!(
                    "{} needs {} legs, got {}",
                    self.kind.as_str(),
                    expected,
                    self.legs.len()
                )));
            }
        }

        for (i, leg) in self.legs.iter().enumerate() {
            if leg.quantity == 0 {
                return Err(invalid(format!("leg {} has zero quantity", i)));
            }
            if leg.dte_min < 0 || leg.dte_min > leg.dte_max {
                return Err(invalid(format!(
                    "leg {} has an empty DTE window [{}, {}]",
                    i, leg.dte_min, leg.dte_max
                )));
            }
            match leg.relative_offset {
                Some(offset) => {
                    if offset.leg >= i {
                        return Err(invalid(format!(
                            "leg {} is offset from leg {}, which is not an earlier leg",
                            i, offset.leg
                        )));
                    }
                    if offset.strike_offset.is_zero() {
                        return Err(invalid(format!("leg {} has a zero strike offset", i)));
                    }
                }
                None => {
                    if !(0.0..=1.0).contains(&leg.target_abs_delta) {
                        return Err(invalid(format!(
                            "leg {} target delta {} outside [0, 1]",
                            i, leg.target_abs_delta
                        )));
                    }
                }
            }
        }

        if !(self.profit_target_pct.is_finite() && self.profit_target_pct > 0.0) {
            return Err(invalid(format!(
                "profit_target_pct must be positive, got {}",
                self.profit_target_pct
            )));
        }
        if !(self.stop_loss_pct.is_finite() && self.stop_loss_pct > 0.0) {
            return Err(invalid(format!(
                "stop_loss_pct must be positive, got {}",
                self.stop_loss_pct
            )));
        }
        if self.max_hold_days == Some(0) {
            return Err(invalid("max_hold_days must be at least 1".to_string()));
        }
        if self.exit_dte == Some(0) {
            return Err(invalid("exit_dte must be at least 1".to_string()));
        }
        if self.entry.max_open_positions == 0 {
            return Err(invalid("max_open_positions must be at least 1".to_string()));
        }
        if self.entry.cadence == (EntryCadence::Interval { days: 0 }) {
            return Err(invalid("entry interval must be at least 1 day".to_string()));
        }

        Ok(())
    }
}
