//! Strategy definitions: leg specs, spread shapes, exit and entry rules.

pub mod config;

pub use config::{
    ConfigError, EntryCadence, EntryRules, LegSide, RelativeOffset, StrategyConfig, StrategyKind,
    StrategyLegSpec,
};
