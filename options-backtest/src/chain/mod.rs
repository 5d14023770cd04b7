//! Option chain construction and leg selection.

pub mod builder;
pub mod selector;

pub use builder::{
    ChainBuilder, ChainCache, ChainConfig, ExpirationCycle, OptionContract, OptionsChain,
};
pub use selector::{
    select_leg, select_legs, select_offset_leg, SelectionError, DELTA_TIE_TOLERANCE,
};
