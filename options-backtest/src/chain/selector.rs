//! Leg selection.
//!
//! Legs are picked by target |delta| inside a DTE window, or by strike
//! offset from an already selected leg. Every choice is a total order over
//! the candidate set, so the same chain and leg spec always yield the same
//! contract.

use std::cmp::Ordering;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::data::OptionType;
use crate::strategy::{StrategyConfig, StrategyLegSpec};

use super::builder::{OptionContract, OptionsChain};

/// Delta distances closer than this are treated as equal.
pub const DELTA_TIE_TOLERANCE: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error("No {option_type} contract on {date} with DTE in [{dte_min}, {dte_max}]")]
    NoMatchingContract {
        date: NaiveDate,
        option_type: OptionType,
        dte_min: i32,
        dte_max: i32,
    },

    #[error("Leg {leg} references leg {reference}, which has not been selected")]
    MissingReference { leg: usize, reference: usize },
}

/// Pick the contract whose |delta| is closest to the leg's target.
///
/// Ties are broken by strike distance to `anchor`, then by DTE distance to
/// the window midpoint, then by lower strike and earlier expiration. The
/// anchor contract itself is never returned.
pub fn select_leg(
    chain: &OptionsChain,
    spec: &StrategyLegSpec,
    anchor: Option<&OptionContract>,
) -> Result<OptionContract, SelectionError> {
    let candidates: Vec<&OptionContract> = chain
        .contracts
        .iter()
        .filter(|c| c.option_type == spec.option_type)
        .filter(|c| c.dte >= spec.dte_min && c.dte <= spec.dte_max)
        .filter(|c| anchor.map_or(true, |a| !a.same_contract(c)))
        .collect();

    let no_match = || SelectionError::NoMatchingContract {
        date: chain.date,
        option_type: spec.option_type,
        dte_min: spec.dte_min,
        dte_max: spec.dte_max,
    };

    let distance = |c: &OptionContract| (c.abs_delta() - spec.target_abs_delta).abs();
    let best = candidates
        .iter()
        .map(|c| distance(c))
        .fold(f64::INFINITY, f64::min);
    if !best.is_finite() {
        return Err(no_match());
    }

    let midpoint = f64::from(spec.dte_min + spec.dte_max) / 2.0;
    let strike_gap = |c: &OptionContract| match anchor {
        Some(a) => (c.strike - a.strike).abs(),
        None => Decimal::ZERO,
    };
    let dte_gap = |c: &OptionContract| (f64::from(c.dte) - midpoint).abs();

    candidates
        .into_iter()
        .filter(|c| distance(c) - best <= DELTA_TIE_TOLERANCE)
        .min_by(|a, b| {
            strike_gap(a)
                .cmp(&strike_gap(b))
                .then_with(|| dte_gap(a).total_cmp(&dte_gap(b)))
                .then_with(|| a.strike.cmp(&b.strike))
                .then_with(|| a.expiration.cmp(&b.expiration))
        })
        .cloned()
        .ok_or_else(no_match)
}

/// Pick the contract on `reference`'s expiration whose strike is nearest
/// `reference.strike + offset`, on the offset's side of the reference.
/// Equal distances go to the lower strike.
pub fn select_offset_leg(
    chain: &OptionsChain,
    spec: &StrategyLegSpec,
    reference: &OptionContract,
    strike_offset: Decimal,
) -> Result<OptionContract, SelectionError> {
    let target = reference.strike + strike_offset;

    chain
        .contracts
        .iter()
        .filter(|c| c.option_type == spec.option_type && c.expiration == reference.expiration)
        .filter(|c| !c.same_contract(reference))
        .filter(|c| match strike_offset.cmp(&Decimal::ZERO) {
            Ordering::Less => c.strike < reference.strike,
            Ordering::Greater => c.strike > reference.strike,
            Ordering::Equal => true,
        })
        .min_by(|a, b| {
            (a.strike - target)
                .abs()
                .cmp(&(b.strike - target).abs())
                .then_with(|| a.strike.cmp(&b.strike))
        })
        .cloned()
        .ok_or(SelectionError::NoMatchingContract {
            date: chain.date,
            option_type: spec.option_type,
            dte_min: reference.dte,
            dte_max: reference.dte,
        })
}

/// Resolve every leg of a strategy in order.
///
/// The anchor (first short leg, or the first leg) is the reference for
/// strike-distance tie breaks on the other delta-targeted legs.
pub fn select_legs(
    chain: &OptionsChain,
    strategy: &StrategyConfig,
) -> Result<Vec<OptionContract>, SelectionError> {
    let anchor_index = strategy.anchor_index();
    let mut selected: Vec<OptionContract> = Vec::with_capacity(strategy.legs.len());

    for (i, spec) in strategy.legs.iter().enumerate() {
        let contract = match spec.relative_offset {
            Some(offset) => {
                let reference =
                    selected
                        .get(offset.leg)
                        .ok_or(SelectionError::MissingReference {
                            leg: i,
                            reference: offset.leg,
                        })?;
                select_offset_leg(chain, spec, reference, offset.strike_offset)?
            }
            None => {
                let anchor = if i == anchor_index {
                    None
                } else {
                    selected.get(anchor_index)
                };
                select_leg(chain, spec, anchor)?
            }
        };
        selected.push(contract);
    }

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainBuilder, ChainConfig};
    use crate::data::{Greeks, MarketSnapshot};
    use crate::strategy::LegSide;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn contract(strike: Decimal, dte: i32, option_type: OptionType, delta: f64) -> OptionContract {
        let today = date(2024, 1, 2);
        OptionContract {
            strike,
            expiration: today + chrono::Duration::days(i64::from(dte)),
            dte,
            option_type,
            price: 1.0,
            greeks: Greeks {
                delta,
                ..Greeks::default()
            },
        }
    }

    fn chain(contracts: Vec<OptionContract>) -> OptionsChain {
        OptionsChain {
            date: date(2024, 1, 2),
            underlying_price: 100.0,
            contracts,
        }
    }

    #[test]
    fn test_selects_closest_delta_in_window() {
        let contracts = [0.12, 0.19, 0.28, 0.31, 0.45]
            .iter()
            .enumerate()
            .map(|(i, d)| contract(Decimal::from(90 + i as i64), 38, OptionType::Put, -d))
            .chain(std::iter::once(contract(dec!(97), 10, OptionType::Put, -0.30)))
            .collect();
        let spec = StrategyLegSpec::delta(OptionType::Put, LegSide::Short, 0.30, 30, 45);

        let picked = select_leg(&chain(contracts), &spec, None).unwrap();
        assert_eq!(picked.abs_delta(), 0.31);
        assert_eq!(picked.dte, 38);
    }

    #[test]
    fn test_empty_window_is_an_error() {
        let contracts = vec![contract(dec!(95), 10, OptionType::Put, -0.3)];
        let spec = StrategyLegSpec::delta(OptionType::Put, LegSide::Short, 0.30, 30, 45);

        let err = select_leg(&chain(contracts), &spec, None).unwrap_err();
        assert!(matches!(err, SelectionError::NoMatchingContract { dte_min: 30, .. }));
    }

    #[test]
    fn test_tie_breaks_are_deterministic() {
        let spec = StrategyLegSpec::delta(OptionType::Call, LegSide::Short, 0.25, 30, 50);

        // Same delta distance: nearer DTE to the window midpoint (40) wins
        let contracts = vec![
            contract(dec!(105), 31, OptionType::Call, 0.25),
            contract(dec!(106), 41, OptionType::Call, 0.25),
        ];
        let picked = select_leg(&chain(contracts), &spec, None).unwrap();
        assert_eq!(picked.strike, dec!(106));

        // Equal on DTE too: lower strike wins
        let contracts = vec![
            contract(dec!(107), 40, OptionType::Call, 0.26),
            contract(dec!(104), 40, OptionType::Call, 0.24),
        ];
        let picked = select_leg(&chain(contracts), &spec, None).unwrap();
        assert_eq!(picked.strike, dec!(104));

        // With an anchor, strike distance to it dominates
        let anchor = contract(dec!(108), 40, OptionType::Put, -0.25);
        let contracts = vec![
            contract(dec!(104), 40, OptionType::Call, 0.26),
            contract(dec!(107), 40, OptionType::Call, 0.24),
        ];
        let picked = select_leg(&chain(contracts), &spec, Some(&anchor)).unwrap();
        assert_eq!(picked.strike, dec!(107));
    }

    #[test]
    fn test_offset_leg_uses_reference_expiration() {
        let short = contract(dec!(95), 38, OptionType::Put, -0.30);
        let contracts = vec![
            contract(dec!(89), 38, OptionType::Put, -0.10),
            contract(dec!(90), 38, OptionType::Put, -0.12),
            contract(dec!(90), 45, OptionType::Put, -0.14),
            short.clone(),
        ];
        let spec = StrategyLegSpec::offset(OptionType::Put, LegSide::Long, 0, dec!(-5), 30, 45);

        let wing = select_offset_leg(&chain(contracts), &spec, &short, dec!(-5)).unwrap();
        assert_eq!(wing.strike, dec!(90));
        assert_eq!(wing.expiration, short.expiration);
    }

    #[test]
    fn test_offset_leg_never_crosses_reference() {
        let short = contract(dec!(95), 38, OptionType::Put, -0.30);
        let contracts = vec![short.clone(), contract(dec!(96), 38, OptionType::Put, -0.33)];
        let spec = StrategyLegSpec::offset(OptionType::Put, LegSide::Long, 0, dec!(-5), 30, 45);

        assert!(select_offset_leg(&chain(contracts), &spec, &short, dec!(-5)).is_err());
    }

    #[test]
    fn test_select_iron_condor_on_built_chain() {
        let snapshot = MarketSnapshot::new(date(2024, 3, 4), 100.0, 0.04, 0.0, 0.20);
        let built = ChainBuilder::new(ChainConfig::default()).build(&snapshot).unwrap();
        let strategy = StrategyConfig::iron_condor(0.16, dec!(5), 30, 45);

        let legs = select_legs(&built, &strategy).unwrap();
        assert_eq!(legs.len(), 4);
        assert_eq!(legs[1].strike, legs[0].strike - dec!(5));
        assert_eq!(legs[3].strike, legs[2].strike + dec!(5));
        assert_eq!(legs[1].expiration, legs[0].expiration);
        assert_eq!(legs[3].expiration, legs[2].expiration);
        assert!(legs[0].strike < legs[2].strike);

        // Deterministic
        assert_eq!(select_legs(&built, &strategy).unwrap(), legs);
    }
}
