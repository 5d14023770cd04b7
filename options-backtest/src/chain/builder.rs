//! Synthetic option chains.
//!
//! A chain is generated from a single [`MarketSnapshot`]: every strike on
//! the increment grid within the configured band around spot, for every
//! listed expiration inside the DTE bounds, priced with the snapshot's flat
//! volatility.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{Greeks, MarketSnapshot, OptionType};
use crate::pricing::{BlackScholes, PricingError, PricingInputs};

/// Which Fridays carry listed expirations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationCycle {
    /// Every Friday.
    #[default]
    Weekly,
    /// Third Friday of each month.
    Monthly,
}

impl ExpirationCycle {
    pub fn is_expiration(&self, date: NaiveDate) -> bool {
        if date.weekday() != Weekday::Fri {
            return false;
        }
        match self {
            Self::Weekly => true,
            Self::Monthly => (15..=21).contains(&date.day()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Strike band as a fraction of spot on each side (0.20 = ±20%).
    #[serde(default = "default_strike_range_pct")]
    pub strike_range_pct: f64,

    #[serde(default = "default_strike_increment")]
    pub strike_increment: Decimal,

    #[serde(default = "default_min_dte")]
    pub min_dte: i32,

    #[serde(default = "default_max_dte")]
    pub max_dte: i32,

    #[serde(default)]
    pub cycle: ExpirationCycle,
}

fn default_strike_range_pct() -> f64 {
    0.20
}

fn default_strike_increment() -> Decimal {
    Decimal::ONE
}

fn default_min_dte() -> i32 {
    1
}

fn default_max_dte() -> i32 {
    60
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            strike_range_pct: default_strike_range_pct(),
            strike_increment: default_strike_increment(),
            min_dte: default_min_dte(),
            max_dte: default_max_dte(),
            cycle: ExpirationCycle::default(),
        }
    }
}

/// One priced contract. Built on demand and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub dte: i32,
    pub option_type: OptionType,
    pub price: f64,
    pub greeks: Greeks,
}

impl OptionContract {
    /// Price a contract against a snapshot. Contracts at or past expiration
    /// are valued at intrinsic.
    pub fn quote(
        snapshot: &MarketSnapshot,
        strike: Decimal,
        expiration: NaiveDate,
        option_type: OptionType,
    ) -> Result<Self, PricingError> {
        let dte = (expiration - snapshot.date).num_days() as i32;
        let strike_f64 = strike.to_f64().unwrap_or(0.0);
        let inputs = PricingInputs::from_snapshot(snapshot, strike_f64, dte);
        let pricing = BlackScholes::price(&inputs, option_type)?;

        Ok(Self {
            strike,
            expiration,
            dte,
            option_type,
            price: pricing.price,
            greeks: pricing.greeks,
        })
    }

    pub fn abs_delta(&self) -> f64 {
        self.greeks.delta.abs()
    }

    /// Same strike, expiration and type.
    pub fn same_contract(&self, other: &OptionContract) -> bool {
        self.strike == other.strike
            && self.expiration == other.expiration
            && self.option_type == other.option_type
    }
}

/// All contracts for one day, ordered by expiration, type, then strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsChain {
    pub date: NaiveDate,
    pub underlying_price: f64,
    pub contracts: Vec<OptionContract>,
}

impl OptionsChain {
    pub fn expirations(&self) -> Vec<NaiveDate> {
        let mut exps: Vec<NaiveDate> = self.contracts.iter().map(|c| c.expiration).collect();
        exps.dedup();
        exps
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainBuilder {
    config: ChainConfig,
}

impl ChainBuilder {
    pub fn new(config: ChainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Listed expirations with DTE inside the configured bounds.
    pub fn expirations(&self, date: NaiveDate) -> Vec<NaiveDate> {
        let first = self.config.min_dte.max(0);
        (first..=self.config.max_dte)
            .map(|dte| date + Duration::days(i64::from(dte)))
            .filter(|d| self.config.cycle.is_expiration(*d))
            .collect()
    }

    /// Strike grid within the band around spot.
    pub fn strikes(&self, spot: f64) -> Vec<Decimal> {
        let increment = self.config.strike_increment;
        if increment <= Decimal::ZERO || !spot.is_finite() || spot <= 0.0 {
            return Vec::new();
        }

        let band = self.config.strike_range_pct.max(0.0);
        let to_decimal = |x: f64| Decimal::from_f64_retain(x).unwrap_or_default().round_dp(6);
        let low = to_decimal(spot * (1.0 - band));
        let high = to_decimal(spot * (1.0 + band));

        let mut strike = ((low / increment).ceil() * increment).max(increment);
        let mut strikes = Vec::new();
        while strike <= high {
            strikes.push(strike);
            strike += increment;
        }
        strikes
    }

    pub fn build(&self, snapshot: &MarketSnapshot) -> Result<OptionsChain, PricingError> {
        let expirations = self.expirations(snapshot.date);
        let strikes = self.strikes(snapshot.underlying_price);

        let mut contracts = Vec::with_capacity(expirations.len() * strikes.len() * 2);
        for expiration in &expirations {
            for option_type in [OptionType::Call, OptionType::Put] {
                for strike in &strikes {
                    contracts.push(OptionContract::quote(
                        snapshot,
                        *strike,
                        *expiration,
                        option_type,
                    )?);
                }
            }
        }

        Ok(OptionsChain {
            date: snapshot.date,
            underlying_price: snapshot.underlying_price,
            contracts,
        })
    }
}

/// Per-run cache of built chains, keyed by snapshot date.
///
/// Shared by reference between the simulator and optimizer workers. A chain
/// depends only on its snapshot and the builder config, so a cache must not
/// be reused across different snapshot series.
#[derive(Debug, Default)]
pub struct ChainCache {
    builder: ChainBuilder,
    chains: RwLock<HashMap<NaiveDate, Arc<OptionsChain>>>,
}

impl ChainCache {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            builder: ChainBuilder::new(config),
            chains: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ChainConfig {
        self.builder.config()
    }

    pub fn chain_for(&self, snapshot: &MarketSnapshot) -> Result<Arc<OptionsChain>, PricingError> {
        {
            let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
            if let Some(chain) = chains.get(&snapshot.date) {
                return Ok(Arc::clone(chain));
            }
        }

        // Built outside the lock; a racing worker may build the same chain.
        let chain = Arc::new(self.builder.build(snapshot)?);

        let mut chains = self.chains.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(chains.entry(snapshot.date).or_insert(chain)))
    }

    pub fn len(&self) -> usize {
        self.chains.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> MarketSnapshot {
        // Monday
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        MarketSnapshot::new(date, 100.0, 0.04, 0.01, 0.20)
    }

    #[test]
    fn test_expiration_cycles() {
        let builder = ChainBuilder::default();
        let exps = builder.expirations(snapshot().date);
        assert_eq!(exps[0], NaiveDate::from_ymd_opt(2024, 3, 8).unwrap());
        assert!(exps.iter().all(|d| d.weekday() == Weekday::Fri));

        let monthly = ChainBuilder::new(ChainConfig {
            cycle: ExpirationCycle::Monthly,
            ..ChainConfig::default()
        });
        let exps = monthly.expirations(snapshot().date);
        assert_eq!(
            exps,
            vec![
                NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 4, 19).unwrap(),
            ]
        );
    }

    #[test]
    fn test_strike_grid() {
        let builder = ChainBuilder::new(ChainConfig {
            strike_range_pct: 0.05,
            strike_increment: dec!(2.5),
            ..ChainConfig::default()
        });
        let strikes = builder.strikes(100.0);
        assert_eq!(strikes.first(), Some(&dec!(95)));
        assert_eq!(strikes.last(), Some(&dec!(105)));
        assert_eq!(strikes.len(), 5);
    }

    #[test]
    fn test_chain_ordering_and_delta_bounds() {
        let chain = ChainBuilder::default().build(&snapshot()).unwrap();
        assert!(!chain.is_empty());

        let key = |c: &OptionContract| (c.expiration, c.option_type, c.strike);
        assert!(chain.contracts.windows(2).all(|w| key(&w[0]) < key(&w[1])));
        assert!(chain.contracts.iter().all(|c| (0.0..=1.0).contains(&c.abs_delta())));
        assert!(chain
            .contracts
            .iter()
            .all(|c| c.dte >= 1 && c.dte <= 60));
    }

    #[test]
    fn test_invalid_snapshot_fails_to_build() {
        let mut snap = snapshot();
        snap.volatility = 0.0;
        assert!(ChainBuilder::default().build(&snap).is_err());
    }

    #[test]
    fn test_cache_reuses_chain() {
        let cache = ChainCache::new(ChainConfig::default());
        let a = cache.chain_for(&snapshot()).unwrap();
        let b = cache.chain_for(&snapshot()).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_quote_at_expiration_is_intrinsic() {
        let snap = snapshot();
        let put = OptionContract::quote(&snap, dec!(110), snap.date, OptionType::Put).unwrap();
        assert_eq!(put.dte, 0);
        assert_eq!(put.price, 10.0);
        assert_eq!(put.greeks.delta, -1.0);
    }
}
