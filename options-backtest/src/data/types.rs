//! Core market data types.
//!
//! A backtest consumes one [`MarketSnapshot`] per trading day. Snapshots are
//! produced by an ingestion or generation step and never mutated afterwards.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }

    /// Intrinsic value of one share of this option.
    pub fn intrinsic(&self, spot: f64, strike: f64) -> f64 {
        match self {
            Self::Call => (spot - strike).max(0.0),
            Self::Put => (strike - spot).max(0.0),
        }
    }

    /// True when the option has positive intrinsic value.
    pub fn is_itm(&self, spot: f64, strike: f64) -> bool {
        match self {
            Self::Call => spot > strike,
            Self::Put => spot < strike,
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Greeks for an option contract.
///
/// Theta is per calendar day; vega and rho are per one percentage point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

/// Market state for one simulated trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Trading date.
    pub date: NaiveDate,

    /// Underlying spot price.
    pub underlying_price: f64,

    /// Continuously compounded risk-free rate (0.04 = 4%).
    pub risk_free_rate: f64,

    /// Continuous dividend yield (0.015 = 1.5%).
    #[serde(default)]
    pub dividend_yield: f64,

    /// Flat implied volatility used to price every contract on this day.
    pub volatility: f64,
}

impl MarketSnapshot {
    pub fn new(
        date: NaiveDate,
        underlying_price: f64,
        risk_free_rate: f64,
        dividend_yield: f64,
        volatility: f64,
    ) -> Self {
        Self {
            date,
            underlying_price,
            risk_free_rate,
            dividend_yield,
            volatility,
        }
    }

    /// Check that every field is finite and the price/vol are positive.
    pub fn is_well_formed(&self) -> bool {
        self.underlying_price.is_finite()
            && self.underlying_price > 0.0
            && self.volatility.is_finite()
            && self.volatility > 0.0
            && self.risk_free_rate.is_finite()
            && self.dividend_yield.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_type_parsing() {
        assert_eq!(OptionType::parse("C"), Some(OptionType::Call));
        assert_eq!(OptionType::parse("P"), Some(OptionType::Put));
        assert_eq!(OptionType::parse("call"), Some(OptionType::Call));
        assert_eq!(OptionType::parse("PUT"), Some(OptionType::Put));
        assert_eq!(OptionType::parse("X"), None);
    }

    #[test]
    fn test_intrinsic_value() {
        assert_eq!(OptionType::Call.intrinsic(105.0, 100.0), 5.0);
        assert_eq!(OptionType::Call.intrinsic(95.0, 100.0), 0.0);
        assert_eq!(OptionType::Put.intrinsic(95.0, 100.0), 5.0);
        assert!(!OptionType::Put.is_itm(100.0, 100.0));
    }

    #[test]
    fn test_snapshot_well_formed() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let good = MarketSnapshot::new(date, 470.0, 0.05, 0.013, 0.15);
        assert!(good.is_well_formed());

        let bad = MarketSnapshot {
            volatility: 0.0,
            ..good.clone()
        };
        assert!(!bad.is_well_formed());
    }
}
