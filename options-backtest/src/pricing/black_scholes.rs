//! Black-Scholes-Merton pricing with a continuous dividend yield.
//!
//! Every function here is pure: the result depends only on the
//! [`PricingInputs`] and the option type, which keeps the simulator free of
//! look-ahead and lets tests pin exact reference values.
//!
//! Conventions:
//! - `time_to_expiry` is in years (calendar days / 365)
//! - theta is per calendar day
//! - vega and rho are per one percentage point

use std::f64::consts::{PI, SQRT_2};

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use thiserror::Error;

use crate::data::{Greeks, MarketSnapshot, OptionType};

/// Calendar days per year used to convert DTE into `T`.
pub const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("invalid pricing input: {0}")]
    InvalidInput(String),
}

/// The six market inputs of a single pricing call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingInputs {
    pub spot: f64,
    pub strike: f64,
    pub time_to_expiry: f64,
    pub rate: f64,
    pub dividend_yield: f64,
    pub volatility: f64,
}

impl PricingInputs {
    pub fn new(
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        rate: f64,
        dividend_yield: f64,
        volatility: f64,
    ) -> Self {
        Self {
            spot,
            strike,
            time_to_expiry,
            rate,
            dividend_yield,
            volatility,
        }
    }

    /// Build inputs for a contract `dte` calendar days from expiry.
    pub fn from_snapshot(snapshot: &MarketSnapshot, strike: f64, dte: i32) -> Self {
        Self {
            spot: snapshot.underlying_price,
            strike,
            time_to_expiry: f64::from(dte) / DAYS_PER_YEAR,
            rate: snapshot.risk_free_rate,
            dividend_yield: snapshot.dividend_yield,
            volatility: snapshot.volatility,
        }
    }

    fn validate(&self) -> Result<(), PricingError> {
        let fields = [
            ("spot", self.spot),
            ("strike", self.strike),
            ("time_to_expiry", self.time_to_expiry),
            ("rate", self.rate),
            ("dividend_yield", self.dividend_yield),
            ("volatility", self.volatility),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(PricingError::InvalidInput(format!(
                "{} must be finite, got {}",
                name, value
            )));
        }
        if self.spot <= 0.0 {
            return Err(PricingError::InvalidInput(format!(
                "spot must be positive, got {}",
                self.spot
            )));
        }
        if self.strike <= 0.0 {
            return Err(PricingError::InvalidInput(format!(
                "strike must be positive, got {}",
                self.strike
            )));
        }
        if self.volatility <= 0.0 {
            return Err(PricingError::InvalidInput(format!(
                "volatility must be positive, got {}",
                self.volatility
            )));
        }
        Ok(())
    }

    fn is_expired(&self) -> bool {
        self.time_to_expiry <= 0.0
    }

    fn d1(&self) -> f64 {
        let vol = self.volatility;
        let numerator = (self.spot / self.strike).ln()
            + (self.rate - self.dividend_yield + 0.5 * vol * vol) * self.time_to_expiry;
        numerator / (vol * self.time_to_expiry.sqrt())
    }

    fn d2(&self) -> f64 {
        self.d1() - self.volatility * self.time_to_expiry.sqrt()
    }

    fn dividend_discount(&self) -> f64 {
        (-self.dividend_yield * self.time_to_expiry).exp()
    }

    fn rate_discount(&self) -> f64 {
        (-self.rate * self.time_to_expiry).exp()
    }
}

/// Price and Greeks of one option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionPricing {
    pub price: f64,
    pub greeks: Greeks,
}

/// Closed-form Black-Scholes-Merton calculator.
pub struct BlackScholes;

impl BlackScholes {
    /// Standard normal CDF.
    pub fn norm_cdf(x: f64) -> f64 {
        0.5 * erfc(-x / SQRT_2)
    }

    /// Standard normal PDF.
    pub fn norm_pdf(x: f64) -> f64 {
        (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
    }

    /// Price plus delta, gamma, theta, vega and rho.
    pub fn price(
        inputs: &PricingInputs,
        option_type: OptionType,
    ) -> Result<OptionPricing, PricingError> {
        inputs.validate()?;

        if inputs.is_expired() {
            return Ok(Self::expired(inputs, option_type));
        }

        Ok(OptionPricing {
            price: Self::premium(inputs, option_type),
            greeks: Greeks {
                delta: Self::delta_unchecked(inputs, option_type),
                gamma: Self::gamma_unchecked(inputs),
                theta: Self::theta_unchecked(inputs, option_type),
                vega: Self::vega_unchecked(inputs),
                rho: Self::rho_unchecked(inputs, option_type),
            },
        })
    }

    /// Delta only.
    pub fn delta(inputs: &PricingInputs, option_type: OptionType) -> Result<f64, PricingError> {
        inputs.validate()?;
        if inputs.is_expired() {
            return Ok(Self::expired(inputs, option_type).greeks.delta);
        }
        Ok(Self::delta_unchecked(inputs, option_type))
    }

    /// Expired contracts are worth intrinsic value and delta snaps to 0/±1.
    fn expired(inputs: &PricingInputs, option_type: OptionType) -> OptionPricing {
        let delta = if option_type.is_itm(inputs.spot, inputs.strike) {
            match option_type {
                OptionType::Call => 1.0,
                OptionType::Put => -1.0,
            }
        } else {
            0.0
        };

        OptionPricing {
            price: option_type.intrinsic(inputs.spot, inputs.strike),
            greeks: Greeks {
                delta,
                ..Greeks::default()
            },
        }
    }

    fn premium(inputs: &PricingInputs, option_type: OptionType) -> f64 {
        let d1 = inputs.d1();
        let d2 = inputs.d2();
        let forward_leg = inputs.spot * inputs.dividend_discount();
        let strike_leg = inputs.strike * inputs.rate_discount();

        let price = match option_type {
            OptionType::Call => forward_leg * Self::norm_cdf(d1) - strike_leg * Self::norm_cdf(d2),
            OptionType::Put => strike_leg * Self::norm_cdf(-d2) - forward_leg * Self::norm_cdf(-d1),
        };
        // Rounding can push deep OTM prices a hair below zero.
        price.max(0.0)
    }

    fn delta_unchecked(inputs: &PricingInputs, option_type: OptionType) -> f64 {
        let d1 = inputs.d1();
        let discount = inputs.dividend_discount();

        match option_type {
            OptionType::Call => discount * Self::norm_cdf(d1),
            OptionType::Put => -discount * Self::norm_cdf(-d1),
        }
    }

    fn gamma_unchecked(inputs: &PricingInputs) -> f64 {
        let d1 = inputs.d1();
        inputs.dividend_discount() * Self::norm_pdf(d1)
            / (inputs.spot * inputs.volatility * inputs.time_to_expiry.sqrt())
    }

    fn vega_unchecked(inputs: &PricingInputs) -> f64 {
        let d1 = inputs.d1();
        inputs.spot * inputs.dividend_discount() * Self::norm_pdf(d1) * inputs.time_to_expiry.sqrt()
            / 100.0
    }

    fn theta_unchecked(inputs: &PricingInputs, option_type: OptionType) -> f64 {
        let d1 = inputs.d1();
        let d2 = inputs.d2();
        let discount_q = inputs.dividend_discount();
        let discount_r = inputs.rate_discount();
        let t = inputs.time_to_expiry;

        let decay = -inputs.spot * discount_q * Self::norm_pdf(d1) * inputs.volatility / (2.0 * t.sqrt());

        let annual = match option_type {
            OptionType::Call => {
                decay + inputs.dividend_yield * inputs.spot * discount_q * Self::norm_cdf(d1)
                    - inputs.rate * inputs.strike * discount_r * Self::norm_cdf(d2)
            }
            OptionType::Put => {
                decay - inputs.dividend_yield * inputs.spot * discount_q * Self::norm_cdf(-d1)
                    + inputs.rate * inputs.strike * discount_r * Self::norm_cdf(-d2)
            }
        };
        annual / DAYS_PER_YEAR
    }

    fn rho_unchecked(inputs: &PricingInputs, option_type: OptionType) -> f64 {
        let d2 = inputs.d2();
        let scaled = inputs.strike * inputs.time_to_expiry * inputs.rate_discount() / 100.0;

        match option_type {
            OptionType::Call => scaled * Self::norm_cdf(d2),
            OptionType::Put => -scaled * Self::norm_cdf(-d2),
        }
    }

    /// Implied volatility from an observed price using Newton-Raphson.
    ///
    /// `inputs.volatility` is ignored. Returns `None` when the price is not
    /// attainable or the iteration does not converge.
    pub fn implied_vol(
        inputs: &PricingInputs,
        market_price: f64,
        option_type: OptionType,
    ) -> Option<f64> {
        if inputs.time_to_expiry <= 0.0 || market_price <= 0.0 {
            return None;
        }

        // Brenner-Subrahmanyam seed
        let mut vol = (market_price / inputs.spot) * (2.0 * PI / inputs.time_to_expiry).sqrt();
        vol = vol.clamp(0.01, 5.0);

        for _ in 0..100 {
            let trial = PricingInputs {
                volatility: vol,
                ..*inputs
            };
            if trial.validate().is_err() {
                return None;
            }

            let diff = Self::premium(&trial, option_type) - market_price;
            if diff.abs() < 1e-8 {
                return Some(vol);
            }

            let raw_vega = Self::vega_unchecked(&trial) * 100.0;
            if raw_vega.abs() < 1e-10 {
                break;
            }

            vol = (vol - diff / raw_vega).clamp(0.001, 10.0);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn inputs(spot: f64, strike: f64, t: f64, r: f64, q: f64, vol: f64) -> PricingInputs {
        PricingInputs::new(spot, strike, t, r, q, vol)
    }

    #[test]
    fn test_reference_prices() {
        // S=K=100, T=1, r=5%, q=0, vol=20%
        let i = inputs(100.0, 100.0, 1.0, 0.05, 0.0, 0.20);
        let call = BlackScholes::price(&i, OptionType::Call).unwrap();
        let put = BlackScholes::price(&i, OptionType::Put).unwrap();

        assert_relative_eq!(call.price, 10.450583572185565, epsilon = 1e-6);
        assert_relative_eq!(put.price, 5.573526022256971, epsilon = 1e-6);
        assert_relative_eq!(call.greeks.delta, 0.6368306511756191, epsilon = 1e-6);
        assert_relative_eq!(put.greeks.delta, 0.6368306511756191 - 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_put_call_price_parity() {
        let i = inputs(345.27, 330.0, 45.0 / 365.0, 0.04, 0.015, 0.18);
        let call = BlackScholes::price(&i, OptionType::Call).unwrap().price;
        let put = BlackScholes::price(&i, OptionType::Put).unwrap().price;

        let rhs = i.spot * (-i.dividend_yield * i.time_to_expiry).exp()
            - i.strike * (-i.rate * i.time_to_expiry).exp();
        assert_relative_eq!(call - put, rhs, epsilon = 1e-9);
    }

    #[test]
    fn test_put_call_delta_parity_and_bounds() {
        let spots = [50.0, 95.0, 100.0, 105.0, 400.0];
        let strikes = [60.0, 100.0, 380.0];
        let times = [1.0 / 365.0, 30.0 / 365.0, 2.0];
        let vols = [0.05, 0.25, 1.2];

        for &s in &spots {
            for &k in &strikes {
                for &t in &times {
                    for &v in &vols {
                        let i = inputs(s, k, t, 0.04, 0.02, v);
                        let call = BlackScholes::delta(&i, OptionType::Call).unwrap();
                        let put = BlackScholes::delta(&i, OptionType::Put).unwrap();

                        assert_relative_eq!(call - put, (-0.02 * t).exp(), epsilon = 1e-12);
                        assert!((0.0..=1.0).contains(&call.abs()));
                        assert!((0.0..=1.0).contains(&put.abs()));
                        assert!(call >= 0.0 && put <= 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_spy_atm_call_delta() {
        // 30 DTE ATM call: positive net drift pushes delta above 0.50
        let i = inputs(345.27, 345.27, 30.0 / 365.0, 0.04, 0.015, 0.1438);
        let delta = BlackScholes::delta(&i, OptionType::Call).unwrap();

        assert!(delta > 0.50);
        assert_relative_eq!(delta, 0.5274336, epsilon = 1e-6);
    }

    #[test]
    fn test_expired_option_snaps_to_intrinsic() {
        let itm_call = inputs(110.0, 100.0, 0.0, 0.05, 0.0, 0.2);
        let p = BlackScholes::price(&itm_call, OptionType::Call).unwrap();
        assert_eq!(p.price, 10.0);
        assert_eq!(p.greeks.delta, 1.0);
        assert_eq!(p.greeks.gamma, 0.0);
        assert_eq!(p.greeks.theta, 0.0);
        assert_eq!(p.greeks.vega, 0.0);

        let otm_call = inputs(90.0, 100.0, -0.01, 0.05, 0.0, 0.2);
        let p = BlackScholes::price(&otm_call, OptionType::Call).unwrap();
        assert_eq!(p.price, 0.0);
        assert_eq!(p.greeks.delta, 0.0);

        let itm_put = inputs(90.0, 100.0, 0.0, 0.05, 0.0, 0.2);
        let p = BlackScholes::price(&itm_put, OptionType::Put).unwrap();
        assert_eq!(p.price, 10.0);
        assert_eq!(p.greeks.delta, -1.0);

        // At the money counts as out of the money
        let atm_put = inputs(100.0, 100.0, 0.0, 0.05, 0.0, 0.2);
        assert_eq!(BlackScholes::delta(&atm_put, OptionType::Put).unwrap(), 0.0);
    }

    #[test]
    fn test_converges_to_expiry_values() {
        let t = 1e-6;
        let itm = inputs(110.0, 100.0, t, 0.05, 0.01, 0.2);
        let otm = inputs(90.0, 100.0, t, 0.05, 0.01, 0.2);

        let call_itm = BlackScholes::price(&itm, OptionType::Call).unwrap();
        assert_relative_eq!(call_itm.greeks.delta, 1.0, epsilon = 1e-6);
        assert_relative_eq!(call_itm.price, 10.0, epsilon = 1e-3);

        let call_otm = BlackScholes::price(&otm, OptionType::Call).unwrap();
        assert_relative_eq!(call_otm.greeks.delta, 0.0, epsilon = 1e-6);
        assert_relative_eq!(call_otm.price, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_volatility_rejected() {
        for vol in [0.0, -0.2, f64::NAN] {
            let i = inputs(100.0, 100.0, 0.5, 0.05, 0.0, vol);
            assert!(matches!(
                BlackScholes::price(&i, OptionType::Call),
                Err(PricingError::InvalidInput(_))
            ));
        }

        // Rejected even when the option has already expired
        let expired = inputs(100.0, 100.0, 0.0, 0.05, 0.0, 0.0);
        assert!(BlackScholes::price(&expired, OptionType::Put).is_err());
    }

    #[test]
    fn test_non_positive_spot_and_strike_rejected() {
        assert!(BlackScholes::price(&inputs(0.0, 100.0, 0.5, 0.05, 0.0, 0.2), OptionType::Call).is_err());
        assert!(BlackScholes::price(&inputs(100.0, -5.0, 0.5, 0.05, 0.0, 0.2), OptionType::Put).is_err());
    }

    #[test]
    fn test_gamma_vega_shared_and_positive() {
        let i = inputs(100.0, 95.0, 0.25, 0.03, 0.01, 0.3);
        let call = BlackScholes::price(&i, OptionType::Call).unwrap();
        let put = BlackScholes::price(&i, OptionType::Put).unwrap();

        assert!(call.greeks.gamma > 0.0);
        assert!(call.greeks.vega > 0.0);
        assert_relative_eq!(call.greeks.gamma, put.greeks.gamma, epsilon = 1e-15);
        assert_relative_eq!(call.greeks.vega, put.greeks.vega, epsilon = 1e-15);
        assert!(call.greeks.theta < 0.0);
        assert!(call.greeks.rho > 0.0 && put.greeks.rho < 0.0);
    }

    #[test]
    fn test_implied_vol_roundtrip() {
        let i = inputs(100.0, 105.0, 0.5, 0.05, 0.01, 0.25);
        let price = BlackScholes::price(&i, OptionType::Call).unwrap().price;

        let iv = BlackScholes::implied_vol(&i, price, OptionType::Call).unwrap();
        assert_relative_eq!(iv, 0.25, epsilon = 1e-5);
    }
}
