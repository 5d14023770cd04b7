//! Option pricing.
//!
//! Closed-form Black-Scholes-Merton prices and Greeks with a continuous
//! dividend yield and a flat volatility input.

pub mod black_scholes;

pub use black_scholes::{BlackScholes, OptionPricing, PricingError, PricingInputs, DAYS_PER_YEAR};
