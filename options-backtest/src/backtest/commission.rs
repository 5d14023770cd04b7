//! Commission model for options orders.
//!
//! Default: $1.00 per contract, charged on entry and again on exit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionModel {
    /// Commission per contract.
    pub per_contract: Decimal,
    /// Minimum commission per order.
    #[serde(default)]
    pub min_per_order: Decimal,
    /// Maximum commission per order (0 = unlimited).
    #[serde(default)]
    pub max_per_order: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self {
            per_contract: Decimal::ONE,
            min_per_order: Decimal::ZERO,
            max_per_order: Decimal::ZERO,
        }
    }
}

impl CommissionModel {
    pub fn new(per_contract: Decimal) -> Self {
        Self {
            per_contract,
            ..Default::default()
        }
    }

    pub fn zero() -> Self {
        Self::new(Decimal::ZERO)
    }

    /// Commission for one order covering `contracts` contracts across all legs.
    pub fn order(&self, contracts: u32) -> Decimal {
        if contracts == 0 {
            return Decimal::ZERO;
        }

        let mut total = self.per_contract * Decimal::from(contracts);
        if total < self.min_per_order {
            total = self.min_per_order;
        }
        if self.max_per_order > Decimal::ZERO && total > self.max_per_order {
            total = self.max_per_order;
        }
        total
    }

    /// Entry plus exit commission.
    pub fn round_trip(&self, contracts: u32) -> Decimal {
        self.order(contracts) * Decimal::TWO
    }
}
