//! Positions and trades.
//!
//! Handles the position lifecycle:
//! - Entry (`PendingEntry` -> `Open`, entry premium fixed)
//! - Mark-to-market (same-day reprice of every leg)
//! - Exit (`Open` -> `Closed`, realized P&L and a [`Trade`] record)
//!
//! Money is carried as `Decimal` dollars including the contract multiplier.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::OptionContract;
use crate::data::MarketSnapshot;
use crate::pricing::PricingError;
use crate::strategy::LegSide;

/// Shares per option contract.
pub const CONTRACT_MULTIPLIER: i64 = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("Position {id}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: u64,
        from: PositionStatus,
        to: PositionStatus,
    },

    #[error("Position {0} has no legs")]
    NoLegs(u64),

    #[error("Position {id}: exit date {exit} precedes entry date {entry}")]
    ExitBeforeEntry {
        id: u64,
        entry: NaiveDate,
        exit: NaiveDate,
    },
}

/// Reason for exiting a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Unrealized P&L reached the profit target.
    ProfitTarget,
    /// Unrealized loss reached the stop.
    StopLoss,
    /// Held for the maximum number of days.
    MaxHold,
    /// Earliest leg reached expiration.
    Expiration,
    /// Still open when the backtest window ended.
    EndOfPeriod,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfitTarget => "profit_target",
            Self::StopLoss => "stop_loss",
            Self::MaxHold => "max_hold",
            Self::Expiration => "expiration",
            Self::EndOfPeriod => "end_of_period",
        }
    }
}

/// Status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Legs chosen, premium not yet booked.
    PendingEntry,
    Open,
    Closed,
}

/// Convert a per-share price into money.
pub fn to_money(price: f64) -> Decimal {
    Decimal::from_f64_retain(price)
        .unwrap_or_default()
        .round_dp(6)
}

/// A single leg of a multi-leg position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLeg {
    /// Contract as priced on the entry date.
    pub contract: OptionContract,
    pub side: LegSide,
    pub quantity: u32,
    /// Entry price per share.
    pub entry_price: Decimal,
    /// Latest mark per share.
    pub current_price: Decimal,
    pub current_delta: f64,
}

impl PositionLeg {
    pub fn new(contract: OptionContract, side: LegSide, quantity: u32) -> Self {
        let price = to_money(contract.price);
        let delta = contract.greeks.delta;
        Self {
            contract,
            side,
            quantity,
            entry_price: price,
            current_price: price,
            current_delta: delta,
        }
    }

    fn scale(&self) -> Decimal {
        Decimal::from(self.quantity) * Decimal::from(CONTRACT_MULTIPLIER)
    }

    /// Premium received (positive) or paid (negative) at entry.
    pub fn entry_premium(&self) -> Decimal {
        self.side.sign() * self.entry_price * self.scale()
    }

    /// Cost to close at the current mark (negative when closing pays us).
    pub fn close_cost(&self) -> Decimal {
        self.side.sign() * self.current_price * self.scale()
    }

    /// Share-equivalent delta exposure.
    pub fn position_delta(&self) -> f64 {
        let sign = match self.side {
            LegSide::Short => -1.0,
            LegSide::Long => 1.0,
        };
        sign * self.current_delta * f64::from(self.quantity) * CONTRACT_MULTIPLIER as f64
    }
}

/// A multi-leg options position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    /// Strategy name.
    pub strategy: String,
    pub entry_date: NaiveDate,
    pub exit_date: Option<NaiveDate>,
    pub legs: Vec<PositionLeg>,
    /// Net credit (positive) or debit (negative) at entry.
    pub entry_premium: Decimal,
    /// Current cost to close all legs.
    pub close_cost: Decimal,
    /// Commissions paid so far.
    pub commissions: Decimal,
    pub status: PositionStatus,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<Decimal>,
    /// Worst premium P&L seen while open (<= 0).
    pub max_adverse_excursion: Decimal,
    /// Best premium P&L seen while open (>= 0).
    pub max_favorable_excursion: Decimal,
    pub last_marked: NaiveDate,
}

impl Position {
    /// Create a position in `PendingEntry` from the selected legs.
    pub fn pending(
        id: u64,
        strategy: impl Into<String>,
        entry_date: NaiveDate,
        legs: Vec<PositionLeg>,
    ) -> Result<Self, PositionError> {
        if legs.is_empty() {
            return Err(PositionError::NoLegs(id));
        }

        Ok(Self {
            id,
            strategy: strategy.into(),
            entry_date,
            exit_date: None,
            legs,
            entry_premium: Decimal::ZERO,
            close_cost: Decimal::ZERO,
            commissions: Decimal::ZERO,
            status: PositionStatus::PendingEntry,
            exit_reason: None,
            realized_pnl: None,
            max_adverse_excursion: Decimal::ZERO,
            max_favorable_excursion: Decimal::ZERO,
            last_marked: entry_date,
        })
    }

    /// Book the entry premium and commission.
    pub fn open(&mut self, entry_commission: Decimal) -> Result<(), PositionError> {
        self.transition(PositionStatus::PendingEntry, PositionStatus::Open)?;

        self.entry_premium = self.legs.iter().map(|l| l.entry_premium()).sum();
        self.close_cost = self.legs.iter().map(|l| l.close_cost()).sum();
        self.commissions = entry_commission;
        self.update_excursions();
        Ok(())
    }

    fn transition(&mut self, from: PositionStatus, to: PositionStatus) -> Result<(), PositionError> {
        if self.status != from {
            return Err(PositionError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Total contracts across legs.
    pub fn total_contracts(&self) -> u32 {
        self.legs.iter().map(|l| l.quantity).sum()
    }

    /// Premium P&L at the current marks, before commissions. Exit
    /// thresholds are measured on this.
    pub fn unrealized_pnl(&self) -> Decimal {
        self.entry_premium - self.close_cost
    }

    /// Unrealized P&L after commissions paid so far.
    pub fn net_unrealized_pnl(&self) -> Decimal {
        self.unrealized_pnl() - self.commissions
    }

    /// Reprice every leg against the snapshot. On a pricing failure the
    /// previous marks are kept.
    pub fn mark(&mut self, snapshot: &MarketSnapshot) -> Result<(), PricingError> {
        let quotes = self
            .legs
            .iter()
            .map(|leg| {
                OptionContract::quote(
                    snapshot,
                    leg.contract.strike,
                    leg.contract.expiration,
                    leg.contract.option_type,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.apply_marks(snapshot.date, &quotes);
        Ok(())
    }

    /// Apply one repriced contract per leg, in leg order.
    pub fn apply_marks(&mut self, date: NaiveDate, quotes: &[OptionContract]) {
        for (leg, quote) in self.legs.iter_mut().zip(quotes) {
            leg.current_price = to_money(quote.price);
            leg.current_delta = quote.greeks.delta;
        }
        self.close_cost = self.legs.iter().map(|l| l.close_cost()).sum();
        self.last_marked = date;
        self.update_excursions();
    }

    fn update_excursions(&mut self) {
        let pnl = self.unrealized_pnl();
        self.max_adverse_excursion = self.max_adverse_excursion.min(pnl);
        self.max_favorable_excursion = self.max_favorable_excursion.max(pnl);
    }

    /// Calendar days since entry.
    pub fn days_held(&self, date: NaiveDate) -> i64 {
        (date - self.entry_date).num_days()
    }

    pub fn earliest_expiration(&self) -> Option<NaiveDate> {
        self.legs.iter().map(|l| l.contract.expiration).min()
    }

    /// Calendar days until the nearest leg expires.
    pub fn dte_remaining(&self, date: NaiveDate) -> Option<i64> {
        self.earliest_expiration().map(|exp| (exp - date).num_days())
    }

    pub fn is_time_exit(&self, date: NaiveDate, exit_dte: u32) -> bool {
        self.dte_remaining(date)
            .is_some_and(|dte| dte <= i64::from(exit_dte))
    }

    pub fn is_expired(&self, date: NaiveDate) -> bool {
        self.earliest_expiration().is_some_and(|exp| exp <= date)
    }

    /// |entry premium| scaled by a fraction.
    fn premium_threshold(&self, pct: f64) -> Option<Decimal> {
        if self.entry_premium.is_zero() {
            return None;
        }
        let pct = Decimal::from_f64_retain(pct)?;
        Some(self.entry_premium.abs() * pct)
    }

    pub fn is_profit_target_hit(&self, target_pct: f64) -> bool {
        self.premium_threshold(target_pct)
            .is_some_and(|target| self.unrealized_pnl() >= target)
    }

    pub fn is_stop_loss_hit(&self, stop_pct: f64) -> bool {
        self.premium_threshold(stop_pct)
            .is_some_and(|stop| self.unrealized_pnl() <= -stop)
    }

    /// Net share-equivalent delta.
    pub fn net_delta(&self) -> f64 {
        self.legs.iter().map(|l| l.position_delta()).sum()
    }

    /// Close at the current marks and emit the trade record.
    pub fn close(
        &mut self,
        exit_date: NaiveDate,
        exit_reason: ExitReason,
        exit_commission: Decimal,
    ) -> Result<Trade, PositionError> {
        if exit_date < self.entry_date {
            return Err(PositionError::ExitBeforeEntry {
                id: self.id,
                entry: self.entry_date,
                exit: exit_date,
            });
        }
        self.transition(PositionStatus::Open, PositionStatus::Closed)?;

        self.commissions += exit_commission;
        let pnl = self.net_unrealized_pnl();

        self.exit_date = Some(exit_date);
        self.exit_reason = Some(exit_reason);
        self.realized_pnl = Some(pnl);

        Ok(Trade {
            position_id: self.id,
            strategy: self.strategy.clone(),
            entry_date: self.entry_date,
            exit_date,
            exit_reason,
            entry_premium: self.entry_premium,
            exit_cost: self.close_cost,
            commissions: self.commissions,
            realized_pnl: pnl,
            max_adverse_excursion: self.max_adverse_excursion,
            max_favorable_excursion: self.max_favorable_excursion,
            days_held: self.days_held(exit_date),
            legs: self.legs.clone(),
        })
    }
}

/// A completed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub position_id: u64,
    pub strategy: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub exit_reason: ExitReason,
    pub entry_premium: Decimal,
    pub exit_cost: Decimal,
    pub commissions: Decimal,
    pub realized_pnl: Decimal,
    pub max_adverse_excursion: Decimal,
    pub max_favorable_excursion: Decimal,
    pub days_held: i64,
    pub legs: Vec<PositionLeg>,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }

    pub fn is_loser(&self) -> bool {
        self.realized_pnl < Decimal::ZERO
    }
}
