// Copyright (c) 2024 The Botho Foundation

//! Revenue split and prize pool computation.
//!
//! # Money flow
//!
//! ```text
//! Ticket revenue (qty x price)
//!        │
//!        ├──(referral_bps)──> Referrer, dispatched at settlement
//!        ├──(tax_bps)───────> Operator fee
//!        ├──(pool_bps)──────> Daily prize pool
//!        └──(remainder)─────> Margin (unallocated)
//! ```
//!
//! Every share is rounded half-up to the micro-unit; the margin absorbs
//! whatever rounding leaves behind, so the four parts always sum to the
//! gross amount exactly.

use serde::{Deserialize, Serialize};

use crate::{
    config::PricingConfig,
    money::{mul_bps_round_half_up, Amount},
};

/// A paid amount partitioned without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub gross: Amount,
    pub referral: Amount,
    pub tax: Amount,
    pub pool: Amount,
    pub margin: Amount,
}

impl RevenueSplit {
    /// Partition `gross` by the given basis-point shares.
    ///
    /// Callers guarantee `referral_bps + tax_bps + pool_bps <= 10_000`
    /// (see [`PricingConfig::validate`]).
    pub fn new(gross: Amount, referral_bps: u32, tax_bps: u32, pool_bps: u32) -> Self {
        let referral = gross.share(referral_bps).min(gross);
        let tax = gross.share(tax_bps).min(gross.saturating_sub(referral));
        let remaining = gross.saturating_sub(referral).saturating_sub(tax);
        let pool = gross.share(pool_bps).min(remaining);
        let margin = remaining.saturating_sub(pool);

        Self {
            gross,
            referral,
            tax,
            pool,
            margin,
        }
    }

    /// Sum of all parts; always equals `gross`.
    pub fn total(&self) -> Amount {
        Amount::from_micros(
            self.referral.micros() + self.tax.micros() + self.pool.micros() + self.margin.micros(),
        )
    }
}

/// The prize payable for a day on which `total_tickets` tickets settled.
///
/// `total_tickets x price x pool_bps`, rounded half-up once at the end.
/// Zero tickets means a zero prize.
pub fn compute_prize(total_tickets: u64, pricing: &PricingConfig) -> Amount {
    if total_tickets == 0 {
        return Amount::ZERO;
    }
    let revenue = total_tickets as u128 * pricing.ticket_price.micros() as u128;
    Amount::from_micros(mul_bps_round_half_up(revenue, pricing.pool_bps))
}
