// Copyright (c) 2024 The Botho Foundation

//! Payment claims and their state machine.
//!
//! ```text
//! Submitted ──settle──> Settled
//!     │
//!     └──────reject───> Rejected
//! ```
//!
//! A claim enters a terminal state at most once. Repeating a transition on a
//! terminal claim reports the existing state instead of applying it again.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::{
    config::PricingConfig,
    error::{LotteryError, LotteryResult},
    money::Amount,
    payout::PayoutRecord,
    user::UserId,
};

/// Unique claim identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(pub Uuid);

impl ClaimId {
    pub fn new() -> Self {
        ClaimId(Uuid::new_v4())
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClaimId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(ClaimId)
            .map_err(|e| format!("Invalid claim id {}: {}", s, e))
    }
}

/// Lifecycle state of a payment claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Waiting for an admin to verify the payment
    Submitted,

    /// Payment verified, tickets credited
    Settled,

    /// Payment could not be verified
    Rejected { reason: String },
}

impl ClaimStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClaimStatus::Submitted)
    }

    /// Storage key for the state, without the rejection reason.
    pub fn key(&self) -> &'static str {
        match self {
            ClaimStatus::Submitted => "submitted",
            ClaimStatus::Settled => "settled",
            ClaimStatus::Rejected { .. } => "rejected",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimStatus::Rejected { reason } => write!(f, "rejected: {}", reason),
            other => write!(f, "{}", other.key()),
        }
    }
}

/// A user's assertion of having paid for tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentClaim {
    pub id: ClaimId,

    pub user_id: UserId,

    /// Amount the user says they paid
    pub amount: Amount,

    /// Number of tickets claimed
    pub quantity: u32,

    /// Draw date the tickets count towards
    pub date: NaiveDate,

    /// Wallet the payment was sent from, if given
    pub payout_address: Option<String>,

    pub status: ClaimStatus,

    /// Actor that settled or rejected the claim
    pub resolved_by: Option<String>,

    /// The user's ticket total for `date` right after this claim settled
    pub tickets_after: Option<u64>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl PaymentClaim {
    /// Validate a purchase and build a claim in the `Submitted` state.
    ///
    /// The claimed amount must equal `quantity x ticket_price` exactly.
    pub fn submit(
        user_id: UserId,
        amount: Amount,
        quantity: u32,
        date: NaiveDate,
        payout_address: Option<String>,
        pricing: &PricingConfig,
    ) -> LotteryResult<Self> {
        if quantity == 0 {
            return Err(LotteryError::InvalidQuantity);
        }
        let expected = pricing.expected_amount(quantity)?;
        if amount != expected {
            return Err(LotteryError::InvalidAmount {
                expected,
                claimed: amount,
                quantity,
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: ClaimId::new(),
            user_id,
            amount,
            quantity,
            date,
            payout_address: payout_address.filter(|a| !a.trim().is_empty()),
            status: ClaimStatus::Submitted,
            resolved_by: None,
            tickets_after: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Result of asking the store to move a claim out of `Submitted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimTransition {
    /// This call performed the transition; holds the updated claim
    Applied(PaymentClaim),

    /// The claim was already terminal; holds it unchanged
    AlreadyTerminal(PaymentClaim),
}

/// A settled claim, as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub claim_id: ClaimId,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub quantity: u32,

    /// The user's ticket total for `date` right after settlement
    pub tickets_total: u64,

    pub settled_by: Option<String>,

    /// Referral commission paid for this claim, if any
    pub referral: Option<PayoutRecord>,
}

impl Settlement {
    pub fn from_claim(claim: &PaymentClaim, referral: Option<PayoutRecord>) -> Self {
        Self {
            claim_id: claim.id,
            user_id: claim.user_id,
            date: claim.date,
            quantity: claim.quantity,
            tickets_total: claim.tickets_after.unwrap_or_default(),
            settled_by: claim.resolved_by.clone(),
            referral,
        }
    }
}

/// Outcome of `SettleClaim`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementResult {
    /// First settlement: tickets were credited by this call
    Settled(Settlement),

    /// The claim had already settled; the original result is reported
    AlreadySettled(Settlement),

    /// The claim had been rejected; nothing was credited
    AlreadyRejected { claim_id: ClaimId, reason: String },
}

impl SettlementResult {
    /// The user's ticket total for the claim's date, if the claim settled.
    pub fn tickets_total(&self) -> Option<u64> {
        match self {
            SettlementResult::Settled(s) | SettlementResult::AlreadySettled(s) => {
                Some(s.tickets_total)
            }
            SettlementResult::AlreadyRejected { .. } => None,
        }
    }

    /// Whether this call credited the tickets.
    pub fn is_first_settlement(&self) -> bool {
        matches!(self, SettlementResult::Settled(_))
    }
}
