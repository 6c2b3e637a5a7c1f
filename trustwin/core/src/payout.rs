// Copyright (c) 2024 The Botho Foundation

//! Payout requests and their durable status.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{claim::ClaimId, money::Amount, user::UserId};

/// Why money is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutPurpose {
    /// Commission to the referrer of a settled claim
    Referral,
    /// Daily draw prize
    Prize,
}

impl fmt::Display for PayoutPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutPurpose::Referral => write!(f, "referral"),
            PayoutPurpose::Prize => write!(f, "prize"),
        }
    }
}

impl std::str::FromStr for PayoutPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "referral" => Ok(PayoutPurpose::Referral),
            "prize" => Ok(PayoutPurpose::Prize),
            _ => Err(format!("Unknown payout purpose: {}", s)),
        }
    }
}

/// A request to move money to a user.
///
/// `(purpose, reference)` identifies the request; it doubles as the
/// idempotency key handed to the external sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub purpose: PayoutPurpose,

    /// Claim id for referrals, draw date for prizes
    pub reference: String,

    pub recipient: UserId,

    /// Recipient wallet, if known
    pub address: Option<String>,

    pub amount: Amount,
}

impl PayoutRequest {
    pub fn referral(
        claim_id: ClaimId,
        referrer: UserId,
        address: Option<String>,
        amount: Amount,
    ) -> Self {
        Self {
            purpose: PayoutPurpose::Referral,
            reference: claim_id.to_string(),
            recipient: referrer,
            address,
            amount,
        }
    }

    pub fn prize(date: NaiveDate, winner: UserId, address: Option<String>, amount: Amount) -> Self {
        Self {
            purpose: PayoutPurpose::Prize,
            reference: date.to_string(),
            recipient: winner,
            address,
            amount,
        }
    }

    /// Idempotency key for the external sender.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.purpose, self.reference)
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The sender took the request
    Accepted,
    /// The sender refused, errored or timed out
    Failed(String),
    /// Another dispatcher holds the payout; nothing was sent
    InFlight,
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchOutcome::Accepted)
    }
}

/// Durable status of a payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Recorded, not yet accepted by the sender
    Pending,
    /// Claimed by a dispatcher that is sending it now
    Sending,
    /// Accepted by the sender
    Accepted,
    /// Last attempt failed; needs operator attention
    Failed { reason: String },
}

impl PayoutStatus {
    pub fn key(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Sending => "sending",
            PayoutStatus::Accepted => "accepted",
            PayoutStatus::Failed { .. } => "failed",
        }
    }
}

impl std::str::FromStr for PayoutStatus {
    type Err = String;

    /// Parse a status key. A failure reason is not part of the key and
    /// comes back empty.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "sending" => Ok(PayoutStatus::Sending),
            "accepted" => Ok(PayoutStatus::Accepted),
            "failed" => Ok(PayoutStatus::Failed {
                reason: String::new(),
            }),
            _ => Err(format!("Unknown payout status: {}", s)),
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutStatus::Failed { reason } => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.key()),
        }
    }
}

impl From<&DispatchOutcome> for PayoutStatus {
    fn from(outcome: &DispatchOutcome) -> Self {
        match outcome {
            DispatchOutcome::Accepted => PayoutStatus::Accepted,
            DispatchOutcome::Failed(reason) => PayoutStatus::Failed {
                reason: reason.clone(),
            },
            DispatchOutcome::InFlight => PayoutStatus::Sending,
        }
    }
}

/// A payout row in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub request: PayoutRequest,
    pub status: PayoutStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
