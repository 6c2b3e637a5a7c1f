// Copyright (c) 2024 The Botho Foundation

//! Structured events for the surrounding application to render.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    claim::{ClaimId, PaymentClaim},
    money::Amount,
    payout::PayoutPurpose,
    user::UserId,
};

/// Something the admin channel or a user should hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LotteryEvent {
    /// A claim is waiting for admin verification
    ClaimSubmitted { claim: PaymentClaim },

    /// A claim settled and its tickets were credited
    ClaimSettled {
        claim_id: ClaimId,
        user_id: UserId,
        date: NaiveDate,
        quantity: u32,
        tickets_total: u64,
    },

    ClaimRejected {
        claim_id: ClaimId,
        user_id: UserId,
        reason: String,
    },

    /// A date's draw finished, with or without a winner
    DrawCompleted {
        date: NaiveDate,
        winner: Option<UserId>,
        prize: Amount,
        tickets_sold: u64,
    },

    /// Pool and ticket rows disagree; an operator must investigate
    InconsistentState {
        date: NaiveDate,
        prize: Amount,
        detail: String,
    },

    /// A payout could not be handed to the sender
    DispatchFailed {
        purpose: PayoutPurpose,
        reference: String,
        recipient: UserId,
        amount: Amount,
        reason: String,
    },
}

impl LotteryEvent {
    /// Short name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            LotteryEvent::ClaimSubmitted { .. } => "claim_submitted",
            LotteryEvent::ClaimSettled { .. } => "claim_settled",
            LotteryEvent::ClaimRejected { .. } => "claim_rejected",
            LotteryEvent::DrawCompleted { .. } => "draw_completed",
            LotteryEvent::InconsistentState { .. } => "inconsistent_state",
            LotteryEvent::DispatchFailed { .. } => "dispatch_failed",
        }
    }

    /// Whether this event needs an operator's attention.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            LotteryEvent::InconsistentState { .. } | LotteryEvent::DispatchFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag() {
        let event = LotteryEvent::DrawCompleted {
            date: NaiveDate::from_ymd_opt(2025, 5, 13).unwrap(),
            winner: Some(UserId(3)),
            prize: Amount::from_micros(6_000_000),
            tickets_sold: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["prize"], "6.00");
        assert_eq!(json["date"], "2025-05-13");
        assert!(!event.is_alert());
    }
}
