// Copyright (c) 2024 The Botho Foundation

//! Error types for the lottery ledger.

use chrono::NaiveDate;
use displaydoc::Display;
use thiserror::Error;

use crate::{claim::ClaimId, money::Amount, user::UserId};

/// Errors surfaced to the caller of a ledger operation.
///
/// Idempotent repeats (settling a settled claim, drawing a drawn date) are
/// not errors; they come back as outcome variants.
#[derive(Debug, Display, Error)]
pub enum LotteryError {
    /// Invalid amount: {quantity} ticket(s) cost {expected}, claimed {claimed}
    InvalidAmount {
        expected: Amount,
        claimed: Amount,
        quantity: u32,
    },

    /// Ticket quantity must be at least one
    InvalidQuantity,

    /// Claim not found: {0}
    ClaimNotFound(ClaimId),

    /// User not found: {0}
    UserNotFound(UserId),

    /// Inconsistent ledger state for {date} (prize {prize}): {detail}
    InconsistentState {
        date: NaiveDate,
        prize: Amount,
        detail: String,
    },

    /// Arithmetic overflow
    Overflow,

    /// Invalid amount literal: {0}
    ParseAmount(String),

    /// Storage error: {0}
    Storage(String),

    /// Configuration error: {0}
    Config(String),
}

/// Result type for ledger operations.
pub type LotteryResult<T> = Result<T, LotteryError>;
