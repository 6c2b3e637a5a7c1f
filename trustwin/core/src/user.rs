// Copyright (c) 2024 The Botho Foundation

//! Lottery participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Opaque, stable user identity (the chat platform's numeric user id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(UserId)
            .map_err(|_| format!("Invalid user id: {}", s))
    }
}

/// A registered user.
///
/// Created on first contact and never deleted. The referrer is fixed at
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,

    /// Who referred this user, if anyone
    pub referrer: Option<UserId>,

    /// Wallet the user last paid from; payouts go here
    pub payout_address: Option<String>,

    pub joined_at: DateTime<Utc>,
}

impl User {
    /// Create a user on first contact. A self-referral is discarded.
    pub fn new(id: UserId, referrer: Option<UserId>, joined_at: DateTime<Utc>) -> Self {
        Self {
            id,
            referrer: referrer.filter(|r| *r != id),
            payout_address: None,
            joined_at,
        }
    }
}
