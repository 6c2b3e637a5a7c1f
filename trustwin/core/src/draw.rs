// Copyright (c) 2024 The Botho Foundation

//! Daily draw types and weighted winner selection.
//!
//! Per calendar date:
//!
//! ```text
//! (open) ──try_set_drawn──> InProgress ──no tickets──> NoWinner
//!                               │
//!                               └──winner committed──> Drawn
//! ```
//!
//! Selection is by ticket weight: a user holding `n` of the day's `N`
//! tickets wins with probability `n / N`. The pool stores cumulative
//! counts and binary-searches a uniformly drawn ticket index, so large
//! ticket counts never expand into a per-ticket list.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

use crate::{money::Amount, payout::PayoutStatus, user::UserId};

/// A user's ticket count for a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub tickets: u64,
}

/// Cumulative-weight selection pool for one date.
#[derive(Debug, Clone)]
pub struct WeightedPool {
    /// `(user, running total through this user)`, ascending by user id
    entries: Vec<(UserId, u64)>,
    total: u64,
}

impl WeightedPool {
    /// Build a pool. Repeated users are merged, zero counts dropped.
    ///
    /// Returns `None` when nobody holds a ticket.
    pub fn new(participants: &[Participant]) -> Option<Self> {
        let mut merged: BTreeMap<UserId, u64> = BTreeMap::new();
        for p in participants.iter().filter(|p| p.tickets > 0) {
            let entry = merged.entry(p.user_id).or_default();
            *entry = entry.checked_add(p.tickets)?;
        }

        let mut total: u64 = 0;
        let mut entries = Vec::with_capacity(merged.len());
        for (user_id, tickets) in merged {
            total = total.checked_add(tickets)?;
            entries.push((user_id, total));
        }

        if total == 0 {
            return None;
        }
        Some(Self { entries, total })
    }

    /// Total tickets in the pool.
    pub fn total_tickets(&self) -> u64 {
        self.total
    }

    /// Number of distinct users in the pool.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The holder of ticket `index` (0-based, `index < total_tickets`).
    pub fn holder_of(&self, index: u64) -> Option<UserId> {
        if index >= self.total {
            return None;
        }
        let pos = self.entries.partition_point(|(_, cumulative)| *cumulative <= index);
        self.entries.get(pos).map(|(user_id, _)| *user_id)
    }

    /// Draw one ticket uniformly; returns the ticket index and its holder.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> (u64, UserId) {
        let ticket = rng.gen_range(0..self.total);
        // In range by construction, so the holder always exists.
        let holder = self
            .holder_of(ticket)
            .unwrap_or_else(|| self.entries[self.entries.len() - 1].0);
        (ticket, holder)
    }
}

/// Progress of a date's draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawStatus {
    /// Claimed by a running draw
    InProgress,
    /// No tickets were sold; terminal
    NoWinner,
    /// Winner committed; terminal
    Drawn,
}

impl DrawStatus {
    pub fn key(&self) -> &'static str {
        match self {
            DrawStatus::InProgress => "in_progress",
            DrawStatus::NoWinner => "no_winner",
            DrawStatus::Drawn => "drawn",
        }
    }
}

impl fmt::Display for DrawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl std::str::FromStr for DrawStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(DrawStatus::InProgress),
            "no_winner" => Ok(DrawStatus::NoWinner),
            "drawn" => Ok(DrawStatus::Drawn),
            _ => Err(format!("Unknown draw status: {}", s)),
        }
    }
}

/// The settled winner of a date. At most one per date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerRecord {
    pub date: NaiveDate,
    pub user_id: UserId,
    pub prize: Amount,

    /// Tickets in the pool at draw time
    pub tickets_sold: u64,

    /// Index of the drawn ticket within the pool
    pub winning_ticket: u64,

    /// Status of the prize payout
    pub payout: PayoutStatus,

    pub created_at: DateTime<Utc>,
}

/// A date's draw row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRecord {
    pub date: NaiveDate,
    pub status: DrawStatus,
    pub winner: Option<WinnerRecord>,
}

/// Outcome of `Draw(date)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOutcome {
    /// A winner was selected and committed by this call
    Winner(WinnerRecord),

    /// No tickets were sold for the date
    NoWinner { date: NaiveDate },

    /// The date was already drawn (or is being drawn); nothing changed
    AlreadyDrawn(DrawRecord),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn participant(id: i64, tickets: u64) -> Participant {
        Participant {
            user_id: UserId(id),
            tickets,
        }
    }

    #[test]
    fn test_empty_pool() {
        assert!(WeightedPool::new(&[]).is_none());
        assert!(WeightedPool::new(&[participant(1, 0)]).is_none());
    }

    #[test]
    fn test_holder_boundaries() {
        let pool =
            WeightedPool::new(&[participant(1, 2), participant(2, 1), participant(3, 3)]).unwrap();
        assert_eq!(pool.total_tickets(), 6);

        let holders: Vec<_> = (0..6).map(|i| pool.holder_of(i).unwrap().0).collect();
        assert_eq!(holders, vec![1, 1, 2, 3, 3, 3]);
        assert_eq!(pool.holder_of(6), None);
    }

    #[test]
    fn test_repeated_users_merge() {
        let pool =
            WeightedPool::new(&[participant(5, 1), participant(4, 2), participant(5, 3)]).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.total_tickets(), 6);
        assert_eq!(pool.holder_of(1), Some(UserId(4)));
        assert_eq!(pool.holder_of(2), Some(UserId(5)));
    }

    #[test]
    fn test_single_participant_always_wins() {
        let pool = WeightedPool::new(&[participant(8, 1_000_000_000)]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(pool.select(&mut rng).1, UserId(8));
        }
    }

    #[test]
    fn test_selection_is_weighted() {
        let pool = WeightedPool::new(&[participant(1, 1), participant(2, 3)]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let draws = 40_000;
        let mut wins_a = 0u32;
        let mut wins_b = 0u32;
        for _ in 0..draws {
            match pool.select(&mut rng).1 {
                UserId(1) => wins_a += 1,
                _ => wins_b += 1,
            }
        }

        let ratio = wins_b as f64 / wins_a as f64;
        assert!(
            (2.8..3.2).contains(&ratio),
            "expected ~3x, got {} ({} vs {})",
            ratio,
            wins_b,
            wins_a
        );
    }
}
