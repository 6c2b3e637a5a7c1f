// Copyright (c) 2024 The Botho Foundation

//! The ledger store boundary.
//!
//! The store is the single source of truth for users, ticket counts,
//! claims, draws and payouts. Reconciler and draw engine keep no business
//! state of their own between calls.
//!
//! Mutations that must not interleave are single store operations:
//! - [`LedgerStore::increment_ticket_count`] is an atomic upsert-increment.
//! - [`LedgerStore::settle_claim`] compare-and-sets the claim out of
//!   `Submitted`, credits the tickets and records the referral payout in one
//!   transaction.
//! - [`LedgerStore::try_set_drawn`] compare-and-sets a per-date flag.
//! - [`LedgerStore::commit_winner`] writes the winner and its pending prize
//!   payout in one transaction.
//! - [`LedgerStore::begin_payout_attempt`] compare-and-sets a payout into
//!   `Sending`, so only one dispatcher sends it.

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    claim::{ClaimId, ClaimTransition, PaymentClaim},
    draw::{DrawRecord, Participant, WinnerRecord},
    error::LotteryResult,
    payout::{PayoutPurpose, PayoutRecord, PayoutRequest, PayoutStatus},
    user::{User, UserId},
};

/// Durable ledger operations.
pub trait LedgerStore: Send + Sync {
    // === Users ===

    /// Insert the user if absent. Returns the stored user and whether this
    /// call created it; an existing user is never modified.
    fn register_user(&self, user: &User) -> LotteryResult<(User, bool)>;

    fn get_user(&self, id: UserId) -> LotteryResult<Option<User>>;

    fn count_users(&self) -> LotteryResult<u64>;

    // === Claims ===

    /// Store a new claim. A payout address on the claim becomes the
    /// user's payout address in the same transaction; fails with
    /// `UserNotFound` (storing nothing) if the user is unknown.
    fn insert_claim(&self, claim: &PaymentClaim) -> LotteryResult<()>;

    fn get_claim(&self, id: &ClaimId) -> LotteryResult<Option<PaymentClaim>>;

    /// Claims still waiting for verification, oldest first.
    fn pending_claims(&self) -> LotteryResult<Vec<PaymentClaim>>;

    /// Move a `Submitted` claim to `Settled`, crediting its tickets and
    /// recording `referral` as a pending payout, all or nothing.
    fn settle_claim(
        &self,
        id: &ClaimId,
        actor: &str,
        referral: Option<&PayoutRequest>,
        at: DateTime<Utc>,
    ) -> LotteryResult<ClaimTransition>;

    /// Move a `Submitted` claim to `Rejected`. No ledger side effects.
    fn reject_claim(
        &self,
        id: &ClaimId,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> LotteryResult<ClaimTransition>;

    // === Tickets ===

    /// Atomically add `delta` to the (user, date) count. Returns the new
    /// count.
    fn increment_ticket_count(&self, user: UserId, date: NaiveDate, delta: u64)
        -> LotteryResult<u64>;

    fn ticket_count(&self, user: UserId, date: NaiveDate) -> LotteryResult<u64>;

    /// Total settled tickets for a date.
    fn total_tickets(&self, date: NaiveDate) -> LotteryResult<u64>;

    /// Users holding at least one ticket for a date.
    fn participants(&self, date: NaiveDate) -> LotteryResult<Vec<Participant>>;

    // === Draws ===

    /// Claim the date for drawing. Returns `false` if it was already claimed.
    fn try_set_drawn(&self, date: NaiveDate) -> LotteryResult<bool>;

    /// Give back an in-progress claim on a date (after an aborted draw).
    /// Returns `true` if an in-progress row was removed; terminal draws
    /// are never touched.
    fn release_draw(&self, date: NaiveDate) -> LotteryResult<bool>;

    /// Dates still in progress whose claim was taken before `started_before`.
    fn stale_draws(&self, started_before: DateTime<Utc>) -> LotteryResult<Vec<NaiveDate>>;

    /// Mark an in-progress date as drawn with no winner.
    fn record_no_winner(&self, date: NaiveDate) -> LotteryResult<()>;

    /// Commit the winner of an in-progress date together with the pending
    /// prize payout. This is the draw's commit point.
    fn commit_winner(&self, winner: &WinnerRecord, prize: &PayoutRequest) -> LotteryResult<()>;

    fn get_draw(&self, date: NaiveDate) -> LotteryResult<Option<DrawRecord>>;

    /// Most recent winners, newest first.
    fn latest_winners(&self, limit: usize) -> LotteryResult<Vec<WinnerRecord>>;

    // === Payouts ===

    fn get_payout(
        &self,
        purpose: PayoutPurpose,
        reference: &str,
    ) -> LotteryResult<Option<PayoutRecord>>;

    /// Claim a payout for sending: moves it to `Sending` and counts the
    /// attempt, as one compare-and-set.
    ///
    /// Succeeds from `Pending` or `Failed`, or from a `Sending` row last
    /// touched before `stale_before` (its dispatcher died mid-send).
    /// Returns `false` if the payout is accepted, unknown, or held by a
    /// live dispatcher.
    fn begin_payout_attempt(
        &self,
        purpose: PayoutPurpose,
        reference: &str,
        stale_before: DateTime<Utc>,
    ) -> LotteryResult<bool>;

    fn update_payout_status(
        &self,
        purpose: PayoutPurpose,
        reference: &str,
        status: &PayoutStatus,
    ) -> LotteryResult<()>;

    /// Payouts not yet accepted (pending or sending), oldest first; failed
    /// ones only if asked.
    fn unsettled_payouts(&self, include_failed: bool) -> LotteryResult<Vec<PayoutRecord>>;

    // === Audit ===

    /// Append an audit entry.
    fn log_audit(&self, subject: &str, action: &str, details: &str) -> LotteryResult<()>;
}
