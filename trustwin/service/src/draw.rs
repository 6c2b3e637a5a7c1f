// Copyright (c) 2024 The Botho Foundation

//! Draw engine.
//!
//! Runs the once-per-date draw:
//! 1. Claim the date with the store's compare-and-set flag
//! 2. Compute the prize and cross-check the ticket rows
//! 3. Select a ticket uniformly by weight
//! 4. Commit the winner with its pending prize payout
//! 5. Dispatch the prize
//!
//! Step 4 is the commit point. A crash after it leaves a pending prize
//! payout that the recovery loop picks up; it never redraws.

use chrono::{NaiveDate, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::Arc;
use tracing::{error, info, warn};
use trustwin_core::{
    compute_prize, Amount, DrawOutcome, DrawRecord, DrawStatus, LedgerStore, LotteryError,
    LotteryEvent, LotteryResult, PayoutRequest, PayoutStatus, PricingConfig, UserId,
    WeightedPool, WinnerRecord,
};

use crate::{
    dispatcher::PayoutDispatcher,
    notifier::{publish, Notifier},
};

/// A selected but not yet committed winner.
struct Selection {
    prize: Amount,
    tickets_sold: u64,
    winning_ticket: u64,
    winner: UserId,
}

/// Stateless draw driver. All state lives in the store.
pub struct DrawEngine {
    store: Arc<dyn LedgerStore>,
    pricing: PricingConfig,
    dispatcher: Arc<PayoutDispatcher>,
    notifier: Arc<dyn Notifier>,
}

impl DrawEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        pricing: PricingConfig,
        dispatcher: Arc<PayoutDispatcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            pricing,
            dispatcher,
            notifier,
        }
    }

    /// The prize payable for `date` from its settled tickets.
    ///
    /// Pure read; safe to call for live display as often as needed.
    pub fn compute_prize(&self, date: NaiveDate) -> LotteryResult<Amount> {
        let total = self.store.total_tickets(date)?;
        Ok(compute_prize(total, &self.pricing))
    }

    /// Draw `date` with a freshly seeded generator.
    pub async fn draw(&self, date: NaiveDate) -> LotteryResult<DrawOutcome> {
        let mut rng = ChaCha20Rng::from_entropy();
        self.draw_with_rng(date, &mut rng).await
    }

    /// Draw `date` using `rng` for selection.
    pub async fn draw_with_rng<R: Rng + Send + ?Sized>(
        &self,
        date: NaiveDate,
        rng: &mut R,
    ) -> LotteryResult<DrawOutcome> {
        if !self.store.try_set_drawn(date)? {
            let record = self.store.get_draw(date)?.unwrap_or(DrawRecord {
                date,
                status: DrawStatus::InProgress,
                winner: None,
            });
            info!(date = %date, status = %record.status, "Date already drawn");
            return Ok(DrawOutcome::AlreadyDrawn(record));
        }

        let selection = match self.select(date, rng) {
            Ok(selection) => selection,
            Err(e) => {
                self.abort(date, &e).await;
                return Err(e);
            }
        };

        let Some(selection) = selection else {
            if let Err(e) = self.store.record_no_winner(date) {
                self.abort(date, &e).await;
                return Err(e);
            }

            info!(date = %date, "Empty prize pool, no winner");
            publish(
                self.notifier.as_ref(),
                LotteryEvent::DrawCompleted {
                    date,
                    winner: None,
                    prize: Amount::ZERO,
                    tickets_sold: 0,
                },
            )
            .await;
            return Ok(DrawOutcome::NoWinner { date });
        };

        let address = match self.store.get_user(selection.winner) {
            Ok(user) => user.and_then(|user| user.payout_address),
            Err(e) => {
                self.abort(date, &e).await;
                return Err(e);
            }
        };
        let request = PayoutRequest::prize(date, selection.winner, address, selection.prize);

        let mut record = WinnerRecord {
            date,
            user_id: selection.winner,
            prize: selection.prize,
            tickets_sold: selection.tickets_sold,
            winning_ticket: selection.winning_ticket,
            payout: PayoutStatus::Pending,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.commit_winner(&record, &request) {
            self.abort(date, &e).await;
            return Err(e);
        }

        info!(
            date = %date,
            winner = %record.user_id,
            prize = %record.prize,
            ticket = record.winning_ticket,
            tickets_sold = record.tickets_sold,
            "Winner selected"
        );

        publish(
            self.notifier.as_ref(),
            LotteryEvent::DrawCompleted {
                date,
                winner: Some(record.user_id),
                prize: record.prize,
                tickets_sold: record.tickets_sold,
            },
        )
        .await;

        // The winner stands whatever the dispatch outcome.
        match self.dispatcher.dispatch(&request).await {
            Ok(outcome) => record.payout = PayoutStatus::from(&outcome),
            Err(e) => error!(
                date = %date,
                key = %request.idempotency_key(),
                "Failed to record prize dispatch: {}",
                e
            ),
        }

        Ok(DrawOutcome::Winner(record))
    }

    /// Release `date` if a draw claimed it and never finished, so it can be
    /// drawn again. Returns `false` if the date was not stuck in progress;
    /// finished draws are never released.
    ///
    /// A second winner cannot result even if the original draw is still
    /// alive: the winner row is unique per date.
    pub fn release(&self, date: NaiveDate) -> LotteryResult<bool> {
        let released = self.store.release_draw(date)?;
        if released {
            warn!(date = %date, "Released unfinished draw");
        }
        Ok(released)
    }

    /// Release every date whose draw was claimed more than `max_age` ago
    /// and never finished (its process died mid-draw).
    pub fn release_stale(&self, max_age: chrono::Duration) -> LotteryResult<Vec<NaiveDate>> {
        let mut released = Vec::new();
        for date in self.store.stale_draws(Utc::now() - max_age)? {
            if self.release(date)? {
                released.push(date);
            }
        }
        Ok(released)
    }

    /// Compute the prize and pick a ticket. `None` when nothing is payable.
    fn select<R: Rng + ?Sized>(
        &self,
        date: NaiveDate,
        rng: &mut R,
    ) -> LotteryResult<Option<Selection>> {
        let total = self.store.total_tickets(date)?;
        let prize = compute_prize(total, &self.pricing);
        let participants = self.store.participants(date)?;

        let inconsistent = |detail: String| LotteryError::InconsistentState {
            date,
            prize,
            detail,
        };

        if participants.is_empty() && total > 0 {
            return Err(inconsistent(format!(
                "{} tickets sold but no ticket holders",
                total
            )));
        }

        let held = participants
            .iter()
            .try_fold(0u64, |acc, p| acc.checked_add(p.tickets))
            .ok_or(LotteryError::Overflow)?;
        if held != total {
            return Err(inconsistent(format!(
                "daily total is {} but holders have {}",
                total, held
            )));
        }

        if prize.is_zero() {
            return Ok(None);
        }

        let pool = WeightedPool::new(&participants)
            .ok_or_else(|| inconsistent("no ticket holders".to_string()))?;
        let (winning_ticket, winner) = pool.select(rng);

        Ok(Some(Selection {
            prize,
            tickets_sold: pool.total_tickets(),
            winning_ticket,
            winner,
        }))
    }

    /// Undo the date claim after a failed draw so it can be re-run.
    async fn abort(&self, date: NaiveDate, cause: &LotteryError) {
        if let LotteryError::InconsistentState {
            date,
            prize,
            detail,
        } = cause
        {
            error!(date = %date, prize = %prize, "Draw aborted, ledger inconsistent: {}", detail);
            publish(
                self.notifier.as_ref(),
                LotteryEvent::InconsistentState {
                    date: *date,
                    prize: *prize,
                    detail: detail.clone(),
                },
            )
            .await;
        } else {
            error!(date = %date, "Draw aborted: {}", cause);
        }

        if let Err(e) = self.store.release_draw(date) {
            warn!(date = %date, "Failed to release draw flag: {}", e);
        }
    }
}
