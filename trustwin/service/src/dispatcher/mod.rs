// Copyright (c) 2024 The Botho Foundation

//! Payout dispatch.
//!
//! Moving money is an external capability behind [`PayoutSender`]:
//! - Log (dry run, always accepts)
//! - Webhook (HTTP POST to a payout service)
//!
//! [`PayoutDispatcher`] wraps a sender with a timeout and records every
//! attempt in the ledger's payout table. Before sending it claims the
//! payout row with a compare-and-set, so concurrent dispatchers (inline,
//! recovery loop, another process) never send the same payout twice. A
//! failed dispatch is logged and raised as an alert; it never unwinds the
//! ticket credit or winner record that caused it.

mod log;
mod webhook;

pub use self::log::LogPayoutSender;
pub use self::webhook::WebhookPayoutSender;

use async_trait::async_trait;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};
use trustwin_core::{
    DispatchOutcome, LedgerStore, LotteryError, LotteryEvent, LotteryResult, PayoutConfig,
    PayoutMode, PayoutRequest, PayoutStatus,
};

use crate::notifier::{publish, Notifier};

/// Something that can move money to a user.
#[async_trait]
pub trait PayoutSender: Send + Sync {
    /// Request a transfer. `Ok` means the request was accepted, not that
    /// funds have arrived.
    async fn send(&self, request: &PayoutRequest) -> anyhow::Result<()>;
}

/// Create a payout sender based on configuration.
pub fn create_sender(config: &PayoutConfig) -> anyhow::Result<Arc<dyn PayoutSender>> {
    match config.mode {
        PayoutMode::Log => Ok(Arc::new(LogPayoutSender::new())),
        PayoutMode::Webhook => {
            let url = config
                .webhook_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("webhook_url required for webhook payout mode"))?;
            Ok(Arc::new(WebhookPayoutSender::with_retries(
                url,
                config.max_retries,
                Duration::from_millis(config.retry_delay_ms),
            )?))
        }
    }
}

/// Counts from a batch re-dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub attempted: usize,
    pub accepted: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Sends payout requests and keeps the payout ledger current.
pub struct PayoutDispatcher {
    store: Arc<dyn LedgerStore>,
    sender: Arc<dyn PayoutSender>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl PayoutDispatcher {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        sender: Arc<dyn PayoutSender>,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            sender,
            notifier,
            timeout,
        }
    }

    /// Dispatch one recorded payout request.
    ///
    /// The request must already be in the payout ledger (the settlement or
    /// winner commit put it there). Only the dispatcher that moves the row
    /// into `Sending` sends it; an accepted payout yields `Accepted` and one
    /// held by another live dispatcher yields `InFlight`, both without
    /// sending. Errors are storage errors only; a refusing, failing or slow
    /// sender yields `DispatchOutcome::Failed`.
    pub async fn dispatch(&self, request: &PayoutRequest) -> LotteryResult<DispatchOutcome> {
        let claimed = self.store.begin_payout_attempt(
            request.purpose,
            &request.reference,
            Utc::now() - self.stale_after(),
        )?;

        if !claimed {
            return match self.store.get_payout(request.purpose, &request.reference)? {
                Some(record) if record.status == PayoutStatus::Accepted => {
                    info!(
                        key = %request.idempotency_key(),
                        "Payout already accepted, not sending again"
                    );
                    Ok(DispatchOutcome::Accepted)
                }
                Some(record) => {
                    info!(
                        key = %request.idempotency_key(),
                        status = %record.status,
                        "Payout held by another dispatcher, not sending"
                    );
                    Ok(DispatchOutcome::InFlight)
                }
                None => Err(LotteryError::Storage(format!(
                    "Payout {} is not recorded",
                    request.idempotency_key()
                ))),
            };
        }

        let outcome = match tokio::time::timeout(self.timeout, self.sender.send(request)).await {
            Ok(Ok(())) => DispatchOutcome::Accepted,
            Ok(Err(e)) => DispatchOutcome::Failed(format!("{:#}", e)),
            Err(_) => DispatchOutcome::Failed(format!(
                "timed out after {}s",
                self.timeout.as_secs_f64()
            )),
        };

        self.store.update_payout_status(
            request.purpose,
            &request.reference,
            &PayoutStatus::from(&outcome),
        )?;

        match &outcome {
            DispatchOutcome::Accepted => {
                info!(
                    key = %request.idempotency_key(),
                    recipient = %request.recipient,
                    amount = %request.amount,
                    "Payout accepted"
                );
            }
            DispatchOutcome::Failed(reason) => {
                error!(
                    key = %request.idempotency_key(),
                    recipient = %request.recipient,
                    amount = %request.amount,
                    "Payout dispatch failed: {}",
                    reason
                );
                publish(
                    self.notifier.as_ref(),
                    LotteryEvent::DispatchFailed {
                        purpose: request.purpose,
                        reference: request.reference.clone(),
                        recipient: request.recipient,
                        amount: request.amount,
                        reason: reason.clone(),
                    },
                )
                .await;
            }
            DispatchOutcome::InFlight => {}
        }

        Ok(outcome)
    }

    /// How long a `Sending` row may go untouched before its dispatcher is
    /// taken to have died. Every send is cut off at `timeout`.
    fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.timeout * 2).unwrap_or_else(|_| chrono::Duration::days(1))
    }

    /// Re-dispatch payouts that were never accepted, oldest first.
    ///
    /// Failed payouts are only retried when `include_failed` is set; the
    /// background recovery loop leaves them for an operator. Payouts another
    /// dispatcher is sending count as skipped.
    pub async fn retry_unsettled(&self, include_failed: bool) -> LotteryResult<RetrySummary> {
        let payouts = self.store.unsettled_payouts(include_failed)?;
        let mut summary = RetrySummary::default();

        for record in payouts {
            if record.request.amount.is_zero() {
                warn!(
                    key = %record.request.idempotency_key(),
                    "Skipping zero-amount payout"
                );
                summary.skipped += 1;
                continue;
            }

            match self.dispatch(&record.request).await? {
                DispatchOutcome::Accepted => {
                    summary.attempted += 1;
                    summary.accepted += 1;
                }
                DispatchOutcome::Failed(_) => {
                    summary.attempted += 1;
                    summary.failed += 1;
                }
                DispatchOutcome::InFlight => summary.skipped += 1,
            }
        }

        if summary.attempted > 0 {
            info!(
                attempted = summary.attempted,
                accepted = summary.accepted,
                failed = summary.failed,
                "Payout retry pass complete"
            );
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::Database, notifier::BroadcastNotifier};
    use chrono::{NaiveDate, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use trustwin_core::{Amount, PayoutPurpose, UserId, WinnerRecord};

    struct FlakySender {
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PayoutSender for FlakySender {
        async fn send(&self, _request: &PayoutRequest) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("wallet offline");
            }
            Ok(())
        }
    }

    struct SlowSender {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PayoutSender for SlowSender {
        async fn send(&self, _request: &PayoutRequest) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    struct StuckSender;

    #[async_trait]
    impl PayoutSender for StuckSender {
        async fn send(&self, _request: &PayoutRequest) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn recorded_prize(db: &Database) -> PayoutRequest {
        let date = NaiveDate::from_ymd_opt(2025, 5, 13).unwrap();
        let request = PayoutRequest::prize(date, UserId(1), None, Amount::from_micros(2_000_000));
        assert!(db.try_set_drawn(date).unwrap());
        db.commit_winner(
            &WinnerRecord {
                date,
                user_id: UserId(1),
                prize: request.amount,
                tickets_sold: 1,
                winning_ticket: 0,
                payout: PayoutStatus::Pending,
                created_at: Utc::now(),
            },
            &request,
        )
        .unwrap();
        request
    }

    #[tokio::test]
    async fn test_failed_then_retried() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let request = recorded_prize(&db);

        let sender = Arc::new(FlakySender {
            fail: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let notifier = Arc::new(BroadcastNotifier::new(8));
        let mut events = notifier.subscribe();
        let dispatcher = PayoutDispatcher::new(
            Arc::new(db.clone()),
            sender.clone(),
            notifier,
            Duration::from_secs(5),
        );

        let outcome = dispatcher.dispatch(&request).await.unwrap();
        assert!(!outcome.is_accepted());
        assert_eq!(events.recv().await.unwrap().name(), "dispatch_failed");

        // Failed payouts wait for an explicit retry.
        assert_eq!(dispatcher.retry_unsettled(false).await.unwrap().attempted, 0);

        sender.fail.store(false, Ordering::SeqCst);
        let summary = dispatcher.retry_unsettled(true).await.unwrap();
        assert_eq!(summary.accepted, 1);

        let record = db
            .get_payout(PayoutPurpose::Prize, &request.reference)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, PayoutStatus::Accepted);
        assert_eq!(record.attempts, 2);

        // Accepted payouts are never sent twice.
        dispatcher.dispatch(&request).await.unwrap();
        assert_eq!(sender.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let request = recorded_prize(&db);

        let dispatcher = PayoutDispatcher::new(
            Arc::new(db.clone()),
            Arc::new(StuckSender),
            Arc::new(BroadcastNotifier::new(8)),
            Duration::from_secs(1),
        );

        match dispatcher.dispatch(&request).await.unwrap() {
            DispatchOutcome::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_sends_once() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let request = recorded_prize(&db);

        let sender = Arc::new(SlowSender {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = PayoutDispatcher::new(
            Arc::new(db.clone()),
            sender.clone(),
            Arc::new(BroadcastNotifier::new(8)),
            Duration::from_secs(5),
        );

        // The inline dispatch and a recovery pass race on one prize.
        let (inline, retry) = tokio::join!(
            dispatcher.dispatch(&request),
            dispatcher.retry_unsettled(false)
        );
        assert_eq!(inline.unwrap(), DispatchOutcome::Accepted);
        let retry = retry.unwrap();
        assert_eq!(retry.attempted, 0);
        assert_eq!(retry.skipped, 1);

        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        let record = db
            .get_payout(PayoutPurpose::Prize, &request.reference)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, PayoutStatus::Accepted);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_dead_sender_is_taken_over() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let request = recorded_prize(&db);

        // A process claimed the payout and died before recording a result.
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        assert!(db
            .begin_payout_attempt(PayoutPurpose::Prize, &request.reference, long_ago)
            .unwrap());
        db.execute_raw("UPDATE payouts SET updated_at = updated_at - 3600")
            .unwrap();

        let sender = Arc::new(FlakySender {
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = PayoutDispatcher::new(
            Arc::new(db.clone()),
            sender.clone(),
            Arc::new(BroadcastNotifier::new(8)),
            Duration::from_secs(5),
        );

        let summary = dispatcher.retry_unsettled(false).await.unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert!(db.unsettled_payouts(true).unwrap().is_empty());
    }
}
