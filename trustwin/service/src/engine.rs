// Copyright (c) 2024 The Botho Foundation

//! Lottery engine - schedules the daily draw and ledger recovery.

use chrono::Utc;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use trustwin_core::{DrawOutcome, LotteryError};

use crate::service::LotteryService;

/// Shutdown signal type.
pub type ShutdownSignal = broadcast::Receiver<()>;

/// Runs the background tasks around a [`LotteryService`].
pub struct LotteryEngine {
    service: Arc<LotteryService>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LotteryEngine {
    pub fn new(service: Arc<LotteryService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            service,
            shutdown_tx,
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        })
        .await
    }

    /// Run until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Starting lottery engine");

        let draw_scheduler = DrawScheduler::new(self.service.clone(), self.shutdown_tx.subscribe());
        let draw_handle = tokio::spawn(async move {
            if let Err(e) = draw_scheduler.run().await {
                error!("Draw scheduler error: {}", e);
            }
        });

        let recovery = LedgerRecovery::new(self.service.clone(), self.shutdown_tx.subscribe());
        let recovery_handle = tokio::spawn(async move { recovery.run().await });

        shutdown.await;

        // Send shutdown signal to all components
        let _ = self.shutdown_tx.send(());

        // Wait for all components to finish
        let _ = tokio::join!(draw_handle, recovery_handle);

        info!("Lottery engine stopped");
        Ok(())
    }
}

/// Sleeps until each configured draw instant and draws the due date.
struct DrawScheduler {
    service: Arc<LotteryService>,
    shutdown: ShutdownSignal,
}

impl DrawScheduler {
    fn new(service: Arc<LotteryService>, shutdown: ShutdownSignal) -> Self {
        Self { service, shutdown }
    }

    async fn run(mut self) -> Result<(), LotteryError> {
        let draw_config = self.service.config().draw.clone();

        loop {
            let now = Utc::now();
            let next = draw_config.next_draw_at(now)?;
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(at = %next, "Next draw scheduled");

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Draw scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    let date = draw_config.draw_date_for(next)?;
                    match self.service.draws().draw(date).await {
                        Ok(DrawOutcome::Winner(record)) => {
                            info!(date = %date, winner = %record.user_id, "Scheduled draw complete");
                        }
                        Ok(DrawOutcome::NoWinner { .. }) => {
                            info!(date = %date, "Scheduled draw complete, no winner");
                        }
                        Ok(DrawOutcome::AlreadyDrawn(_)) => {
                            warn!(date = %date, "Scheduled draw skipped, date already drawn");
                        }
                        Err(e) => {
                            error!(date = %date, "Scheduled draw failed: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// At startup and then periodically:
/// - re-draws dates whose draw died between claiming and committing
/// - re-dispatches pending payouts
struct LedgerRecovery {
    service: Arc<LotteryService>,
    shutdown: ShutdownSignal,
}

impl LedgerRecovery {
    fn new(service: Arc<LotteryService>, shutdown: ShutdownSignal) -> Self {
        Self { service, shutdown }
    }

    async fn run(mut self) {
        let period = Duration::from_secs(self.service.config().payout.recovery_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Ledger recovery shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.recover_draws().await;
                    if let Err(e) = self.service.retry_payouts(false).await {
                        error!("Payout recovery error: {}", e);
                    }
                }
            }
        }
    }

    async fn recover_draws(&self) {
        let max_age = chrono::Duration::seconds(self.service.config().draw.stale_after_secs as i64);
        let released = match self.service.draws().release_stale(max_age) {
            Ok(released) => released,
            Err(e) => {
                error!("Draw recovery error: {}", e);
                return;
            }
        };

        for date in released {
            match self.service.draws().draw(date).await {
                Ok(DrawOutcome::Winner(record)) => {
                    info!(date = %date, winner = %record.user_id, "Recovered draw complete");
                }
                Ok(outcome) => info!(date = %date, "Recovered draw: {:?}", outcome),
                Err(e) => error!(date = %date, "Recovered draw failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::Database,
        dispatcher::{LogPayoutSender, PayoutSender},
        notifier::BroadcastNotifier,
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use trustwin_core::{
        Amount, DrawStatus, LedgerStore, LotteryConfig, PayoutPurpose, PayoutRequest,
        PayoutStatus, UserId, WinnerRecord,
    };

    #[tokio::test]
    async fn test_recovery_dispatches_pending_prize_at_startup() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        // A winner committed before a crash, prize never sent.
        let date = NaiveDate::from_ymd_opt(2025, 5, 13).unwrap();
        let request = PayoutRequest::prize(date, UserId(3), None, Amount::from_micros(6_000_000));
        assert!(db.try_set_drawn(date).unwrap());
        db.commit_winner(
            &WinnerRecord {
                date,
                user_id: UserId(3),
                prize: request.amount,
                tickets_sold: 3,
                winning_ticket: 2,
                payout: PayoutStatus::Pending,
                created_at: Utc::now(),
            },
            &request,
        )
        .unwrap();

        let sender: Arc<dyn PayoutSender> = Arc::new(LogPayoutSender::new());
        let service = Arc::new(LotteryService::new(
            LotteryConfig::default(),
            Arc::new(db.clone()),
            sender,
            Arc::new(BroadcastNotifier::default()),
        ));

        let engine = LotteryEngine::new(service);
        engine
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();

        let record = db
            .get_payout(PayoutPurpose::Prize, &request.reference)
            .unwrap()
            .unwrap();
        assert_eq!(record.status, PayoutStatus::Accepted);
    }

    struct NeverCalled;

    #[async_trait]
    impl PayoutSender for NeverCalled {
        async fn send(&self, _request: &PayoutRequest) -> anyhow::Result<()> {
            anyhow::bail!("no payouts expected")
        }
    }

    #[tokio::test]
    async fn test_engine_stops_on_shutdown() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let service = Arc::new(LotteryService::new(
            LotteryConfig::default(),
            Arc::new(db),
            Arc::new(NeverCalled),
            Arc::new(BroadcastNotifier::default()),
        ));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            LotteryEngine::new(service).run_until(async {}),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_recovery_redraws_stalled_date() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        // A draw claimed the date an hour ago and its process died.
        let date = NaiveDate::from_ymd_opt(2025, 5, 13).unwrap();
        db.increment_ticket_count(UserId(2), date, 3).unwrap();
        assert!(db.try_set_drawn(date).unwrap());
        db.execute_raw("UPDATE draws SET updated_at = updated_at - 3600")
            .unwrap();

        let sender: Arc<dyn PayoutSender> = Arc::new(LogPayoutSender::new());
        let service = Arc::new(LotteryService::new(
            LotteryConfig::default(),
            Arc::new(db.clone()),
            sender,
            Arc::new(BroadcastNotifier::default()),
        ));

        LotteryEngine::new(service)
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();

        let record = db.get_draw(date).unwrap().unwrap();
        assert_eq!(record.status, DrawStatus::Drawn);
        assert_eq!(record.winner.unwrap().user_id, UserId(2));
    }
}
