// Copyright (c) 2024 The Botho Foundation

//! The lottery service: one handle over reconciler, draw engine, payout
//! dispatcher and the read queries the chat or HTTP layer needs.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use trustwin_core::{
    Amount, LedgerStore, LotteryConfig, LotteryResult, PayoutRecord, User, UserId, WinnerRecord,
};

use crate::{
    dispatcher::{PayoutDispatcher, PayoutSender, RetrySummary},
    draw::DrawEngine,
    notifier::Notifier,
    reconciler::ClaimReconciler,
};

/// Headline numbers for a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotteryStats {
    pub date: NaiveDate,
    pub total_users: u64,
    pub tickets_sold: u64,
    pub prize_pool: Amount,
}

pub struct LotteryService {
    config: LotteryConfig,
    store: Arc<dyn LedgerStore>,
    reconciler: ClaimReconciler,
    draws: DrawEngine,
    dispatcher: Arc<PayoutDispatcher>,
}

impl LotteryService {
    pub fn new(
        config: LotteryConfig,
        store: Arc<dyn LedgerStore>,
        sender: Arc<dyn PayoutSender>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let dispatcher = Arc::new(PayoutDispatcher::new(
            store.clone(),
            sender,
            notifier.clone(),
            Duration::from_secs(config.payout.timeout_secs),
        ));
        let reconciler = ClaimReconciler::new(
            store.clone(),
            config.pricing.clone(),
            dispatcher.clone(),
            notifier.clone(),
        );
        let draws = DrawEngine::new(
            store.clone(),
            config.pricing.clone(),
            dispatcher.clone(),
            notifier,
        );

        Self {
            config,
            store,
            reconciler,
            draws,
            dispatcher,
        }
    }

    pub fn config(&self) -> &LotteryConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &ClaimReconciler {
        &self.reconciler
    }

    pub fn draws(&self) -> &DrawEngine {
        &self.draws
    }

    pub fn dispatcher(&self) -> &PayoutDispatcher {
        &self.dispatcher
    }

    /// Register a user on first contact.
    ///
    /// The referrer is kept only if it is another registered user. An
    /// existing user comes back unchanged.
    pub fn register_user(
        &self,
        id: UserId,
        referrer: Option<UserId>,
    ) -> LotteryResult<(User, bool)> {
        let referrer = match referrer.filter(|r| *r != id) {
            Some(r) if self.store.get_user(r)?.is_some() => Some(r),
            Some(r) => {
                warn!(user_id = %id, referrer = %r, "Ignoring unknown referrer");
                None
            }
            None => None,
        };

        let (user, created) = self.store.register_user(&User::new(id, referrer, Utc::now()))?;
        if created {
            info!(user_id = %id, referrer = ?user.referrer, "User registered");
        }
        Ok((user, created))
    }

    /// The lottery's current local date.
    pub fn today(&self) -> LotteryResult<NaiveDate> {
        self.config.draw.today(Utc::now())
    }

    pub fn todays_ticket_total(&self) -> LotteryResult<u64> {
        self.store.total_tickets(self.today()?)
    }

    /// The prize today's tickets would pay if drawn now.
    pub fn todays_pool(&self) -> LotteryResult<Amount> {
        self.draws.compute_prize(self.today()?)
    }

    pub fn user_tickets(&self, id: UserId, date: NaiveDate) -> LotteryResult<u64> {
        self.store.ticket_count(id, date)
    }

    pub fn latest_winners(&self, limit: usize) -> LotteryResult<Vec<WinnerRecord>> {
        self.store.latest_winners(limit)
    }

    pub fn total_users(&self) -> LotteryResult<u64> {
        self.store.count_users()
    }

    pub fn stats(&self, date: NaiveDate) -> LotteryResult<LotteryStats> {
        Ok(LotteryStats {
            date,
            total_users: self.store.count_users()?,
            tickets_sold: self.store.total_tickets(date)?,
            prize_pool: self.draws.compute_prize(date)?,
        })
    }

    /// Payouts not yet accepted by the sender, failed ones included.
    pub fn pending_payouts(&self) -> LotteryResult<Vec<PayoutRecord>> {
        self.store.unsettled_payouts(true)
    }

    pub async fn retry_payouts(&self, include_failed: bool) -> LotteryResult<RetrySummary> {
        self.dispatcher.retry_unsettled(include_failed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::Database, dispatcher::LogPayoutSender, notifier::BroadcastNotifier};

    fn service() -> LotteryService {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        LotteryService::new(
            LotteryConfig::default(),
            Arc::new(db),
            Arc::new(LogPayoutSender::new()),
            Arc::new(BroadcastNotifier::default()),
        )
    }

    #[test]
    fn test_referrer_rules() {
        let service = service();

        // Unknown referrer is dropped.
        let (user, created) = service.register_user(UserId(1), Some(UserId(99))).unwrap();
        assert!(created);
        assert_eq!(user.referrer, None);

        // Self-referral is dropped.
        let (user, _) = service.register_user(UserId(2), Some(UserId(2))).unwrap();
        assert_eq!(user.referrer, None);

        let (user, _) = service.register_user(UserId(3), Some(UserId(1))).unwrap();
        assert_eq!(user.referrer, Some(UserId(1)));

        // Referrer is set once.
        let (user, created) = service.register_user(UserId(3), Some(UserId(2))).unwrap();
        assert!(!created);
        assert_eq!(user.referrer, Some(UserId(1)));

        assert_eq!(service.total_users().unwrap(), 3);
    }

    #[test]
    fn test_empty_stats() {
        let service = service();
        let today = service.today().unwrap();
        let stats = service.stats(today).unwrap();

        assert_eq!(stats.tickets_sold, 0);
        assert_eq!(stats.prize_pool, Amount::ZERO);
        assert_eq!(service.todays_pool().unwrap(), Amount::ZERO);
        assert!(service.latest_winners(5).unwrap().is_empty());
    }
}
