// Copyright (c) 2024 The Botho Foundation
//
//! Shared fixtures for lottery integration tests.

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tempfile::TempDir;

use trustwin_core::{
    Amount, LedgerStore, LotteryConfig, PaymentClaim, PayoutRequest, User, UserId,
};
use trustwin_service::{BroadcastNotifier, Database, LotteryService, PayoutSender};

// ============================================================================
// Recording payout sender
// ============================================================================

/// Records every request it is handed; can be switched to refuse them.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<PayoutRequest>>,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingSender {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every request this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Requests handed over, accepted or not.
    pub fn sent(&self) -> Vec<PayoutRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PayoutSender for RecordingSender {
    async fn send(&self, request: &PayoutRequest) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(request.clone());
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("payout wallet unavailable");
        }
        Ok(())
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct TestLottery {
    pub db: Database,
    pub sender: Arc<RecordingSender>,
    pub notifier: Arc<BroadcastNotifier>,
    pub service: Arc<LotteryService>,
    _dir: Option<TempDir>,
}

impl TestLottery {
    /// In-memory ledger with default pricing (4.00, 25/25/50).
    pub fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Self::with_db(db, None)
    }

    /// Ledger in a temporary SQLite file.
    pub fn on_disk() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trustwin.db");
        let db = Database::open(path.to_str().unwrap()).unwrap();
        db.migrate().unwrap();
        Self::with_db(db, Some(dir))
    }

    fn with_db(db: Database, dir: Option<TempDir>) -> Self {
        let sender = Arc::new(RecordingSender::default());
        let notifier = Arc::new(BroadcastNotifier::new(1024));
        let service = Arc::new(LotteryService::new(
            LotteryConfig::default(),
            Arc::new(db.clone()),
            sender.clone(),
            notifier.clone(),
        ));

        Self {
            db,
            sender,
            notifier,
            service,
            _dir: dir,
        }
    }

    /// Path of the on-disk database, if any.
    pub fn db_path(&self) -> Option<String> {
        self._dir
            .as_ref()
            .map(|d| d.path().join("trustwin.db").to_string_lossy().into_owned())
    }

    pub fn register(&self, id: i64, referrer: Option<i64>) -> User {
        self.service
            .register_user(UserId(id), referrer.map(UserId))
            .unwrap()
            .0
    }

    /// Submit a correctly priced claim.
    pub async fn submit(&self, user: i64, quantity: u32, date: NaiveDate) -> PaymentClaim {
        let amount = self
            .service
            .config()
            .pricing
            .expected_amount(quantity)
            .unwrap();
        self.service
            .reconciler()
            .submit_claim(UserId(user), amount, quantity, date, None)
            .await
            .unwrap()
    }

    /// Credit tickets directly, bypassing the claim flow.
    pub fn credit(&self, user: i64, tickets: u64, date: NaiveDate) {
        if self.db.get_user(UserId(user)).unwrap().is_none() {
            self.db
                .register_user(&User::new(UserId(user), None, Utc::now()))
                .unwrap();
        }
        self.db
            .increment_ticket_count(UserId(user), date, tickets)
            .unwrap();
    }
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, day).unwrap()
}

pub fn amount(s: &str) -> Amount {
    s.parse().unwrap()
}
