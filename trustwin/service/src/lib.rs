// Copyright (c) 2024 The Botho Foundation

//! TrustWin lottery service.
//!
//! Wires the core ledger model to SQLite storage, payout senders and
//! notifiers, and runs the daily draw.

pub mod db;
pub mod dispatcher;
pub mod draw;
pub mod engine;
pub mod notifier;
pub mod reconciler;
pub mod service;

pub use db::Database;
pub use dispatcher::{create_sender, PayoutDispatcher, PayoutSender, RetrySummary};
pub use draw::DrawEngine;
pub use engine::LotteryEngine;
pub use notifier::{create_notifier, BroadcastNotifier, Notifier};
pub use reconciler::ClaimReconciler;
pub use service::{LotteryService, LotteryStats};
