// Copyright (c) 2024 The Botho Foundation

//! Core types and logic for the TrustWin daily lottery.
//!
//! This crate holds the ledger's domain model and pure computations:
//!
//! - Fixed-point money and the revenue split
//! - Payment claims and their state machine
//! - Prize pool computation and weighted winner selection
//! - Payout and event types
//! - The [`LedgerStore`] boundary trait
//! - Configuration structures

pub mod claim;
pub mod config;
pub mod draw;
pub mod error;
pub mod events;
pub mod money;
pub mod payout;
pub mod pool;
pub mod store;
pub mod user;

pub use claim::{
    ClaimId, ClaimStatus, ClaimTransition, PaymentClaim, Settlement, SettlementResult,
};
pub use config::{
    DrawConfig, DrawDay, LotteryConfig, NotifierConfig, PayoutConfig, PayoutMode, PricingConfig,
    StorageConfig,
};
pub use draw::{DrawOutcome, DrawRecord, DrawStatus, Participant, WeightedPool, WinnerRecord};
pub use error::{LotteryError, LotteryResult};
pub use events::LotteryEvent;
pub use money::Amount;
pub use payout::{DispatchOutcome, PayoutPurpose, PayoutRecord, PayoutRequest, PayoutStatus};
pub use pool::{compute_prize, RevenueSplit};
pub use store::LedgerStore;
pub use user::{User, UserId};
