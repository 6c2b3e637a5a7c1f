// Copyright (c) 2024 The Botho Foundation

//! Claim reconciler.
//!
//! Moves a payment claim from `Submitted` to `Settled` or `Rejected`:
//!
//! ```text
//! submit ──> Submitted ──settle──> Settled   (tickets credited, referral paid)
//!                │
//!                └──reject──> Rejected        (no ledger effect)
//! ```
//!
//! Settlement is a single store transaction, so racing settlements of the
//! same claim credit it once and distinct claims never lose an increment.
//! The referral commission is dispatched after that transaction commits;
//! its failure leaves the credit in place.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use trustwin_core::{
    Amount, ClaimId, ClaimStatus, ClaimTransition, LedgerStore, LotteryError, LotteryEvent,
    LotteryResult, PaymentClaim, PayoutPurpose, PayoutRequest, PricingConfig, Settlement,
    SettlementResult, UserId,
};

use crate::{
    dispatcher::PayoutDispatcher,
    notifier::{publish, Notifier},
};

/// Stateless driver of the claim lifecycle. All state lives in the store.
pub struct ClaimReconciler {
    store: Arc<dyn LedgerStore>,
    pricing: PricingConfig,
    dispatcher: Arc<PayoutDispatcher>,
    notifier: Arc<dyn Notifier>,
}

impl ClaimReconciler {
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

    /// Record a purchase claim awaiting verification.
    ///
    /// Fails with `InvalidAmount` unless `amount` is exactly
    /// `quantity x ticket_price`; nothing is stored in that case.
    pub async fn submit_claim(
        &self,
        user_id: UserId,
        amount: Amount,
        quantity: u32,
        date: NaiveDate,
        payout_address: Option<String>,
    ) -> LotteryResult<PaymentClaim> {
        let claim = PaymentClaim::submit(
            user_id,
            amount,
            quantity,
            date,
            payout_address,
            &self.pricing,
        )?;

        if self.store.get_user(user_id)?.is_none() {
            return Err(LotteryError::UserNotFound(user_id));
        }

        // Stores the claim and the user's new payout address together.
        self.store.insert_claim(&claim)?;

        info!(
            claim_id = %claim.id,
            user_id = %user_id,
            quantity,
            amount = %amount,
            date = %date,
            "Claim submitted"
        );

        publish(
            self.notifier.as_ref(),
            LotteryEvent::ClaimSubmitted {
                claim: claim.clone(),
            },
        )
        .await;

        Ok(claim)
    }

    /// Settle a verified claim.
    ///
    /// The first call credits the tickets and dispatches the referral
    /// commission; later calls report the original settlement unchanged.
    pub async fn settle_claim(&self, id: &ClaimId, actor: &str) -> LotteryResult<SettlementResult> {
        let claim = self
            .store
            .get_claim(id)?
            .ok_or(LotteryError::ClaimNotFound(*id))?;

        if claim.status.is_terminal() {
            info!(claim_id = %id, status = %claim.status, "Claim already resolved");
            return self.prior_outcome(claim);
        }

        let referral = self.referral_for(&claim)?;
        let transition = self
            .store
            .settle_claim(id, actor, referral.as_ref(), Utc::now())?;

        let settled = match transition {
            ClaimTransition::Applied(settled) => settled,
            ClaimTransition::AlreadyTerminal(current) => {
                info!(claim_id = %id, status = %current.status, "Claim resolved concurrently");
                return self.prior_outcome(current);
            }
        };

        let tickets_total = settled.tickets_after.unwrap_or_default();
        info!(
            claim_id = %id,
            user_id = %settled.user_id,
            quantity = settled.quantity,
            tickets_total,
            actor,
            "Claim settled"
        );

        publish(
            self.notifier.as_ref(),
            LotteryEvent::ClaimSettled {
                claim_id: settled.id,
                user_id: settled.user_id,
                date: settled.date,
                quantity: settled.quantity,
                tickets_total,
            },
        )
        .await;

        if let Some(request) = &referral {
            // The credit is committed; a failed dispatch stays in the payout
            // ledger for retry.
            if let Err(e) = self.dispatcher.dispatch(request).await {
                error!(
                    claim_id = %id,
                    key = %request.idempotency_key(),
                    "Failed to record referral dispatch: {}",
                    e
                );
            }
        }

        let referral = self.store.get_payout(PayoutPurpose::Referral, &id.to_string())?;
        Ok(SettlementResult::Settled(Settlement::from_claim(
            &settled, referral,
        )))
    }

    /// Reject a claim. Has no effect on tickets or payouts.
    pub async fn reject_claim(
        &self,
        id: &ClaimId,
        reason: &str,
        actor: &str,
    ) -> LotteryResult<ClaimTransition> {
        let transition = self.store.reject_claim(id, reason, actor, Utc::now())?;

        match &transition {
            ClaimTransition::Applied(claim) => {
                info!(claim_id = %id, user_id = %claim.user_id, actor, "Claim rejected: {}", reason);
                publish(
                    self.notifier.as_ref(),
                    LotteryEvent::ClaimRejected {
                        claim_id: claim.id,
                        user_id: claim.user_id,
                        reason: reason.to_string(),
                    },
                )
                .await;
            }
            ClaimTransition::AlreadyTerminal(claim) => {
                info!(claim_id = %id, status = %claim.status, "Claim already resolved");
            }
        }

        Ok(transition)
    }

    /// Claims awaiting verification, oldest first.
    pub fn pending_claims(&self) -> LotteryResult<Vec<PaymentClaim>> {
        self.store.pending_claims()
    }

    /// The referral payout owed for `claim`, if its user has a referrer.
    fn referral_for(&self, claim: &PaymentClaim) -> LotteryResult<Option<PayoutRequest>> {
        let user = self
            .store
            .get_user(claim.user_id)?
            .ok_or(LotteryError::UserNotFound(claim.user_id))?;

        let Some(referrer_id) = user.referrer else {
            return Ok(None);
        };

        let commission = self.pricing.split(claim.amount).referral;
        if commission.is_zero() {
            return Ok(None);
        }

        let address = match self.store.get_user(referrer_id)? {
            Some(referrer) => referrer.payout_address,
            None => {
                warn!(
                    claim_id = %claim.id,
                    referrer = %referrer_id,
                    "Referrer is not registered"
                );
                None
            }
        };

        Ok(Some(PayoutRequest::referral(
            claim.id,
            referrer_id,
            address,
            commission,
        )))
    }

    /// Report a terminal claim's original outcome.
    fn prior_outcome(&self, claim: PaymentClaim) -> LotteryResult<SettlementResult> {
        match claim.status {
            ClaimStatus::Settled => {
                let referral = self
                    .store
                    .get_payout(PayoutPurpose::Referral, &claim.id.to_string())?;
                Ok(SettlementResult::AlreadySettled(Settlement::from_claim(
                    &claim, referral,
                )))
            }
            ClaimStatus::Rejected { reason } => Ok(SettlementResult::AlreadyRejected {
                claim_id: claim.id,
                reason,
            }),
            ClaimStatus::Submitted => Err(LotteryError::Storage(format!(
                "Claim {} reported terminal while submitted",
                claim.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::Database, dispatcher::LogPayoutSender, notifier::BroadcastNotifier};
    use std::time::Duration;
    use trustwin_core::{LotteryConfig, User, UserId};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 13).unwrap()
    }

    fn setup() -> (Database, ClaimReconciler) {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let store: Arc<dyn LedgerStore> = Arc::new(db.clone());
        let notifier: Arc<dyn Notifier> = Arc::new(BroadcastNotifier::default());
        let dispatcher = Arc::new(PayoutDispatcher::new(
            store.clone(),
            Arc::new(LogPayoutSender::new()),
            notifier.clone(),
            Duration::from_secs(5),
        ));
        let reconciler =
            ClaimReconciler::new(store, LotteryConfig::default().pricing, dispatcher, notifier);
        (db, reconciler)
    }

    #[tokio::test]
    async fn test_invalid_amount_is_not_stored() {
        let (db, reconciler) = setup();
        db.register_user(&User::new(UserId(1), None, Utc::now()))
            .unwrap();

        let err = reconciler
            .submit_claim(UserId(1), "3.50".parse().unwrap(), 1, date(), None)
            .await
            .unwrap_err();

        match err {
            LotteryError::InvalidAmount {
                expected, claimed, ..
            } => {
                assert_eq!(expected.to_string(), "4.00");
                assert_eq!(claimed.to_string(), "3.50");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(reconciler.pending_claims().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_user() {
        let (_db, reconciler) = setup();
        let err = reconciler
            .submit_claim(UserId(5), "4.00".parse().unwrap(), 1, date(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LotteryError::UserNotFound(UserId(5))));
    }

    #[tokio::test]
    async fn test_submit_records_payout_address() {
        let (db, reconciler) = setup();
        db.register_user(&User::new(UserId(1), None, Utc::now()))
            .unwrap();

        reconciler
            .submit_claim(
                UserId(1),
                "4.00".parse().unwrap(),
                1,
                date(),
                Some("TWallet".to_string()),
            )
            .await
            .unwrap();

        let user = db.get_user(UserId(1)).unwrap().unwrap();
        assert_eq!(user.payout_address.as_deref(), Some("TWallet"));
    }

    #[tokio::test]
    async fn test_settle_without_referrer() {
        let (db, reconciler) = setup();
        db.register_user(&User::new(UserId(1), None, Utc::now()))
            .unwrap();

        let claim = reconciler
            .submit_claim(UserId(1), "12.00".parse().unwrap(), 3, date(), None)
            .await
            .unwrap();
        let result = reconciler.settle_claim(&claim.id, "admin").await.unwrap();

        assert!(result.is_first_settlement());
        assert_eq!(result.tickets_total(), Some(3));
        match result {
            SettlementResult::Settled(s) => assert!(s.referral.is_none()),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(db.unsettled_payouts(true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settle_rejected_claim() {
        let (db, reconciler) = setup();
        db.register_user(&User::new(UserId(1), None, Utc::now()))
            .unwrap();

        let claim = reconciler
            .submit_claim(UserId(1), "4.00".parse().unwrap(), 1, date(), None)
            .await
            .unwrap();
        reconciler
            .reject_claim(&claim.id, "no such transfer", "admin")
            .await
            .unwrap();

        let result = reconciler.settle_claim(&claim.id, "admin").await.unwrap();
        assert_eq!(
            result,
            SettlementResult::AlreadyRejected {
                claim_id: claim.id,
                reason: "no such transfer".to_string()
            }
        );
        assert_eq!(db.ticket_count(UserId(1), date()).unwrap(), 0);

        // Rejecting again reports the existing outcome.
        let again = reconciler
            .reject_claim(&claim.id, "other", "admin")
            .await
            .unwrap();
        assert!(matches!(again, ClaimTransition::AlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn test_settle_unknown_claim() {
        let (_db, reconciler) = setup();
        let err = reconciler
            .settle_claim(&ClaimId::new(), "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, LotteryError::ClaimNotFound(_)));
    }
}
