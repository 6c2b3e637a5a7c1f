// Copyright (c) 2024 The Botho Foundation

use anyhow::Result;
use chrono::NaiveDate;
use trustwin_core::{
    Amount, ClaimId, ClaimTransition, LotteryConfig, PayoutRecord, PayoutStatus,
    SettlementResult, UserId,
};

use super::{open_service, print_success, print_warning};

/// Submit a purchase claim for verification.
pub async fn submit(
    config: LotteryConfig,
    user: UserId,
    quantity: u32,
    amount: Amount,
    wallet: Option<String>,
    date: Option<NaiveDate>,
) -> Result<()> {
    let service = open_service(config)?;
    let date = match date {
        Some(d) => d,
        None => service.today()?,
    };

    let claim = service
        .reconciler()
        .submit_claim(user, amount, quantity, date, wallet)
        .await?;

    print_success(&format!("Claim {} submitted", claim.id));
    println!("  User:     {}", claim.user_id);
    println!("  Tickets:  {}", claim.quantity);
    println!(
        "  Amount:   {} {}",
        claim.amount,
        service.config().pricing.currency
    );
    println!("  Date:     {}", claim.date);
    Ok(())
}

/// Settle a verified claim.
pub async fn settle(config: LotteryConfig, claim: ClaimId, actor: &str) -> Result<()> {
    let service = open_service(config)?;
    let result = service.reconciler().settle_claim(&claim, actor).await?;

    match result {
        SettlementResult::Settled(s) | SettlementResult::AlreadySettled(s) => {
            if referral_failed(s.referral.as_ref()) {
                print_warning("Referral payout did not go through; see `trustwin payouts`");
            }
            print_success(&format!(
                "Claim {} settled: user {} now holds {} ticket(s) for {}",
                s.claim_id, s.user_id, s.tickets_total, s.date
            ));
            if let Some(referral) = &s.referral {
                println!(
                    "  Referral: {} to user {} ({})",
                    referral.request.amount, referral.request.recipient, referral.status
                );
            }
        }
        SettlementResult::AlreadyRejected { claim_id, reason } => {
            print_warning(&format!("Claim {} was already rejected: {}", claim_id, reason));
        }
    }

    Ok(())
}

fn referral_failed(referral: Option<&PayoutRecord>) -> bool {
    matches!(
        referral.map(|r| &r.status),
        Some(PayoutStatus::Failed { .. })
    )
}

/// Reject a claim.
pub async fn reject(config: LotteryConfig, claim: ClaimId, reason: &str, actor: &str) -> Result<()> {
    let service = open_service(config)?;

    match service.reconciler().reject_claim(&claim, reason, actor).await? {
        ClaimTransition::Applied(c) => {
            print_success(&format!("Claim {} rejected: {}", c.id, reason));
        }
        ClaimTransition::AlreadyTerminal(c) => {
            print_warning(&format!("Claim {} already {}", c.id, c.status));
        }
    }

    Ok(())
}

/// List claims awaiting verification.
pub fn pending(config: LotteryConfig) -> Result<()> {
    let service = open_service(config)?;
    let claims = service.reconciler().pending_claims()?;

    if claims.is_empty() {
        println!("No pending claims.");
        return Ok(());
    }

    println!(
        "{:<36}  {:>10}  {:>4}  {:>10}  {:<10}  {}",
        "CLAIM", "USER", "QTY", "AMOUNT", "DATE", "WALLET"
    );
    for claim in claims {
        println!(
            "{:<36}  {:>10}  {:>4}  {:>10}  {:<10}  {}",
            claim.id,
            claim.user_id,
            claim.quantity,
            claim.amount,
            claim.date,
            claim.payout_address.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
