// Copyright (c) 2024 The Botho Foundation

use anyhow::Result;
use trustwin_core::LotteryConfig;

use super::{open_service, print_success, print_warning};

/// List payouts not yet accepted, optionally re-dispatching them.
pub async fn run(config: LotteryConfig, retry: bool, include_failed: bool) -> Result<()> {
    let service = open_service(config)?;

    if retry {
        let summary = service.retry_payouts(include_failed).await?;
        if summary.failed == 0 {
            print_success(&format!(
                "Retried {} payout(s): {} accepted",
                summary.attempted, summary.accepted
            ));
        } else {
            print_warning(&format!(
                "Retried {} payout(s): {} accepted, {} failed",
                summary.attempted, summary.accepted, summary.failed
            ));
        }
    }

    let payouts = service.pending_payouts()?;
    if payouts.is_empty() {
        println!("No outstanding payouts.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<36}  {:>10}  {:>12}  {:>3}  {}",
        "PURPOSE", "REFERENCE", "RECIPIENT", "AMOUNT", "TRY", "STATUS"
    );
    for p in payouts {
        println!(
            "{:<8}  {:<36}  {:>10}  {:>12}  {:>3}  {}",
            p.request.purpose.to_string(),
            p.request.reference,
            p.request.recipient,
            p.request.amount.to_string(),
            p.attempts,
            p.status
        );
    }

    Ok(())
}
