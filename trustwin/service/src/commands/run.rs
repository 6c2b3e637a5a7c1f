// Copyright (c) 2024 The Botho Foundation

use anyhow::Result;
use chrono::Utc;
use tracing::info;
use trustwin_core::LotteryConfig;
use trustwin_service::LotteryEngine;

use super::{open_database, open_service};

/// Run the engine until Ctrl-C.
pub async fn run(config: LotteryConfig) -> Result<()> {
    info!("TrustWin lottery service starting...");
    info!("Lottery configuration:");
    info!(
        "  Ticket price: {} {}",
        config.pricing.ticket_price, config.pricing.currency
    );
    info!(
        "  Split: referral {} bps, tax {} bps, pool {} bps",
        config.pricing.referral_bps, config.pricing.tax_bps, config.pricing.pool_bps
    );
    info!(
        "  Draw: {} at UTC{:+}min, settles {:?} day",
        config.draw.draw_time, config.draw.utc_offset_minutes, config.draw.draw_day
    );
    info!("  Payouts: {:?}", config.payout.mode);
    info!("  Next draw: {}", config.draw.next_draw_at(Utc::now())?);

    let service = open_service(config)?;
    LotteryEngine::new(service).run().await
}

/// Run database migrations only.
pub fn migrate(config: &LotteryConfig) -> Result<()> {
    open_database(config)?;
    info!("Database migration complete");
    Ok(())
}
