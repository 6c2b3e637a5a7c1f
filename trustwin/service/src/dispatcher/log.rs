// Copyright (c) 2024 The Botho Foundation

//! Dry-run payout sender.

use super::PayoutSender;
use async_trait::async_trait;
use trustwin_core::PayoutRequest;

/// Logs each payout and reports it accepted. Nothing leaves the process.
#[derive(Debug, Default)]
pub struct LogPayoutSender;

impl LogPayoutSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PayoutSender for LogPayoutSender {
    async fn send(&self, request: &PayoutRequest) -> anyhow::Result<()> {
        tracing::info!(
            key = %request.idempotency_key(),
            recipient = %request.recipient,
            address = request.address.as_deref().unwrap_or("-"),
            "Would pay {} for {}",
            request.amount,
            request.purpose
        );
        Ok(())
    }
}
