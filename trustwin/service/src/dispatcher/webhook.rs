// Copyright (c) 2024 The Botho Foundation

//! Webhook payout sender.
//!
//! Posts payout requests to an external payout service, which owns the
//! wallet and the on-chain transfer.

use super::PayoutSender;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use trustwin_core::PayoutRequest;

/// Wire body of a payout request.
#[derive(Serialize)]
struct PayoutPayload<'a> {
    /// Stable across retries so the payout service can dedupe
    idempotency_key: String,

    #[serde(flatten)]
    request: &'a PayoutRequest,
}

/// Sender that POSTs payout requests to a webhook URL.
pub struct WebhookPayoutSender {
    /// HTTP client
    client: Client,
    /// Webhook URL
    url: String,
    /// Number of retries on failure
    max_retries: u32,
    /// Retry delay
    retry_delay: Duration,
}

impl WebhookPayoutSender {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Create a sender with custom retry settings.
    pub fn with_retries(
        url: &str,
        max_retries: u32,
        retry_delay: Duration,
    ) -> anyhow::Result<Self> {
        let mut sender = Self::new(url)?;
        sender.max_retries = max_retries;
        sender.retry_delay = retry_delay;
        Ok(sender)
    }

    async fn post_with_retry(&self, request: &PayoutRequest) -> anyhow::Result<()> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    "Payout webhook retry {} for {}",
                    attempt,
                    request.idempotency_key()
                );
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.post_once(request).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown payout webhook error")))
    }

    async fn post_once(&self, request: &PayoutRequest) -> anyhow::Result<()> {
        let payload = PayoutPayload {
            idempotency_key: request.idempotency_key(),
            request,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", payload.idempotency_key.as_str())
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Payout webhook returned status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        tracing::debug!("Posted payout {} to webhook", request.idempotency_key());

        Ok(())
    }
}

#[async_trait]
impl PayoutSender for WebhookPayoutSender {
    async fn send(&self, request: &PayoutRequest) -> anyhow::Result<()> {
        self.post_with_retry(request).await
    }
}
