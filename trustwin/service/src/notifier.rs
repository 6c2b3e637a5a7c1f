// Copyright (c) 2024 The Botho Foundation

//! Ledger event notifiers.
//!
//! The ledger emits structured [`LotteryEvent`]s; rendering them into chat
//! messages is the surrounding application's job. Two sinks are provided:
//! - Broadcast (in-process subscribers, every event also logged)
//! - Webhook (HTTP POST of the JSON event)

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use trustwin_core::{LotteryEvent, NotifierConfig};

/// A sink for ledger events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &LotteryEvent) -> anyhow::Result<()>;
}

/// Deliver an event, logging rather than propagating a delivery failure.
///
/// Notification is best effort; it never decides a ledger outcome.
pub async fn publish(notifier: &dyn Notifier, event: LotteryEvent) {
    if let Err(e) = notifier.notify(&event).await {
        warn!(event = event.name(), "Failed to deliver event: {:#}", e);
    }
}

/// In-process fan-out to any number of subscribers.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<LotteryEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LotteryEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, event: &LotteryEvent) -> anyhow::Result<()> {
        if event.is_alert() {
            error!(event = event.name(), "{}", serde_json::to_string(event)?);
        } else {
            info!(event = event.name(), "{}", serde_json::to_string(event)?);
        }

        // No subscribers is fine; the log line above is the record.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// POSTs each event as JSON to a configured URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &LotteryEvent) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(event)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Notifier webhook returned status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        debug!(event = event.name(), "Posted event to webhook");
        Ok(())
    }
}

/// Delivers to every inner notifier concurrently; fails if any failed.
pub struct MultiNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify(&self, event: &LotteryEvent) -> anyhow::Result<()> {
        let results = join_all(self.sinks.iter().map(|sink| sink.notify(event))).await;
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| format!("{:#}", e)))
            .collect();

        if !failures.is_empty() {
            anyhow::bail!("{}", failures.join("; "));
        }
        Ok(())
    }
}

/// Build the notifier chain from configuration.
///
/// The broadcast notifier is always present so events reach the log;
/// it is returned separately for callers that want to subscribe.
pub fn create_notifier(
    config: &NotifierConfig,
) -> anyhow::Result<(Arc<dyn Notifier>, Arc<BroadcastNotifier>)> {
    let broadcast = Arc::new(BroadcastNotifier::default());

    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => {
            let local: Arc<dyn Notifier> = broadcast.clone();
            let webhook: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(url)?);
            Arc::new(MultiNotifier::new(vec![local, webhook]))
        }
        None => broadcast.clone(),
    };

    Ok((notifier, broadcast))
}
