//! Staff notification webhook.
//!
//! Posts human-readable alerts for dispute and resolution events to an
//! external bot endpoint. Strictly best-effort: a delivery failure is
//! reported back to the notifier, which logs and suppresses it.

use async_trait::async_trait;

use super::event::{EventKind, TransitionEvent};
use super::notifier::EventSink;

pub struct StaffBot {
    client: reqwest::Client,
    webhook_url: String,
}

impl StaffBot {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    /// Send a free-form text alert (also used by the funding paths for
    /// withdrawal review notices).
    pub async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn render(event: &TransitionEvent) -> Option<String> {
        match event.kind {
            EventKind::Disputed => Some(format!(
                "Dispute opened on {} by user {}: {}",
                event.transaction_id,
                event.actor_id,
                event
                    .payload
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("(no reason recorded)")
            )),
            EventKind::ResolvedRelease => Some(format!(
                "Dispute on {} resolved by staff {}: funds released to seller",
                event.transaction_id, event.actor_id
            )),
            EventKind::ResolvedRefund => Some(format!(
                "Dispute on {} resolved by staff {}: buyer refunded",
                event.transaction_id, event.actor_id
            )),
            // Routine lifecycle events stay off the staff channel
            _ => None,
        }
    }
}

#[async_trait]
impl EventSink for StaffBot {
    fn name(&self) -> &'static str {
        "staff-bot"
    }

    async fn deliver(&self, event: &TransitionEvent) -> anyhow::Result<()> {
        let Some(text) = Self::render(event) else {
            return Ok(());
        };
        self.send_text(&text).await
    }
}
