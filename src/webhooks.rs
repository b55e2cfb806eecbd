//! Discord webhook mirroring.
//!
//! New posts are announced to the configured webhook URLs after the
//! creating transaction commits; deleting a post retracts the mirrored
//! messages. Deliveries are best-effort: failures are logged and never
//! surface into the workflow result.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A message successfully mirrored to one webhook. Stored as Json on the
/// post so it can be retracted later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub message_id: String,
    pub webhook_url: String,
}

#[derive(Clone, Debug)]
pub struct PostAnnouncement {
    pub post_id: i32,
    pub author_name: String,
    pub content: String,
}

#[derive(Debug, Error)]
enum WebhookError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("webhook response carried no message id")]
    MissingMessageId,
}

const EMBED_COLOR: u32 = 0x2b6cb0;
const MAX_EMBED_CONTENT: usize = 2000;

#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        WebhookNotifier::new()
    }
}

impl WebhookNotifier {
    pub fn new() -> Self {
        WebhookNotifier {
            client: reqwest::Client::new(),
        }
    }

    /// Sends the announcement to every URL, collecting the ids of the
    /// messages that made it. Failed deliveries are logged and skipped.
    pub async fn announce_post(
        &self,
        urls: &[String],
        announcement: &PostAnnouncement,
    ) -> Vec<DeliveredMessage> {
        let payload = build_announcement_payload(announcement);
        let mut delivered = Vec::new();
        for url in urls {
            match self.send(url, &payload).await {
                Ok(message_id) => delivered.push(DeliveredMessage {
                    message_id,
                    webhook_url: url.clone(),
                }),
                Err(err) => {
                    log::warn!("webhook delivery to {url} failed: {err}");
                }
            }
        }
        delivered
    }

    async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<String, WebhookError> {
        // wait=true makes Discord return the created message.
        let response = self
            .client
            .post(format!("{url}?wait=true"))
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        body.get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or(WebhookError::MissingMessageId)
    }

    /// Deletes previously mirrored messages. Best-effort.
    pub async fn retract_messages(&self, messages: &[DeliveredMessage]) {
        for message in messages {
            let url = format!("{}/messages/{}", message.webhook_url, message.message_id);
            let result = self.client.delete(&url).send().await;
            match result.and_then(|response| response.error_for_status()) {
                Ok(_) => {}
                Err(err) => {
                    log::warn!(
                        "failed to retract webhook message {}: {err}",
                        message.message_id
                    );
                }
            }
        }
    }
}

fn build_announcement_payload(announcement: &PostAnnouncement) -> serde_json::Value {
    serde_json::json!({
        "embeds": [{
            "title": format!("New post by {}", sanitize(&announcement.author_name)),
            "description": sanitize(&truncate(&announcement.content, MAX_EMBED_CONTENT)),
            "color": EMBED_COLOR,
            "footer": { "text": format!("post #{}", announcement.post_id) },
        }]
    })
}

/// Escapes Discord markdown and defuses @mentions with a zero-width space.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '*' | '_' | '~' | '|' | '`' | '>' => {
                out.push('\\');
                out.push(c);
            }
            '@' => {
                out.push('@');
                out.push('\u{200B}');
            }
            _ => out.push(c),
        }
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
