//! Outbound messaging ports and the platform HTTP client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use stocktalk_core::{Error, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Platform limit on a single text message
const MAX_TEXT_CHARS: usize = 5000;

/// Replies to one inbound event through its single-use handle
#[async_trait]
pub trait ReplyPort: Send + Sync {
    /// Send text through a reply handle. The platform accepts each handle
    /// exactly once; a second use is rejected upstream.
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()>;
}

/// Pushes a message to a user outside any reply window
#[async_trait]
pub trait PushPort: Send + Sync {
    async fn push(&self, user_id: &str, text: &str) -> Result<()>;
}

/// HTTP client for the messaging platform's reply and push endpoints
pub struct MessagingClient {
    client: Client,
    api_base: String,
    channel_token: String,
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: Vec<OutboundMessage<'a>>,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: Vec<OutboundMessage<'a>>,
}

impl MessagingClient {
    /// Create a client for the given API base and channel token
    pub fn new(api_base: impl Into<String>, channel_token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            channel_token: channel_token.into(),
        })
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<()> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.channel_token))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await?;
            return Err(Error::from_status(status, error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl ReplyPort for MessagingClient {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        let request = ReplyRequest {
            reply_token,
            messages: vec![OutboundMessage {
                kind: "text",
                text: clamp_text(text),
            }],
        };

        self.post("/v1/messages/reply", &request).await?;
        debug!("Replied via token {}", reply_token);
        Ok(())
    }
}

#[async_trait]
impl PushPort for MessagingClient {
    async fn push(&self, user_id: &str, text: &str) -> Result<()> {
        let request = PushRequest {
            to: user_id,
            messages: vec![OutboundMessage {
                kind: "text",
                text: clamp_text(text),
            }],
        };

        self.post("/v1/messages/push", &request).await?;
        debug!("Pushed message to {}", user_id);
        Ok(())
    }
}

/// Clamp to the platform's per-message limit at a char boundary
fn clamp_text(text: &str) -> &str {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_request_wire_shape() {
        let request = ReplyRequest {
            reply_token: "tok-1",
            messages: vec![OutboundMessage {
                kind: "text",
                text: "收盤 605.0",
            }],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["replyToken"], "tok-1");
        assert_eq!(value["messages"][0]["type"], "text");
        assert_eq!(value["messages"][0]["text"], "收盤 605.0");
    }

    #[test]
    fn test_clamp_respects_char_boundaries() {
        let short = "台積電";
        assert_eq!(clamp_text(short), short);

        let long = "股".repeat(MAX_TEXT_CHARS + 10);
        let clamped = clamp_text(&long);
        assert_eq!(clamped.chars().count(), MAX_TEXT_CHARS);
    }
}
