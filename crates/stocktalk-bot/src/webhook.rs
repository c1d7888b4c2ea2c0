//! Inbound webhook payloads and signature verification
//!
//! The messaging platform signs every delivery with HMAC-SHA256 over the
//! raw request body, base64-encoded in the `x-stocktalk-signature` header.
//! Verification must run on the exact bytes received, before any JSON
//! parsing, and compare in constant time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use stocktalk_core::Result;

/// Header carrying the base64 HMAC-SHA256 of the request body
pub const SIGNATURE_HEADER: &str = "x-stocktalk-signature";

/// Envelope delivered by the messaging platform
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub events: Vec<InboundEvent>,
}

/// A single delivered event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub kind: String,
    /// Single-use reply handle for this event
    pub reply_token: String,
    pub source: EventSource,
    #[serde(default)]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl InboundEvent {
    /// Message text, present only for non-empty text message events.
    /// Stickers, images and follow events all return `None` and are
    /// acknowledged without processing.
    pub fn text(&self) -> Option<&str> {
        if self.kind != "message" {
            return None;
        }
        let message = self.message.as_ref()?;
        if message.kind != "text" {
            return None;
        }
        message
            .text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// Parse a raw webhook body
pub fn parse_payload(body: &[u8]) -> Result<WebhookPayload> {
    Ok(serde_json::from_slice(body)?)
}

/// Base64 HMAC-SHA256 signature for a body, as the platform computes it
pub fn sign(secret: &str, body: &[u8]) -> String {
    STANDARD.encode(hmac_sha256(secret.as_bytes(), body))
}

/// Verify a delivery against the signature header
pub fn verify(secret: &str, body: &[u8], signature_header: Option<&str>) -> bool {
    let Some(signature) = signature_header.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    constant_time_eq(&sign(secret, body), signature)
}

fn hmac_sha256(key: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut key_block = [0_u8; 64];
    if key.len() > 64 {
        let mut hasher = Sha256::new();
        hasher.update(key);
        let digest = hasher.finalize();
        key_block[..32].copy_from_slice(&digest);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner_pad = [0_u8; 64];
    let mut outer_pad = [0_u8; 64];
    for index in 0..64 {
        inner_pad[index] = key_block[index] ^ 0x36;
        outer_pad[index] = key_block[index] ^ 0x5c;
    }

    let mut inner = Sha256::new();
    inner.update(inner_pad);
    inner.update(payload);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(outer_pad);
    outer.update(inner_digest);
    outer.finalize().into()
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let mut diff = left_bytes.len() ^ right_bytes.len();
    let max_len = left_bytes.len().max(right_bytes.len());
    for index in 0..max_len {
        let l = left_bytes.get(index).copied().unwrap_or(0);
        let r = right_bytes.get(index).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_matches_known_sha256_vector() {
        assert_eq!(
            sign("key", b"The quick brown fox jumps over the lazy dog"),
            "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg="
        );
    }

    #[test]
    fn test_verify_accepts_valid_signature() {
        let body = br#"{"events":[]}"#;
        let signature = sign("secret", body);
        assert!(verify("secret", body, Some(&signature)));
    }

    #[test]
    fn test_verify_rejects_tampered_body_and_missing_header() {
        let body = br#"{"events":[]}"#;
        let signature = sign("secret", body);
        assert!(!verify("secret", br#"{"events":[{}]}"#, Some(&signature)));
        assert!(!verify("other-secret", body, Some(&signature)));
        assert!(!verify("secret", body, None));
        assert!(!verify("secret", body, Some("")));
    }

    #[test]
    fn test_constant_time_eq_rejects_different_lengths_and_values() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("abc", "abx"));
    }

    #[test]
    fn test_text_extracted_from_text_message_events_only() {
        let body = br#"{
            "events": [
                {
                    "type": "message",
                    "replyToken": "tok-1",
                    "source": { "userId": "U123" },
                    "message": { "type": "text", "id": "m-1", "text": " 2330 " }
                },
                {
                    "type": "message",
                    "replyToken": "tok-2",
                    "source": { "userId": "U123" },
                    "message": { "type": "sticker", "id": "m-2" }
                },
                {
                    "type": "follow",
                    "replyToken": "tok-3",
                    "source": { "userId": "U456" }
                }
            ]
        }"#;

        let payload = parse_payload(body).unwrap();
        assert_eq!(payload.events.len(), 3);
        assert_eq!(payload.events[0].text(), Some("2330"));
        assert_eq!(payload.events[1].text(), None);
        assert_eq!(payload.events[2].text(), None);
    }

    #[test]
    fn test_empty_text_is_ignored() {
        let body = br#"{
            "events": [{
                "type": "message",
                "replyToken": "tok-1",
                "source": { "userId": "U123" },
                "message": { "type": "text", "id": "m-1", "text": "   " }
            }]
        }"#;

        let payload = parse_payload(body).unwrap();
        assert_eq!(payload.events[0].text(), None);
    }
}
