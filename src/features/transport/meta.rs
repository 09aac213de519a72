//! WhatsApp through the Meta Cloud API

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use log::{debug, warn};
use serde_json::{json, Value};
use sha2::Sha256;

use super::{InboundMessage, OutboundMessage, SendOutcome, Transport};
use crate::core::MessagingProvider;

type HmacSha256 = Hmac<Sha256>;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

pub struct MetaTransport {
    http: reqwest::Client,
    access_token: String,
    phone_number_id: String,
    app_secret: Option<String>,
    verify_token: Option<String>,
}

impl MetaTransport {
    pub fn new(
        access_token: String,
        phone_number_id: String,
        app_secret: Option<String>,
        verify_token: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token,
            phone_number_id,
            app_secret,
            verify_token,
        }
    }

    fn messages_url(&self) -> String {
        format!("{GRAPH_API_BASE}/{}/messages", self.phone_number_id)
    }

    /// Answer the `hub.challenge` subscription handshake. Returns the
    /// challenge to echo back when mode and token match.
    pub fn verify_subscription(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        let expected = self.verify_token.as_deref()?;
        (mode == "subscribe" && token == expected).then(|| challenge.to_string())
    }

    /// Extract text messages from a webhook notification
    pub fn parse_webhook_payload(payload: &Value) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();
        let Some(entries) = payload.get("entry").and_then(Value::as_array) else {
            return inbound;
        };

        for entry in entries {
            let Some(changes) = entry.get("changes").and_then(Value::as_array) else {
                continue;
            };
            for change in changes {
                let Some(messages) = change
                    .get("value")
                    .and_then(|value| value.get("messages"))
                    .and_then(Value::as_array)
                else {
                    continue;
                };

                for msg in messages {
                    let from = msg.get("from").and_then(Value::as_str).unwrap_or_default();
                    let text = msg
                        .get("text")
                        .and_then(|t| t.get("body"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .trim();
                    if from.is_empty() || text.is_empty() {
                        continue;
                    }

                    let sender = if from.starts_with('+') {
                        from.to_string()
                    } else {
                        format!("+{from}")
                    };
                    inbound.push(InboundMessage {
                        provider: MessagingProvider::Meta,
                        sender: sender.clone(),
                        reply_to: sender,
                        text: text.to_string(),
                        provider_message_id: msg.get("id").and_then(Value::as_str).map(String::from),
                        received_at: Utc::now(),
                    });
                }
            }
        }
        inbound
    }
}

/// `sha256=<hex>` HMAC-SHA256 of the raw body, compared in constant time
fn verify_hmac_sha256(secret: &str, body: &[u8], signature: &str) -> bool {
    let hex_sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[async_trait]
impl Transport for MetaTransport {
    fn id(&self) -> MessagingProvider {
        MessagingProvider::Meta
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let body = json!({
            "messaging_product": "whatsapp",
            "to": message.destination,
            "type": "text",
            "text": { "body": message.body },
        });

        let response = match self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return SendOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let reason = payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!("Meta send to {} failed: {reason}", message.destination);
            return SendOutcome::Failed { reason };
        }

        let provider_message_id = payload
            .pointer("/messages/0/id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!("Meta accepted message {provider_message_id}");
        SendOutcome::Sent {
            provider_message_id,
        }
    }

    fn verify_webhook(&self, body: &[u8], signature: Option<&str>) -> bool {
        match (self.app_secret.as_deref(), signature) {
            (Some(secret), Some(signature)) => verify_hmac_sha256(secret, body, signature),
            _ => false,
        }
    }
}
