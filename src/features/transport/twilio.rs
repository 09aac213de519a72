//! WhatsApp through Twilio's Messages API

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;

use super::{InboundMessage, OutboundMessage, SendOutcome, Transport};
use crate::core::MessagingProvider;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const WHATSAPP_PREFIX: &str = "whatsapp:";

pub struct TwilioTransport {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    webhook_secret: Option<String>,
}

impl TwilioTransport {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from_number: String,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            account_sid,
            auth_token,
            from_number: with_whatsapp_prefix(&from_number),
            webhook_secret,
        }
    }

    fn messages_url(&self) -> String {
        format!("{TWILIO_API_BASE}/Accounts/{}/Messages.json", self.account_sid)
    }

    /// Build an inbound message from decoded webhook form fields
    /// (`From`, `Body`, `MessageSid`)
    pub fn parse_webhook_form(fields: &HashMap<String, String>) -> Option<InboundMessage> {
        let from = fields.get("From")?.trim();
        let text = fields.get("Body")?.trim();
        if from.is_empty() || text.is_empty() {
            return None;
        }

        let sender = from.strip_prefix(WHATSAPP_PREFIX).unwrap_or(from).to_string();
        Some(InboundMessage {
            provider: MessagingProvider::Twilio,
            sender: sender.clone(),
            reply_to: sender,
            text: text.to_string(),
            provider_message_id: fields.get("MessageSid").cloned(),
            received_at: Utc::now(),
        })
    }
}

fn with_whatsapp_prefix(number: &str) -> String {
    if number.starts_with(WHATSAPP_PREFIX) {
        number.to_string()
    } else {
        format!("{WHATSAPP_PREFIX}{number}")
    }
}

#[async_trait]
impl Transport for TwilioTransport {
    fn id(&self) -> MessagingProvider {
        MessagingProvider::Twilio
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let to = with_whatsapp_prefix(&message.destination);
        let form = [
            ("From", self.from_number.as_str()),
            ("To", to.as_str()),
            ("Body", message.body.as_str()),
        ];

        let response = match self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
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
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!("Twilio send to {to} failed: {reason}");
            return SendOutcome::Failed { reason };
        }

        let provider_message_id = payload
            .get("sid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!("Twilio accepted message {provider_message_id}");
        SendOutcome::Sent {
            provider_message_id,
        }
    }

    /// Accepts unsigned webhooks when no secret is configured. Twilio's
    /// URL-based HMAC-SHA1 scheme is not implemented, so a configured secret
    /// rejects every request.
    fn verify_webhook(&self, _body: &[u8], signature: Option<&str>) -> bool {
        match &self.webhook_secret {
            None => true,
            Some(_) => {
                warn!(
                    "Twilio signature verification is not supported; rejecting webhook (signature present: {})",
                    signature.is_some()
                );
                false
            }
        }
    }
}
