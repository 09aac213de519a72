//! Discord channel messages through serenity's HTTP client
//!
//! Destinations are channel ids. Inbound traffic arrives over the gateway in
//! the bot binary, not through webhooks.

use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::id::ChannelId;
use std::sync::Arc;

use super::{InboundMessage, OutboundMessage, SendOutcome, Transport};
use crate::core::MessagingProvider;

pub struct DiscordTransport {
    http: Arc<Http>,
}

impl DiscordTransport {
    pub fn new(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }

    pub fn from_http(http: Arc<Http>) -> Self {
        Self { http }
    }

    /// Normalize a gateway message; bots and empty messages are ignored
    pub fn inbound_from(msg: &Message) -> Option<InboundMessage> {
        let text = msg.content.trim();
        if msg.author.bot || text.is_empty() {
            return None;
        }
        Some(InboundMessage {
            provider: MessagingProvider::Discord,
            sender: msg.author.id.0.to_string(),
            reply_to: msg.channel_id.0.to_string(),
            text: text.to_string(),
            provider_message_id: Some(msg.id.0.to_string()),
            received_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    fn id(&self) -> MessagingProvider {
        MessagingProvider::Discord
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let Ok(channel) = message.destination.parse::<u64>() else {
            return SendOutcome::Failed {
                reason: format!("Invalid Discord channel id: {}", message.destination),
            };
        };

        match ChannelId(channel).say(&self.http, &message.body).await {
            Ok(sent) => SendOutcome::Sent {
                provider_message_id: sent.id.0.to_string(),
            },
            Err(e) => {
                warn!("Discord send to channel {channel} failed: {e}");
                SendOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn verify_webhook(&self, _body: &[u8], _signature: Option<&str>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_channel_id_fails_without_network() {
        let transport = DiscordTransport::new("not-a-token");
        let outcome = transport
            .send(&OutboundMessage::new("general", "hello"))
            .await;
        assert!(matches!(outcome, SendOutcome::Failed { .. }));
    }
}
