//! # Feature: Messaging Transports
//!
//! One capability trait for every chat backend, selected once at startup by
//! `MESSAGING_PROVIDER`. Business logic only ever sees `Arc<dyn Transport>`.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Discord and console transports
//! - 1.1.0: Long bodies split per provider limit
//! - 1.0.0: Meta Cloud API and Twilio

pub mod console;
pub mod discord;
pub mod meta;
pub mod twilio;

pub use console::ConsoleTransport;
pub use discord::DiscordTransport;
pub use meta::MetaTransport;
pub use twilio::TwilioTransport;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use std::sync::Arc;

use crate::core::{chunk_for_provider, Config, MessagingProvider};

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub destination: String,
    pub body: String,
    /// Stable per logical message; providers without idempotency keys ignore it
    pub dedup_key: Option<String>,
}

impl OutboundMessage {
    pub fn new(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            body: body.into(),
            dedup_key: None,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { provider_message_id: String },
    Failed { reason: String },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}

/// A message received from a provider, normalized
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub provider: MessagingProvider,
    /// Stable sender identity (phone number, Discord user id)
    pub sender: String,
    /// Where replies go (phone number, Discord channel id)
    pub reply_to: String,
    pub text: String,
    pub provider_message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> MessagingProvider;

    /// Send one body as a single provider message
    async fn send(&self, message: &OutboundMessage) -> SendOutcome;

    /// Check a webhook signature against the raw request body
    fn verify_webhook(&self, body: &[u8], signature: Option<&str>) -> bool;

    /// Send a body of any length, split at the provider limit. Reports the
    /// first chunk's id, or the first failure.
    async fn send_chunked(&self, message: &OutboundMessage) -> SendOutcome {
        let chunks = chunk_for_provider(&message.body, self.id());
        let mut first_id = None;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let part = OutboundMessage {
                destination: message.destination.clone(),
                body: chunk,
                dedup_key: message.dedup_key.as_ref().map(|key| {
                    if index == 0 {
                        key.clone()
                    } else {
                        format!("{key}-{index}")
                    }
                }),
            };
            match self.send(&part).await {
                SendOutcome::Sent {
                    provider_message_id,
                } => {
                    first_id.get_or_insert(provider_message_id);
                }
                failed @ SendOutcome::Failed { .. } => {
                    if index > 0 {
                        warn!("Chunk {index} to {} failed after earlier chunks were sent", message.destination);
                    }
                    return failed;
                }
            }
        }

        SendOutcome::Sent {
            provider_message_id: first_id.unwrap_or_default(),
        }
    }
}

/// Build the configured transport. Missing credentials are an error here
/// rather than at first send.
pub fn build_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config.provider {
        MessagingProvider::Meta => Arc::new(MetaTransport::new(
            config
                .meta_access_token
                .clone()
                .context("META_ACCESS_TOKEN is required for the meta provider")?,
            config
                .meta_phone_number_id
                .clone()
                .context("META_PHONE_NUMBER_ID is required for the meta provider")?,
            config.meta_app_secret.clone(),
            config.meta_verify_token.clone(),
        )),
        MessagingProvider::Twilio => Arc::new(TwilioTransport::new(
            config
                .twilio_account_sid
                .clone()
                .context("TWILIO_ACCOUNT_SID is required for the twilio provider")?,
            config
                .twilio_auth_token
                .clone()
                .context("TWILIO_AUTH_TOKEN is required for the twilio provider")?,
            config.twilio_whatsapp_number.clone(),
            config.twilio_webhook_secret.clone(),
        )),
        MessagingProvider::Discord => Arc::new(DiscordTransport::new(
            config
                .discord_token
                .as_deref()
                .context("DISCORD_TOKEN is required for the discord provider")?,
        )),
        MessagingProvider::Console => Arc::new(ConsoleTransport::new()),
    };
    Ok(transport)
}
