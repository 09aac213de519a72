//! Stdout transport for local runs

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{InboundMessage, OutboundMessage, SendOutcome, Transport};
use crate::core::MessagingProvider;

#[derive(Default)]
pub struct ConsoleTransport {
    sent: AtomicU64,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one stdin line as `<sender>: <text>`, or as plain text from
    /// `default_sender`. Blank lines yield nothing.
    pub fn inbound_from_line(line: &str, default_sender: &str) -> Option<InboundMessage> {
        let line = line.trim();
        let (sender, text) = match line.split_once(": ") {
            Some((sender, text)) if sender.starts_with('+') && !sender.contains(' ') => {
                (sender, text.trim())
            }
            _ => (default_sender, line),
        };
        if text.is_empty() {
            return None;
        }
        Some(InboundMessage {
            provider: MessagingProvider::Console,
            sender: sender.to_string(),
            reply_to: sender.to_string(),
            text: text.to_string(),
            provider_message_id: None,
            received_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn id(&self) -> MessagingProvider {
        MessagingProvider::Console
    }

    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[to {}] {}", message.destination, message.body);
        SendOutcome::Sent {
            provider_message_id: format!("console-{n}"),
        }
    }

    fn verify_webhook(&self, _body: &[u8], _signature: Option<&str>) -> bool {
        true
    }
}
