//! Outbound body limits and chunking per messaging provider
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.3.0
//!
//! ## Changelog
//! - 1.1.0: Per-provider limits (WhatsApp Cloud API, Twilio, Discord)
//! - 1.0.0: Line-aware UTF-8 safe chunking

use crate::core::config::MessagingProvider;

/// WhatsApp Cloud API text body limit
pub const WHATSAPP_BODY_LIMIT: usize = 4096;
/// Twilio message body limit
pub const TWILIO_BODY_LIMIT: usize = 1600;
/// Discord message content limit
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// Maximum body size a provider accepts in one message
pub fn body_limit(provider: MessagingProvider) -> usize {
    match provider {
        MessagingProvider::Meta => WHATSAPP_BODY_LIMIT,
        MessagingProvider::Twilio => TWILIO_BODY_LIMIT,
        MessagingProvider::Discord => DISCORD_MESSAGE_LIMIT,
        MessagingProvider::Console => usize::MAX,
    }
}

/// Chunk text into pieces no larger than `max_size` bytes
///
/// Prefers splitting at newlines and never splits inside a UTF-8 character.
pub fn chunk_text(text: &str, max_size: usize) -> Vec<String> {
    if text.len() <= max_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let line_with_newline = format!("{line}\n");
        if current.len() + line_with_newline.len() > max_size {
            if !current.is_empty() {
                chunks.push(current.trim_end().to_string());
                current = String::new();
            }
            if line_with_newline.len() > max_size {
                chunks.extend(chunk_long_line(line, max_size));
            } else {
                current = line_with_newline;
            }
        } else {
            current.push_str(&line_with_newline);
        }
    }
    if !current.is_empty() {
        chunks.push(current.trim_end().to_string());
    }
    chunks
}

fn chunk_long_line(line: &str, max_size: usize) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();

    for ch in line.chars() {
        if current.len() + ch.len_utf8() > max_size && !current.is_empty() {
            result.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }

    if !current.is_empty() {
        result.push(current);
    }

    result
}

/// Chunk an outbound body for the given provider
pub fn chunk_for_provider(text: &str, provider: MessagingProvider) -> Vec<String> {
    chunk_text(text, body_limit(provider))
}

/// Truncate to `max_chars` characters, adding an ellipsis when shortened
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_no_chunk() {
        let result = chunk_text("hello", 100);
        assert_eq!(result, vec!["hello"]);
    }

    #[test]
    fn test_chunk_respects_lines() {
        let text = "line1\nline2\nline3";
        let result = chunk_text(text, 12);
        assert!(result.len() >= 2);
        for chunk in &result {
            assert!(!chunk.ends_with('\n'));
        }
    }

    #[test]
    fn test_chunk_handles_long_lines() {
        let long_line = "a".repeat(100);
        let result = chunk_text(&long_line, 30);
        assert!(result.len() >= 3);
        for chunk in &result {
            assert!(chunk.len() <= 30);
        }
    }

    #[test]
    fn test_twilio_limit() {
        let result = chunk_for_provider(&"a".repeat(2000), MessagingProvider::Twilio);
        assert_eq!(result.len(), 2);
        assert!(result[0].len() <= TWILIO_BODY_LIMIT);
    }

    #[test]
    fn test_console_never_chunks() {
        let text = "a".repeat(10_000);
        assert_eq!(chunk_for_provider(&text, MessagingProvider::Console).len(), 1);
    }

    #[test]
    fn test_utf8_safety() {
        let text = "Hello 世界! ".repeat(500);
        for chunk in chunk_for_provider(&text, MessagingProvider::Discord) {
            assert!(chunk.len() <= DISCORD_MESSAGE_LIMIT);
            assert!(chunk.chars().count() > 0);
        }
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = truncate_chars(&"é".repeat(60), 50);
        assert_eq!(long.chars().count(), 50);
        assert!(long.ends_with("..."));
    }

    #[test]
    fn test_exactly_at_limit() {
        let text = "a".repeat(100);
        let result = chunk_text(&text, 100);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].len(), 100);
    }
}
