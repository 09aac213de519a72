//! # Configuration
//!
//! Environment-driven runtime settings. Loaded once at startup after `.env`.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Delay-queue worker, retry and backoff settings
//! - 1.1.0: Discord and console messaging providers
//! - 1.0.0: Initial release with Meta and Twilio providers

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Which messaging backend carries inbound and outbound traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessagingProvider {
    Meta,
    Twilio,
    Discord,
    Console,
}

impl MessagingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagingProvider::Meta => "meta",
            MessagingProvider::Twilio => "twilio",
            MessagingProvider::Discord => "discord",
            MessagingProvider::Console => "console",
        }
    }
}

impl FromStr for MessagingProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "meta" => Ok(MessagingProvider::Meta),
            "twilio" => Ok(MessagingProvider::Twilio),
            "discord" => Ok(MessagingProvider::Discord),
            "console" => Ok(MessagingProvider::Console),
            other => Err(anyhow::anyhow!("Unsupported messaging provider: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub database_path: String,
    pub provider: MessagingProvider,

    pub meta_access_token: Option<String>,
    pub meta_phone_number_id: Option<String>,
    pub meta_app_secret: Option<String>,
    pub meta_verify_token: Option<String>,

    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_whatsapp_number: String,
    pub twilio_webhook_secret: Option<String>,

    pub discord_token: Option<String>,
    pub console_sender: String,

    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,

    /// Rule results at or above this confidence skip the LLM tier
    pub intent_confidence_threshold: f32,
    /// Offset used to read wall-clock times typed by users
    pub utc_offset_minutes: i32,

    pub message_retention_days: i64,
    pub max_messages_per_thread: usize,
    pub rate_limit_per_user_per_minute: usize,

    pub worker_concurrency: usize,
    pub job_attempts: u32,
    pub job_backoff_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            log_level: var_or("LOG_LEVEL", "info"),
            database_path: var_or("DATABASE_PATH", "boomerang.db"),
            provider: var_or("MESSAGING_PROVIDER", "console").parse()?,

            meta_access_token: optional_var("META_ACCESS_TOKEN"),
            meta_phone_number_id: optional_var("META_PHONE_NUMBER_ID"),
            meta_app_secret: optional_var("META_APP_SECRET"),
            meta_verify_token: optional_var("META_VERIFY_TOKEN"),

            twilio_account_sid: optional_var("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: optional_var("TWILIO_AUTH_TOKEN"),
            twilio_whatsapp_number: var_or("TWILIO_WHATSAPP_NUMBER", "whatsapp:+14155238886"),
            twilio_webhook_secret: optional_var("TWILIO_WEBHOOK_SECRET"),

            discord_token: optional_var("DISCORD_TOKEN"),
            console_sender: var_or("CONSOLE_SENDER", "+15550000000"),

            openai_api_key: optional_var("OPENAI_API_KEY"),
            openai_base_url: var_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: var_or("OPENAI_MODEL", "gpt-3.5-turbo"),

            intent_confidence_threshold: parsed_var("INTENT_CONFIDENCE_THRESHOLD", 0.8)?,
            utc_offset_minutes: parsed_var("UTC_OFFSET_MINUTES", 0)?,

            message_retention_days: parsed_var("MESSAGE_RETENTION_DAYS", 30)?,
            max_messages_per_thread: parsed_var("MAX_MESSAGES_PER_THREAD", 100)?,
            rate_limit_per_user_per_minute: parsed_var("RATE_LIMIT_PER_USER_PER_MINUTE", 10)?,

            worker_concurrency: parsed_var("WORKER_CONCURRENCY", 5)?,
            job_attempts: parsed_var("JOB_ATTEMPTS", 3)?,
            job_backoff_ms: parsed_var("JOB_BACKOFF_MS", 2000)?,
        })
    }

    /// Fixed offset for wall-clock phrases; out-of-range values fall back to UTC
    pub fn utc_offset(&self) -> chrono::FixedOffset {
        use chrono::Offset;
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(chrono::FixedOffset::east_opt)
            .unwrap_or_else(|| chrono::Utc.fix())
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    optional_var(key).unwrap_or_else(|| default.to_string())
}

fn parsed_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {key}: {raw}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!("meta".parse::<MessagingProvider>().unwrap(), MessagingProvider::Meta);
        assert_eq!("Twilio".parse::<MessagingProvider>().unwrap(), MessagingProvider::Twilio);
        assert_eq!(" DISCORD ".parse::<MessagingProvider>().unwrap(), MessagingProvider::Discord);
        assert_eq!("console".parse::<MessagingProvider>().unwrap(), MessagingProvider::Console);
        assert!("telegram".parse::<MessagingProvider>().is_err());
    }

    #[test]
    fn test_provider_as_str_round_trips() {
        for provider in [
            MessagingProvider::Meta,
            MessagingProvider::Twilio,
            MessagingProvider::Discord,
            MessagingProvider::Console,
        ] {
            assert_eq!(provider.as_str().parse::<MessagingProvider>().unwrap(), provider);
        }
    }

    fn with_offset(utc_offset_minutes: i32) -> Config {
        Config {
            log_level: "info".to_string(),
            database_path: ":memory:".to_string(),
            provider: MessagingProvider::Console,
            meta_access_token: None,
            meta_phone_number_id: None,
            meta_app_secret: None,
            meta_verify_token: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_whatsapp_number: "whatsapp:+14155238886".to_string(),
            twilio_webhook_secret: None,
            discord_token: None,
            console_sender: "+15550000000".to_string(),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-3.5-turbo".to_string(),
            intent_confidence_threshold: 0.8,
            utc_offset_minutes,
            message_retention_days: 30,
            max_messages_per_thread: 100,
            rate_limit_per_user_per_minute: 10,
            worker_concurrency: 5,
            job_attempts: 3,
            job_backoff_ms: 2000,
        }
    }

    #[test]
    fn test_utc_offset() {
        assert_eq!(with_offset(120).utc_offset().local_minus_utc(), 7200);
        assert_eq!(with_offset(-330).utc_offset().local_minus_utc(), -19800);
        // a day or more is not a valid offset
        assert_eq!(with_offset(1440).utc_offset().local_minus_utc(), 0);
        assert_eq!(with_offset(i32::MAX).utc_offset().local_minus_utc(), 0);
        assert_eq!(with_offset(i32::MIN).utc_offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_parsed_var_rejects_garbage() {
        env::set_var("BOOMERANG_TEST_WORKERS", "five");
        let result: Result<usize> = parsed_var("BOOMERANG_TEST_WORKERS", 5);
        assert!(result.is_err());
        env::remove_var("BOOMERANG_TEST_WORKERS");

        let fallback: usize = parsed_var("BOOMERANG_TEST_WORKERS", 5).unwrap();
        assert_eq!(fallback, 5);
    }
}
