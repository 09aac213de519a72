//! # SQLite Storage
//!
//! Users, reminders, conversation messages and LLM usage in one SQLite file.
//! The connection sits behind an async mutex; statements never live across an
//! await point.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: LLM usage log
//! - 1.1.0: Message retention with per-row expiry
//! - 1.0.0: Users and reminders

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use sqlite::{Connection, State, Statement};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::features::intent::{ParsedIntent, Recurrence};
use crate::features::reminders::{
    NewReminder, Reminder, ReminderFilter, ReminderStatus, ReminderStore,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        address TEXT NOT NULL UNIQUE,
        destination TEXT NOT NULL,
        consent_given INTEGER NOT NULL DEFAULT 0,
        consent_at TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS reminders (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        subject TEXT NOT NULL,
        scheduled_for TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        is_recurring INTEGER NOT NULL DEFAULT 0,
        recurrence_type TEXT,
        recurrence_end TEXT,
        original_text TEXT,
        delivered_at TEXT,
        cancelled_at TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_reminders_user_status ON reminders(user_id, status);

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        direction TEXT NOT NULL,
        body TEXT NOT NULL,
        intent_type TEXT,
        intent_data TEXT,
        provider_message_id TEXT,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_user_created ON messages(user_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_messages_expires ON messages(expires_at);

    CREATE TABLE IF NOT EXISTS llm_usage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        model TEXT NOT NULL,
        input_tokens INTEGER NOT NULL,
        output_tokens INTEGER NOT NULL,
        total_tokens INTEGER NOT NULL,
        estimated_cost REAL NOT NULL,
        user_id TEXT NOT NULL,
        cost_bucket TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
";

const REMINDER_COLUMNS: &str = "id, user_id, subject, scheduled_for, status, is_recurring, \
     recurrence_type, recurrence_end, original_text, delivered_at, cancelled_at, created_at";

const MESSAGE_COLUMNS: &str =
    "id, user_id, direction, body, intent_type, intent_data, provider_message_id, created_at, expires_at";

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    /// Stable sender identity
    pub address: String,
    /// Where replies and reminders are sent
    pub destination: String,
    pub consent_given: bool,
    pub consent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "INBOUND",
            MessageDirection::Outbound => "OUTBOUND",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "INBOUND" => Ok(MessageDirection::Inbound),
            "OUTBOUND" => Ok(MessageDirection::Outbound),
            other => bail!("Invalid message direction: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub user_id: String,
    pub direction: MessageDirection,
    pub body: String,
    pub intent_type: Option<String>,
    /// JSON of the parsed intent's slots
    pub intent_data: Option<String>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let connection =
            sqlite::open(path).with_context(|| format!("Failed to open database at {path}"))?;
        let database = Self::from_connection(connection)?;
        info!("Database ready at {path}");
        Ok(database)
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(sqlite::open(":memory:")?)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        connection
            .execute("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        connection
            .execute(SCHEMA)
            .context("Failed to initialise schema")?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    // ==================== Users ====================

    /// Look up a user by sender address, creating one without consent when
    /// missing. A changed reply destination is stored.
    pub async fn get_or_create_user(&self, address: &str, destination: &str) -> Result<User> {
        let conn = self.connection.lock().await;

        if let Some(mut user) = Self::query_user(&conn, "address", address)? {
            if user.destination != destination {
                let mut stmt = conn.prepare("UPDATE users SET destination = ? WHERE id = ?")?;
                stmt.bind((1, destination))?;
                stmt.bind((2, user.id.as_str()))?;
                stmt.next()?;
                debug!("Updated destination for user {}", user.id);
                user.destination = destination.to_string();
            }
            return Ok(user);
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            address: address.to_string(),
            destination: destination.to_string(),
            consent_given: false,
            consent_at: None,
            created_at: Utc::now(),
        };
        let mut stmt = conn.prepare(
            "INSERT INTO users (id, address, destination, consent_given, created_at)
             VALUES (?, ?, ?, 0, ?)",
        )?;
        stmt.bind((1, user.id.as_str()))?;
        stmt.bind((2, address))?;
        stmt.bind((3, destination))?;
        stmt.bind((4, to_db_time(&user.created_at).as_str()))?;
        stmt.next()?;

        info!("Created user {} for {address}", user.id);
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.connection.lock().await;
        Self::query_user(&conn, "id", user_id)
    }

    pub async fn set_consent(&self, user_id: &str, consent: bool) -> Result<()> {
        let conn = self.connection.lock().await;
        let consent_at = consent.then(|| to_db_time(&Utc::now()));
        let mut stmt =
            conn.prepare("UPDATE users SET consent_given = ?, consent_at = ? WHERE id = ?")?;
        stmt.bind((1, i64::from(consent)))?;
        stmt.bind((2, consent_at.as_deref()))?;
        stmt.bind((3, user_id))?;
        stmt.next()?;
        Ok(())
    }

    fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<User>> {
        let mut stmt = conn.prepare(format!(
            "SELECT id, address, destination, consent_given, consent_at, created_at
             FROM users WHERE {column} = ?"
        ))?;
        stmt.bind((1, value))?;
        if stmt.next()? != State::Row {
            return Ok(None);
        }
        Ok(Some(User {
            id: stmt.read::<String, _>("id")?,
            address: stmt.read::<String, _>("address")?,
            destination: stmt.read::<String, _>("destination")?,
            consent_given: stmt.read::<i64, _>("consent_given")? != 0,
            consent_at: read_optional_time(&stmt, "consent_at")?,
            created_at: from_db_time(&stmt.read::<String, _>("created_at")?)?,
        }))
    }

    // ==================== Messages ====================

    pub async fn store_message(
        &self,
        user_id: &str,
        direction: MessageDirection,
        body: &str,
        provider_message_id: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        let conn = self.connection.lock().await;
        let id = Uuid::new_v4().to_string();
        let mut stmt = conn.prepare(
            "INSERT INTO messages (id, user_id, direction, body, provider_message_id, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )?;
        stmt.bind((1, id.as_str()))?;
        stmt.bind((2, user_id))?;
        stmt.bind((3, direction.as_str()))?;
        stmt.bind((4, body))?;
        stmt.bind((5, provider_message_id))?;
        stmt.bind((6, to_db_time(&Utc::now()).as_str()))?;
        stmt.bind((7, to_db_time(&expires_at).as_str()))?;
        stmt.next()?;
        Ok(id)
    }

    /// Record the parsed intent of a stored inbound message
    pub async fn set_message_intent(&self, message_id: &str, intent: &ParsedIntent) -> Result<()> {
        let data = serde_json::to_string(&intent.data)?;
        let conn = self.connection.lock().await;
        let mut stmt =
            conn.prepare("UPDATE messages SET intent_type = ?, intent_data = ? WHERE id = ?")?;
        stmt.bind((1, intent.kind.as_str()))?;
        stmt.bind((2, data.as_str()))?;
        stmt.bind((3, message_id))?;
        stmt.next()?;
        Ok(())
    }

    /// The user's latest `limit` messages, oldest first
    pub async fn recent_messages(&self, user_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ?"
        ))?;
        stmt.bind((1, user_id))?;
        stmt.bind((2, i64::try_from(limit).unwrap_or(i64::MAX)))?;

        let mut messages = Vec::new();
        while let State::Row = stmt.next()? {
            messages.push(StoredMessage {
                id: stmt.read::<String, _>("id")?,
                user_id: stmt.read::<String, _>("user_id")?,
                direction: MessageDirection::parse(&stmt.read::<String, _>("direction")?)?,
                body: stmt.read::<String, _>("body")?,
                intent_type: stmt.read::<Option<String>, _>("intent_type")?,
                intent_data: stmt.read::<Option<String>, _>("intent_data")?,
                provider_message_id: stmt.read::<Option<String>, _>("provider_message_id")?,
                created_at: from_db_time(&stmt.read::<String, _>("created_at")?)?,
                expires_at: from_db_time(&stmt.read::<String, _>("expires_at")?)?,
            });
        }
        messages.reverse();
        Ok(messages)
    }

    /// Delete messages whose expiry is at or before `now`
    pub async fn purge_expired_messages(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare("DELETE FROM messages WHERE expires_at <= ?")?;
        stmt.bind((1, to_db_time(&now).as_str()))?;
        stmt.next()?;
        Ok(conn.change_count())
    }

    // ==================== LLM usage ====================

    #[allow(clippy::too_many_arguments)]
    pub async fn log_llm_usage(
        &self,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        total_tokens: u32,
        estimated_cost: f64,
        user_id: &str,
        cost_bucket: &str,
    ) -> Result<()> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "INSERT INTO llm_usage (model, input_tokens, output_tokens, total_tokens, estimated_cost, user_id, cost_bucket, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        stmt.bind((1, model))?;
        stmt.bind((2, i64::from(input_tokens)))?;
        stmt.bind((3, i64::from(output_tokens)))?;
        stmt.bind((4, i64::from(total_tokens)))?;
        stmt.bind((5, estimated_cost))?;
        stmt.bind((6, user_id))?;
        stmt.bind((7, cost_bucket))?;
        stmt.bind((8, to_db_time(&Utc::now()).as_str()))?;
        stmt.next()?;
        Ok(())
    }

    /// Total tokens and estimated cost logged for a bucket
    pub async fn llm_usage_totals(&self, cost_bucket: &str) -> Result<(i64, f64)> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(SUM(total_tokens), 0) AS tokens, COALESCE(SUM(estimated_cost), 0.0) AS cost
             FROM llm_usage WHERE cost_bucket = ?",
        )?;
        stmt.bind((1, cost_bucket))?;
        stmt.next()?;
        Ok((stmt.read::<i64, _>("tokens")?, stmt.read::<f64, _>("cost")?))
    }

    fn read_reminder(stmt: &Statement<'_>) -> Result<Reminder> {
        let recurrence = stmt
            .read::<Option<String>, _>("recurrence_type")?
            .map(|r| r.parse::<Recurrence>())
            .transpose()?;
        Ok(Reminder {
            id: stmt.read::<String, _>("id")?,
            user_id: stmt.read::<String, _>("user_id")?,
            subject: stmt.read::<String, _>("subject")?,
            scheduled_for: from_db_time(&stmt.read::<String, _>("scheduled_for")?)?,
            status: stmt.read::<String, _>("status")?.parse()?,
            is_recurring: stmt.read::<i64, _>("is_recurring")? != 0,
            recurrence,
            recurrence_end: read_optional_time(stmt, "recurrence_end")?,
            original_text: stmt.read::<Option<String>, _>("original_text")?,
            delivered_at: read_optional_time(stmt, "delivered_at")?,
            cancelled_at: read_optional_time(stmt, "cancelled_at")?,
            created_at: from_db_time(&stmt.read::<String, _>("created_at")?)?,
        })
    }
}

#[async_trait]
impl ReminderStore for Database {
    async fn create_reminder(&self, reminder: NewReminder) -> Result<String> {
        let conn = self.connection.lock().await;
        let id = Uuid::new_v4().to_string();
        let mut stmt = conn.prepare(format!(
            "INSERT INTO reminders ({REMINDER_COLUMNS}) VALUES (?, ?, ?, ?, 'PENDING', ?, ?, ?, ?, NULL, NULL, ?)"
        ))?;
        stmt.bind((1, id.as_str()))?;
        stmt.bind((2, reminder.user_id.as_str()))?;
        stmt.bind((3, reminder.subject.as_str()))?;
        stmt.bind((4, to_db_time(&reminder.scheduled_for).as_str()))?;
        stmt.bind((5, i64::from(reminder.recurrence.is_some())))?;
        stmt.bind((6, reminder.recurrence.as_ref().map(Recurrence::as_str)))?;
        stmt.bind((7, reminder.recurrence_end.as_ref().map(to_db_time).as_deref()))?;
        stmt.bind((8, reminder.original_text.as_deref()))?;
        stmt.bind((9, to_db_time(&Utc::now()).as_str()))?;
        stmt.next()?;
        Ok(id)
    }

    async fn get_reminder(&self, reminder_id: &str) -> Result<Option<Reminder>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?"
        ))?;
        stmt.bind((1, reminder_id))?;
        if stmt.next()? != State::Row {
            return Ok(None);
        }
        Ok(Some(Self::read_reminder(&stmt)?))
    }

    async fn update_reminder_status(
        &self,
        reminder_id: &str,
        owner: Option<&str>,
        status: ReminderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let timestamp_column = match status {
            ReminderStatus::Delivered => "delivered_at",
            ReminderStatus::Cancelled => "cancelled_at",
            ReminderStatus::Pending => bail!("Reminders cannot be moved back to PENDING"),
        };
        let owner_clause = if owner.is_some() { " AND user_id = ?" } else { "" };

        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(format!(
            "UPDATE reminders SET status = ?, {timestamp_column} = ?
             WHERE id = ? AND status = 'PENDING'{owner_clause}"
        ))?;
        stmt.bind((1, status.as_str()))?;
        stmt.bind((2, to_db_time(&at).as_str()))?;
        stmt.bind((3, reminder_id))?;
        if let Some(owner) = owner {
            stmt.bind((4, owner))?;
        }
        stmt.next()?;
        Ok(conn.change_count() > 0)
    }

    async fn find_pending_reminders(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>> {
        let user_clause = if filter.user_id.is_some() { " AND user_id = ?" } else { "" };
        let needle = filter.subject_contains.as_ref().map(|s| s.trim().to_lowercase());

        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE status = 'PENDING'{user_clause}
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        if let Some(user_id) = &filter.user_id {
            stmt.bind((1, user_id.as_str()))?;
        }

        let mut reminders = Vec::new();
        while let State::Row = stmt.next()? {
            let reminder = Self::read_reminder(&stmt)?;
            if let Some(needle) = &needle {
                if !reminder.subject.to_lowercase().contains(needle.as_str()) {
                    continue;
                }
            }
            reminders.push(reminder);
            if filter.limit.is_some_and(|limit| reminders.len() >= limit) {
                break;
            }
        }
        Ok(reminders)
    }

    async fn find_user_destination(&self, user_id: &str) -> Result<Option<String>> {
        let conn = self.connection.lock().await;
        Ok(Self::query_user(&conn, "id", user_id)?.map(|user| user.destination))
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid stored timestamp: {raw}"))?
        .with_timezone(&Utc))
}

fn read_optional_time(stmt: &Statement<'_>, column: &str) -> Result<Option<DateTime<Utc>>> {
    stmt.read::<Option<String>, _>(column)?
        .map(|raw| from_db_time(&raw))
        .transpose()
}
