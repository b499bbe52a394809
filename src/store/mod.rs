//! SQLite persistence for messages, message events, threads and dead letters.
//!
//! The services talk to storage through the [`MessageRepository`] and
//! [`MessageThreadRepository`] traits. Both implementations share one
//! [`SqlitePool`]; reads run concurrently, and read-modify-write sequences are
//! serialized per key by [`KeyedLocks`] in the services.

pub mod dead_letters;
pub mod locks;
pub mod messages;
pub mod threads;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::types::{Message, MessageEvent, MessageThread, ParseEnumError, UserId};

pub use self::dead_letters::{DeadLetter, DeadLetterStore};
pub use self::locks::{KeyGuard, KeyedLocks};
pub use self::messages::SqliteMessageRepository;
pub use self::threads::SqliteMessageThreadRepository;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An invalid enum value was read from the database.
    #[error(transparent)]
    InvalidEnum(#[from] ParseEnumError),

    /// A stored timestamp could not be parsed.
    #[error("invalid {field} timestamp: {value:?}")]
    InvalidTimestamp {
        /// Column holding the bad value.
        field: &'static str,
        /// The unparseable value.
        value: String,
    },

    /// A stored identifier or counter could not be parsed.
    #[error("invalid {field} value: {value:?}")]
    InvalidValue {
        /// Column holding the bad value.
        field: &'static str,
        /// The unparseable value.
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Repository traits
// ---------------------------------------------------------------------------

/// Loads and persists [`Message`]s and their event log.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Load a message owned by `user_id`.
    async fn load(&self, user_id: &UserId, id: Uuid) -> Result<Option<Message>, StoreError>;

    /// Insert a new message together with an optional first event.
    ///
    /// Returns `false` without writing when a message with the same ID exists.
    async fn insert(
        &self,
        message: &Message,
        event: Option<&MessageEvent>,
    ) -> Result<bool, StoreError>;

    /// Persist a mutated message together with an optional event, atomically.
    async fn update(&self, message: &Message, event: Option<&MessageEvent>)
        -> Result<(), StoreError>;

    /// Append an event. Returns `false` when an identical event (same message,
    /// name and timestamp) was already recorded.
    async fn store_event(&self, event: &MessageEvent) -> Result<bool, StoreError>;

    /// All events of a message in timestamp order.
    async fn events(&self, message_id: Uuid) -> Result<Vec<MessageEvent>, StoreError>;

    /// The most recent message between `owner` and `contact`, other than
    /// `exclude`.
    async fn latest_for_pair_excluding(
        &self,
        user_id: &UserId,
        owner: &str,
        contact: &str,
        exclude: Uuid,
    ) -> Result<Option<Message>, StoreError>;

    /// Delete one message and its events. Returns `true` if a row was removed.
    async fn delete(&self, user_id: &UserId, id: Uuid) -> Result<bool, StoreError>;

    /// Delete every message between `owner` and `contact`.
    async fn delete_by_owner_and_contact(
        &self,
        user_id: &UserId,
        owner: &str,
        contact: &str,
    ) -> Result<u64, StoreError>;

    /// Delete every message of an account.
    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<u64, StoreError>;
}

/// Filters for listing threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadListParams {
    /// Owning account.
    pub user_id: UserId,
    /// Owner phone address.
    pub owner: String,
    /// Archived or active conversations.
    pub is_archived: bool,
    /// Optional substring matched against the contact or last content.
    pub query: Option<String>,
    /// Rows to skip.
    pub skip: u32,
    /// Maximum rows to return.
    pub limit: u32,
}

/// Loads and persists [`MessageThread`]s.
#[async_trait]
pub trait MessageThreadRepository: Send + Sync {
    /// Load the thread for `(user, owner, contact)`, inserting `candidate`
    /// first if none exists.
    async fn load_or_create(&self, candidate: &MessageThread)
        -> Result<MessageThread, StoreError>;

    /// Load a thread by ID for its owning account.
    async fn load(&self, user_id: &UserId, id: Uuid) -> Result<Option<MessageThread>, StoreError>;

    /// Load the thread for `(user, owner, contact)` if it exists.
    async fn load_by_pair(
        &self,
        user_id: &UserId,
        owner: &str,
        contact: &str,
    ) -> Result<Option<MessageThread>, StoreError>;

    /// Persist a mutated thread.
    async fn save(&self, thread: &MessageThread) -> Result<(), StoreError>;

    /// List threads newest first.
    async fn list(&self, params: &ThreadListParams) -> Result<Vec<MessageThread>, StoreError>;

    /// Delete a thread by ID. Returns `true` if a row was removed.
    async fn delete(&self, user_id: &UserId, id: Uuid) -> Result<bool, StoreError>;

    /// Delete the thread for `(user, owner, contact)`.
    async fn delete_by_owner_and_contact(
        &self,
        user_id: &UserId,
        owner: &str,
        contact: &str,
    ) -> Result<u64, StoreError>;

    /// Delete every thread of an account.
    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// Pool setup
// ---------------------------------------------------------------------------

/// Open (or create) the database at `path` and apply the schema.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the schema fails.
pub async fn open(path: &Path) -> anyhow::Result<SqlitePool> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    migrate(&pool)
        .await
        .context("failed to apply schema migration")?;
    Ok(pool)
}

/// Open a private in-memory database with the schema applied.
///
/// In-memory databases are per-connection, so the pool holds exactly one.
///
/// # Errors
///
/// Returns an error if the connection or schema fails.
pub async fn open_in_memory() -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Apply `migrations/001_schema.sql`. Safe to run repeatedly.
///
/// # Errors
///
/// Returns an error if a statement fails.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    let schema = include_str!("../../migrations/001_schema.sql");
    sqlx::raw_sql(schema).execute(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Format a timestamp for storage. Fixed-width nanosecond precision keeps
/// lexical order equal to chronological order.
pub(crate) fn to_db_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn opt_to_db_time(t: Option<&DateTime<Utc>>) -> Option<String> {
    t.map(to_db_time)
}

pub(crate) fn from_db_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp {
            field,
            value: value.to_owned(),
        })
}

pub(crate) fn opt_from_db_time(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| from_db_time(field, v)).transpose()
}

pub(crate) fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::InvalidValue {
        field,
        value: value.to_owned(),
    })
}

pub(crate) fn to_u32(field: &'static str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidValue {
        field,
        value: value.to_string(),
    })
}
