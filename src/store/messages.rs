//! SQLite-backed [`MessageRepository`].

use async_trait::async_trait;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use tracing::trace;
use uuid::Uuid;

use super::{
    from_db_time, opt_from_db_time, opt_to_db_time, parse_uuid, to_db_time, to_u32,
    MessageRepository, StoreError,
};
use crate::types::{Message, MessageEvent, MessageEventName, MessageStatus, Sim, UserId};

const MESSAGE_COLUMNS: &str = "id, user_id, owner, contact, content, status, sim, request_id, \
     max_send_attempts, send_attempt_count, scheduled_send_time, notification_scheduled_at, \
     notification_sent_at, failure_reason, last_event_at, sent_at, delivered_at, failed_at, \
     expired_at, received_at, request_received_at, created_at, updated_at";

/// Message repository over a shared SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteMessageRepository {
    db: SqlitePool,
}

impl SqliteMessageRepository {
    /// Wrap an already migrated pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    user_id: String,
    owner: String,
    contact: String,
    content: String,
    status: String,
    sim: String,
    request_id: Option<String>,
    max_send_attempts: i64,
    send_attempt_count: i64,
    scheduled_send_time: Option<String>,
    notification_scheduled_at: Option<String>,
    notification_sent_at: Option<String>,
    failure_reason: Option<String>,
    last_event_at: Option<String>,
    sent_at: Option<String>,
    delivered_at: Option<String>,
    failed_at: Option<String>,
    expired_at: Option<String>,
    received_at: Option<String>,
    request_received_at: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid("id", &row.id)?,
            user_id: UserId(row.user_id),
            owner: row.owner,
            contact: row.contact,
            content: row.content,
            status: MessageStatus::parse(&row.status)?,
            sim: Sim::parse(&row.sim)?,
            request_id: row.request_id,
            max_send_attempts: to_u32("max_send_attempts", row.max_send_attempts)?,
            send_attempt_count: to_u32("send_attempt_count", row.send_attempt_count)?,
            scheduled_send_time: opt_from_db_time(
                "scheduled_send_time",
                row.scheduled_send_time.as_deref(),
            )?,
            notification_scheduled_at: opt_from_db_time(
                "notification_scheduled_at",
                row.notification_scheduled_at.as_deref(),
            )?,
            notification_sent_at: opt_from_db_time(
                "notification_sent_at",
                row.notification_sent_at.as_deref(),
            )?,
            failure_reason: row.failure_reason,
            last_event_at: opt_from_db_time("last_event_at", row.last_event_at.as_deref())?,
            sent_at: opt_from_db_time("sent_at", row.sent_at.as_deref())?,
            delivered_at: opt_from_db_time("delivered_at", row.delivered_at.as_deref())?,
            failed_at: opt_from_db_time("failed_at", row.failed_at.as_deref())?,
            expired_at: opt_from_db_time("expired_at", row.expired_at.as_deref())?,
            received_at: opt_from_db_time("received_at", row.received_at.as_deref())?,
            request_received_at: from_db_time("request_received_at", &row.request_received_at)?,
            created_at: from_db_time("created_at", &row.created_at)?,
            updated_at: from_db_time("updated_at", &row.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: String,
    message_id: String,
    user_id: String,
    name: String,
    timestamp: String,
    error_message: Option<String>,
    source: String,
    created_at: String,
}

impl TryFrom<EventRow> for MessageEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid("id", &row.id)?,
            message_id: parse_uuid("message_id", &row.message_id)?,
            user_id: UserId(row.user_id),
            name: MessageEventName::parse(&row.name)?,
            timestamp: from_db_time("timestamp", &row.timestamp)?,
            error_message: row.error_message,
            source: row.source,
            created_at: from_db_time("created_at", &row.created_at)?,
        })
    }
}

async fn insert_event(
    tx: &mut Transaction<'_, Sqlite>,
    event: &MessageEvent,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO message_events \
         (id, message_id, user_id, name, timestamp, error_message, source, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(event.id.to_string())
    .bind(event.message_id.to_string())
    .bind(event.user_id.as_str())
    .bind(event.name.as_str())
    .bind(to_db_time(&event.timestamp))
    .bind(&event.error_message)
    .bind(&event.source)
    .bind(to_db_time(&event.created_at))
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl MessageRepository for SqliteMessageRepository {
    async fn load(&self, user_id: &UserId, id: Uuid) -> Result<Option<Message>, StoreError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND user_id = ?2");
        let row: Option<MessageRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .bind(user_id.as_str())
            .fetch_optional(&self.db)
            .await?;
        row.map(Message::try_from).transpose()
    }

    async fn insert(
        &self,
        message: &Message,
        event: Option<&MessageEvent>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO messages (id, user_id, owner, contact, content, status, sim, \
             request_id, max_send_attempts, send_attempt_count, scheduled_send_time, \
             notification_scheduled_at, notification_sent_at, failure_reason, last_event_at, \
             sent_at, delivered_at, failed_at, expired_at, received_at, request_received_at, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
             ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
        )
        .bind(message.id.to_string())
        .bind(message.user_id.as_str())
        .bind(&message.owner)
        .bind(&message.contact)
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(message.sim.as_str())
        .bind(&message.request_id)
        .bind(i64::from(message.max_send_attempts))
        .bind(i64::from(message.send_attempt_count))
        .bind(opt_to_db_time(message.scheduled_send_time.as_ref()))
        .bind(opt_to_db_time(message.notification_scheduled_at.as_ref()))
        .bind(opt_to_db_time(message.notification_sent_at.as_ref()))
        .bind(&message.failure_reason)
        .bind(opt_to_db_time(message.last_event_at.as_ref()))
        .bind(opt_to_db_time(message.sent_at.as_ref()))
        .bind(opt_to_db_time(message.delivered_at.as_ref()))
        .bind(opt_to_db_time(message.failed_at.as_ref()))
        .bind(opt_to_db_time(message.expired_at.as_ref()))
        .bind(opt_to_db_time(message.received_at.as_ref()))
        .bind(to_db_time(&message.request_received_at))
        .bind(to_db_time(&message.created_at))
        .bind(to_db_time(&message.updated_at))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        if let Some(event) = event {
            insert_event(&mut tx, event).await?;
        }
        tx.commit().await?;
        trace!(message_id = %message.id, status = message.status.as_str(), "message inserted");
        Ok(true)
    }

    async fn update(
        &self,
        message: &Message,
        event: Option<&MessageEvent>,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            "UPDATE messages SET content = ?1, status = ?2, send_attempt_count = ?3, \
             notification_scheduled_at = ?4, notification_sent_at = ?5, failure_reason = ?6, \
             last_event_at = ?7, sent_at = ?8, delivered_at = ?9, failed_at = ?10, \
             expired_at = ?11, received_at = ?12, updated_at = ?13 \
             WHERE id = ?14 AND user_id = ?15",
        )
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(i64::from(message.send_attempt_count))
        .bind(opt_to_db_time(message.notification_scheduled_at.as_ref()))
        .bind(opt_to_db_time(message.notification_sent_at.as_ref()))
        .bind(&message.failure_reason)
        .bind(opt_to_db_time(message.last_event_at.as_ref()))
        .bind(opt_to_db_time(message.sent_at.as_ref()))
        .bind(opt_to_db_time(message.delivered_at.as_ref()))
        .bind(opt_to_db_time(message.failed_at.as_ref()))
        .bind(opt_to_db_time(message.expired_at.as_ref()))
        .bind(opt_to_db_time(message.received_at.as_ref()))
        .bind(to_db_time(&message.updated_at))
        .bind(message.id.to_string())
        .bind(message.user_id.as_str())
        .execute(&mut *tx)
        .await?;

        if let Some(event) = event {
            insert_event(&mut tx, event).await?;
        }
        tx.commit().await?;
        trace!(message_id = %message.id, status = message.status.as_str(), "message updated");
        Ok(())
    }

    async fn store_event(&self, event: &MessageEvent) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;
        let inserted = insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn events(&self, message_id: Uuid) -> Result<Vec<MessageEvent>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, message_id, user_id, name, timestamp, error_message, source, created_at \
             FROM message_events WHERE message_id = ?1 ORDER BY timestamp ASC, created_at ASC",
        )
        .bind(message_id.to_string())
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(MessageEvent::try_from).collect()
    }

    async fn latest_for_pair_excluding(
        &self,
        user_id: &UserId,
        owner: &str,
        contact: &str,
        exclude: Uuid,
    ) -> Result<Option<Message>, StoreError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE user_id = ?1 AND owner = ?2 AND contact = ?3 AND id != ?4 \
             ORDER BY COALESCE(last_event_at, request_received_at) DESC, created_at DESC \
             LIMIT 1"
        );
        let row: Option<MessageRow> = sqlx::query_as(&sql)
            .bind(user_id.as_str())
            .bind(owner)
            .bind(contact)
            .bind(exclude.to_string())
            .fetch_optional(&self.db)
            .await?;
        row.map(Message::try_from).transpose()
    }

    async fn delete(&self, user_id: &UserId, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(user_id.as_str())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_owner_and_contact(
        &self,
        user_id: &UserId,
        owner: &str,
        contact: &str,
    ) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM messages WHERE user_id = ?1 AND owner = ?2 AND contact = ?3")
                .bind(user_id.as_str())
                .bind(owner)
                .bind(contact)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE user_id = ?1")
            .bind(user_id.as_str())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
