//! SQLite-backed [`MessageThreadRepository`].

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use tracing::trace;
use uuid::Uuid;

use super::{
    from_db_time, opt_from_db_time, opt_to_db_time, parse_uuid, to_db_time,
    MessageThreadRepository, StoreError, ThreadListParams,
};
use crate::types::{MessageStatus, MessageThread, UserId};

const THREAD_COLUMNS: &str = "id, user_id, owner, contact, is_archived, color, status, \
     last_message_content, last_message_id, order_timestamp, created_at, updated_at";

/// Thread repository over a shared SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteMessageThreadRepository {
    db: SqlitePool,
}

impl SqliteMessageThreadRepository {
    /// Wrap an already migrated pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromRow)]
struct ThreadRow {
    id: String,
    user_id: String,
    owner: String,
    contact: String,
    is_archived: bool,
    color: String,
    status: String,
    last_message_content: Option<String>,
    last_message_id: Option<String>,
    order_timestamp: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ThreadRow> for MessageThread {
    type Error = StoreError;

    fn try_from(row: ThreadRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid("id", &row.id)?,
            user_id: UserId(row.user_id),
            owner: row.owner,
            contact: row.contact,
            is_archived: row.is_archived,
            color: row.color,
            status: MessageStatus::parse(&row.status)?,
            last_message_content: row.last_message_content,
            last_message_id: row
                .last_message_id
                .as_deref()
                .map(|id| parse_uuid("last_message_id", id))
                .transpose()?,
            order_timestamp: opt_from_db_time("order_timestamp", row.order_timestamp.as_deref())?,
            created_at: from_db_time("created_at", &row.created_at)?,
            updated_at: from_db_time("updated_at", &row.updated_at)?,
        })
    }
}

#[async_trait]
impl MessageThreadRepository for SqliteMessageThreadRepository {
    async fn load_or_create(
        &self,
        candidate: &MessageThread,
    ) -> Result<MessageThread, StoreError> {
        let result = sqlx::query(
            "INSERT INTO message_threads (id, user_id, owner, contact, is_archived, color, status, \
             last_message_content, last_message_id, order_timestamp, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT (user_id, owner, contact) DO NOTHING",
        )
        .bind(candidate.id.to_string())
        .bind(candidate.user_id.as_str())
        .bind(&candidate.owner)
        .bind(&candidate.contact)
        .bind(candidate.is_archived)
        .bind(&candidate.color)
        .bind(candidate.status.as_str())
        .bind(&candidate.last_message_content)
        .bind(candidate.last_message_id.map(|id| id.to_string()))
        .bind(opt_to_db_time(candidate.order_timestamp.as_ref()))
        .bind(to_db_time(&candidate.created_at))
        .bind(to_db_time(&candidate.updated_at))
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            trace!(thread_id = %candidate.id, owner = %candidate.owner, "thread created");
        }

        self.load_by_pair(&candidate.user_id, &candidate.owner, &candidate.contact)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn load(&self, user_id: &UserId, id: Uuid) -> Result<Option<MessageThread>, StoreError> {
        let sql =
            format!("SELECT {THREAD_COLUMNS} FROM message_threads WHERE id = ?1 AND user_id = ?2");
        let row: Option<ThreadRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .bind(user_id.as_str())
            .fetch_optional(&self.db)
            .await?;
        row.map(MessageThread::try_from).transpose()
    }

    async fn load_by_pair(
        &self,
        user_id: &UserId,
        owner: &str,
        contact: &str,
    ) -> Result<Option<MessageThread>, StoreError> {
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM message_threads \
             WHERE user_id = ?1 AND owner = ?2 AND contact = ?3"
        );
        let row: Option<ThreadRow> = sqlx::query_as(&sql)
            .bind(user_id.as_str())
            .bind(owner)
            .bind(contact)
            .fetch_optional(&self.db)
            .await?;
        row.map(MessageThread::try_from).transpose()
    }

    async fn save(&self, thread: &MessageThread) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE message_threads SET is_archived = ?1, color = ?2, status = ?3, \
             last_message_content = ?4, last_message_id = ?5, order_timestamp = ?6, \
             updated_at = ?7 WHERE id = ?8 AND user_id = ?9",
        )
        .bind(thread.is_archived)
        .bind(&thread.color)
        .bind(thread.status.as_str())
        .bind(&thread.last_message_content)
        .bind(thread.last_message_id.map(|id| id.to_string()))
        .bind(opt_to_db_time(thread.order_timestamp.as_ref()))
        .bind(to_db_time(&thread.updated_at))
        .bind(thread.id.to_string())
        .bind(thread.user_id.as_str())
        .execute(&self.db)
        .await?;
        trace!(thread_id = %thread.id, status = thread.status.as_str(), "thread saved");
        Ok(())
    }

    async fn list(&self, params: &ThreadListParams) -> Result<Vec<MessageThread>, StoreError> {
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM message_threads \
             WHERE user_id = ?1 AND owner = ?2 AND is_archived = ?3 \
             AND (?4 IS NULL OR contact LIKE ?4 ESCAPE '\\' \
             OR last_message_content LIKE ?4 ESCAPE '\\') \
             ORDER BY COALESCE(order_timestamp, created_at) DESC \
             LIMIT ?5 OFFSET ?6"
        );
        let pattern = params
            .query
            .as_deref()
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", escape_like(q)));
        let rows: Vec<ThreadRow> = sqlx::query_as(&sql)
            .bind(params.user_id.as_str())
            .bind(&params.owner)
            .bind(params.is_archived)
            .bind(pattern)
            .bind(i64::from(params.limit))
            .bind(i64::from(params.skip))
            .fetch_all(&self.db)
            .await?;
        rows.into_iter().map(MessageThread::try_from).collect()
    }

    async fn delete(&self, user_id: &UserId, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM message_threads WHERE id = ?1 AND user_id = ?2")
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
        let result = sqlx::query(
            "DELETE FROM message_threads WHERE user_id = ?1 AND owner = ?2 AND contact = ?3",
        )
        .bind(user_id.as_str())
        .bind(owner)
        .bind(contact)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM message_threads WHERE user_id = ?1")
            .bind(user_id.as_str())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Escape `LIKE` wildcards so the query matches literally.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
