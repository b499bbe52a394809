//! Thread aggregator.
//!
//! A thread summarizes one conversation `(user, owner, contact)`: the status
//! and content of its most recent message event. Updates are serialized per
//! conversation and ordered by event timestamp, so out-of-order delivery
//! events converge on the latest one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::events::payloads::MessageApiDeletedPayload;
use crate::store::{KeyedLocks, MessageRepository, MessageThreadRepository, ThreadListParams};
use crate::types::{MessageStatus, MessageThread, UserId};

/// Default page size for [`MessageThreadService::get_threads`].
pub const DEFAULT_THREAD_LIMIT: u32 = 20;

/// Palette thread colors are drawn from.
pub const THREAD_COLORS: &[&str] = &[
    "deep-purple",
    "indigo",
    "blue",
    "light-blue",
    "cyan",
    "teal",
    "green",
    "light-green",
    "orange",
    "deep-orange",
    "pink",
    "brown",
];

/// A message event to fold into its conversation's thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageThreadUpdateParams {
    /// Owner phone address.
    pub owner: String,
    /// Contact address.
    pub contact: String,
    /// Owning account.
    pub user_id: UserId,
    /// Status carried by the event.
    pub status: MessageStatus,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Message body.
    pub content: String,
    /// Message the event belongs to.
    pub message_id: Uuid,
}

/// Filters for [`MessageThreadService::get_threads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageThreadGetParams {
    /// Owning account.
    pub user_id: UserId,
    /// Owner phone address.
    pub owner: String,
    /// List archived threads instead of active ones.
    pub is_archived: bool,
    /// Substring matched against contact or last content.
    pub query: Option<String>,
    /// Rows to skip.
    pub skip: u32,
    /// Page size; `0` means [`DEFAULT_THREAD_LIMIT`].
    pub limit: u32,
}

impl MessageThreadGetParams {
    /// First page of active threads for `owner`.
    pub fn new(user_id: UserId, owner: impl Into<String>) -> Self {
        Self {
            user_id,
            owner: owner.into(),
            is_archived: false,
            query: None,
            skip: 0,
            limit: DEFAULT_THREAD_LIMIT,
        }
    }
}

type ThreadKey = (UserId, String, String);

/// Maintains conversation threads.
pub struct MessageThreadService {
    threads: Arc<dyn MessageThreadRepository>,
    messages: Arc<dyn MessageRepository>,
    locks: KeyedLocks<ThreadKey>,
}

impl std::fmt::Debug for MessageThreadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageThreadService")
            .field("active_locks", &self.locks.active())
            .finish_non_exhaustive()
    }
}

impl MessageThreadService {
    /// Create a service over the thread and message repositories.
    pub fn new(
        threads: Arc<dyn MessageThreadRepository>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            threads,
            messages,
            locks: KeyedLocks::new(),
        }
    }

    /// Fold a message event into its thread, creating the thread on first
    /// sight. Returns the thread as stored afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn update_thread(
        &self,
        params: &MessageThreadUpdateParams,
    ) -> Result<MessageThread, ServiceError> {
        let _guard = self
            .locks
            .lock(key(&params.user_id, &params.owner, &params.contact))
            .await;

        let mut thread = self
            .threads
            .load_or_create(&new_thread(&params.user_id, &params.owner, &params.contact))
            .await?;

        if !thread.accepts(params.timestamp, params.message_id, params.status) {
            info!(
                thread_id = %thread.id,
                message_id = %params.message_id,
                status = params.status.as_str(),
                timestamp = %params.timestamp,
                "thread already holds a newer event, update ignored"
            );
            return Ok(thread);
        }

        thread.update(
            params.timestamp,
            params.message_id,
            &params.content,
            params.status,
        );
        thread.updated_at = Utc::now();
        self.threads.save(&thread).await?;

        debug!(
            thread_id = %thread.id,
            message_id = %params.message_id,
            status = params.status.as_str(),
            "thread updated"
        );
        Ok(thread)
    }

    /// Repair a thread whose last message was deleted. Returns `None` if the
    /// conversation has no thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn update_after_deleted_message(
        &self,
        payload: &MessageApiDeletedPayload,
    ) -> Result<Option<MessageThread>, ServiceError> {
        let _guard = self
            .locks
            .lock(key(&payload.user_id, &payload.owner, &payload.contact))
            .await;

        let Some(mut thread) = self
            .threads
            .load_by_pair(&payload.user_id, &payload.owner, &payload.contact)
            .await?
        else {
            debug!(message_id = %payload.message_id, "no thread for deleted message");
            return Ok(None);
        };

        if !thread.has_last_message(payload.message_id) {
            debug!(
                thread_id = %thread.id,
                message_id = %payload.message_id,
                "deleted message is not the thread's last message"
            );
            return Ok(Some(thread));
        }

        let latest = self
            .messages
            .latest_for_pair_excluding(
                &payload.user_id,
                &payload.owner,
                &payload.contact,
                payload.message_id,
            )
            .await?;

        match latest {
            Some(message) => {
                let timestamp = message.last_event_at.unwrap_or(message.request_received_at);
                thread.update(timestamp, message.id, &message.content, message.status);
                info!(
                    thread_id = %thread.id,
                    message_id = %message.id,
                    "thread rewound to previous message"
                );
            }
            None => {
                thread.last_message_id = None;
                thread.last_message_content = None;
                info!(thread_id = %thread.id, "thread has no remaining messages");
            }
        }
        thread.updated_at = Utc::now();
        self.threads.save(&thread).await?;
        Ok(Some(thread))
    }

    /// Archive or unarchive a thread.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the thread is not visible.
    pub async fn update_archive(
        &self,
        user_id: &UserId,
        thread_id: Uuid,
        is_archived: bool,
    ) -> Result<MessageThread, ServiceError> {
        let current = self.get_thread(user_id, thread_id).await?;
        let _guard = self
            .locks
            .lock(key(user_id, &current.owner, &current.contact))
            .await;

        // Re-read under the lock so a concurrent update is not lost.
        let mut thread = self.get_thread(user_id, thread_id).await?;
        thread.update_archive(is_archived);
        thread.updated_at = Utc::now();
        self.threads.save(&thread).await?;
        info!(thread_id = %thread_id, is_archived, "thread archive flag set");
        Ok(thread)
    }

    /// Load a thread owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the thread is not visible.
    pub async fn get_thread(
        &self,
        user_id: &UserId,
        id: Uuid,
    ) -> Result<MessageThread, ServiceError> {
        self.threads
            .load(user_id, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                entity: "message thread",
                id: id.to_string(),
            })
    }

    /// List threads newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn get_threads(
        &self,
        params: &MessageThreadGetParams,
    ) -> Result<Vec<MessageThread>, ServiceError> {
        let limit = if params.limit == 0 {
            DEFAULT_THREAD_LIMIT
        } else {
            params.limit
        };
        let list = ThreadListParams {
            user_id: params.user_id.clone(),
            owner: params.owner.clone(),
            is_archived: params.is_archived,
            query: params.query.clone(),
            skip: params.skip,
            limit,
        };
        Ok(self.threads.list(&list).await?)
    }

    /// Delete a thread by ID.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the thread is not visible.
    pub async fn delete_thread(&self, user_id: &UserId, id: Uuid) -> Result<(), ServiceError> {
        if !self.threads.delete(user_id, id).await? {
            return Err(ServiceError::NotFound {
                entity: "message thread",
                id: id.to_string(),
            });
        }
        info!(thread_id = %id, user_id = %user_id, "thread deleted");
        Ok(())
    }

    /// Delete the thread for a conversation, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn delete_by_owner_and_contact(
        &self,
        user_id: &UserId,
        owner: &str,
        contact: &str,
    ) -> Result<u64, ServiceError> {
        let _guard = self.locks.lock(key(user_id, owner, contact)).await;
        let count = self
            .threads
            .delete_by_owner_and_contact(user_id, owner, contact)
            .await?;
        info!(user_id = %user_id, owner, contact, count, "thread deleted by conversation");
        Ok(count)
    }

    /// Delete every thread of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn delete_all_for_user(&self, user_id: &UserId) -> Result<u64, ServiceError> {
        let count = self.threads.delete_all_for_user(user_id).await?;
        info!(user_id = %user_id, count, "threads deleted for user");
        Ok(count)
    }
}

fn key(user_id: &UserId, owner: &str, contact: &str) -> ThreadKey {
    (user_id.clone(), owner.to_owned(), contact.to_owned())
}

fn new_thread(user_id: &UserId, owner: &str, contact: &str) -> MessageThread {
    let now = Utc::now();
    let color = THREAD_COLORS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("indigo");
    MessageThread {
        id: Uuid::new_v4(),
        user_id: user_id.clone(),
        owner: owner.to_owned(),
        contact: contact.to_owned(),
        is_archived: false,
        color: color.to_owned(),
        status: MessageStatus::Pending,
        last_message_content: None,
        last_message_id: None,
        created_at: now,
        updated_at: now,
        order_timestamp: None,
    }
}
