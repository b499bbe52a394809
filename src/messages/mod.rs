//! Message status state machine.
//!
//! [`MessageService`] is the only writer of message rows. Every transition
//! runs under the per-message lock: load, compare the event timestamp against
//! the last applied one (see [`transition`]), then persist the message and its
//! event record in a single transaction. Stale and duplicate events are
//! dropped with a log line and reported as [`Outcome::Skipped`], never as
//! errors, so replays under at-least-once delivery are harmless.

pub mod transition;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use self::transition::Decision;
use crate::error::ServiceError;
use crate::store::{KeyedLocks, MessageRepository};
use crate::types::{Message, MessageEvent, MessageEventName, MessageStatus, Sim, UserId};

/// Identifies a message transition and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleMessageParams {
    /// Message ID.
    pub id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Event timestamp reported by the producer.
    pub timestamp: DateTime<Utc>,
    /// Producer of the event.
    pub source: String,
}

/// Parameters for [`MessageService::handle_message_failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleMessageFailedParams {
    /// Message ID.
    pub id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Failure text shown to the user verbatim.
    pub error_message: String,
    /// Event timestamp reported by the producer.
    pub timestamp: DateTime<Utc>,
    /// Producer of the event.
    pub source: String,
}

/// Parameters for [`MessageService::store_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStoreEventParams {
    /// Message ID.
    pub message_id: Uuid,
    /// What happened.
    pub event_name: MessageEventName,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Optional error text.
    pub error_message: Option<String>,
    /// Producer of the event.
    pub source: String,
}

/// Parameters for [`MessageService::store_pending_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePendingMessageParams {
    /// New message ID.
    pub id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Sending phone address.
    pub owner: String,
    /// Recipient address.
    pub contact: String,
    /// Message body.
    pub content: String,
    /// SIM slot.
    pub sim: Sim,
    /// Caller-supplied idempotency token.
    pub request_id: Option<String>,
    /// Maximum send attempts.
    pub max_send_attempts: u32,
    /// Optional future send time.
    pub scheduled_send_time: Option<DateTime<Utc>>,
    /// When the API accepted the request.
    pub request_received_at: DateTime<Utc>,
}

/// Parameters for [`MessageService::store_received_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReceivedMessageParams {
    /// New message ID.
    pub id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Receiving phone address.
    pub owner: String,
    /// Sender address.
    pub contact: String,
    /// Message body.
    pub content: String,
    /// SIM slot.
    pub sim: Sim,
    /// When the phone received the message.
    pub timestamp: DateTime<Utc>,
    /// Producer of the event.
    pub source: String,
}

/// Result of a status transition request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The transition was applied; carries the updated message.
    Applied(Message),
    /// The transition was dropped; carries the unchanged message.
    Skipped(Message),
}

impl Outcome {
    /// Returns `true` when the transition changed the message.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// The message after the request.
    pub fn message(&self) -> &Message {
        match self {
            Self::Applied(message) | Self::Skipped(message) => message,
        }
    }
}

/// Applies delivery events to messages.
pub struct MessageService {
    repository: Arc<dyn MessageRepository>,
    locks: KeyedLocks<Uuid>,
}

impl std::fmt::Debug for MessageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageService")
            .field("active_locks", &self.locks.active())
            .finish_non_exhaustive()
    }
}

impl MessageService {
    /// Create a service over `repository`.
    pub fn new(repository: Arc<dyn MessageRepository>) -> Self {
        Self {
            repository,
            locks: KeyedLocks::new(),
        }
    }

    /// Load a message owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the message does not exist or is
    /// owned by another user.
    pub async fn get_message(&self, user_id: &UserId, id: Uuid) -> Result<Message, ServiceError> {
        self.repository
            .load(user_id, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                entity: "message",
                id: id.to_string(),
            })
    }

    /// The event log of a message owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the message is not visible.
    pub async fn get_events(
        &self,
        user_id: &UserId,
        id: Uuid,
    ) -> Result<Vec<MessageEvent>, ServiceError> {
        let message = self.get_message(user_id, id).await?;
        Ok(self.repository.events(message.id).await?)
    }

    /// Record a message accepted by the API with status `Pending`.
    ///
    /// Submitting the same message ID again returns the stored message.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository write fails.
    pub async fn store_pending_message(
        &self,
        params: StorePendingMessageParams,
    ) -> Result<Message, ServiceError> {
        let _guard = self.locks.lock(params.id).await;
        let now = Utc::now();
        let message = Message {
            id: params.id,
            user_id: params.user_id,
            owner: params.owner,
            contact: params.contact,
            content: params.content,
            status: MessageStatus::Pending,
            sim: params.sim,
            request_id: params.request_id,
            max_send_attempts: params.max_send_attempts,
            send_attempt_count: 0,
            scheduled_send_time: params.scheduled_send_time,
            notification_scheduled_at: None,
            notification_sent_at: None,
            failure_reason: None,
            last_event_at: None,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            expired_at: None,
            received_at: None,
            request_received_at: params.request_received_at,
            created_at: now,
            updated_at: now,
        };

        if self.repository.insert(&message, None).await? {
            info!(message_id = %message.id, user_id = %message.user_id, "pending message stored");
            return Ok(message);
        }
        debug!(message_id = %message.id, "message already stored");
        self.get_message(&message.user_id, message.id).await
    }

    /// Record an inbound message received by the phone.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository write fails.
    pub async fn store_received_message(
        &self,
        params: StoreReceivedMessageParams,
    ) -> Result<Message, ServiceError> {
        let _guard = self.locks.lock(params.id).await;
        let now = Utc::now();
        let mut message = Message {
            id: params.id,
            user_id: params.user_id,
            owner: params.owner,
            contact: params.contact,
            content: params.content,
            status: MessageStatus::Pending,
            sim: params.sim,
            request_id: None,
            max_send_attempts: 1,
            send_attempt_count: 0,
            scheduled_send_time: None,
            notification_scheduled_at: None,
            notification_sent_at: None,
            failure_reason: None,
            last_event_at: None,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            expired_at: None,
            received_at: None,
            request_received_at: params.timestamp,
            created_at: now,
            updated_at: now,
        };
        transition::apply(&mut message, MessageStatus::Received, params.timestamp, now);
        let event = new_event(&message, MessageEventName::Received, params.timestamp, None, &params.source);

        if self.repository.insert(&message, Some(&event)).await? {
            info!(message_id = %message.id, user_id = %message.user_id, "received message stored");
            return Ok(message);
        }
        debug!(message_id = %message.id, "received message already stored");
        self.get_message(&message.user_id, message.id).await
    }

    /// Transition to `Sending`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] for unknown messages and repository
    /// errors otherwise. Stale events are not errors.
    pub async fn handle_message_sending(
        &self,
        params: &HandleMessageParams,
    ) -> Result<Outcome, ServiceError> {
        self.transition(params, MessageStatus::Sending, None).await
    }

    /// Transition to `Sent`.
    ///
    /// # Errors
    ///
    /// See [`MessageService::handle_message_sending`].
    pub async fn handle_message_sent(
        &self,
        params: &HandleMessageParams,
    ) -> Result<Outcome, ServiceError> {
        self.transition(params, MessageStatus::Sent, None).await
    }

    /// Transition to `Delivered`.
    ///
    /// # Errors
    ///
    /// See [`MessageService::handle_message_sending`].
    pub async fn handle_message_delivered(
        &self,
        params: &HandleMessageParams,
    ) -> Result<Outcome, ServiceError> {
        self.transition(params, MessageStatus::Delivered, None).await
    }

    /// Transition to `Failed`, keeping the error text for display.
    ///
    /// # Errors
    ///
    /// See [`MessageService::handle_message_sending`].
    pub async fn handle_message_failed(
        &self,
        params: &HandleMessageFailedParams,
    ) -> Result<Outcome, ServiceError> {
        let handle = HandleMessageParams {
            id: params.id,
            user_id: params.user_id.clone(),
            timestamp: params.timestamp,
            source: params.source.clone(),
        };
        self.transition(&handle, MessageStatus::Failed, Some(&params.error_message))
            .await
    }

    /// Transition to `Expired`.
    ///
    /// # Errors
    ///
    /// See [`MessageService::handle_message_sending`].
    pub async fn handle_message_expired(
        &self,
        params: &HandleMessageParams,
    ) -> Result<Outcome, ServiceError> {
        self.transition(params, MessageStatus::Expired, None).await
    }

    /// Transition to `Scheduled` after a push notification was scheduled for
    /// a future send time.
    ///
    /// # Errors
    ///
    /// See [`MessageService::handle_message_sending`].
    pub async fn handle_message_notification_scheduled(
        &self,
        params: &HandleMessageParams,
    ) -> Result<Outcome, ServiceError> {
        self.transition(params, MessageStatus::Scheduled, None).await
    }

    /// Record that the push notification reached the phone. The delivery
    /// status is left alone.
    ///
    /// # Errors
    ///
    /// See [`MessageService::handle_message_sending`].
    pub async fn handle_message_notification_sent(
        &self,
        params: &HandleMessageParams,
    ) -> Result<Outcome, ServiceError> {
        let _guard = self.locks.lock(params.id).await;
        let mut message = self.get_message(&params.user_id, params.id).await?;

        if message
            .notification_sent_at
            .is_some_and(|sent_at| sent_at >= params.timestamp)
        {
            debug!(
                message_id = %message.id,
                timestamp = %params.timestamp,
                "notification already recorded"
            );
            return Ok(Outcome::Skipped(message));
        }

        message.notification_sent_at = Some(params.timestamp);
        message.updated_at = Utc::now();
        let event = new_event(
            &message,
            MessageEventName::NotificationSent,
            params.timestamp,
            None,
            &params.source,
        );
        self.repository.update(&message, Some(&event)).await?;
        info!(message_id = %message.id, "notification sent recorded");
        Ok(Outcome::Applied(message))
    }

    /// Append an event without changing the message status.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository write fails.
    pub async fn store_event(
        &self,
        message: &Message,
        params: MessageStoreEventParams,
    ) -> Result<MessageEvent, ServiceError> {
        let event = new_event(
            message,
            params.event_name,
            params.timestamp,
            params.error_message,
            &params.source,
        );
        if !self.repository.store_event(&event).await? {
            debug!(
                message_id = %message.id,
                event = event.name.as_str(),
                "event already recorded"
            );
        }
        Ok(event)
    }

    /// Expire the message if it is still awaiting acknowledgement.
    ///
    /// Returns the expired message, or `None` when a terminal status has
    /// already landed (or the expiration is stale).
    ///
    /// # Errors
    ///
    /// See [`MessageService::handle_message_sending`].
    pub async fn expire_if_outstanding(
        &self,
        params: &HandleMessageParams,
    ) -> Result<Option<Message>, ServiceError> {
        let _guard = self.locks.lock(params.id).await;
        let message = self.get_message(&params.user_id, params.id).await?;

        if !message.status.is_outstanding() {
            info!(
                message_id = %message.id,
                status = message.status.as_str(),
                "message already settled, expiration check is a no-op"
            );
            return Ok(None);
        }

        match self
            .apply_locked(message, params, MessageStatus::Expired, None)
            .await?
        {
            Outcome::Applied(message) => Ok(Some(message)),
            Outcome::Skipped(_) => Ok(None),
        }
    }

    /// Delete a message and its events.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if the message is not visible.
    pub async fn delete_message(&self, user_id: &UserId, id: Uuid) -> Result<Message, ServiceError> {
        let _guard = self.locks.lock(id).await;
        let message = self.get_message(user_id, id).await?;
        self.repository.delete(user_id, id).await?;
        info!(message_id = %id, user_id = %user_id, "message deleted");
        Ok(message)
    }

    /// Delete all messages between `owner` and `contact`.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository write fails.
    pub async fn delete_by_owner_and_contact(
        &self,
        user_id: &UserId,
        owner: &str,
        contact: &str,
    ) -> Result<u64, ServiceError> {
        let count = self
            .repository
            .delete_by_owner_and_contact(user_id, owner, contact)
            .await?;
        info!(user_id = %user_id, owner, contact, count, "messages deleted for thread");
        Ok(count)
    }

    /// Delete all messages of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository write fails.
    pub async fn delete_all_for_user(&self, user_id: &UserId) -> Result<u64, ServiceError> {
        let count = self.repository.delete_all_for_user(user_id).await?;
        info!(user_id = %user_id, count, "messages deleted for user");
        Ok(count)
    }

    async fn transition(
        &self,
        params: &HandleMessageParams,
        status: MessageStatus,
        failure_reason: Option<&str>,
    ) -> Result<Outcome, ServiceError> {
        let _guard = self.locks.lock(params.id).await;
        let message = self.get_message(&params.user_id, params.id).await?;
        self.apply_locked(message, params, status, failure_reason)
            .await
    }

    /// Decide and persist. The caller holds the message lock.
    async fn apply_locked(
        &self,
        mut message: Message,
        params: &HandleMessageParams,
        status: MessageStatus,
        failure_reason: Option<&str>,
    ) -> Result<Outcome, ServiceError> {
        let decision = transition::decide(&message, status, params.timestamp);
        if decision != Decision::Apply {
            info!(
                message_id = %message.id,
                current = message.status.as_str(),
                incoming = status.as_str(),
                timestamp = %params.timestamp,
                source = %params.source,
                ?decision,
                "message transition skipped"
            );
            return Ok(Outcome::Skipped(message));
        }

        transition::apply(&mut message, status, params.timestamp, Utc::now());
        if let Some(reason) = failure_reason {
            message.failure_reason = Some(reason.to_owned());
        }

        let event = MessageEventName::for_status(status).map(|name| {
            new_event(
                &message,
                name,
                params.timestamp,
                failure_reason.map(str::to_owned),
                &params.source,
            )
        });
        self.repository.update(&message, event.as_ref()).await?;

        info!(
            message_id = %message.id,
            status = status.as_str(),
            timestamp = %params.timestamp,
            "message transition applied"
        );
        Ok(Outcome::Applied(message))
    }
}

fn new_event(
    message: &Message,
    name: MessageEventName,
    timestamp: DateTime<Utc>,
    error_message: Option<String>,
    source: &str,
) -> MessageEvent {
    MessageEvent {
        id: Uuid::new_v4(),
        message_id: message.id,
        user_id: message.user_id.clone(),
        name,
        timestamp,
        error_message,
        source: source.to_owned(),
        created_at: Utc::now(),
    }
}
