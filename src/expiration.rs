//! Expiration supervisor.
//!
//! When a push notification reaches the phone, a deferred
//! `message.send.expired.check` event is armed through the
//! [`TaskScheduler`]. When it fires it re-enters the pipeline like any other
//! event, and [`ExpirationSupervisor::check_expired`] expires the message only
//! if no terminal status has landed in the meantime.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::events::payloads::MessageSendExpiredCheckPayload;
use crate::events::{EventEnvelope, EventType};
use crate::messages::{HandleMessageParams, MessageService};
use crate::scheduler::{PushTask, TaskHandle, TaskScheduler};
use crate::threads::{MessageThreadService, MessageThreadUpdateParams};
use crate::types::{Message, MessageStatus, UserId};

/// Acknowledgement window used when the notification does not carry one.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(600);

/// Header naming the queue a fired task belongs to.
pub const QUEUE_HEADER: &str = "X-Smsflow-Queue";

/// Source recorded on envelopes and events produced by the supervisor.
pub const EXPIRATION_SOURCE: &str = "smsflow/expiration";

/// Parameters for [`ExpirationSupervisor::schedule_expiration_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageScheduleExpirationParams {
    /// Message ID.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// When the notification reached the phone.
    pub notification_sent_at: DateTime<Utc>,
    /// Phone that received the notification.
    pub phone_id: Uuid,
    /// Producer of the triggering event.
    pub source: String,
    /// Acknowledgement window; the supervisor default applies when `None`.
    pub message_expiration_duration: Option<Duration>,
}

/// Where fired checks are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationTarget {
    /// Ingest endpoint URL.
    pub endpoint: String,
    /// Queue name sent in [`QUEUE_HEADER`].
    pub queue_name: String,
    /// Bearer token for the ingest endpoint.
    pub auth_token: Option<String>,
    /// Window used when the notification does not specify one.
    pub default_duration: Duration,
}

/// Arms and resolves expiration checks.
pub struct ExpirationSupervisor {
    messages: Arc<MessageService>,
    threads: Arc<MessageThreadService>,
    scheduler: Arc<dyn TaskScheduler>,
    target: ExpirationTarget,
}

impl std::fmt::Debug for ExpirationSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationSupervisor")
            .field("target", &self.target.endpoint)
            .finish_non_exhaustive()
    }
}

impl ExpirationSupervisor {
    /// Create a supervisor delivering checks to `target`.
    pub fn new(
        messages: Arc<MessageService>,
        threads: Arc<MessageThreadService>,
        scheduler: Arc<dyn TaskScheduler>,
        target: ExpirationTarget,
    ) -> Self {
        Self {
            messages,
            threads,
            scheduler,
            target,
        }
    }

    /// Arm a check for `notification_sent_at + duration`.
    ///
    /// Returns `None` when the window is zero or out of range (no check is
    /// armed).
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be built or the scheduler
    /// rejects the task.
    pub async fn schedule_expiration_check(
        &self,
        params: &MessageScheduleExpirationParams,
    ) -> Result<Option<TaskHandle>, ServiceError> {
        let duration = params
            .message_expiration_duration
            .unwrap_or(self.target.default_duration);
        if duration.is_zero() {
            warn!(
                message_id = %params.message_id,
                "zero expiration window, no expiration check armed"
            );
            return Ok(None);
        }

        let Some(deadline) = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|window| params.notification_sent_at.checked_add_signed(window))
        else {
            warn!(
                message_id = %params.message_id,
                window_secs = duration.as_secs(),
                "expiration window out of range, no expiration check armed"
            );
            return Ok(None);
        };
        let delay = deadline
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let payload = MessageSendExpiredCheckPayload {
            message_id: params.message_id,
            user_id: params.user_id.clone(),
            deadline,
        };
        let envelope =
            EventEnvelope::new(EventType::MessageSendExpiredCheck, EXPIRATION_SOURCE, &payload)?;

        let mut task = PushTask::post_json(self.target.endpoint.clone(), &envelope)?
            .with_header(QUEUE_HEADER, self.target.queue_name.clone());
        if let Some(token) = &self.target.auth_token {
            task = task.with_header("Authorization", format!("Bearer {token}"));
        }

        let handle = self.scheduler.enqueue(task, delay).await?;
        info!(
            message_id = %params.message_id,
            phone_id = %params.phone_id,
            event_id = %envelope.id,
            deadline = %deadline,
            source = %params.source,
            "expiration check armed"
        );
        Ok(Some(handle))
    }

    /// Expire the message if it is still outstanding at the check's deadline,
    /// then update its thread. Returns the expired message, or `None` if the
    /// check was a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a repository read or write fails. A message that
    /// was deleted in the meantime is a no-op.
    pub async fn check_expired(
        &self,
        payload: &MessageSendExpiredCheckPayload,
    ) -> Result<Option<Message>, ServiceError> {
        let params = HandleMessageParams {
            id: payload.message_id,
            user_id: payload.user_id.clone(),
            timestamp: payload.deadline,
            source: EXPIRATION_SOURCE.to_owned(),
        };
        let message = match self.messages.expire_if_outstanding(&params).await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(e) if e.is_not_found() => {
                info!(
                    message_id = %payload.message_id,
                    "message deleted before its expiration check fired"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        self.threads
            .update_thread(&MessageThreadUpdateParams {
                owner: message.owner.clone(),
                contact: message.contact.clone(),
                user_id: message.user_id.clone(),
                status: MessageStatus::Expired,
                timestamp: payload.deadline,
                content: message.content.clone(),
                message_id: message.id,
            })
            .await?;

        info!(
            message_id = %message.id,
            deadline = %payload.deadline,
            "message expired"
        );
        Ok(Some(message))
    }
}
