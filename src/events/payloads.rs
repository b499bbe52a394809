//! Typed payloads carried in [`EventEnvelope::data`](super::EventEnvelope).
//!
//! Unknown fields are ignored; missing required fields fail decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{MessageStatus, Sim, UserId};

/// Payload of `message.api.sent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageApiSentPayload {
    /// New message ID.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Sending phone address.
    pub owner: String,
    /// Recipient address.
    pub contact: String,
    /// Caller-supplied idempotency token.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Maximum send attempts.
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    /// Optional future send time.
    #[serde(default)]
    pub scheduled_send_time: Option<DateTime<Utc>>,
    /// When the API accepted the request.
    pub request_received_at: DateTime<Utc>,
    /// Message body.
    pub content: String,
    /// SIM slot.
    #[serde(default)]
    pub sim: Sim,
}

fn default_max_send_attempts() -> u32 {
    2
}

/// Payload of `message.phone.sending`, `message.phone.sent` and
/// `message.phone.delivered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePhonePayload {
    /// Message ID.
    pub id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Caller-supplied idempotency token.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Sending phone address.
    pub owner: String,
    /// Recipient address.
    pub contact: String,
    /// When the phone observed the transition.
    pub timestamp: DateTime<Utc>,
    /// Message body.
    pub content: String,
    /// SIM slot.
    #[serde(default)]
    pub sim: Sim,
}

/// Payload of `message.send.failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSendFailedPayload {
    /// Message ID.
    pub id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Sending phone address.
    pub owner: String,
    /// Recipient address.
    pub contact: String,
    /// Failure text reported by the phone.
    pub error_message: String,
    /// When the failure happened.
    pub timestamp: DateTime<Utc>,
    /// Message body.
    pub content: String,
    /// SIM slot.
    #[serde(default)]
    pub sim: Sim,
}

/// Payload of `message.phone.received`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePhoneReceivedPayload {
    /// New message ID.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Receiving phone address.
    pub owner: String,
    /// Sender address.
    pub contact: String,
    /// When the phone received the message.
    pub timestamp: DateTime<Utc>,
    /// Message body.
    pub content: String,
    /// SIM slot.
    #[serde(default)]
    pub sim: Sim,
}

/// Payload of `message.notification.sent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNotificationSentPayload {
    /// Message ID.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Phone that received the notification.
    pub phone_id: Uuid,
    /// When the notification was sent.
    pub notification_sent_at: DateTime<Utc>,
    /// Acknowledgement window in seconds; the configured default applies
    /// when absent.
    #[serde(default)]
    pub message_expiration_seconds: Option<u64>,
}

/// Payload of `message.notification.failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNotificationFailedPayload {
    /// Message ID.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Phone the notification was meant for.
    pub phone_id: Uuid,
    /// Failure text from the push provider.
    pub error_message: String,
    /// When the notification failed.
    pub notification_failed_at: DateTime<Utc>,
}

/// Payload of `message.notification.scheduled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNotificationScheduledPayload {
    /// Message ID.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Sending phone address.
    pub owner: String,
    /// Recipient address.
    pub contact: String,
    /// Message body.
    pub content: String,
    /// When the notification was scheduled.
    pub scheduled_at: DateTime<Utc>,
    /// Target phone.
    pub phone_id: Uuid,
}

/// Payload of `message.send.expired.check`, the synthetic event fired by the
/// scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSendExpiredCheckPayload {
    /// Message ID.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// The deadline the check was armed for.
    pub deadline: DateTime<Utc>,
}

/// Payload of `message.send.expired`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSendExpiredPayload {
    /// Message ID.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Sending phone address.
    pub owner: String,
    /// Recipient address.
    pub contact: String,
    /// Message body.
    pub content: String,
    /// When the message expired.
    pub timestamp: DateTime<Utc>,
}

/// Payload of `message.api.deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageApiDeletedPayload {
    /// Deleted message ID.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Phone address.
    pub owner: String,
    /// Contact address.
    pub contact: String,
    /// Status the message had before deletion.
    #[serde(default)]
    pub previous_message_status: Option<MessageStatus>,
    /// When the deletion happened.
    pub timestamp: DateTime<Utc>,
}

/// Payload of `message-thread.api.deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageThreadApiDeletedPayload {
    /// Deleted thread ID.
    pub message_thread_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Phone address.
    pub owner: String,
    /// Contact address.
    pub contact: String,
    /// When the deletion happened.
    pub timestamp: DateTime<Utc>,
}

/// Payload of `user.account.deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccountDeletedPayload {
    /// Deleted account.
    pub user_id: UserId,
    /// When the deletion happened.
    pub timestamp: DateTime<Utc>,
}
