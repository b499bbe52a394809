//! Domain entities shared across the crate.
//!
//! Entities are plain data. Status transitions are decided in
//! [`crate::messages::transition`] and applied through the services; nothing
//! in this module touches storage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of the account that owns messages and threads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// An enum value read from storage or a payload was not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field} value: {value:?}")]
pub struct ParseEnumError {
    /// Which field held the bad value.
    pub field: &'static str,
    /// The unexpected value.
    pub value: String,
}

// ---------------------------------------------------------------------------
// SIM selector
// ---------------------------------------------------------------------------

/// SIM card slot the phone should use to send a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sim {
    /// First SIM slot.
    #[serde(rename = "SIM1")]
    Sim1,
    /// Second SIM slot.
    #[serde(rename = "SIM2")]
    Sim2,
    /// Whatever the phone is configured to use.
    #[default]
    #[serde(rename = "DEFAULT")]
    Default,
}

impl Sim {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sim1 => "SIM1",
            Self::Sim2 => "SIM2",
            Self::Default => "DEFAULT",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised SIM slot.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "SIM1" => Ok(Self::Sim1),
            "SIM2" => Ok(Self::Sim2),
            "DEFAULT" => Ok(Self::Default),
            other => Err(ParseEnumError {
                field: "sim",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Message status
// ---------------------------------------------------------------------------

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Accepted by the API, not yet picked up by a phone.
    Pending,
    /// Waiting for a caller-supplied future send time.
    Scheduled,
    /// The phone is sending the message.
    Sending,
    /// The phone handed the message to the carrier.
    Sent,
    /// The carrier confirmed delivery.
    Delivered,
    /// Sending failed.
    Failed,
    /// No acknowledgement arrived within the expiration window.
    Expired,
    /// Inbound message received by the phone.
    Received,
}

impl MessageStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Received => "received",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            "received" => Ok(Self::Received),
            other => Err(ParseEnumError {
                field: "status",
                value: other.to_owned(),
            }),
        }
    }

    /// Progress rank used to break ties between transitions that carry the
    /// same timestamp. Higher ranks win.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Scheduled => 1,
            Self::Sending => 2,
            Self::Sent => 3,
            Self::Expired => 4,
            Self::Failed => 5,
            Self::Delivered | Self::Received => 6,
        }
    }

    /// Returns `true` while the message still awaits an acknowledgement and
    /// may therefore be expired.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled | Self::Sending)
    }

    /// Returns `true` for statuses that end a delivery attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Delivered | Self::Failed | Self::Expired | Self::Received
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of an entry in the message event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageEventName {
    /// The phone started sending.
    Sending,
    /// The phone sent the message.
    Sent,
    /// The carrier delivered the message.
    Delivered,
    /// Sending failed.
    Failed,
    /// The expiration window passed without acknowledgement.
    Expired,
    /// An inbound message was received.
    Received,
    /// A push notification was scheduled for a future send time.
    Scheduled,
    /// The push notification reached the phone.
    NotificationSent,
    /// The push notification could not be sent.
    NotificationFailed,
}

impl MessageEventName {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Received => "received",
            Self::Scheduled => "scheduled",
            Self::NotificationSent => "notification-sent",
            Self::NotificationFailed => "notification-failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised event name.
    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            "received" => Ok(Self::Received),
            "scheduled" => Ok(Self::Scheduled),
            "notification-sent" => Ok(Self::NotificationSent),
            "notification-failed" => Ok(Self::NotificationFailed),
            other => Err(ParseEnumError {
                field: "name",
                value: other.to_owned(),
            }),
        }
    }

    /// The event name recorded for a status transition.
    pub fn for_status(status: MessageStatus) -> Option<Self> {
        match status {
            MessageStatus::Pending => None,
            MessageStatus::Scheduled => Some(Self::Scheduled),
            MessageStatus::Sending => Some(Self::Sending),
            MessageStatus::Sent => Some(Self::Sent),
            MessageStatus::Delivered => Some(Self::Delivered),
            MessageStatus::Failed => Some(Self::Failed),
            MessageStatus::Expired => Some(Self::Expired),
            MessageStatus::Received => Some(Self::Received),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// An SMS message and its current delivery state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Address of the phone that sends (or received) the message.
    pub owner: String,
    /// Address of the other party.
    pub contact: String,
    /// Message body.
    pub content: String,
    /// Current delivery status.
    pub status: MessageStatus,
    /// SIM slot used for sending.
    pub sim: Sim,
    /// Caller-supplied idempotency token.
    pub request_id: Option<String>,
    /// Maximum send attempts before giving up.
    pub max_send_attempts: u32,
    /// Number of times the phone started sending.
    pub send_attempt_count: u32,
    /// Caller-requested future send time.
    pub scheduled_send_time: Option<DateTime<Utc>>,
    /// When a push notification was scheduled for this message.
    pub notification_scheduled_at: Option<DateTime<Utc>>,
    /// When the push notification reached the phone.
    pub notification_sent_at: Option<DateTime<Utc>>,
    /// Error text from the last failure, shown to the user verbatim.
    pub failure_reason: Option<String>,
    /// Timestamp of the last applied status transition.
    pub last_event_at: Option<DateTime<Utc>>,
    /// When the phone sent the message.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the carrier delivered the message.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When sending failed.
    pub failed_at: Option<DateTime<Utc>>,
    /// When the message expired.
    pub expired_at: Option<DateTime<Utc>>,
    /// When an inbound message was received.
    pub received_at: Option<DateTime<Utc>>,
    /// When the API accepted the request.
    pub request_received_at: DateTime<Utc>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row update time.
    pub updated_at: DateTime<Utc>,
}

/// Immutable audit record of something that happened to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Unique event row identifier.
    pub id: Uuid,
    /// Message the event belongs to.
    pub message_id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// What happened.
    pub name: MessageEventName,
    /// When it happened, as reported by the producer.
    pub timestamp: DateTime<Utc>,
    /// Error text attached to failure events.
    pub error_message: Option<String>,
    /// Who produced the event.
    pub source: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Summary of the latest message state between one owner and one contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageThread {
    /// Unique thread identifier.
    pub id: Uuid,
    /// Owning account.
    pub user_id: UserId,
    /// Owner phone address.
    pub owner: String,
    /// Contact address.
    pub contact: String,
    /// Whether the user archived the conversation.
    pub is_archived: bool,
    /// Conversation color tag.
    pub color: String,
    /// Status of the last message.
    pub status: MessageStatus,
    /// Content of the last message, if one is known.
    pub last_message_content: Option<String>,
    /// Weak reference to the last message.
    pub last_message_id: Option<Uuid>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row update time.
    pub updated_at: DateTime<Utc>,
    /// Timestamp of the most recent meaningful message event, used for
    /// conversation ordering.
    pub order_timestamp: Option<DateTime<Utc>>,
}

impl MessageThread {
    /// Point the thread at a message event.
    pub fn update(
        &mut self,
        timestamp: DateTime<Utc>,
        message_id: Uuid,
        content: &str,
        status: MessageStatus,
    ) -> &mut Self {
        self.order_timestamp = Some(timestamp);
        self.last_message_id = Some(message_id);
        self.status = status;
        self.last_message_content = Some(content.to_owned());
        self
    }

    /// Set the archived flag.
    pub fn update_archive(&mut self, is_archived: bool) -> &mut Self {
        self.is_archived = is_archived;
        self
    }

    /// Returns `true` if the thread currently points at `id`.
    pub fn has_last_message(&self, id: Uuid) -> bool {
        self.last_message_id == Some(id)
    }

    /// Returns `true` if an update at `timestamp` for `message_id` with
    /// `status` should replace what the thread currently shows.
    pub fn accepts(&self, timestamp: DateTime<Utc>, message_id: Uuid, status: MessageStatus) -> bool {
        match self.order_timestamp {
            None => true,
            Some(current) if timestamp > current => true,
            Some(current) if timestamp == current => {
                self.has_last_message(message_id) && status.rank() >= self.status.rank()
            }
            Some(_) => false,
        }
    }
}
