//! Event envelope and event type tags.
//!
//! Events arrive as CloudEvents-shaped JSON objects. The envelope is decoded
//! eagerly; the `data` payload is decoded lazily by whichever handler claims
//! the event type, so each handler only declares the fields it needs.

pub mod payloads;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// CloudEvents spec version written on outgoing envelopes.
pub const SPEC_VERSION: &str = "1.0";

/// Every event type the core knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A message was submitted through the API.
    MessageApiSent,
    /// A message was deleted through the API.
    MessageApiDeleted,
    /// The phone started sending a message.
    MessagePhoneSending,
    /// The phone sent a message.
    MessagePhoneSent,
    /// The carrier delivered a message.
    MessagePhoneDelivered,
    /// The phone reported a send failure.
    MessageSendFailed,
    /// The phone received an inbound message.
    MessagePhoneReceived,
    /// A push notification reached the phone.
    MessageNotificationSent,
    /// A push notification could not be sent.
    MessageNotificationFailed,
    /// A push notification was scheduled for a future send time.
    MessageNotificationScheduled,
    /// Deferred check fired by the scheduler.
    MessageSendExpiredCheck,
    /// A message expired.
    MessageSendExpired,
    /// A thread was deleted through the API.
    MessageThreadApiDeleted,
    /// An account was deleted.
    UserAccountDeleted,
}

impl EventType {
    /// All known event types.
    pub const ALL: [EventType; 14] = [
        Self::MessageApiSent,
        Self::MessageApiDeleted,
        Self::MessagePhoneSending,
        Self::MessagePhoneSent,
        Self::MessagePhoneDelivered,
        Self::MessageSendFailed,
        Self::MessagePhoneReceived,
        Self::MessageNotificationSent,
        Self::MessageNotificationFailed,
        Self::MessageNotificationScheduled,
        Self::MessageSendExpiredCheck,
        Self::MessageSendExpired,
        Self::MessageThreadApiDeleted,
        Self::UserAccountDeleted,
    ];

    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageApiSent => "message.api.sent",
            Self::MessageApiDeleted => "message.api.deleted",
            Self::MessagePhoneSending => "message.phone.sending",
            Self::MessagePhoneSent => "message.phone.sent",
            Self::MessagePhoneDelivered => "message.phone.delivered",
            Self::MessageSendFailed => "message.send.failed",
            Self::MessagePhoneReceived => "message.phone.received",
            Self::MessageNotificationSent => "message.notification.sent",
            Self::MessageNotificationFailed => "message.notification.failed",
            Self::MessageNotificationScheduled => "message.notification.scheduled",
            Self::MessageSendExpiredCheck => "message.send.expired.check",
            Self::MessageSendExpired => "message.send.expired",
            Self::MessageThreadApiDeleted => "message-thread.api.deleted",
            Self::UserAccountDeleted => "user.account.deleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an event type string is not one the core handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_owned()))
    }
}

/// A payload could not be decoded into the type its handler expects.
///
/// Always permanent: redelivering the same bytes cannot succeed.
#[derive(Debug, thiserror::Error)]
#[error("cannot decode [{raw}] into [{target}] for event [{event_id}] of type [{event_type}]")]
pub struct DecodeError {
    /// Envelope ID.
    pub event_id: String,
    /// Envelope type string.
    pub event_type: String,
    /// Rust type the payload was decoded into.
    pub target: &'static str,
    /// Raw JSON payload.
    pub raw: String,
    /// Underlying serde error.
    #[source]
    pub source: serde_json::Error,
}

/// A single event as carried by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID assigned by the producer.
    pub id: String,
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Producer identifier.
    pub source: String,
    /// Emission time.
    pub time: DateTime<Utc>,
    /// CloudEvents spec version.
    #[serde(default = "default_spec_version")]
    pub specversion: String,
    /// Payload media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    /// Typed payload, decoded by the handler.
    #[serde(default)]
    pub data: serde_json::Value,
}

fn default_spec_version() -> String {
    SPEC_VERSION.to_owned()
}

impl EventEnvelope {
    /// Build an envelope with a fresh ID, emitted now.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn new<P: Serialize>(
        event_type: EventType,
        source: &str,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.as_str().to_owned(),
            source: source.to_owned(),
            time: Utc::now(),
            specversion: default_spec_version(),
            datacontenttype: Some("application/json".to_owned()),
            data: serde_json::to_value(payload)?,
        })
    }

    /// The parsed event type, or `None` for types the core does not know.
    pub fn kind(&self) -> Option<EventType> {
        self.event_type.parse().ok()
    }

    /// Decode the payload into `P`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] carrying the raw payload and target type.
    pub fn decode<P: DeserializeOwned>(&self) -> Result<P, DecodeError> {
        P::deserialize(&self.data).map_err(|source| DecodeError {
            event_id: self.id.clone(),
            event_type: self.event_type.clone(),
            target: std::any::type_name::<P>(),
            raw: self.data.to_string(),
            source,
        })
    }
}
