//! Status transition rules.
//!
//! Pure functions over [`Message`]: deciding whether an incoming status at a
//! given event timestamp may replace the current one, and applying it. The
//! caller is responsible for holding the per-message lock between reading the
//! message, deciding, and writing it back.

use chrono::{DateTime, Utc};

use crate::types::{Message, MessageStatus};

/// Outcome of comparing an incoming transition against a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The transition should be applied.
    Apply,
    /// The event is older than the last applied event.
    Stale {
        /// Timestamp of the last applied event.
        last_event_at: DateTime<Utc>,
    },
    /// Same timestamp as the last applied event, but the current status
    /// ranks higher.
    Superseded {
        /// Status that stays in place.
        current: MessageStatus,
    },
    /// The same status at the same timestamp was already applied.
    Duplicate,
    /// Inbound messages never take outbound transitions.
    Inbound,
}

impl Decision {
    /// Returns `true` for [`Decision::Apply`].
    pub fn is_apply(&self) -> bool {
        matches!(self, Self::Apply)
    }
}

/// Decide whether `incoming` at `at` may replace the message's status.
pub fn decide(message: &Message, incoming: MessageStatus, at: DateTime<Utc>) -> Decision {
    if message.status == MessageStatus::Received && incoming != MessageStatus::Received {
        return Decision::Inbound;
    }

    match message.last_event_at {
        None => Decision::Apply,
        Some(last) if at == last && incoming == message.status => Decision::Duplicate,
        Some(last) if at < last => Decision::Stale { last_event_at: last },
        Some(last) if at == last && incoming.rank() < message.status.rank() => {
            Decision::Superseded {
                current: message.status,
            }
        }
        Some(_) => Decision::Apply,
    }
}

/// Apply `status` at event time `at`, stamping `now` as the update time.
pub fn apply(message: &mut Message, status: MessageStatus, at: DateTime<Utc>, now: DateTime<Utc>) {
    message.status = status;
    message.last_event_at = Some(at);
    message.updated_at = now;

    match status {
        MessageStatus::Sending => {
            message.send_attempt_count = message.send_attempt_count.saturating_add(1);
        }
        MessageStatus::Scheduled => message.notification_scheduled_at = Some(at),
        MessageStatus::Sent => message.sent_at = Some(at),
        MessageStatus::Delivered => message.delivered_at = Some(at),
        MessageStatus::Failed => message.failed_at = Some(at),
        MessageStatus::Expired => message.expired_at = Some(at),
        MessageStatus::Received => message.received_at = Some(at),
        MessageStatus::Pending => {}
    }
}
