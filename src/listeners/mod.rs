//! Listener groups: the static route tables of the event pipeline.

pub mod message;
pub mod thread;

use std::sync::Arc;

pub use self::message::{MessageListener, MESSAGE_GROUP};
pub use self::thread::{MessageThreadListener, THREAD_GROUP};

use crate::router::Dispatcher;
use crate::types::MessageStatus;

/// Status report types sent by the phone, all sharing one payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhoneReport {
    Sending,
    Sent,
    Delivered,
}

impl PhoneReport {
    pub(crate) fn status(self) -> MessageStatus {
        match self {
            Self::Sending => MessageStatus::Sending,
            Self::Sent => MessageStatus::Sent,
            Self::Delivered => MessageStatus::Delivered,
        }
    }
}

/// Dispatcher over both listener groups. The message group runs first so a
/// message exists before the thread group reads it back.
pub fn dispatcher(
    message: &Arc<MessageListener>,
    thread: &Arc<MessageThreadListener>,
) -> Dispatcher {
    Dispatcher::new(vec![message.router(), thread.router()])
}
