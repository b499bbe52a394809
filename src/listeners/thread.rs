//! Listener group that keeps conversation threads up to date.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::payloads::{
    MessageApiDeletedPayload, MessageApiSentPayload, MessageNotificationScheduledPayload,
    MessagePhonePayload, MessagePhoneReceivedPayload, MessageSendExpiredPayload,
    MessageSendFailedPayload, MessageThreadApiDeletedPayload, UserAccountDeletedPayload,
};
use super::PhoneReport;
use crate::events::{EventEnvelope, EventType};
use crate::router::{EventHandler, EventRouter, HandlerError};
use crate::threads::{MessageThreadService, MessageThreadUpdateParams};
use crate::types::{MessageStatus, UserId};

/// Name of the thread listener group.
pub const THREAD_GROUP: &str = "message-thread";

/// Folds message events into [`MessageThreadService`].
#[derive(Debug)]
pub struct MessageThreadListener {
    service: Arc<MessageThreadService>,
}

impl MessageThreadListener {
    /// Event types this group consumes.
    pub const ROUTES: [EventType; 11] = [
        EventType::MessageApiSent,
        EventType::MessageApiDeleted,
        EventType::MessagePhoneSending,
        EventType::MessagePhoneSent,
        EventType::MessagePhoneDelivered,
        EventType::MessageSendFailed,
        EventType::MessagePhoneReceived,
        EventType::MessageNotificationScheduled,
        EventType::MessageSendExpired,
        EventType::MessageThreadApiDeleted,
        EventType::UserAccountDeleted,
    ];

    /// Create a listener.
    pub fn new(service: Arc<MessageThreadService>) -> Self {
        Self { service }
    }

    /// Route table with every [`MessageThreadListener::ROUTES`] entry
    /// pointing at this listener.
    pub fn router(self: &Arc<Self>) -> EventRouter {
        let mut router = EventRouter::new(THREAD_GROUP);
        for event_type in Self::ROUTES {
            router.register(event_type, Arc::clone(self) as Arc<dyn EventHandler>);
        }
        router
    }

    async fn update(&self, update: Update) -> Result<(), HandlerError> {
        self.service
            .update_thread(&MessageThreadUpdateParams {
                owner: update.owner,
                contact: update.contact,
                user_id: update.user_id,
                status: update.status,
                timestamp: update.timestamp,
                content: update.content,
                message_id: update.message_id,
            })
            .await?;
        Ok(())
    }

    async fn on_phone_report(
        &self,
        report: PhoneReport,
        envelope: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        let p: MessagePhonePayload = envelope.decode()?;
        self.update(Update {
            owner: p.owner,
            contact: p.contact,
            user_id: p.user_id,
            status: report.status(),
            timestamp: p.timestamp,
            content: p.content,
            message_id: p.id,
        })
        .await
    }
}

/// Fields every thread-updating payload provides.
struct Update {
    owner: String,
    contact: String,
    user_id: UserId,
    status: MessageStatus,
    timestamp: DateTime<Utc>,
    content: String,
    message_id: Uuid,
}

#[async_trait]
impl EventHandler for MessageThreadListener {
    async fn handle(
        &self,
        event_type: EventType,
        envelope: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        match event_type {
            EventType::MessageApiSent => {
                let p: MessageApiSentPayload = envelope.decode()?;
                self.update(Update {
                    owner: p.owner,
                    contact: p.contact,
                    user_id: p.user_id,
                    status: MessageStatus::Pending,
                    timestamp: p.request_received_at,
                    content: p.content,
                    message_id: p.message_id,
                })
                .await
            }
            EventType::MessagePhoneSending => self.on_phone_report(PhoneReport::Sending, envelope).await,
            EventType::MessagePhoneSent => self.on_phone_report(PhoneReport::Sent, envelope).await,
            EventType::MessagePhoneDelivered => {
                self.on_phone_report(PhoneReport::Delivered, envelope).await
            }
            EventType::MessageSendFailed => {
                let p: MessageSendFailedPayload = envelope.decode()?;
                self.update(Update {
                    owner: p.owner,
                    contact: p.contact,
                    user_id: p.user_id,
                    status: MessageStatus::Failed,
                    timestamp: p.timestamp,
                    content: p.content,
                    message_id: p.id,
                })
                .await
            }
            EventType::MessagePhoneReceived => {
                let p: MessagePhoneReceivedPayload = envelope.decode()?;
                self.update(Update {
                    owner: p.owner,
                    contact: p.contact,
                    user_id: p.user_id,
                    status: MessageStatus::Received,
                    timestamp: p.timestamp,
                    content: p.content,
                    message_id: p.message_id,
                })
                .await
            }
            EventType::MessageNotificationScheduled => {
                let p: MessageNotificationScheduledPayload = envelope.decode()?;
                self.update(Update {
                    owner: p.owner,
                    contact: p.contact,
                    user_id: p.user_id,
                    status: MessageStatus::Scheduled,
                    timestamp: p.scheduled_at,
                    content: p.content,
                    message_id: p.message_id,
                })
                .await
            }
            EventType::MessageSendExpired => {
                let p: MessageSendExpiredPayload = envelope.decode()?;
                self.update(Update {
                    owner: p.owner,
                    contact: p.contact,
                    user_id: p.user_id,
                    status: MessageStatus::Expired,
                    timestamp: p.timestamp,
                    content: p.content,
                    message_id: p.message_id,
                })
                .await
            }
            EventType::MessageApiDeleted => {
                let p: MessageApiDeletedPayload = envelope.decode()?;
                self.service.update_after_deleted_message(&p).await?;
                Ok(())
            }
            EventType::MessageThreadApiDeleted => {
                let p: MessageThreadApiDeletedPayload = envelope.decode()?;
                self.service
                    .delete_by_owner_and_contact(&p.user_id, &p.owner, &p.contact)
                    .await?;
                Ok(())
            }
            EventType::UserAccountDeleted => {
                let p: UserAccountDeletedPayload = envelope.decode()?;
                self.service.delete_all_for_user(&p.user_id).await?;
                Ok(())
            }
            EventType::MessageNotificationSent
            | EventType::MessageNotificationFailed
            | EventType::MessageSendExpiredCheck => Ok(()),
        }
    }
}
