//! Listener group that keeps messages up to date.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::events::payloads::{
    MessageApiDeletedPayload, MessageApiSentPayload, MessageNotificationFailedPayload,
    MessageNotificationScheduledPayload, MessageNotificationSentPayload, MessagePhonePayload,
    MessagePhoneReceivedPayload, MessageSendExpiredCheckPayload, MessageSendExpiredPayload,
    MessageSendFailedPayload, MessageThreadApiDeletedPayload, UserAccountDeletedPayload,
};
use crate::events::{EventEnvelope, EventType};
use super::PhoneReport;
use crate::expiration::{ExpirationSupervisor, MessageScheduleExpirationParams};
use crate::messages::{
    HandleMessageFailedParams, HandleMessageParams, MessageService, MessageStoreEventParams,
    StorePendingMessageParams, StoreReceivedMessageParams,
};
use crate::router::{EventHandler, EventRouter, HandlerError};
use crate::types::MessageEventName;

/// Name of the message listener group.
pub const MESSAGE_GROUP: &str = "message";

/// Applies message lifecycle events to [`MessageService`].
#[derive(Debug)]
pub struct MessageListener {
    service: Arc<MessageService>,
    supervisor: Arc<ExpirationSupervisor>,
}

impl MessageListener {
    /// Event types this group consumes.
    pub const ROUTES: [EventType; 14] = [
        EventType::MessageApiSent,
        EventType::MessageApiDeleted,
        EventType::MessagePhoneSending,
        EventType::MessagePhoneSent,
        EventType::MessagePhoneDelivered,
        EventType::MessageSendFailed,
        EventType::MessagePhoneReceived,
        EventType::MessageNotificationSent,
        EventType::MessageNotificationFailed,
        EventType::MessageNotificationScheduled,
        EventType::MessageSendExpiredCheck,
        EventType::MessageSendExpired,
        EventType::MessageThreadApiDeleted,
        EventType::UserAccountDeleted,
    ];

    /// Create a listener.
    pub fn new(service: Arc<MessageService>, supervisor: Arc<ExpirationSupervisor>) -> Self {
        Self {
            service,
            supervisor,
        }
    }

    /// Route table with every [`MessageListener::ROUTES`] entry pointing at
    /// this listener.
    pub fn router(self: &Arc<Self>) -> EventRouter {
        let mut router = EventRouter::new(MESSAGE_GROUP);
        for event_type in Self::ROUTES {
            router.register(event_type, Arc::clone(self) as Arc<dyn EventHandler>);
        }
        router
    }

    async fn on_api_sent(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessageApiSentPayload = envelope.decode()?;
        self.service
            .store_pending_message(StorePendingMessageParams {
                id: payload.message_id,
                user_id: payload.user_id,
                owner: payload.owner,
                contact: payload.contact,
                content: payload.content,
                sim: payload.sim,
                request_id: payload.request_id,
                max_send_attempts: payload.max_send_attempts,
                scheduled_send_time: payload.scheduled_send_time,
                request_received_at: payload.request_received_at,
            })
            .await?;
        Ok(())
    }

    async fn on_api_deleted(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessageApiDeletedPayload = envelope.decode()?;
        match self
            .service
            .delete_message(&payload.user_id, payload.message_id)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(message_id = %payload.message_id, "message already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_phone_status(
        &self,
        report: PhoneReport,
        envelope: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        let payload: MessagePhonePayload = envelope.decode()?;
        let params = HandleMessageParams {
            id: payload.id,
            user_id: payload.user_id,
            timestamp: payload.timestamp,
            source: envelope.source.clone(),
        };
        match report {
            PhoneReport::Sending => self.service.handle_message_sending(&params).await?,
            PhoneReport::Sent => self.service.handle_message_sent(&params).await?,
            PhoneReport::Delivered => self.service.handle_message_delivered(&params).await?,
        };
        Ok(())
    }

    async fn on_send_failed(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessageSendFailedPayload = envelope.decode()?;
        self.service
            .handle_message_failed(&HandleMessageFailedParams {
                id: payload.id,
                user_id: payload.user_id,
                error_message: payload.error_message,
                timestamp: payload.timestamp,
                source: envelope.source.clone(),
            })
            .await?;
        Ok(())
    }

    async fn on_phone_received(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessagePhoneReceivedPayload = envelope.decode()?;
        self.service
            .store_received_message(StoreReceivedMessageParams {
                id: payload.message_id,
                user_id: payload.user_id,
                owner: payload.owner,
                contact: payload.contact,
                content: payload.content,
                sim: payload.sim,
                timestamp: payload.timestamp,
                source: envelope.source.clone(),
            })
            .await?;
        Ok(())
    }

    async fn on_notification_sent(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessageNotificationSentPayload = envelope.decode()?;
        let outcome = self
            .service
            .handle_message_notification_sent(&HandleMessageParams {
                id: payload.message_id,
                user_id: payload.user_id.clone(),
                timestamp: payload.notification_sent_at,
                source: envelope.source.clone(),
            })
            .await?;
        if !outcome.is_applied() {
            debug!(
                message_id = %payload.message_id,
                event_id = %envelope.id,
                "notification already recorded, expiration check not re-armed"
            );
            return Ok(());
        }

        self.supervisor
            .schedule_expiration_check(&MessageScheduleExpirationParams {
                message_id: payload.message_id,
                user_id: payload.user_id,
                notification_sent_at: payload.notification_sent_at,
                phone_id: payload.phone_id,
                source: envelope.source.clone(),
                message_expiration_duration: payload
                    .message_expiration_seconds
                    .map(Duration::from_secs),
            })
            .await?;
        Ok(())
    }

    async fn on_notification_failed(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessageNotificationFailedPayload = envelope.decode()?;
        let message = self
            .service
            .get_message(&payload.user_id, payload.message_id)
            .await?;
        self.service
            .store_event(
                &message,
                MessageStoreEventParams {
                    message_id: payload.message_id,
                    event_name: MessageEventName::NotificationFailed,
                    timestamp: payload.notification_failed_at,
                    error_message: Some(payload.error_message),
                    source: envelope.source.clone(),
                },
            )
            .await?;
        Ok(())
    }

    async fn on_notification_scheduled(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessageNotificationScheduledPayload = envelope.decode()?;
        self.service
            .handle_message_notification_scheduled(&HandleMessageParams {
                id: payload.message_id,
                user_id: payload.user_id,
                timestamp: payload.scheduled_at,
                source: envelope.source.clone(),
            })
            .await?;
        Ok(())
    }

    async fn on_expired_check(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessageSendExpiredCheckPayload = envelope.decode()?;
        self.supervisor.check_expired(&payload).await?;
        Ok(())
    }

    async fn on_send_expired(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessageSendExpiredPayload = envelope.decode()?;
        self.service
            .handle_message_expired(&HandleMessageParams {
                id: payload.message_id,
                user_id: payload.user_id,
                timestamp: payload.timestamp,
                source: envelope.source.clone(),
            })
            .await?;
        Ok(())
    }

    async fn on_thread_deleted(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: MessageThreadApiDeletedPayload = envelope.decode()?;
        self.service
            .delete_by_owner_and_contact(&payload.user_id, &payload.owner, &payload.contact)
            .await?;
        Ok(())
    }

    async fn on_account_deleted(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload: UserAccountDeletedPayload = envelope.decode()?;
        self.service.delete_all_for_user(&payload.user_id).await?;
        info!(user_id = %payload.user_id, event_id = %envelope.id, "account messages removed");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for MessageListener {
    async fn handle(
        &self,
        event_type: EventType,
        envelope: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        match event_type {
            EventType::MessageApiSent => self.on_api_sent(envelope).await,
            EventType::MessageApiDeleted => self.on_api_deleted(envelope).await,
            EventType::MessagePhoneSending => {
                self.on_phone_status(PhoneReport::Sending, envelope).await
            }
            EventType::MessagePhoneSent => self.on_phone_status(PhoneReport::Sent, envelope).await,
            EventType::MessagePhoneDelivered => {
                self.on_phone_status(PhoneReport::Delivered, envelope).await
            }
            EventType::MessageSendFailed => self.on_send_failed(envelope).await,
            EventType::MessagePhoneReceived => self.on_phone_received(envelope).await,
            EventType::MessageNotificationSent => self.on_notification_sent(envelope).await,
            EventType::MessageNotificationFailed => self.on_notification_failed(envelope).await,
            EventType::MessageNotificationScheduled => {
                self.on_notification_scheduled(envelope).await
            }
            EventType::MessageSendExpiredCheck => self.on_expired_check(envelope).await,
            EventType::MessageSendExpired => self.on_send_expired(envelope).await,
            EventType::MessageThreadApiDeleted => self.on_thread_deleted(envelope).await,
            EventType::UserAccountDeleted => self.on_account_deleted(envelope).await,
        }
    }
}
