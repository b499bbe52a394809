//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use smsflow::app::App;
use smsflow::events::payloads::{
    MessageApiSentPayload, MessageNotificationSentPayload, MessagePhonePayload,
    MessagePhoneReceivedPayload, MessageSendFailedPayload,
};
use smsflow::events::{EventEnvelope, EventType};
use smsflow::expiration::ExpirationTarget;
use smsflow::messages::StorePendingMessageParams;
use smsflow::scheduler::{PushTask, SchedulerError, TaskHandle, TaskScheduler};
use smsflow::store;
use smsflow::types::{Message, Sim, UserId};

pub const OWNER: &str = "+18005550199";
pub const CONTACT: &str = "+18005550100";
pub const ENDPOINT: &str = "http://127.0.0.1:8000/v1/events";

/// A fixed instant `secs` seconds after the test epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

pub fn user() -> UserId {
    UserId::from("user-1")
}

pub async fn pool() -> SqlitePool {
    store::open_in_memory().await.expect("in-memory pool")
}

pub fn target() -> ExpirationTarget {
    ExpirationTarget {
        endpoint: ENDPOINT.to_owned(),
        queue_name: "events".to_owned(),
        auth_token: Some("secret".to_owned()),
        default_duration: Duration::from_secs(600),
    }
}

/// Scheduler fake that records tasks instead of firing them.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    tasks: Mutex<Vec<(PushTask, Duration)>>,
}

impl RecordingScheduler {
    pub fn tasks(&self) -> Vec<(PushTask, Duration)> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decode the body of the `index`th task back into an envelope.
    pub fn envelope(&self, index: usize) -> EventEnvelope {
        let tasks = self.tasks();
        let (task, _) = tasks.get(index).expect("task recorded");
        serde_json::from_slice(&task.body).expect("task body is an envelope")
    }
}

#[async_trait]
impl TaskScheduler for RecordingScheduler {
    async fn enqueue(&self, task: PushTask, delay: Duration) -> Result<TaskHandle, SchedulerError> {
        let handle = TaskHandle {
            id: Uuid::new_v4().to_string(),
            url: task.url.clone(),
            method: task.method.clone(),
            fire_at: Utc::now(),
        };
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((task, delay));
        Ok(handle)
    }
}

/// The full pipeline over an in-memory database and a recording scheduler.
pub struct Harness {
    pub pool: SqlitePool,
    pub app: App,
    pub scheduler: Arc<RecordingScheduler>,
}

pub async fn harness() -> Harness {
    let pool = pool().await;
    let scheduler = Arc::new(RecordingScheduler::default());
    let app = App::new(pool.clone(), scheduler.clone(), target());
    Harness {
        pool,
        app,
        scheduler,
    }
}

pub fn pending_params(id: Uuid, content: &str) -> StorePendingMessageParams {
    StorePendingMessageParams {
        id,
        user_id: user(),
        owner: OWNER.to_owned(),
        contact: CONTACT.to_owned(),
        content: content.to_owned(),
        sim: Sim::Default,
        request_id: None,
        max_send_attempts: 2,
        scheduled_send_time: None,
        request_received_at: at(0),
    }
}

pub async fn store_pending(h: &Harness, content: &str) -> Message {
    h.app
        .messages
        .store_pending_message(pending_params(Uuid::new_v4(), content))
        .await
        .expect("store pending message")
}

pub async fn event_count(pool: &SqlitePool, message_id: Uuid) -> i64 {
    let row: (i64,) = sqlx::query_as("SELECT count(*) FROM message_events WHERE message_id = ?1")
        .bind(message_id.to_string())
        .fetch_one(pool)
        .await
        .expect("count events");
    row.0
}

// ── Envelopes ───────────────────────────────────────────────────

pub fn envelope<P: Serialize>(kind: EventType, payload: &P) -> EventEnvelope {
    EventEnvelope::new(kind, "test/phone", payload).expect("envelope")
}

pub fn api_sent(id: Uuid, secs: i64, content: &str) -> EventEnvelope {
    envelope(
        EventType::MessageApiSent,
        &MessageApiSentPayload {
            message_id: id,
            user_id: user(),
            owner: OWNER.to_owned(),
            contact: CONTACT.to_owned(),
            request_id: None,
            max_send_attempts: 2,
            scheduled_send_time: None,
            request_received_at: at(secs),
            content: content.to_owned(),
            sim: Sim::Default,
        },
    )
}

pub fn phone(kind: EventType, id: Uuid, secs: i64, content: &str) -> EventEnvelope {
    envelope(
        kind,
        &MessagePhonePayload {
            id,
            user_id: user(),
            request_id: None,
            owner: OWNER.to_owned(),
            contact: CONTACT.to_owned(),
            timestamp: at(secs),
            content: content.to_owned(),
            sim: Sim::Default,
        },
    )
}

pub fn send_failed(id: Uuid, secs: i64, content: &str, error: &str) -> EventEnvelope {
    envelope(
        EventType::MessageSendFailed,
        &MessageSendFailedPayload {
            id,
            user_id: user(),
            owner: OWNER.to_owned(),
            contact: CONTACT.to_owned(),
            error_message: error.to_owned(),
            timestamp: at(secs),
            content: content.to_owned(),
            sim: Sim::Default,
        },
    )
}

pub fn notification_sent(id: Uuid, secs: i64, expiration_secs: Option<u64>) -> EventEnvelope {
    envelope(
        EventType::MessageNotificationSent,
        &MessageNotificationSentPayload {
            message_id: id,
            user_id: user(),
            phone_id: Uuid::nil(),
            notification_sent_at: at(secs),
            message_expiration_seconds: expiration_secs,
        },
    )
}

pub fn phone_received(id: Uuid, secs: i64, content: &str) -> EventEnvelope {
    envelope(
        EventType::MessagePhoneReceived,
        &MessagePhoneReceivedPayload {
            message_id: id,
            user_id: user(),
            owner: OWNER.to_owned(),
            contact: CONTACT.to_owned(),
            timestamp: at(secs),
            content: content.to_owned(),
            sim: Sim::Default,
        },
    )
}
