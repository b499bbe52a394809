//! Tests for arming and resolving expiration checks.

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use smsflow::events::payloads::MessageSendExpiredCheckPayload;
use smsflow::events::EventType;
use smsflow::expiration::{MessageScheduleExpirationParams, EXPIRATION_SOURCE, QUEUE_HEADER};
use smsflow::messages::HandleMessageParams;
use smsflow::threads::MessageThreadUpdateParams;
use smsflow::types::MessageStatus;

use crate::support::{at, harness, store_pending, user, Harness, CONTACT, ENDPOINT, OWNER};

fn schedule(message_id: Uuid, sent_at: chrono::DateTime<Utc>, window: Option<Duration>) -> MessageScheduleExpirationParams {
    MessageScheduleExpirationParams {
        message_id,
        user_id: user(),
        notification_sent_at: sent_at,
        phone_id: Uuid::nil(),
        source: "test/push".to_owned(),
        message_expiration_duration: window,
    }
}

async fn sending(h: &Harness, id: Uuid, secs: i64) {
    h.app
        .messages
        .handle_message_sending(&HandleMessageParams {
            id,
            user_id: user(),
            timestamp: at(secs),
            source: "test/phone".to_owned(),
        })
        .await
        .expect("sending");
    h.app
        .threads
        .update_thread(&MessageThreadUpdateParams {
            owner: OWNER.to_owned(),
            contact: CONTACT.to_owned(),
            user_id: user(),
            status: MessageStatus::Sending,
            timestamp: at(secs),
            content: "hello".to_owned(),
            message_id: id,
        })
        .await
        .expect("thread");
}

#[tokio::test]
async fn armed_check_targets_ingest_endpoint_at_deadline() {
    let h = harness().await;
    let id = Uuid::new_v4();
    let sent_at = Utc::now();

    let handle = h
        .app
        .supervisor
        .schedule_expiration_check(&schedule(id, sent_at, Some(Duration::from_secs(60))))
        .await
        .expect("schedule");
    assert!(handle.is_some());

    let tasks = h.scheduler.tasks();
    assert_eq!(tasks.len(), 1);
    let (task, delay) = &tasks[0];
    assert_eq!(task.url, ENDPOINT);
    assert_eq!(task.method, "POST");
    assert_eq!(task.headers.get(QUEUE_HEADER).map(String::as_str), Some("events"));
    assert_eq!(
        task.headers.get("Authorization").map(String::as_str),
        Some("Bearer secret")
    );
    assert!(*delay <= Duration::from_secs(60));
    assert!(*delay > Duration::from_secs(50));

    let envelope = h.scheduler.envelope(0);
    assert_eq!(envelope.kind(), Some(EventType::MessageSendExpiredCheck));
    assert_eq!(envelope.source, EXPIRATION_SOURCE);
    let payload: MessageSendExpiredCheckPayload = envelope.decode().expect("payload");
    assert_eq!(payload.message_id, id);
    assert_eq!(payload.user_id, user());
    assert_eq!(payload.deadline, sent_at + chrono::Duration::seconds(60));
}

#[tokio::test]
async fn past_deadline_fires_immediately() {
    let h = harness().await;

    h.app
        .supervisor
        .schedule_expiration_check(&schedule(Uuid::new_v4(), at(0), Some(Duration::from_secs(60))))
        .await
        .expect("schedule");

    let tasks = h.scheduler.tasks();
    assert_eq!(tasks[0].1, Duration::ZERO);
}

#[tokio::test]
async fn missing_window_uses_configured_default() {
    let h = harness().await;

    h.app
        .supervisor
        .schedule_expiration_check(&schedule(Uuid::new_v4(), at(0), None))
        .await
        .expect("schedule");

    let payload: MessageSendExpiredCheckPayload =
        h.scheduler.envelope(0).decode().expect("payload");
    assert_eq!(payload.deadline, at(600));
}

#[tokio::test]
async fn zero_or_huge_window_arms_nothing() {
    let h = harness().await;

    let zero = h
        .app
        .supervisor
        .schedule_expiration_check(&schedule(Uuid::new_v4(), at(0), Some(Duration::ZERO)))
        .await
        .expect("zero window");
    assert!(zero.is_none());

    let huge = h
        .app
        .supervisor
        .schedule_expiration_check(&schedule(Uuid::new_v4(), at(0), Some(Duration::MAX)))
        .await
        .expect("huge window");
    assert!(huge.is_none());

    assert!(h.scheduler.tasks().is_empty());
}

#[tokio::test]
async fn check_expires_outstanding_message_and_thread() {
    let h = harness().await;
    let message = store_pending(&h, "hello").await;
    sending(&h, message.id, 1).await;

    let expired = h
        .app
        .supervisor
        .check_expired(&MessageSendExpiredCheckPayload {
            message_id: message.id,
            user_id: user(),
            deadline: at(61),
        })
        .await
        .expect("check")
        .expect("expired");
    assert_eq!(expired.status, MessageStatus::Expired);
    assert_eq!(expired.expired_at, Some(at(61)));

    let thread = h
        .app
        .threads
        .get_threads(&smsflow::threads::MessageThreadGetParams::new(user(), OWNER))
        .await
        .expect("threads")
        .pop()
        .expect("thread");
    assert_eq!(thread.status, MessageStatus::Expired);
    assert_eq!(thread.order_timestamp, Some(at(61)));
}

#[tokio::test]
async fn check_after_delivery_is_a_no_op() {
    let h = harness().await;
    let message = store_pending(&h, "hello").await;
    sending(&h, message.id, 1).await;
    h.app
        .messages
        .handle_message_delivered(&HandleMessageParams {
            id: message.id,
            user_id: user(),
            timestamp: at(10),
            source: "test/phone".to_owned(),
        })
        .await
        .expect("delivered");

    let result = h
        .app
        .supervisor
        .check_expired(&MessageSendExpiredCheckPayload {
            message_id: message.id,
            user_id: user(),
            deadline: at(61),
        })
        .await
        .expect("check");
    assert!(result.is_none());

    let stored = h
        .app
        .messages
        .get_message(&user(), message.id)
        .await
        .expect("load");
    assert_eq!(stored.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn check_for_deleted_message_is_a_no_op() {
    let h = harness().await;

    let result = h
        .app
        .supervisor
        .check_expired(&MessageSendExpiredCheckPayload {
            message_id: Uuid::new_v4(),
            user_id: user(),
            deadline: at(61),
        })
        .await
        .expect("check");
    assert!(result.is_none());
}
