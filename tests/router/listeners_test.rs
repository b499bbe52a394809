//! Tests for the wired listener groups and dead-lettering.

use serde_json::json;
use uuid::Uuid;

use smsflow::events::{EventEnvelope, EventType};
use smsflow::listeners::{MessageListener, MessageThreadListener, MESSAGE_GROUP, THREAD_GROUP};
use smsflow::threads::MessageThreadGetParams;
use smsflow::types::MessageStatus;

use crate::support::{api_sent, harness, notification_sent, phone, user, OWNER};

#[tokio::test]
async fn message_group_runs_before_thread_group() {
    let h = harness().await;
    let groups: Vec<&str> = h
        .app
        .dispatcher
        .routers()
        .iter()
        .map(|r| r.name())
        .collect();
    assert_eq!(groups, [MESSAGE_GROUP, THREAD_GROUP]);

    let routers = h.app.dispatcher.routers();
    assert_eq!(routers[0].event_types().len(), MessageListener::ROUTES.len());
    assert_eq!(routers[1].event_types().len(), MessageThreadListener::ROUTES.len());
    assert!(!routers[1].handles(EventType::MessageSendExpiredCheck));
}

#[tokio::test]
async fn valid_event_is_handled_by_both_groups() {
    let h = harness().await;
    let report = h
        .app
        .ingest(&api_sent(Uuid::new_v4(), 0, "hello"))
        .await
        .expect("ingest");

    assert!(report.is_success());
    let summary = report.summary();
    assert!(summary.groups.iter().all(|g| g.outcome == "handled"));
}

#[tokio::test]
async fn undecodable_event_is_dead_lettered_once() {
    let h = harness().await;
    let envelope = EventEnvelope::new(
        EventType::MessagePhoneSent,
        "test/phone",
        &json!({ "id": "not-a-uuid" }),
    )
    .expect("envelope");

    let report = h.app.ingest(&envelope).await.expect("ingest");
    assert!(report.decode_error().is_some());
    assert!(!report.has_retryable_failure());

    h.app.ingest(&envelope).await.expect("redelivery");

    let letters = h.app.dead_letters.recent(10).await.expect("dead letters");
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].event_id, envelope.id);
    assert_eq!(letters[0].event_type, "message.phone.sent");
    assert!(letters[0].raw_payload.contains("not-a-uuid"));
}

#[tokio::test]
async fn unknown_event_type_is_ignored() {
    let h = harness().await;
    let mut envelope = api_sent(Uuid::new_v4(), 0, "hello");
    envelope.event_type = "billing.usage.updated".to_owned();

    let report = h.app.ingest(&envelope).await.expect("ingest");
    assert!(report.is_success());
    assert!(!report.was_handled());
    assert!(h.app.dead_letters.recent(10).await.expect("dead letters").is_empty());
}

#[tokio::test]
async fn phone_reports_map_to_their_own_status() {
    let cases = [
        (EventType::MessagePhoneSending, MessageStatus::Sending),
        (EventType::MessagePhoneSent, MessageStatus::Sent),
        (EventType::MessagePhoneDelivered, MessageStatus::Delivered),
    ];
    for (kind, status) in cases {
        let h = harness().await;
        let id = Uuid::new_v4();
        h.app.ingest(&api_sent(id, 0, "hello")).await.expect("ingest");
        let report = h.app.ingest(&phone(kind, id, 1, "hello")).await.expect("ingest");
        assert!(report.is_success());

        let message = h.app.messages.get_message(&user(), id).await.expect("message");
        assert_eq!(message.status, status, "{kind:?}");
        let threads = h
            .app
            .threads
            .get_threads(&MessageThreadGetParams::new(user(), OWNER))
            .await
            .expect("threads");
        assert_eq!(threads[0].status, status, "{kind:?}");
    }
}

#[tokio::test]
async fn notification_redelivery_arms_a_single_check() {
    let h = harness().await;
    let id = Uuid::new_v4();
    h.app.ingest(&api_sent(id, 0, "hello")).await.expect("ingest");

    let unknown = h
        .app
        .ingest(&notification_sent(Uuid::new_v4(), 3, Some(60)))
        .await
        .expect("ingest");
    assert!(unknown.has_retryable_failure());
    assert!(h.scheduler.tasks().is_empty());

    let notification = notification_sent(id, 3, Some(60));
    for _ in 0..3 {
        let report = h.app.ingest(&notification).await.expect("ingest");
        assert!(report.is_success());
    }
    assert_eq!(h.scheduler.tasks().len(), 1);
}
