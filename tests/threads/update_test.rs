//! Tests for thread aggregation and rewinding.

use std::sync::Arc;

use uuid::Uuid;

use smsflow::events::payloads::MessageApiDeletedPayload;
use smsflow::messages::HandleMessageParams;
use smsflow::threads::{MessageThreadGetParams, MessageThreadUpdateParams, THREAD_COLORS};
use smsflow::types::{MessageStatus, UserId};

use crate::support::{at, harness, store_pending, user, Harness, CONTACT, OWNER};

fn update(message_id: Uuid, status: MessageStatus, secs: i64, content: &str) -> MessageThreadUpdateParams {
    MessageThreadUpdateParams {
        owner: OWNER.to_owned(),
        contact: CONTACT.to_owned(),
        user_id: user(),
        status,
        timestamp: at(secs),
        content: content.to_owned(),
        message_id,
    }
}

fn deleted(message_id: Uuid) -> MessageApiDeletedPayload {
    MessageApiDeletedPayload {
        message_id,
        user_id: user(),
        owner: OWNER.to_owned(),
        contact: CONTACT.to_owned(),
        previous_message_status: None,
        timestamp: at(100),
    }
}

async fn mark_sent(h: &Harness, id: Uuid, secs: i64) {
    h.app
        .messages
        .handle_message_sent(&HandleMessageParams {
            id,
            user_id: user(),
            timestamp: at(secs),
            source: "test/phone".to_owned(),
        })
        .await
        .expect("sent");
}

#[tokio::test]
async fn first_update_creates_thread_with_palette_color() {
    let h = harness().await;
    let id = Uuid::new_v4();

    let thread = h
        .app
        .threads
        .update_thread(&update(id, MessageStatus::Pending, 0, "hello"))
        .await
        .expect("update");

    assert!(THREAD_COLORS.contains(&thread.color.as_str()));
    assert!(!thread.is_archived);
    assert_eq!(thread.last_message_id, Some(id));
    assert_eq!(thread.last_message_content.as_deref(), Some("hello"));
    assert_eq!(thread.status, MessageStatus::Pending);
    assert_eq!(thread.order_timestamp, Some(at(0)));

    let again = h
        .app
        .threads
        .update_thread(&update(id, MessageStatus::Sending, 1, "hello"))
        .await
        .expect("update");
    assert_eq!(again.id, thread.id);
    assert_eq!(again.color, thread.color);
}

#[tokio::test]
async fn out_of_order_updates_converge() {
    let h = harness().await;
    let id = Uuid::new_v4();
    let threads = &h.app.threads;

    threads
        .update_thread(&update(id, MessageStatus::Delivered, 10, "hello"))
        .await
        .expect("delivered");
    let thread = threads
        .update_thread(&update(id, MessageStatus::Sent, 5, "hello"))
        .await
        .expect("stale sent");

    assert_eq!(thread.status, MessageStatus::Delivered);
    assert_eq!(thread.order_timestamp, Some(at(10)));
}

#[tokio::test]
async fn newer_message_replaces_preview() {
    let h = harness().await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let threads = &h.app.threads;

    threads
        .update_thread(&update(first, MessageStatus::Delivered, 3, "first"))
        .await
        .expect("first");
    let thread = threads
        .update_thread(&update(second, MessageStatus::Received, 4, "second"))
        .await
        .expect("second");

    assert_eq!(thread.last_message_id, Some(second));
    assert_eq!(thread.last_message_content.as_deref(), Some("second"));
    assert_eq!(thread.status, MessageStatus::Received);
}

#[tokio::test]
async fn equal_timestamp_from_another_message_is_ignored() {
    let h = harness().await;
    let first = Uuid::new_v4();
    let threads = &h.app.threads;

    threads
        .update_thread(&update(first, MessageStatus::Sent, 3, "first"))
        .await
        .expect("first");
    let thread = threads
        .update_thread(&update(Uuid::new_v4(), MessageStatus::Delivered, 3, "other"))
        .await
        .expect("other");
    assert_eq!(thread.last_message_id, Some(first));

    let thread = threads
        .update_thread(&update(first, MessageStatus::Delivered, 3, "first"))
        .await
        .expect("same message, higher rank");
    assert_eq!(thread.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn deleting_last_message_rewinds_to_previous() {
    let h = harness().await;
    let older = store_pending(&h, "older").await;
    let newer = store_pending(&h, "newer").await;
    mark_sent(&h, older.id, 1).await;
    mark_sent(&h, newer.id, 2).await;
    let threads = &h.app.threads;
    threads
        .update_thread(&update(older.id, MessageStatus::Sent, 1, "older"))
        .await
        .expect("older");
    threads
        .update_thread(&update(newer.id, MessageStatus::Sent, 2, "newer"))
        .await
        .expect("newer");

    h.app
        .messages
        .delete_message(&user(), newer.id)
        .await
        .expect("delete");
    let thread = threads
        .update_after_deleted_message(&deleted(newer.id))
        .await
        .expect("rewind")
        .expect("thread exists");

    assert_eq!(thread.last_message_id, Some(older.id));
    assert_eq!(thread.last_message_content.as_deref(), Some("older"));
    assert_eq!(thread.status, MessageStatus::Sent);
    assert_eq!(thread.order_timestamp, Some(at(1)));
}

#[tokio::test]
async fn rewind_before_the_row_is_gone_skips_the_deleted_message() {
    let h = harness().await;
    let older = store_pending(&h, "older").await;
    let newer = store_pending(&h, "newer").await;
    mark_sent(&h, older.id, 1).await;
    mark_sent(&h, newer.id, 2).await;
    let threads = &h.app.threads;
    threads
        .update_thread(&update(older.id, MessageStatus::Sent, 1, "older"))
        .await
        .expect("older");
    threads
        .update_thread(&update(newer.id, MessageStatus::Sent, 2, "newer"))
        .await
        .expect("newer");

    let thread = threads
        .update_after_deleted_message(&deleted(newer.id))
        .await
        .expect("rewind")
        .expect("thread exists");
    assert_eq!(thread.last_message_id, Some(older.id));
    assert_eq!(thread.last_message_content.as_deref(), Some("older"));

    h.app
        .messages
        .delete_message(&user(), newer.id)
        .await
        .expect("delete");
    let redelivered = threads
        .update_after_deleted_message(&deleted(newer.id))
        .await
        .expect("redelivery")
        .expect("thread exists");
    assert_eq!(redelivered.last_message_id, Some(older.id));
}

#[tokio::test]
async fn deleting_an_older_message_leaves_thread_alone() {
    let h = harness().await;
    let older = store_pending(&h, "older").await;
    let newer = Uuid::new_v4();
    let threads = &h.app.threads;
    threads
        .update_thread(&update(newer, MessageStatus::Sent, 2, "newer"))
        .await
        .expect("newer");

    let thread = threads
        .update_after_deleted_message(&deleted(older.id))
        .await
        .expect("no-op")
        .expect("thread exists");
    assert_eq!(thread.last_message_id, Some(newer));
}

#[tokio::test]
async fn deleting_the_only_message_clears_preview() {
    let h = harness().await;
    let only = store_pending(&h, "only").await;
    let threads = &h.app.threads;
    threads
        .update_thread(&update(only.id, MessageStatus::Failed, 2, "only"))
        .await
        .expect("update");

    h.app
        .messages
        .delete_message(&user(), only.id)
        .await
        .expect("delete");
    let thread = threads
        .update_after_deleted_message(&deleted(only.id))
        .await
        .expect("rewind")
        .expect("thread exists");

    assert_eq!(thread.last_message_id, None);
    assert_eq!(thread.last_message_content, None);
    assert_eq!(thread.status, MessageStatus::Failed);
}

#[tokio::test]
async fn deleted_message_without_thread_is_a_no_op() {
    let h = harness().await;
    let result = h
        .app
        .threads
        .update_after_deleted_message(&deleted(Uuid::new_v4()))
        .await
        .expect("no thread");
    assert!(result.is_none());

    let mut other = deleted(Uuid::new_v4());
    other.user_id = UserId::from("user-2");
    assert!(h
        .app
        .threads
        .update_after_deleted_message(&other)
        .await
        .expect("no thread")
        .is_none());
}

#[tokio::test]
async fn latest_message_wins_in_either_order() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    for order in [[(a, 1, "hi"), (b, 2, "there")], [(b, 2, "there"), (a, 1, "hi")]] {
        let h = harness().await;
        let mut thread = None;
        for (id, secs, content) in order {
            thread = Some(
                h.app
                    .threads
                    .update_thread(&update(id, MessageStatus::Sent, secs, content))
                    .await
                    .expect("update"),
            );
        }
        let thread = thread.expect("thread");
        assert_eq!(thread.last_message_id, Some(b));
        assert_eq!(thread.last_message_content.as_deref(), Some("there"));
    }
}

#[tokio::test]
async fn concurrent_updates_for_one_pair_keep_the_newest() {
    let h = harness().await;
    let threads = Arc::clone(&h.app.threads);

    let mut tasks = Vec::new();
    for secs in [4_i64, 9, 1, 7, 3, 8, 2, 6, 5] {
        let threads = Arc::clone(&threads);
        tasks.push(tokio::spawn(async move {
            let params = update(Uuid::new_v4(), MessageStatus::Sent, secs, &format!("at {secs}"));
            threads.update_thread(&params).await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("update");
    }

    let page = threads
        .get_threads(&MessageThreadGetParams::new(user(), OWNER))
        .await
        .expect("list");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].order_timestamp, Some(at(9)));
    assert_eq!(page[0].last_message_content.as_deref(), Some("at 9"));
}
