//! Tests for thread listing, archiving and deletion.

use uuid::Uuid;

use smsflow::threads::{MessageThreadGetParams, MessageThreadUpdateParams};
use smsflow::types::{MessageStatus, MessageThread, UserId};

use crate::support::{at, harness, user, Harness, OWNER};

async fn thread_with(h: &Harness, contact: &str, secs: i64, content: &str) -> MessageThread {
    h.app
        .threads
        .update_thread(&MessageThreadUpdateParams {
            owner: OWNER.to_owned(),
            contact: contact.to_owned(),
            user_id: user(),
            status: MessageStatus::Delivered,
            timestamp: at(secs),
            content: content.to_owned(),
            message_id: Uuid::new_v4(),
        })
        .await
        .expect("update thread")
}

fn contacts(threads: &[MessageThread]) -> Vec<&str> {
    threads.iter().map(|t| t.contact.as_str()).collect()
}

#[tokio::test]
async fn lists_newest_first_with_paging() {
    let h = harness().await;
    thread_with(&h, "+1001", 1, "one").await;
    thread_with(&h, "+1003", 3, "three").await;
    thread_with(&h, "+1002", 2, "two").await;

    let all = h
        .app
        .threads
        .get_threads(&MessageThreadGetParams::new(user(), OWNER))
        .await
        .expect("list");
    assert_eq!(contacts(&all), ["+1003", "+1002", "+1001"]);

    let mut page = MessageThreadGetParams::new(user(), OWNER);
    page.skip = 1;
    page.limit = 1;
    let second = h.app.threads.get_threads(&page).await.expect("page");
    assert_eq!(contacts(&second), ["+1002"]);
}

#[tokio::test]
async fn query_matches_contact_or_preview() {
    let h = harness().await;
    thread_with(&h, "+1001", 1, "dinner tonight?").await;
    thread_with(&h, "+2002", 2, "see you").await;

    let mut by_content = MessageThreadGetParams::new(user(), OWNER);
    by_content.query = Some("dinner".to_owned());
    let found = h.app.threads.get_threads(&by_content).await.expect("list");
    assert_eq!(contacts(&found), ["+1001"]);

    let mut by_contact = MessageThreadGetParams::new(user(), OWNER);
    by_contact.query = Some("2002".to_owned());
    let found = h.app.threads.get_threads(&by_contact).await.expect("list");
    assert_eq!(contacts(&found), ["+2002"]);

    let mut empty = MessageThreadGetParams::new(user(), OWNER);
    empty.query = Some(String::new());
    let found = h.app.threads.get_threads(&empty).await.expect("list");
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn query_wildcards_match_literally() {
    let h = harness().await;
    thread_with(&h, "+1001", 1, "50% off today").await;
    thread_with(&h, "+1002", 2, "500 points").await;
    thread_with(&h, "+1003", 3, "snake_case").await;
    thread_with(&h, "+1004", 4, "snakescase").await;

    let mut percent = MessageThreadGetParams::new(user(), OWNER);
    percent.query = Some("50%".to_owned());
    let found = h.app.threads.get_threads(&percent).await.expect("list");
    assert_eq!(contacts(&found), ["+1001"]);

    let mut underscore = MessageThreadGetParams::new(user(), OWNER);
    underscore.query = Some("e_c".to_owned());
    let found = h.app.threads.get_threads(&underscore).await.expect("list");
    assert_eq!(contacts(&found), ["+1003"]);
}

#[tokio::test]
async fn archive_moves_thread_between_lists() {
    let h = harness().await;
    let archived = thread_with(&h, "+1001", 1, "old").await;
    thread_with(&h, "+1002", 2, "new").await;

    let updated = h
        .app
        .threads
        .update_archive(&user(), archived.id, true)
        .await
        .expect("archive");
    assert!(updated.is_archived);
    assert_eq!(updated.last_message_content.as_deref(), Some("old"));

    let active = h
        .app
        .threads
        .get_threads(&MessageThreadGetParams::new(user(), OWNER))
        .await
        .expect("active");
    assert_eq!(contacts(&active), ["+1002"]);

    let mut params = MessageThreadGetParams::new(user(), OWNER);
    params.is_archived = true;
    let archive = h.app.threads.get_threads(&params).await.expect("archived");
    assert_eq!(contacts(&archive), ["+1001"]);
}

#[tokio::test]
async fn other_users_threads_are_invisible() {
    let h = harness().await;
    let thread = thread_with(&h, "+1001", 1, "hello").await;
    let stranger = UserId::from("user-2");

    let err = h
        .app
        .threads
        .get_thread(&stranger, thread.id)
        .await
        .expect_err("hidden");
    assert!(err.is_not_found());

    let listed = h
        .app
        .threads
        .get_threads(&MessageThreadGetParams::new(stranger.clone(), OWNER))
        .await
        .expect("list");
    assert!(listed.is_empty());

    let err = h
        .app
        .threads
        .update_archive(&stranger, thread.id, true)
        .await
        .expect_err("hidden");
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_thread_reports_missing() {
    let h = harness().await;
    let thread = thread_with(&h, "+1001", 1, "hello").await;

    h.app
        .threads
        .delete_thread(&user(), thread.id)
        .await
        .expect("delete");
    let err = h
        .app
        .threads
        .delete_thread(&user(), thread.id)
        .await
        .expect_err("already gone");
    assert!(err.is_not_found());
}

#[tokio::test]
async fn bulk_deletes_are_scoped() {
    let h = harness().await;
    thread_with(&h, "+1001", 1, "a").await;
    thread_with(&h, "+1002", 2, "b").await;
    thread_with(&h, "+1003", 3, "c").await;

    let removed = h
        .app
        .threads
        .delete_by_owner_and_contact(&user(), OWNER, "+1001")
        .await
        .expect("pair");
    assert_eq!(removed, 1);

    let removed = h
        .app
        .threads
        .delete_all_for_user(&user())
        .await
        .expect("user");
    assert_eq!(removed, 2);
}
