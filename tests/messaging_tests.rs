//! End-to-end messaging flow against in-memory SQLite.

use softspot::conversations::{close, find_or_create, list_conversations, mark_inbound_as_read, send_message, SendOutcome};
use softspot::db::{Conversation, Message, Profile};
use softspot::profiles::get_or_create_profile;
use softspot::realtime::RealtimeHub;
use softspot::store::{fetch_initial, fetch_newer, fetch_older, MessageStore};
use softspot::unread::UnreadCounters;
use softspot::AppError;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

async fn profile(pool: &SqlitePool, tag: &str) -> Profile {
    get_or_create_profile(pool, &format!("google.com:{tag}"), Some(&format!("{tag}@example.com")))
        .await
        .unwrap()
}

async fn insert_message(pool: &SqlitePool, id: &str, conversation_id: &str, sender_id: &str, created_at: i64) {
    sqlx::query(
        "INSERT INTO messages (id,conversation_id,sender_id,content,media_type,created_at,read_at) \
         VALUES (?,?,?,?, 'text', ?, NULL)",
    )
    .bind(id)
    .bind(conversation_id)
    .bind(sender_id)
    .bind(format!("message {id}"))
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
}

async fn message_count(pool: &SqlitePool, conversation_id: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE conversation_id=?")
        .bind(conversation_id)
        .fetch_one(pool)
        .await
        .unwrap();
    count
}

#[tokio::test]
async fn profile_resolution_is_idempotent() {
    let pool = setup_test_db().await;

    let first = profile(&pool, "alice").await;
    let second = profile(&pool, "alice").await;

    assert_eq!(first.id, second.id);
    assert_eq!(first.full_name, "alice");
    assert_eq!(first.role, "member");
}

#[tokio::test]
async fn concurrent_profile_creation_resolves_to_one_row() {
    let pool = setup_test_db().await;

    let (a, b) = tokio::join!(
        get_or_create_profile(&pool, "google.com:bob", Some("bob@example.com")),
        get_or_create_profile(&pool, "google.com:bob", Some("bob@example.com")),
    );
    assert_eq!(a.unwrap().id, b.unwrap().id);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles WHERE user_id=?")
        .bind("google.com:bob")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn conversation_pair_is_unique_across_orderings() {
    let pool = setup_test_db().await;
    let alice = profile(&pool, "alice").await;
    let bob = profile(&pool, "bob").await;

    let first = find_or_create(&pool, &alice.id, &bob.id).await.unwrap();
    let second = find_or_create(&pool, &bob.id, &alice.id).await.unwrap();

    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn initial_and_older_pages_never_overlap() {
    let pool = setup_test_db().await;
    let alice = profile(&pool, "alice").await;
    let bob = profile(&pool, "bob").await;
    let conversation = find_or_create(&pool, &alice.id, &bob.id).await.unwrap();

    for i in 1..=10 {
        insert_message(&pool, &format!("m{i:02}"), &conversation.id, &alice.id, i).await;
    }

    let initial = fetch_initial(&pool, &conversation.id, 5).await.unwrap();
    let ts: Vec<i64> = initial.iter().map(|m| m.created_at).collect();
    assert_eq!(ts, [6, 7, 8, 9, 10]);

    let older = fetch_older(&pool, &conversation.id, initial[0].created_at, 5)
        .await
        .unwrap();
    let ts: Vec<i64> = older.iter().map(|m| m.created_at).collect();
    assert_eq!(ts, [1, 2, 3, 4, 5]);

    for m in &older {
        assert!(!initial.iter().any(|n| n.id == m.id));
    }

    let exhausted = fetch_older(&pool, &conversation.id, older[0].created_at, 5)
        .await
        .unwrap();
    assert!(exhausted.is_empty());
}

#[tokio::test]
async fn equal_timestamps_render_in_insertion_order() {
    let pool = setup_test_db().await;
    let alice = profile(&pool, "alice").await;
    let bob = profile(&pool, "bob").await;
    let conversation = find_or_create(&pool, &alice.id, &bob.id).await.unwrap();

    insert_message(&pool, "m1", &conversation.id, &alice.id, 100).await;
    insert_message(&pool, "m2", &conversation.id, &bob.id, 100).await;

    let page = fetch_initial(&pool, &conversation.id, 10).await.unwrap();
    let ids: Vec<&str> = page.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2"]);
}

#[tokio::test]
async fn recipient_read_marking_decrements_once() {
    let pool = setup_test_db().await;
    let hub = RealtimeHub::new(8);
    let counters = UnreadCounters::new();

    let x = profile(&pool, "x").await;
    let y = profile(&pool, "y").await;
    let conversation = find_or_create(&pool, &x.id, &y.id).await.unwrap();

    let outcome = send_message(&pool, &hub, &counters, &conversation, &x.id, "hello", "text")
        .await
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Sent(_)));
    assert_eq!(counters.get(&y.id), 1);

    // the sender opening their own view marks nothing
    let transitioned = mark_inbound_as_read(&pool, &counters, &conversation.id, &x.id)
        .await
        .unwrap();
    assert_eq!(transitioned, 0);

    let transitioned = mark_inbound_as_read(&pool, &counters, &conversation.id, &y.id)
        .await
        .unwrap();
    assert_eq!(transitioned, 1);
    assert_eq!(counters.get(&y.id), 0);

    let (read_at,): (Option<i64>,) = sqlx::query_as("SELECT read_at FROM messages WHERE conversation_id=?")
        .bind(&conversation.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(read_at.is_some());

    // idempotent: the second pass transitions nothing
    let transitioned = mark_inbound_as_read(&pool, &counters, &conversation.id, &y.id)
        .await
        .unwrap();
    assert_eq!(transitioned, 0);
    assert_eq!(counters.get(&y.id), 0);
}

#[tokio::test]
async fn whitespace_only_send_is_a_no_op() {
    let pool = setup_test_db().await;
    let hub = RealtimeHub::new(8);
    let counters = UnreadCounters::new();

    let x = profile(&pool, "x").await;
    let y = profile(&pool, "y").await;
    let conversation = find_or_create(&pool, &x.id, &y.id).await.unwrap();

    let mut rx = hub.subscribe();
    let outcome = send_message(&pool, &hub, &counters, &conversation, &x.id, "   ", "text")
        .await
        .unwrap();

    assert!(matches!(outcome, SendOutcome::Ignored));
    assert_eq!(message_count(&pool, &conversation.id).await, 0);
    assert_eq!(counters.get(&y.id), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn closed_conversation_rejects_sends() {
    let pool = setup_test_db().await;
    let hub = RealtimeHub::new(8);
    let counters = UnreadCounters::new();

    let x = profile(&pool, "x").await;
    let y = profile(&pool, "y").await;
    let conversation = find_or_create(&pool, &x.id, &y.id).await.unwrap();

    sqlx::query("UPDATE conversations SET status='closed' WHERE id=?")
        .bind(&conversation.id)
        .execute(&pool)
        .await
        .unwrap();
    let closed = Conversation { status: "closed".to_owned(), ..conversation };

    let outcome = send_message(&pool, &hub, &counters, &closed, &x.id, "hello?", "text").await;
    assert!(matches!(outcome, Err(AppError::Conflict(_))));
    assert_eq!(message_count(&pool, &closed.id).await, 0);
}

#[tokio::test]
async fn send_publishes_exactly_one_realtime_event() {
    let pool = setup_test_db().await;
    let hub = RealtimeHub::new(8);
    let counters = UnreadCounters::new();

    let x = profile(&pool, "x").await;
    let y = profile(&pool, "y").await;
    let conversation = find_or_create(&pool, &x.id, &y.id).await.unwrap();

    let mut rx = hub.subscribe();
    send_message(&pool, &hub, &counters, &conversation, &x.id, "hello", "text")
        .await
        .unwrap();

    let softspot::realtime::RealtimeEvent::MessageInserted(m) = rx.try_recv().unwrap();
    assert_eq!(m.conversation_id, conversation.id);
    assert_eq!(m.content, "hello");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn conversation_list_orders_by_activity_with_counterpart_and_unread() {
    let pool = setup_test_db().await;
    let alice = profile(&pool, "alice").await;
    let bob = profile(&pool, "bob").await;
    let carol = profile(&pool, "carol").await;

    let with_bob = find_or_create(&pool, &alice.id, &bob.id).await.unwrap();
    let with_carol = find_or_create(&pool, &carol.id, &alice.id).await.unwrap();

    insert_message(&pool, "m1", &with_bob.id, &bob.id, 100).await;
    insert_message(&pool, "m2", &with_bob.id, &bob.id, 200).await;
    insert_message(&pool, "m3", &with_carol.id, &carol.id, 300).await;

    let entries = list_conversations(&pool, &alice.id).await.unwrap();
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0].conversation.id, with_carol.id);
    assert_eq!(entries[0].counterpart_name, "carol");
    assert_eq!(entries[0].last_activity, 300);
    assert_eq!(entries[0].unread, 1);

    assert_eq!(entries[1].conversation.id, with_bob.id);
    assert_eq!(entries[1].counterpart_name, "bob");
    assert_eq!(entries[1].unread, 2);
}

#[tokio::test]
async fn reconcile_recomputes_counts_from_rows() {
    let pool = setup_test_db().await;
    let alice = profile(&pool, "alice").await;
    let bob = profile(&pool, "bob").await;
    let conversation = find_or_create(&pool, &alice.id, &bob.id).await.unwrap();

    insert_message(&pool, "m1", &conversation.id, &bob.id, 100).await;
    insert_message(&pool, "m2", &conversation.id, &bob.id, 200).await;
    insert_message(&pool, "m3", &conversation.id, &alice.id, 300).await;

    // a fresh process has no in-memory counts; reconcile restores them
    let counters = UnreadCounters::new();
    assert_eq!(counters.get(&alice.id), 0);
    assert_eq!(counters.reconcile(&pool, &alice.id).await.unwrap(), 2);
    assert_eq!(counters.get(&alice.id), 2);
}

#[tokio::test]
async fn closing_a_conversation_settles_unread_counts() {
    let pool = setup_test_db().await;
    let hub = RealtimeHub::new(8);
    let counters = UnreadCounters::new();

    let x = profile(&pool, "x").await;
    let y = profile(&pool, "y").await;
    let conversation = find_or_create(&pool, &x.id, &y.id).await.unwrap();

    send_message(&pool, &hub, &counters, &conversation, &x.id, "hi", "text")
        .await
        .unwrap();
    send_message(&pool, &hub, &counters, &conversation, &x.id, "there", "text")
        .await
        .unwrap();
    assert_eq!(counters.get(&y.id), 2);

    assert!(close(&pool, &counters, &conversation).await.unwrap());
    assert_eq!(counters.get(&y.id), 0);

    let (status,): (String,) = sqlx::query_as("SELECT status FROM conversations WHERE id=?")
        .bind(&conversation.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "closed");

    // the closed rows no longer count anywhere
    assert_eq!(counters.reconcile(&pool, &y.id).await.unwrap(), 0);

    // closing again flips nothing and cannot decrement twice
    counters.note_insert(&y.id);
    assert!(!close(&pool, &counters, &conversation).await.unwrap());
    assert_eq!(counters.get(&y.id), 1);
}

#[tokio::test]
async fn view_that_fell_behind_catches_up_without_gaps() {
    let pool = setup_test_db().await;
    let alice = profile(&pool, "alice").await;
    let bob = profile(&pool, "bob").await;
    let conversation = find_or_create(&pool, &alice.id, &bob.id).await.unwrap();

    insert_message(&pool, "m1", &conversation.id, &alice.id, 100).await;
    insert_message(&pool, "m2", &conversation.id, &bob.id, 200).await;

    let mut store = MessageStore::new(conversation.id.clone());
    let page = fetch_initial(&pool, &conversation.id, 50).await.unwrap();
    assert!(store.replace_initial(&conversation.id, page));

    // arrives while the view's receiver is overrun; one shares the newest
    // loaded timestamp
    insert_message(&pool, "m3", &conversation.id, &bob.id, 200).await;
    insert_message(&pool, "m4", &conversation.id, &bob.id, 300).await;

    // inclusive fetch returns m2 again; the store's de-dup absorbs it
    let missed = fetch_newer(&pool, &conversation.id, store.newest_created_at().unwrap())
        .await
        .unwrap();
    let mut added = 0;
    for m in missed {
        if store.append(m) {
            added += 1;
        }
    }
    assert_eq!(added, 2);

    let ids: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn self_conversation_is_rejected() {
    let pool = setup_test_db().await;
    let alice = profile(&pool, "alice").await;

    assert!(find_or_create(&pool, &alice.id, &alice.id).await.is_err());
}

#[tokio::test]
async fn message_roundtrips_through_the_row_type() {
    let pool = setup_test_db().await;
    let alice = profile(&pool, "alice").await;
    let bob = profile(&pool, "bob").await;
    let conversation = find_or_create(&pool, &alice.id, &bob.id).await.unwrap();

    insert_message(&pool, "m1", &conversation.id, &alice.id, 100).await;
    let page: Vec<Message> = fetch_initial(&pool, &conversation.id, 10).await.unwrap();
    assert_eq!(page[0].media_type, "text");
    assert_eq!(page[0].read_at, None);
}
