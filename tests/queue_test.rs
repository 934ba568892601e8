//! Integration tests for the queue engine over the in-memory store.

use std::time::Duration;

use leaseq::queue::{
    AddOptions, ClaimOptions, DEFAULT_VISIBILITY, NackOptions, PingOptions, Queue, QueueOptions,
};
use leaseq::{Error, MemoryStore, QueueStats, RecordId};
use serde_json::json;

const SHORT: Duration = Duration::from_millis(200);
const PAST_SHORT: Duration = Duration::from_millis(300);

fn test_queue(name: &str) -> Queue<MemoryStore> {
    Queue::new(MemoryStore::new(name)).expect("failed to create queue")
}

fn short_queue(name: &str) -> Queue<MemoryStore> {
    Queue::with_options(
        MemoryStore::new(name),
        QueueOptions::default().visibility(SHORT),
    )
    .expect("failed to create queue")
}

fn stats(total: u64, size: u64, in_flight: u64, done: u64) -> QueueStats {
    QueueStats {
        total,
        size,
        in_flight,
        done,
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn queue_requires_collection_name() {
    let err = Queue::new(MemoryStore::new("")).err().expect("should fail");
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn zero_visibility_uses_default_window() {
    let queue = Queue::with_options(
        MemoryStore::new("q"),
        QueueOptions::default().visibility(Duration::ZERO),
    )
    .unwrap();
    assert_eq!(queue.options().visibility, DEFAULT_VISIBILITY);
}

#[tokio::test]
async fn ensure_indexes_reaches_store() {
    let queue = test_queue("indexes");
    assert!(!queue.store().is_indexed().await);
    queue.ensure_indexes().await.unwrap();
    queue.ensure_indexes().await.unwrap();
    assert!(queue.store().is_indexed().await);
}

// ---------------------------------------------------------------------------
// Basic lifecycle: add → claim → ack
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_then_claim_round_trips_payload() {
    let queue = test_queue("default");

    let id = queue.add(json!({"task": "hello"})).await.unwrap();
    let msg = queue.claim().await.unwrap().expect("should claim message");

    assert_eq!(msg.id, id);
    assert_eq!(msg.payload, json!({"task": "hello"}));
    assert_eq!(msg.tries, 1);
    assert!(!msg.ack.is_empty());

    assert_eq!(queue.ack(&msg.ack).await.unwrap(), id);
    assert!(queue.claim().await.unwrap().is_none());
}

#[tokio::test]
async fn claim_on_empty_queue_returns_none() {
    let queue = test_queue("empty");
    assert!(queue.claim().await.unwrap().is_none());
}

#[tokio::test]
async fn claims_follow_id_order() {
    let queue = test_queue("order");
    let first = queue.add(json!("first")).await.unwrap();
    let second = queue.add(json!("second")).await.unwrap();

    let a = queue.claim().await.unwrap().unwrap();
    let b = queue.claim().await.unwrap().unwrap();
    assert_eq!(a.id, first);
    assert_eq!(b.id, second);
    assert_ne!(a.ack, b.ack);
    assert!(queue.claim().await.unwrap().is_none());
}

#[tokio::test]
async fn array_payload_via_add_is_a_single_message() {
    let queue = test_queue("array-single");
    queue.add(json!([1, 2, 3])).await.unwrap();

    assert_eq!(queue.total().await.unwrap(), 1);
    let msg = queue.claim().await.unwrap().unwrap();
    assert_eq!(msg.payload, json!([1, 2, 3]));
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_many_returns_ids_in_order() {
    let queue = test_queue("multi");
    let payloads: Vec<_> = (0..5).map(|i| json!({"n": i})).collect();

    let ids = queue.add_many(payloads).await.unwrap();
    assert_eq!(ids.len(), 5);

    for (i, id) in ids.iter().enumerate() {
        let msg = queue.claim().await.unwrap().unwrap();
        assert_eq!(&msg.id, id);
        assert_eq!(msg.payload, json!({"n": i}));
    }
    assert!(queue.claim().await.unwrap().is_none());
}

#[tokio::test]
async fn add_many_rejects_empty_batch() {
    let queue = test_queue("multi-empty");
    let err = queue.add_many(vec![]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(queue.total().await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delayed_message_is_hidden_until_due() {
    let queue = test_queue("delay");
    queue
        .add_with(json!("later"), AddOptions::delay(SHORT))
        .await
        .unwrap();

    assert!(queue.claim().await.unwrap().is_none());
    assert_eq!(queue.size().await.unwrap(), 0);

    tokio::time::sleep(PAST_SHORT).await;

    let msg = queue.claim().await.unwrap().expect("message should be due");
    assert_eq!(msg.payload, json!("later"));
    assert_eq!(msg.tries, 1);
}

#[tokio::test]
async fn queue_default_delay_applies_to_batches() {
    let queue = Queue::with_options(
        MemoryStore::new("delay-default"),
        QueueOptions::default().delay(SHORT),
    )
    .unwrap();
    queue.add_many(vec![json!(1), json!(2)]).await.unwrap();
    assert!(queue.claim().await.unwrap().is_none());

    // An explicit zero overrides the queue default.
    queue
        .add_with(json!(3), AddOptions::delay(Duration::ZERO))
        .await
        .unwrap();
    let msg = queue.claim().await.unwrap().unwrap();
    assert_eq!(msg.payload, json!(3));
}

// ---------------------------------------------------------------------------
// Ack exclusivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_ack_with_same_token_fails() {
    let queue = test_queue("ack-twice");
    queue.add(json!("x")).await.unwrap();
    let msg = queue.claim().await.unwrap().unwrap();

    queue.ack(&msg.ack).await.unwrap();

    let err = queue.ack(&msg.ack).await.unwrap_err();
    assert!(err.is_unknown_ack(), "got {err:?}");
    assert!(queue.ping(&msg.ack).await.unwrap_err().is_unknown_ack());
    assert!(queue.nack(&msg.ack).await.unwrap_err().is_unknown_ack());
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let queue = test_queue("ack-unknown");
    queue.add(json!("x")).await.unwrap();
    queue.claim().await.unwrap().unwrap();

    match queue.ack("not-a-token").await {
        Err(Error::UnknownAck { op, ack }) => {
            assert_eq!(op, "ack");
            assert_eq!(ack, "not-a-token");
        }
        other => panic!("expected UnknownAck, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_lease_cannot_be_acked() {
    let queue = short_queue("ack-expired");
    queue.add(json!("x")).await.unwrap();
    let msg = queue.claim().await.unwrap().unwrap();

    tokio::time::sleep(PAST_SHORT).await;

    assert!(queue.ack(&msg.ack).await.unwrap_err().is_unknown_ack());
    assert_eq!(queue.done().await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Lease expiry and redelivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_lease_is_redelivered_with_new_token() {
    let queue = short_queue("visibility");
    let id = queue.add(json!("retry me")).await.unwrap();

    let first = queue.claim().await.unwrap().unwrap();
    assert!(queue.claim().await.unwrap().is_none(), "leased message is hidden");

    tokio::time::sleep(PAST_SHORT).await;

    let second = queue.claim().await.unwrap().expect("lease expired");
    assert_eq!(second.id, id);
    assert_eq!(second.tries, 2);
    assert_ne!(second.ack, first.ack);

    // The superseded token is dead; the new one works.
    assert!(queue.ack(&first.ack).await.unwrap_err().is_unknown_ack());
    queue.ack(&second.ack).await.unwrap();
}

#[tokio::test]
async fn claim_visibility_override_shortens_lease() {
    let queue = test_queue("visibility-override");
    queue.add(json!("x")).await.unwrap();

    queue
        .claim_with(ClaimOptions::visibility(SHORT))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(PAST_SHORT).await;

    let again = queue.claim().await.unwrap().expect("override lease expired");
    assert_eq!(again.tries, 2);
}

#[tokio::test]
async fn zero_visibility_override_uses_queue_window() {
    let queue = short_queue("visibility-zero");
    queue.add(json!("x")).await.unwrap();
    let msg = queue
        .claim_with(ClaimOptions::visibility(Duration::ZERO))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(queue.in_flight().await.unwrap(), 1);

    queue
        .ping_with(&msg.ack, PingOptions::visibility(Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(queue.in_flight().await.unwrap(), 1);

    tokio::time::sleep(PAST_SHORT).await;
    assert_eq!(queue.size().await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Ping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_extends_lease() {
    let queue = short_queue("ping");
    let id = queue.add(json!("x")).await.unwrap();
    let msg = queue.claim().await.unwrap().unwrap();

    let pinged = queue
        .ping_with(&msg.ack, PingOptions::visibility(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(pinged, id);

    tokio::time::sleep(PAST_SHORT).await;

    assert!(queue.claim().await.unwrap().is_none(), "ping kept it leased");
    queue.ack(&msg.ack).await.unwrap();
}

#[tokio::test]
async fn ping_does_not_revive_expired_lease() {
    let queue = short_queue("ping-expired");
    queue.add(json!("x")).await.unwrap();
    let msg = queue.claim().await.unwrap().unwrap();

    tokio::time::sleep(PAST_SHORT).await;

    assert!(queue.ping(&msg.ack).await.unwrap_err().is_unknown_ack());
    assert_eq!(queue.size().await.unwrap(), 1);
}

#[tokio::test]
async fn ping_after_ack_fails() {
    let queue = test_queue("ping-acked");
    queue.add(json!("x")).await.unwrap();
    let msg = queue.claim().await.unwrap().unwrap();
    queue.ack(&msg.ack).await.unwrap();

    assert!(queue.ping(&msg.ack).await.unwrap_err().is_unknown_ack());
}

// ---------------------------------------------------------------------------
// Nack
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nack_makes_message_claimable_immediately() {
    let queue = test_queue("nack");
    let id = queue.add(json!("Hello, World!")).await.unwrap();
    let msg = queue.claim().await.unwrap().unwrap();

    assert_eq!(queue.nack(&msg.ack).await.unwrap(), id);

    // The old token is no longer usable.
    assert!(queue.ack(&msg.ack).await.unwrap_err().is_unknown_ack());
    assert!(queue.nack(&msg.ack).await.unwrap_err().is_unknown_ack());

    let again = queue.claim().await.unwrap().expect("nacked message is claimable");
    assert_eq!(again.id, id);
    assert_eq!(again.tries, 2);
    queue.ack(&again.ack).await.unwrap();
}

#[tokio::test]
async fn nack_with_delay_postpones_redelivery() {
    let queue = test_queue("nack-delay");
    queue.add(json!("x")).await.unwrap();
    let msg = queue.claim().await.unwrap().unwrap();

    queue
        .nack_with(&msg.ack, NackOptions::delay(SHORT))
        .await
        .unwrap();
    assert!(queue.claim().await.unwrap().is_none());

    tokio::time::sleep(PAST_SHORT).await;

    let again = queue.claim().await.unwrap().expect("delay elapsed");
    assert_eq!(again.tries, 2);
}

#[tokio::test]
async fn delayed_nack_keeps_token_live_until_delay_passes() {
    let queue = test_queue("nack-delay-token");
    queue.add(json!("x")).await.unwrap();
    let msg = queue.claim().await.unwrap().unwrap();

    queue
        .nack_with(&msg.ack, NackOptions::delay(SHORT))
        .await
        .unwrap();
    assert_eq!(queue.in_flight().await.unwrap(), 1);
    queue.ping(&msg.ack).await.unwrap();
    assert!(queue.claim().await.unwrap().is_none());

    let nacked = queue.ack(&msg.ack).await.unwrap();
    assert_eq!(nacked, msg.id);
    assert_eq!(queue.done().await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Statistics and clean
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_track_add_claim_ack_clean() {
    let queue = test_queue("stats1");
    assert_eq!(queue.stats().await.unwrap(), stats(0, 0, 0, 0));

    queue.add(json!("Hello, World!")).await.unwrap();
    assert_eq!(queue.stats().await.unwrap(), stats(1, 1, 0, 0));

    let msg = queue.claim().await.unwrap().unwrap();
    assert_eq!(queue.stats().await.unwrap(), stats(1, 0, 1, 0));

    queue.ack(&msg.ack).await.unwrap();
    assert_eq!(queue.stats().await.unwrap(), stats(1, 0, 0, 1));

    assert_eq!(queue.clean().await.unwrap(), 1);
    assert_eq!(queue.stats().await.unwrap(), stats(0, 0, 0, 0));
}

#[tokio::test]
async fn stats_track_expiry_and_ping() {
    let queue = short_queue("stats2");
    queue.add(json!("x")).await.unwrap();

    queue.claim().await.unwrap().unwrap();
    assert_eq!(queue.stats().await.unwrap(), stats(1, 0, 1, 0));

    tokio::time::sleep(PAST_SHORT).await;
    assert_eq!(queue.stats().await.unwrap(), stats(1, 1, 0, 0));

    let msg = queue.claim().await.unwrap().unwrap();
    queue
        .ping_with(&msg.ack, PingOptions::visibility(Duration::from_secs(30)))
        .await
        .unwrap();
    tokio::time::sleep(PAST_SHORT).await;
    assert_eq!(queue.stats().await.unwrap(), stats(1, 0, 1, 0));

    queue.ack(&msg.ack).await.unwrap();
    assert_eq!(queue.stats().await.unwrap(), stats(1, 0, 0, 1));
}

#[tokio::test]
async fn clean_leaves_pending_and_in_flight_alone() {
    let queue = test_queue("clean");
    queue
        .add_many(vec![json!(1), json!(2), json!(3)])
        .await
        .unwrap();

    let done = queue.claim().await.unwrap().unwrap();
    queue.ack(&done.ack).await.unwrap();
    let leased = queue.claim().await.unwrap().unwrap();

    let before = queue.stats().await.unwrap();
    assert_eq!(before, stats(3, 1, 1, 1));
    assert_eq!(before.total, before.size + before.in_flight + before.done);

    assert_eq!(queue.clean().await.unwrap(), 1);
    assert_eq!(queue.stats().await.unwrap(), stats(2, 1, 1, 0));
    assert_eq!(queue.clean().await.unwrap(), 0);

    let id: RecordId = done.id.parse().unwrap();
    assert!(queue.store().get(id).await.is_none());
    queue.ack(&leased.ack).await.unwrap();
}
