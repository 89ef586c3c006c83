//! Feed connection behaviour: catch-up, live streaming, timeouts and
//! backpressure.

use futures_util::StreamExt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use syncfeed_core::{ChangeItem, CollectionRegistry, MemoryChangeStore, PublishedCollection};
use syncfeed_protocol::FeedQuery;
use syncfeed_server::{CompletionReason, FeedEvent, FeedService, FeedState, ServerConfig};

fn setup(queue_capacity: usize) -> (Arc<PublishedCollection>, FeedService) {
    let registry = Arc::new(CollectionRegistry::new(Arc::new(MemoryChangeStore::new())));
    let collection = registry.enable("products");
    let config = ServerConfig::default()
        .with_public_base_url("http://feeds")
        .with_subscriber_queue_capacity(queue_capacity);
    (collection, FeedService::new(registry, config))
}

fn publish(collection: &PublishedCollection, key: &str, desc: &str) -> u64 {
    let snapshot = serde_json::to_vec(&serde_json::json!({ "desc": desc })).unwrap();
    let (item, _) = collection
        .sequencer()
        .publish(ChangeItem::live(key, snapshot))
        .unwrap();
    item.sequence
}

fn expect_change(event: FeedEvent) -> u64 {
    match event {
        FeedEvent::Change(record) => record.seq,
        other => panic!("expected a change, got {other:?}"),
    }
}

#[tokio::test]
async fn catch_up_then_live() {
    let (collection, service) = setup(100);
    publish(&collection, "A", "milk");
    publish(&collection, "B", "bread");

    let mut feed = service.open_feed("products", FeedQuery::new(0, 0)).unwrap();
    assert_eq!(expect_change(feed.next_event().await.unwrap()), 1);
    assert_eq!(expect_change(feed.next_event().await.unwrap()), 2);

    let writer = Arc::clone(&collection);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        publish(&writer, "A", "butter");
    });

    match feed.next_event().await.unwrap() {
        FeedEvent::Change(record) => {
            assert_eq!(record.key, "A");
            assert_eq!(record.seq, 3);
            assert_eq!(record.data, Some(serde_json::json!({ "desc": "butter" })));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(feed.is_subscribed());
    assert!(matches!(feed.state(), FeedState::Streaming { cursor: 3 }));
}

#[tokio::test]
async fn since_skips_older_changes() {
    let (collection, service) = setup(100);
    publish(&collection, "A", "milk");
    publish(&collection, "B", "bread");
    publish(&collection, "A", "butter");

    let mut feed = service.open_feed("products", FeedQuery::new(2, -1)).unwrap();
    assert_eq!(expect_change(feed.next_event().await.unwrap()), 3);
    assert_eq!(
        feed.next_event().await.unwrap(),
        FeedEvent::Completed(CompletionReason::FirstChange)
    );
}

#[tokio::test]
async fn single_shot_completes_after_catch_up_without_subscribing() {
    let (collection, service) = setup(100);
    publish(&collection, "A", "milk");
    publish(&collection, "B", "bread");

    let mut feed = service.open_feed("products", FeedQuery::new(0, -30)).unwrap();
    assert_eq!(expect_change(feed.next_event().await.unwrap()), 1);
    assert_eq!(expect_change(feed.next_event().await.unwrap()), 2);
    assert_eq!(
        feed.next_event().await.unwrap(),
        FeedEvent::Completed(CompletionReason::FirstChange)
    );
    assert!(!feed.is_subscribed());
    assert!(collection.subscribers().is_empty());
}

#[tokio::test]
async fn single_shot_waits_for_first_live_change() {
    let (collection, service) = setup(100);
    let mut feed = service.open_feed("products", FeedQuery::new(0, -30)).unwrap();

    let writer = Arc::clone(&collection);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        publish(&writer, "A", "milk");
    });

    assert_eq!(expect_change(feed.next_event().await.unwrap()), 1);
    assert_eq!(
        feed.next_event().await.unwrap(),
        FeedEvent::Completed(CompletionReason::FirstChange)
    );
    assert!(collection.subscribers().is_empty());
}

#[tokio::test]
async fn positive_timeout_expires() {
    let (collection, service) = setup(100);
    publish(&collection, "A", "milk");

    let mut feed = service.open_feed("products", FeedQuery::new(0, 1)).unwrap();
    assert_eq!(expect_change(feed.next_event().await.unwrap()), 1);
    assert_eq!(
        feed.next_event().await.unwrap(),
        FeedEvent::Completed(CompletionReason::TimedOut)
    );
    assert!(collection.subscribers().is_empty());
}

#[tokio::test]
async fn dropping_the_connection_unsubscribes() {
    let (collection, service) = setup(100);
    let mut feed = service.open_feed("products", FeedQuery::new(0, 0)).unwrap();

    let waited = tokio::time::timeout(Duration::from_millis(20), feed.next_event()).await;
    assert!(waited.is_err());
    assert!(feed.is_subscribed());
    assert_eq!(collection.subscribers().len(), 1);

    drop(feed);
    assert!(collection.subscribers().is_empty());
}

#[tokio::test]
async fn slow_subscriber_is_dropped_without_affecting_others() {
    let (collection, service) = setup(2);
    let mut slow = service.open_feed("products", FeedQuery::new(0, 0)).unwrap();
    let mut fast = service.open_feed("products", FeedQuery::new(0, 0)).unwrap();
    for feed in [&mut slow, &mut fast] {
        let waited = tokio::time::timeout(Duration::from_millis(20), feed.next_event()).await;
        assert!(waited.is_err());
    }
    assert_eq!(collection.subscribers().len(), 2);

    let mut fast_seen = Vec::new();
    for i in 0..5 {
        publish(&collection, &format!("K{i}"), "x");
        fast_seen.push(expect_change(fast.next_event().await.unwrap()));
    }
    assert_eq!(fast_seen, vec![1, 2, 3, 4, 5]);
    assert_eq!(collection.subscribers().len(), 1);

    // The slow connection drains what was queued, then reports the overflow.
    assert_eq!(expect_change(slow.next_event().await.unwrap()), 1);
    assert_eq!(expect_change(slow.next_event().await.unwrap()), 2);
    assert_eq!(
        slow.next_event().await.unwrap(),
        FeedEvent::Completed(CompletionReason::Overflowed)
    );
}

#[tokio::test]
async fn overflow_aborts_the_body_stream() {
    let (collection, service) = setup(1);
    let mut feed = service.open_feed("products", FeedQuery::new(0, 0)).unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(20), feed.next_event()).await;
    assert!(waited.is_err());

    publish(&collection, "A", "milk");
    publish(&collection, "B", "bread");

    let chunks: Vec<_> = feed.into_stream().collect().await;
    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].is_ok());
    assert!(chunks[1].is_err());
}

#[tokio::test]
async fn no_gap_between_catch_up_and_streaming() {
    let (collection, service) = setup(10_000);
    let total = 300u64;
    for i in 0..50 {
        publish(&collection, &format!("pre-{i}"), "x");
    }

    let writer = Arc::clone(&collection);
    let handle = thread::spawn(move || {
        for i in 50..total {
            publish(&writer, &format!("live-{i}"), "x");
        }
    });

    let mut feed = service.open_feed("products", FeedQuery::new(0, 30)).unwrap();
    let mut seen = Vec::new();
    while seen.len() < total as usize {
        match feed.next_event().await.unwrap() {
            FeedEvent::Change(record) => seen.push(record.seq),
            FeedEvent::Completed(reason) => panic!("feed ended early: {reason:?}"),
        }
    }
    handle.join().unwrap();

    let expected: Vec<u64> = (1..=total).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn closing_feeds_ends_open_connections() {
    let (collection, service) = setup(100);
    publish(&collection, "A", "milk");

    let mut feed = service.open_feed("products", FeedQuery::new(0, 0)).unwrap();
    assert_eq!(expect_change(feed.next_event().await.unwrap()), 1);

    let service = Arc::new(service);
    let closer = Arc::clone(&service);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        closer.close_feeds();
    });

    assert_eq!(
        feed.next_event().await.unwrap(),
        FeedEvent::Completed(CompletionReason::Closed)
    );
    assert!(!feed.is_subscribed());
    assert!(service.is_closing());

    let mut late = service.open_feed("products", FeedQuery::new(0, 0)).unwrap();
    assert_eq!(
        late.next_event().await.unwrap(),
        FeedEvent::Completed(CompletionReason::Closed)
    );
}

#[tokio::test]
async fn unknown_collection_is_rejected() {
    let (_collection, service) = setup(10);
    assert!(service.open_feed("nope", FeedQuery::new(0, 0)).is_err());
}
