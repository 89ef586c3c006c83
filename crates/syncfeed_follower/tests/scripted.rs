//! Follow-loop behaviour against scripted feed responses.

use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use syncfeed_follower::{
    BackoffConfig, CheckpointStore, DataSyncState, FollowError, FollowerConfig, FollowerRegistry,
    MemoryCheckpointStore, MemoryMirror, ScriptedResponse, ScriptedTransport,
};
use syncfeed_protocol::{encode_feed_line, ChangeRecord};

const URL: &str = "http://feeds/products";

struct Harness {
    transport: Arc<ScriptedTransport>,
    checkpoints: Arc<MemoryCheckpointStore>,
    mirror: Arc<MemoryMirror>,
    registry: FollowerRegistry,
}

impl Harness {
    fn new() -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let registry = FollowerRegistry::new(transport.clone(), checkpoints.clone());
        Self {
            transport,
            checkpoints,
            mirror: Arc::new(MemoryMirror::new()),
            registry,
        }
    }

    fn follow(&self) {
        self.registry
            .follow(config(), self.mirror.clone())
            .unwrap();
    }

    /// Waits until the follower has asked for `count` feeds.
    fn wait_for_requests(&self, count: usize) {
        wait_until(|| self.transport.requests().len() >= count);
    }
}

fn config() -> FollowerConfig {
    FollowerConfig::new(URL).with_backoff(
        BackoffConfig::default()
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(50)),
    )
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn update(key: &str, seq: u64, desc: &str) -> Vec<u8> {
    let record = ChangeRecord::update(
        key,
        format!("{URL}/items/{key}"),
        seq,
        format!("etag-{seq}"),
        json!({ "desc": desc }),
    );
    encode_feed_line(&record).unwrap()
}

fn tombstone(key: &str, seq: u64) -> Vec<u8> {
    let record = ChangeRecord::tombstone(key, format!("{URL}/items/{key}"), seq, "etag");
    encode_feed_line(&record).unwrap()
}

#[test]
fn resumes_from_saved_checkpoint() {
    let harness = Harness::new();
    harness
        .checkpoints
        .save(&DataSyncState {
            url: URL.into(),
            checkpoint: 5,
        })
        .unwrap();
    harness
        .transport
        .push_body([update("A", 6, "milk"), update("B", 7, "bread")]);

    harness.follow();
    harness.wait_for_requests(2);
    harness.registry.unfollow(URL).unwrap();

    let requests = harness.transport.requests();
    assert_eq!(requests[0].since, 5);
    assert_eq!(requests[1].since, 7);
    assert_eq!(harness.registry.checkpoint(URL).unwrap(), 7);
    assert_eq!(harness.mirror.len(), 2);
}

#[test]
fn records_split_across_chunks_are_applied() {
    let harness = Harness::new();
    let mut body = update("A", 1, "milk");
    body.extend(update("B", 2, "bread"));
    let (head, tail) = body.split_at(body.len() / 2 + 3);
    harness
        .transport
        .push_body([Bytes::copy_from_slice(head), Bytes::copy_from_slice(tail)]);

    harness.follow();
    harness.wait_for_requests(2);
    harness.registry.unfollow(URL).unwrap();

    assert_eq!(harness.mirror.get("A"), Some(json!({ "desc": "milk" })));
    assert_eq!(harness.mirror.get("B"), Some(json!({ "desc": "bread" })));
    assert_eq!(harness.registry.checkpoint(URL).unwrap(), 2);
}

#[test]
fn tombstones_delete_from_the_mirror() {
    let harness = Harness::new();
    harness.transport.push_body([
        update("A", 1, "milk"),
        update("B", 2, "bread"),
        tombstone("B", 3),
        update("A", 4, "butter"),
    ]);

    harness.follow();
    harness.wait_for_requests(2);
    harness.registry.unfollow(URL).unwrap();

    assert_eq!(harness.mirror.get("A"), Some(json!({ "desc": "butter" })));
    assert_eq!(harness.mirror.get("B"), None);
    assert_eq!(harness.registry.checkpoint(URL).unwrap(), 4);
}

#[test]
fn truncated_stream_replays_from_last_applied_record() {
    let harness = Harness::new();
    let partial = update("B", 2, "bread");
    let mut body = update("A", 1, "milk");
    body.extend_from_slice(&partial[..partial.len() / 2]);
    harness.transport.push_body([body]);
    harness
        .transport
        .push_body([update("B", 2, "bread")]);

    harness.follow();
    harness.wait_for_requests(3);
    harness.registry.unfollow(URL).unwrap();

    let requests = harness.transport.requests();
    assert_eq!(requests[0].since, 0);
    assert_eq!(requests[1].since, 1);
    assert_eq!(requests[2].since, 2);
    assert_eq!(harness.mirror.len(), 2);
}

#[test]
fn malformed_stream_does_not_advance_the_checkpoint() {
    let harness = Harness::new();
    let mut body = update("A", 1, "milk");
    body.extend_from_slice(b"{\"key\": 17, oops}\n");
    body.extend(update("B", 2, "bread"));
    harness.transport.push_body([body]);

    harness.follow();
    harness.wait_for_requests(2);
    harness.registry.unfollow(URL).unwrap();

    assert_eq!(harness.transport.requests()[1].since, 1);
    assert_eq!(harness.registry.checkpoint(URL).unwrap(), 1);
    assert_eq!(harness.mirror.get("B"), None);
}

#[test]
fn broken_connection_backs_off_and_retries() {
    let harness = Harness::new();
    harness
        .transport
        .push(ScriptedResponse::Refused { retryable: true });
    harness.transport.push(ScriptedResponse::Broken(vec![Bytes::from(
        update("A", 1, "milk"),
    )]));
    harness
        .transport
        .push_body([update("B", 2, "bread")]);

    harness.follow();
    harness.wait_for_requests(4);
    harness.registry.unfollow(URL).unwrap();

    let since: Vec<u64> = harness
        .transport
        .requests()
        .iter()
        .map(|r| r.since)
        .collect();
    assert_eq!(&since[..4], &[0, 0, 1, 2]);
    assert_eq!(harness.mirror.len(), 2);
}

#[test]
fn fatal_error_stops_the_follower() {
    let harness = Harness::new();
    harness
        .transport
        .push(ScriptedResponse::Refused { retryable: false });

    harness.follow();
    wait_until(|| !harness.registry.is_following(URL));
    assert!(harness.registry.following().is_empty());

    let err = harness.registry.unfollow(URL).unwrap_err();
    assert!(matches!(err, FollowError::Transport { retryable: false, .. }));
    assert_eq!(harness.transport.requests().len(), 1);
}

#[test]
fn follow_twice_is_rejected() {
    let harness = Harness::new();
    harness.follow();
    let err = harness
        .registry
        .follow(config(), harness.mirror.clone())
        .unwrap_err();
    assert!(matches!(err, FollowError::AlreadyFollowing { .. }));
    assert_eq!(harness.registry.following(), vec![URL.to_string()]);
    harness.registry.unfollow(URL).unwrap();

    let err = harness.registry.unfollow(URL).unwrap_err();
    assert!(matches!(err, FollowError::NotFollowing { .. }));
}

#[test]
fn checkpoint_reset_requires_a_stopped_follower() {
    let harness = Harness::new();
    harness.transport.push_body([update("A", 1, "milk")]);
    harness.follow();
    harness.wait_for_requests(2);

    let err = harness.registry.reset_checkpoint(URL).unwrap_err();
    assert!(matches!(err, FollowError::ActiveFollower { .. }));

    harness.registry.unfollow(URL).unwrap();
    harness.registry.reset_checkpoint(URL).unwrap();
    assert_eq!(harness.registry.checkpoint(URL).unwrap(), 0);

    harness.follow();
    harness.wait_for_requests(3);
    assert_eq!(harness.transport.requests()[2].since, 0);
}

#[test]
fn shutdown_stops_every_follower() {
    let harness = Harness::new();
    harness.follow();
    harness
        .registry
        .follow(
            FollowerConfig::new("http://feeds/orders"),
            Arc::new(MemoryMirror::new()),
        )
        .unwrap();
    assert_eq!(harness.registry.following().len(), 2);

    harness.registry.shutdown();
    assert!(harness.registry.following().is_empty());
    assert!(!harness.registry.is_following(URL));
}
