//! Routing tests driven through the axum router.

use axum::body::Body;
use axum::http::{header, Request, StatusCode, Version};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use syncfeed_core::{ChangeItem, CollectionRegistry, MemoryChangeStore};
use syncfeed_protocol::{ChangeRecord, RecordDecoder};
use syncfeed_server::{FeedServer, ServerConfig};
use tower::ServiceExt;

fn app() -> Router {
    let registry = Arc::new(CollectionRegistry::new(Arc::new(MemoryChangeStore::new())));
    let collection = registry.enable("products");
    {
        let mut seq = collection.sequencer();
        seq.publish(ChangeItem::live("A", br#"{"desc":"milk"}"#.to_vec()))
            .unwrap();
        seq.publish(ChangeItem::live("B", br#"{"desc":"bread"}"#.to_vec()))
            .unwrap();
        let b = seq.lookup("B").unwrap().unwrap();
        seq.publish(b.into_tombstone()).unwrap();
    }
    let config = ServerConfig::default().with_public_base_url("http://feeds");
    FeedServer::new(registry, config).router()
}

async fn get(app: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body.to_vec())
}

fn request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn error_code(body: &[u8]) -> String {
    let value: serde_json::Value = serde_json::from_slice(body).unwrap();
    assert_eq!(value["error"], true);
    value["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health() {
    let (status, _, body) = get(app(), request("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["collections"], serde_json::json!(["products"]));
}

#[tokio::test]
async fn list_returns_json_array() {
    let (status, _, body) = get(app(), request("/products/changes/list?since=0")).await;
    assert_eq!(status, StatusCode::OK);
    let records = ChangeRecord::decode_list(&body).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key, "A");
    assert_eq!(records[0].url, "http://feeds/products/items/A");
    assert_eq!(records[1].seq, 3);
    assert!(records[1].deleted);

    let (_, _, body) = get(app(), request("/products/changes/list?since=1")).await;
    assert_eq!(ChangeRecord::decode_list(&body).unwrap().len(), 1);
}

#[tokio::test]
async fn list_spanning_many_batches_is_one_array() {
    let registry = Arc::new(CollectionRegistry::new(Arc::new(MemoryChangeStore::new())));
    let collection = registry.enable("products");
    {
        let mut seq = collection.sequencer();
        for i in 0..7 {
            seq.publish(ChangeItem::live(format!("K{i}"), b"{}".to_vec()))
                .unwrap();
        }
    }
    let config = ServerConfig::default().with_scan_batch_size(2);
    let router = FeedServer::new(registry, config).router();

    let (status, headers, body) = get(router, request("/products/changes/list?since=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    let seqs: Vec<u64> = ChangeRecord::decode_list(&body)
        .unwrap()
        .into_iter()
        .map(|r| r.seq)
        .collect();
    assert_eq!(seqs, [3, 4, 5, 6, 7]);
}

#[tokio::test]
async fn list_without_since_starts_at_zero() {
    let (status, _, body) = get(app(), request("/products/changes/list")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ChangeRecord::decode_list(&body).unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_query_is_bad_request() {
    let (status, _, body) = get(app(), request("/products/changes/list?since=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_collection_is_not_enabled() {
    let (status, _, body) = get(app(), request("/orders/changes/list")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_ENABLED");

    let (status, _, body) = get(app(), request("/orders/changes/feed?timeout=-1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_ENABLED");
}

#[tokio::test]
async fn single_shot_feed_streams_ndjson() {
    let (status, headers, body) =
        get(app(), request("/products/changes/feed?since=0&timeout=-5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/x-ndjson");

    let records = RecordDecoder::decode_all(&body).unwrap();
    let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 3]);
    assert_eq!(body.iter().filter(|b| **b == b'\n').count(), 2);
}

#[tokio::test]
async fn http10_feed_is_rejected() {
    let request = Request::builder()
        .uri("/products/changes/feed?timeout=-1")
        .version(Version::HTTP_10)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = get(app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "SUSPENSION_UNSUPPORTED");
}

#[tokio::test]
async fn item_read_with_etag() {
    let (status, headers, body) = get(app(), request("/products/items/A")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, br#"{"desc":"milk"}"#);
    let etag = headers[header::ETAG].to_str().unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    let conditional = Request::builder()
        .uri("/products/items/A")
        .header(header::IF_NONE_MATCH, &etag)
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = get(app(), conditional).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert_eq!(headers[header::ETAG].to_str().unwrap(), etag);
    assert!(body.is_empty());
}

#[tokio::test]
async fn deleted_item_is_not_found() {
    let (status, _, body) = get(app(), request("/products/items/B")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
}
