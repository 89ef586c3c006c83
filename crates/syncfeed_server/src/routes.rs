//! HTTP routes.

use crate::error::ServerError;
use crate::handler::{FeedService, PointRead};
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use syncfeed_protocol::{FeedQuery, ListQuery};

/// Shared handler state.
pub type AppState = Arc<FeedService>;

const JSON: &str = "application/json";
const NDJSON: &str = "application/x-ndjson";

/// All routes of the feed server.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handle_health))
        .route("/:service/changes/list", get(handle_list))
        .route("/:service/changes/feed", get(handle_feed))
        .route("/:service/items/:key", get(handle_item))
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok".
    pub status: &'static str,
    /// Names of the served collections.
    pub collections: Vec<String>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        collections: state.registry().names(),
    })
}

async fn handle_list(
    State(state): State<AppState>,
    Path(service): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let pager = state.list_changes(&service, query.since)?;
    let body = Body::from_stream(pager.into_stream());
    Ok(([(header::CONTENT_TYPE, JSON)], body).into_response())
}

async fn handle_feed(
    State(state): State<AppState>,
    Path(service): Path<String>,
    version: Version,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Result<Response, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    if version < Version::HTTP_11 {
        return Err(ServerError::SuspensionUnsupported);
    }
    let connection = state.open_feed(&service, query)?;
    let body = Body::from_stream(connection.into_stream());
    Ok(([(header::CONTENT_TYPE, NDJSON)], body).into_response())
}

async fn handle_item(
    State(state): State<AppState>,
    Path((service, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());

    match state.point_read(&service, &key, if_none_match)? {
        PointRead::NotModified { etag } => {
            Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, quote(&etag))]).into_response())
        }
        PointRead::Found { etag, body } => Ok((
            StatusCode::OK,
            [
                (header::ETAG, quote(&etag)),
                (header::CONTENT_TYPE, JSON.to_string()),
            ],
            body,
        )
            .into_response()),
        PointRead::NotFound => Err(ServerError::NotFound(key)),
    }
}

fn quote(etag: &str) -> String {
    format!("\"{etag}\"")
}
