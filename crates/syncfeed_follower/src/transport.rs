//! Transport abstraction for opening feeds.

use crate::error::{FollowError, FollowResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::time::Duration;
use syncfeed_protocol::feed_url;
use tracing::debug;

/// Default TCP connect timeout for [`HttpFeedTransport`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A feed response body: byte chunks as they arrive.
pub type FeedBody = BoxStream<'static, FollowResult<Bytes>>;

/// Parameters of one feed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    /// Service root URL.
    pub url: String,
    /// Resume after this sequence.
    pub since: u64,
    /// Timeout in seconds (see the protocol crate).
    pub timeout: i64,
}

impl FeedRequest {
    /// Creates a request.
    pub fn new(url: impl Into<String>, since: u64, timeout: i64) -> Self {
        Self {
            url: url.into(),
            since,
            timeout,
        }
    }

    /// Returns the full feed URL including the query string.
    pub fn feed_url(&self) -> String {
        format!(
            "{}?since={}&timeout={}",
            feed_url(&self.url),
            self.since,
            self.timeout
        )
    }
}

/// Opens feed connections.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Opens a feed and returns its body once the response has started.
    async fn open_feed(&self, request: &FeedRequest) -> FollowResult<FeedBody>;
}

/// Feed transport over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFeedTransport {
    client: reqwest::Client,
}

impl HttpFeedTransport {
    /// Creates a transport with the given connect timeout.
    ///
    /// No overall request timeout is set; feeds may legitimately stay open
    /// for a long time.
    pub fn new(connect_timeout: Duration) -> FollowResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| FollowError::transport_fatal(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedTransport for HttpFeedTransport {
    async fn open_feed(&self, request: &FeedRequest) -> FollowResult<FeedBody> {
        let url = request.feed_url();
        debug!(%url, "opening feed");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FollowError::transport_retryable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("feed request failed with {status}: {body}");
            return Err(FollowError::Transport {
                message,
                retryable: is_retryable_status(status),
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| FollowError::transport_retryable(e.to_string())))
            .boxed())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// One canned response of a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// A body that ends cleanly after these chunks.
    Body(Vec<Bytes>),
    /// A body that breaks with a transport error after these chunks.
    Broken(Vec<Bytes>),
    /// The request fails before a body is returned.
    Refused {
        /// Whether the failure is retryable.
        retryable: bool,
    },
}

/// Transport replaying queued responses, for tests.
///
/// Once the script runs out, feeds stay open without data until the
/// follower is stopped.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<FeedRequest>>,
}

impl ScriptedTransport {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push(&self, response: ScriptedResponse) {
        self.responses.lock().push_back(response);
    }

    /// Queues a clean body made of the given chunks.
    pub fn push_body<I, B>(&self, chunks: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.push(ScriptedResponse::Body(
            chunks.into_iter().map(Into::into).collect(),
        ));
    }

    /// Returns the requests received so far.
    pub fn requests(&self) -> Vec<FeedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn open_feed(&self, request: &FeedRequest) -> FollowResult<FeedBody> {
        self.requests.lock().push(request.clone());
        let next = self.responses.lock().pop_front();
        match next {
            Some(ScriptedResponse::Body(chunks)) => {
                Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
            Some(ScriptedResponse::Broken(chunks)) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::once(async {
                    Err(FollowError::transport_retryable("connection reset"))
                }))
                .boxed()),
            Some(ScriptedResponse::Refused { retryable }) => Err(FollowError::Transport {
                message: "connection refused".into(),
                retryable,
            }),
            None => Ok(stream::pending().boxed()),
        }
    }
}
