//! List mode bodies.
//!
//! The JSON array is produced one scan batch at a time, so a list request
//! holds at most one batch of records in memory however long the log is.

use crate::error::ServerResult;
use crate::handler::to_record;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use std::iter;
use std::sync::Arc;
use syncfeed_core::PublishedCollection;
use syncfeed_protocol::encode_list_elements;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagerState {
    Opening,
    Paging,
    Done,
}

/// Pages through a collection's log after a sequence, yielding the pieces
/// of a JSON array body.
pub struct ListPager {
    collection: Arc<PublishedCollection>,
    service_url: String,
    cursor: u64,
    batch_size: usize,
    sent: usize,
    state: PagerState,
}

impl ListPager {
    pub(crate) fn new(
        collection: Arc<PublishedCollection>,
        service_url: String,
        since: u64,
        batch_size: usize,
    ) -> Self {
        Self {
            collection,
            service_url,
            cursor: since,
            batch_size: batch_size.max(1),
            sent: 0,
            state: PagerState::Opening,
        }
    }

    /// Returns the next piece of the body, or `None` after the closing `]`.
    ///
    /// An error ends the body; later calls return `None`.
    pub fn next_chunk(&mut self) -> ServerResult<Option<Bytes>> {
        let result = self.advance();
        if result.is_err() {
            self.state = PagerState::Done;
        }
        result
    }

    fn advance(&mut self) -> ServerResult<Option<Bytes>> {
        match self.state {
            PagerState::Done => Ok(None),
            PagerState::Opening => {
                self.state = PagerState::Paging;
                Ok(Some(Bytes::from_static(b"[")))
            }
            PagerState::Paging => {
                let batch = self.collection.since(self.cursor, self.batch_size)?;
                let Some(last) = batch.last() else {
                    self.state = PagerState::Done;
                    debug!(collection = self.collection.name(), count = self.sent, "list");
                    return Ok(Some(Bytes::from_static(b"]")));
                };
                self.cursor = last.sequence;

                let records = batch
                    .iter()
                    .map(|item| to_record(&self.service_url, item))
                    .collect::<ServerResult<Vec<_>>>()?;
                let chunk = encode_list_elements(&records, self.sent == 0)?;
                self.sent += records.len();
                Ok(Some(Bytes::from(chunk)))
            }
        }
    }

    /// Turns the pager into a response body stream.
    pub fn into_stream(mut self) -> impl Stream<Item = ServerResult<Bytes>> + Send + 'static {
        stream::iter(iter::from_fn(move || self.next_chunk().transpose()))
    }
}
