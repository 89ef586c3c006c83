//! Long-lived feed connections.
//!
//! A connection first replays the log from the client's cursor without
//! holding the collection lock. Once a read comes back empty it enters the
//! collection's write section, picks up anything recorded in the meantime
//! and registers its sink before leaving. From then on every change reaches
//! it through fan-out, so nothing falls between catch-up and streaming.

use crate::error::{ServerError, ServerResult};
use crate::handler::to_record;
use crate::sink::{ChannelReceiver, ChannelSink};
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use std::collections::VecDeque;
use std::sync::Arc;
use syncfeed_core::{ChangeItem, PublishedCollection, SubscriberId};
use syncfeed_protocol::{encode_feed_line, ChangeRecord, FeedTimeout};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why a feed response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The deadline passed.
    TimedOut,
    /// Single-shot mode: at least one change was written.
    FirstChange,
    /// The subscriber's queue overflowed; the client must reconnect.
    Overflowed,
    /// The server is shutting down or the subscription went away.
    Closed,
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Replaying stored changes after `cursor`.
    CatchingUp {
        /// Highest sequence fetched so far.
        cursor: u64,
    },
    /// Registered for live fan-out.
    Streaming {
        /// Highest sequence fetched so far.
        cursor: u64,
    },
    /// Finished.
    Completed(CompletionReason),
}

/// Something to write to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A change record.
    Change(ChangeRecord),
    /// The response is over.
    Completed(CompletionReason),
}

struct Subscription {
    id: SubscriberId,
    receiver: ChannelReceiver,
}

/// One open feed request.
pub struct FeedConnection {
    collection: Arc<PublishedCollection>,
    service_url: String,
    timeout: FeedTimeout,
    deadline: Option<Instant>,
    batch_size: usize,
    queue_capacity: usize,
    state: FeedState,
    pending: VecDeque<ChangeItem>,
    emitted: usize,
    subscription: Option<Subscription>,
    closing: watch::Receiver<bool>,
}

impl FeedConnection {
    pub(crate) fn new(
        collection: Arc<PublishedCollection>,
        service_url: String,
        since: u64,
        timeout: FeedTimeout,
        batch_size: usize,
        queue_capacity: usize,
        closing: watch::Receiver<bool>,
    ) -> Self {
        Self {
            collection,
            service_url,
            deadline: timeout
                .duration()
                .and_then(|d| Instant::now().checked_add(d)),
            timeout,
            batch_size: batch_size.max(1),
            queue_capacity,
            state: FeedState::CatchingUp { cursor: since },
            pending: VecDeque::new(),
            emitted: 0,
            subscription: None,
            closing,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Returns the number of changes emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Returns true while registered for live changes.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Produces the next event. After `Completed` it keeps returning the same
    /// completion.
    pub async fn next_event(&mut self) -> ServerResult<FeedEvent> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                self.emitted += 1;
                return Ok(FeedEvent::Change(to_record(&self.service_url, &item)?));
            }

            match self.state {
                FeedState::Completed(reason) => return Ok(FeedEvent::Completed(reason)),
                FeedState::CatchingUp { cursor } => {
                    if let Some(reason) = self.should_complete() {
                        self.complete(reason);
                        continue;
                    }
                    let batch = self.collection.since(cursor, self.batch_size)?;
                    match batch.last() {
                        Some(last) => {
                            self.state = FeedState::CatchingUp {
                                cursor: last.sequence,
                            };
                            self.pending.extend(batch);
                        }
                        None => self.handshake(cursor)?,
                    }
                }
                FeedState::Streaming { cursor } => {
                    if let Some(reason) = self.should_complete() {
                        self.complete(reason);
                        continue;
                    }
                    match self.wait_for_change().await {
                        Wait::Change(item) => {
                            if item.sequence > cursor {
                                self.state = FeedState::Streaming {
                                    cursor: item.sequence,
                                };
                                self.pending.push_back(item);
                            }
                        }
                        Wait::SinkGone { overflowed: true } => {
                            self.complete(CompletionReason::Overflowed)
                        }
                        Wait::SinkGone { overflowed: false } => {
                            self.complete(CompletionReason::Closed)
                        }
                        Wait::Deadline => self.complete(CompletionReason::TimedOut),
                        Wait::Closing => self.complete(CompletionReason::Closed),
                    }
                }
            }
        }
    }

    fn should_complete(&self) -> Option<CompletionReason> {
        if *self.closing.borrow() {
            return Some(CompletionReason::Closed);
        }
        if self.timeout.is_single_shot() && self.emitted > 0 {
            return Some(CompletionReason::FirstChange);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CompletionReason::TimedOut),
            _ => None,
        }
    }

    /// Switches from catch-up to streaming inside the write section.
    fn handshake(&mut self, cursor: u64) -> ServerResult<()> {
        let mut seq = self.collection.sequencer();
        let tail = seq.catch_up(cursor, self.batch_size)?;
        let next_cursor = tail.last().map(|i| i.sequence).unwrap_or(cursor);

        // Leave the section and keep catching up if the tail is large, or if a
        // single-shot request already has something to return.
        if tail.len() >= self.batch_size || (self.timeout.is_single_shot() && !tail.is_empty()) {
            drop(seq);
            self.state = FeedState::CatchingUp {
                cursor: next_cursor,
            };
            self.pending.extend(tail);
            return Ok(());
        }

        let (sink, receiver) = ChannelSink::channel(self.queue_capacity);
        let id = seq.register(Arc::new(sink));
        drop(seq);

        debug!(
            collection = self.collection.name(),
            subscriber = %id,
            cursor = next_cursor,
            "feed streaming"
        );
        self.subscription = Some(Subscription { id, receiver });
        self.state = FeedState::Streaming {
            cursor: next_cursor,
        };
        self.pending.extend(tail);
        Ok(())
    }

    async fn wait_for_change(&mut self) -> Wait {
        let deadline = self.deadline;
        let Some(subscription) = self.subscription.as_mut() else {
            return Wait::SinkGone { overflowed: false };
        };
        let sleep = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            item = subscription.receiver.recv() => match item {
                Some(item) => Wait::Change(item),
                None => Wait::SinkGone {
                    overflowed: subscription.receiver.overflowed(),
                },
            },
            _ = sleep => Wait::Deadline,
            _ = self.closing.wait_for(|closing| *closing) => Wait::Closing,
        }
    }

    fn complete(&mut self, reason: CompletionReason) {
        self.unsubscribe();
        if reason == CompletionReason::Overflowed {
            warn!(collection = self.collection.name(), emitted = self.emitted, "feed aborted: subscriber overflowed");
        } else {
            debug!(collection = self.collection.name(), ?reason, emitted = self.emitted, "feed completed");
        }
        self.state = FeedState::Completed(reason);
    }

    fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.collection.subscribers().unregister(subscription.id);
        }
    }

    /// Turns the connection into a newline-delimited JSON body.
    ///
    /// An overflow ends the stream with an error so the client sees an
    /// aborted response rather than a clean end.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, ServerError>> + Send + 'static {
        stream::unfold(Some(self), |connection| async move {
            let mut connection = connection?;
            match connection.next_event().await {
                Ok(FeedEvent::Change(record)) => match encode_feed_line(&record) {
                    Ok(line) => Some((Ok(Bytes::from(line)), Some(connection))),
                    Err(e) => Some((Err(e.into()), None)),
                },
                Ok(FeedEvent::Completed(CompletionReason::Overflowed)) => Some((
                    Err(ServerError::Internal("subscriber queue overflowed".into())),
                    None,
                )),
                Ok(FeedEvent::Completed(_)) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl Drop for FeedConnection {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

enum Wait {
    Change(ChangeItem),
    SinkGone { overflowed: bool },
    Deadline,
    Closing,
}
