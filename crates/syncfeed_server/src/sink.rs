//! Channel-backed change sink for feed connections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use syncfeed_core::{ChangeItem, ChangeSink, Delivery};
use tokio::sync::mpsc::{self, error::TrySendError};

/// A [`ChangeSink`] feeding a bounded tokio channel.
///
/// Offering never blocks. A full queue marks the sink overflowed so the
/// receiving connection can tell an overflow apart from an ordinary close.
pub struct ChannelSink {
    sender: mpsc::Sender<ChangeItem>,
    overflowed: Arc<AtomicBool>,
}

/// Receiving half of a [`ChannelSink`].
pub struct ChannelReceiver {
    receiver: mpsc::Receiver<ChangeItem>,
    overflowed: Arc<AtomicBool>,
}

impl ChannelSink {
    /// Creates a sink with a queue of `capacity` items.
    pub fn channel(capacity: usize) -> (ChannelSink, ChannelReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let overflowed = Arc::new(AtomicBool::new(false));
        (
            ChannelSink {
                sender,
                overflowed: Arc::clone(&overflowed),
            },
            ChannelReceiver {
                receiver,
                overflowed,
            },
        )
    }
}

impl ChangeSink for ChannelSink {
    fn offer(&self, item: &ChangeItem) -> Delivery {
        match self.sender.try_send(item.clone()) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                self.overflowed.store(true, Ordering::SeqCst);
                Delivery::Overflowed
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

impl ChannelReceiver {
    /// Waits for the next queued change. `None` once the sink is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<ChangeItem> {
        self.receiver.recv().await
    }

    /// Returns true if the sink was dropped for overflowing.
    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::SeqCst)
    }
}
