use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, select};

use crate::error::Result;
use crate::models::ChangeEvent;

use super::{FeedSubscription, ProfileStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedWait {
    /// A write was committed since the last wait.
    Woken,
    TimedOut,
    Shutdown,
}

/// Cursor-tracking reader over a store's change log.
///
/// The position only moves through [`ChangeFeed::ack`], so a batch that is
/// read but never acknowledged is returned again by the next
/// [`ChangeFeed::next_batch`]. Dropping the feed unregisters its wake-up
/// channel.
pub struct ChangeFeed {
    store: Arc<dyn ProfileStore>,
    subscription: FeedSubscription,
    position: u64,
    batch_size: usize,
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscription", &self.subscription.id)
            .field("position", &self.position)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl ChangeFeed {
    /// Subscribes before the first read so no write between the two is missed.
    pub fn open(store: Arc<dyn ProfileStore>, from: u64, batch_size: usize) -> Self {
        let subscription = store.subscribe();
        Self {
            store,
            subscription,
            position: from,
            batch_size: batch_size.max(1),
        }
    }

    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    pub fn next_batch(&self) -> Result<Vec<ChangeEvent>> {
        self.store.read_changes(self.position, self.batch_size)
    }

    /// Advances the cursor. Positions at or behind the current one are ignored.
    pub fn ack(&mut self, position: u64) {
        self.position = self.position.max(position);
    }

    /// Blocks until a write is committed, `timeout` elapses, or `shutdown`
    /// fires. A disconnected shutdown channel counts as a shutdown signal.
    pub fn wait(&self, shutdown: &Receiver<()>, timeout: Duration) -> FeedWait {
        select! {
            recv(shutdown) -> _ => FeedWait::Shutdown,
            recv(self.subscription.wake) -> msg => match msg {
                Ok(()) => FeedWait::Woken,
                Err(_) => FeedWait::Shutdown,
            },
            default(timeout) => FeedWait::TimedOut,
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.store.unsubscribe(self.subscription.id);
    }
}
