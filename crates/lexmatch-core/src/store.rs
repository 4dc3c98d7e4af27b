use crossbeam_channel::Receiver;

use crate::error::Result;
use crate::models::{ChangeEvent, Profile, ProfileFilter};

mod feed;
mod sqlite;

#[cfg(test)]
mod tests;

pub use feed::{ChangeFeed, FeedWait};
pub use sqlite::SqliteProfileStore;

/// Wake-up registration on a store's change log. Receives a unit message
/// after each committed write; the message carries no data and consumers
/// re-read the log from their own cursor.
#[derive(Debug)]
pub struct FeedSubscription {
    pub id: u64,
    pub wake: Receiver<()>,
}

/// System of record for professional profiles.
///
/// Every successful write appends exactly one change-log entry inside the
/// same transaction as the write, so the log is a gap-free ordering of all
/// mutations.
pub trait ProfileStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Profile>>;

    /// Profiles matching `filter`, ordered by id.
    fn find(&self, filter: &ProfileFilter, skip: usize, limit: usize) -> Result<Vec<Profile>>;

    /// Profiles matching `filter` with an id strictly greater than
    /// `after_id`, ordered by id. Pages stay stable while other writers
    /// insert or purge rows between calls.
    fn find_after(
        &self,
        filter: &ProfileFilter,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Profile>>;

    fn count(&self, filter: &ProfileFilter) -> Result<u64>;

    /// Validates and stores `profile`, stamping `updated_at`. Returns the stored profile.
    fn upsert(&self, profile: Profile) -> Result<Profile>;

    /// Hard-deletes a profile. Returns `false` when it did not exist.
    fn purge(&self, id: &str) -> Result<bool>;

    /// Change-log entries with `position > after`, oldest first.
    ///
    /// Fails with `FeedCursorExpired` when `after` falls outside the retained window.
    fn read_changes(&self, after: u64, limit: usize) -> Result<Vec<ChangeEvent>>;

    /// Position of the newest change-log entry, `0` when nothing was ever written.
    fn head_position(&self) -> Result<u64>;

    fn subscribe(&self) -> FeedSubscription;

    fn unsubscribe(&self, subscription_id: u64);

    /// Drops all but the newest `keep_latest` change-log entries. Returns the number removed.
    fn prune_change_log(&self, keep_latest: usize) -> Result<u64>;
}
