use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::Profile;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOp {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown change op: {other}")),
        }
    }
}

/// One entry of the profile store's change feed. `position` is strictly
/// increasing and is what the sync cursor records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub position: u64,
    pub op: ChangeOp,
    pub profile_id: String,
    #[serde(default)]
    pub document: Option<Profile>,
    pub recorded_at: DateTime<Utc>,
}

/// Lifecycle of a change event inside the feed consumer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Pending,
    Applying,
    Retrying,
    Acknowledged,
    DeadLettered,
}

impl EventPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Retrying => "retrying",
            Self::Acknowledged => "acknowledged",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Terminal phases advance the feed cursor.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Acknowledged | Self::DeadLettered)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SyncCursor {
    pub feed_position: Option<u64>,
    pub last_full_sync: Option<DateTime<Utc>>,
    pub last_incremental_sync: Option<DateTime<Utc>>,
    pub incremental_watermark: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    CountMismatch { store: u64, index: u64 },
    MissingDocument { profile_id: String },
    StaleDocument { profile_id: String },
    IndexUnavailable { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub store_count: u64,
    pub index_count: Option<u64>,
    pub sampled: usize,
    pub consistent: bool,
    pub discrepancies: Vec<Discrepancy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FullResyncReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub batches: usize,
    pub indexed: usize,
    pub retries: u32,
    /// Stopped by shutdown before every page was indexed.
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncrementalSyncReport {
    pub started_at: DateTime<Utc>,
    pub previous_watermark: Option<DateTime<Utc>>,
    pub watermark: DateTime<Utc>,
    pub reindexed: usize,
    pub batches: usize,
    pub retries: u32,
    /// The watermark is only persisted when this is `false`.
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FeedReport {
    pub fetched: usize,
    pub acknowledged: usize,
    pub dead_lettered: usize,
    pub retries: u32,
    pub resynced: bool,
    pub interrupted: bool,
    pub cursor: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: i64,
    pub position: u64,
    pub profile_id: String,
    pub op: ChangeOp,
    pub error: String,
    pub attempts: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub cursor: SyncCursor,
    pub feed_head: u64,
    /// Result of the most recent verifier run; `false` until one has run.
    pub consistent: bool,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub discrepancies: Vec<Discrepancy>,
    pub dead_letters: Vec<DeadLetter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_op_round_trips_through_str() {
        for op in [ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete] {
            assert_eq!(op.as_str().parse::<ChangeOp>().expect("parse"), op);
        }
        assert!("upsert".parse::<ChangeOp>().is_err());
    }

    #[test]
    fn discrepancy_serializes_with_kind_tag() {
        let value = serde_json::to_value(Discrepancy::CountMismatch { store: 3, index: 2 })
            .expect("serialize");
        assert_eq!(value["kind"], "count_mismatch");
        assert_eq!(value["store"], 3);
    }

    #[test]
    fn only_acknowledged_and_dead_lettered_are_terminal() {
        assert!(EventPhase::Acknowledged.is_terminal());
        assert!(EventPhase::DeadLettered.is_terminal());
        assert!(!EventPhase::Retrying.is_terminal());
        assert!(!EventPhase::Applying.is_terminal());
        assert!(!EventPhase::Pending.is_terminal());
    }
}
