use chrono::{Duration, Utc};
use crossbeam_channel::Receiver;
use tracing::info;

use crate::error::Result;
use crate::models::{IncrementalSyncReport, ProfileFilter};
use crate::state::SyncTimestamp;

use super::IndexSynchronizer;

/// Sweeps re-read this much before the stored watermark so writes committed
/// around the previous sweep start are not missed.
const WATERMARK_OVERLAP_SECS: i64 = 5;

impl IndexSynchronizer {
    /// Re-indexes profiles modified since the last sweep. The first sweep
    /// covers every profile. The watermark advances to this sweep's start time
    /// only when the sweep completes.
    pub fn incremental_sync(&self, shutdown: &Receiver<()>) -> Result<IncrementalSyncReport> {
        let started_at = Utc::now();
        let previous_watermark = self.state.get_timestamp(SyncTimestamp::IncrementalWatermark)?;
        let filter = match previous_watermark {
            Some(watermark) => {
                ProfileFilter::updated_since(watermark - Duration::seconds(WATERMARK_OVERLAP_SECS))
            }
            None => ProfileFilter::all(),
        };

        let mut retries = 0u32;
        let (batches, reindexed, interrupted) =
            self.reindex_matching(&filter, shutdown, &mut retries)?;

        let watermark = if interrupted {
            previous_watermark.unwrap_or(started_at)
        } else {
            self.state
                .set_timestamp(SyncTimestamp::IncrementalWatermark, started_at)?;
            self.state
                .set_timestamp(SyncTimestamp::LastIncrementalSync, Utc::now())?;
            started_at
        };

        info!(
            batches,
            reindexed,
            retries,
            interrupted,
            watermark = %watermark.to_rfc3339(),
            "incremental sync finished"
        );
        Ok(IncrementalSyncReport {
            started_at,
            previous_watermark,
            watermark,
            reindexed,
            batches,
            retries,
            interrupted,
        })
    }
}
