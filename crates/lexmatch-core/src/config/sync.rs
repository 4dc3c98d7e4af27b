use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LexMatchError, Result};

use super::env::{override_with, read_env_u32, read_env_u64, read_env_usize};

const ENV_INCREMENTAL_INTERVAL_SECS: &str = "LEXMATCH_INCREMENTAL_INTERVAL_SECS";
const ENV_VERIFY_INTERVAL_SECS: &str = "LEXMATCH_VERIFY_INTERVAL_SECS";
const ENV_RETRY_BACKOFF_MIN_MS: &str = "LEXMATCH_RETRY_BACKOFF_MIN_MS";
const ENV_RETRY_BACKOFF_MAX_MS: &str = "LEXMATCH_RETRY_BACKOFF_MAX_MS";
const ENV_MAX_ATTEMPTS: &str = "LEXMATCH_SYNC_MAX_ATTEMPTS";
const ENV_RESYNC_BATCH_SIZE: &str = "LEXMATCH_RESYNC_BATCH_SIZE";
const ENV_FEED_BATCH_SIZE: &str = "LEXMATCH_FEED_BATCH_SIZE";
const ENV_FEED_POLL_MS: &str = "LEXMATCH_FEED_POLL_MS";
const ENV_VERIFY_SAMPLE_SIZE: &str = "LEXMATCH_VERIFY_SAMPLE_SIZE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub incremental_interval_secs: u64,
    pub verify_interval_secs: u64,
    pub retry_backoff_min_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Attempts per change event before it is dead-lettered.
    pub max_attempts: u32,
    pub resync_batch_size: usize,
    pub feed_batch_size: usize,
    /// Upper bound on how long the feed consumer sleeps without a wake-up.
    pub feed_poll_ms: u64,
    pub verify_sample_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            incremental_interval_secs: 300,
            verify_interval_secs: 900,
            retry_backoff_min_ms: 200,
            retry_backoff_max_ms: 30_000,
            max_attempts: 8,
            resync_batch_size: 100,
            feed_batch_size: 100,
            feed_poll_ms: 1_000,
            verify_sample_size: 20,
        }
    }
}

impl SyncConfig {
    pub(super) fn apply_env(&mut self) {
        override_with(
            &mut self.incremental_interval_secs,
            read_env_u64(ENV_INCREMENTAL_INTERVAL_SECS),
        );
        override_with(
            &mut self.verify_interval_secs,
            read_env_u64(ENV_VERIFY_INTERVAL_SECS),
        );
        override_with(
            &mut self.retry_backoff_min_ms,
            read_env_u64(ENV_RETRY_BACKOFF_MIN_MS),
        );
        override_with(
            &mut self.retry_backoff_max_ms,
            read_env_u64(ENV_RETRY_BACKOFF_MAX_MS),
        );
        override_with(&mut self.max_attempts, read_env_u32(ENV_MAX_ATTEMPTS));
        override_with(
            &mut self.resync_batch_size,
            read_env_usize(ENV_RESYNC_BATCH_SIZE),
        );
        override_with(&mut self.feed_batch_size, read_env_usize(ENV_FEED_BATCH_SIZE));
        override_with(&mut self.feed_poll_ms, read_env_u64(ENV_FEED_POLL_MS));
        override_with(
            &mut self.verify_sample_size,
            read_env_usize(ENV_VERIFY_SAMPLE_SIZE),
        );
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_backoff_min_ms > self.retry_backoff_max_ms {
            return Err(LexMatchError::Config(format!(
                "retry backoff min {}ms exceeds max {}ms",
                self.retry_backoff_min_ms, self.retry_backoff_max_ms
            )));
        }
        for (name, value) in [
            ("max_attempts", u64::from(self.max_attempts)),
            ("resync_batch_size", self.resync_batch_size as u64),
            ("feed_batch_size", self.feed_batch_size as u64),
            ("feed_poll_ms", self.feed_poll_ms),
            ("incremental_interval_secs", self.incremental_interval_secs),
            ("verify_interval_secs", self.verify_interval_secs),
        ] {
            if value == 0 {
                return Err(LexMatchError::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn incremental_interval(&self) -> Duration {
        Duration::from_secs(self.incremental_interval_secs)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_secs)
    }

    pub fn feed_poll(&self) -> Duration {
        Duration::from_millis(self.feed_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SyncConfig::default().validate().expect("valid");
    }

    #[test]
    fn inverted_backoff_bounds_are_rejected() {
        let config = SyncConfig {
            retry_backoff_min_ms: 5_000,
            retry_backoff_max_ms: 100,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = SyncConfig {
            resync_batch_size: 0,
            ..SyncConfig::default()
        };
        let err = config.validate().expect_err("zero batch");
        assert!(err.to_string().contains("resync_batch_size"));
    }
}
