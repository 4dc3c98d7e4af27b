use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LexMatchError, Result};

use super::env::{override_with, read_env_bool, read_env_u64, read_env_usize};

const ENV_OVERFETCH_MULTIPLIER: &str = "LEXMATCH_OVERFETCH_MULTIPLIER";
const ENV_INDEX_TIMEOUT_MS: &str = "LEXMATCH_INDEX_TIMEOUT_MS";
const ENV_DEFAULT_DEADLINE_MS: &str = "LEXMATCH_DEFAULT_DEADLINE_MS";
const ENV_REQUIRE_VERIFIED: &str = "LEXMATCH_REQUIRE_VERIFIED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Candidates requested from the index per final result slot.
    pub overfetch_multiplier: usize,
    pub index_timeout_ms: u64,
    /// Latency budget for requests that do not carry their own.
    pub default_deadline_ms: u64,
    pub require_verified: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            overfetch_multiplier: 4,
            index_timeout_ms: 1_500,
            default_deadline_ms: 3_000,
            require_verified: true,
        }
    }
}

impl RetrievalConfig {
    pub(super) fn apply_env(&mut self) {
        override_with(
            &mut self.overfetch_multiplier,
            read_env_usize(ENV_OVERFETCH_MULTIPLIER),
        );
        override_with(
            &mut self.index_timeout_ms,
            read_env_u64(ENV_INDEX_TIMEOUT_MS),
        );
        override_with(
            &mut self.default_deadline_ms,
            read_env_u64(ENV_DEFAULT_DEADLINE_MS),
        );
        override_with(&mut self.require_verified, read_env_bool(ENV_REQUIRE_VERIFIED));
    }

    pub fn validate(&self) -> Result<()> {
        if self.overfetch_multiplier == 0 {
            return Err(LexMatchError::Config(
                "overfetch_multiplier must be at least 1".to_string(),
            ));
        }
        if self.index_timeout_ms == 0 || self.default_deadline_ms == 0 {
            return Err(LexMatchError::Config(
                "retrieval timeouts must be at least 1ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }
}
