use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

mod env;
mod index;
mod retrieval;
mod scoring;
mod sync;

pub use index::{
    DEFAULT_EMBEDDING_DIM, DEFAULT_QDRANT_COLLECTION, EmbedderKind, EmbeddingConfig,
    IndexBackend, IndexConfig,
};
pub use retrieval::RetrievalConfig;
pub use scoring::{ScoringConfig, ScoringWeights};
pub use sync::SyncConfig;

/// Runtime configuration for the matching core.
///
/// Sources are layered: defaults, then an optional TOML file, then
/// `LEXMATCH_*` environment variables. The result is validated once; a
/// configuration that fails validation never reaches a running component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub scoring: ScoringConfig,
    pub retrieval: RetrievalConfig,
    pub sync: SyncConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Parses a TOML document without applying environment overrides.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self) -> Result<()> {
        self.scoring.apply_env();
        self.retrieval.apply_env();
        self.sync.apply_env();
        self.index.apply_env()?;
        self.embedding.apply_env()
    }

    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        self.retrieval.validate()?;
        self.sync.validate()?;
        self.index.validate()?;
        self.embedding.validate()
    }
}
