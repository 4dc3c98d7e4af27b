use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LexMatchError, Result};

use super::env::{override_with, read_env_u64, read_env_usize, read_non_empty_env};

const ENV_INDEX_BACKEND: &str = "LEXMATCH_INDEX_BACKEND";
const ENV_QDRANT_URL: &str = "LEXMATCH_QDRANT_URL";
const ENV_QDRANT_API_KEY: &str = "LEXMATCH_QDRANT_API_KEY";
const ENV_QDRANT_COLLECTION: &str = "LEXMATCH_QDRANT_COLLECTION";
const ENV_QDRANT_TIMEOUT_MS: &str = "LEXMATCH_QDRANT_TIMEOUT_MS";

const ENV_EMBEDDER: &str = "LEXMATCH_EMBEDDER";
const ENV_EMBEDDING_DIM: &str = "LEXMATCH_EMBEDDING_DIM";
const ENV_EMBEDDER_ENDPOINT: &str = "LEXMATCH_EMBEDDER_ENDPOINT";
const ENV_EMBEDDER_MODEL: &str = "LEXMATCH_EMBEDDER_MODEL";
const ENV_EMBEDDER_API_KEY: &str = "LEXMATCH_EMBEDDER_API_KEY";
const ENV_EMBEDDER_TIMEOUT_MS: &str = "LEXMATCH_EMBEDDER_TIMEOUT_MS";

pub const DEFAULT_QDRANT_COLLECTION: &str = "lexmatch_profiles";
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Memory,
    Qdrant,
}

impl IndexBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Qdrant => "qdrant",
        }
    }
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexBackend {
    type Err = LexMatchError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "qdrant" => Ok(Self::Qdrant),
            other => Err(LexMatchError::Config(format!(
                "invalid {ENV_INDEX_BACKEND}: {other} (expected memory|qdrant)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub collection: String,
    pub timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            qdrant_url: None,
            qdrant_api_key: None,
            collection: DEFAULT_QDRANT_COLLECTION.to_string(),
            timeout_ms: 2_000,
        }
    }
}

impl IndexConfig {
    pub(super) fn apply_env(&mut self) -> Result<()> {
        if let Some(raw) = read_non_empty_env(ENV_INDEX_BACKEND) {
            self.backend = raw.parse()?;
        }
        if let Some(url) = read_non_empty_env(ENV_QDRANT_URL) {
            self.qdrant_url = Some(url);
            // A configured URL selects Qdrant unless the backend was pinned explicitly.
            if read_non_empty_env(ENV_INDEX_BACKEND).is_none() {
                self.backend = IndexBackend::Qdrant;
            }
        }
        if let Some(key) = read_non_empty_env(ENV_QDRANT_API_KEY) {
            self.qdrant_api_key = Some(key);
        }
        override_with(
            &mut self.collection,
            read_non_empty_env(ENV_QDRANT_COLLECTION),
        );
        override_with(&mut self.timeout_ms, read_env_u64(ENV_QDRANT_TIMEOUT_MS));
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend == IndexBackend::Qdrant && self.qdrant_url.is_none() {
            return Err(LexMatchError::Config(format!(
                "qdrant backend requires {ENV_QDRANT_URL}"
            )));
        }
        if self.collection.trim().is_empty() {
            return Err(LexMatchError::Config(
                "index collection name must not be empty".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(LexMatchError::Config(
                "index timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    #[default]
    Hash,
    Http,
}

impl FromStr for EmbedderKind {
    type Err = LexMatchError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "http" => Ok(Self::Http),
            other => Err(LexMatchError::Config(format!(
                "invalid {ENV_EMBEDDER}: {other} (expected hash|http)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    pub kind: EmbedderKind,
    /// Vector length shared by profile embeddings, request embeddings and the index.
    pub dim: usize,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::Hash,
            dim: DEFAULT_EMBEDDING_DIM,
            endpoint: None,
            model: None,
            api_key: None,
            timeout_ms: 5_000,
        }
    }
}

impl EmbeddingConfig {
    pub(super) fn apply_env(&mut self) -> Result<()> {
        if let Some(raw) = read_non_empty_env(ENV_EMBEDDER) {
            self.kind = raw.parse()?;
        }
        override_with(&mut self.dim, read_env_usize(ENV_EMBEDDING_DIM));
        if let Some(endpoint) = read_non_empty_env(ENV_EMBEDDER_ENDPOINT) {
            self.endpoint = Some(endpoint);
        }
        if let Some(model) = read_non_empty_env(ENV_EMBEDDER_MODEL) {
            self.model = Some(model);
        }
        if let Some(key) = read_non_empty_env(ENV_EMBEDDER_API_KEY) {
            self.api_key = Some(key);
        }
        override_with(&mut self.timeout_ms, read_env_u64(ENV_EMBEDDER_TIMEOUT_MS));
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(LexMatchError::Config(
                "embedding dim must be at least 1".to_string(),
            ));
        }
        if self.kind == EmbedderKind::Http && (self.endpoint.is_none() || self.model.is_none()) {
            return Err(LexMatchError::Config(format!(
                "http embedder requires {ENV_EMBEDDER_ENDPOINT} and {ENV_EMBEDDER_MODEL}"
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
