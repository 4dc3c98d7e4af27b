use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::embedding::{Embedder, build_embedder};
use crate::error::{LexMatchError, Result};
use crate::index::{SearchIndex, build_index};
use crate::models::Profile;
use crate::retrieval::CandidateRetriever;
use crate::scoring::Scorer;
use crate::state::SyncStateStore;
use crate::store::{ProfileStore, SqliteProfileStore};
use crate::sync::IndexSynchronizer;

mod match_service;
mod request_log_service;
mod sync_service;

const PROFILE_DB_FILE: &str = "profiles.sqlite3";
const SYNC_STATE_DB_FILE: &str = "sync_state.sqlite3";
const LOG_DIR: &str = "logs";
const REQUEST_LOG_FILE: &str = "requests.jsonl";

/// Composition root of the matching core.
///
/// Owns the profile store, the search index, the synchronizer and the query
/// path. Clones share every component, so one instance can serve concurrent
/// match requests while sync workers run in the background.
#[derive(Clone)]
pub struct MatchingCore {
    root: PathBuf,
    config: AppConfig,
    store: Arc<SqliteProfileStore>,
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn Embedder>,
    sync: IndexSynchronizer,
    retriever: CandidateRetriever,
}

impl std::fmt::Debug for MatchingCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingCore")
            .field("root", &self.root)
            .field("index", &self.index.backend())
            .field("embedder", &self.embedder.provider())
            .finish_non_exhaustive()
    }
}

impl MatchingCore {
    /// Opens the core under `root` with the index and embedder named in `config`.
    pub fn open(root: impl Into<PathBuf>, config: AppConfig) -> Result<Self> {
        config.validate()?;
        let index = build_index(&config.index, config.embedding.dim)?;
        let embedder = build_embedder(&config.embedding)?;
        Self::with_components(root, config, index, embedder)
    }

    /// Opens the core with caller-supplied index and embedder.
    pub fn with_components(
        root: impl Into<PathBuf>,
        config: AppConfig,
        index: Arc<dyn SearchIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;
        let dim = config.embedding.dim;
        if embedder.dim() != dim {
            return Err(LexMatchError::Config(format!(
                "embedder {} produces {} dimensions, expected {dim}",
                embedder.provider(),
                embedder.dim()
            )));
        }

        let root = root.into();
        fs::create_dir_all(root.join(LOG_DIR))?;
        let store = Arc::new(SqliteProfileStore::open(root.join(PROFILE_DB_FILE))?);
        let state = SyncStateStore::open(root.join(SYNC_STATE_DB_FILE))?;
        let sync = IndexSynchronizer::new(
            store.clone(),
            Arc::clone(&index),
            state,
            config.sync.clone(),
            dim,
        );
        let retriever = CandidateRetriever::new(
            Arc::clone(&index),
            store.clone(),
            config.retrieval.clone(),
            dim,
        );

        Ok(Self {
            root,
            config,
            store,
            index,
            embedder,
            sync,
            retriever,
        })
    }

    /// Prepares the search index. An unreachable index is logged, not fatal:
    /// matching falls back to the profile store until it comes back.
    pub fn initialize(&self) -> Result<()> {
        match self.index.ensure_ready() {
            Ok(()) => {
                info!(backend = self.index.backend(), "search index ready");
                Ok(())
            }
            Err(err) if err.is_transient() => {
                warn!(
                    backend = self.index.backend(),
                    error = %err,
                    "search index unavailable at startup; serving from fallback"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn synchronizer(&self) -> &IndexSynchronizer {
        &self.sync
    }

    fn request_log_path(&self) -> PathBuf {
        self.root.join(LOG_DIR).join(REQUEST_LOG_FILE)
    }

    fn scorer(&self) -> Scorer {
        Scorer::new(self.config.scoring.clone())
    }

    /// Stores a profile. A missing embedding is computed from the profile
    /// text; an embedder failure stores the profile without one.
    pub fn put_profile(&self, mut profile: Profile) -> Result<Profile> {
        if profile.embedding.is_none() {
            let text = profile_text(&profile);
            if !text.trim().is_empty() {
                match self.embedder.embed(&text) {
                    Ok(vector) => profile.embedding = Some(vector),
                    Err(err) => warn!(
                        profile_id = %profile.id,
                        provider = self.embedder.provider(),
                        error = %err,
                        "profile embedding failed; storing without vector"
                    ),
                }
            }
        }
        self.store.upsert(profile)
    }

    pub fn get_profile(&self, id: &str) -> Result<Profile> {
        self.store
            .get(id)?
            .ok_or_else(|| LexMatchError::NotFound(format!("profile {id}")))
    }

    pub fn purge_profile(&self, id: &str) -> Result<bool> {
        self.store.purge(id)
    }
}

/// Text a profile is embedded from.
fn profile_text(profile: &Profile) -> String {
    let mut parts = Vec::new();
    parts.extend(profile.specialisms.iter().map(String::as_str));
    parts.extend(profile.practice_areas.iter().map(String::as_str));
    for field in [&profile.role, &profile.employer, &profile.bio] {
        if !field.trim().is_empty() {
            parts.push(field.as_str());
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests;
