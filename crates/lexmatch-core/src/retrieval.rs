use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::error::{LexMatchError, Result};
use crate::index::SearchIndex;
use crate::models::{
    Candidate, MatchRequest, ProfileFilter, RetrievalSource, SearchFilter, SearchQuery,
};
use crate::projection::Project;
use crate::store::ProfileStore;

/// Store page size while collecting fallback candidates.
const FALLBACK_PAGE_SIZE: usize = 200;
/// Upper bound on candidates the fallback path hands to the scorer.
const FALLBACK_MAX_CANDIDATES: usize = 2_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub candidates: Vec<Candidate>,
    pub source: RetrievalSource,
    /// Set when the answer did not come from the index as planned.
    pub degraded: Option<String>,
}

/// Fetches an unordered candidate set for a match request.
///
/// The index is queried first. Any index failure, including a timeout,
/// falls back to the profile store with the same structured filters and no
/// similarity. Only a store failure on the fallback path is returned as an error.
#[derive(Clone)]
pub struct CandidateRetriever {
    index: Arc<dyn SearchIndex>,
    store: Arc<dyn ProfileStore>,
    config: RetrievalConfig,
    embedding_dim: usize,
}

impl std::fmt::Debug for CandidateRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateRetriever")
            .field("index", &self.index.backend())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CandidateRetriever {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        store: Arc<dyn ProfileStore>,
        config: RetrievalConfig,
        embedding_dim: usize,
    ) -> Self {
        Self {
            index,
            store,
            config,
            embedding_dim,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Rejects requests that cannot be answered as asked.
    pub fn validate_request(&self, request: &MatchRequest) -> Result<()> {
        match &request.embedding {
            Some(embedding) if embedding.len() != self.embedding_dim => {
                Err(LexMatchError::Validation(format!(
                    "request embedding has {} dimensions, expected {}",
                    embedding.len(),
                    self.embedding_dim
                )))
            }
            Some(embedding) if embedding.iter().any(|value| !value.is_finite()) => Err(
                LexMatchError::Validation("request embedding contains non-finite values".to_string()),
            ),
            None if request.require_similarity => Err(LexMatchError::Validation(
                "similarity search requested without an embedding".to_string(),
            )),
            _ => Ok(()),
        }?;
        if let Some(rate) = request.max_hourly_rate
            && !(rate.is_finite() && rate >= 0.0)
        {
            return Err(LexMatchError::Validation(format!(
                "max_hourly_rate must be a non-negative number, got {rate}"
            )));
        }
        Ok(())
    }

    /// Hard filters for a request. Location only influences scoring.
    pub fn filter_for(&self, request: &MatchRequest, reference_year: i32) -> SearchFilter {
        SearchFilter {
            specialisms: request.specialisms.clone(),
            language: request
                .language
                .as_deref()
                .map(str::trim)
                .filter(|language| !language.is_empty())
                .map(ToString::to_string),
            city: None,
            country: request
                .jurisdiction
                .as_deref()
                .map(str::trim)
                .filter(|country| !country.is_empty())
                .map(ToString::to_string),
            verified: self.config.require_verified.then_some(true),
            active: Some(true),
            require_available: request.require_available,
            min_hourly_rate: None,
            max_hourly_rate: request.max_hourly_rate,
            qualified_no_later_than: request.min_years_experience.map(|years| {
                reference_year.saturating_sub(i32::try_from(years).unwrap_or(i32::MAX))
            }),
        }
    }

    pub fn retrieve(
        &self,
        request: &MatchRequest,
        max_matches: usize,
        reference_year: i32,
        deadline: Instant,
    ) -> Result<Retrieval> {
        self.validate_request(request)?;
        let filter = self.filter_for(request, reference_year);
        let limit = max_matches
            .max(1)
            .saturating_mul(self.config.overfetch_multiplier.max(1));

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return self.fallback(&filter, "deadline exhausted before index query", deadline);
        }

        let query = SearchQuery {
            filter: filter.clone(),
            vector: request.embedding.clone(),
            limit,
            timeout: Some(self.config.index_timeout().min(remaining)),
        };
        let started = Instant::now();
        match self.search_index(&query) {
            Ok(candidates) => {
                debug!(
                    backend = self.index.backend(),
                    candidates = candidates.len(),
                    limit,
                    similarity = query.vector.is_some(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "retrieved candidates from index"
                );
                Ok(Retrieval {
                    candidates,
                    source: RetrievalSource::Index,
                    degraded: None,
                })
            }
            Err(err) => {
                warn!(
                    backend = self.index.backend(),
                    code = err.code(),
                    error = %err,
                    "index query failed; falling back to profile store"
                );
                self.fallback(&filter, &format!("index unavailable: {err}"), deadline)
            }
        }
    }

    fn search_index(&self, query: &SearchQuery) -> Result<Vec<Candidate>> {
        let started = Instant::now();
        let hits = self.index.search(query)?;
        // Backends without a native per-call timeout still honour the budget.
        if let Some(timeout) = query.timeout
            && started.elapsed() > timeout
        {
            return Err(LexMatchError::Timeout(format!(
                "index search exceeded {}ms",
                timeout.as_millis()
            )));
        }
        Ok(hits
            .into_iter()
            .map(|hit| Candidate {
                doc: hit.doc,
                similarity: hit.similarity,
            })
            .collect())
    }

    /// Structured-filter scan of the profile store, stopping early at the
    /// deadline or the candidate cap.
    fn fallback(&self, filter: &SearchFilter, reason: &str, deadline: Instant) -> Result<Retrieval> {
        let store_filter = ProfileFilter::from(filter.clone());
        let mut candidates = Vec::new();
        let mut last_id: Option<String> = None;
        let mut truncated = false;
        loop {
            let page = self
                .store
                .find_after(&store_filter, last_id.as_deref(), FALLBACK_PAGE_SIZE)?;
            let page_len = page.len();
            last_id = page.last().map(|profile| profile.id.clone());
            for profile in page {
                let doc = profile.project(self.embedding_dim);
                if filter.matches(&doc) {
                    candidates.push(Candidate {
                        doc,
                        similarity: None,
                    });
                }
            }
            if page_len < FALLBACK_PAGE_SIZE {
                break;
            }
            if candidates.len() >= FALLBACK_MAX_CANDIDATES || Instant::now() >= deadline {
                truncated = true;
                break;
            }
        }
        candidates.truncate(FALLBACK_MAX_CANDIDATES);

        let degraded = if truncated {
            format!("served from fallback, {reason}; candidate scan truncated")
        } else {
            format!("served from fallback, {reason}")
        };
        debug!(candidates = candidates.len(), truncated, "retrieved candidates from profile store");
        Ok(Retrieval {
            candidates,
            source: RetrievalSource::Fallback,
            degraded: Some(degraded),
        })
    }
}

/// Deadline for a request, falling back to the configured default budget.
pub fn request_deadline(request: &MatchRequest, config: &RetrievalConfig, started: Instant) -> Instant {
    let budget_ms = request
        .deadline_ms
        .filter(|ms| *ms > 0)
        .unwrap_or(config.default_deadline_ms);
    started + Duration::from_millis(budget_ms)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::index::testing::{Fault, FaultyIndex};
    use crate::models::{AvailabilitySlot, Location, Profile, Weekday};
    use crate::store::SqliteProfileStore;

    const DIM: usize = 3;
    const YEAR: i32 = 2026;

    struct Fixture {
        _temp: tempfile::TempDir,
        store: Arc<SqliteProfileStore>,
        index: Arc<FaultyIndex>,
        retriever: CandidateRetriever,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(
            SqliteProfileStore::open(temp.path().join("profiles.sqlite3")).expect("open"),
        );
        let index = Arc::new(FaultyIndex::new());
        let retriever = CandidateRetriever::new(
            index.clone(),
            store.clone(),
            RetrievalConfig::default(),
            DIM,
        );
        Fixture {
            _temp: temp,
            store,
            index,
            retriever,
        }
    }

    fn lawyer(id: &str, specialism: &str, embedding: [f32; 3]) -> Profile {
        let mut profile = Profile::new(id);
        profile.specialisms.insert(specialism.to_string());
        profile.location = Location {
            city: Some("Chicago".to_string()),
            postal_code: None,
            country: Some("US".to_string()),
        };
        profile.languages.insert("english".to_string());
        profile.verified = true;
        profile.embedding = Some(embedding.to_vec());
        profile.availability.slots = vec![AvailabilitySlot {
            weekday: Weekday::Tue,
            start: "09:00".to_string(),
            end: "17:00".to_string(),
            active: true,
        }];
        profile
    }

    fn seed(f: &Fixture, profiles: Vec<Profile>) {
        for profile in profiles {
            let stored = f.store.upsert(profile).expect("upsert");
            f.index
                .inner()
                .index(&stored.project(DIM))
                .expect("index");
        }
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn ids(retrieval: &Retrieval) -> Vec<&str> {
        let mut ids = retrieval
            .candidates
            .iter()
            .map(|candidate| candidate.doc.id.as_str())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn vector_query_overfetches_from_the_index() {
        let f = fixture();
        seed(
            &f,
            (0..30)
                .map(|i| lawyer(&format!("p-{i:02}"), "tax-law", [1.0, i as f32 / 30.0, 0.0]))
                .collect(),
        );
        let request = MatchRequest {
            specialisms: vec!["tax-law".to_string()],
            embedding: Some(vec![1.0, 0.0, 0.0]),
            ..MatchRequest::default()
        };

        let retrieval = f.retriever.retrieve(&request, 5, YEAR, later()).expect("retrieve");
        assert_eq!(retrieval.source, RetrievalSource::Index);
        assert_eq!(retrieval.candidates.len(), 20);
        assert!(retrieval.degraded.is_none());
        assert!(retrieval.candidates.iter().all(|c| c.similarity.is_some()));
    }

    #[test]
    fn profiles_without_embeddings_still_match_vector_requests() {
        let f = fixture();
        let mut unembedded = lawyer("p-plain", "tax-law", [0.0, 0.0, 0.0]);
        unembedded.embedding = None;
        seed(
            &f,
            vec![lawyer("p-embedded", "tax-law", [1.0, 0.0, 0.0]), unembedded],
        );
        let request = MatchRequest {
            specialisms: vec!["tax-law".to_string()],
            embedding: Some(vec![1.0, 0.0, 0.0]),
            ..MatchRequest::default()
        };

        let retrieval = f.retriever.retrieve(&request, 5, YEAR, later()).expect("retrieve");
        assert_eq!(retrieval.source, RetrievalSource::Index);
        assert_eq!(retrieval.candidates[0].doc.id, "p-embedded");
        assert!(retrieval.candidates[0].similarity.is_some());
        assert_eq!(retrieval.candidates[1].doc.id, "p-plain");
        assert!(retrieval.candidates[1].similarity.is_none());
    }

    #[test]
    fn hard_filters_exclude_unverified_inactive_and_other_languages() {
        let f = fixture();
        let mut unverified = lawyer("p-unverified", "tax-law", [1.0, 0.0, 0.0]);
        unverified.verified = false;
        let mut inactive = lawyer("p-inactive", "tax-law", [1.0, 0.0, 0.0]);
        inactive.active = false;
        let mut spanish = lawyer("p-spanish", "tax-law", [1.0, 0.0, 0.0]);
        spanish.languages.insert("Spanish".to_string());
        let mut elsewhere = lawyer("p-boston", "tax-law", [1.0, 0.0, 0.0]);
        elsewhere.location.city = Some("Boston".to_string());
        seed(
            &f,
            vec![
                lawyer("p-english", "tax-law", [1.0, 0.0, 0.0]),
                unverified,
                inactive,
                spanish,
                elsewhere,
            ],
        );
        let request = MatchRequest {
            specialisms: vec!["Tax Law".to_string(), "tax-law".to_string()],
            language: Some("spanish".to_string()),
            location: Some(Location::city("Chicago")),
            ..MatchRequest::default()
        };

        let retrieval = f.retriever.retrieve(&request, 5, YEAR, later()).expect("retrieve");
        assert_eq!(ids(&retrieval), vec!["p-spanish"]);

        let request = MatchRequest {
            specialisms: vec!["tax-law".to_string()],
            location: Some(Location::city("Chicago")),
            ..MatchRequest::default()
        };
        let retrieval = f.retriever.retrieve(&request, 5, YEAR, later()).expect("retrieve");
        assert_eq!(ids(&retrieval), vec!["p-boston", "p-english", "p-spanish"]);
    }

    #[test]
    fn index_outage_falls_back_to_store_filters() {
        let f = fixture();
        seed(
            &f,
            vec![
                lawyer("p-1", "family-law", [1.0, 0.0, 0.0]),
                lawyer("p-2", "tax-law", [0.0, 1.0, 0.0]),
            ],
        );
        f.index.set_down(true);
        let request = MatchRequest {
            specialisms: vec!["family-law".to_string()],
            embedding: Some(vec![1.0, 0.0, 0.0]),
            ..MatchRequest::default()
        };

        let retrieval = f.retriever.retrieve(&request, 5, YEAR, later()).expect("fallback");
        assert_eq!(retrieval.source, RetrievalSource::Fallback);
        assert_eq!(ids(&retrieval), vec!["p-1"]);
        assert!(retrieval.candidates[0].similarity.is_none());
        let degraded = retrieval.degraded.expect("degraded note");
        assert!(degraded.contains("index unavailable"));
    }

    #[test]
    fn index_timeout_falls_back() {
        let f = fixture();
        seed(&f, vec![lawyer("p-1", "family-law", [1.0, 0.0, 0.0])]);
        f.index.set_fault(Fault::Timeout);
        f.index.set_down(true);

        let retrieval = f
            .retriever
            .retrieve(&MatchRequest::default(), 5, YEAR, later())
            .expect("fallback");
        assert_eq!(retrieval.source, RetrievalSource::Fallback);
        assert_eq!(ids(&retrieval), vec!["p-1"]);
    }

    #[test]
    fn exhausted_deadline_skips_the_index() {
        let f = fixture();
        seed(&f, vec![lawyer("p-1", "family-law", [1.0, 0.0, 0.0])]);

        let retrieval = f
            .retriever
            .retrieve(&MatchRequest::default(), 5, YEAR, Instant::now())
            .expect("fallback");
        assert_eq!(retrieval.source, RetrievalSource::Fallback);
        assert!(
            retrieval
                .degraded
                .is_some_and(|note| note.contains("deadline"))
        );
    }

    #[test]
    fn experience_and_rate_limits_become_range_filters() {
        let f = fixture();
        let mut senior = lawyer("p-senior", "tax-law", [1.0, 0.0, 0.0]);
        senior.qualified_since = Some(2006);
        senior.hourly_rate = Some(180.0);
        let mut junior = lawyer("p-junior", "tax-law", [1.0, 0.0, 0.0]);
        junior.qualified_since = Some(2022);
        junior.hourly_rate = Some(90.0);
        let mut pricey = lawyer("p-pricey", "tax-law", [1.0, 0.0, 0.0]);
        pricey.qualified_since = Some(2000);
        pricey.hourly_rate = Some(450.0);
        seed(&f, vec![senior, junior, pricey]);

        let request = MatchRequest {
            min_years_experience: Some(10),
            max_hourly_rate: Some(200.0),
            ..MatchRequest::default()
        };
        let retrieval = f.retriever.retrieve(&request, 5, YEAR, later()).expect("retrieve");
        assert_eq!(ids(&retrieval), vec!["p-senior"]);

        f.index.set_down(true);
        let retrieval = f.retriever.retrieve(&request, 5, YEAR, later()).expect("fallback");
        assert_eq!(ids(&retrieval), vec!["p-senior"]);
    }

    #[test]
    fn malformed_requests_are_rejected() {
        let f = fixture();
        let wrong_dim = MatchRequest {
            embedding: Some(vec![1.0, 0.0]),
            ..MatchRequest::default()
        };
        let err = f
            .retriever
            .retrieve(&wrong_dim, 5, YEAR, later())
            .expect_err("dimension mismatch");
        assert!(matches!(err, LexMatchError::Validation(_)));

        let missing = MatchRequest {
            require_similarity: true,
            ..MatchRequest::default()
        };
        assert!(f.retriever.retrieve(&missing, 5, YEAR, later()).is_err());
    }

    #[test]
    fn jurisdiction_maps_to_country_filter() {
        let f = fixture();
        let mut canadian = lawyer("p-ca", "tax-law", [1.0, 0.0, 0.0]);
        canadian.location.country = Some("CA".to_string());
        seed(&f, vec![lawyer("p-us", "tax-law", [1.0, 0.0, 0.0]), canadian]);

        let request = MatchRequest {
            jurisdiction: Some("ca".to_string()),
            ..MatchRequest::default()
        };
        let retrieval = f.retriever.retrieve(&request, 5, YEAR, later()).expect("retrieve");
        assert_eq!(ids(&retrieval), vec!["p-ca"]);
    }

    #[test]
    fn request_deadline_prefers_request_budget() {
        let config = RetrievalConfig::default();
        let started = Instant::now();
        let request = MatchRequest {
            deadline_ms: Some(250),
            ..MatchRequest::default()
        };
        assert_eq!(
            request_deadline(&request, &config, started) - started,
            Duration::from_millis(250)
        );
        assert_eq!(
            request_deadline(&MatchRequest::default(), &config, started) - started,
            Duration::from_millis(config.default_deadline_ms)
        );
    }
}
