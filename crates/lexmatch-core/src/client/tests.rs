use std::sync::Arc;

use tempfile::tempdir;

use super::*;
use crate::config::ScoringWeights;
use crate::embedding::HashEmbedder;
use crate::index::MemorySearchIndex;
use crate::index::testing::FaultyIndex;
use crate::models::{
    Availability, AvailabilitySlot, Location, MatchRequest, Rating, RetrievalSource, Urgency,
    Weekday,
};

const DIM: usize = 64;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.embedding.dim = DIM;
    config
}

fn open_core(root: &Path) -> MatchingCore {
    let core = MatchingCore::open(root, test_config()).expect("open");
    core.initialize().expect("init");
    core
}

fn faulty_core(root: &Path) -> (MatchingCore, Arc<FaultyIndex>) {
    let index = Arc::new(FaultyIndex::new());
    let core = MatchingCore::with_components(
        root,
        test_config(),
        index.clone(),
        Arc::new(HashEmbedder::new(DIM)),
    )
    .expect("open");
    (core, index)
}

fn slot(weekday: Weekday) -> AvailabilitySlot {
    AvailabilitySlot {
        weekday,
        start: "09:00".to_string(),
        end: "17:00".to_string(),
        active: true,
    }
}

fn lawyer(id: &str, specialism: &str, city: &str, bio: &str) -> Profile {
    let mut profile = Profile::new(id);
    profile.specialisms.insert(specialism.to_string());
    profile.location = Location::city(city);
    profile.bio = bio.to_string();
    profile.languages.insert("english".to_string());
    profile.verified = true;
    profile.availability = Availability {
        slots: vec![slot(Weekday::Mon), slot(Weekday::Thu)],
        accepts_urgent: true,
    };
    profile.rating = Rating {
        average: 4.6,
        count: 12,
    };
    profile.qualified_since = Some(2012);
    profile.case_count = 180;
    profile
}

fn seed_pool(core: &MatchingCore) {
    core.put_profile(lawyer(
        "ny-immigration",
        "immigration-law",
        "New York",
        "Asylum, visas and green card petitions",
    ))
    .expect("put");
    let others = [
        ("tx-tax", "tax-law", "Austin"),
        ("ca-family", "family-law", "San Diego"),
        ("il-employment", "employment-law", "Chicago"),
        ("wa-housing", "housing-law", "Seattle"),
    ];
    for (id, specialism, city) in others {
        let mut profile = lawyer(id, specialism, city, "General practice");
        profile.rating = Rating {
            average: 3.2,
            count: 5,
        };
        core.put_profile(profile).expect("put");
    }
}

#[test]
fn put_profile_fills_missing_embedding() {
    let temp = tempdir().expect("tempdir");
    let core = open_core(temp.path());
    let stored = core
        .put_profile(lawyer("p-1", "family-law", "Boston", "Custody disputes"))
        .expect("put");
    assert_eq!(stored.embedding.as_ref().map(Vec::len), Some(DIM));

    let loaded = core.get_profile("p-1").expect("get");
    assert_eq!(loaded.embedding, stored.embedding);
    assert!(matches!(
        core.get_profile("missing"),
        Err(LexMatchError::NotFound(_))
    ));
}

#[test]
fn find_matches_serves_from_index_after_sync() {
    let temp = tempdir().expect("tempdir");
    let core = open_core(temp.path());
    seed_pool(&core);
    core.drain_change_feed().expect("drain");

    let request = MatchRequest {
        specialisms: vec!["immigration-law".to_string()],
        urgency: Urgency::Critical,
        location: Some(Location::city("New York")),
        ..MatchRequest::default()
    };
    let result = core.find_matches(&request).expect("match");
    assert_eq!(result.served_from, RetrievalSource::Index);
    assert!(result.degraded.is_none());
    let first = result.matches.first().expect("a match");
    assert_eq!(first.profile_id, "ny-immigration");
    assert!(first.reason.contains("Excellent match"));
    assert!(first.reason.contains("immigration-law"));
    assert!(first.reason.contains("New York"));
}

#[test]
fn find_matches_for_text_uses_similarity() {
    let temp = tempdir().expect("tempdir");
    let core = open_core(temp.path());
    seed_pool(&core);
    core.trigger_full_resync().expect("resync");

    let result = core
        .find_matches_for_text("need help with an asylum visa", &MatchRequest::default())
        .expect("match");
    assert_eq!(result.served_from, RetrievalSource::Index);
    assert!(result.candidates_considered > 0);
    assert!(result.matches.len() <= core.config().scoring.max_matches);

    assert!(matches!(
        core.find_matches_for_text("  ", &MatchRequest::default()),
        Err(LexMatchError::Validation(_))
    ));
}

#[test]
fn index_outage_degrades_to_fallback() {
    let temp = tempdir().expect("tempdir");
    let (core, index) = faulty_core(temp.path());
    seed_pool(&core);
    core.trigger_full_resync().expect("resync");
    index.set_down(true);

    let request = MatchRequest {
        specialisms: vec!["immigration-law".to_string()],
        embedding: Some(HashEmbedder::new(DIM).embed("visa").expect("embed")),
        ..MatchRequest::default()
    };
    let result = core.find_matches(&request).expect("fallback result");
    assert_eq!(result.served_from, RetrievalSource::Fallback);
    assert!(
        result
            .degraded
            .as_deref()
            .is_some_and(|note| note.contains("index unavailable"))
    );
    assert_eq!(result.matches[0].profile_id, "ny-immigration");

    let logs = core
        .list_request_logs(10, Some("match.find"), Some("warning"))
        .expect("logs");
    assert_eq!(logs.len(), 1);
}

#[test]
fn malformed_request_is_rejected_and_logged() {
    let temp = tempdir().expect("tempdir");
    let core = open_core(temp.path());
    let request = MatchRequest {
        require_similarity: true,
        ..MatchRequest::default()
    };
    let err = core.find_matches(&request).expect_err("missing embedding");
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let logs = core
        .list_request_logs(10, Some("MATCH.FIND"), Some("error"))
        .expect("logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].error_code.as_deref(), Some("VALIDATION_FAILED"));
}

#[test]
fn sync_operations_are_logged_and_reflected_in_status() {
    let temp = tempdir().expect("tempdir");
    let core = open_core(temp.path());
    seed_pool(&core);

    assert!(!core.get_sync_status().expect("status").consistent);
    core.trigger_full_resync().expect("resync");
    core.run_incremental_sync().expect("incremental");
    let report = core.verify_consistency().expect("verify");
    assert!(report.consistent, "{:?}", report.discrepancies);

    let status = core.get_sync_status().expect("status");
    assert!(status.consistent);
    assert!(status.cursor.last_full_sync.is_some());
    assert!(status.cursor.last_incremental_sync.is_some());
    assert_eq!(status.feed_head, 5);

    let operations = core
        .list_request_logs(10, None, Some("ok"))
        .expect("logs")
        .into_iter()
        .map(|entry| entry.operation)
        .collect::<Vec<_>>();
    assert_eq!(operations, vec!["sync.verify", "sync.incremental", "sync.full"]);
    assert_eq!(core.list_verify_runs(5).expect("runs").len(), 1);
}

#[test]
fn purge_removes_profile_from_index_through_feed() {
    let temp = tempdir().expect("tempdir");
    let core = open_core(temp.path());
    seed_pool(&core);
    core.drain_change_feed().expect("drain");

    assert!(core.purge_profile("ny-immigration").expect("purge"));
    core.drain_change_feed().expect("drain");
    let result = core
        .find_matches(&MatchRequest {
            specialisms: vec!["immigration-law".to_string()],
            ..MatchRequest::default()
        })
        .expect("match");
    assert!(result.matches.is_empty());
    assert!(core.verify_consistency().expect("verify").consistent);
}

#[test]
fn invalid_configuration_is_rejected_at_open() {
    let temp = tempdir().expect("tempdir");
    let mut config = test_config();
    config.scoring.weights = ScoringWeights {
        specialism: 0.9,
        ..ScoringWeights::default()
    };
    let err = MatchingCore::open(temp.path(), config).expect_err("weights do not sum to 1");
    assert_eq!(err.code(), "INVALID_CONFIG");
}

#[test]
fn embedder_dimension_must_match_config() {
    let temp = tempdir().expect("tempdir");
    let err = MatchingCore::with_components(
        temp.path(),
        test_config(),
        Arc::new(MemorySearchIndex::new()),
        Arc::new(HashEmbedder::new(DIM * 2)),
    )
    .expect_err("dimension mismatch");
    assert!(matches!(err, LexMatchError::Config(_)));
}

#[test]
fn workers_keep_index_current_for_matching() {
    let temp = tempdir().expect("tempdir");
    let mut config = test_config();
    config.sync.feed_poll_ms = 20;
    let core = MatchingCore::open(temp.path(), config).expect("open");
    let workers = core.start_sync_workers().expect("start");

    seed_pool(&core);
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let status = core.get_sync_status().expect("status");
        if status.cursor.feed_position == Some(status.feed_head) && status.feed_head == 5 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "feed never caught up");
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    workers.shutdown();

    let result = core
        .find_matches(&MatchRequest {
            specialisms: vec!["tax-law".to_string()],
            ..MatchRequest::default()
        })
        .expect("match");
    assert_eq!(result.served_from, RetrievalSource::Index);
    assert_eq!(result.matches[0].profile_id, "tx-tax");
}
