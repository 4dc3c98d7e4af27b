use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::bounded;
use tempfile::tempdir;

use super::*;
use crate::error::LexMatchError;
use crate::models::{
    AvailabilitySlot, ChangeOp, Location, ProfileFilter, SearchFilter, Weekday,
};

fn open_store() -> (tempfile::TempDir, SqliteProfileStore) {
    let temp = tempdir().expect("tempdir");
    let store = SqliteProfileStore::open(temp.path().join("profiles.sqlite3")).expect("open");
    (temp, store)
}

fn lawyer(id: &str, specialisms: &[&str], city: &str) -> Profile {
    let mut profile = Profile::new(id);
    profile.specialisms = specialisms.iter().map(ToString::to_string).collect();
    profile.location = Location::city(city);
    profile.verified = true;
    profile
}

#[test]
fn upsert_stamps_updated_at_and_get_round_trips() {
    let (_temp, store) = open_store();
    let stored = store
        .upsert(lawyer("p-1", &["Immigration Law"], "New York"))
        .expect("upsert");
    assert!(stored.updated_at.is_some());

    let loaded = store.get("p-1").expect("get").expect("exists");
    assert_eq!(loaded, stored);
    assert!(store.get("missing").expect("get").is_none());
}

#[test]
fn upsert_rejects_invalid_profile_without_logging_a_change() {
    let (_temp, store) = open_store();
    let mut invalid = Profile::new("p-1");
    invalid.verified = true;
    let err = store.upsert(invalid).expect_err("no specialisms");
    assert!(matches!(err, LexMatchError::Validation(_)));
    assert_eq!(store.head_position().expect("head"), 0);
}

#[test]
fn every_write_appends_one_change_in_order() {
    let (_temp, store) = open_store();
    store.upsert(lawyer("p-1", &["tax"], "Austin")).expect("insert");
    store.upsert(lawyer("p-1", &["tax", "estate"], "Austin")).expect("update");
    assert!(store.purge("p-1").expect("purge"));
    assert!(!store.purge("p-1").expect("purge again"));

    let events = store.read_changes(0, 10).expect("read");
    let ops = events.iter().map(|event| event.op).collect::<Vec<_>>();
    assert_eq!(ops, vec![ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete]);
    assert!(events.windows(2).all(|pair| pair[0].position < pair[1].position));
    assert!(events[1].document.is_some());
    assert!(events[2].document.is_none());
    assert_eq!(store.head_position().expect("head"), events[2].position);
}

#[test]
fn find_filters_by_specialism_language_city_and_availability() {
    let (_temp, store) = open_store();
    let mut alpha = lawyer("alpha", &["Immigration Law"], "New York");
    alpha.languages.insert("Spanish".to_string());
    alpha.availability.slots.push(AvailabilitySlot {
        weekday: Weekday::Mon,
        start: "09:00".to_string(),
        end: "12:00".to_string(),
        active: true,
    });
    let mut beta = lawyer("beta", &["family law"], "new york");
    beta.practice_areas.insert("immigration law".to_string());
    let gamma = lawyer("gamma", &["tax"], "Boston");
    for profile in [alpha, beta, gamma] {
        store.upsert(profile).expect("upsert");
    }

    let by_area = ProfileFilter::from(SearchFilter {
        specialisms: vec!["immigration law".to_string()],
        ..SearchFilter::default()
    });
    let ids = store
        .find(&by_area, 0, 10)
        .expect("find")
        .into_iter()
        .map(|profile| profile.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["alpha", "beta"]);
    assert_eq!(store.count(&by_area).expect("count"), 2);

    let spanish_available = ProfileFilter::from(SearchFilter {
        language: Some("spanish".to_string()),
        require_available: true,
        ..SearchFilter::default()
    });
    assert_eq!(store.count(&spanish_available).expect("count"), 1);

    let new_york = ProfileFilter::from(SearchFilter {
        city: Some("NEW YORK".to_string()),
        ..SearchFilter::default()
    });
    assert_eq!(store.count(&new_york).expect("count"), 2);
}

#[test]
fn find_pages_by_id() {
    let (_temp, store) = open_store();
    for id in ["c", "a", "d", "b"] {
        store.upsert(lawyer(id, &["tax"], "Austin")).expect("upsert");
    }
    let page = store.find(&ProfileFilter::all(), 1, 2).expect("find");
    let ids = page.into_iter().map(|profile| profile.id).collect::<Vec<_>>();
    assert_eq!(ids, vec!["b", "c"]);
    assert!(store.find(&ProfileFilter::all(), 0, 0).expect("find").is_empty());
}

#[test]
fn find_after_continues_past_the_last_id_despite_purges() {
    let (_temp, store) = open_store();
    for id in ["a", "b", "c", "d", "e"] {
        store.upsert(lawyer(id, &["tax"], "Austin")).expect("upsert");
    }
    store.upsert(lawyer("f", &["family"], "Austin")).expect("upsert");
    let tax = ProfileFilter::from(SearchFilter {
        specialisms: vec!["tax".to_string()],
        ..SearchFilter::default()
    });

    let first = store.find_after(&tax, None, 2).expect("page");
    let last = first.last().map(|profile| profile.id.clone());
    assert_eq!(last.as_deref(), Some("b"));

    store.purge("a").expect("purge");
    let second = store.find_after(&tax, last.as_deref(), 2).expect("page");
    let ids = second.into_iter().map(|profile| profile.id).collect::<Vec<_>>();
    assert_eq!(ids, vec!["c", "d"]);

    let tail = store.find_after(&tax, Some("d"), 10).expect("page");
    let ids = tail.into_iter().map(|profile| profile.id).collect::<Vec<_>>();
    assert_eq!(ids, vec!["e"]);
    assert!(store.find_after(&tax, None, 0).expect("page").is_empty());
}

#[test]
fn updated_since_selects_recent_writes() {
    let (_temp, store) = open_store();
    store.upsert(lawyer("old", &["tax"], "Austin")).expect("upsert");
    std::thread::sleep(Duration::from_millis(5));
    let since = Utc::now();
    store.upsert(lawyer("new", &["tax"], "Austin")).expect("upsert");

    let recent = store
        .find(&ProfileFilter::updated_since(since), 0, 10)
        .expect("find");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, "new");
}

#[test]
fn reading_behind_pruned_window_fails_with_cursor_expired() {
    let (_temp, store) = open_store();
    for id in ["a", "b", "c", "d"] {
        store.upsert(lawyer(id, &["tax"], "Austin")).expect("upsert");
    }
    let removed = store.prune_change_log(1).expect("prune");
    assert_eq!(removed, 3);

    let err = store.read_changes(0, 10).expect_err("expired");
    assert!(matches!(
        err,
        LexMatchError::FeedCursorExpired {
            cursor: 0,
            retained_after: 3
        }
    ));
    let tail = store.read_changes(3, 10).expect("read from retained window");
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].profile_id, "d");
    assert_eq!(store.prune_change_log(1).expect("prune again"), 0);
}

#[test]
fn cursor_ahead_of_head_is_rejected() {
    let (_temp, store) = open_store();
    store.upsert(lawyer("a", &["tax"], "Austin")).expect("upsert");
    assert!(matches!(
        store.read_changes(42, 10),
        Err(LexMatchError::FeedCursorExpired { cursor: 42, .. })
    ));
}

#[test]
fn head_survives_pruning_everything() {
    let (_temp, store) = open_store();
    store.upsert(lawyer("a", &["tax"], "Austin")).expect("upsert");
    store.upsert(lawyer("b", &["tax"], "Austin")).expect("upsert");
    store.prune_change_log(0).expect("prune");
    assert_eq!(store.head_position().expect("head"), 2);
    assert!(store.read_changes(2, 10).expect("read").is_empty());
}

#[test]
fn change_feed_wakes_on_write_and_only_advances_on_ack() {
    let (_temp, store) = open_store();
    let store: Arc<dyn ProfileStore> = Arc::new(store);
    let (_shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let mut feed = ChangeFeed::open(Arc::clone(&store), 0, 10);
    assert_eq!(
        feed.wait(&shutdown_rx, Duration::from_millis(10)),
        FeedWait::TimedOut
    );

    store.upsert(lawyer("a", &["tax"], "Austin")).expect("upsert");
    assert_eq!(
        feed.wait(&shutdown_rx, Duration::from_secs(1)),
        FeedWait::Woken
    );

    let first = feed.next_batch().expect("batch");
    assert_eq!(first.len(), 1);
    let again = feed.next_batch().expect("batch");
    assert_eq!(again, first);

    feed.ack(first[0].position);
    assert!(feed.next_batch().expect("batch").is_empty());
    feed.ack(0);
    assert_eq!(feed.position(), first[0].position);
}

#[test]
fn change_feed_observes_shutdown() {
    let (_temp, store) = open_store();
    let feed = ChangeFeed::open(Arc::new(store), 0, 10);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    drop(shutdown_tx);
    assert_eq!(
        feed.wait(&shutdown_rx, Duration::from_secs(5)),
        FeedWait::Shutdown
    );
}

#[test]
fn store_state_persists_across_reopen() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("profiles.sqlite3");
    {
        let store = SqliteProfileStore::open(&path).expect("open");
        store.upsert(lawyer("a", &["tax"], "Austin")).expect("upsert");
    }
    let reopened = SqliteProfileStore::open(&path).expect("reopen");
    assert!(reopened.get("a").expect("get").is_some());
    assert_eq!(reopened.head_position().expect("head"), 1);
}
