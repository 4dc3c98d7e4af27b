use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{SubsecRound, Utc};
use crossbeam_channel::{Sender, TrySendError, bounded};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use tracing::debug;

use crate::db::{
    bool_to_i64, harden_sqlite_permissions, i64_to_u64_saturating, open_connection,
    parse_required_rfc3339, u64_to_i64_saturating, usize_to_i64_saturating,
};
use crate::error::{LexMatchError, Result};
use crate::models::{ChangeEvent, ChangeOp, Profile, ProfileFilter, normalize_place};
use crate::projection::normalize_tag;

use super::{FeedSubscription, ProfileStore};

const TAG_KIND_AREA: &str = "area";
const TAG_KIND_LANGUAGE: &str = "language";
const META_PRUNED_THROUGH: &str = "pruned_through";

/// SQLite-backed profile store with an in-database change log.
#[derive(Clone)]
pub struct SqliteProfileStore {
    conn: Arc<Mutex<Connection>>,
    subscribers: Arc<Mutex<HashMap<u64, Sender<()>>>>,
    next_subscriber: Arc<AtomicU64>,
}

impl std::fmt::Debug for SqliteProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteProfileStore").finish_non_exhaustive()
    }
}

impl SqliteProfileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = open_connection(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber: Arc::new(AtomicU64::new(1)),
        };
        store.migrate()?;
        harden_sqlite_permissions(path)?;
        Ok(store)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LexMatchError::mutex_poisoned("sqlite"))?;
        f(&conn)
    }

    fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| LexMatchError::mutex_poisoned("sqlite"))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        drop(conn);
        Ok(value)
    }

    fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS profiles (
                    id TEXT PRIMARY KEY,
                    document_json TEXT NOT NULL,
                    city_norm TEXT,
                    country_norm TEXT,
                    verified INTEGER NOT NULL,
                    active INTEGER NOT NULL,
                    has_active_slot INTEGER NOT NULL,
                    hourly_rate REAL,
                    qualified_since INTEGER,
                    updated_at_us INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS profile_tags (
                    profile_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    tag TEXT NOT NULL,
                    PRIMARY KEY (profile_id, kind, tag),
                    FOREIGN KEY (profile_id) REFERENCES profiles(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS change_log (
                    position INTEGER PRIMARY KEY AUTOINCREMENT,
                    op TEXT NOT NULL,
                    profile_id TEXT NOT NULL,
                    document_json TEXT,
                    recorded_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS feed_meta (
                    key TEXT PRIMARY KEY,
                    value INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_profiles_updated_at ON profiles(updated_at_us);
                CREATE INDEX IF NOT EXISTS idx_profile_tags_tag ON profile_tags(kind, tag);
                ",
            )?;
            Ok(())
        })
    }

    fn query_documents(&self, sql: &str, values: &[Value]) -> Result<Vec<Profile>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(serde_json::from_str::<Profile>(&row?)?);
            }
            Ok(out)
        })
    }

    fn notify_subscribers(&self) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|_, wake| !matches!(wake.try_send(()), Err(TrySendError::Disconnected(()))));
    }
}

impl ProfileStore for SqliteProfileStore {
    fn get(&self, id: &str) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    "SELECT document_json FROM profiles WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            raw.map(|raw| serde_json::from_str::<Profile>(&raw).map_err(LexMatchError::from))
                .transpose()
        })
    }

    fn find(&self, filter: &ProfileFilter, skip: usize, limit: usize) -> Result<Vec<Profile>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (where_sql, mut values) = filter_clause(filter);
        values.push(Value::Integer(usize_to_i64_saturating(limit)));
        values.push(Value::Integer(usize_to_i64_saturating(skip)));
        let sql = format!(
            "SELECT p.document_json FROM profiles p{where_sql} ORDER BY p.id ASC LIMIT ? OFFSET ?"
        );
        self.query_documents(&sql, &values)
    }

    fn find_after(
        &self,
        filter: &ProfileFilter,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Profile>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (mut where_sql, mut values) = filter_clause(filter);
        if let Some(after_id) = after_id {
            where_sql.push_str(if where_sql.is_empty() { " WHERE " } else { " AND " });
            where_sql.push_str("p.id > ?");
            values.push(Value::Text(after_id.to_string()));
        }
        values.push(Value::Integer(usize_to_i64_saturating(limit)));
        let sql = format!(
            "SELECT p.document_json FROM profiles p{where_sql} ORDER BY p.id ASC LIMIT ?"
        );
        self.query_documents(&sql, &values)
    }

    fn count(&self, filter: &ProfileFilter) -> Result<u64> {
        let (where_sql, values) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM profiles p{where_sql}");
        self.with_conn(|conn| {
            let count = conn.query_row(&sql, params_from_iter(values.iter()), |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(i64_to_u64_saturating(count))
        })
    }

    fn upsert(&self, mut profile: Profile) -> Result<Profile> {
        profile.validate()?;
        let stored = self.with_tx(|tx| {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM profiles WHERE id = ?1",
                    params![profile.id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            let op = if exists {
                ChangeOp::Update
            } else {
                ChangeOp::Insert
            };

            let now = Utc::now().trunc_subsecs(6);
            profile.updated_at = Some(now);
            let document_json = serde_json::to_string(&profile)?;

            tx.execute(
                r"
                INSERT INTO profiles(
                    id, document_json, city_norm, country_norm, verified, active,
                    has_active_slot, hourly_rate, qualified_since, updated_at_us
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(id) DO UPDATE SET
                  document_json = excluded.document_json,
                  city_norm = excluded.city_norm,
                  country_norm = excluded.country_norm,
                  verified = excluded.verified,
                  active = excluded.active,
                  has_active_slot = excluded.has_active_slot,
                  hourly_rate = excluded.hourly_rate,
                  qualified_since = excluded.qualified_since,
                  updated_at_us = excluded.updated_at_us
                ",
                params![
                    profile.id,
                    document_json,
                    profile.location.city.as_deref().map(normalize_place),
                    profile.location.country.as_deref().map(normalize_place),
                    bool_to_i64(profile.verified),
                    bool_to_i64(profile.active),
                    bool_to_i64(profile.availability.has_active_slot()),
                    profile.hourly_rate,
                    profile.qualified_since,
                    now.timestamp_micros(),
                ],
            )?;
            replace_tags(tx, &profile)?;
            append_change(tx, op, &profile.id, Some(&document_json))?;
            Ok(profile)
        })?;
        self.notify_subscribers();
        Ok(stored)
    }

    fn purge(&self, id: &str) -> Result<bool> {
        let removed = self.with_tx(|tx| {
            let removed = tx.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
            if removed > 0 {
                append_change(tx, ChangeOp::Delete, id, None)?;
            }
            Ok(removed > 0)
        })?;
        if removed {
            self.notify_subscribers();
        }
        Ok(removed)
    }

    fn read_changes(&self, after: u64, limit: usize) -> Result<Vec<ChangeEvent>> {
        self.with_conn(|conn| {
            let pruned_through = read_pruned_through(conn)?;
            let head = read_head(conn, pruned_through)?;
            if after < pruned_through || after > head {
                return Err(LexMatchError::FeedCursorExpired {
                    cursor: after,
                    retained_after: pruned_through,
                });
            }
            if limit == 0 {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(
                r"
                SELECT position, op, profile_id, document_json, recorded_at
                FROM change_log
                WHERE position > ?1
                ORDER BY position ASC
                LIMIT ?2
                ",
            )?;
            let rows = stmt.query_map(
                params![u64_to_i64_saturating(after), usize_to_i64_saturating(limit)],
                change_event_from_row,
            )?;
            let mut events = Vec::new();
            for event in rows {
                events.push(event?);
            }
            Ok(events)
        })
    }

    fn head_position(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let pruned_through = read_pruned_through(conn)?;
            read_head(conn, pruned_through)
        })
    }

    fn subscribe(&self) -> FeedSubscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (wake_tx, wake_rx) = bounded(1);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.insert(id, wake_tx);
        }
        FeedSubscription { id, wake: wake_rx }
    }

    fn unsubscribe(&self, subscription_id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&subscription_id);
        }
    }

    fn prune_change_log(&self, keep_latest: usize) -> Result<u64> {
        self.with_tx(|tx| {
            let pruned_through = read_pruned_through(tx)?;
            let head = read_head(tx, pruned_through)?;
            let threshold = head.saturating_sub(keep_latest as u64);
            if threshold <= pruned_through {
                return Ok(0);
            }
            let removed = tx.execute(
                "DELETE FROM change_log WHERE position <= ?1",
                params![u64_to_i64_saturating(threshold)],
            )?;
            tx.execute(
                r"
                INSERT INTO feed_meta(key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                ",
                params![META_PRUNED_THROUGH, u64_to_i64_saturating(threshold)],
            )?;
            debug!(removed, threshold, "pruned change log");
            Ok(removed as u64)
        })
    }
}

/// Builds the `WHERE` clause shared by `find` and `count`, with positional parameters.
fn filter_clause(filter: &ProfileFilter) -> (String, Vec<Value>) {
    let search = &filter.search;
    let mut clauses = Vec::<String>::new();
    let mut values = Vec::<Value>::new();

    let areas = search.area_tags();
    if !areas.is_empty() {
        let placeholders = vec!["?"; areas.len()].join(", ");
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM profile_tags t WHERE t.profile_id = p.id AND t.kind = '{TAG_KIND_AREA}' AND t.tag IN ({placeholders}))"
        ));
        values.extend(areas.into_iter().map(Value::Text));
    }
    if let Some(language) = search.normalized_language() {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM profile_tags t WHERE t.profile_id = p.id AND t.kind = '{TAG_KIND_LANGUAGE}' AND t.tag = ?)"
        ));
        values.push(Value::Text(language));
    }
    if let Some(city) = &search.city {
        clauses.push("p.city_norm = ?".to_string());
        values.push(Value::Text(normalize_place(city)));
    }
    if let Some(country) = &search.country {
        clauses.push("p.country_norm = ?".to_string());
        values.push(Value::Text(normalize_place(country)));
    }
    if let Some(verified) = search.verified {
        clauses.push("p.verified = ?".to_string());
        values.push(Value::Integer(bool_to_i64(verified)));
    }
    if let Some(active) = search.active {
        clauses.push("p.active = ?".to_string());
        values.push(Value::Integer(bool_to_i64(active)));
    }
    if search.require_available {
        clauses.push("p.has_active_slot = 1".to_string());
    }
    if let Some(min) = search.min_hourly_rate {
        clauses.push("p.hourly_rate >= ?".to_string());
        values.push(Value::Real(min));
    }
    if let Some(max) = search.max_hourly_rate {
        clauses.push("p.hourly_rate <= ?".to_string());
        values.push(Value::Real(max));
    }
    if let Some(year) = search.qualified_no_later_than {
        clauses.push("p.qualified_since <= ?".to_string());
        values.push(Value::Integer(i64::from(year)));
    }
    if let Some(since) = filter.updated_since {
        clauses.push("p.updated_at_us >= ?".to_string());
        values.push(Value::Integer(since.timestamp_micros()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn replace_tags(tx: &Transaction<'_>, profile: &Profile) -> Result<()> {
    tx.execute(
        "DELETE FROM profile_tags WHERE profile_id = ?1",
        params![profile.id],
    )?;
    let areas = profile
        .specialisms
        .iter()
        .chain(profile.practice_areas.iter())
        .filter_map(|tag| normalize_tag(tag))
        .collect::<BTreeSet<_>>();
    let languages = profile
        .languages
        .iter()
        .filter_map(|tag| normalize_tag(tag))
        .collect::<BTreeSet<_>>();

    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO profile_tags(profile_id, kind, tag) VALUES (?1, ?2, ?3)",
    )?;
    for tag in &areas {
        stmt.execute(params![profile.id, TAG_KIND_AREA, tag])?;
    }
    for tag in &languages {
        stmt.execute(params![profile.id, TAG_KIND_LANGUAGE, tag])?;
    }
    Ok(())
}

fn append_change(
    tx: &Transaction<'_>,
    op: ChangeOp,
    profile_id: &str,
    document_json: Option<&str>,
) -> Result<()> {
    tx.execute(
        r"
        INSERT INTO change_log(op, profile_id, document_json, recorded_at)
        VALUES (?1, ?2, ?3, ?4)
        ",
        params![op.as_str(), profile_id, document_json, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn read_pruned_through(conn: &Connection) -> Result<u64> {
    let value = conn
        .query_row(
            "SELECT value FROM feed_meta WHERE key = ?1",
            params![META_PRUNED_THROUGH],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(value.map_or(0, i64_to_u64_saturating))
}

fn read_head(conn: &Connection, pruned_through: u64) -> Result<u64> {
    let max = conn.query_row("SELECT MAX(position) FROM change_log", [], |row| {
        row.get::<_, Option<i64>>(0)
    })?;
    Ok(max.map_or(pruned_through, i64_to_u64_saturating))
}

fn change_event_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeEvent> {
    let op_raw = row.get::<_, String>(1)?;
    let op = op_raw.parse::<ChangeOp>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, err.into())
    })?;
    let document = row
        .get::<_, Option<String>>(3)?
        .map(|raw| serde_json::from_str::<Profile>(&raw))
        .transpose()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err)))?;
    let recorded_raw = row.get::<_, String>(4)?;
    Ok(ChangeEvent {
        position: i64_to_u64_saturating(row.get::<_, i64>(0)?),
        op,
        profile_id: row.get(2)?,
        document,
        recorded_at: parse_required_rfc3339(4, &recorded_raw)?,
    })
}
