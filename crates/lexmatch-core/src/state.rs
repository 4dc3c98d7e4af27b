use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::db::{
    bool_to_i64, harden_sqlite_permissions, i64_to_u32_saturating, i64_to_u64_saturating,
    open_connection, parse_optional_rfc3339, parse_required_rfc3339, u64_to_i64_saturating,
    usize_to_i64_saturating,
};
use crate::error::{LexMatchError, Result};
use crate::models::{ChangeEvent, ChangeOp, DeadLetter, Discrepancy, SyncCursor, VerifyReport};

pub const FEED_WORKER: &str = "change_feed";

const KEY_LAST_FULL_SYNC: &str = "last_full_sync";
const KEY_LAST_INCREMENTAL_SYNC: &str = "last_incremental_sync";
const KEY_INCREMENTAL_WATERMARK: &str = "incremental_watermark";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTimestamp {
    LastFullSync,
    LastIncrementalSync,
    IncrementalWatermark,
}

impl SyncTimestamp {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::LastFullSync => KEY_LAST_FULL_SYNC,
            Self::LastIncrementalSync => KEY_LAST_INCREMENTAL_SYNC,
            Self::IncrementalWatermark => KEY_INCREMENTAL_WATERMARK,
        }
    }
}

/// Durable synchronizer state: the feed cursor, sweep timestamps, dead
/// letters and verifier history. Lives in its own database so the profile
/// store never depends on sync health.
#[derive(Clone)]
pub struct SyncStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SyncStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateStore").finish_non_exhaustive()
    }
}

impl SyncStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = open_connection(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
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

    fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS sync_checkpoint (
                    worker_name TEXT PRIMARY KEY,
                    last_position INTEGER NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS system_kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS dead_letter (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    position INTEGER NOT NULL,
                    profile_id TEXT NOT NULL,
                    op TEXT NOT NULL,
                    error TEXT NOT NULL,
                    attempts INTEGER NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS verify_runs (
                    run_id TEXT PRIMARY KEY,
                    started_at TEXT NOT NULL,
                    finished_at TEXT NOT NULL,
                    consistent INTEGER NOT NULL,
                    store_count INTEGER NOT NULL,
                    index_count INTEGER,
                    sampled INTEGER NOT NULL,
                    discrepancies_json TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_verify_runs_finished_at
                ON verify_runs(finished_at DESC);
                ",
            )?;
            Ok(())
        })
    }

    pub fn get_checkpoint(&self, worker_name: &str) -> Result<Option<u64>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT last_position FROM sync_checkpoint WHERE worker_name = ?1",
                    params![worker_name],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(value.map(i64_to_u64_saturating))
        })
    }

    pub fn set_checkpoint(&self, worker_name: &str, position: u64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r"
                INSERT INTO sync_checkpoint(worker_name, last_position, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(worker_name) DO UPDATE SET
                  last_position=excluded.last_position,
                  updated_at=excluded.updated_at
                ",
                params![
                    worker_name,
                    u64_to_i64_saturating(position),
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_timestamp(&self, which: SyncTimestamp) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM system_kv WHERE key = ?1",
                    params![which.key()],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(parse_optional_rfc3339(value.as_deref()))
        })
    }

    pub fn set_timestamp(&self, which: SyncTimestamp, value: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r"
                INSERT INTO system_kv(key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                  value = excluded.value,
                  updated_at = excluded.updated_at
                ",
                params![which.key(), value.to_rfc3339(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn load_cursor(&self) -> Result<SyncCursor> {
        Ok(SyncCursor {
            feed_position: self.get_checkpoint(FEED_WORKER)?,
            last_full_sync: self.get_timestamp(SyncTimestamp::LastFullSync)?,
            last_incremental_sync: self.get_timestamp(SyncTimestamp::LastIncrementalSync)?,
            incremental_watermark: self.get_timestamp(SyncTimestamp::IncrementalWatermark)?,
        })
    }

    pub fn record_dead_letter(
        &self,
        event: &ChangeEvent,
        error: &str,
        attempts: u32,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                r"
                INSERT INTO dead_letter(position, profile_id, op, error, attempts, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
                params![
                    u64_to_i64_saturating(event.position),
                    event.profile_id,
                    event.op.as_str(),
                    error,
                    i64::from(attempts),
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT id, position, profile_id, op, error, attempts, created_at
                FROM dead_letter
                ORDER BY id ASC
                LIMIT ?1
                ",
            )?;
            let rows =
                stmt.query_map(params![usize_to_i64_saturating(limit)], dead_letter_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Removes the given dead letters, or all of them when `ids` is empty.
    pub fn clear_dead_letters(&self, ids: &[i64]) -> Result<u64> {
        self.with_conn(|conn| {
            if ids.is_empty() {
                return Ok(conn.execute("DELETE FROM dead_letter", [])? as u64);
            }
            let mut removed = 0u64;
            let mut stmt = conn.prepare("DELETE FROM dead_letter WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id])? as u64;
            }
            Ok(removed)
        })
    }

    pub fn record_verify_run(&self, report: &VerifyReport) -> Result<()> {
        let discrepancies_json = serde_json::to_string(&report.discrepancies)?;
        self.with_conn(|conn| {
            conn.execute(
                r"
                INSERT OR REPLACE INTO verify_runs(
                    run_id, started_at, finished_at, consistent, store_count,
                    index_count, sampled, discrepancies_json
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
                params![
                    report.run_id,
                    report.started_at.to_rfc3339(),
                    report.finished_at.to_rfc3339(),
                    bool_to_i64(report.consistent),
                    u64_to_i64_saturating(report.store_count),
                    report.index_count.map(u64_to_i64_saturating),
                    usize_to_i64_saturating(report.sampled),
                    discrepancies_json
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_verify_runs(&self, limit: usize) -> Result<Vec<VerifyReport>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r"
                SELECT run_id, started_at, finished_at, consistent, store_count,
                       index_count, sampled, discrepancies_json
                FROM verify_runs
                ORDER BY finished_at DESC, run_id DESC
                LIMIT ?1
                ",
            )?;
            let rows = stmt.query_map(
                params![usize_to_i64_saturating(limit)],
                verify_report_from_row,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn latest_verify_run(&self) -> Result<Option<VerifyReport>> {
        Ok(self.list_verify_runs(1)?.into_iter().next())
    }
}

fn dead_letter_from_row(row: &Row<'_>) -> rusqlite::Result<DeadLetter> {
    let op_raw = row.get::<_, String>(3)?;
    let op = op_raw.parse::<ChangeOp>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, err.into())
    })?;
    Ok(DeadLetter {
        id: row.get(0)?,
        position: i64_to_u64_saturating(row.get::<_, i64>(1)?),
        profile_id: row.get(2)?,
        op,
        error: row.get(4)?,
        attempts: i64_to_u32_saturating(row.get::<_, i64>(5)?),
        created_at: row.get(6)?,
    })
}

fn verify_report_from_row(row: &Row<'_>) -> rusqlite::Result<VerifyReport> {
    let started_raw = row.get::<_, String>(1)?;
    let finished_raw = row.get::<_, String>(2)?;
    let discrepancies_raw = row.get::<_, String>(7)?;
    let discrepancies = serde_json::from_str::<Vec<Discrepancy>>(&discrepancies_raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(err)))?;
    Ok(VerifyReport {
        run_id: row.get(0)?,
        started_at: parse_required_rfc3339(1, &started_raw)?,
        finished_at: parse_required_rfc3339(2, &finished_raw)?,
        consistent: row.get::<_, i64>(3)? != 0,
        store_count: i64_to_u64_saturating(row.get::<_, i64>(4)?),
        index_count: row.get::<_, Option<i64>>(5)?.map(i64_to_u64_saturating),
        sampled: usize::try_from(row.get::<_, i64>(6)?).unwrap_or(0),
        discrepancies,
    })
}
