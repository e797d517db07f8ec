//! Upload ledger trait and SQLite implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{
    HistoryStatus, LedgerSummary, NewHistoryItem, ReadFailure, SyncRunStats, UploadHistoryItem,
    UploadLedgerEntry, HISTORY_RETENTION,
};

const LAST_SUCCESSFUL_SYNC_KEY: &str = "last_successful_sync";

/// Durable record of uploaded items plus the bounded upload history.
///
/// Object-safe so it can be shared as `Arc<dyn UploadLedger>` between the
/// batcher, the sync service and the command handlers. Every write is either
/// an idempotent upsert or an append, so concurrent readers never observe a
/// torn state.
#[async_trait]
pub trait UploadLedger: Send + Sync {
    /// Record items as uploaded. Keys already present are left untouched.
    ///
    /// Returns the number of keys that were newly inserted.
    async fn mark_uploaded(&self, keys: &[String]) -> Result<u64, StateError>;

    /// Whether `key` has been recorded as uploaded.
    async fn contains(&self, key: &str) -> Result<bool, StateError>;

    /// Snapshot of every uploaded key, loaded once per pass for O(1) lookups.
    async fn uploaded_keys(&self) -> Result<HashSet<String>, StateError>;

    /// Look up the ledger entry for `key`.
    async fn entry(&self, key: &str) -> Result<Option<UploadLedgerEntry>, StateError>;

    /// Prepend a history entry, evicting the oldest beyond the retention bound.
    async fn append_history(&self, item: &NewHistoryItem) -> Result<i64, StateError>;

    /// Append several history entries in insertion order within one transaction.
    async fn append_history_batch(&self, items: &[NewHistoryItem]) -> Result<(), StateError>;

    /// Most-recent-first history, at most `limit` entries.
    async fn history(&self, limit: usize) -> Result<Vec<UploadHistoryItem>, StateError>;

    /// Count a local read failure for `key` and return the new attempt count.
    async fn record_read_failure(&self, key: &str, error: &str) -> Result<u32, StateError>;

    /// Keys whose read failures reached `max_attempts`.
    async fn exhausted_keys(&self, max_attempts: u32) -> Result<HashSet<String>, StateError>;

    /// All items with recorded read failures.
    async fn read_failures(&self) -> Result<Vec<ReadFailure>, StateError>;

    /// Forget all read failures. Returns the number of cleared items.
    async fn reset_read_failures(&self) -> Result<u64, StateError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self) -> Result<i64, StateError>;

    /// Complete a sync run. When `successful`, also stamps the last successful sync time.
    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
        successful: bool,
    ) -> Result<(), StateError>;

    async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>, StateError>;

    async fn summary(&self) -> Result<LedgerSummary, StateError>;
}

/// SQLite implementation of the upload ledger.
pub struct SqliteLedger {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteLedger {
    /// Open or create a ledger at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // WAL keeps readers off the writer's lock; NORMAL is still crash-safe with WAL.
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory ledger (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Poisoned(e.to_string()))
    }
}

/// Run `f` inside a transaction, rolling back if it fails.
fn with_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, StateError>,
) -> Result<T, StateError> {
    conn.execute("BEGIN IMMEDIATE TRANSACTION", [])
        .map_err(StateError::query)?;

    match f(conn) {
        Ok(value) => {
            conn.execute("COMMIT", []).map_err(StateError::query)?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

fn insert_history(conn: &Connection, item: &NewHistoryItem) -> Result<i64, StateError> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO upload_history (source_key, file_name, upload_time, status, message) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(StateError::query)?;
    stmt.execute(rusqlite::params![
        item.source_key,
        item.file_name,
        item.upload_time,
        item.status.as_str(),
        item.message,
    ])
    .map_err(StateError::query)?;
    Ok(conn.last_insert_rowid())
}

fn trim_history(conn: &Connection) -> Result<(), StateError> {
    conn.execute(
        "DELETE FROM upload_history WHERE id NOT IN (SELECT id FROM upload_history ORDER BY id DESC LIMIT ?1)",
        [HISTORY_RETENTION as i64],
    )
    .map_err(StateError::query)?;
    Ok(())
}

fn ts_to_datetime(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

#[async_trait]
impl UploadLedger for SqliteLedger {
    async fn mark_uploaded(&self, keys: &[String]) -> Result<u64, StateError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let uploaded_at = Utc::now().timestamp_millis();
        let conn = self.lock()?;

        with_transaction(&conn, |conn| {
            let mut insert = conn
                .prepare_cached(
                    "INSERT OR IGNORE INTO uploaded (item_key, uploaded_at_ms) VALUES (?1, ?2)",
                )
                .map_err(StateError::query)?;
            let mut clear_failure = conn
                .prepare_cached("DELETE FROM read_failures WHERE item_key = ?1")
                .map_err(StateError::query)?;

            let mut inserted = 0u64;
            for key in keys {
                inserted += insert
                    .execute(rusqlite::params![key, uploaded_at])
                    .map_err(StateError::query)? as u64;
                clear_failure.execute([key]).map_err(StateError::query)?;
            }
            Ok(inserted)
        })
    }

    async fn contains(&self, key: &str) -> Result<bool, StateError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM uploaded WHERE item_key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StateError::query)?;
        Ok(found.is_some())
    }

    async fn uploaded_keys(&self) -> Result<HashSet<String>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT item_key FROM uploaded")
            .map_err(StateError::query)?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StateError::query)?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(StateError::query)?;
        Ok(keys)
    }

    async fn entry(&self, key: &str) -> Result<Option<UploadLedgerEntry>, StateError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT item_key, uploaded_at_ms FROM uploaded WHERE item_key = ?1",
            [key],
            |row| {
                Ok(UploadLedgerEntry {
                    item_key: row.get(0)?,
                    uploaded_at_epoch_ms: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn append_history(&self, item: &NewHistoryItem) -> Result<i64, StateError> {
        let conn = self.lock()?;
        with_transaction(&conn, |conn| {
            let id = insert_history(conn, item)?;
            trim_history(conn)?;
            Ok(id)
        })
    }

    async fn append_history_batch(&self, items: &[NewHistoryItem]) -> Result<(), StateError> {
        if items.is_empty() {
            return Ok(());
        }
        let conn = self.lock()?;
        with_transaction(&conn, |conn| {
            for item in items {
                insert_history(conn, item)?;
            }
            trim_history(conn)
        })
    }

    async fn history(&self, limit: usize) -> Result<Vec<UploadHistoryItem>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, source_key, file_name, upload_time, status, message FROM upload_history ORDER BY id DESC LIMIT ?1",
            )
            .map_err(StateError::query)?;
        let rows = stmt
            .query_map([limit.min(HISTORY_RETENTION) as i64], |row| {
                let status: String = row.get(4)?;
                Ok((
                    UploadHistoryItem {
                        id: row.get(0)?,
                        source_key: row.get(1)?,
                        file_name: row.get(2)?,
                        upload_time: row.get(3)?,
                        status: HistoryStatus::Pending,
                        message: row.get(5)?,
                    },
                    status,
                ))
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        rows.into_iter()
            .map(|(mut item, status)| {
                item.status = HistoryStatus::from_str(&status).ok_or_else(|| {
                    StateError::UnknownHistoryStatus {
                        id: item.id,
                        status,
                    }
                })?;
                Ok(item)
            })
            .collect()
    }

    async fn record_read_failure(&self, key: &str, error: &str) -> Result<u32, StateError> {
        let now = Utc::now().timestamp();
        let conn = self.lock()?;
        let attempts: i64 = conn
            .query_row(
                r#"
                INSERT INTO read_failures (item_key, attempts, last_error, last_failed_at)
                VALUES (?1, 1, ?2, ?3)
                ON CONFLICT(item_key) DO UPDATE SET
                    attempts = attempts + 1,
                    last_error = excluded.last_error,
                    last_failed_at = excluded.last_failed_at
                RETURNING attempts
                "#,
                rusqlite::params![key, error, now],
                |row| row.get(0),
            )
            .map_err(StateError::query)?;
        Ok(attempts as u32)
    }

    async fn exhausted_keys(&self, max_attempts: u32) -> Result<HashSet<String>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT item_key FROM read_failures WHERE attempts >= ?1")
            .map_err(StateError::query)?;
        let keys = stmt
            .query_map([max_attempts as i64], |row| row.get::<_, String>(0))
            .map_err(StateError::query)?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(StateError::query)?;
        Ok(keys)
    }

    async fn read_failures(&self) -> Result<Vec<ReadFailure>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT item_key, attempts, last_error, last_failed_at FROM read_failures ORDER BY last_failed_at DESC",
            )
            .map_err(StateError::query)?;
        let failures = stmt
            .query_map([], |row| {
                Ok(ReadFailure {
                    item_key: row.get(0)?,
                    attempts: row.get::<_, i64>(1)? as u32,
                    last_error: row.get(2)?,
                    last_failed_at: ts_to_datetime(row.get(3)?),
                })
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;
        Ok(failures)
    }

    async fn reset_read_failures(&self) -> Result<u64, StateError> {
        let conn = self.lock()?;
        let rows = conn
            .execute("DELETE FROM read_failures", [])
            .map_err(StateError::query)?;
        Ok(rows as u64)
    }

    async fn start_sync_run(&self) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at) VALUES (?1)",
            [started_at],
        )
        .map_err(StateError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
        successful: bool,
    ) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.lock()?;

        with_transaction(&conn, |conn| {
            conn.execute(
                "UPDATE sync_runs SET completed_at = ?1, items_seen = ?2, uploaded = ?3, failed = ?4, skipped_quota = ?5, interrupted = ?6, last_error = ?7 WHERE id = ?8",
                rusqlite::params![
                    completed_at,
                    stats.items_seen as i64,
                    stats.uploaded as i64,
                    stats.failed as i64,
                    stats.skipped_quota as i64,
                    stats.interrupted as i64,
                    stats.last_error,
                    run_id
                ],
            )
            .map_err(StateError::query)?;

            if successful {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    rusqlite::params![LAST_SUCCESSFUL_SYNC_KEY, completed_at.to_string()],
                )
                .map_err(StateError::query)?;
            }
            Ok(())
        })
    }

    async fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>, StateError> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                [LAST_SUCCESSFUL_SYNC_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::query)?;
        Ok(ts_to_datetime(value.and_then(|v| v.parse().ok())))
    }

    async fn summary(&self) -> Result<LedgerSummary, StateError> {
        let last_successful_sync = self.last_successful_sync().await?;
        let conn = self.lock()?;

        let count = |sql: &str| -> Result<u64, StateError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(StateError::query)
        };
        let uploaded = count("SELECT COUNT(*) FROM uploaded")?;
        let history_entries = count("SELECT COUNT(*) FROM upload_history")?;
        let read_failures = count("SELECT COUNT(*) FROM read_failures")?;

        let last_run: Option<(Option<i64>, Option<i64>)> = conn
            .query_row(
                "SELECT started_at, completed_at FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(StateError::query)?;
        let (last_sync_started, last_sync_completed) = match last_run {
            Some((started, completed)) => (ts_to_datetime(started), ts_to_datetime(completed)),
            None => (None, None),
        };

        Ok(LedgerSummary {
            uploaded,
            history_entries,
            read_failures,
            last_sync_started,
            last_sync_completed,
            last_successful_sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("storj-uploader-rs")
            .join("ledger_tests")
            .join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn history_item(n: usize) -> NewHistoryItem {
        NewHistoryItem {
            source_key: format!("/photos/{}.jpg", n),
            file_name: format!("{}.jpg", n),
            upload_time: n as i64,
            status: HistoryStatus::Success,
            message: None,
        }
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = test_dir("open_creates");
        let path = dir.join("ledger.db");
        let ledger = SqliteLedger::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(ledger.path(), path);
    }

    #[tokio::test]
    async fn test_ledger_survives_reopen() {
        let dir = test_dir("reopen");
        let path = dir.join("ledger.db");
        {
            let ledger = SqliteLedger::open(&path).await.unwrap();
            ledger.mark_uploaded(&keys(&["a", "b"])).await.unwrap();
        }
        let ledger = SqliteLedger::open(&path).await.unwrap();
        assert!(ledger.contains("a").await.unwrap());
        assert!(ledger.contains("b").await.unwrap());
        assert!(!ledger.contains("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_uploaded_is_idempotent() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let batch = keys(&["a", "b", "c"]);

        assert_eq!(ledger.mark_uploaded(&batch).await.unwrap(), 3);
        let first = ledger.uploaded_keys().await.unwrap();
        let entry_before = ledger.entry("a").await.unwrap().unwrap();

        assert_eq!(ledger.mark_uploaded(&batch).await.unwrap(), 0);
        let second = ledger.uploaded_keys().await.unwrap();
        let entry_after = ledger.entry("a").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(second.len(), 3);
        assert_eq!(entry_before, entry_after);
    }

    #[tokio::test]
    async fn test_mark_uploaded_empty_is_noop() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert_eq!(ledger.mark_uploaded(&[]).await.unwrap(), 0);
        assert!(ledger.uploaded_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_bound_keeps_most_recent() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        for n in 0..130 {
            ledger.append_history(&history_item(n)).await.unwrap();
        }

        let history = ledger.history(500).await.unwrap();
        assert_eq!(history.len(), HISTORY_RETENTION);
        assert_eq!(history[0].file_name, "129.jpg");
        assert_eq!(history[HISTORY_RETENTION - 1].file_name, "30.jpg");
        assert!(history.windows(2).all(|w| w[0].id > w[1].id));
    }

    #[tokio::test]
    async fn test_history_batch_preserves_insertion_order() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let items: Vec<_> = (0..5).map(history_item).collect();
        ledger.append_history_batch(&items).await.unwrap();

        let history = ledger.history(3).await.unwrap();
        let names: Vec<_> = history.iter().map(|h| h.file_name.as_str()).collect();
        assert_eq!(names, vec!["4.jpg", "3.jpg", "2.jpg"]);
    }

    #[tokio::test]
    async fn test_history_batch_respects_bound() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let items: Vec<_> = (0..150).map(history_item).collect();
        ledger.append_history_batch(&items).await.unwrap();
        assert_eq!(ledger.history(1000).await.unwrap().len(), HISTORY_RETENTION);
    }

    #[tokio::test]
    async fn test_read_failures_count_up_and_exhaust() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert_eq!(ledger.record_read_failure("x", "gone").await.unwrap(), 1);
        assert_eq!(ledger.record_read_failure("x", "still gone").await.unwrap(), 2);
        assert_eq!(ledger.record_read_failure("y", "denied").await.unwrap(), 1);

        let exhausted = ledger.exhausted_keys(2).await.unwrap();
        assert!(exhausted.contains("x"));
        assert!(!exhausted.contains("y"));

        let failures = ledger.read_failures().await.unwrap();
        let x = failures.iter().find(|f| f.item_key == "x").unwrap();
        assert_eq!(x.attempts, 2);
        assert_eq!(x.last_error.as_deref(), Some("still gone"));
    }

    #[tokio::test]
    async fn test_successful_upload_clears_read_failure() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.record_read_failure("x", "locked").await.unwrap();
        ledger.mark_uploaded(&keys(&["x"])).await.unwrap();
        assert!(ledger.read_failures().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_read_failures() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.record_read_failure("x", "e").await.unwrap();
        ledger.record_read_failure("y", "e").await.unwrap();
        assert_eq!(ledger.reset_read_failures().await.unwrap(), 2);
        assert!(ledger.exhausted_keys(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_run_lifecycle_and_summary() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert!(ledger.last_successful_sync().await.unwrap().is_none());

        let run_id = ledger.start_sync_run().await.unwrap();
        let stats = SyncRunStats {
            items_seen: 12,
            uploaded: 10,
            failed: 2,
            skipped_quota: 0,
            interrupted: false,
            last_error: Some("HTTP 500".to_string()),
        };
        ledger.complete_sync_run(run_id, &stats, true).await.unwrap();
        ledger.mark_uploaded(&keys(&["a"])).await.unwrap();
        ledger.append_history(&history_item(1)).await.unwrap();

        let summary = ledger.summary().await.unwrap();
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.history_entries, 1);
        assert!(summary.last_sync_started.is_some());
        assert!(summary.last_sync_completed.is_some());
        assert!(summary.last_successful_sync.is_some());
    }

    #[tokio::test]
    async fn test_failed_run_does_not_stamp_success() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let run_id = ledger.start_sync_run().await.unwrap();
        ledger
            .complete_sync_run(run_id, &SyncRunStats::default(), false)
            .await
            .unwrap();
        assert!(ledger.last_successful_sync().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_rejects_unknown_status() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger
            .append_history(&NewHistoryItem::now("k", "a.jpg", HistoryStatus::Success, None))
            .await
            .unwrap();
        ledger
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE upload_history SET status = 'uploaded'", [])
            .unwrap();

        let err = ledger.history(10).await.unwrap_err();
        assert!(matches!(
            err,
            StateError::UnknownHistoryStatus { ref status, .. } if status == "uploaded"
        ));
    }
}
