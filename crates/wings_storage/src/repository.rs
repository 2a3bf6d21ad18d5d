use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use wings_contract::{Destination, RetryState, ShareCounts, ShareId, ShareRecord, ShareState};

use crate::clock::{Clock, SystemClock};

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

const SHARE_COLUMNS: &str = "id, file_path, destination, time_created, state, fails";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub sqlite_path: String,
    pub purge: PurgePolicy,
}

/// A record is purged when ANY of these holds: it is older than `expiry`,
/// it has been processed, or it has failed more than `max_fails` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgePolicy {
    pub expiry: TimeDelta,
    pub max_fails: u32,
}

impl Default for PurgePolicy {
    fn default() -> Self {
        Self {
            expiry: TimeDelta::days(2),
            max_fails: 500,
        }
    }
}

/// Durable share-request table and the retry counter.
///
/// Every mutation takes `write_lock` and runs in its own transaction, so the
/// state machine stays consistent under concurrent callers. Public methods
/// never return storage errors: faults are logged and reported as
/// `false`/empty/`None`, and callers retry on the next cycle.
#[derive(Debug, Clone)]
pub struct ShareStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    purge: PurgePolicy,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, FromRow)]
struct ShareRow {
    id: i64,
    file_path: String,
    destination: i64,
    time_created: i64,
    state: i64,
    fails: i64,
}

impl TryFrom<ShareRow> for ShareRecord {
    type Error = anyhow::Error;

    fn try_from(row: ShareRow) -> Result<Self> {
        let created_at = DateTime::<Utc>::from_timestamp_millis(row.time_created)
            .ok_or_else(|| anyhow!("share {} has invalid time_created {}", row.id, row.time_created))?;
        Ok(ShareRecord {
            id: ShareId(row.id),
            file_path: PathBuf::from(row.file_path),
            destination: Destination::from_hash(row.destination),
            created_at,
            state: ShareState::try_from(row.state)?,
            fail_count: u32::try_from(row.fails).unwrap_or(u32::MAX),
        })
    }
}

impl ShareStore {
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        Self::connect_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(config: &StorageConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let uri = normalize_sqlite_uri(&config.sqlite_path);
        let options = SqliteConnectOptions::from_str(&uri)
            .with_context(|| format!("invalid sqlite URI: {}", uri))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect sqlite pool")?;

        let store = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            purge: config.purge,
            clock,
        };
        store.migrate().await?;
        Ok(store)
    }

    pub fn purge_policy(&self) -> PurgePolicy {
        self.purge
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let sql = statement.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration failed for statement: {sql}"))?;
        }
        info!("wings sqlite schema ready");
        Ok(())
    }

    /// Inserts a pending record and resets the retry counter, so a fresh
    /// request is attempted promptly.
    pub async fn create(&self, file_path: &Path, destination: Destination) -> Option<ShareId> {
        match self.try_create(file_path, destination).await {
            Ok(id) => {
                info!(
                    id = %id,
                    file_path = %file_path.display(),
                    destination = %destination,
                    "share request created"
                );
                Some(id)
            }
            Err(err) => {
                report("create", err);
                None
            }
        }
    }

    /// Claims every pending record of `destination`, earliest first.
    pub async fn checkout(&self, destination: Destination) -> Vec<ShareRecord> {
        match self.try_checkout(destination).await {
            Ok(records) => {
                for record in &records {
                    debug!(
                        id = %record.id,
                        file_path = %record.file_path.display(),
                        destination = %destination,
                        "share request checked out"
                    );
                }
                records
            }
            Err(err) => {
                report("checkout", err);
                Vec::new()
            }
        }
    }

    pub async fn mark_successful(&self, id: ShareId) -> bool {
        let updated = self
            .transition(
                id,
                "UPDATE shares SET state = ? WHERE id = ? AND state = ?",
                ShareState::Processed,
            )
            .await;
        debug!(id = %id, updated, "mark successful");
        updated
    }

    pub async fn mark_failed(&self, id: ShareId) -> bool {
        let updated = self
            .transition(
                id,
                "UPDATE shares SET state = ?, fails = fails + 1 WHERE id = ? AND state = ?",
                ShareState::Pending,
            )
            .await;
        debug!(id = %id, updated, "mark failed");
        updated
    }

    /// Applies the purge policy and returns how many records remain, or
    /// `None` when the store could not be purged.
    pub async fn purge(&self) -> Option<u64> {
        match self.try_purge().await {
            Ok((deleted, remaining)) => {
                info!(deleted, remaining, "share requests purged");
                Some(remaining)
            }
            Err(err) => {
                report("purge", err);
                None
            }
        }
    }

    /// Moves every record left in `Processing` by an interrupted cycle back
    /// to `Pending`.
    pub async fn reset_stuck(&self) -> u64 {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE shares SET state = ? WHERE state = ?")
            .bind(ShareState::Pending.as_i64())
            .bind(ShareState::Processing.as_i64())
            .execute(&self.pool)
            .await
            .context("reset processing shares");

        match result {
            Ok(done) => {
                let recovered = done.rows_affected();
                if recovered > 0 {
                    info!(recovered, "stuck share requests reset to pending");
                }
                recovered
            }
            Err(err) => {
                report("reset_stuck", err);
                0
            }
        }
    }

    pub async fn delete_by_destination(&self, destination: Destination) -> u64 {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM shares WHERE destination = ?")
            .bind(destination.hash())
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete shares for destination {destination}"));

        match result {
            Ok(done) => {
                let deleted = done.rows_affected();
                info!(destination = %destination, deleted, "share requests deleted for destination");
                deleted
            }
            Err(err) => {
                report("delete_by_destination", err);
                0
            }
        }
    }

    pub async fn load_retry_state(&self) -> RetryState {
        let result = sqlx::query_scalar::<_, i64>(
            "SELECT consecutive_failures FROM retry_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("query retry state");

        match result {
            Ok(value) => RetryState {
                consecutive_failures: value
                    .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
                    .unwrap_or_default(),
            },
            Err(err) => {
                report("load_retry_state", err);
                RetryState::default()
            }
        }
    }

    pub async fn save_retry_state(&self, state: RetryState) -> bool {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "INSERT INTO retry_state(id, consecutive_failures) VALUES (1, ?) ON CONFLICT(id) DO UPDATE SET consecutive_failures = excluded.consecutive_failures",
        )
        .bind(i64::from(state.consecutive_failures))
        .execute(&self.pool)
        .await
        .context("save retry state");

        match result {
            Ok(_) => true,
            Err(err) => {
                report("save_retry_state", err);
                false
            }
        }
    }

    /// Bumps the counter in one transaction and returns the value it held
    /// before, so the caller derives its delay from what is stored now and
    /// not from a copy read earlier in the cycle.
    pub async fn increment_retry_state(&self) -> Option<RetryState> {
        match self.try_increment_retry_state().await {
            Ok(previous) => Some(previous),
            Err(err) => {
                report("increment_retry_state", err);
                None
            }
        }
    }

    pub async fn reset_retry_state(&self) -> bool {
        self.save_retry_state(RetryState::default()).await
    }

    pub async fn get(&self, id: ShareId) -> Option<ShareRecord> {
        let result = async {
            let row = sqlx::query_as::<_, ShareRow>(&format!(
                "SELECT {SHARE_COLUMNS} FROM shares WHERE id = ?"
            ))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("query share {id}"))?;
            row.map(ShareRecord::try_from).transpose()
        }
        .await;

        result.unwrap_or_else(|err| {
            report("get", err);
            None
        })
    }

    pub async fn list(&self, state: Option<ShareState>, limit: i64) -> Vec<ShareRecord> {
        let result = async {
            let rows = sqlx::query_as::<_, ShareRow>(&format!(
                "SELECT {SHARE_COLUMNS} FROM shares WHERE (? IS NULL OR state = ?) ORDER BY time_created ASC, id ASC LIMIT ?"
            ))
            .bind(state.map(ShareState::as_i64))
            .bind(state.map(ShareState::as_i64))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("list shares")?;
            rows.into_iter()
                .map(ShareRecord::try_from)
                .collect::<Result<Vec<_>>>()
        }
        .await;

        result.unwrap_or_else(|err| {
            report("list", err);
            Vec::new()
        })
    }

    pub async fn counts(&self) -> ShareCounts {
        let result = sqlx::query_as::<_, (i64, i64)>(
            "SELECT state, COUNT(*) FROM shares GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await
        .context("count shares by state");

        match result {
            Ok(rows) => {
                let mut counts = ShareCounts::default();
                for (state, count) in rows {
                    let count = u64::try_from(count).unwrap_or_default();
                    match ShareState::try_from(state) {
                        Ok(ShareState::Pending) => counts.pending = count,
                        Ok(ShareState::Processing) => counts.processing = count,
                        Ok(ShareState::Processed) => counts.processed = count,
                        Err(_) => {}
                    }
                }
                counts
            }
            Err(err) => {
                report("counts", err);
                ShareCounts::default()
            }
        }
    }

    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    async fn try_create(&self, file_path: &Path, destination: Destination) -> Result<ShareId> {
        let now = self.clock.now().timestamp_millis();
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.context("begin create share")?;

        let inserted = sqlx::query(
            "INSERT INTO shares(file_path, destination, time_created, state, fails) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(file_path.to_string_lossy().into_owned())
        .bind(destination.hash())
        .bind(now)
        .bind(ShareState::Pending.as_i64())
        .execute(&mut *tx)
        .await
        .context("insert share")?;

        sqlx::query("UPDATE retry_state SET consecutive_failures = 0 WHERE id = 1")
            .execute(&mut *tx)
            .await
            .context("reset retry state on create")?;

        tx.commit().await.context("commit create share")?;
        Ok(ShareId(inserted.last_insert_rowid()))
    }

    async fn try_increment_retry_state(&self) -> Result<RetryState> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.context("begin retry increment")?;

        let current = sqlx::query_scalar::<_, i64>(
            "SELECT consecutive_failures FROM retry_state WHERE id = 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .context("query retry state")?
        .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
        .unwrap_or_default();

        sqlx::query(
            "INSERT INTO retry_state(id, consecutive_failures) VALUES (1, ?) ON CONFLICT(id) DO UPDATE SET consecutive_failures = excluded.consecutive_failures",
        )
        .bind(i64::from(current.saturating_add(1)))
        .execute(&mut *tx)
        .await
        .context("increment retry state")?;

        tx.commit().await.context("commit retry increment")?;
        Ok(RetryState {
            consecutive_failures: current,
        })
    }

    async fn try_checkout(&self, destination: Destination) -> Result<Vec<ShareRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.context("begin checkout")?;

        let rows = sqlx::query_as::<_, ShareRow>(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares WHERE destination = ? AND state = ? ORDER BY time_created ASC, id ASC"
        ))
        .bind(destination.hash())
        .bind(ShareState::Pending.as_i64())
        .fetch_all(&mut *tx)
        .await
        .with_context(|| format!("query pending shares for {destination}"))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let claimed = sqlx::query("UPDATE shares SET state = ? WHERE id = ? AND state = ?")
                .bind(ShareState::Processing.as_i64())
                .bind(row.id)
                .bind(ShareState::Pending.as_i64())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("claim share {}", row.id))?;

            if claimed.rows_affected() > 0 {
                let mut record = ShareRecord::try_from(row)?;
                record.state = ShareState::Processing;
                records.push(record);
            }
        }

        tx.commit().await.context("commit checkout")?;
        Ok(records)
    }

    async fn try_purge(&self) -> Result<(u64, u64)> {
        let earliest_valid = (self.clock.now() - self.purge.expiry).timestamp_millis();
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.context("begin purge")?;

        let deleted = sqlx::query("DELETE FROM shares WHERE time_created < ? OR state = ? OR fails > ?")
            .bind(earliest_valid)
            .bind(ShareState::Processed.as_i64())
            .bind(i64::from(self.purge.max_fails))
            .execute(&mut *tx)
            .await
            .context("purge shares")?
            .rows_affected();

        let remaining = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM shares")
            .fetch_one(&mut *tx)
            .await
            .context("count remaining shares")?;

        tx.commit().await.context("commit purge")?;
        Ok((deleted, u64::try_from(remaining).unwrap_or_default()))
    }

    async fn transition(&self, id: ShareId, sql: &str, target: ShareState) -> bool {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(sql)
            .bind(target.as_i64())
            .bind(id.0)
            .bind(ShareState::Processing.as_i64())
            .execute(&self.pool)
            .await
            .with_context(|| format!("move share {id} to {}", target.as_str()));

        match result {
            Ok(done) => done.rows_affected() > 0,
            Err(err) => {
                report("transition", err);
                false
            }
        }
    }
}

fn report(operation: &str, err: anyhow::Error) {
    error!(operation, error = %format!("{err:#}"), "share store operation failed");
}

fn normalize_sqlite_uri(raw: &str) -> String {
    if raw.starts_with("sqlite:") {
        raw.to_string()
    } else {
        format!("sqlite://{raw}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::clock::FixedClock;

    const ALBUM: Destination = Destination::new(0, 1);
    const FOLDER: Destination = Destination::new(1, 0);

    async fn open(dir: &TempDir, clock: Arc<FixedClock>) -> ShareStore {
        let config = StorageConfig {
            sqlite_path: dir.path().join("wings.db").display().to_string(),
            purge: PurgePolicy::default(),
        };
        ShareStore::connect_with_clock(&config, clock)
            .await
            .expect("open store")
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn create_inserts_pending_record_and_resets_retry_state() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;
        assert!(store.save_retry_state(RetryState { consecutive_failures: 4 }).await);

        let id = store
            .create(Path::new("/photos/strip-1.jpg"), ALBUM)
            .await
            .expect("created");

        let record = store.get(id).await.expect("record exists");
        assert_eq!(record.state, ShareState::Pending);
        assert_eq!(record.fail_count, 0);
        assert_eq!(record.destination, ALBUM);
        assert_eq!(record.created_at, start());
        assert_eq!(store.load_retry_state().await, RetryState::default());
    }

    #[tokio::test]
    async fn ids_are_never_reused_after_purge() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;

        let first = store.create(Path::new("/a.jpg"), ALBUM).await.unwrap();
        store.checkout(ALBUM).await;
        assert!(store.mark_successful(first).await);
        assert_eq!(store.purge().await, Some(0));

        let second = store.create(Path::new("/b.jpg"), ALBUM).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn checkout_is_fifo_and_scoped_to_destination() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(start()));
        let store = open(&dir, clock.clone()).await;

        clock.set(start() + TimeDelta::minutes(5));
        let late = store.create(Path::new("/late.jpg"), ALBUM).await.unwrap();
        clock.set(start());
        let early = store.create(Path::new("/early.jpg"), ALBUM).await.unwrap();
        let other = store.create(Path::new("/other.jpg"), FOLDER).await.unwrap();

        let records = store.checkout(ALBUM).await;
        let ids: Vec<ShareId> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early, late]);
        assert!(records.iter().all(|r| r.state == ShareState::Processing));

        let untouched = store.get(other).await.unwrap();
        assert_eq!(untouched.state, ShareState::Pending);

        assert!(store.checkout(ALBUM).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_checkouts_never_overlap() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;
        for i in 0..20 {
            store
                .create(Path::new(&format!("/photos/{i}.jpg")), ALBUM)
                .await
                .unwrap();
        }

        let other = store.clone();
        let (left, right) = tokio::join!(store.checkout(ALBUM), other.checkout(ALBUM));

        let left_ids: HashSet<ShareId> = left.iter().map(|r| r.id).collect();
        let right_ids: HashSet<ShareId> = right.iter().map(|r| r.id).collect();
        assert!(left_ids.is_disjoint(&right_ids));
        assert_eq!(left_ids.len() + right_ids.len(), 20);
    }

    #[tokio::test]
    async fn transitions_only_follow_allowed_edges() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;
        let id = store.create(Path::new("/a.jpg"), ALBUM).await.unwrap();

        // pending records cannot be resolved
        assert!(!store.mark_successful(id).await);
        assert!(!store.mark_failed(id).await);

        store.checkout(ALBUM).await;
        assert!(store.mark_failed(id).await);
        let record = store.get(id).await.unwrap();
        assert_eq!(record.state, ShareState::Pending);
        assert_eq!(record.fail_count, 1);

        store.checkout(ALBUM).await;
        assert!(store.mark_successful(id).await);

        // processed records stay processed and stop counting failures
        assert!(!store.mark_failed(id).await);
        assert!(!store.mark_successful(id).await);
        let record = store.get(id).await.unwrap();
        assert_eq!(record.state, ShareState::Processed);
        assert_eq!(record.fail_count, 1);

        assert!(!store.mark_successful(ShareId(9_999)).await);
    }

    #[tokio::test]
    async fn reset_stuck_returns_processing_records_to_checkout() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;
        store.create(Path::new("/a.jpg"), ALBUM).await.unwrap();
        store.create(Path::new("/b.jpg"), ALBUM).await.unwrap();

        assert_eq!(store.checkout(ALBUM).await.len(), 2);
        assert_eq!(store.reset_stuck().await, 2);

        let counts = store.counts().await;
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.processing, 0);
        assert_eq!(store.checkout(ALBUM).await.len(), 2);
    }

    #[tokio::test]
    async fn purge_removes_expired_processed_and_over_failed_records() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(start()));
        let store = open(&dir, clock.clone()).await;

        let expired = store.create(Path::new("/old.jpg"), FOLDER).await.unwrap();
        clock.advance(TimeDelta::days(1));
        let processed = store.create(Path::new("/done.jpg"), ALBUM).await.unwrap();
        let failing = store.create(Path::new("/broken.jpg"), FOLDER).await.unwrap();
        let healthy = store.create(Path::new("/fresh.jpg"), ALBUM).await.unwrap();

        store.checkout(ALBUM).await;
        assert!(store.mark_successful(processed).await);
        assert!(store.mark_failed(healthy).await);

        sqlx::query("UPDATE shares SET fails = 501 WHERE id = ?")
            .bind(failing.0)
            .execute(&store.pool)
            .await
            .unwrap();

        clock.advance(TimeDelta::days(1) + TimeDelta::minutes(1));
        assert_eq!(store.purge().await, Some(1));

        assert!(store.get(expired).await.is_none());
        assert!(store.get(processed).await.is_none());
        assert!(store.get(failing).await.is_none());

        let remaining = store.list(None, 100).await;
        assert_eq!(remaining.len(), 1);
        let survivor = &remaining[0];
        assert_eq!(survivor.id, healthy);
        let policy = store.purge_policy();
        assert!(survivor.created_at >= store.now() - policy.expiry);
        assert_ne!(survivor.state, ShareState::Processed);
        assert!(survivor.fail_count <= policy.max_fails);
    }

    #[tokio::test]
    async fn delete_by_destination_ignores_state() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;
        store.create(Path::new("/a.jpg"), ALBUM).await.unwrap();
        store.create(Path::new("/b.jpg"), ALBUM).await.unwrap();
        let kept = store.create(Path::new("/c.jpg"), FOLDER).await.unwrap();
        store.checkout(ALBUM).await;

        assert_eq!(store.delete_by_destination(ALBUM).await, 2);
        assert_eq!(store.list(None, 10).await.len(), 1);
        assert!(store.get(kept).await.is_some());
    }

    #[tokio::test]
    async fn list_filters_by_state() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;
        store.create(Path::new("/a.jpg"), ALBUM).await.unwrap();
        store.create(Path::new("/b.jpg"), FOLDER).await.unwrap();
        store.checkout(FOLDER).await;

        assert_eq!(store.list(Some(ShareState::Pending), 10).await.len(), 1);
        assert_eq!(store.list(Some(ShareState::Processing), 10).await.len(), 1);
        assert_eq!(store.list(None, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn storage_fault_degrades_to_empty_results() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;
        store.create(Path::new("/a.jpg"), ALBUM).await.unwrap();
        store.pool.close().await;

        assert!(store.create(Path::new("/b.jpg"), ALBUM).await.is_none());
        assert!(store.checkout(ALBUM).await.is_empty());
        assert!(!store.mark_failed(ShareId(1)).await);
        assert_eq!(store.purge().await, None);
        assert_eq!(store.reset_stuck().await, 0);
        assert_eq!(store.increment_retry_state().await, None);
        assert!(!store.ping().await);
    }

    #[tokio::test]
    async fn retry_state_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;
        assert_eq!(store.load_retry_state().await, RetryState::default());

        assert!(store.save_retry_state(RetryState { consecutive_failures: 3 }).await);
        assert_eq!(store.load_retry_state().await.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn increment_reports_the_previous_count_and_create_wins_over_it() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;

        assert_eq!(
            store.increment_retry_state().await,
            Some(RetryState { consecutive_failures: 0 })
        );
        assert_eq!(
            store.increment_retry_state().await,
            Some(RetryState { consecutive_failures: 1 })
        );
        assert_eq!(store.load_retry_state().await.consecutive_failures, 2);

        store
            .create(Path::new("/photos/late.jpg"), ALBUM)
            .await
            .unwrap();
        assert_eq!(
            store.increment_retry_state().await,
            Some(RetryState { consecutive_failures: 0 })
        );
        assert_eq!(store.load_retry_state().await.consecutive_failures, 1);

        assert!(store.reset_retry_state().await);
        assert_eq!(store.load_retry_state().await, RetryState::default());
    }

    #[tokio::test]
    async fn increment_saturates_at_the_top() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Arc::new(FixedClock::new(start()))).await;

        assert!(store.save_retry_state(RetryState { consecutive_failures: u32::MAX }).await);
        assert_eq!(
            store.increment_retry_state().await,
            Some(RetryState { consecutive_failures: u32::MAX })
        );
        assert_eq!(store.load_retry_state().await.consecutive_failures, u32::MAX);
    }
}
