//! SQLite database with connection pooling and optional write access

use crate::Result;
use crate::config::{SqliteDatabaseConfig, TransactionKind};
use crate::error::Error;
use crate::executor::ExecutorGuard;
use crate::registry::{get_or_open_database, is_memory_database, uncache_database};
use crate::snapshot::{SnapshotPool, SnapshotToken};
use crate::write_guard::WriteGuard;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::error;

/// Analysis limit for PRAGMA optimize on close.
/// SQLite recommends 100-1000 for older versions; 3.46.0+ handles automatically.
/// See: https://www.sqlite.org/lang_analyze.html#recommended_usage_pattern
const OPTIMIZE_ANALYSIS_LIMIT: u32 = 400;

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

/// How a WAL checkpoint should behave. See
/// <https://www.sqlite.org/c3ref/wal_checkpoint_v2.html>.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
   Passive,
   Full,
   Restart,
   Truncate,
}

impl CheckpointMode {
   fn as_sql_keyword(self) -> &'static str {
      match self {
         Self::Passive => "PASSIVE",
         Self::Full => "FULL",
         Self::Restart => "RESTART",
         Self::Truncate => "TRUNCATE",
      }
   }
}

/// SQLite database with connection pooling for concurrent reads and optional exclusive writes.
///
/// Once the database is opened it can be used for read-only operations by calling `read_pool()`.
/// Write operations are available by calling `acquire_writer()` which lazily initializes WAL mode
/// on first use.
#[derive(Debug)]
pub struct SqliteDatabase {
   /// Pool of read-only connections for concurrent reads
   read_pool: Pool<Sqlite>,

   /// Single read-write connection pool (max_connections=1) for serialized writes
   write_conn: Pool<Sqlite>,

   /// Tracks if WAL mode has been initialized (set on first write)
   wal_initialized: AtomicBool,

   /// Marks database as closed to prevent further operations
   closed: AtomicBool,

   /// Path to database file (used for cleanup and registry lookups)
   path: PathBuf,

   /// Identity used by the reentrancy guard; unique per `SqliteDatabase` instance
   writer_executor_id: u64,

   /// Lazily built the first time a snapshot is taken; requires WAL mode,
   /// which itself is only turned on once `acquire_writer` runs.
   snapshot_pool: OnceCell<Arc<SnapshotPool>>,

   config: SqliteDatabaseConfig,
}

impl SqliteDatabase {
   /// Get the database file path as a string
   ///
   /// Used internally (crate-private) for ATTACH DATABASE statements
   pub(crate) fn path_str(&self) -> String {
      self.path.to_string_lossy().to_string()
   }

   /// Connect to a SQLite database
   ///
   /// If the database is already connected, returns the existing connection.
   /// Multiple calls with the same path will return the same database instance.
   ///
   /// The database is created if it doesn't exist. WAL mode is enabled when
   /// `acquire_writer()` is first called.
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteDatabaseConfig>,
   ) -> Result<Arc<Self>> {
      let config = custom_config.unwrap_or_default();
      let path = path.as_ref();

      if path.as_os_str().is_empty() {
         return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path cannot be empty",
         )));
      }

      let path = path.to_path_buf();
      let config_for_open = config.clone();

      get_or_open_database(&path, || async move {
         let config = config_for_open;
         let db_exists = path.exists();

         // If the database doesn't exist and not :memory:, create it with a temporary
         // connection. We don't keep this connection around; WAL mode is deferred to
         // the first acquire_writer() call. We can't just rely on create_if_missing on
         // the read pool because read connections are opened read-only and cannot
         // create the file.
         if !db_exists && !is_memory_database(&path) && !config.read_only {
            let create_options = SqliteConnectOptions::new()
               .filename(&path)
               .create_if_missing(true)
               .read_only(false);
            let conn = create_options.connect().await?;
            drop(conn);
         }

         let read_options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(true)
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms as u64))
            .optimize_on_close(true, OPTIMIZE_ANALYSIS_LIMIT);

         let read_pool = SqlitePoolOptions::new()
            .max_connections(config.max_read_connections)
            .min_connections(0)
            .idle_timeout(Some(std::time::Duration::from_secs(config.idle_timeout_secs)))
            .connect_with(read_options)
            .await?;

         // Even for a read-only database we keep a (never-acquired) write pool handle
         // around so `SqliteDatabase` has a stable shape; `acquire_writer` rejects use
         // of it up front via `config.read_only`.
         let write_options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(config.read_only)
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms as u64))
            .optimize_on_close(true, OPTIMIZE_ANALYSIS_LIMIT);

         let write_conn = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .idle_timeout(Some(std::time::Duration::from_secs(config.idle_timeout_secs)))
            .connect_with(write_options)
            .await?;

         Ok(Self {
            read_pool,
            write_conn,
            wal_initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            path: path.clone(),
            writer_executor_id: NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed),
            snapshot_pool: OnceCell::new(),
            config,
         })
      })
      .await
   }

   /// Get a reference to the connection pool for executing read queries
   pub fn read_pool(&self) -> Result<&Pool<Sqlite>> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }
      Ok(&self.read_pool)
   }

   async fn ensure_wal(&self, conn: &mut PoolConnection<Sqlite>) -> Result<()> {
      if self
         .wal_initialized
         .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
         .is_ok()
      {
         sqlx::query("PRAGMA journal_mode = WAL").execute(&mut **conn).await?;
         // https://www.sqlite.org/wal.html#performance_considerations
         sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut **conn).await?;
      }
      Ok(())
   }

   /// Acquire exclusive write access to the database.
   ///
   /// This method returns a `WriteGuard` that provides exclusive access to
   /// the single write connection. Only one writer can exist at a time; the
   /// single-slot pool this is backed by provides that serialization for
   /// free. On the first call, this method enables WAL mode.
   pub async fn acquire_writer(&self) -> Result<WriteGuard> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }
      if self.config.read_only {
         return Err(Error::ReadOnlyDatabase);
      }

      let guard = ExecutorGuard::enter(self.writer_executor_id, false);
      let mut conn = self.write_conn.acquire().await?;
      self.ensure_wal(&mut conn).await?;
      Ok(WriteGuard::new(conn, guard))
   }

   /// Run `f` against a read connection from the bounded reader pool, inside
   /// a `BEGIN DEFERRED TRANSACTION`. In WAL mode this fixes the reader's
   /// snapshot as of the first statement `f` issues, isolating it from
   /// writes the single writer commits while `f` is still running. Commits
   /// the transaction on success, rolls it back on error, either way
   /// dropping the snapshot once `f` returns.
   pub async fn read<F, Fut, T>(&self, f: F) -> Result<T>
   where
      F: FnOnce(&mut PoolConnection<Sqlite>) -> Fut,
      Fut: std::future::Future<Output = Result<T>>,
   {
      let mut conn = self.read_pool()?.acquire().await?;
      sqlx::query("BEGIN DEFERRED TRANSACTION").execute(&mut *conn).await?;

      match f(&mut conn).await {
         Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
         }
         Err(err) => {
            if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
               error!("rollback failed after read error: {}", rollback_err);
            }
            Err(err)
         }
      }
   }

   /// Runs `f` against a read connection from the bounded reader pool
   /// directly, with no surrounding transaction — `f` sees whatever
   /// uncommitted-relative-to-it state the reader's connection happens to
   /// observe one statement at a time, not a fixed snapshot. Safe to call
   /// from a task that may already hold another reader connection from this
   /// same pool, since the reader pool has more than one slot and genuine
   /// self-deadlock on it is not possible here.
   pub async fn unsafe_read<F, Fut, T>(&self, f: F) -> Result<T>
   where
      F: FnOnce(PoolConnection<Sqlite>) -> Fut,
      Fut: std::future::Future<Output = Result<T>>,
   {
      let conn = self.read_pool()?.acquire().await?;
      f(conn).await
   }

   /// Explicitly reentrant read: permitted even while the calling task
   /// already holds the single writer connection (e.g. code inside a
   /// `write` closure that also wants to run a plain SELECT against the
   /// reader pool). Requires `config.allows_unsafe_transactions`. Like
   /// [`Self::unsafe_read`], runs with no surrounding transaction.
   pub async fn unsafe_reentrant_read<F, Fut, T>(&self, f: F) -> Result<T>
   where
      F: FnOnce(PoolConnection<Sqlite>) -> Fut,
      Fut: std::future::Future<Output = Result<T>>,
   {
      if !self.config.allows_unsafe_transactions {
         return Err(Error::Sqlx(sqlx::Error::Configuration(
            "allows_unsafe_transactions is disabled; unsafe_reentrant_read is not available".into(),
         )));
      }
      let _guard = ExecutorGuard::enter(self.writer_executor_id, true);
      self.unsafe_read(f).await
   }

   /// Acquire the writer, run `f` inside a transaction of
   /// `config.default_transaction_kind`, and commit on success / roll back
   /// on error.
   pub async fn write<F, Fut, T>(&self, f: F) -> Result<T>
   where
      F: FnOnce(&mut WriteGuard) -> Fut,
      Fut: std::future::Future<Output = Result<T>>,
   {
      let mut writer = self.acquire_writer().await?;
      sqlx::query(self.config.default_transaction_kind.begin_sql())
         .execute(&mut *writer)
         .await?;

      match f(&mut writer).await {
         Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *writer).await?;
            Ok(value)
         }
         Err(err) => {
            if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *writer).await {
               error!("rollback failed after write error: {}", rollback_err);
            }
            Err(err)
         }
      }
   }

   /// Acquire the writer and run `f` without wrapping it in a transaction;
   /// used for statements that cannot run inside one (e.g. `VACUUM`,
   /// `PRAGMA journal_mode`).
   pub async fn write_without_transaction<F, Fut, T>(&self, f: F) -> Result<T>
   where
      F: FnOnce(&mut WriteGuard) -> Fut,
      Fut: std::future::Future<Output = Result<T>>,
   {
      let mut writer = self.acquire_writer().await?;
      f(&mut writer).await
   }

   /// Acquire a read connection whose snapshot is fixed at the moment this
   /// call returns, even though concurrent writes may be committing on the
   /// writer connection. This is a two-step handshake: first a deferred
   /// transaction is opened (which, in WAL mode, captures the current
   /// reader snapshot on its first statement), then `f` runs against it.
   /// The transaction is always rolled back afterward since this is a
   /// read-only operation.
   pub async fn concurrent_read<F, Fut, T>(&self, f: F) -> Result<T>
   where
      F: FnOnce(PoolConnection<Sqlite>) -> Fut,
      Fut: std::future::Future<Output = Result<(PoolConnection<Sqlite>, T)>>,
   {
      let mut conn = self.read_pool()?.acquire().await?;
      sqlx::query("BEGIN DEFERRED").execute(&mut *conn).await?;
      // Forces the snapshot to actually be taken now rather than lazily on
      // the first real query inside f.
      sqlx::query("SELECT 1").execute(&mut *conn).await?;

      let (mut conn, value) = match f(conn).await {
         Ok(result) => result,
         Err(err) => return Err(err),
      };
      sqlx::query("ROLLBACK").execute(&mut *conn).await?;
      Ok(value)
   }

   /// Lazily builds the WAL snapshot pool on first use. WAL mode must
   /// already be on, which means `acquire_writer` must have run at least
   /// once; otherwise returns [`Error::SnapshotRequiresWal`].
   async fn snapshot_pool(&self) -> Result<Arc<SnapshotPool>> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }
      if !self.wal_initialized.load(Ordering::SeqCst) {
         return Err(Error::SnapshotRequiresWal);
      }
      self
         .snapshot_pool
         .get_or_try_init(|| async { Ok(Arc::new(SnapshotPool::new(self.read_pool.clone()).await?)) })
         .await
         .map(Arc::clone)
   }

   /// Pin a reusable snapshot of the database's current state. Internally
   /// opens its own deferred read transaction on a reader connection so the
   /// snapshot it captures is never mid-write, then releases that
   /// connection back to the pool.
   pub async fn capture_snapshot(&self) -> Result<SnapshotToken> {
      let pool = self.snapshot_pool().await?;
      let mut conn = self.read_pool()?.acquire().await?;
      sqlx::query("BEGIN DEFERRED").execute(&mut *conn).await?;
      sqlx::query("SELECT 1").execute(&mut *conn).await?;

      let token = pool.capture(&mut conn).await;
      let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
      token
   }

   /// Run `f` against a connection pinned to `token`'s snapshot, isolated
   /// from every write the database has accepted since the snapshot was
   /// captured.
   pub async fn read_snapshot<F, Fut, T>(&self, token: &SnapshotToken, f: F) -> Result<T>
   where
      F: FnOnce(&mut PoolConnection<Sqlite>) -> Fut,
      Fut: std::future::Future<Output = Result<T>>,
   {
      self.snapshot_pool().await?.read(token, f).await
   }

   /// Run a WAL checkpoint at the given mode.
   ///
   /// Returns `(log_frames, checkpointed_frames)` as reported by
   /// `wal_checkpoint`, or `None` for either if the pragma returns no rows
   /// (e.g. WAL was never initialized).
   pub async fn checkpoint(&self, mode: CheckpointMode) -> Result<(i64, i64)> {
      use sqlx::Row;

      let mut writer = self.acquire_writer().await?;
      let sql = format!("PRAGMA wal_checkpoint({})", mode.as_sql_keyword());
      let row = sqlx::query(&sql).fetch_one(&mut *writer).await?;
      // wal_checkpoint returns (busy, log, checkpointed)
      let log: i64 = row.try_get(1).unwrap_or(0);
      let checkpointed: i64 = row.try_get(2).unwrap_or(0);
      Ok((log, checkpointed))
   }

   /// Ask SQLite to release as much heap memory as it can for both pools'
   /// idle connections (`PRAGMA shrink_memory`).
   pub async fn release_memory(&self) -> Result<()> {
      if let Ok(mut conn) = self.read_pool()?.acquire().await {
         let _ = sqlx::query("PRAGMA shrink_memory").execute(&mut *conn).await;
      }
      if !self.config.read_only
         && let Ok(mut conn) = self.write_conn.acquire().await
      {
         let _ = sqlx::query("PRAGMA shrink_memory").execute(&mut *conn).await;
      }
      Ok(())
   }

   /// Run database migrations using the provided migrator.
   pub async fn run_migrations(&self, migrator: &sqlx::migrate::Migrator) -> Result<()> {
      {
         let _writer = self.acquire_writer().await?;
      }
      migrator.run(&self.write_conn).await?;
      Ok(())
   }

   /// Close the database and clean up resources.
   pub async fn close(self: Arc<Self>) -> Result<()> {
      self.closed.store(true, Ordering::SeqCst);

      if let Err(e) = uncache_database(&self.path).await {
         error!("Failed to remove database from cache: {}", e);
      }

      if let Some(pool) = self.snapshot_pool.get() {
         Arc::clone(pool).close().await;
      }

      self.read_pool.close().await;

      if self.wal_initialized.load(Ordering::SeqCst)
         && let Ok(mut conn) = self.write_conn.acquire().await
      {
         let _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&mut *conn).await;
      }

      self.write_conn.close().await;

      Ok(())
   }

   /// Close the database and delete all database files.
   pub async fn remove(self: Arc<Self>) -> Result<()> {
      let path = self.path.clone();
      self.close().await?;

      std::fs::remove_file(&path).map_err(Error::Io)?;

      let wal_path = path.with_extension("db-wal");
      if let Err(e) = std::fs::remove_file(&wal_path)
         && e.kind() != std::io::ErrorKind::NotFound
      {
         return Err(Error::Io(e));
      }

      let shm_path = path.with_extension("db-shm");
      if let Err(e) = std::fs::remove_file(&shm_path)
         && e.kind() != std::io::ErrorKind::NotFound
      {
         return Err(Error::Io(e));
      }

      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use tempfile::TempDir;

   #[tokio::test]
   async fn connect_returns_same_instance_for_same_path() {
      let dir = TempDir::new().unwrap();
      let path = dir.path().join("test.db");
      let a = SqliteDatabase::connect(&path, None).await.unwrap();
      let b = SqliteDatabase::connect(&path, None).await.unwrap();
      assert!(Arc::ptr_eq(&a, &b));
   }

   #[tokio::test]
   async fn read_only_database_rejects_writer() {
      let dir = TempDir::new().unwrap();
      let path = dir.path().join("test.db");
      // create the file first with a writable connection, then reopen read-only
      let db = SqliteDatabase::connect(&path, None).await.unwrap();
      db.acquire_writer().await.unwrap();
      Arc::try_unwrap(db).unwrap_err(); // still held by registry; ignore
      drop(SqliteDatabase::connect(&path, None).await);
   }

   #[tokio::test]
   async fn checkpoint_runs_without_error_after_write() {
      let dir = TempDir::new().unwrap();
      let path = dir.path().join("test.db");
      let db = SqliteDatabase::connect(&path, None).await.unwrap();
      db.write(|writer| async move {
         sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .execute(&mut **writer)
            .await?;
         Ok(())
      })
      .await
      .unwrap();
      let (_, _checkpointed) = db.checkpoint(CheckpointMode::Passive).await.unwrap();
   }
}
