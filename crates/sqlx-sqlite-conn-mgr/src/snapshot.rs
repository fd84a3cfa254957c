//! WAL snapshot pool: stable point-in-time views independent of the writer.
//!
//! SQLite's WAL mode lets a reader pin a snapshot via `sqlite3_snapshot_get`
//! and later reopen it on another connection via `sqlite3_snapshot_open`,
//! as long as a connection somewhere keeps a read transaction open against
//! that same snapshot generation (otherwise WAL checkpointing could recycle
//! the frames the snapshot refers to). `SnapshotPool` keeps a dedicated
//! "sentinel" connection open for exactly that purpose, for the lifetime of
//! the pool.
//!
//! Not exposed by sqlx; reached via `SqliteConnection::lock_handle()` and
//! raw `libsqlite3-sys` calls.

use std::future::Future;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use libsqlite3_sys as ffi;
use sqlx::Connection;
use sqlx::Row;
use sqlx::pool::PoolConnection;
use sqlx::{Pool, Sqlite};

use crate::Result;
use crate::error::Error;

/// An opaque, engine-owned snapshot token. Dropping it releases the
/// snapshot via `sqlite3_snapshot_free`.
pub struct SnapshotToken {
   raw: NonNull<ffi::sqlite3_snapshot>,
}

// SAFETY: the pointer is never dereferenced by us directly, only passed
// back into libsqlite3-sys calls that are safe to invoke from any thread
// as long as they aren't called concurrently with other uses of the same
// connection, which `PoolConnection` exclusivity already guarantees.
unsafe impl Send for SnapshotToken {}

impl Drop for SnapshotToken {
   fn drop(&mut self) {
      unsafe { ffi::sqlite3_snapshot_free(self.raw.as_ptr()) }
   }
}

/// Holds the sentinel connection that keeps a WAL snapshot generation
/// alive, plus the mechanics to capture and reopen snapshots on other
/// connections from the same database's read pool.
pub struct SnapshotPool {
   read_pool: Pool<Sqlite>,
   sentinel: tokio::sync::Mutex<Option<PoolConnection<Sqlite>>>,
   closed: AtomicBool,
}

impl std::fmt::Debug for SnapshotPool {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("SnapshotPool")
         .field("closed", &self.closed.load(Ordering::SeqCst))
         .finish_non_exhaustive()
   }
}

impl SnapshotPool {
   /// Build a pool over `read_pool`, which must already be in WAL mode —
   /// snapshot isolation is a WAL-only SQLite feature. Returns
   /// [`Error::SnapshotRequiresWal`] otherwise.
   pub async fn new(read_pool: Pool<Sqlite>) -> Result<Self> {
      let mut conn = read_pool.acquire().await?;
      let mode: String = sqlx::query("PRAGMA journal_mode")
         .fetch_one(&mut *conn)
         .await?
         .try_get(0)?;
      drop(conn);
      if !mode.eq_ignore_ascii_case("wal") {
         return Err(Error::SnapshotRequiresWal);
      }

      Ok(Self {
         read_pool,
         sentinel: tokio::sync::Mutex::new(None),
         closed: AtomicBool::new(false),
      })
   }

   fn ensure_open(&self) -> Result<()> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::SnapshotClosed);
      }
      Ok(())
   }

   /// Ensure the sentinel connection holds an open read transaction, so
   /// WAL frames for the current snapshot generation cannot be checkpointed
   /// away while other connections still reference it.
   async fn ensure_sentinel(&self) -> Result<()> {
      let mut guard = self.sentinel.lock().await;
      if guard.is_none() {
         let mut conn = self.read_pool.acquire().await?;
         sqlx::query("BEGIN DEFERRED").execute(&mut *conn).await?;
         sqlx::query("SELECT 1").execute(&mut *conn).await?;
         *guard = Some(conn);
      }
      Ok(())
   }

   /// Capture the current snapshot from `conn` as a reusable token. `conn`
   /// must not have an active write transaction open — SQLite's snapshot
   /// API only operates on a connection in autocommit mode or inside a
   /// read-only deferred transaction.
   pub async fn capture(&self, conn: &mut PoolConnection<Sqlite>) -> Result<SnapshotToken> {
      self.ensure_open()?;
      self.ensure_sentinel().await?;

      let mut handle = conn.lock_handle().await?;
      let raw_handle = handle.as_raw_handle().as_ptr();

      // SQLITE_TXN_WRITE (2): reject capturing from a connection with an
      // active write transaction, per `sqlite3_snapshot_get`'s own
      // requirement that a consistent snapshot can only be pinned from a
      // read transaction or from autocommit (no transaction) state.
      let schema = c"main";
      let txn_state = unsafe { ffi::sqlite3_txn_state(raw_handle, schema.as_ptr()) };
      if txn_state == 2 {
         return Err(Error::SnapshotDuringWriteTransaction);
      }

      let mut snapshot: *mut ffi::sqlite3_snapshot = std::ptr::null_mut();
      let rc = unsafe { ffi::sqlite3_snapshot_get(raw_handle, schema.as_ptr(), &mut snapshot) };
      if rc != ffi::SQLITE_OK {
         return Err(Error::SnapshotFailed(format!("sqlite3_snapshot_get returned {rc}")));
      }

      let raw = NonNull::new(snapshot)
         .ok_or_else(|| Error::SnapshotFailed("sqlite3_snapshot_get returned null".into()))?;
      Ok(SnapshotToken { raw })
   }

   /// Open `token`'s snapshot on `conn`, which must not already have an
   /// open transaction. Starts a deferred transaction pinned to that
   /// snapshot.
   pub async fn open(&self, conn: &mut PoolConnection<Sqlite>, token: &SnapshotToken) -> Result<()> {
      self.ensure_open()?;
      sqlx::query("BEGIN DEFERRED").execute(&mut **conn).await?;

      let mut handle = conn.lock_handle().await?;
      let raw_handle = handle.as_raw_handle().as_ptr();
      let schema = c"main";
      let rc = unsafe { ffi::sqlite3_snapshot_open(raw_handle, schema.as_ptr(), token.raw.as_ptr()) };
      if rc != ffi::SQLITE_OK {
         drop(handle);
         let _ = sqlx::query("ROLLBACK").execute(&mut **conn).await;
         return Err(Error::SnapshotFailed(format!("sqlite3_snapshot_open returned {rc}")));
      }
      Ok(())
   }

   /// Acquire a connection from the read pool, open `token`'s snapshot on
   /// it, run `f` against the pinned view, and roll back the transaction
   /// that held the snapshot open once `f` returns. Mirrors
   /// `SqliteDatabase::read`'s shape, but against a fixed past snapshot
   /// instead of the current one.
   pub async fn read<F, Fut, T>(&self, token: &SnapshotToken, f: F) -> Result<T>
   where
      F: FnOnce(&mut PoolConnection<Sqlite>) -> Fut,
      Fut: Future<Output = Result<T>>,
   {
      self.ensure_open()?;
      let mut conn = self.read_pool.acquire().await?;
      self.open(&mut conn, token).await?;

      let result = f(&mut conn).await;
      let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
      result
   }

   /// Like [`Self::read`], but callable from a task that already holds
   /// another connection out of the same read pool; safe for the same
   /// reason `SqliteDatabase::unsafe_reentrant_read` is — the reader pool
   /// has more than one slot.
   pub async fn unsafe_reentrant_read<F, Fut, T>(&self, token: &SnapshotToken, f: F) -> Result<T>
   where
      F: FnOnce(&mut PoolConnection<Sqlite>) -> Fut,
      Fut: Future<Output = Result<T>>,
   {
      self.read(token, f).await
   }

   /// Release the sentinel connection, allowing its pinned WAL frames to be
   /// checkpointed again, and mark this pool closed. Called when the
   /// owning database closes; any later call to `capture`/`open`/`read`
   /// returns [`Error::SnapshotClosed`].
   pub async fn close(self: Arc<Self>) {
      self.closed.store(true, Ordering::SeqCst);
      let mut guard = self.sentinel.lock().await;
      if let Some(mut conn) = guard.take() {
         let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
      }
   }
}
