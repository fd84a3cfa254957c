//! Error types for sqlx-sqlite-conn-mgr

use thiserror::Error;

/// Errors that may occur when working with sqlx-sqlite-conn-mgr
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Migration error from the sqlx migrate framework
   #[error("Migration error: {0}")]
   Migration(#[from] sqlx::migrate::MigrateError),

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,

   /// Called `acquire_writer`/`write` on a database opened with `read_only: true`
   #[error("Database was opened read-only and cannot accept writes")]
   ReadOnlyDatabase,

   /// The database's journal mode is not WAL, so a snapshot cannot be opened
   #[error("Snapshot support requires WAL journal mode")]
   SnapshotRequiresWal,

   /// `sqlite3_snapshot_get`/`sqlite3_snapshot_open` failed at the engine level
   #[error("Snapshot operation failed: {0}")]
   SnapshotFailed(String),

   /// A snapshot was requested while a write transaction was open on the
   /// connection taking it; SQLite's snapshot API forbids this.
   #[error("Cannot open a snapshot from inside an active write transaction")]
   SnapshotDuringWriteTransaction,

   /// Called a method on a `SnapshotPool` after `close()`.
   #[error("MISUSE: connection is closed")]
   SnapshotClosed,
}
