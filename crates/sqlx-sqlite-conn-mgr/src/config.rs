//! Configuration for SQLite database connection pools

use serde::{Deserialize, Serialize};

/// How a write transaction acquires its initial lock.
///
/// `Immediate` (the default) takes the write lock up front, avoiding the
/// classic SQLite upgrade deadlock where two connections both start with
/// `BEGIN DEFERRED`, read, and then race to upgrade to a write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
   Deferred,
   #[default]
   Immediate,
   Exclusive,
}

impl TransactionKind {
   pub fn begin_sql(self) -> &'static str {
      match self {
         Self::Deferred => "BEGIN DEFERRED",
         Self::Immediate => "BEGIN IMMEDIATE",
         Self::Exclusive => "BEGIN EXCLUSIVE",
      }
   }
}

/// Configuration for SqliteDatabase connection pools
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_conn_mgr::SqliteDatabaseConfig;
///
/// // Use defaults
/// let config = SqliteDatabaseConfig::default();
///
/// // Override just one field
/// let config = SqliteDatabaseConfig {
///     max_read_connections: 3,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteDatabaseConfig {
   /// Maximum number of concurrent read connections
   ///
   /// This controls the size of the read-only connection pool.
   /// Higher values allow more concurrent read queries but consume more resources.
   ///
   /// Default: 6
   pub max_read_connections: u32,

   /// Idle timeout for both read and write connections (in seconds)
   ///
   /// Connections that remain idle for this duration will be closed automatically.
   /// This helps prevent resource exhaustion from idle threads.
   ///
   /// Default: 30
   pub idle_timeout_secs: u64,

   /// Open the database without ever acquiring a writer. Attempting to call
   /// `acquire_writer`/`write` on a `read_only` database returns an error
   /// instead of blocking forever waiting on a write pool that was never
   /// opened for write access.
   ///
   /// Default: false
   pub read_only: bool,

   /// `busy_timeout` applied to every connection (reader and writer), in
   /// milliseconds. SQLite's own retry loop for `SQLITE_BUSY`.
   ///
   /// Default: 5000
   pub busy_timeout_ms: u32,

   /// The transaction mode `write`/`execute_transaction` begins with.
   ///
   /// Default: `Immediate`
   pub default_transaction_kind: TransactionKind,

   /// Allow a task to reenter a read it already holds via
   /// `unsafe_reentrant_read`. When false, any such reentrant call panics
   /// instead of deadlocking silently.
   ///
   /// Default: false
   pub allows_unsafe_transactions: bool,
}

impl Default for SqliteDatabaseConfig {
   fn default() -> Self {
      Self {
         max_read_connections: 6,
         idle_timeout_secs: 30,
         read_only: false,
         busy_timeout_ms: 5_000,
         default_transaction_kind: TransactionKind::Immediate,
         allows_unsafe_transactions: false,
      }
   }
}
