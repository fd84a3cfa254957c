//! WriteGuard for exclusive write access to the database

use sqlx::Sqlite;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteConnection;
use std::ops::{Deref, DerefMut};

use crate::executor::ExecutorGuard;

/// RAII guard for exclusive write access to a database connection
///
/// This guard wraps a pool connection and returns it to the pool on drop.
/// Only one `WriteGuard` can exist at a time (enforced by max_connections=1),
/// ensuring serialized write access. Also carries the reentrancy-tracking
/// [`ExecutorGuard`] so a second acquisition on the same task panics instead
/// of deadlocking against its own held connection.
///
/// The guard derefs to `SqliteConnection` allowing direct use with sqlx queries.
#[derive(Debug)]
pub struct WriteGuard {
   conn: PoolConnection<Sqlite>,
   _executor: ExecutorGuard,
}

impl WriteGuard {
   /// Create a new WriteGuard by taking ownership of a pool connection
   pub(crate) fn new(conn: PoolConnection<Sqlite>, executor: ExecutorGuard) -> Self {
      Self {
         conn,
         _executor: executor,
      }
   }
}

impl Deref for WriteGuard {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

impl DerefMut for WriteGuard {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.conn
   }
}

// Drop is automatically implemented - PoolConnection and ExecutorGuard both
// clean themselves up, conn returning to the pool and executor releasing
// its reentrancy tracking slot.

// WriteGuard is automatically Send because PoolConnection<Sqlite> is Send
