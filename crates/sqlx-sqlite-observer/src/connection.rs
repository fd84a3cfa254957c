//! Observable writer guard with SQLite hook and authorizer integration.
//!
//! Wraps a connection-manager [`WriteGuard`] and layers SQLite's native
//! preupdate/commit/rollback hooks plus the compile-time authorizer on top
//! of it, so that write statements executed through the returned guard are
//! tracked by an [`ObservationBroker`] without the caller doing anything
//! extra.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use libsqlite3_sys::sqlite3;
use sqlx::sqlite::SqliteConnection;
use sqlx_sqlite_conn_mgr::WriteGuard;
use tracing::{debug, trace};

use crate::Result;
use crate::authorizer::{self, AuthorizerHandle};
use crate::broker::ObservationBroker;
use crate::hooks;

/// A write guard that publishes table changes through an [`ObservationBroker`]
/// as statements execute and commit.
///
/// Derefs to `SqliteConnection`, so it can be used anywhere a regular
/// [`WriteGuard`] would be (`sqlx::query(..).execute(&mut *guard)`).
pub struct ObservableWriteGuard {
   inner: Option<WriteGuard>,
   broker: Arc<ObservationBroker>,
   hooks_registered: bool,
   authorizer: Option<AuthorizerHandle>,
   /// Raw handle cached at registration time so `Drop` can unregister
   /// synchronously without needing the async `lock_handle()` call again.
   raw_db: Option<*mut sqlite3>,
}

// SAFETY: raw_db is only read/written from the owning task, and the
// underlying WriteGuard is already Send.
unsafe impl Send for ObservableWriteGuard {}

impl ObservableWriteGuard {
   pub(crate) fn new(inner: WriteGuard, broker: Arc<ObservationBroker>) -> Self {
      Self {
         inner: Some(inner),
         broker,
         hooks_registered: false,
         authorizer: None,
         raw_db: None,
      }
   }

   fn inner_mut(&mut self) -> &mut WriteGuard {
      self.inner.as_mut().expect("write guard already taken")
   }

   fn inner_ref(&self) -> &WriteGuard {
      self.inner.as_ref().expect("write guard already taken")
   }

   /// Registers the preupdate/commit/rollback hooks and the statement
   /// authorizer on the underlying connection. Idempotent.
   pub async fn register_hooks(&mut self) -> Result<()> {
      if self.hooks_registered {
         return Ok(());
      }

      debug!("Registering SQLite observation hooks on writer");

      let broker = Arc::clone(&self.broker);
      let guard = self.inner.as_mut().expect("write guard already taken");
      let mut handle = guard
         .lock_handle()
         .await
         .map_err(|e| crate::Error::Database(format!("Failed to lock connection handle: {e}")))?;
      let db: *mut sqlite3 = handle.as_raw_handle().as_ptr();

      unsafe {
         hooks::register_hooks(db, Arc::clone(&broker))?;
      }

      let broker_for_authorizer = Arc::clone(&broker);
      let authorizer_handle = unsafe {
         authorizer::register_authorizer(db, move |table| broker_for_authorizer.is_table_observed(table))?
      };

      self.authorizer = Some(authorizer_handle);
      self.raw_db = Some(db);
      self.hooks_registered = true;
      Ok(())
   }

   /// Consumes this guard and returns the plain [`WriteGuard`], unregistering
   /// hooks first so the pooled connection is safe to reuse unobserved.
   pub fn into_inner(mut self) -> WriteGuard {
      self.teardown_hooks();
      self.inner.take().expect("write guard already taken")
   }

   fn teardown_hooks(&mut self) {
      if self.hooks_registered
         && let Some(db) = self.raw_db.take()
      {
         unsafe {
            if let Some(authorizer) = self.authorizer.take() {
               authorizer.unregister(db);
            }
            hooks::unregister_hooks(db);
         }
         trace!("ObservableWriteGuard hooks unregistered");
      }
      self.hooks_registered = false;
   }
}

impl Drop for ObservableWriteGuard {
   fn drop(&mut self) {
      self.teardown_hooks();
   }
}

impl Deref for ObservableWriteGuard {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      self.inner_ref()
   }
}

impl DerefMut for ObservableWriteGuard {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self.inner_mut()
   }
}

impl AsRef<SqliteConnection> for ObservableWriteGuard {
   fn as_ref(&self) -> &SqliteConnection {
      self.inner_ref()
   }
}

impl AsMut<SqliteConnection> for ObservableWriteGuard {
   fn as_mut(&mut self) -> &mut SqliteConnection {
      self.inner_mut()
   }
}
