//! Observable database: layers change notifications on top of a
//! connection-manager [`SqliteDatabase`].
//!
//! Uses SQLite's native hooks for change detection. Table schema (primary
//! key columns, WITHOUT ROWID status) is resolved lazily against the
//! database's read pool the first time a table is observed.

use std::sync::Arc;

use sqlx_sqlite_conn_mgr::SqliteDatabase;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::Result;
use crate::broker::{ObservationBroker, query_table_info};
use crate::change::TableChange;
use crate::config::ObserverConfig;
use crate::connection::ObservableWriteGuard;

/// Layers change notifications on top of a [`SqliteDatabase`].
///
/// Uses SQLite's native preupdate_hook, commit_hook, and rollback_hook for
/// change detection. Changes are buffered during transactions and only
/// published to subscribers after successful commit. Rolled-back
/// transactions produce no notifications.
///
/// # SQLite Version Requirements
///
/// Requires SQLite library compiled with `SQLITE_ENABLE_PREUPDATE_HOOK`.
pub struct ObservableSqliteDatabase {
   db: Arc<SqliteDatabase>,
   broker: Arc<ObservationBroker>,
   config: ObserverConfig,
}

impl ObservableSqliteDatabase {
   /// Wraps `db` with observation for the tables named in `config`.
   pub fn new(db: Arc<SqliteDatabase>, config: ObserverConfig) -> Self {
      let broker = ObservationBroker::new(config.channel_capacity, config.capture_values);

      if !config.tables.is_empty() {
         broker.observe_tables(config.tables.iter().map(String::as_str));
      }
      if let Some(ref region) = config.region {
         broker.observe_region(region.clone());
      }

      Self { db, broker, config }
   }

   /// Subscribes to change notifications for the specified tables.
   ///
   /// If additional tables are provided, they will be added to the observed set.
   /// Returns a broadcast receiver that will receive `TableChange` events
   /// after transactions commit.
   pub fn subscribe<I, S>(&self, tables: I) -> broadcast::Receiver<TableChange>
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      let tables: Vec<String> = tables.into_iter().map(Into::into).collect();
      if !tables.is_empty() {
         self.broker.observe_tables(tables.iter().map(String::as_str));
      }
      self.broker.subscribe()
   }

   /// Subscribes to change notifications as a Stream.
   ///
   /// Returns a `TableChangeStream` that implements `futures::Stream`.
   /// If tables are specified, the stream only yields changes whose region
   /// intersects them, via the same [`DatabaseRegion`] algebra the broker
   /// itself tracks its observed set with.
   pub fn subscribe_stream<I, S>(&self, tables: I) -> crate::stream::TableChangeStream
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      use crate::stream::TableChangeStreamExt;
      use sqlx_sqlite_conn_mgr::DatabaseRegion;

      let tables: Vec<String> = tables.into_iter().map(Into::into).collect();
      if tables.is_empty() {
         return self.broker.subscribe().into_stream();
      }

      let region = tables
         .iter()
         .fold(DatabaseRegion::empty(), |acc, t| acc.union(&DatabaseRegion::table(t)));
      self.broker.observe_region(region.clone());
      self.broker.subscribe().into_stream().filter_region(region)
   }

   /// Acquires the writer with observation hooks and the statement
   /// authorizer registered.
   ///
   /// On first acquisition for each observed table, queries the schema to
   /// determine primary key columns and WITHOUT ROWID status.
   pub async fn acquire_writer(&self) -> Result<ObservableWriteGuard> {
      self.ensure_table_info().await?;

      let writer = self
         .db
         .acquire_writer()
         .await
         .map_err(crate::Error::ConnMgr)?;
      let mut observable = ObservableWriteGuard::new(writer, Arc::clone(&self.broker));
      observable.register_hooks().await?;
      debug!("Acquired observable writer with hooks registered");
      Ok(observable)
   }

   /// Ensures `TableInfo` is set for all observed tables, querying the read
   /// pool for any that are missing it.
   async fn ensure_table_info(&self) -> Result<()> {
      let observed = self.broker.observed_table_names();
      if observed.is_empty() {
         return Ok(());
      }

      let pool = self.db.read_pool().map_err(crate::Error::ConnMgr)?;
      let mut conn = pool.acquire().await.map_err(|_| crate::Error::PoolAcquire)?;

      for table in observed {
         if self.broker.get_table_info(&table).is_none() {
            match query_table_info(&mut conn, &table).await {
               Ok(Some(info)) => {
                  debug!(table = %table, pk_columns = ?info.pk_columns, without_rowid = info.without_rowid, "Queried table info");
                  self.broker.set_table_info(&table, info);
               }
               Ok(None) => {
                  warn!(table = %table, "Table not found in schema");
               }
               Err(e) => {
                  warn!(table = %table, error = %e, "Failed to query table info");
               }
            }
         }
      }

      Ok(())
   }

   /// Acquires the writer and registers additional tables for observation.
   ///
   /// The specified tables are added to the observed set before acquiring.
   pub async fn acquire_writer_observing(&self, tables: &[&str]) -> Result<ObservableWriteGuard> {
      self.broker.observe_tables(tables.iter().copied());
      self.acquire_writer().await
   }

   /// Returns the wrapped database.
   pub fn database(&self) -> &Arc<SqliteDatabase> {
      &self.db
   }

   /// Returns a reference to the observer configuration.
   pub fn config(&self) -> &ObserverConfig {
      &self.config
   }

   /// Returns a list of tables currently being observed.
   pub fn observed_tables(&self) -> Vec<String> {
      self.broker.observed_table_names()
   }

   /// Returns a reference to the underlying observation broker.
   pub fn broker(&self) -> &Arc<ObservationBroker> {
      &self.broker
   }
}

impl Clone for ObservableSqliteDatabase {
   fn clone(&self) -> Self {
      Self {
         db: Arc::clone(&self.db),
         broker: Arc::clone(&self.broker),
         config: self.config.clone(),
      }
   }
}
