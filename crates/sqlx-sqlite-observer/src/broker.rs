//! Transaction-aware observation broker for buffering and publishing changes.
//!
//! Changes are buffered during transactions (explicit and implicit) and only
//! published after successful commit. Rolled-back transactions produce no
//! notifications.
//!
//! # Data Flow
//!
//! ```text
//! preupdate_hook -> broker.buffer -> (commit_hook) -> dispatch task -> subscribers
//!                                  -> (rollback_hook) -> discard
//! ```
//!
//! `on_commit` runs synchronously on SQLite's commit-hook call stack, which
//! is itself on the writer's call stack. It only pushes the flushed batch
//! into an unbounded mpsc channel and returns immediately; a dedicated
//! background task owns turning that batch into individual broadcast sends
//! and region-filtering. This means a slow or panicking subscriber can never
//! stall the writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use sqlx_sqlite_conn_mgr::{DatabaseEvent, DatabaseRegion, EventKind, Identifier};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, trace, warn};

use crate::change::{ChangeOperation, ColumnValue, TableChange, TableInfo};
use crate::hooks::{PreUpdateEvent, SqliteValue};

/// Transaction-aware observation broker.
pub struct ObservationBroker {
   buffer: Mutex<Vec<PreUpdateEvent>>,
   change_tx: broadcast::Sender<TableChange>,
   dispatch_tx: mpsc::UnboundedSender<Vec<TableChange>>,
   observed_region: RwLock<DatabaseRegion>,
   table_info: RwLock<HashMap<String, TableInfo>>,
   capture_values: bool,
}

impl ObservationBroker {
   /// Creates a new broker with the specified broadcast channel capacity.
   /// Spawns the background dispatch task that owns re-publishing commits
   /// to `change_tx`.
   pub fn new(channel_capacity: usize, capture_values: bool) -> Arc<Self> {
      let (change_tx, _) = broadcast::channel(channel_capacity);
      let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel::<Vec<TableChange>>();

      let broker = Arc::new(Self {
         buffer: Mutex::new(Vec::new()),
         change_tx: change_tx.clone(),
         dispatch_tx,
         observed_region: RwLock::new(DatabaseRegion::empty()),
         table_info: RwLock::new(HashMap::new()),
         capture_values,
      });

      tokio::spawn(async move {
         while let Some(batch) = dispatch_rx.recv().await {
            for change in batch {
               if change_tx.send(change).is_err() {
                  trace!("no subscribers currently listening, dropping change");
               }
            }
         }
      });

      broker
   }

   /// Checks if a table intersects the observed region at all.
   pub fn is_table_observed(&self, table: &str) -> bool {
      self
         .observed_region
         .read()
         .intersection(&DatabaseRegion::table(table))
         != DatabaseRegion::Empty
   }

   /// Adds `region` to the set of observed regions.
   pub fn observe_region(&self, region: DatabaseRegion) {
      let mut observed = self.observed_region.write();
      *observed = observed.union(&region);
   }

   /// Registers a table (in full) for observation with its schema information.
   pub fn observe_table(&self, table: &str, info: TableInfo) {
      trace!(
         table = %table,
         pk_columns = ?info.pk_columns,
         without_rowid = info.without_rowid,
         "Observing table with schema info"
      );
      self.observe_region(DatabaseRegion::table(table));
      self.table_info.write().insert(table.to_string(), info);
   }

   /// Registers multiple tables (in full) for observation without schema info.
   ///
   /// Primary key extraction returns an empty `Vec` until [`set_table_info`]
   /// is called for each table.
   ///
   /// [`set_table_info`]: Self::set_table_info
   pub fn observe_tables<I, S>(&self, tables: I)
   where
      I: IntoIterator<Item = S>,
      S: AsRef<str>,
   {
      let mut region = DatabaseRegion::empty();
      for table in tables {
         trace!(table = table.as_ref(), "Observing table");
         region = region.union(&DatabaseRegion::table(table.as_ref()));
      }
      self.observe_region(region);
   }

   /// Sets the schema information for an observed table.
   pub fn set_table_info(&self, table: &str, info: TableInfo) {
      trace!(table = %table, pk_columns = ?info.pk_columns, without_rowid = info.without_rowid, "Setting table info");
      self.table_info.write().insert(table.to_string(), info);
   }

   /// Gets the schema information for an observed table.
   pub fn get_table_info(&self, table: &str) -> Option<TableInfo> {
      self.table_info.read().get(table).cloned()
   }

   /// Returns the union of all currently observed regions.
   pub fn get_observed_region(&self) -> DatabaseRegion {
      self.observed_region.read().clone()
   }

   /// Returns the names of tables with a finite region registered. A
   /// database-wide observation (the top lattice element) has no finite
   /// table list and yields an empty `Vec`.
   pub fn observed_table_names(&self) -> Vec<String> {
      match &*self.observed_region.read() {
         DatabaseRegion::Tables(map) => map.keys().map(|id| id.as_str().to_string()).collect(),
         DatabaseRegion::Empty | DatabaseRegion::Full => Vec::new(),
      }
   }

   /// Called by preupdate_hook - buffers the event for later processing.
   pub fn on_preupdate(&self, event: PreUpdateEvent) {
      trace!(
          table = %event.table,
          operation = ?event.operation,
          "Buffering preupdate event"
      );
      self.buffer.lock().push(event);
   }

   /// Called by commit_hook - hands buffered events to the dispatch task.
   ///
   /// This does no broadcast sends itself; it only converts events and
   /// enqueues the batch, keeping the commit-hook call stack short.
   pub fn on_commit(&self) {
      let events: Vec<PreUpdateEvent> = {
         let mut buffer = self.buffer.lock();
         std::mem::take(&mut *buffer)
      };

      if events.is_empty() {
         return;
      }

      debug!(count = events.len(), "Flushing buffered changes on commit");

      let mut changes = Vec::with_capacity(events.len());
      for event in events {
         match self.event_to_change(event) {
            Ok(table_change) => changes.push(table_change),
            Err(e) => error!(error = %e, "Failed to convert event to change"),
         }
      }

      if self.dispatch_tx.send(changes).is_err() {
         warn!("dispatch task is gone; dropping committed changes");
      }
   }

   /// Called by rollback_hook - discards all buffered events.
   pub fn on_rollback(&self) {
      let count = {
         let mut buffer = self.buffer.lock();
         let count = buffer.len();
         buffer.clear();
         count
      };

      if count > 0 {
         debug!(count, "Discarding buffered changes on rollback");
      }
   }

   /// Subscribes to all observed changes.
   pub fn subscribe(&self) -> broadcast::Receiver<TableChange> {
      self.change_tx.subscribe()
   }

   /// Whether `change` intersects `region`, for per-subscriber filtering on
   /// top of the broker-wide observed region.
   pub fn change_intersects(region: &DatabaseRegion, change: &TableChange) -> bool {
      let kind = match change.operation {
         Some(ChangeOperation::Insert) => EventKind::Insert,
         Some(ChangeOperation::Update) => EventKind::Update,
         Some(ChangeOperation::Delete) => EventKind::Delete,
         None => EventKind::Update,
      };
      region.intersects_event(&DatabaseEvent {
         kind,
         table: Some(Identifier::new(&change.table)),
         rowid: change.rowid.unwrap_or(0),
      })
   }

   fn event_to_change(&self, event: PreUpdateEvent) -> crate::Result<TableChange> {
      let table_info = self.table_info.read().get(&event.table).cloned();

      // For WITHOUT ROWID tables, the rowid from preupdate hook is not meaningful
      let rowid = match &table_info {
         Some(info) if info.without_rowid => None,
         _ => match event.operation {
            ChangeOperation::Insert => Some(event.new_rowid),
            ChangeOperation::Delete => Some(event.old_rowid),
            ChangeOperation::Update => Some(event.new_rowid),
         },
      };

      let primary_key = self.extract_primary_key(&event, table_info.as_ref())?;

      let (old_values, new_values) = if self.capture_values {
         (
            event.old_values.map(Self::values_to_vec),
            event.new_values.map(Self::values_to_vec),
         )
      } else {
         (None, None)
      };

      Ok(TableChange {
         table: event.table,
         operation: Some(event.operation),
         rowid,
         primary_key,
         old_values,
         new_values,
         timestamp: Instant::now(),
      })
   }

   fn extract_primary_key(
      &self,
      event: &PreUpdateEvent,
      table_info: Option<&TableInfo>,
   ) -> crate::Result<Vec<ColumnValue>> {
      let Some(info) = table_info else {
         return Ok(Vec::new());
      };

      if info.pk_columns.is_empty() {
         return Ok(Vec::new());
      }

      let values = match event.operation {
         ChangeOperation::Delete => event.old_values.as_ref(),
         ChangeOperation::Insert | ChangeOperation::Update => event.new_values.as_ref(),
      };

      let Some(values) = values else {
         return Ok(Vec::new());
      };

      let mut pk_values = Vec::with_capacity(info.pk_columns.len());
      for &idx in &info.pk_columns {
         match values.get(idx) {
            Some(v) => pk_values.push(v.clone().into()),
            None => {
               return Err(crate::Error::SchemaMismatch {
                  table: event.table.clone(),
                  expected: info.pk_columns.len(),
                  actual: values.len(),
               });
            }
         }
      }
      Ok(pk_values)
   }

   fn values_to_vec(values: Vec<SqliteValue>) -> Vec<ColumnValue> {
      values.into_iter().map(Into::into).collect()
   }
}

impl std::fmt::Debug for ObservationBroker {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ObservationBroker")
         .field("buffer_len", &self.buffer.lock().len())
         .finish()
   }
}

/// Queries `sqlite_master`/`pragma_table_info` to build a [`TableInfo`] for
/// `table`, used to resolve primary-key columns and WITHOUT ROWID status the
/// first time a table is observed.
pub async fn query_table_info(
   conn: &mut sqlx::SqliteConnection,
   table: &str,
) -> crate::Result<Option<TableInfo>> {
   use sqlx::Row;

   let schema_row: Option<(String,)> =
      sqlx::query_as("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
         .bind(table)
         .fetch_optional(&mut *conn)
         .await?;

   let Some((create_sql,)) = schema_row else {
      return Ok(None);
   };

   let without_rowid = create_sql.to_ascii_uppercase().trim_end().ends_with("WITHOUT ROWID");

   let pragma_sql = format!("PRAGMA table_info({table})");
   let rows = sqlx::query(&pragma_sql).fetch_all(&mut *conn).await?;

   let mut column_names = Vec::with_capacity(rows.len());
   let mut pk_columns = Vec::new();
   for (idx, row) in rows.iter().enumerate() {
      let name: String = row.try_get("name")?;
      let pk: i64 = row.try_get("pk")?;
      if pk > 0 {
         pk_columns.push(idx);
      }
      column_names.push(name);
   }

   Ok(Some(TableInfo {
      pk_columns,
      without_rowid,
      column_names,
   }))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[tokio::test]
   async fn observed_region_covers_registered_table() {
      let broker = ObservationBroker::new(16, true);
      broker.observe_tables(["users"]);
      assert!(broker.is_table_observed("users"));
      assert!(!broker.is_table_observed("orders"));
   }

   #[tokio::test]
   async fn rollback_discards_buffered_events_without_publishing() {
      let broker = ObservationBroker::new(16, true);
      broker.observe_tables(["users"]);
      let mut rx = broker.subscribe();

      broker.on_preupdate(PreUpdateEvent {
         table: "users".into(),
         operation: ChangeOperation::Insert,
         old_rowid: 0,
         new_rowid: 1,
         old_values: None,
         new_values: Some(vec![SqliteValue::Integer(1)]),
      });
      broker.on_rollback();

      let result = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await;
      assert!(result.is_err(), "no change should have been published after rollback");
   }

   #[tokio::test]
   async fn commit_publishes_buffered_events_via_dispatch_task() {
      let broker = ObservationBroker::new(16, true);
      broker.observe_tables(["users"]);
      let mut rx = broker.subscribe();

      broker.on_preupdate(PreUpdateEvent {
         table: "users".into(),
         operation: ChangeOperation::Insert,
         old_rowid: 0,
         new_rowid: 1,
         old_values: None,
         new_values: Some(vec![SqliteValue::Integer(1)]),
      });
      broker.on_commit();

      let change = rx.recv().await.unwrap();
      assert_eq!(change.table, "users");
      assert_eq!(change.rowid, Some(1));
   }
}
