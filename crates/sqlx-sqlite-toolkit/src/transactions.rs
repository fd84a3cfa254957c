//! Transaction management for interruptible transactions.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::{Column, Row};
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::wrapper::WriterGuard;
use crate::{Error, Result, WriteQueryResult};

/// Wrapper around the writer a transaction runs on, so the rest of this
/// module doesn't need to know whether it's observable or plain.
pub enum TransactionWriter {
   Writer(WriterGuard),
}

impl From<WriterGuard> for TransactionWriter {
   fn from(guard: WriterGuard) -> Self {
      Self::Writer(guard)
   }
}

impl TransactionWriter {
   pub(crate) async fn execute_query<'a>(
      &mut self,
      query: sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
   ) -> Result<sqlx::sqlite::SqliteQueryResult> {
      match self {
         Self::Writer(w) => query.execute(&mut **w).await.map_err(Into::into),
      }
   }

   pub(crate) async fn fetch_all<'a>(
      &mut self,
      query: sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
   ) -> Result<Vec<sqlx::sqlite::SqliteRow>> {
      match self {
         Self::Writer(w) => query.fetch_all(&mut **w).await.map_err(Into::into),
      }
   }

   pub(crate) async fn begin_immediate(&mut self) -> Result<()> {
      self.execute_query(sqlx::query("BEGIN IMMEDIATE")).await?;
      Ok(())
   }

   pub(crate) async fn commit(&mut self) -> Result<()> {
      self.execute_query(sqlx::query("COMMIT")).await?;
      Ok(())
   }

   pub(crate) async fn rollback(&mut self) -> Result<()> {
      self.execute_query(sqlx::query("ROLLBACK")).await?;
      Ok(())
   }
}

/// Holds a writer and the transaction metadata needed to continue, read
/// from, commit, or roll it back across multiple calls.
#[must_use = "if unused, the transaction is immediately rolled back"]
pub struct ActiveInterruptibleTransaction {
   db_path: String,
   transaction_id: String,
   writer: Option<TransactionWriter>,
}

impl ActiveInterruptibleTransaction {
   pub fn new(db_path: String, transaction_id: String, writer: TransactionWriter) -> Self {
      Self {
         db_path,
         transaction_id,
         writer: Some(writer),
      }
   }

   fn writer_mut(&mut self) -> Result<&mut TransactionWriter> {
      self.writer.as_mut().ok_or(Error::TransactionAlreadyFinalized)
   }

   fn take_writer(&mut self) -> Result<TransactionWriter> {
      self.writer.take().ok_or(Error::TransactionAlreadyFinalized)
   }

   pub fn db_path(&self) -> &str {
      &self.db_path
   }

   pub fn transaction_id(&self) -> &str {
      &self.transaction_id
   }

   pub fn validate_token(&self, token_id: &str) -> Result<()> {
      if self.transaction_id != token_id {
         return Err(Error::InvalidTransactionToken);
      }
      Ok(())
   }

   /// Runs a read query against the uncommitted transaction state.
   pub async fn read(
      &mut self,
      query: String,
      values: Vec<JsonValue>,
   ) -> Result<Vec<IndexMap<String, JsonValue>>> {
      let mut q = sqlx::query(&query);
      for value in values {
         q = crate::wrapper::bind_value(q, value);
      }

      let rows = self.writer_mut()?.fetch_all(q).await?;

      let mut results = Vec::new();
      for row in rows {
         let mut value = IndexMap::default();
         for (i, column) in row.columns().iter().enumerate() {
            let v = row.try_get_raw(i)?;
            let v = crate::decode::to_json(v)?;
            value.insert(column.name().to_string(), v);
         }
         results.push(value);
      }

      Ok(results)
   }

   /// Executes further statements against this transaction.
   ///
   /// Accepts either `Statement` values or `(&str, Vec<JsonValue>)` tuples.
   pub async fn continue_with<S: Into<Statement>, I: IntoIterator<Item = S>>(
      &mut self,
      statements: I,
   ) -> Result<Vec<WriteQueryResult>> {
      let mut results = Vec::new();
      let writer = self.writer_mut()?;
      for statement in statements {
         let statement = statement.into();
         let mut q = sqlx::query(&statement.query);
         for value in statement.values {
            q = crate::wrapper::bind_value(q, value);
         }
         let exec_result = writer.execute_query(q).await?;
         results.push(WriteQueryResult {
            rows_affected: exec_result.rows_affected(),
            last_insert_id: exec_result.last_insert_rowid(),
         });
      }
      Ok(results)
   }

   pub async fn commit(mut self) -> Result<()> {
      let mut writer = self.take_writer()?;
      writer.commit().await?;

      debug!("transaction committed for db: {}", self.db_path);
      Ok(())
   }

   pub async fn rollback(mut self) -> Result<()> {
      let mut writer = self.take_writer()?;
      writer.rollback().await?;

      debug!("transaction rolled back for db: {}", self.db_path);
      Ok(())
   }
}

/// Statement run within a transaction: a query plus its bind values.
#[derive(Debug, Deserialize)]
pub struct Statement {
   pub query: String,
   pub values: Vec<JsonValue>,
}

impl From<(&str, Vec<JsonValue>)> for Statement {
   fn from((query, values): (&str, Vec<JsonValue>)) -> Self {
      Self {
         query: query.to_string(),
         values,
      }
   }
}

impl From<(String, Vec<JsonValue>)> for Statement {
   fn from((query, values): (String, Vec<JsonValue>)) -> Self {
      Self { query, values }
   }
}

impl Drop for ActiveInterruptibleTransaction {
   fn drop(&mut self) {
      // SQLite auto-rolls-back on connection return if COMMIT was never issued.
      if self.writer.is_some() {
         debug!(
            "dropping transaction for db: {}, tx_id: {} (will auto-rollback)",
            self.db_path, self.transaction_id
         );
      }
   }
}

/// Tracks all active interruptible transactions, keyed by database path.
#[derive(Clone, Default)]
pub struct ActiveInterruptibleTransactions(Arc<RwLock<HashMap<String, ActiveInterruptibleTransaction>>>);

impl ActiveInterruptibleTransactions {
   pub async fn insert(&self, db_path: String, tx: ActiveInterruptibleTransaction) -> Result<()> {
      use std::collections::hash_map::Entry;
      let mut txs = self.0.write().await;

      match txs.entry(db_path.clone()) {
         Entry::Vacant(e) => {
            e.insert(tx);
            Ok(())
         }
         Entry::Occupied(_) => Err(Error::TransactionAlreadyActive(db_path)),
      }
   }

   pub async fn abort_all(&self) {
      let mut txs = self.0.write().await;
      debug!("aborting {} active interruptible transaction(s)", txs.len());
      txs.clear();
   }

   /// Removes and returns the transaction for commit/rollback, after
   /// validating the caller's token.
   pub async fn remove(&self, db_path: &str, token_id: &str) -> Result<ActiveInterruptibleTransaction> {
      let mut txs = self.0.write().await;

      let tx = txs
         .get(db_path)
         .ok_or_else(|| Error::NoActiveTransaction(db_path.to_string()))?;

      tx.validate_token(token_id)?;

      Ok(txs.remove(db_path).unwrap())
   }
}

/// Tracks in-flight regular (non-interruptible) transactions so they can be
/// aborted together, e.g. on shutdown.
#[derive(Clone, Default)]
pub struct ActiveRegularTransactions(Arc<RwLock<HashMap<String, AbortHandle>>>);

impl ActiveRegularTransactions {
   pub async fn insert(&self, key: String, abort_handle: AbortHandle) {
      let mut txs = self.0.write().await;
      txs.insert(key, abort_handle);
   }

   pub async fn remove(&self, key: &str) {
      let mut txs = self.0.write().await;
      txs.remove(key);
   }

   pub async fn abort_all(&self) {
      let mut txs = self.0.write().await;
      debug!("aborting {} active regular transaction(s)", txs.len());

      for (key, abort_handle) in txs.iter() {
         debug!("aborting regular transaction: {}", key);
         abort_handle.abort();
      }

      txs.clear();
   }
}

/// Aborts every tracked transaction, interruptible and regular alike.
pub async fn cleanup_all_transactions(
   interruptible: &ActiveInterruptibleTransactions,
   regular: &ActiveRegularTransactions,
) {
   debug!("cleaning up all active transactions");
   interruptible.abort_all().await;
   regular.abort_all().await;
}
