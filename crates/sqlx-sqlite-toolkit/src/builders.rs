//! Query builders for fetch and write operations.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::{Column, Row};

use crate::Error;
use crate::args::{Scalar, StatementArguments, extract_bindings};
use crate::wrapper::{DatabaseWrapper, WriteQueryResult, bind_value};

fn bind_scalar<'a>(
   query: sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
   value: Scalar,
) -> sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>> {
   match value {
      Scalar::Null => query.bind(None::<JsonValue>),
      Scalar::Int(i) => query.bind(i),
      Scalar::Real(r) => query.bind(r),
      Scalar::Text(s) => query.bind(s),
      Scalar::Blob(b) => query.bind(b),
   }
}

/// Builder for SELECT queries returning multiple rows.
pub struct FetchAllBuilder {
   db: Arc<sqlx_sqlite_conn_mgr::SqliteDatabase>,
   query: String,
   values: Vec<JsonValue>,
}

impl FetchAllBuilder {
   pub(crate) fn new(
      db: Arc<sqlx_sqlite_conn_mgr::SqliteDatabase>,
      query: String,
      values: Vec<JsonValue>,
   ) -> Self {
      Self { db, query, values }
   }

   /// Executes the query and returns all matching rows.
   pub async fn execute(self) -> Result<Vec<IndexMap<String, JsonValue>>, Error> {
      let pool = self.db.read_pool()?;
      let mut q = sqlx::query(&self.query);
      for value in self.values {
         q = bind_value(q, value);
      }
      let rows = q.fetch_all(pool).await?;
      decode_rows(rows)
   }
}

impl IntoFuture for FetchAllBuilder {
   type Output = Result<Vec<IndexMap<String, JsonValue>>, Error>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.execute())
   }
}

/// Builder for SELECT queries returning zero or one row.
pub struct FetchOneBuilder {
   db: Arc<sqlx_sqlite_conn_mgr::SqliteDatabase>,
   query: String,
   values: Vec<JsonValue>,
}

impl FetchOneBuilder {
   pub(crate) fn new(
      db: Arc<sqlx_sqlite_conn_mgr::SqliteDatabase>,
      query: String,
      values: Vec<JsonValue>,
   ) -> Self {
      Self { db, query, values }
   }

   /// Executes the query and returns zero or one row.
   pub async fn execute(self) -> Result<Option<IndexMap<String, JsonValue>>, Error> {
      let pool = self.db.read_pool()?;
      let mut q = sqlx::query(&self.query);
      for value in self.values {
         q = bind_value(q, value);
      }
      let rows = q.fetch_all(pool).await?;

      match rows.len() {
         0 => Ok(None),
         1 => {
            let decoded = decode_rows(vec![rows.into_iter().next().unwrap()])?;
            Ok(Some(decoded.into_iter().next().unwrap()))
         }
         count => Err(Error::MultipleRowsReturned(count)),
      }
   }
}

impl IntoFuture for FetchOneBuilder {
   type Output = Result<Option<IndexMap<String, JsonValue>>, Error>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.execute())
   }
}

/// Builder for write queries (INSERT/UPDATE/DELETE).
pub struct ExecuteBuilder {
   db: DatabaseWrapper,
   query: String,
   values: Vec<JsonValue>,
}

impl ExecuteBuilder {
   pub(crate) fn new(db: DatabaseWrapper, query: String, values: Vec<JsonValue>) -> Self {
      Self { db, query, values }
   }

   /// Executes the write operation.
   ///
   /// Routes through the observer when observation is enabled, so the
   /// change is tracked like any other write made through [`DatabaseWrapper::acquire_writer`].
   pub async fn execute(self) -> Result<WriteQueryResult, Error> {
      let mut writer = self.db.acquire_writer().await?;
      let mut q = sqlx::query(&self.query);
      for value in self.values {
         q = bind_value(q, value);
      }
      let result = q.execute(&mut *writer).await?;
      Ok(WriteQueryResult {
         rows_affected: result.rows_affected(),
         last_insert_id: result.last_insert_rowid(),
      })
   }
}

impl IntoFuture for ExecuteBuilder {
   type Output = Result<WriteQueryResult, Error>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.execute())
   }
}

/// Builder for lazy, streaming row cursors built on [`StatementArguments`].
///
/// Unlike [`FetchAllBuilder`], this does not materialize the result set:
/// `stream()` returns a `Stream` backed directly by sqlx's `fetch`, so rows
/// are decoded to JSON one at a time as the caller polls for the next one.
pub struct FetchCursorBuilder {
   db: Arc<sqlx_sqlite_conn_mgr::SqliteDatabase>,
   query: String,
   args: StatementArguments,
}

impl FetchCursorBuilder {
   pub(crate) fn new(
      db: Arc<sqlx_sqlite_conn_mgr::SqliteDatabase>,
      query: String,
      args: StatementArguments,
   ) -> Self {
      Self { db, query, args }
   }

   /// Opens the cursor against the read pool.
   ///
   /// Rows are not restartable: once the returned stream is dropped mid
   /// iteration, resuming requires calling `stream()` again from scratch.
   pub async fn stream(
      self,
   ) -> Result<Pin<Box<dyn Stream<Item = Result<IndexMap<String, JsonValue>, Error>> + Send>>, Error>
   {
      let bound = extract_bindings(&self.query, &self.args)?;
      let pool = self.db.read_pool()?.clone();

      let stream = async_stream::try_stream! {
         let mut q = sqlx::query(&self.query);
         for value in bound {
            q = bind_scalar(q, value);
         }
         let mut rows = q.fetch(&pool);
         while let Some(row) = rows.next().await {
            let row = row?;
            yield decode_row(&row)?;
         }
      };

      Ok(Box::pin(stream))
   }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<IndexMap<String, JsonValue>, Error> {
   let mut value = IndexMap::default();
   for (i, column) in row.columns().iter().enumerate() {
      let raw = row.try_get_raw(i)?;
      value.insert(column.name().to_string(), crate::decode::to_json(raw)?);
   }
   Ok(value)
}

fn decode_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<IndexMap<String, JsonValue>>, Error> {
   rows.iter().map(decode_row).collect()
}
