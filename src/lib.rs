//! Safe, concurrent access to an embedded SQLite database.
//!
//! This crate is a thin facade over the workspace's three layers:
//!
//! - [`sqlx_sqlite_conn_mgr`] — the single-writer/many-reader pool on WAL,
//!   snapshot reads, and migrations.
//! - [`sqlx_sqlite_observer`] — change notifications derived from SQLite's
//!   native hooks, scoped by the region a reader actually depends on.
//! - [`sqlx_sqlite_toolkit`] — the application-facing API: builders,
//!   transactions, statement argument binding, and JSON decoding.
//!
//! Most applications only need [`DatabaseWrapper`].
//!
//! # Example
//!
//! ```no_run
//! use sqlx_sqlite_access::DatabaseWrapper;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseWrapper::connect(std::path::Path::new("mydb.db"), None).await?;
//!
//! db.execute("INSERT INTO users (name) VALUES (?)".into(), vec![json!("Alice")]).await?;
//! let rows = db.fetch_all("SELECT * FROM users".into(), vec![]).await?;
//!
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

pub use sqlx_sqlite_conn_mgr::{
   Migrator, SnapshotPool, SnapshotToken, SqliteDatabase, SqliteDatabaseConfig,
};
pub use sqlx_sqlite_observer::{
   ChangeOperation, ColumnValue, ObservableSqliteDatabase, ObservableWriteGuard, ObserverConfig,
   TableChange, TableChangeStream,
};
pub use sqlx_sqlite_toolkit::{
   ActiveInterruptibleTransaction, ActiveInterruptibleTransactions, ActiveRegularTransactions,
   DatabaseWrapper, Error, ExecuteBuilder, FetchAllBuilder, FetchCursorBuilder, FetchOneBuilder,
   InterruptibleTransaction, InterruptibleTransactionBuilder, Result, Scalar, Statement,
   StatementArguments, TransactionExecutionBuilder, TransactionWriter, WriteQueryResult,
   WriterGuard, cleanup_all_transactions,
};
