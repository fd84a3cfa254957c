use std::time::Instant;

use crate::hooks::SqliteValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOperation {
   Insert,
   Update,
   Delete,
}

/// Typed column value from SQLite.
///
/// Represents a single column's value with its native SQLite type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
   Null,
   Integer(i64),
   Real(f64),
   Text(String),
   Blob(Vec<u8>),
}

impl From<SqliteValue> for ColumnValue {
   fn from(value: SqliteValue) -> Self {
      match value {
         SqliteValue::Null => ColumnValue::Null,
         SqliteValue::Integer(i) => ColumnValue::Integer(i),
         SqliteValue::Real(r) => ColumnValue::Real(r),
         SqliteValue::Text(s) => ColumnValue::Text(s),
         SqliteValue::Blob(b) => ColumnValue::Blob(b),
      }
   }
}

impl ColumnValue {
   pub fn is_null(&self) -> bool {
      matches!(self, ColumnValue::Null)
   }

   pub fn as_integer(&self) -> Option<i64> {
      match self {
         ColumnValue::Integer(i) => Some(*i),
         _ => None,
      }
   }

   pub fn as_real(&self) -> Option<f64> {
      match self {
         ColumnValue::Real(r) => Some(*r),
         _ => None,
      }
   }

   pub fn as_text(&self) -> Option<&str> {
      match self {
         ColumnValue::Text(s) => Some(s),
         _ => None,
      }
   }

   pub fn as_blob(&self) -> Option<&[u8]> {
      match self {
         ColumnValue::Blob(b) => Some(b),
         _ => None,
      }
   }
}

/// Schema facts about an observed table, needed to interpret preupdate
/// events correctly (WITHOUT ROWID tables have no meaningful rowid; the
/// primary key columns must be located by ordinal position).
#[derive(Debug, Clone)]
pub struct TableInfo {
   pub pk_columns: Vec<usize>,
   pub without_rowid: bool,
   pub column_names: Vec<String>,
}

/// Notification of a change to a database table.
///
/// Contains the table name, operation type, affected rowid, and the
/// old/new column values (when available). Changes are only sent after
/// the transaction commits successfully.
#[derive(Debug, Clone)]
pub struct TableChange {
   pub table: String,
   pub operation: Option<ChangeOperation>,
   pub rowid: Option<i64>,
   /// Primary key column values, in schema-declared order. Empty if the
   /// table's schema info hadn't been resolved yet when the event fired.
   pub primary_key: Vec<ColumnValue>,
   /// Column values before the change (for UPDATE and DELETE).
   pub old_values: Option<Vec<ColumnValue>>,
   /// Column values after the change (for INSERT and UPDATE).
   pub new_values: Option<Vec<ColumnValue>>,
   pub timestamp: Instant,
}
