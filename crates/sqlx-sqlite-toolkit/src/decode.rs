use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteValueRef;
use sqlx::{TypeInfo, Value, ValueRef};
use time::PrimitiveDateTime;

use crate::Error;
use crate::args::Scalar;

/// Convert a SQLite value directly into the [`Scalar`] representation used
/// for re-binding a decoded value into a later statement (e.g. continuing an
/// interruptible transaction with a value read from its own uncommitted state).
///
/// `DATE`/`TIME`/`DATETIME` columns collapse to `Scalar::Text` since SQLite
/// itself stores them as TEXT; `BOOLEAN` collapses to `Scalar::Int` for the
/// same reason.
pub fn to_scalar(value: SqliteValueRef) -> Result<Scalar, Error> {
   if value.is_null() {
      return Ok(Scalar::Null);
   }

   let column_type = value.type_info();

   let result = match column_type.name() {
      "TEXT" | "DATE" | "TIME" => Scalar::Text(value.to_owned().try_decode::<String>().unwrap_or_default()),

      "REAL" => Scalar::Real(value.to_owned().try_decode::<f64>().unwrap_or_default()),

      "INTEGER" | "NUMERIC" => Scalar::Int(value.to_owned().try_decode::<i64>().unwrap_or_default()),

      "BOOLEAN" => Scalar::Int(value.to_owned().try_decode::<bool>().unwrap_or_default() as i64),

      "DATETIME" => match value.to_owned().try_decode::<PrimitiveDateTime>() {
         Ok(dt) => Scalar::Text(dt.to_string()),
         Err(_) => Scalar::Text(value.to_owned().try_decode::<String>().unwrap_or_default()),
      },

      "BLOB" => Scalar::Blob(value.to_owned().try_decode::<Vec<u8>>().unwrap_or_default()),

      "NULL" => Scalar::Null,

      other => match value.to_owned().try_decode::<String>() {
         Ok(text) => Scalar::Text(text),
         Err(_) => return Err(Error::UnsupportedDatatype(format!("unknown SQLite type: {other}"))),
      },
   };

   Ok(result)
}

/// Convert a SQLite value to a JSON value, by way of [`Scalar`].
///
/// Note: BLOB values are base64-encoded strings since JSON has no native
/// binary type.
pub fn to_json(value: SqliteValueRef) -> Result<JsonValue, Error> {
   Ok(match to_scalar(value)? {
      Scalar::Null => JsonValue::Null,
      Scalar::Int(i) => JsonValue::from(i),
      Scalar::Real(r) => JsonValue::from(r),
      Scalar::Text(s) => JsonValue::String(s),
      Scalar::Blob(b) => JsonValue::String(base64_encode(&b)),
   })
}

/// Base64 encode binary data for JSON serialization.
///
/// SQLite BLOB columns are encoded as base64 strings when serialized to JSON,
/// as JSON does not have a native binary type.
fn base64_encode(data: &[u8]) -> String {
   use base64::Engine;
   base64::engine::general_purpose::STANDARD.encode(data)
}
