//! Statement-compile-time authorizer: classifies what a statement will read
//! and mutate before it ever runs, by installing `sqlite3_set_authorizer`.
//!
//! `sqlx` exposes no authorizer hook, so this reaches the engine through
//! `libsqlite3-sys`'s raw bindings exactly the way [`crate::hooks`] reaches
//! `preupdate_hook`/`commit_hook`/`rollback_hook`: a heap-allocated context
//! struct passed as the callback's `user_data`, freed on `unregister`.

#![allow(unsafe_op_in_unsafe_fn)]

use std::collections::BTreeSet;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;

use libsqlite3_sys::{
   SQLITE_ALTER_TABLE, SQLITE_CREATE_INDEX, SQLITE_CREATE_TABLE, SQLITE_CREATE_TEMP_INDEX,
   SQLITE_CREATE_TEMP_TABLE, SQLITE_CREATE_TEMP_TRIGGER, SQLITE_CREATE_TEMP_VIEW,
   SQLITE_CREATE_TRIGGER, SQLITE_CREATE_VIEW, SQLITE_CREATE_VTABLE, SQLITE_DELETE,
   SQLITE_DROP_INDEX, SQLITE_DROP_TABLE, SQLITE_DROP_TEMP_INDEX, SQLITE_DROP_TEMP_TABLE,
   SQLITE_DROP_TEMP_TRIGGER, SQLITE_DROP_TEMP_VIEW, SQLITE_DROP_TRIGGER, SQLITE_DROP_VIEW,
   SQLITE_DROP_VTABLE, SQLITE_FUNCTION, SQLITE_IGNORE, SQLITE_INSERT, SQLITE_OK, SQLITE_READ,
   SQLITE_SAVEPOINT, SQLITE_TRANSACTION, SQLITE_UPDATE, sqlite3, sqlite3_set_authorizer,
};
use parking_lot::Mutex;

use sqlx_sqlite_conn_mgr::{DatabaseEventKind, DatabaseRegion, Identifier};

/// The effect a compiled statement will have on the surrounding transaction,
/// as announced by `SQLITE_TRANSACTION`/`SQLITE_SAVEPOINT` authorizer calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransactionEffect {
   #[default]
   None,
   Begin,
   Commit,
   Rollback,
   BeginSavepoint(String),
   ReleaseSavepoint(String),
   RollbackSavepoint(String),
}

/// Accumulated classification of the statement currently being compiled.
#[derive(Debug, Clone, Default)]
pub struct AuthorizerState {
   pub selected_region: DatabaseRegion,
   pub event_kinds: Vec<DatabaseEventKind>,
   pub invalidates_schema_cache: bool,
   pub transaction_effect: TransactionEffect,
   pub is_drop_statement: bool,
}

impl AuthorizerState {
   fn reset(&mut self) {
      *self = Self::default();
   }

   fn record_read(&mut self, table: &str, column: &str) {
      let region = if column.is_empty() {
         DatabaseRegion::table(table)
      } else {
         DatabaseRegion::table_columns(table, [Identifier::new(column)])
      };
      self.selected_region = self.selected_region.union(&region);
   }

   fn record_insert(&mut self, table: &str) {
      self.event_kinds.push(DatabaseEventKind::Insert { table: Identifier::new(table) });
   }

   fn record_delete(&mut self, table: &str) {
      self.event_kinds.push(DatabaseEventKind::Delete { table: Identifier::new(table) });
   }

   fn record_update(&mut self, table: &str, column: &str) {
      let ident = Identifier::new(table);
      for kind in self.event_kinds.iter_mut() {
         if let DatabaseEventKind::Update { table: t, columns } = kind {
            if *t == ident {
               columns.insert(Identifier::new(column));
               return;
            }
         }
      }
      let mut columns = BTreeSet::new();
      columns.insert(Identifier::new(column));
      self.event_kinds.push(DatabaseEventKind::Update { table: ident, columns });
   }

   /// Whether any accumulated event would delete rows from `table`.
   pub fn deletes_table(&self, table: &str) -> bool {
      let ident = Identifier::new(table);
      self.event_kinds.iter().any(|k| matches!(k, DatabaseEventKind::Delete { table } if *table == ident))
   }
}

/// Called while preparing a DELETE statement to decide whether the engine's
/// truncate fast path should be disabled (forcing per-row notification).
pub type TruncateDecision = dyn Fn(&str) -> bool + Send + Sync;

struct AuthorizerContext {
   state: Mutex<AuthorizerState>,
   observes_deletions: Box<TruncateDecision>,
}

/// A live authorizer registration. Dropping it leaks the `user_data`
/// reference SQLite is still holding; always pair a registration with
/// [`AuthorizerHandle::unregister`] before the connection is returned to
/// the pool or closed.
pub struct AuthorizerHandle {
   context: Arc<AuthorizerContext>,
   raw: *const AuthorizerContext,
}

// The raw pointer is just a second owning handle to the same Arc allocation,
// never dereferenced directly; all access goes through `context`.
unsafe impl Send for AuthorizerHandle {}
unsafe impl Sync for AuthorizerHandle {}

impl AuthorizerHandle {
   /// Snapshot of the state accumulated so far for the statement currently
   /// (or most recently) being compiled.
   pub fn state(&self) -> AuthorizerState {
      self.context.state.lock().clone()
   }

   /// Clears accumulated state before the next `prepare()` call reuses this
   /// connection's authorizer.
   pub fn reset(&self) {
      self.context.state.lock().reset();
   }

   /// Removes the authorizer callback from `db` and reclaims the `user_data`
   /// reference SQLite was holding.
   ///
   /// # Safety
   ///
   /// `db` must be the same pointer passed to the [`register_authorizer`]
   /// call that produced this handle, and this must be called at most once
   /// per registration.
   pub unsafe fn unregister(self, db: *mut sqlite3) {
      sqlite3_set_authorizer(db, None, ptr::null_mut());
      drop(Arc::from_raw(self.raw));
   }
}

/// Installs the authorizer callback on a raw connection handle.
///
/// # Safety
///
/// `db` must be a valid, open `sqlite3*` owned exclusively by the caller's
/// thread (or the connection must be in serialized mode), and must outlive
/// the returned handle until [`AuthorizerHandle::unregister`] is called.
pub unsafe fn register_authorizer(
   db: *mut sqlite3,
   observes_deletions: impl Fn(&str) -> bool + Send + Sync + 'static,
) -> crate::Result<AuthorizerHandle> {
   let context = Arc::new(AuthorizerContext {
      state: Mutex::new(AuthorizerState::default()),
      observes_deletions: Box::new(observes_deletions),
   });
   // One strong ref lives in the handle we return, the other is leaked into
   // SQLite's user_data slot and reclaimed by `AuthorizerHandle::unregister`.
   let raw = Arc::into_raw(context.clone());
   let context_ptr = raw as *mut c_void;

   let rc = sqlite3_set_authorizer(db, Some(authorizer_callback), context_ptr);
   if rc != SQLITE_OK {
      drop(unsafe { Arc::from_raw(raw) });
      return Err(crate::Error::AuthorizerInstallFailed(rc));
   }
   Ok(AuthorizerHandle { context, raw })
}

unsafe extern "C" fn authorizer_callback(
   user_data: *mut c_void,
   action_code: c_int,
   param1: *const c_char,
   param2: *const c_char,
   _db_name: *const c_char,
   _trigger_or_view: *const c_char,
) -> c_int {
   if user_data.is_null() {
      return SQLITE_OK;
   }
   let context = &*(user_data as *const AuthorizerContext);
   let mut state = context.state.lock();

   let p1 = cstr_opt(param1);
   let p2 = cstr_opt(param2);

   match action_code {
      SQLITE_READ => {
         if let Some(table) = p1 {
            state.record_read(table, p2.unwrap_or(""));
         }
      }
      SQLITE_INSERT => {
         if let Some(table) = p1 {
            state.record_insert(table);
         }
      }
      SQLITE_UPDATE => {
         if let (Some(table), Some(column)) = (p1, p2) {
            state.record_update(table, column);
         }
      }
      SQLITE_DELETE => {
         let Some(table) = p1 else { return SQLITE_OK };
         // Engine-internal catalog deletes (e.g. synthetic deletes fired while
         // dropping a table) pass through untouched.
         if table.ends_with("_master") || table.ends_with("_schema") {
            return SQLITE_OK;
         }
         if state.is_drop_statement {
            return SQLITE_OK;
         }
         state.record_delete(table);
         if (context.observes_deletions)(table) {
            return SQLITE_IGNORE; // disables the truncate optimization
         }
      }
      SQLITE_DROP_TABLE => {
         state.is_drop_statement = true;
         state.invalidates_schema_cache = true;
      }
      SQLITE_FUNCTION => {
         if let Some(name) = p2 {
            let upper = name.to_ascii_uppercase();
            if upper == "COUNT" {
               // Some engine versions don't report the counted table through
               // SQLITE_READ for COUNT(*); be conservative.
               state.selected_region = DatabaseRegion::full_database();
            }
            // ALTER TABLE DROP COLUMN is internally dispatched through a
            // function callback on some engine versions rather than a
            // dedicated DDL action code.
            if upper.contains("DROP_COLUMN") {
               state.invalidates_schema_cache = true;
            }
         }
      }
      SQLITE_TRANSACTION => {
         state.transaction_effect = match p1 {
            Some("BEGIN") => TransactionEffect::Begin,
            Some("COMMIT") => TransactionEffect::Commit,
            Some("ROLLBACK") => TransactionEffect::Rollback,
            _ => TransactionEffect::None,
         };
      }
      SQLITE_SAVEPOINT => {
         let name = p2.unwrap_or("").to_string();
         state.transaction_effect = match p1 {
            Some("BEGIN") => TransactionEffect::BeginSavepoint(name),
            Some("RELEASE") => TransactionEffect::ReleaseSavepoint(name),
            Some("ROLLBACK") => TransactionEffect::RollbackSavepoint(name),
            _ => TransactionEffect::None,
         };
      }
      SQLITE_CREATE_INDEX | SQLITE_CREATE_TABLE | SQLITE_CREATE_TEMP_INDEX
      | SQLITE_CREATE_TEMP_TABLE | SQLITE_CREATE_TEMP_TRIGGER | SQLITE_CREATE_TEMP_VIEW
      | SQLITE_CREATE_TRIGGER | SQLITE_CREATE_VIEW | SQLITE_CREATE_VTABLE | SQLITE_DROP_INDEX
      | SQLITE_DROP_TEMP_INDEX | SQLITE_DROP_TEMP_TABLE | SQLITE_DROP_TEMP_TRIGGER
      | SQLITE_DROP_TEMP_VIEW | SQLITE_DROP_TRIGGER | SQLITE_DROP_VIEW | SQLITE_DROP_VTABLE
      | SQLITE_ALTER_TABLE => {
         state.invalidates_schema_cache = true;
      }
      _ => {}
   }

   SQLITE_OK
}

unsafe fn cstr_opt<'a>(ptr: *const c_char) -> Option<&'a str> {
   if ptr.is_null() {
      return None;
   }
   CStr::from_ptr(ptr).to_str().ok()
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn record_update_accumulates_columns_for_same_table() {
      let mut state = AuthorizerState::default();
      state.record_update("users", "name");
      state.record_update("users", "email");
      match &state.event_kinds[0] {
         DatabaseEventKind::Update { table, columns } => {
            assert_eq!(table.as_str(), "users");
            assert_eq!(columns.len(), 2);
         }
         _ => panic!("expected Update"),
      }
   }

   #[test]
   fn record_read_with_empty_column_selects_whole_table() {
      let mut state = AuthorizerState::default();
      state.record_read("users", "");
      assert!(!state.selected_region.is_empty());
   }

   #[test]
   fn deletes_table_reports_recorded_delete_events() {
      let mut state = AuthorizerState::default();
      state.record_delete("sessions");
      assert!(state.deletes_table("sessions"));
      assert!(!state.deletes_table("users"));
   }
}
