//! Reentrancy detection for the serialized write executor.
//!
//! A single-slot sqlx pool (`max_connections(1)`) already gives us FIFO
//! single-consumer execution for free: `acquire_writer().await` just waits
//! its turn. The one thing sqlx does *not* give us is a useful error when
//! the same task tries to acquire the writer it is already holding -- that
//! just deadlocks forever. This module tracks, per async task, which
//! executors (identified by the database path) are currently held so such
//! reentrancy can panic immediately instead of hanging.

use std::cell::RefCell;

tokio::task_local! {
   static HELD_EXECUTORS: RefCell<Vec<u64>>;
}

/// RAII marker that a task is about to block on acquiring executor `id`.
/// Panics if the same task already holds `id` and `reentrant` is false.
#[must_use]
#[derive(Debug)]
pub struct ExecutorGuard {
   id: u64,
}

impl ExecutorGuard {
   /// Enter executor `id` for the current task. `reentrant` permits the
   /// explicitly-reentrant call paths (`unsafe_reentrant_read`); all other
   /// entry points pass `false` and panic on self-deadlock.
   pub fn enter(id: u64, reentrant: bool) -> Self {
      let already_held = HELD_EXECUTORS
         .try_with(|held| held.borrow().contains(&id))
         .unwrap_or(false);

      if already_held && !reentrant {
         panic!(
            "reentrant acquisition of executor {id} on the same task; this would deadlock against \
             the single-writer pool. Use an explicitly reentrant read if this is intentional."
         );
      }

      let _ = HELD_EXECUTORS.try_with(|held| held.borrow_mut().push(id));
      Self { id }
   }
}

impl Drop for ExecutorGuard {
   fn drop(&mut self) {
      let _ = HELD_EXECUTORS.try_with(|held| {
         let mut held = held.borrow_mut();
         if let Some(pos) = held.iter().rposition(|x| *x == self.id) {
            held.remove(pos);
         }
      });
   }
}

/// Run `fut` with `HELD_EXECUTORS` scoped to this task, required once per
/// top-level task that will ever call into a database's read/write
/// operations (tests and the runtime entry points do this for you).
pub async fn with_executor_tracking<F: std::future::Future>(fut: F) -> F::Output {
   HELD_EXECUTORS.scope(RefCell::new(Vec::new()), fut).await
}

#[cfg(test)]
mod tests {
   use super::*;

   #[tokio::test]
   async fn reentrant_enter_without_flag_panics() {
      with_executor_tracking(async {
         let _outer = ExecutorGuard::enter(1, false);
         let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _inner = ExecutorGuard::enter(1, false);
         }));
         assert!(result.is_err());
      })
      .await;
   }

   #[tokio::test]
   async fn explicitly_reentrant_enter_does_not_panic() {
      with_executor_tracking(async {
         let _outer = ExecutorGuard::enter(1, false);
         let _inner = ExecutorGuard::enter(1, true);
      })
      .await;
   }

   #[tokio::test]
   async fn different_executors_do_not_conflict() {
      with_executor_tracking(async {
         let _a = ExecutorGuard::enter(1, false);
         let _b = ExecutorGuard::enter(2, false);
      })
      .await;
   }
}
