//! Process-wide registry mapping database paths to live instances.
//!
//! Ensures that multiple calls to [`crate::SqliteDatabase::connect`] with the
//! same path return the same underlying instance instead of opening a second
//! set of pools against the same file.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;

use crate::Result;
use crate::database::SqliteDatabase;

static REGISTRY: LazyLock<Mutex<HashMap<PathBuf, Weak<SqliteDatabase>>>> =
   LazyLock::new(|| Mutex::new(HashMap::new()));

/// `:memory:` and `file::memory:` databases are never cached: each one must
/// be a distinct, private database even when the path string is identical.
pub fn is_memory_database(path: &Path) -> bool {
   let s = path.to_string_lossy();
   s == ":memory:" || s.starts_with("file::memory:") || s.contains("mode=memory")
}

/// Return the cached instance for `path` if one is still alive, otherwise
/// run `open` to create a new one and cache it.
///
/// `open` is only invoked while holding no lock (to avoid holding the
/// registry mutex across an `.await`), so a harmless race where two callers
/// both open the same path concurrently is possible; the loser's instance is
/// dropped and the winner's is cached. This matches the documented contract:
/// callers observe a single instance per path, not necessarily a single
/// connection attempt per path.
pub async fn get_or_open_database<F, Fut>(path: &Path, open: F) -> Result<Arc<SqliteDatabase>>
where
   F: FnOnce() -> Fut,
   Fut: Future<Output = Result<SqliteDatabase>>,
{
   if !is_memory_database(path) {
      if let Some(existing) = REGISTRY.lock().get(path).and_then(Weak::upgrade) {
         return Ok(existing);
      }
   }

   let database = Arc::new(open().await?);

   if !is_memory_database(path) {
      let mut registry = REGISTRY.lock();
      // Another caller may have won the race while we were opening; prefer
      // whichever instance is already cached so all callers converge.
      if let Some(existing) = registry.get(path).and_then(Weak::upgrade) {
         return Ok(existing);
      }
      registry.insert(path.to_path_buf(), Arc::downgrade(&database));
   }

   Ok(database)
}

/// Remove the cache entry for `path`, called from `SqliteDatabase::close`.
pub async fn uncache_database(path: &Path) -> Result<()> {
   REGISTRY.lock().remove(path);
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn memory_database_paths_are_never_cached() {
      assert!(is_memory_database(Path::new(":memory:")));
      assert!(is_memory_database(Path::new("file::memory:?cache=shared")));
      assert!(!is_memory_database(Path::new("/tmp/test.db")));
   }
}
