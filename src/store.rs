//! Shared state with a read replica.
//!
//! Writers go through [`Store::mutate`], which holds the write lock for the duration of one decision,
//! persists the result and then publishes an immutable snapshot. Readers only ever clone the published
//! `Arc<Database>`, so listing and statistics never wait on a pending mutation. Stores opened on
//! the same file from different processes serialize their mutations through a [`FileLock`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::db::Database;
use crate::error::Result;
use crate::lock::FileLock;

pub struct Store {
    path: Option<PathBuf>,
    primary: Mutex<Database>,
    snapshot: RwLock<Option<Arc<Database>>>,
}

impl Store {
    /// Open a store backed by a JSON file.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::load(path)?;
        Ok(Store::with_database(db, Some(path.to_path_buf())))
    }

    /// A store that lives only in memory.
    pub fn in_memory(db: Database) -> Self {
        Store::with_database(db, None)
    }

    fn with_database(db: Database, path: Option<PathBuf>) -> Self {
        let snapshot = Arc::new(db.clone());
        Store { path, primary: Mutex::new(db), snapshot: RwLock::new(Some(snapshot)) }
    }

    /// Apply one decision atomically. If the closure fails nothing is persisted or published.
    ///
    /// File-backed stores decide against the file's current contents, read under the data
    /// directory's lock, so a write from another process is never lost or bypassed.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let mut primary = self.primary.lock();
        let (mut working, _file_lock) = match &self.path {
            Some(path) => {
                let lock = FileLock::exclusive(&FileLock::path_for(path))?;
                (Database::load(path)?, Some(lock))
            }
            None => (primary.clone(), None),
        };
        let out = f(&mut working)?;
        if let Some(path) = &self.path {
            working.save(path)?;
        }
        *primary = working;
        *self.snapshot.write() = Some(Arc::new(primary.clone()));
        Ok(out)
    }

    /// The last published snapshot.
    pub fn snapshot(&self) -> Arc<Database> {
        self.snapshot.read().clone().unwrap_or_default()
    }

    /// Re-read the backing file. On failure the last-known snapshot keeps serving reads; with no
    /// snapshot to fall back on the error propagates.
    pub fn reload(&self) -> Result<Arc<Database>> {
        let Some(path) = &self.path else {
            return Ok(self.snapshot());
        };
        match Database::load(path) {
            Ok(db) => {
                let fresh = Arc::new(db.clone());
                *self.primary.lock() = db;
                *self.snapshot.write() = Some(Arc::clone(&fresh));
                Ok(fresh)
            }
            Err(e) => match self.snapshot.read().clone() {
                Some(last) => {
                    warn!(error = %e, "store reload failed, serving last-known snapshot");
                    Ok(last)
                }
                None => Err(e),
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn forget_snapshot(&self) {
        *self.snapshot.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Employee;
    use crate::error::EngineError;

    fn employee(id: &str) -> Employee {
        Employee { id: id.into(), name: id.into(), department: "ops".into(), wallet: None }
    }

    #[test]
    fn test_failed_mutation_leaves_state_untouched() {
        let store = Store::in_memory(Database::default());
        let res: Result<()> = store.mutate(|db| {
            db.employees.push(employee("E1"));
            Err(EngineError::InvalidArgument("nope".into()))
        });
        assert!(res.is_err());
        assert!(store.snapshot().employees.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_while_writes_proceed() {
        let store = Store::in_memory(Database::default());
        let before = store.snapshot();
        store.mutate(|db| {
            db.employees.push(employee("E1"));
            Ok(())
        })
        .unwrap();
        assert!(before.employees.is_empty());
        assert_eq!(store.snapshot().employees.len(), 1);
    }

    #[test]
    fn test_reload_falls_back_to_last_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("company.json");
        let store = Store::open(&path).unwrap();
        store.mutate(|db| {
            db.employees.push(employee("E1"));
            Ok(())
        })
        .unwrap();

        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(store.reload().unwrap().employees.len(), 1);

        store.forget_snapshot();
        assert!(matches!(store.reload(), Err(EngineError::UpstreamUnavailable(_))));
    }

    #[test]
    fn test_two_stores_on_one_file_see_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("company.json");
        let first = Store::open(&path).unwrap();
        let second = Store::open(&path).unwrap();

        first
            .mutate(|db| {
                db.employees.push(employee("E1"));
                Ok(())
            })
            .unwrap();
        // The second store opened before that write, but decides against the file.
        let seen = second.mutate(|db| {
            let seen = db.employees.len();
            db.employees.push(employee("E2"));
            Ok(seen)
        });
        assert_eq!(seen.unwrap(), 1);

        let ids: Vec<_> = Store::open(&path).unwrap().snapshot().employees.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["E1", "E2"]);
    }
}
