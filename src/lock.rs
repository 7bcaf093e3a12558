//! Per-entity mutual exclusion.
//!
//! Mutating admin actions (`approve`, `claim`, `decide`, settlement retries) take a non-blocking
//! guard keyed by (entity kind, id). A second caller does not wait: it gets `AlreadyProcessing`.
//! Guards protect the decision only and are dropped before any gateway call.
//!
//! [`FileLock`] extends exclusion to every process sharing a data directory. The store and the
//! settlement journal hold one around each read-modify-write of their backing file.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{EngineError, Entity, Result};

type Key = (Entity, u64);

#[derive(Clone, Default)]
pub struct EntityLocks {
    held: Arc<Mutex<HashSet<Key>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard for an entity or fail immediately with `AlreadyProcessing`.
    pub fn try_acquire(&self, entity: Entity, id: u64) -> Result<EntityGuard> {
        let key = (entity, id);
        if !self.held.lock().insert(key) {
            debug!(%entity, id, "entity lock contended");
            return Err(EngineError::AlreadyProcessing { entity, id: id.to_string() });
        }
        Ok(EntityGuard { held: Arc::clone(&self.held), key })
    }

    pub fn is_held(&self, entity: Entity, id: u64) -> bool {
        self.held.lock().contains(&(entity, id))
    }
}

/// Releases its entity when dropped.
pub struct EntityGuard {
    held: Arc<Mutex<HashSet<Key>>>,
    key: Key,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
    }
}

/// Exclusive OS advisory lock on a sidecar file, released when dropped.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Sidecar lock path for a data file: `company.json` locks through `company.lock`.
    pub fn path_for(data_file: &Path) -> PathBuf {
        data_file.with_extension("lock")
    }

    /// Block until no other process holds the lock.
    pub fn exclusive(path: &Path) -> Result<FileLock> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        file.lock_exclusive()?;
        Ok(FileLock { file, path: path.to_path_buf() })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "file unlock failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let locks = EntityLocks::new();
        let guard = locks.try_acquire(Entity::Task, 1).unwrap();
        assert!(matches!(
            locks.try_acquire(Entity::Task, 1),
            Err(EngineError::AlreadyProcessing { .. })
        ));
        // Other ids and kinds are independent.
        assert!(locks.try_acquire(Entity::Task, 2).is_ok());
        assert!(locks.try_acquire(Entity::Attendance, 1).is_ok());
        drop(guard);
        assert!(!locks.is_held(Entity::Task, 1));
        assert!(locks.try_acquire(Entity::Task, 1).is_ok());
    }

    #[test]
    fn test_file_lock_excludes_a_second_holder_until_dropped() {
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let path = FileLock::path_for(&dir.path().join("company.json"));
        let held = FileLock::exclusive(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter_path = path.clone();
        let waiter = std::thread::spawn(move || {
            let _lock = FileLock::exclusive(&waiter_path).unwrap();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
