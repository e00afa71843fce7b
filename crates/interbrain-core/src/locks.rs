//! Per-repository mutual exclusion.
//!
//! Operations that mutate a working copy (composition, applying a decision,
//! writing a ledger) hold the lock of that path. Fetching does not.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{InterbrainError, Result};

#[derive(Debug, Default, Clone)]
pub struct RepoLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

/// Held for as long as the repository must not be touched by anyone else.
pub struct RepoGuard {
    _guard: OwnedMutexGuard<()>,
    path: PathBuf,
}

impl RepoGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, path: &Path) -> Result<Arc<AsyncMutex<()>>> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| InterbrainError::Internal("lock table poisoned".into()))?;
        Ok(map.entry(path.to_path_buf()).or_default().clone())
    }

    pub async fn lock(&self, path: &Path) -> Result<RepoGuard> {
        let slot = self.slot(path)?;
        Ok(RepoGuard {
            _guard: slot.lock_owned().await,
            path: path.to_path_buf(),
        })
    }

    /// Lock several repositories at once, always in path order so two callers
    /// locking overlapping sets cannot deadlock.
    pub async fn lock_all(&self, paths: &[&Path]) -> Result<Vec<RepoGuard>> {
        let mut sorted: Vec<&Path> = paths.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for path in sorted {
            guards.push(self.lock(path).await?);
        }
        Ok(guards)
    }
}
