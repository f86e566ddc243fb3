//! Reconciling a local git workspace against the remote a patcher wants.
//!
//! | local        | remote  | action                     |
//! |--------------|---------|----------------------------|
//! | absent       | known   | clone                      |
//! | absent       | none    | nothing                    |
//! | present      | none    | delete                     |
//! | valid, same  | known   | keep (no network access)   |
//! | other        | known   | delete, then clone         |
//!
//! Mutations of one path are serialized; different paths proceed in parallel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::git::{GitBackend, GitCli};

/// Desired remote and where its checkout lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceDescriptor {
    /// `None` when no remote is configured or it failed validation.
    pub remote: Option<String>,
    pub local: PathBuf,
}

impl WorkspaceDescriptor {
    pub fn new(remote: Option<String>, local: impl Into<PathBuf>) -> Self {
        Self {
            remote: remote.filter(|r| !r.trim().is_empty()),
            local: local.into(),
        }
    }
}

/// What reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Existing checkout already matched.
    Kept,
    /// Fresh clone into an empty location.
    Cloned,
    /// Stale or foreign checkout deleted and recloned.
    Replaced,
    /// No remote and no checkout.
    NothingToBuild,
    /// Checkout deleted because no remote is configured.
    Removed,
}

impl SyncOutcome {
    /// True when a checkout exists afterwards.
    pub fn has_workspace(&self) -> bool {
        matches!(self, SyncOutcome::Kept | SyncOutcome::Cloned | SyncOutcome::Replaced)
    }
}

/// Checkout location for a git patcher's runner.
pub fn runner_repo_directory(working_dir: &Path, profile_id: &str, patcher_id: u64) -> PathBuf {
    working_dir
        .join(profile_id)
        .join("Git")
        .join(patcher_id.to_string())
        .join("Runner")
}

/// Workspace reconciler over a [`GitBackend`].
pub struct RepositorySync<G = GitCli> {
    git: G,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for RepositorySync<GitCli> {
    fn default() -> Self {
        Self::new(GitCli::default())
    }
}

impl<G: GitBackend> RepositorySync<G> {
    pub fn new(git: G) -> Self {
        Self {
            git,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &G {
        &self.git
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Bring `descriptor.local` in line with `descriptor.remote`.
    pub async fn reconcile(
        &self,
        descriptor: &WorkspaceDescriptor,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncOutcome> {
        let lock = self.path_lock(&descriptor.local);
        let result = {
            let _guard = lock.lock().await;
            self.reconcile_locked(descriptor, cancel).await
        };
        self.release_lock(&descriptor.local, lock);
        result
    }

    /// Forget the lock for `path` once no other reconcile holds or awaits it.
    fn release_lock(&self, path: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }

    #[cfg(test)]
    fn tracked_paths(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    async fn reconcile_locked(
        &self,
        descriptor: &WorkspaceDescriptor,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncOutcome> {
        let local = descriptor.local.as_path();
        let exists = tokio::fs::try_exists(local).await.unwrap_or(false);

        let url = match (&descriptor.remote, exists) {
            (None, false) => {
                info!(path = %local.display(), "no remote and no workspace; nothing to build");
                return Ok(SyncOutcome::NothingToBuild);
            }
            (None, true) => {
                info!(path = %local.display(), "no remote configured; deleting workspace");
                ensure_live(cancel)?;
                delete_workspace(local).await?;
                return Ok(SyncOutcome::Removed);
            }
            (Some(url), false) => {
                ensure_live(cancel)?;
                info!(path = %local.display(), url = %url, "cloning into new workspace");
                self.git.clone_repo(url, local, cancel).await?;
                return Ok(SyncOutcome::Cloned);
            }
            (Some(url), true) => url,
        };

        if self.matches_remote(local, url).await {
            info!(path = %local.display(), url = %url, "workspace up to date; keeping");
            return Ok(SyncOutcome::Kept);
        }

        info!(path = %local.display(), url = %url, "workspace invalid or remote changed; recloning");
        ensure_live(cancel)?;
        delete_workspace(local).await?;
        ensure_live(cancel)?;
        self.git.clone_repo(url, local, cancel).await?;
        Ok(SyncOutcome::Replaced)
    }

    async fn matches_remote(&self, local: &Path, url: &str) -> bool {
        if !self.git.is_repository(local).await {
            return false;
        }
        match self.git.first_remote_url(local).await {
            Ok(Some(existing)) => existing == url,
            Ok(None) => false,
            Err(e) => {
                warn!(path = %local.display(), error = %e, "could not read workspace remote");
                false
            }
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> SyncResult<()> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

async fn delete_workspace(path: &Path) -> SyncResult<()> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|source| SyncError::Delete {
        path: path.to_path_buf(),
        source,
    })
}
