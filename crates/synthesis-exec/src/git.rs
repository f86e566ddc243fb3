//! Git access for patcher workspaces.
//!
//! [`GitBackend`] is the seam [`RepositorySync`](crate::repo_sync::RepositorySync)
//! talks to. [`GitCli`] drives the `git` executable; tests swap in fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::process::{collect_output, ProcessInvocation};

/// Repository operations needed to reconcile a workspace.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// True when `path` is the root of a usable work tree.
    async fn is_repository(&self, path: &Path) -> bool;

    /// URL of the first configured remote, if any.
    async fn first_remote_url(&self, path: &Path) -> SyncResult<Option<String>>;

    /// Clone `url` into `path`, which must not exist yet.
    async fn clone_repo(&self, url: &str, path: &Path, cancel: &CancellationToken)
        -> SyncResult<()>;
}

/// [`GitBackend`] over the `git` command-line tool.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> SyncResult<Vec<String>> {
        let invocation = ProcessInvocation::new(&self.program)
            .args(args.iter().copied())
            .current_dir(dir);
        let command = invocation.to_string();
        let output = collect_output(invocation, &CancellationToken::new())
            .await
            .map_err(|e| SyncError::Git(format!("failed to run git: {e}")))?;
        if !output.exit.success() {
            return Err(SyncError::Git(format!(
                "{command} failed: {}",
                output.stderr.join("\n")
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl GitBackend for GitCli {
    async fn is_repository(&self, path: &Path) -> bool {
        // A checkout nested inside some other repository is not ours.
        if !path.join(".git").exists() {
            return false;
        }
        match self.git(path, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(lines) => lines.first().map(|l| l.trim()) == Some("true"),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "not a git work tree");
                false
            }
        }
    }

    async fn first_remote_url(&self, path: &Path) -> SyncResult<Option<String>> {
        let remotes = self.git(path, &["remote"]).await?;
        let Some(name) = remotes.iter().map(|r| r.trim()).find(|r| !r.is_empty()) else {
            return Ok(None);
        };
        let url = self.git(path, &["remote", "get-url", name]).await?;
        Ok(url
            .first()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty()))
    }

    async fn clone_repo(
        &self,
        url: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let target = path.display().to_string();
        // Relative targets resolve against this process's working directory.
        let invocation = ProcessInvocation::new(&self.program).args(["clone", url, target.as_str()]);
        if let Some(parent) = crate::process::parent_dir(path) {
            tokio::fs::create_dir_all(&parent)
                .await
                .map_err(|e| SyncError::Clone {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
        }

        let output = collect_output(invocation, cancel)
            .await
            .map_err(|e| SyncError::Clone {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if output.exit.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if !output.exit.success() {
            let reason = if output.stderr.is_empty() {
                format!("git clone exited with {:?}", output.exit)
            } else {
                output.stderr.join("\n")
            };
            return Err(SyncError::Clone {
                url: url.to_string(),
                reason,
            });
        }
        Ok(())
    }
}
