//! Patchers hosted in a git repository.
//!
//! Preparing one syncs the runner checkout, finds the solution at the
//! checkout root and the configured project inside it, then builds through a
//! [`SolutionRun`] that shares this run's channels.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{PatcherRun, RunChannels, SolutionRun};
use crate::dotnet::DotNet;
use crate::error::{RunError, RunResult};
use crate::git::{GitBackend, GitCli};
use crate::repo_sync::{RepositorySync, WorkspaceDescriptor};
use crate::settings::{GameRelease, GitSource, PatcherKind, RunSettings};

const SOLUTION_EXTENSION: &str = "sln";

pub struct GitSolutionRun<G: GitBackend = GitCli> {
    name: String,
    nickname: String,
    source: GitSource,
    local_dir: PathBuf,
    sync: Arc<RepositorySync<G>>,
    dotnet: DotNet,
    solution_run: Option<SolutionRun>,
    channels: RunChannels,
}

impl<G: GitBackend> GitSolutionRun<G> {
    pub fn new(
        nickname: impl Into<String>,
        source: GitSource,
        local_dir: impl Into<PathBuf>,
        sync: Arc<RepositorySync<G>>,
        dotnet: DotNet,
    ) -> Self {
        let nickname = nickname.into();
        Self {
            name: display_name(&nickname, &source),
            nickname,
            source,
            local_dir: local_dir.into(),
            sync,
            dotnet,
            solution_run: None,
            channels: RunChannels::new(),
        }
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn solution_run(&self) -> Option<&SolutionRun> {
        self.solution_run.as_ref()
    }
}

/// `"<nickname> => <remote> => <project stem>"`, nickname part omitted when blank.
pub fn display_name(nickname: &str, source: &GitSource) -> String {
    let stem = Path::new(&source.selected_project_subpath)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = if nickname.trim().is_empty() {
        String::new()
    } else {
        format!("{nickname} => ")
    };
    format!("{prefix}{} => {stem}", source.remote_repo_path)
}

/// First `*.sln` file directly inside `dir`, by file name.
pub async fn find_solution(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut solutions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_solution = path
            .extension()
            .is_some_and(|ext| ext == SOLUTION_EXTENSION);
        if is_solution && entry.file_type().await?.is_file() {
            solutions.push(path);
        }
    }
    solutions.sort();
    Ok(solutions.into_iter().next())
}

#[async_trait]
impl<G: GitBackend + 'static> PatcherRun for GitSolutionRun<G> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PatcherKind {
        PatcherKind::GitSolution
    }

    fn channels(&self) -> &RunChannels {
        &self.channels
    }

    async fn prepare(&mut self, release: &GameRelease, cancel: &CancellationToken) -> RunResult<()> {
        self.solution_run = None;
        let output = &self.channels.output;

        output.publish("Cloning repository");
        let descriptor =
            WorkspaceDescriptor::new(Some(self.source.remote_repo_path.clone()), &self.local_dir);
        let outcome = self.sync.reconcile(&descriptor, cancel).await?;
        debug!(patcher = %self.name, ?outcome, "workspace synced");
        if !outcome.has_workspace() {
            return Err(RunError::Build("No remote repository configured".to_string()));
        }

        output.publish(format!(
            "Locating path to solution based on local dir {}",
            self.local_dir.display()
        ));
        let solution = find_solution(&self.local_dir)
            .await
            .map_err(|e| RunError::Build(format!("Could not locate solution file: {e}")))?
            .ok_or_else(|| RunError::Build("Could not locate solution file".to_string()))?;

        output.publish(format!(
            "Locating path to project based on {} AND {}",
            solution.display(),
            self.source.selected_project_subpath
        ));
        let subpath = self.source.selected_project_subpath.trim();
        let project = self.local_dir.join(subpath);
        if subpath.is_empty() || !tokio::fs::metadata(&project).await.is_ok_and(|m| m.is_file()) {
            return Err(RunError::Build("Could not locate project sub path".to_string()));
        }

        info!(
            patcher = %self.name,
            solution = %solution.display(),
            project = %project.display(),
            "resolved git patcher targets"
        );
        let mut run = SolutionRun::new(&self.nickname, solution, project, self.dotnet.clone())
            .with_channels(self.channels.clone());
        run.prepare(release, cancel).await?;
        self.solution_run = Some(run);
        Ok(())
    }

    async fn run(&self, settings: &RunSettings, cancel: &CancellationToken) -> RunResult<()> {
        let run = self.solution_run.as_ref().ok_or_else(|| {
            RunError::NotPrepared("Expected solution run object did not exist.".to_string())
        })?;
        run.run(settings, cancel).await
    }
}
