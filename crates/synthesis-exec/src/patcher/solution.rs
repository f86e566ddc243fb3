//! Patchers built from a local solution with the .NET SDK.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{execute, PatcherRun, RunChannels};
use crate::dotnet::DotNet;
use crate::error::{RunError, RunResult, ToolchainError};
use crate::process::parent_dir;
use crate::settings::{GameRelease, PatcherKind, RunSettings};

/// Builds a project and runs the produced binary through the SDK driver.
pub struct SolutionRun {
    name: String,
    solution: PathBuf,
    project: PathBuf,
    dotnet: DotNet,
    extra_data: Option<PathBuf>,
    executable: Option<PathBuf>,
    channels: RunChannels,
}

impl SolutionRun {
    pub fn new(
        name: impl Into<String>,
        solution: impl Into<PathBuf>,
        project: impl Into<PathBuf>,
        dotnet: DotNet,
    ) -> Self {
        Self {
            name: name.into(),
            solution: solution.into(),
            project: project.into(),
            dotnet,
            extra_data: None,
            executable: None,
            channels: RunChannels::new(),
        }
    }

    /// Publish into existing channels instead of owning fresh ones.
    pub fn with_channels(mut self, channels: RunChannels) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_extra_data(mut self, folder: Option<PathBuf>) -> Self {
        self.extra_data = folder;
        self
    }

    pub fn solution(&self) -> &Path {
        &self.solution
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    /// Binary located by the last successful `prepare`.
    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }
}

#[async_trait]
impl PatcherRun for SolutionRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PatcherKind {
        PatcherKind::Solution
    }

    fn channels(&self) -> &RunChannels {
        &self.channels
    }

    async fn prepare(&mut self, _release: &GameRelease, cancel: &CancellationToken) -> RunResult<()> {
        self.executable = None;
        let output = &self.channels.output;

        output.publish(format!("Building {}", self.project.display()));
        let outcome = self
            .dotnet
            .build_with_output(&self.project, cancel, output, &self.channels.error)
            .await?;
        if !outcome.succeeded {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            return Err(RunError::Build(outcome.diagnostic.unwrap_or_default()));
        }

        output.publish("Locating built patcher");
        let executable = match self.dotnet.locate_executable(&self.project, cancel).await {
            Ok(path) => path,
            Err(ToolchainError::BuildFailed(diagnostic)) => return Err(RunError::Build(diagnostic)),
            Err(e) => return Err(e.into()),
        };
        info!(patcher = %self.name, executable = %executable.display(), "patcher built");
        self.executable = Some(executable);
        Ok(())
    }

    async fn run(&self, settings: &RunSettings, cancel: &CancellationToken) -> RunResult<()> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let executable = self.executable.as_ref().ok_or_else(|| {
            RunError::NotPrepared("Expected built patcher executable did not exist.".to_string())
        })?;

        let mut invocation = self
            .dotnet
            .invocation([executable.display().to_string()])
            .args(settings.to_args(self.extra_data.as_deref()));
        if let Some(dir) = parent_dir(executable) {
            invocation = invocation.current_dir(dir);
        }
        info!(patcher = %self.name, command = %invocation, "running solution patcher");
        execute(self.dotnet.runner(invocation, cancel), &self.channels).await
    }
}
