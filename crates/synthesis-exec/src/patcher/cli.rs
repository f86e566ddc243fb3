//! Patchers shipped as a prebuilt executable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{execute, PatcherRun, RunChannels};
use crate::error::{RunError, RunResult};
use crate::process::{parent_dir, ProcessInvocation, ProcessRunner, DEFAULT_CANCEL_GRACE};
use crate::settings::{GameRelease, PatcherKind, RunSettings};

pub struct CliRun {
    name: String,
    executable: PathBuf,
    extra_data: Option<PathBuf>,
    grace: Duration,
    channels: RunChannels,
}

impl CliRun {
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            extra_data: None,
            grace: DEFAULT_CANCEL_GRACE,
            channels: RunChannels::new(),
        }
    }

    /// Folder passed to the patcher as `--ExtraDataFolder`.
    pub fn with_extra_data(mut self, folder: Option<PathBuf>) -> Self {
        self.extra_data = folder;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Invocation for `settings`; runs from the executable's folder.
    pub fn invocation(&self, settings: &RunSettings) -> ProcessInvocation {
        let mut invocation = ProcessInvocation::new(&self.executable)
            .args(settings.to_args(self.extra_data.as_deref()));
        if let Some(dir) = parent_dir(&self.executable) {
            invocation = invocation.current_dir(dir);
        }
        invocation
    }
}

#[async_trait]
impl PatcherRun for CliRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PatcherKind {
        PatcherKind::Cli
    }

    fn channels(&self) -> &RunChannels {
        &self.channels
    }

    async fn prepare(&mut self, _release: &GameRelease, _cancel: &CancellationToken) -> RunResult<()> {
        Ok(())
    }

    async fn run(&self, settings: &RunSettings, cancel: &CancellationToken) -> RunResult<()> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let invocation = self.invocation(settings);
        info!(patcher = %self.name, command = %invocation, "running cli patcher");
        let runner = ProcessRunner::new(invocation, cancel.clone()).with_grace(self.grace);
        execute(runner, &self.channels).await
    }
}
