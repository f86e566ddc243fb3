//! The run contract shared by every patcher backend.
//!
//! A [`PatcherRun`] is prepared once (or again when its configuration
//! changes) and then run with per-run settings. Output and error lines from
//! both steps go to the run's [`RunChannels`]; subscribe before calling
//! either step. Dropping a run completes its subscriptions and kills any
//! child it still owns.

pub mod cli;
pub mod git;
pub mod snippet;
pub mod solution;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::dotnet::DotNet;
use crate::error::{ProcessError, RunError, RunResult};
use crate::git::{GitBackend, GitCli};
use crate::id::PatcherId;
use crate::process::{ProcessExit, ProcessRunner};
use crate::repo_sync::{runner_repo_directory, RepositorySync};
use crate::settings::{GameRelease, PatcherKind, PatcherSettings, PatcherSource, RunSettings};
use crate::stream::{forward, LineFanout};

pub use cli::CliRun;
pub use git::GitSolutionRun;
pub use snippet::{
    snippet_state, Compilation, Diagnostic, Severity, SnippetCompiler, SnippetEntryPoint,
    SnippetRun,
};
pub use solution::SolutionRun;

/// Output and error line publishers owned by one run.
#[derive(Debug, Clone, Default)]
pub struct RunChannels {
    pub output: LineFanout,
    pub error: LineFanout,
}

impl RunChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every current subscription on both channels.
    pub fn close(&self) {
        self.output.close();
        self.error.close();
    }
}

#[async_trait]
pub trait PatcherRun: Send + Sync {
    /// Display name used in logs and reports.
    fn name(&self) -> &str;

    fn kind(&self) -> PatcherKind;

    fn channels(&self) -> &RunChannels;

    fn subscribe_output(&self) -> UnboundedReceiver<String> {
        self.channels().output.subscribe()
    }

    fn subscribe_error(&self) -> UnboundedReceiver<String> {
        self.channels().error.subscribe()
    }

    /// Complete all subscriptions now instead of waiting for drop.
    fn dispose(&self) {
        self.channels().close();
    }

    /// One-time setup; safe to call again after a configuration change.
    async fn prepare(&mut self, release: &GameRelease, cancel: &CancellationToken)
        -> RunResult<()>;

    async fn run(&self, settings: &RunSettings, cancel: &CancellationToken) -> RunResult<()>;
}

/// Run a prepared process to completion, forwarding its output to `channels`.
pub(crate) async fn execute(runner: ProcessRunner, channels: &RunChannels) -> RunResult<()> {
    let program = runner.invocation().program.clone();
    let command = runner.invocation().to_string();
    let stdout = runner.subscribe_stdout();
    let stderr = runner.subscribe_stderr();

    let (exit, _, _) = tokio::join!(
        runner.run(),
        forward(stdout, channels.output.clone()),
        forward(stderr, channels.error.clone()),
    );

    match exit {
        Ok(ProcessExit::Exited(0)) => Ok(()),
        Ok(ProcessExit::Exited(code)) => Err(RunError::NonZeroExit { code, command }),
        Ok(ProcessExit::Cancelled) => Err(RunError::Cancelled),
        Err(source @ ProcessError::Launch { .. }) => Err(RunError::Launch {
            path: program,
            source,
        }),
        Err(e) => Err(RunError::Process(e)),
    }
}

/// Turns saved patcher settings into runs for one profile.
pub struct RunFactory<G: GitBackend = GitCli> {
    dotnet: DotNet,
    sync: Arc<RepositorySync<G>>,
    working_dir: PathBuf,
    profile_id: String,
}

impl<G: GitBackend + 'static> RunFactory<G> {
    pub fn new(
        dotnet: DotNet,
        sync: Arc<RepositorySync<G>>,
        working_dir: impl Into<PathBuf>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            dotnet,
            sync,
            working_dir: working_dir.into(),
            profile_id: profile_id.into(),
        }
    }

    /// Build the run for one patcher. Snippets need the entry point their
    /// last successful compilation produced.
    pub fn create(
        &self,
        id: PatcherId,
        settings: &PatcherSettings,
        entry_point: Option<Arc<dyn SnippetEntryPoint>>,
    ) -> RunResult<Box<dyn PatcherRun>> {
        let run: Box<dyn PatcherRun> = match &settings.source {
            PatcherSource::Cli(cli) => Box::new(
                CliRun::new(&settings.nickname, &cli.path_to_executable)
                    .with_extra_data(cli.path_to_extra.clone())
                    .with_grace(self.dotnet.cancel_grace()),
            ),
            PatcherSource::Solution(solution) => {
                let project = solution.project_path().ok_or_else(|| {
                    RunError::NotRunnable("No project selected".to_string())
                })?;
                Box::new(SolutionRun::new(
                    &settings.nickname,
                    &solution.solution_path,
                    project,
                    self.dotnet.clone(),
                ))
            }
            PatcherSource::Git(git) => Box::new(GitSolutionRun::new(
                &settings.nickname,
                git.clone(),
                runner_repo_directory(&self.working_dir, &self.profile_id, id.get()),
                self.sync.clone(),
                self.dotnet.clone(),
            )),
            PatcherSource::Snippet(_) => {
                let entry = entry_point.ok_or_else(|| {
                    RunError::NotRunnable("Assembly was null when trying to run".to_string())
                })?;
                Box::new(SnippetRun::new(&settings.nickname, entry))
            }
        };
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{CliSource, GitSource, SnippetSource, SolutionSource};

    fn factory() -> RunFactory {
        RunFactory::new(
            DotNet::default(),
            Arc::new(RepositorySync::default()),
            "/tmp/Synthesis",
            "Skyrim",
        )
    }

    #[test]
    fn test_factory_kinds_and_names() {
        let ids = crate::id::PatcherIdSequence::new();
        let f = factory();

        let cli = PatcherSettings::new(
            "Tweaks",
            PatcherSource::Cli(CliSource {
                path_to_executable: PathBuf::from("/bin/tweaks"),
                path_to_extra: None,
            }),
        );
        let run = f.create(ids.next_id(), &cli, None).unwrap();
        assert_eq!(run.kind(), PatcherKind::Cli);
        assert_eq!(run.name(), "Tweaks");

        let git = PatcherSettings::new(
            "Fixes",
            PatcherSource::Git(GitSource {
                remote_repo_path: "https://example.com/fixes.git".to_string(),
                selected_project_subpath: "Fixes/Fixes.csproj".to_string(),
            }),
        );
        let run = f.create(ids.next_id(), &git, None).unwrap();
        assert_eq!(run.kind(), PatcherKind::GitSolution);
        assert_eq!(run.name(), "Fixes => https://example.com/fixes.git => Fixes");
    }

    #[test]
    fn test_factory_rejects_unusable_settings() {
        let ids = crate::id::PatcherIdSequence::new();
        let f = factory();

        let snippet = PatcherSettings::new("S", PatcherSource::Snippet(SnippetSource::default()));
        assert!(matches!(
            f.create(ids.next_id(), &snippet, None),
            Err(RunError::NotRunnable(_))
        ));

        let solution = PatcherSettings::new(
            "Sln",
            PatcherSource::Solution(SolutionSource {
                solution_path: PathBuf::from("/src/P.sln"),
                project_subpath: String::new(),
            }),
        );
        assert!(matches!(
            f.create(ids.next_id(), &solution, None),
            Err(RunError::NotRunnable(_))
        ));
    }

    #[tokio::test]
    async fn test_dispose_completes_subscriptions() {
        let run = CliRun::new("x", "/bin/true");
        let mut out = run.subscribe_output();
        let mut err = run.subscribe_error();
        run.dispose();
        assert_eq!(out.recv().await, None);
        assert_eq!(err.recv().await, None);
    }
}
