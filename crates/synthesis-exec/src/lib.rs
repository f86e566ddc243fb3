//! Synthesis patcher execution engine.
//!
//! Runs user patchers through one of several backends and reports their
//! readiness and live output:
//!
//! - [`process`] / [`stream`]: cancellable child processes with fan-out line streams
//! - [`dotnet`]: SDK version probing, package listings, builds
//! - [`git`] / [`repo_sync`]: keeping a patcher's checkout in line with its remote
//! - [`patcher`]: the shared run contract and its CLI, solution, git and snippet backends
//! - [`config_state`] / [`profile`]: layered readiness checks that gate runs
//! - [`batch`]: prepare everything, then run one patcher at a time

pub mod batch;
pub mod config;
pub mod config_state;
pub mod dotnet;
pub mod error;
pub mod git;
pub mod id;
pub mod patcher;
pub mod process;
pub mod profile;
pub mod repo_sync;
pub mod settings;
pub mod stream;
pub mod telemetry;

pub use batch::{
    run_patchers, run_staging_directory, BatchReport, PatcherOutcome, PatcherStatus,
};
pub use config::{ConfigError, EngineConfig};
pub use config_state::{ConfigurationState, Readiness};
pub use dotnet::{BuildOutcome, DotNet, FrameworkVersions, PackageListing, ToolVersion};
pub use error::{ProcessError, RunError, SyncError, ToolchainError};
pub use git::{GitBackend, GitCli};
pub use id::{PatcherId, PatcherIdSequence};
pub use patcher::{
    CliRun, GitSolutionRun, PatcherRun, RunChannels, RunFactory, SnippetCompiler,
    SnippetEntryPoint, SnippetRun, SolutionRun,
};
pub use process::{CollectedOutput, ProcessExit, ProcessInvocation, ProcessRunner};
pub use profile::Profile;
pub use repo_sync::{RepositorySync, SyncOutcome, WorkspaceDescriptor};
pub use settings::{GameRelease, PatcherKind, PatcherSettings, PatcherSource, RunSettings};
pub use stream::{LineFanout, OutputLine, StreamKind};
pub use telemetry::init_tracing;
pub use tokio_util::sync::CancellationToken;
