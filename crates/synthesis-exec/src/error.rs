//! Error taxonomy for the execution engine.
//!
//! Each layer has its own enum so callers can tell a missing executable
//! apart from a toolchain that ran and complained. Validation problems are
//! not errors here: they are values of
//! [`ConfigurationState`](crate::config_state::ConfigurationState).

use std::path::PathBuf;

/// Errors produced while launching or supervising a child process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The program could not be started (missing file, permissions, ...).
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// True when the launch failed because the program does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProcessError::Launch { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// Errors produced by toolchain invocations (version probe, listing, build).
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// The tool wrote to its error channel.
    #[error("{command} reported errors:\n{}", .lines.join("\n"))]
    ErrorOutput { command: String, lines: Vec<String> },

    /// The tool's standard output did not have the expected shape.
    #[error("Unexpected messages:\n{}", .lines.join("\n"))]
    UnexpectedOutput { lines: Vec<String> },

    #[error("invalid project path: {}", .0.display())]
    InvalidProjectPath(PathBuf),

    #[error("Could not locate target executable.")]
    ExecutableNotFound,

    /// A build exited non-zero; carries the mined diagnostic.
    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Errors produced while reconciling a git workspace.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to clone {url}: {reason}")]
    Clone { url: String, reason: String },

    #[error("failed to delete workspace {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("git error: {0}")]
    Git(String),

    #[error("cancelled")]
    Cancelled,
}

/// Errors surfaced by a patcher's prepare or run step.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The companion executable could not be started.
    #[error("Could not find target CLI file: {}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: ProcessError,
    },

    /// The patcher process ran and exited in failure.
    #[error("Process exited in failure ({code}): {command}")]
    NonZeroExit { code: i32, command: String },

    /// Building or locating the patcher failed.
    #[error("build failure: {0}")]
    Build(String),

    /// `run` was called without the object `prepare` should have produced.
    #[error("not prepared: {0}")]
    NotPrepared(String),

    /// The configuration gate refused to start the run.
    #[error("not runnable: {0}")]
    NotRunnable(String),

    #[error("snippet failed: {0}")]
    Snippet(String),

    /// Staging or publishing a batch's output file failed.
    #[error("failed to write output {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl RunError {
    /// Cancellation is a distinguished completion, not a failure to report.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RunError::Cancelled
                | RunError::Sync(SyncError::Cancelled)
                | RunError::Toolchain(ToolchainError::Cancelled)
        )
    }
}

pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
pub type ToolchainResult<T> = std::result::Result<T, ToolchainError>;
pub type SyncResult<T> = std::result::Result<T, SyncError>;
pub type RunResult<T> = std::result::Result<T, RunError>;
