//! .NET toolchain integration.
//!
//! The SDK has no structured API we can lean on, so everything here shells
//! out to the `dotnet` driver and scrapes its text output:
//!
//! - [`version`]: `dotnet --version` probing and acceptability
//! - [`listing`]: `restore` + `list package` dependency tables
//! - [`build`]: `build --runtime <rid>` diagnostics and produced-binary discovery
//!
//! All commands run through [`ProcessRunner`](crate::process::ProcessRunner)
//! and honour the caller's cancellation token.

pub mod build;
pub mod listing;
pub mod version;

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{EngineConfig, DEFAULT_BUILD_LOG_CAP};
use crate::error::ToolchainResult;
use crate::process::{CollectedOutput, ProcessInvocation, ProcessRunner, DEFAULT_CANCEL_GRACE};
use crate::stream::collect_lines;

pub use build::{scrape_executable_path, BuildOutcome, BuildScanner};
pub use listing::{parse_listing_line, FrameworkVersions, PackageListing};
pub use version::{parse_tool_version, ToolVersion};

/// Lowest SDK major version patchers can be built with.
pub const MIN_SDK_MAJOR: u64 = 5;

/// Runtime identifier every patcher build targets.
pub const DEFAULT_RUNTIME: &str = "win-x64";

/// Handle on an installed .NET SDK driver.
#[derive(Debug, Clone)]
pub struct DotNet {
    program: PathBuf,
    runtime: String,
    min_sdk_major: u64,
    build_log_cap: usize,
    cancel_grace: Duration,
}

impl Default for DotNet {
    fn default() -> Self {
        Self::new("dotnet")
    }
}

impl DotNet {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            runtime: DEFAULT_RUNTIME.to_string(),
            min_sdk_major: MIN_SDK_MAJOR,
            build_log_cap: DEFAULT_BUILD_LOG_CAP,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.dotnet_path.clone(),
            runtime: config.runtime.clone(),
            min_sdk_major: config.min_sdk_major,
            build_log_cap: config.build_log_cap,
            cancel_grace: config.cancel_grace(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn cancel_grace(&self) -> Duration {
        self.cancel_grace
    }

    /// `build --runtime <rid> <target>`
    pub fn build_args(&self, target: &str) -> Vec<String> {
        vec![
            "build".to_string(),
            "--runtime".to_string(),
            self.runtime.clone(),
            target.to_string(),
        ]
    }

    pub(crate) fn invocation<I, S>(&self, args: I) -> ProcessInvocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProcessInvocation::new(&self.program).args(args)
    }

    pub(crate) fn runner(
        &self,
        invocation: ProcessInvocation,
        cancel: &CancellationToken,
    ) -> ProcessRunner {
        ProcessRunner::new(invocation, cancel.clone()).with_grace(self.cancel_grace)
    }

    /// Run to completion, capturing both channels.
    pub(crate) async fn collect(
        &self,
        invocation: ProcessInvocation,
        cancel: &CancellationToken,
    ) -> ToolchainResult<CollectedOutput> {
        let runner = self.runner(invocation, cancel);
        let out = runner.subscribe_stdout();
        let err = runner.subscribe_stderr();
        let (exit, stdout, stderr) =
            tokio::join!(runner.run(), collect_lines(out), collect_lines(err));
        Ok(CollectedOutput {
            exit: exit?,
            stdout,
            stderr,
        })
    }
}
