//! Building patcher projects and mining the build log.
//!
//! The exit code is the only authority on whether a build worked. Text
//! scanning just turns a failure into something a user can read, and finds
//! the produced binary on success.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DotNet;
use crate::error::{ToolchainError, ToolchainResult};
use crate::process::{parent_dir, ProcessExit};
use crate::stream::LineFanout;

/// Line prefix the SDK prints once compilation has failed.
pub const BUILD_FAILED_MARKER: &str = "Build FAILED";

/// Separator between project name and produced binary in a success line.
pub const OUTPUT_PATH_SEPARATOR: &str = " -> ";

/// Extension of the produced patcher binary.
pub const LIBRARY_EXTENSION: &str = ".dll";

const CANCELLED_DIAGNOSTIC: &str = "Cancelled";

/// Result of one build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Exit code was zero.
    pub succeeded: bool,
    /// First error line, `Cancelled`, or the captured log. `None` on success.
    pub diagnostic: Option<String>,
    /// Captured standard output, capped.
    pub log: String,
}

impl BuildOutcome {
    /// Collapse into a result carrying the diagnostic on failure.
    pub fn into_result(self) -> ToolchainResult<()> {
        if self.succeeded {
            Ok(())
        } else {
            Err(ToolchainError::BuildFailed(
                self.diagnostic.unwrap_or_default(),
            ))
        }
    }
}

/// Incremental scanner over build output.
#[derive(Debug, Clone)]
pub struct BuildScanner {
    project_prefix: String,
    failure_seen: bool,
    first_error: Option<String>,
    log: String,
    cap: usize,
    captured: usize,
}

impl BuildScanner {
    /// `project` is the path as the caller knows it; a `"<project> : "`
    /// prefix is stripped from the reported diagnostic.
    pub fn new(project: &Path, cap: usize) -> Self {
        Self {
            project_prefix: format!("{} : ", project.display()),
            failure_seen: false,
            first_error: None,
            log: String::new(),
            cap,
            captured: 0,
        }
    }

    pub fn observe(&mut self, line: &str) {
        if line.starts_with(BUILD_FAILED_MARKER) {
            self.failure_seen = true;
        } else if self.failure_seen
            && self.first_error.is_none()
            && !line.trim().is_empty()
            && line.starts_with("error")
        {
            // Matched on the raw line; the prefix only comes off when reported.
            self.first_error = Some(line.to_string());
        }
        self.capture(line);
    }

    fn capture(&mut self, line: &str) {
        if self.captured >= self.cap {
            return;
        }
        if !self.log.is_empty() {
            self.log.push('\n');
            self.captured += 1;
        }
        for ch in line.chars() {
            if self.captured >= self.cap {
                break;
            }
            self.log.push(ch);
            self.captured += 1;
        }
    }

    /// First error line seen after the failure marker, prefix stripped.
    pub fn diagnostic(&self) -> Option<String> {
        self.first_error.as_deref().map(|line| {
            line.strip_prefix(self.project_prefix.as_str())
                .unwrap_or(line)
                .to_string()
        })
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    /// Classify the build from its exit and the scanned text.
    pub fn finish(self, exit: ProcessExit, cancel_requested: bool) -> BuildOutcome {
        if exit.success() {
            return BuildOutcome {
                succeeded: true,
                diagnostic: None,
                log: self.log,
            };
        }
        let cancelled = cancel_requested || exit.is_cancelled();
        let diagnostic = match self.diagnostic() {
            Some(diag) => diag,
            None if cancelled => CANCELLED_DIAGNOSTIC.to_string(),
            None if self.log.is_empty() => "Unknown Error".to_string(),
            None => self.log.clone(),
        };
        BuildOutcome {
            succeeded: false,
            diagnostic: Some(diagnostic),
            log: self.log,
        }
    }
}

/// Find the produced binary in build output.
///
/// Looks for a line like `  SomeProj -> C:\out\SomeProj.dll`.
pub fn scrape_executable_path<'a, I>(lines: I) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    lines.into_iter().find_map(|line| {
        let trimmed = line.trim();
        if !trimmed.ends_with(LIBRARY_EXTENSION) {
            return None;
        }
        let index = trimmed.find(OUTPUT_PATH_SEPARATOR)?;
        Some(
            trimmed[index + OUTPUT_PATH_SEPARATOR.len()..]
                .trim()
                .to_string(),
        )
    })
}

impl DotNet {
    /// Build `project` for the configured runtime.
    pub async fn build(
        &self,
        project: &Path,
        cancel: &CancellationToken,
    ) -> ToolchainResult<BuildOutcome> {
        self.build_with_output(project, cancel, &LineFanout::new(), &LineFanout::new())
            .await
    }

    /// Build `project`, republishing stdout to `output` and stderr to `errors`.
    ///
    /// The working directory is the project's folder and the project is
    /// referenced by file name only.
    pub async fn build_with_output(
        &self,
        project: &Path,
        cancel: &CancellationToken,
        output: &LineFanout,
        errors: &LineFanout,
    ) -> ToolchainResult<BuildOutcome> {
        let file_name = project
            .file_name()
            .ok_or_else(|| ToolchainError::InvalidProjectPath(project.to_path_buf()))?
            .to_string_lossy()
            .into_owned();

        let mut invocation = self.invocation(self.build_args(&file_name));
        if let Some(dir) = parent_dir(project) {
            invocation = invocation.current_dir(dir);
        }
        info!(
            cwd = ?invocation.working_dir,
            command = %invocation,
            "building patcher project"
        );

        let runner = self.runner(invocation, cancel);
        let mut stdout = runner.subscribe_stdout();
        let mut stderr = runner.subscribe_stderr();
        let mut scanner = BuildScanner::new(project, self.build_log_cap);

        let scan = async {
            while let Some(line) = stdout.recv().await {
                scanner.observe(&line);
                output.publish(line);
            }
        };
        let drain_errors = async {
            while let Some(line) = stderr.recv().await {
                debug!(line = %line, "build stderr");
                errors.publish(line);
            }
        };
        let (exit, _, _) = tokio::join!(runner.run(), scan, drain_errors);
        let exit = exit?;

        let outcome = scanner.finish(exit, cancel.is_cancelled());
        match &outcome.diagnostic {
            None => debug!(project = %project.display(), "build succeeded"),
            Some(diag) => warn!(project = %project.display(), diagnostic = %diag, "build failed"),
        }
        Ok(outcome)
    }

    /// Build `project` and scrape the path of the binary it produced.
    ///
    /// A failed build is reported as such rather than trusting a path that
    /// an earlier incremental step may have printed.
    pub async fn locate_executable(
        &self,
        project: &Path,
        cancel: &CancellationToken,
    ) -> ToolchainResult<PathBuf> {
        let invocation = self.invocation(self.build_args(&project.display().to_string()));
        let command = invocation.to_string();
        debug!(command = %command, "locating patcher executable");
        let output = self.collect(invocation, cancel).await?;

        if output.exit.is_cancelled() {
            return Err(ToolchainError::Cancelled);
        }
        if !output.stderr.is_empty() {
            return Err(ToolchainError::ErrorOutput {
                command,
                lines: output.stderr,
            });
        }
        if !output.exit.success() {
            let mut scanner = BuildScanner::new(project, self.build_log_cap);
            for line in &output.stdout {
                scanner.observe(line);
            }
            let outcome = scanner.finish(output.exit, cancel.is_cancelled());
            return Err(ToolchainError::BuildFailed(
                outcome.diagnostic.unwrap_or_default(),
            ));
        }

        match scrape_executable_path(&output.stdout) {
            Some(path) => Ok(PathBuf::from(path)),
            None => {
                warn!(
                    output = %output.stdout.join("\n"),
                    "Could not locate target executable"
                );
                Err(ToolchainError::ExecutableNotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = "/work/MyPatcher/MyPatcher.csproj";

    fn scan(lines: &[&str]) -> BuildScanner {
        let mut scanner = BuildScanner::new(Path::new(PROJECT), 10_000);
        for line in lines {
            scanner.observe(line);
        }
        scanner
    }

    #[test]
    fn test_first_error_after_failure_marker() {
        let scanner = scan(&[
            "error CS0000: before the marker is ignored",
            "Build FAILED.",
            "",
            "error CS1002: ; expected",
            "error CS1003: second error",
        ]);
        let outcome = scanner.finish(ProcessExit::Exited(1), false);
        assert!(!outcome.succeeded);
        assert_eq!(outcome.diagnostic.as_deref(), Some("error CS1002: ; expected"));
    }

    #[test]
    fn test_exact_marker_arms_the_scan() {
        let scanner = scan(&["Build FAILED", "error CS1002: ; expected"]);
        assert_eq!(scanner.diagnostic().as_deref(), Some("error CS1002: ; expected"));
    }

    #[test]
    fn test_project_prefix_is_stripped() {
        let mut scanner = BuildScanner::new(Path::new("errors.csproj"), 10_000);
        scanner.observe("Build FAILED");
        scanner.observe("errors.csproj : error MSB1009: Project file does not exist.");
        assert_eq!(
            scanner.diagnostic().as_deref(),
            Some("error MSB1009: Project file does not exist.")
        );
    }

    #[test]
    fn test_error_must_lead_the_raw_line() {
        let prefixed = format!("{PROJECT} : error MSB1009: Project file does not exist.");
        let scanner = scan(&["Build FAILED", prefixed.as_str(), "error CS1002: ; expected"]);
        assert_eq!(scanner.diagnostic().as_deref(), Some("error CS1002: ; expected"));
    }

    #[test]
    fn test_exit_zero_wins_over_log_contents() {
        let scanner = scan(&["Build FAILED", "error CS1002: ; expected"]);
        let outcome = scanner.finish(ProcessExit::Exited(0), false);
        assert!(outcome.succeeded);
        assert_eq!(outcome.diagnostic, None);
        assert!(outcome.into_result().is_ok());
    }

    #[test]
    fn test_cancelled_without_diagnostic() {
        let scanner = scan(&["Restoring packages..."]);
        let outcome = scanner.finish(ProcessExit::Cancelled, true);
        assert_eq!(outcome.diagnostic.as_deref(), Some("Cancelled"));
    }

    #[test]
    fn test_specific_diagnostic_beats_cancellation() {
        let scanner = scan(&["Build FAILED", "error CS1002: ; expected"]);
        let outcome = scanner.finish(ProcessExit::Exited(1), true);
        assert_eq!(outcome.diagnostic.as_deref(), Some("error CS1002: ; expected"));
    }

    #[test]
    fn test_fallback_to_captured_log() {
        let scanner = scan(&["Determining projects to restore...", "something broke"]);
        let outcome = scanner.finish(ProcessExit::Exited(1), false);
        assert_eq!(
            outcome.diagnostic.as_deref(),
            Some("Determining projects to restore...\nsomething broke")
        );
        match outcome.into_result() {
            Err(ToolchainError::BuildFailed(diag)) => assert!(diag.contains("something broke")),
            other => panic!("expected BuildFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_log_is_capped() {
        let mut scanner = BuildScanner::new(Path::new(PROJECT), 10_000);
        let line = "x".repeat(999);
        for _ in 0..50 {
            scanner.observe(&line);
        }
        assert_eq!(scanner.log().chars().count(), 10_000);
        let outcome = scanner.finish(ProcessExit::Exited(1), false);
        assert!(outcome.diagnostic.unwrap().chars().count() <= 10_000);
    }

    #[test]
    fn test_empty_failure_log() {
        let outcome = scan(&[]).finish(ProcessExit::Exited(1), false);
        assert_eq!(outcome.diagnostic.as_deref(), Some("Unknown Error"));
    }

    #[test]
    fn test_scrape_executable_path() {
        let lines: Vec<String> = vec![
            "Microsoft (R) Build Engine".to_string(),
            "  SomeProj -> C:\\out\\SomeProj.dll".to_string(),
            "Build succeeded.".to_string(),
        ];
        assert_eq!(
            scrape_executable_path(&lines).as_deref(),
            Some("C:\\out\\SomeProj.dll")
        );
    }

    #[test]
    fn test_scrape_requires_separator_and_extension() {
        let lines: Vec<String> = vec![
            "  SomeProj -> C:\\out\\SomeProj.exe".to_string(),
            "  copied C:\\out\\SomeProj.dll".to_string(),
        ];
        assert_eq!(scrape_executable_path(&lines), None);
        assert_eq!(scrape_executable_path(&Vec::<String>::new()), None);
    }
}
