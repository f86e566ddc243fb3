//! Cancellable child-process wrapper with streamed output.
//!
//! [`ProcessRunner`] launches exactly one child, pumps each pipe on its own
//! reader task into a [`LineFanout`], and resolves to a [`ProcessExit`].
//! Subscribe before calling [`ProcessRunner::run`]; lines published earlier
//! are not replayed.
//!
//! Children are spawned with `kill_on_drop`, so abandoning the `run` future
//! on any path (caller abort, panic in a consumer) still terminates them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ProcessError, ProcessResult};
use crate::stream::{collect_lines, LineFanout};

/// Default time reader tasks get to drain after a cancelled child is killed.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

/// What to launch and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Arguments rendered as one shell-like string, quoting those with spaces.
    pub fn argument_string(&self) -> String {
        self.args
            .iter()
            .map(|a| {
                if a.is_empty() || a.contains(char::is_whitespace) {
                    format!("\"{a}\"")
                } else {
                    a.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ProcessInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        if !self.args.is_empty() {
            write!(f, " {}", self.argument_string())?;
        }
        Ok(())
    }
}

/// How a supervised child finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Normal exit. Children killed by a signal report `-1`.
    Exited(i32),
    /// Killed because the cancellation token fired.
    Cancelled,
}

impl ProcessExit {
    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessExit::Exited(code) => Some(*code),
            ProcessExit::Cancelled => None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited(0))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessExit::Cancelled)
    }
}

/// Single-use supervisor for one child process.
pub struct ProcessRunner {
    invocation: ProcessInvocation,
    cancel: CancellationToken,
    stdout: LineFanout,
    stderr: LineFanout,
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(invocation: ProcessInvocation, cancel: CancellationToken) -> Self {
        Self {
            invocation,
            cancel,
            stdout: LineFanout::new(),
            stderr: LineFanout::new(),
            grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Override how long readers may drain after a cancellation kill.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn invocation(&self) -> &ProcessInvocation {
        &self.invocation
    }

    pub fn subscribe_stdout(&self) -> UnboundedReceiver<String> {
        self.stdout.subscribe()
    }

    pub fn subscribe_stderr(&self) -> UnboundedReceiver<String> {
        self.stderr.subscribe()
    }

    /// Launch the child and wait for it, honouring cancellation.
    ///
    /// Both subscriptions complete before this returns.
    pub async fn run(self) -> ProcessResult<ProcessExit> {
        let ProcessRunner {
            invocation,
            cancel,
            stdout,
            stderr,
            grace,
        } = self;

        debug!(
            cwd = ?invocation.working_dir,
            program = %invocation.program.display(),
            args = %invocation.argument_string(),
            "launching process"
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Launch {
            program: invocation.program.display().to_string(),
            source,
        })?;

        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(pipe, stdout.clone()));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(pipe, stderr.clone()));
        }

        let mut exit = tokio::select! {
            status = child.wait() => {
                let status = status?;
                ProcessExit::Exited(status.code().unwrap_or(-1))
            }
            _ = cancel.cancelled() => {
                debug!(program = %invocation.program.display(), "cancellation requested, killing child");
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to kill child process");
                }
                // Reap so no zombie is left behind.
                let _ = child.wait().await;
                ProcessExit::Cancelled
            }
        };

        // A grandchild may still hold a pipe open after the child is gone, so
        // draining stays cancellable and is bounded by `grace` once cancelled.
        for mut reader in readers {
            if !exit.is_cancelled() {
                let drained = tokio::select! {
                    _ = &mut reader => true,
                    _ = cancel.cancelled() => false,
                };
                if drained {
                    continue;
                }
                debug!(program = %invocation.program.display(), "cancelled while draining output");
                exit = ProcessExit::Cancelled;
            }
            if tokio::time::timeout(grace, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        stdout.close();
        stderr.close();

        debug!(program = %invocation.program.display(), ?exit, "process finished");
        Ok(exit)
    }
}

fn spawn_reader<R>(pipe: R, fanout: LineFanout) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => fanout.publish(decode_line(&buf)),
                Err(e) => {
                    warn!(error = %e, "error reading child output");
                    break;
                }
            }
        }
        fanout.close();
    })
}

/// Lossy UTF-8 decode with the trailing line terminator removed.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Everything a completed process wrote, split by channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedOutput {
    pub exit: ProcessExit,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Run `invocation` to completion and capture both channels.
pub async fn collect_output(
    invocation: ProcessInvocation,
    cancel: &CancellationToken,
) -> ProcessResult<CollectedOutput> {
    let runner = ProcessRunner::new(invocation, cancel.clone());
    let out = runner.subscribe_stdout();
    let err = runner.subscribe_stderr();
    let (exit, stdout, stderr) = tokio::join!(runner.run(), collect_lines(out), collect_lines(err));
    Ok(CollectedOutput {
        exit: exit?,
        stdout,
        stderr,
    })
}

/// Parent folder of `path`, or `None` for a bare root.
pub fn parent_dir(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
