//! Patchers written as code snippets and compiled in memory.
//!
//! Compilation lives outside this crate behind [`SnippetCompiler`]; its
//! verdict feeds the same [`ConfigurationState`] channel as every other
//! readiness check, see [`snippet_state`]. Running invokes the produced
//! [`SnippetEntryPoint`] in-process.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{PatcherRun, RunChannels};
use crate::config_state::ConfigurationState;
use crate::error::{RunError, RunResult};
use crate::settings::{GameRelease, PatcherKind, RunSettings};
use crate::stream::LineFanout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hidden,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Compiled snippet, callable in-process.
#[async_trait]
pub trait SnippetEntryPoint: Send + Sync {
    /// Run the patch. Progress lines go to `output`.
    async fn run(
        &self,
        settings: &RunSettings,
        output: &LineFanout,
        cancel: &CancellationToken,
    ) -> Result<(), String>;
}

/// What a compiler produced for one snippet.
#[derive(Clone)]
pub struct Compilation {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub entry_point: Option<Arc<dyn SnippetEntryPoint>>,
}

impl fmt::Debug for Compilation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compilation")
            .field("success", &self.success)
            .field("diagnostics", &self.diagnostics)
            .field("entry_point", &self.entry_point.is_some())
            .finish()
    }
}

impl Compilation {
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.diagnostics
            .iter()
            .find(|d| d.severity == Severity::Error)
    }
}

/// In-memory compiler for snippet code.
#[async_trait]
pub trait SnippetCompiler: Send + Sync {
    /// `Err` means the compiler itself broke, not that the code had errors.
    async fn compile(
        &self,
        release: &GameRelease,
        id: &str,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<Compilation, String>;
}

/// Readiness of a snippet given its latest compile result (`None` while compiling).
pub fn snippet_state(result: Option<&Result<Compilation, String>>) -> ConfigurationState {
    let compilation = match result {
        None => return ConfigurationState::fail("Compiling"),
        Some(Err(reason)) => return ConfigurationState::halt(reason.clone()),
        Some(Ok(compilation)) => compilation,
    };
    if !compilation.success {
        let reason = compilation
            .first_error()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return ConfigurationState::halt(reason);
    }
    if compilation.entry_point.is_none() {
        return ConfigurationState::halt("Assembly was unexpectedly null");
    }
    ConfigurationState::success_with((), "Compilation successful")
}

pub struct SnippetRun {
    name: String,
    entry: Arc<dyn SnippetEntryPoint>,
    channels: RunChannels,
}

impl SnippetRun {
    pub fn new(name: impl Into<String>, entry: Arc<dyn SnippetEntryPoint>) -> Self {
        Self {
            name: name.into(),
            entry,
            channels: RunChannels::new(),
        }
    }
}

#[async_trait]
impl PatcherRun for SnippetRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PatcherKind {
        PatcherKind::Snippet
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
        info!(patcher = %self.name, "running snippet patcher");
        let result = self.entry.run(settings, &self.channels.output, cancel).await;
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        result.map_err(|reason| {
            self.channels.error.publish(reason.clone());
            RunError::Snippet(reason)
        })
    }
}
