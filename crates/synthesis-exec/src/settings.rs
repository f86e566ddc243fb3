//! Persisted patcher settings and per-run settings.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Verb external patchers expect as their first argument.
pub const RUN_PATCHER_VERB: &str = "run-patcher";

/// Game release a run targets. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameRelease(String);

impl GameRelease {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameRelease {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Inputs handed to a patcher for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Output of the previous patcher in the chain, if any.
    pub source_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub release: GameRelease,
    pub data_folder: PathBuf,
    pub load_order_file: PathBuf,
}

impl RunSettings {
    /// Command line understood by external patchers, verb first.
    ///
    /// Optional values are left out entirely rather than passed empty.
    pub fn to_args(&self, extra_data_folder: Option<&Path>) -> Vec<String> {
        let mut args = vec![RUN_PATCHER_VERB.to_string()];
        if let Some(source) = &self.source_path {
            push_option(&mut args, "SourcePath", source.display());
        }
        push_option(&mut args, "OutputPath", self.output_path.display());
        push_option(&mut args, "GameRelease", &self.release);
        push_option(&mut args, "DataFolderPath", self.data_folder.display());
        push_option(&mut args, "LoadOrderFilePath", self.load_order_file.display());
        if let Some(extra) = extra_data_folder {
            push_option(&mut args, "ExtraDataFolder", extra.display());
        }
        args
    }
}

fn push_option(args: &mut Vec<String>, name: &str, value: impl fmt::Display) {
    args.push(format!("--{name}"));
    args.push(value.to_string());
}

/// Backend a patcher runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatcherKind {
    Cli,
    Solution,
    GitSolution,
    Snippet,
}

impl PatcherKind {
    /// Backends that build with the .NET SDK before running.
    pub fn needs_sdk(&self) -> bool {
        matches!(self, PatcherKind::Solution | PatcherKind::GitSolution)
    }
}

impl fmt::Display for PatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PatcherKind::Cli => "CLI",
            PatcherKind::Solution => "Solution",
            PatcherKind::GitSolution => "GitSolution",
            PatcherKind::Snippet => "Snippet",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliSource {
    pub path_to_executable: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_to_extra: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionSource {
    pub solution_path: PathBuf,
    /// Project file relative to the solution's folder.
    pub project_subpath: String,
}

impl SolutionSource {
    pub fn project_path(&self) -> Option<PathBuf> {
        if self.project_subpath.trim().is_empty() {
            return None;
        }
        let dir = self.solution_path.parent()?;
        Some(dir.join(&self.project_subpath))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSource {
    pub remote_repo_path: String,
    /// Project file relative to the checkout root.
    pub selected_project_subpath: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetSource {
    /// Stable id used as the compiled assembly's name. Blank means "assign one".
    #[serde(default)]
    pub id: String,
    pub code: String,
}

impl SnippetSource {
    /// The configured id, or a fresh UUID when none is set.
    pub fn resolved_id(&self) -> String {
        if self.id.trim().is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.id.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatcherSource {
    Cli(CliSource),
    Solution(SolutionSource),
    Git(GitSource),
    Snippet(SnippetSource),
}

impl PatcherSource {
    pub fn kind(&self) -> PatcherKind {
        match self {
            PatcherSource::Cli(_) => PatcherKind::Cli,
            PatcherSource::Solution(_) => PatcherKind::Solution,
            PatcherSource::Git(_) => PatcherKind::GitSolution,
            PatcherSource::Snippet(_) => PatcherKind::Snippet,
        }
    }
}

/// One configured patcher as saved in a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatcherSettings {
    #[serde(default)]
    pub nickname: String,
    #[serde(default = "default_on")]
    pub on: bool,
    #[serde(flatten)]
    pub source: PatcherSource,
}

fn default_on() -> bool {
    true
}

impl PatcherSettings {
    pub fn new(nickname: impl Into<String>, source: PatcherSource) -> Self {
        Self {
            nickname: nickname.into(),
            on: true,
            source,
        }
    }

    pub fn kind(&self) -> PatcherKind {
        self.source.kind()
    }
}
