//! Running a profile's patchers as one batch.
//!
//! Every run is prepared concurrently, then runs execute one at a time in
//! order. Runs form a chain: each patcher writes to its own file under the
//! staging folder and the next one reads it as `--SourcePath`. The last
//! output produced is copied to the requested output path.
//!
//! A failing patcher is recorded and skipped in the chain, and the batch
//! moves on; cancellation stops further launches.

use std::fmt;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{RunError, RunResult};
use crate::patcher::PatcherRun;
use crate::settings::{GameRelease, PatcherKind, RunSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PatcherStatus {
    Succeeded,
    /// Preparation failed; the patcher was not run.
    PrepareFailed(String),
    Failed(String),
    Cancelled,
}

impl PatcherStatus {
    fn from_error(err: &RunError, preparing: bool) -> Self {
        if err.is_cancelled() {
            PatcherStatus::Cancelled
        } else if preparing {
            PatcherStatus::PrepareFailed(err.to_string())
        } else {
            PatcherStatus::Failed(err.to_string())
        }
    }
}

impl fmt::Display for PatcherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatcherStatus::Succeeded => write!(f, "succeeded"),
            PatcherStatus::PrepareFailed(reason) => write!(f, "prepare failed: {reason}"),
            PatcherStatus::Failed(reason) => write!(f, "failed: {reason}"),
            PatcherStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatcherOutcome {
    pub name: String,
    pub kind: PatcherKind,
    #[serde(flatten)]
    pub status: PatcherStatus,
}

/// Outcomes of a batch and where its final output went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<PatcherOutcome>,
    /// Requested output path, once a patcher produced something to copy there.
    pub output: Option<PathBuf>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == PatcherStatus::Succeeded)
    }
}

/// Staging folder for patcher outputs of one profile's runs.
pub fn run_staging_directory(working_dir: &Path, profile_id: &str) -> PathBuf {
    working_dir.join(profile_id).join("Workspace")
}

/// Where patcher `index` writes inside `staging`.
pub fn staged_output_path(staging: &Path, index: usize, name: &str, file_name: &str) -> PathBuf {
    let folder = name.replace(['/', '\\'], "_");
    staging.join(format!("{index} - {folder}")).join(file_name)
}

/// Prepare all runs concurrently, then run them in order, chaining outputs.
///
/// `settings.source_path` seeds the chain and `settings.output_path`
/// receives the last output. Outcomes are in input order.
pub async fn run_patchers(
    runs: &mut [Box<dyn PatcherRun>],
    release: &GameRelease,
    settings: &RunSettings,
    staging: &Path,
    cancel: &CancellationToken,
) -> RunResult<BatchReport> {
    reset_staging(staging).await?;

    info!(count = runs.len(), release = %release, "preparing patchers");
    let prepared = join_all(
        runs.iter_mut()
            .map(|run| async move { run.prepare(release, cancel).await }),
    )
    .await;

    let file_name = settings
        .output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string());

    let mut previous = settings.source_path.clone();
    let mut outcomes = Vec::with_capacity(runs.len());
    for (index, (run, prep)) in runs.iter().zip(prepared).enumerate() {
        let status = match prep {
            Err(e) => {
                warn!(patcher = %run.name(), error = %e, "patcher failed to prepare");
                PatcherStatus::from_error(&e, true)
            }
            Ok(()) if cancel.is_cancelled() => PatcherStatus::Cancelled,
            Ok(()) => {
                let output = staged_output_path(staging, index, run.name(), &file_name);
                create_parent(&output).await?;
                let step = RunSettings {
                    source_path: previous.clone(),
                    output_path: output.clone(),
                    ..settings.clone()
                };
                info!(
                    patcher = %run.name(),
                    source = ?step.source_path,
                    output = %output.display(),
                    "running patcher"
                );
                match run.run(&step, cancel).await {
                    Ok(()) => {
                        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
                            previous = Some(output);
                        } else {
                            warn!(patcher = %run.name(), "patcher succeeded without writing output");
                        }
                        PatcherStatus::Succeeded
                    }
                    Err(e) => {
                        warn!(patcher = %run.name(), error = %e, "patcher failed");
                        PatcherStatus::from_error(&e, false)
                    }
                }
            }
        };
        outcomes.push(PatcherOutcome {
            name: run.name().to_string(),
            kind: run.kind(),
            status,
        });
    }

    let mut published = None;
    if !cancel.is_cancelled() {
        if let Some(last) = previous.filter(|p| Some(p) != settings.source_path.as_ref()) {
            create_parent(&settings.output_path).await?;
            tokio::fs::copy(&last, &settings.output_path)
                .await
                .map_err(|source| RunError::Output {
                    path: settings.output_path.clone(),
                    source,
                })?;
            info!(from = %last.display(), to = %settings.output_path.display(), "published output");
            published = Some(settings.output_path.clone());
        }
    }

    Ok(BatchReport {
        outcomes,
        output: published,
    })
}

const DEFAULT_OUTPUT_NAME: &str = "Synthesis.esp";

async fn reset_staging(staging: &Path) -> RunResult<()> {
    match tokio::fs::remove_dir_all(staging).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(RunError::Output {
                path: staging.to_path_buf(),
                source,
            })
        }
    }
    tokio::fs::create_dir_all(staging)
        .await
        .map_err(|source| RunError::Output {
            path: staging.to_path_buf(),
            source,
        })
}

async fn create_parent(path: &Path) -> RunResult<()> {
    let Some(parent) = crate::process::parent_dir(path) else {
        return Ok(());
    };
    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|source| RunError::Output {
            path: parent,
            source,
        })
}
