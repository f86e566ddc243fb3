//! SDK version probing.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::DotNet;
use crate::error::{ToolchainError, ToolchainResult};

/// Version text reported by the SDK and whether patchers can use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolVersion {
    pub raw: String,
    pub acceptable: bool,
}

/// Parse SDK version text such as `5.0.100` or `6.0.0-preview.1`.
///
/// Anything after the first hyphen is a pre-release tag and is ignored.
/// The rest must be a dotted version of two to four numeric parts whose
/// major component is at least `min_major`.
pub fn parse_tool_version(text: &str, min_major: u64) -> ToolVersion {
    let core = text.split('-').next().unwrap_or_default();
    let acceptable = parse_major(core).is_some_and(|major| major >= min_major);
    ToolVersion {
        raw: text.to_string(),
        acceptable,
    }
}

fn parse_major(core: &str) -> Option<u64> {
    let parts: Vec<&str> = core.split('.').collect();
    if !(2..=4).contains(&parts.len()) {
        return None;
    }
    let mut numbers = Vec::with_capacity(parts.len());
    for part in parts {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        numbers.push(part.parse::<u64>().ok()?);
    }
    numbers.first().copied()
}

impl DotNet {
    /// Ask the SDK for its version.
    ///
    /// Exactly one line on stdout and nothing on stderr is expected.
    pub async fn sdk_version(&self, cancel: &CancellationToken) -> ToolchainResult<ToolVersion> {
        let invocation = self.invocation(["--version"]);
        let command = invocation.to_string();
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
        if output.stdout.len() != 1 {
            return Err(ToolchainError::UnexpectedOutput {
                lines: output.stdout,
            });
        }

        let version = parse_tool_version(output.stdout[0].trim(), self.min_sdk_major);
        debug!(raw = %version.raw, acceptable = version.acceptable, "probed sdk version");
        if !version.acceptable {
            info!(
                raw = %version.raw,
                min_major = self.min_sdk_major,
                "installed sdk is older than required"
            );
        }
        Ok(version)
    }
}
