//! Engine configuration.
//!
//! Everything has a sensible default; a JSON file can override any subset
//! of fields, and the CLI layers flags and environment variables on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dotnet::{DEFAULT_RUNTIME, MIN_SDK_MAJOR};

/// Maximum characters of build output kept for failure diagnostics.
pub const DEFAULT_BUILD_LOG_CAP: usize = 10_000;

/// Errors raised while loading an [`EngineConfig`] from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration for toolchain invocations and workspace placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Toolchain executable (`dotnet` from PATH by default).
    pub dotnet_path: PathBuf,

    /// Runtime identifier passed to `build --runtime`.
    pub runtime: String,

    /// Lowest acceptable SDK major version.
    pub min_sdk_major: u64,

    /// Cap on captured build output used as a fallback diagnostic.
    pub build_log_cap: usize,

    /// Root under which git patchers get their runner checkouts.
    pub working_directory: PathBuf,

    /// How long output readers may drain after a cancelled child is killed.
    pub cancel_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dotnet_path: PathBuf::from("dotnet"),
            runtime: DEFAULT_RUNTIME.to_string(),
            min_sdk_major: MIN_SDK_MAJOR,
            build_log_cap: DEFAULT_BUILD_LOG_CAP,
            working_directory: std::env::temp_dir().join("Synthesis"),
            cancel_grace_ms: 2_000,
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}
