//! NuGet dependency listing via `dotnet list package`.
//!
//! Output looks like:
//!
//! ```text
//! Project 'Patcher' has the following package references
//!    [net5.0]:
//!    Top-level Package             Requested   Resolved   Latest
//!    > Mutagen.Bethesda            0.21.3      0.21.3     0.22.0
//!    > Mutagen.Bethesda.Synthesis  0.10.1      0.10.1     0.11.0
//! ```
//!
//! Only rows after the `Top-level Package` header are considered.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::DotNet;
use crate::error::{ToolchainError, ToolchainResult};

/// Marker that precedes the dependency table.
pub const TABLE_HEADER_MARKER: &str = "Top-level Package";

const ROW_MARKER: &str = "> ";
const DEPRECATED_TOKEN: &str = "(D)";

/// One row of the dependency table, positional as printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageListing {
    pub package: String,
    pub requested: String,
    pub resolved: String,
    pub latest: String,
}

/// Parse a table row. Rows without `"> "` or with fewer than four fields are skipped.
pub fn parse_listing_line(line: &str) -> Option<PackageListing> {
    let start = line.find(ROW_MARKER)?;
    let mut tokens = line[start + ROW_MARKER.len()..]
        .split_whitespace()
        .enumerate()
        .filter(|(i, token)| *i == 0 || *token != DEPRECATED_TOKEN)
        .map(|(_, token)| token.to_string());

    Some(PackageListing {
        package: tokens.next()?,
        requested: tokens.next()?,
        resolved: tokens.next()?,
        latest: tokens.next()?,
    })
}

/// Lines after the table header (exclusive), in order.
pub fn table_lines<'a, I>(lines: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    lines
        .into_iter()
        .map(String::as_str)
        .skip_while(|line| !line.contains(TABLE_HEADER_MARKER))
        .skip(1)
        .collect()
}

/// Framework package versions a patcher project references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkVersions {
    pub mutagen: Option<String>,
    pub synthesis: Option<String>,
}

impl FrameworkVersions {
    /// Pick the Mutagen and Synthesis versions out of a listing.
    ///
    /// `current` selects resolved versions, otherwise the latest available.
    pub fn from_listings(listings: &[PackageListing], current: bool) -> Self {
        let mut versions = Self::default();
        for item in listings {
            let value = if current { &item.resolved } else { &item.latest };
            if item.package.starts_with("Mutagen.Bethesda") && !item.package.ends_with("Synthesis")
            {
                versions.mutagen = Some(value.clone());
            }
            if item.package == "Mutagen.Bethesda.Synthesis" {
                versions.synthesis = Some(value.clone());
            }
        }
        versions
    }
}

impl DotNet {
    /// Restore `project`, then list its package references.
    ///
    /// Restore output is discarded; the listing only starts once restore has
    /// exited. Any stderr output from the listing is fatal.
    pub async fn dependency_listing(
        &self,
        project: &Path,
        outdated: bool,
        include_prerelease: bool,
        cancel: &CancellationToken,
    ) -> ToolchainResult<Vec<PackageListing>> {
        let project = project.display().to_string();

        let restore = self.invocation(["restore", project.as_str()]);
        let restored = self.collect(restore, cancel).await?;
        if restored.exit.is_cancelled() {
            return Err(ToolchainError::Cancelled);
        }
        if !restored.exit.success() {
            warn!(project = %project, exit = ?restored.exit, "restore exited in failure");
        }

        let mut args = vec!["list".to_string(), project.clone(), "package".to_string()];
        if outdated {
            args.push("--outdated".to_string());
        }
        if include_prerelease {
            args.push("--include-prerelease".to_string());
        }
        let invocation = self.invocation(args);
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

        let listings: Vec<PackageListing> = table_lines(&output.stdout)
            .into_iter()
            .filter_map(parse_listing_line)
            .collect();
        debug!(project = %project, count = listings.len(), "parsed package listing");
        Ok(listings)
    }

    /// Mutagen and Synthesis versions referenced by `project`.
    pub async fn framework_versions(
        &self,
        project: &Path,
        current: bool,
        include_prerelease: bool,
        cancel: &CancellationToken,
    ) -> ToolchainResult<FrameworkVersions> {
        let listings = self
            .dependency_listing(project, !current, include_prerelease, cancel)
            .await?;
        Ok(FrameworkVersions::from_listings(&listings, current))
    }
}
