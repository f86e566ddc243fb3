//! Synthesis - patcher execution engine CLI
//!
//! The `synthesis` command drives the execution engine from a terminal.
//!
//! ## Commands
//!
//! - `sdk-version`: Probe the installed .NET SDK
//! - `packages`: List a project's package references
//! - `build`: Build a patcher project
//! - `locate-exe`: Build a project and print the produced binary
//! - `sync`: Reconcile a git workspace with its remote
//! - `check-profile`: Report readiness of every patcher in a profile
//! - `run`: Prepare and run every enabled patcher in a profile

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};

use synthesis_exec::stream::merge_streams;
use synthesis_exec::{
    run_patchers, run_staging_directory, CancellationToken, ConfigurationState, DotNet,
    EngineConfig, GameRelease, PatcherIdSequence, PatcherSettings, PatcherStatus, Profile,
    RepositorySync, RunFactory, RunSettings, StreamKind, WorkspaceDescriptor,
};

#[derive(Parser)]
#[command(name = "synthesis")]
#[command(author = "Synthesis Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run Synthesis patchers from the command line", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and results
    #[arg(long, global = true)]
    json: bool,

    /// Engine config file (JSON)
    #[arg(long, global = true, env = "SYNTHESIS_CONFIG")]
    config: Option<PathBuf>,

    /// .NET SDK driver to invoke
    #[arg(long, global = true, env = "SYNTHESIS_DOTNET")]
    dotnet: Option<PathBuf>,

    /// Root for git patcher checkouts
    #[arg(long, global = true, env = "SYNTHESIS_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the installed SDK version and whether patchers can use it
    SdkVersion,

    /// List package references of a project
    Packages {
        /// Project file
        project: PathBuf,

        /// Only show packages with newer versions available
        #[arg(long)]
        outdated: bool,

        /// Consider prerelease versions
        #[arg(long)]
        prerelease: bool,

        /// Only report Mutagen and Synthesis versions
        #[arg(long)]
        frameworks: bool,
    },

    /// Build a patcher project
    Build {
        /// Project file
        project: PathBuf,
    },

    /// Build a project and print the path of the binary it produced
    LocateExe {
        /// Project file
        project: PathBuf,
    },

    /// Reconcile a git workspace with its remote
    Sync {
        /// Checkout directory
        local: PathBuf,

        /// Desired remote; omit to delete the checkout
        #[arg(long)]
        remote: Option<String>,
    },

    /// Report readiness of every patcher in a profile
    CheckProfile {
        /// Profile file (JSON)
        profile: PathBuf,
    },

    /// Prepare and run every enabled patcher in a profile
    Run {
        /// Profile file (JSON)
        profile: PathBuf,

        /// Patched output file
        #[arg(long)]
        output: PathBuf,

        /// Game data folder
        #[arg(long)]
        data_folder: PathBuf,

        /// Load order file
        #[arg(long)]
        load_order: PathBuf,

        /// Output of an earlier pass to build on
        #[arg(long)]
        source: Option<PathBuf>,
    },
}

/// On-disk profile read by `check-profile` and `run`.
#[derive(Debug, Deserialize)]
struct ProfileFile {
    id: String,
    release: GameRelease,
    #[serde(default)]
    patchers: Vec<PatcherSettings>,
}

#[derive(Serialize)]
struct StateReport<'a> {
    id: u64,
    name: String,
    on: bool,
    state: &'a ConfigurationState,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    synthesis_exec::init_tracing(cli.json, level);

    let config = load_config(&cli)?;
    let dotnet = DotNet::from_config(&config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::SdkVersion => cmd_sdk_version(&dotnet, cli.json, &cancel).await,
        Commands::Packages {
            project,
            outdated,
            prerelease,
            frameworks,
        } => {
            cmd_packages(
                &dotnet, &project, outdated, prerelease, frameworks, cli.json, &cancel,
            )
            .await
        }
        Commands::Build { project } => cmd_build(&dotnet, &project, cli.json, &cancel).await,
        Commands::LocateExe { project } => cmd_locate_exe(&dotnet, &project, &cancel).await,
        Commands::Sync { local, remote } => cmd_sync(local, remote, cli.json, &cancel).await,
        Commands::CheckProfile { profile } => {
            cmd_check_profile(&dotnet, &profile, cli.json, &cancel).await
        }
        Commands::Run {
            profile,
            output,
            data_folder,
            load_order,
            source,
        } => {
            let settings = |release: GameRelease| RunSettings {
                source_path: source.clone(),
                output_path: output.clone(),
                release,
                data_folder: data_folder.clone(),
                load_order_file: load_order.clone(),
            };
            cmd_run(&dotnet, &config, &profile, settings, cli.json, &cancel).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(dotnet) = &cli.dotnet {
        config.dotnet_path = dotnet.clone();
    }
    if let Some(dir) = &cli.working_dir {
        config.working_directory = dir.clone();
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_sdk_version(dotnet: &DotNet, json: bool, cancel: &CancellationToken) -> Result<()> {
    let version = dotnet
        .sdk_version(cancel)
        .await
        .context("Failed to probe dotnet SDK")?;
    if json {
        return print_json(&version);
    }
    let verdict = if version.acceptable {
        "usable"
    } else {
        "too old"
    };
    println!("{} ({verdict})", version.raw);
    Ok(())
}

async fn cmd_packages(
    dotnet: &DotNet,
    project: &Path,
    outdated: bool,
    prerelease: bool,
    frameworks: bool,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    if frameworks {
        let versions = dotnet
            .framework_versions(project, !outdated, prerelease, cancel)
            .await
            .context("Failed to list packages")?;
        if json {
            return print_json(&versions);
        }
        println!("Mutagen:   {}", versions.mutagen.as_deref().unwrap_or("-"));
        println!("Synthesis: {}", versions.synthesis.as_deref().unwrap_or("-"));
        return Ok(());
    }

    let listings = dotnet
        .dependency_listing(project, outdated, prerelease, cancel)
        .await
        .context("Failed to list packages")?;
    if json {
        return print_json(&listings);
    }
    if listings.is_empty() {
        println!("No package references found.");
    }
    for item in &listings {
        println!(
            "{:<40} {:<12} {:<12} {}",
            item.package, item.requested, item.resolved, item.latest
        );
    }
    Ok(())
}

async fn cmd_build(
    dotnet: &DotNet,
    project: &Path,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let outcome = dotnet
        .build(project, cancel)
        .await
        .context("Failed to run build")?;
    if json {
        print_json(&outcome)?;
    } else if outcome.succeeded {
        println!("Build succeeded: {}", project.display());
    }
    if let Some(diagnostic) = outcome.diagnostic {
        bail!("Build failed: {diagnostic}");
    }
    Ok(())
}

async fn cmd_locate_exe(dotnet: &DotNet, project: &Path, cancel: &CancellationToken) -> Result<()> {
    let path = dotnet
        .locate_executable(project, cancel)
        .await
        .context("Failed to locate patcher executable")?;
    println!("{}", path.display());
    Ok(())
}

async fn cmd_sync(
    local: PathBuf,
    remote: Option<String>,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let sync = RepositorySync::default();
    let descriptor = WorkspaceDescriptor::new(remote, local);
    let outcome = sync
        .reconcile(&descriptor, cancel)
        .await
        .with_context(|| format!("Failed to sync {}", descriptor.local.display()))?;
    if json {
        return print_json(&outcome);
    }
    println!("{}: {:?}", descriptor.local.display(), outcome);
    Ok(())
}

async fn load_profile(
    dotnet: &DotNet,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<Profile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read profile {}", path.display()))?;
    let file: ProfileFile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid profile {}", path.display()))?;

    let mut profile = Profile::new(file.id, file.release, Arc::new(PatcherIdSequence::new()));
    for settings in file.patchers {
        profile.add(settings);
    }

    let needs_sdk = profile
        .patchers()
        .iter()
        .any(|p| p.settings.on && p.settings.kind().needs_sdk());
    if needs_sdk {
        match dotnet.sdk_version(cancel).await {
            Ok(version) => profile.set_sdk(Some(version)),
            Err(e) => {
                warn!(error = %e, "dotnet SDK not available");
                profile.set_sdk(None);
            }
        }
    }
    Ok(profile)
}

async fn cmd_check_profile(
    dotnet: &DotNet,
    path: &Path,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let profile = load_profile(dotnet, path, cancel).await?;
    let states = profile.states();

    if json {
        let report: Vec<StateReport<'_>> = states
            .iter()
            .filter_map(|(id, state)| {
                let entry = profile.get(*id)?;
                Some(StateReport {
                    id: id.get(),
                    name: entry.display_name(),
                    on: entry.settings.on,
                    state,
                })
            })
            .collect();
        print_json(&report)?;
    } else {
        for (id, state) in &states {
            if let Some(entry) = profile.get(*id) {
                let marker = if entry.settings.on { " " } else { "-" };
                println!("{marker} {:<30} {state}", entry.display_name());
            }
        }
    }

    let overall = profile.overall_state();
    if !overall.is_runnable() {
        bail!("Profile is not runnable: {}", overall.reason());
    }
    Ok(())
}

async fn cmd_run(
    dotnet: &DotNet,
    config: &EngineConfig,
    path: &Path,
    settings: impl Fn(GameRelease) -> RunSettings,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let profile = load_profile(dotnet, path, cancel).await?;
    let factory = RunFactory::new(
        dotnet.clone(),
        Arc::new(RepositorySync::default()),
        &config.working_directory,
        profile.id(),
    );
    let mut runs = profile.runs(&factory).context("Profile is not runnable")?;
    info!(profile = %profile.id(), count = runs.len(), "starting patcher run");

    let printers: Vec<JoinHandle<()>> = runs
        .iter()
        .map(|run| {
            let name = run.name().to_string();
            let mut lines = merge_streams(run.subscribe_output(), run.subscribe_error());
            tokio::spawn(async move {
                while let Some(line) = lines.recv().await {
                    match line.stream {
                        StreamKind::Stdout => println!("[{name}] {}", line.text),
                        StreamKind::Stderr => eprintln!("[{name}] {}", line.text),
                    }
                }
            })
        })
        .collect();

    let run_settings = settings(profile.release().clone());
    let staging = run_staging_directory(&config.working_directory, profile.id());
    let report = run_patchers(&mut runs, profile.release(), &run_settings, &staging, cancel).await;
    for run in &runs {
        run.dispose();
    }
    for printer in printers {
        let _ = printer.await;
    }
    let report = report.context("Failed to publish patcher output")?;

    if json {
        print_json(&report)?;
    } else {
        for outcome in &report.outcomes {
            println!("{} ({}): {}", outcome.name, outcome.kind, outcome.status);
        }
        if let Some(output) = &report.output {
            println!("Output written to {}", output.display());
        }
    }

    let failed = report
        .outcomes
        .iter()
        .filter(|o| !matches!(o.status, PatcherStatus::Succeeded))
        .count();
    if failed > 0 {
        bail!("{failed} of {} patchers did not succeed", report.outcomes.len());
    }
    Ok(())
}
