//! Toolchain probing against a scripted stand-in for the SDK driver.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use synthesis_exec::{CancellationToken, DotNet, ToolchainError};

/// Writes a fake `dotnet` whose behaviour per verb is given as shell snippets.
fn fake_dotnet(dir: &Path, cases: &str) -> PathBuf {
    let path = dir.join("dotnet");
    let body = format!(
        "#!/bin/sh\necho \"$@\" >> '{log}'\ncase \"$1\" in\n{cases}\nesac\n",
        log = dir.join("calls.log").display()
    );
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn sdk_version_single_line() {
    let dir = tempfile::tempdir().unwrap();
    let dotnet = DotNet::new(fake_dotnet(dir.path(), "  --version) echo 6.0.0-preview.1 ;;"));

    let version = dotnet.sdk_version(&CancellationToken::new()).await.unwrap();
    assert_eq!(version.raw, "6.0.0-preview.1");
    assert!(version.acceptable);
}

#[tokio::test]
async fn sdk_version_stderr_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let dotnet = DotNet::new(fake_dotnet(
        dir.path(),
        "  --version) echo 5.0.100; echo 'No SDKs were found.' >&2 ;;",
    ));

    match dotnet.sdk_version(&CancellationToken::new()).await {
        Err(ToolchainError::ErrorOutput { lines, .. }) => {
            assert_eq!(lines, vec!["No SDKs were found."]);
        }
        other => panic!("expected ErrorOutput, got {other:?}"),
    }
}

#[tokio::test]
async fn sdk_version_extra_lines_are_unexpected() {
    let dir = tempfile::tempdir().unwrap();
    let dotnet = DotNet::new(fake_dotnet(
        dir.path(),
        "  --version) echo 'Welcome to .NET!'; echo 5.0.100 ;;",
    ));

    let err = dotnet.sdk_version(&CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().starts_with("Unexpected messages"));
}

#[tokio::test]
async fn missing_driver_is_a_launch_error() {
    let dir = tempfile::tempdir().unwrap();
    let dotnet = DotNet::new(dir.path().join("no-dotnet-here"));

    match dotnet.sdk_version(&CancellationToken::new()).await {
        Err(ToolchainError::Process(e)) => assert!(e.is_not_found()),
        other => panic!("expected launch failure, got {other:?}"),
    }
}

const LISTING: &str = r#"  restore) echo 'Restored.' ;;
  list) cat <<'TABLE'
Project 'Patcher' has the following package references
   [net5.0]:
   Top-level Package                 Requested   Resolved   Latest
   > Mutagen.Bethesda                0.21.3      0.21.3     0.22.0
   > Mutagen.Bethesda.Synthesis      0.10.1      0.10.1     0.11.0
   > Noggog.CSharpExt (D)            2.0.1       2.0.1      2.1.0
   > Truncated.Row                   1.0.0
TABLE
  ;;"#;

#[tokio::test]
async fn listing_restores_first_then_parses_table() {
    let dir = tempfile::tempdir().unwrap();
    let dotnet = DotNet::new(fake_dotnet(dir.path(), LISTING));
    let project = Path::new("/src/Patcher/Patcher.csproj");

    let listings = dotnet
        .dependency_listing(project, true, true, &CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<_> = listings.iter().map(|l| l.package.as_str()).collect();
    assert_eq!(
        names,
        vec!["Mutagen.Bethesda", "Mutagen.Bethesda.Synthesis", "Noggog.CSharpExt"]
    );
    assert_eq!(listings[2].latest, "2.1.0");

    assert_eq!(
        calls(dir.path()),
        vec![
            "restore /src/Patcher/Patcher.csproj",
            "list /src/Patcher/Patcher.csproj package --outdated --include-prerelease",
        ]
    );
}

#[tokio::test]
async fn framework_versions_from_listing() {
    let dir = tempfile::tempdir().unwrap();
    let dotnet = DotNet::new(fake_dotnet(dir.path(), LISTING));

    let versions = dotnet
        .framework_versions(
            Path::new("/src/Patcher/Patcher.csproj"),
            false,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(versions.mutagen.as_deref(), Some("0.22.0"));
    assert_eq!(versions.synthesis.as_deref(), Some("0.11.0"));
}

#[tokio::test]
async fn listing_stderr_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let dotnet = DotNet::new(fake_dotnet(
        dir.path(),
        "  restore) ;;\n  list) echo 'error: a' >&2; echo 'error: b' >&2 ;;",
    ));

    let err = dotnet
        .dependency_listing(Path::new("/p.csproj"), false, false, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().ends_with("error: a\nerror: b"));
}

fn project(dir: &Path) -> PathBuf {
    let folder = dir.join("Patcher");
    std::fs::create_dir_all(&folder).unwrap();
    let project = folder.join("Patcher.csproj");
    std::fs::write(&project, "<Project />").unwrap();
    project
}

#[tokio::test]
async fn build_runs_in_project_folder_with_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let dotnet = DotNet::new(fake_dotnet(
        dir.path(),
        "  build) pwd; echo \"target $4\"; exit 0 ;;",
    ));
    let project = project(dir.path());

    let outcome = dotnet.build(&project, &CancellationToken::new()).await.unwrap();
    assert!(outcome.succeeded);
    let mut lines = outcome.log.lines();
    assert_eq!(
        std::fs::canonicalize(lines.next().unwrap()).unwrap(),
        std::fs::canonicalize(dir.path().join("Patcher")).unwrap()
    );
    assert_eq!(lines.next(), Some("target Patcher.csproj"));
    assert_eq!(calls(dir.path()), vec!["build --runtime win-x64 Patcher.csproj"]);
}

#[tokio::test]
async fn build_failure_mines_first_error() {
    let dir = tempfile::tempdir().unwrap();
    let project = project(dir.path());
    let prefixed = format!("{} : error CS0246: type not found", project.display());
    let dotnet = DotNet::new(fake_dotnet(
        dir.path(),
        &format!(
            "  build) echo 'error early'; echo 'Build FAILED.'; echo '   '; echo '{prefixed}'; echo 'error CS0103: name missing'; exit 1 ;;"
        ),
    ));

    let outcome = dotnet.build(&project, &CancellationToken::new()).await.unwrap();
    assert!(!outcome.succeeded);
    assert_eq!(
        outcome.diagnostic.as_deref(),
        Some("error CS0103: name missing")
    );
}

#[tokio::test]
async fn locate_executable_scrapes_output_path() {
    let dir = tempfile::tempdir().unwrap();
    let project = project(dir.path());
    let dotnet = DotNet::new(fake_dotnet(
        dir.path(),
        "  build) echo 'Restored.'; echo '  Patcher -> /out/bin/Patcher.dll'; exit 0 ;;",
    ));

    let exe = dotnet
        .locate_executable(&project, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(exe, PathBuf::from("/out/bin/Patcher.dll"));
}

#[tokio::test]
async fn locate_executable_distrusts_failed_builds() {
    let dir = tempfile::tempdir().unwrap();
    let project = project(dir.path());
    let dotnet = DotNet::new(fake_dotnet(
        dir.path(),
        "  build) echo '  Patcher -> /stale/Patcher.dll'; echo 'Build FAILED.'; echo 'error CS1002: ; expected'; exit 1 ;;",
    ));

    match dotnet.locate_executable(&project, &CancellationToken::new()).await {
        Err(ToolchainError::BuildFailed(diag)) => assert_eq!(diag, "error CS1002: ; expected"),
        other => panic!("expected BuildFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn locate_executable_without_output_line() {
    let dir = tempfile::tempdir().unwrap();
    let project = project(dir.path());
    let dotnet = DotNet::new(fake_dotnet(dir.path(), "  build) echo 'Build succeeded.' ;;"));

    let err = dotnet
        .locate_executable(&project, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ToolchainError::ExecutableNotFound));
    assert_eq!(err.to_string(), "Could not locate target executable.");
}

#[tokio::test]
async fn cancelled_build_reports_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let project = project(dir.path());
    let dotnet = DotNet::new(fake_dotnet(dir.path(), "  build) echo 'Restoring'; exec sleep 30 ;;"));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        dotnet.build(&project, &cancel),
    )
    .await
    .expect("cancelled build should finish promptly")
    .unwrap();
    assert!(!outcome.succeeded);
    assert_eq!(outcome.diagnostic.as_deref(), Some("Cancelled"));
}
