//! A profile's patcher list and its readiness.
//!
//! States are recomputed on demand from current inputs: each patcher's own
//! checks are combined with a sibling-name uniqueness check. Nothing is
//! cached, so mutating settings and asking again is always consistent.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config_state::ConfigurationState;
use crate::dotnet::ToolVersion;
use crate::error::{RunError, RunResult};
use crate::git::GitBackend;
use crate::id::{PatcherId, PatcherIdSequence};
use crate::patcher::{snippet_state, Compilation, PatcherRun, RunFactory};
use crate::settings::{GameRelease, PatcherSettings, PatcherSource};

const NAMING_ERROR: &str = "<Naming Error>";
const NO_NAME: &str = "<No Name>";

/// One configured patcher.
#[derive(Debug, Clone)]
pub struct PatcherEntry {
    pub id: PatcherId,
    pub settings: PatcherSettings,
    compilation: Option<Result<Compilation, String>>,
}

impl PatcherEntry {
    /// Latest compile result for a snippet; `None` while compiling.
    pub fn compilation(&self) -> Option<&Result<Compilation, String>> {
        self.compilation.as_ref()
    }

    /// Nickname if set, otherwise a name derived from the settings.
    pub fn display_name(&self) -> String {
        if self.settings.nickname.trim().is_empty() {
            default_name(&self.settings)
        } else {
            self.settings.nickname.clone()
        }
    }
}

/// Name a patcher gets when the user did not pick one.
pub fn default_name(settings: &PatcherSettings) -> String {
    match &settings.source {
        PatcherSource::Cli(cli) => cli
            .path_to_executable
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| NAMING_ERROR.to_string()),
        PatcherSource::Solution(solution) => solution
            .project_path()
            .as_deref()
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        PatcherSource::Git(git) => Path::new(&git.selected_project_subpath)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        PatcherSource::Snippet(_) => NO_NAME.to_string(),
    }
}

fn file_state(path: &Path, what: &str) -> ConfigurationState {
    if path.as_os_str().is_empty() {
        ConfigurationState::halt(format!("No {what} specified"))
    } else if path.is_file() {
        ConfigurationState::ok()
    } else {
        ConfigurationState::halt(format!("{what} does not exist: {}", path.display()))
    }
}

pub struct Profile {
    id: String,
    release: GameRelease,
    ids: Arc<PatcherIdSequence>,
    sdk: Option<ToolVersion>,
    patchers: Vec<PatcherEntry>,
}

impl Profile {
    pub fn new(id: impl Into<String>, release: GameRelease, ids: Arc<PatcherIdSequence>) -> Self {
        Self {
            id: id.into(),
            release,
            ids,
            sdk: None,
            patchers: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn release(&self) -> &GameRelease {
        &self.release
    }

    /// Record the probed SDK, or `None` when probing failed.
    pub fn set_sdk(&mut self, sdk: Option<ToolVersion>) {
        self.sdk = sdk;
    }

    fn sdk_installed(&self) -> bool {
        self.sdk.as_ref().is_some_and(|v| v.acceptable)
    }

    pub fn add(&mut self, settings: PatcherSettings) -> PatcherId {
        let id = self.ids.next_id();
        debug!(profile = %self.id, patcher = %id, kind = %settings.kind(), "patcher added");
        self.patchers.push(PatcherEntry {
            id,
            settings,
            compilation: None,
        });
        id
    }

    pub fn remove(&mut self, id: PatcherId) -> Option<PatcherSettings> {
        let index = self.patchers.iter().position(|p| p.id == id)?;
        Some(self.patchers.remove(index).settings)
    }

    pub fn get(&self, id: PatcherId) -> Option<&PatcherEntry> {
        self.patchers.iter().find(|p| p.id == id)
    }

    pub fn patchers(&self) -> &[PatcherEntry] {
        &self.patchers
    }

    /// Replace a patcher's settings. A snippet whose code changed goes back
    /// to compiling.
    pub fn update(&mut self, id: PatcherId, settings: PatcherSettings) -> bool {
        let Some(entry) = self.patchers.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        if entry.settings.source != settings.source {
            entry.compilation = None;
        }
        entry.settings = settings;
        true
    }

    /// Record a snippet's compile result.
    pub fn set_compilation(&mut self, id: PatcherId, result: Result<Compilation, String>) -> bool {
        match self.patchers.iter_mut().find(|p| p.id == id) {
            Some(entry) => {
                entry.compilation = Some(result);
                true
            }
            None => false,
        }
    }

    fn internal_state(&self, entry: &PatcherEntry) -> ConfigurationState {
        match &entry.settings.source {
            PatcherSource::Cli(cli) => file_state(&cli.path_to_executable, "Executable"),
            PatcherSource::Solution(solution) => {
                let sln = file_state(&solution.solution_path, "Solution");
                if sln.failed() {
                    return sln;
                }
                if !self.sdk_installed() {
                    return ConfigurationState::halt("No dotnet SDK installed");
                }
                match solution.project_path() {
                    Some(project) => file_state(&project, "Project"),
                    None => ConfigurationState::halt("No project selected"),
                }
            }
            PatcherSource::Git(git) => {
                if git.remote_repo_path.trim().is_empty() {
                    ConfigurationState::halt("No remote repository specified")
                } else if git.selected_project_subpath.trim().is_empty() {
                    ConfigurationState::halt("No project selected")
                } else if !self.sdk_installed() {
                    ConfigurationState::halt("No dotnet SDK installed")
                } else {
                    ConfigurationState::ok()
                }
            }
            PatcherSource::Snippet(_) => snippet_state(entry.compilation.as_ref()),
        }
    }

    fn duplicate_state(&self, entry: &PatcherEntry) -> ConfigurationState {
        let name = entry.display_name();
        let duplicate = self
            .patchers
            .iter()
            .any(|other| other.id != entry.id && other.display_name() == name);
        if duplicate {
            ConfigurationState::halt("Duplicate name")
        } else {
            ConfigurationState::ok()
        }
    }

    /// Current readiness of one patcher.
    pub fn state(&self, id: PatcherId) -> Option<ConfigurationState> {
        let entry = self.get(id)?;
        Some(ConfigurationState::combine(
            self.internal_state(entry),
            [self.duplicate_state(entry)],
        ))
    }

    pub fn states(&self) -> Vec<(PatcherId, ConfigurationState)> {
        self.patchers
            .iter()
            .map(|entry| {
                let state = ConfigurationState::combine(
                    self.internal_state(entry),
                    [self.duplicate_state(entry)],
                );
                (entry.id, state)
            })
            .collect()
    }

    /// Roll-up over enabled patchers; success when none are enabled.
    pub fn overall_state(&self) -> ConfigurationState {
        let enabled: Vec<ConfigurationState> = self
            .states()
            .into_iter()
            .filter(|(id, _)| self.get(*id).is_some_and(|e| e.settings.on))
            .map(|(_, state)| state)
            .collect();
        ConfigurationState::combine_all(enabled).unwrap_or_default()
    }

    /// Whether a run may start.
    pub fn runnable(&self) -> bool {
        self.overall_state().is_runnable()
    }

    /// Runs for every enabled patcher, in order. Refuses when not runnable.
    pub fn runs<G: GitBackend + 'static>(
        &self,
        factory: &RunFactory<G>,
    ) -> RunResult<Vec<Box<dyn PatcherRun>>> {
        let overall = self.overall_state();
        if !overall.is_runnable() {
            return Err(RunError::NotRunnable(overall.reason().to_string()));
        }
        self.patchers
            .iter()
            .filter(|entry| entry.settings.on)
            .map(|entry| {
                let entry_point = entry
                    .compilation
                    .as_ref()
                    .and_then(|c| c.as_ref().ok())
                    .and_then(|c| c.entry_point.clone());
                let mut settings = entry.settings.clone();
                settings.nickname = entry.display_name();
                factory.create(entry.id, &settings, entry_point)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_state::Readiness;
    use crate::settings::{CliSource, GitSource, SnippetSource, SolutionSource};
    use std::path::PathBuf;

    fn profile() -> Profile {
        Profile::new(
            "Skyrim",
            GameRelease::new("SkyrimSE"),
            Arc::new(PatcherIdSequence::new()),
        )
    }

    fn cli(name: &str, exe: &Path) -> PatcherSettings {
        PatcherSettings::new(
            name,
            PatcherSource::Cli(CliSource {
                path_to_executable: exe.to_path_buf(),
                path_to_extra: None,
            }),
        )
    }

    fn sdk(raw: &str, acceptable: bool) -> Option<ToolVersion> {
        Some(ToolVersion {
            raw: raw.to_string(),
            acceptable,
        })
    }

    #[test]
    fn test_cli_missing_executable_is_halting() {
        let mut p = profile();
        let id = p.add(cli("Tweaks", Path::new("/definitely/not/here.exe")));
        let state = p.state(id).unwrap();
        assert!(state.is_halting());
        assert!(!p.runnable());
    }

    #[test]
    fn test_cli_existing_executable_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("tweaks.exe");
        std::fs::write(&exe, "").unwrap();

        let mut p = profile();
        let id = p.add(cli("Tweaks", &exe));
        assert_eq!(p.state(id).unwrap().readiness(), Readiness::Valid);
        assert!(p.runnable());
    }

    #[test]
    fn test_duplicate_names_halt_both() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("tweaks.exe");
        std::fs::write(&exe, "").unwrap();

        let mut p = profile();
        let a = p.add(cli("Tweaks", &exe));
        let b = p.add(cli("Tweaks", &exe));
        for id in [a, b] {
            let state = p.state(id).unwrap();
            assert!(state.is_halting());
            assert_eq!(state.reason(), "Duplicate name");
        }

        let mut renamed = p.get(b).unwrap().settings.clone();
        renamed.nickname = "Other".to_string();
        assert!(p.update(b, renamed));
        assert!(p.runnable());
    }

    #[test]
    fn test_own_halting_reason_wins_over_duplicate() {
        let mut p = profile();
        let a = p.add(cli("Same", Path::new("/missing/a.exe")));
        p.add(cli("Same", Path::new("/missing/b.exe")));
        let state = p.state(a).unwrap();
        assert!(state.reason().contains("does not exist"));
    }

    #[test]
    fn test_solution_rules() {
        let dir = tempfile::tempdir().unwrap();
        let sln = dir.path().join("P.sln");
        std::fs::write(&sln, "").unwrap();
        std::fs::create_dir(dir.path().join("P")).unwrap();

        let mut p = profile();
        let id = p.add(PatcherSettings::new(
            "P",
            PatcherSource::Solution(SolutionSource {
                solution_path: sln.clone(),
                project_subpath: "P/P.csproj".to_string(),
            }),
        ));

        assert_eq!(p.state(id).unwrap().reason(), "No dotnet SDK installed");
        p.set_sdk(sdk("3.1.404", false));
        assert_eq!(p.state(id).unwrap().reason(), "No dotnet SDK installed");

        p.set_sdk(sdk("5.0.100", true));
        let state = p.state(id).unwrap();
        assert!(state.is_halting());
        assert!(state.reason().starts_with("Project does not exist"));

        std::fs::write(dir.path().join("P/P.csproj"), "").unwrap();
        assert!(p.state(id).unwrap().is_runnable());
    }

    #[test]
    fn test_missing_solution_reported_before_sdk() {
        let mut p = profile();
        let id = p.add(PatcherSettings::new(
            "P",
            PatcherSource::Solution(SolutionSource {
                solution_path: PathBuf::from("/missing/P.sln"),
                project_subpath: "P/P.csproj".to_string(),
            }),
        ));
        assert!(p.state(id).unwrap().reason().starts_with("Solution does not exist"));
    }

    #[test]
    fn test_git_rules() {
        let mut p = profile();
        p.set_sdk(sdk("6.0.100", true));
        let id = p.add(PatcherSettings::new(
            "",
            PatcherSource::Git(GitSource {
                remote_repo_path: String::new(),
                selected_project_subpath: "Fixes/Fixes.csproj".to_string(),
            }),
        ));
        assert_eq!(p.state(id).unwrap().reason(), "No remote repository specified");

        p.update(
            id,
            PatcherSettings::new(
                "",
                PatcherSource::Git(GitSource {
                    remote_repo_path: "https://example.com/fixes.git".to_string(),
                    selected_project_subpath: "Fixes/Fixes.csproj".to_string(),
                }),
            ),
        );
        assert!(p.state(id).unwrap().is_runnable());
        assert_eq!(p.get(id).unwrap().display_name(), "Fixes");
    }

    #[test]
    fn test_snippet_compiling_then_compiled() {
        let mut p = profile();
        let id = p.add(PatcherSettings::new(
            "Snip",
            PatcherSource::Snippet(SnippetSource {
                id: String::new(),
                code: "state.LoadOrder...".to_string(),
            }),
        ));
        let state = p.state(id).unwrap();
        assert_eq!(state.readiness(), Readiness::NotReady);
        assert_eq!(state.reason(), "Compiling");

        p.set_compilation(id, Err("compiler crashed".to_string()));
        assert!(p.state(id).unwrap().is_halting());

        // Editing the code resets the verdict.
        p.update(
            id,
            PatcherSettings::new(
                "Snip",
                PatcherSource::Snippet(SnippetSource {
                    id: String::new(),
                    code: "changed".to_string(),
                }),
            ),
        );
        assert_eq!(p.state(id).unwrap().reason(), "Compiling");
    }

    #[test]
    fn test_disabled_patchers_do_not_gate() {
        let mut p = profile();
        let mut broken = cli("Broken", Path::new("/missing.exe"));
        broken.on = false;
        p.add(broken);
        assert!(p.runnable());
    }

    #[test]
    fn test_default_names() {
        assert_eq!(default_name(&cli("", Path::new("/bin/My Patcher.exe"))), "My Patcher");
        assert_eq!(default_name(&cli("", Path::new(""))), "<Naming Error>");
        assert_eq!(
            default_name(&PatcherSettings::new(
                "",
                PatcherSource::Solution(SolutionSource {
                    solution_path: PathBuf::from("/src/All.sln"),
                    project_subpath: "Tweaks/Tweaks.csproj".to_string(),
                }),
            )),
            "Tweaks"
        );
        assert_eq!(
            default_name(&PatcherSettings::new(
                "",
                PatcherSource::Snippet(SnippetSource::default())
            )),
            "<No Name>"
        );
    }

    #[test]
    fn test_runs_refused_when_not_runnable() {
        let mut p = profile();
        p.add(cli("Broken", Path::new("/missing.exe")));
        let factory = RunFactory::new(
            crate::dotnet::DotNet::default(),
            Arc::new(crate::repo_sync::RepositorySync::default()),
            "/tmp/Synthesis",
            "Skyrim",
        );
        assert!(matches!(p.runs(&factory), Err(RunError::NotRunnable(_))));
    }

    #[test]
    fn test_remove_and_ids() {
        let mut p = profile();
        let a = p.add(cli("A", Path::new("/a")));
        let b = p.add(cli("B", Path::new("/b")));
        assert!(b > a);
        assert!(p.remove(a).is_some());
        assert!(p.remove(a).is_none());
        assert_eq!(p.patchers().len(), 1);
    }
}
