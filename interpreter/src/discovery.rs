//! Finding candidate interpreters.
//!
//! A user selection may name an interpreter executable or the virtual
//! environment directory that contains one. The host's "active interpreter"
//! is whatever environment the process was launched from.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Settings key the development workspace uses for its environment directory.
pub const DEV_INTERPRETER_KEY: &str = "python.defaultInterpreterPath";

#[cfg(windows)]
const ENV_INTERPRETER: [&str; 2] = ["Scripts", "python.exe"];
#[cfg(not(windows))]
const ENV_INTERPRETER: [&str; 2] = ["bin", "python"];

/// Executables tried on `PATH`, most specific first.
const PATH_CANDIDATES: [&str; 2] = ["python3", "python"];

/// Interpreter inside a virtual environment: `bin/python`, or
/// `Scripts\python.exe` on Windows.
#[must_use]
pub fn interpreter_in_env(env_dir: &Path) -> PathBuf {
    ENV_INTERPRETER
        .iter()
        .fold(env_dir.to_path_buf(), |path, part| path.join(part))
}

/// Resolve a user selection to an interpreter path.
///
/// Directories are treated as environments. Anything else, including a path
/// that does not exist, is returned unchanged so verification can report it.
#[must_use]
pub fn resolve_selection(selection: &Path) -> PathBuf {
    if selection.is_dir() {
        interpreter_in_env(selection)
    } else {
        selection.to_path_buf()
    }
}

#[cfg(windows)]
fn interpreter_in_conda(prefix: &Path) -> PathBuf {
    prefix.join("python.exe")
}

#[cfg(not(windows))]
fn interpreter_in_conda(prefix: &Path) -> PathBuf {
    interpreter_in_env(prefix)
}

/// The host's interpreter-management integration.
pub trait InterpreterHost: Send + Sync {
    /// Whether the host can report interpreters at all.
    fn is_available(&self) -> bool;

    /// The interpreter the host currently considers active.
    fn active_interpreter(&self) -> Option<PathBuf>;
}

/// Host backed by the process environment: `VIRTUAL_ENV`, `CONDA_PREFIX`,
/// then `python3`/`python` on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentHost {
    virtual_env: Option<PathBuf>,
    conda_prefix: Option<PathBuf>,
    search_path: Option<OsString>,
    cwd: PathBuf,
}

impl EnvironmentHost {
    #[must_use]
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var_os(key).filter(|v| !v.is_empty());
        Self {
            virtual_env: non_empty("VIRTUAL_ENV").map(PathBuf::from),
            conda_prefix: non_empty("CONDA_PREFIX").map(PathBuf::from),
            search_path: non_empty("PATH"),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    #[must_use]
    pub fn with_virtual_env(mut self, dir: impl Into<PathBuf>) -> Self {
        self.virtual_env = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_conda_prefix(mut self, dir: impl Into<PathBuf>) -> Self {
        self.conda_prefix = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    fn from_search_path(&self) -> Option<PathBuf> {
        let search_path = self.search_path.as_ref()?;
        PATH_CANDIDATES
            .iter()
            .find_map(|name| which::which_in(name, Some(search_path), &self.cwd).ok())
    }
}

impl InterpreterHost for EnvironmentHost {
    fn is_available(&self) -> bool {
        self.virtual_env.is_some() || self.conda_prefix.is_some() || self.search_path.is_some()
    }

    fn active_interpreter(&self) -> Option<PathBuf> {
        if let Some(env) = &self.virtual_env {
            return Some(interpreter_in_env(env));
        }
        if let Some(prefix) = &self.conda_prefix {
            return Some(interpreter_in_conda(prefix));
        }
        self.from_search_path()
    }
}

#[derive(Debug, Error)]
pub enum DevSettingsError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Interpreter named by a development workspace's `.vscode/settings.json`.
///
/// Returns `Ok(None)` when the file or the key is absent.
pub fn dev_settings_interpreter(workspace: &Path) -> Result<Option<PathBuf>, DevSettingsError> {
    let path = workspace.join(".vscode").join("settings.json");
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).map_err(|source| DevSettingsError::Read {
        path: path.clone(),
        source,
    })?;
    let settings: serde_json::Value =
        serde_json::from_str(&content).map_err(|source| DevSettingsError::Parse {
            path: path.clone(),
            source,
        })?;

    let Some(env_dir) = settings
        .get(DEV_INTERPRETER_KEY)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
    else {
        return Ok(None);
    };

    let env_dir = Path::new(env_dir);
    let env_dir = if env_dir.is_relative() {
        workspace.join(env_dir)
    } else {
        env_dir.to_path_buf()
    };
    Ok(Some(interpreter_in_env(&env_dir)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn env_interpreter_is_bin_python() {
        assert_eq!(
            interpreter_in_env(Path::new("/home/me/.venv")),
            PathBuf::from("/home/me/.venv/bin/python")
        );
    }

    #[cfg(windows)]
    #[test]
    fn env_interpreter_is_scripts_python_exe() {
        assert_eq!(
            interpreter_in_env(Path::new(r"C:\venv")),
            PathBuf::from(r"C:\venv\Scripts\python.exe")
        );
    }

    #[test]
    fn selection_directory_resolves_into_env() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_selection(dir.path()),
            interpreter_in_env(dir.path())
        );
    }

    #[test]
    fn selection_file_and_missing_path_are_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("python");
        fs::write(&file, "").unwrap();
        assert_eq!(resolve_selection(&file), file);

        let missing = dir.path().join("nope").join("python");
        assert_eq!(resolve_selection(&missing), missing);
    }

    #[test]
    fn empty_host_is_unavailable() {
        let host = EnvironmentHost::default();
        assert!(!host.is_available());
        assert!(host.active_interpreter().is_none());
    }

    #[test]
    fn virtual_env_wins_over_conda() {
        let host = EnvironmentHost::default()
            .with_conda_prefix("/opt/conda")
            .with_virtual_env("/work/.venv");
        assert!(host.is_available());
        assert_eq!(
            host.active_interpreter(),
            Some(interpreter_in_env(Path::new("/work/.venv")))
        );
    }

    #[test]
    fn conda_prefix_used_without_virtual_env() {
        let host = EnvironmentHost::default().with_conda_prefix("/opt/conda");
        assert_eq!(
            host.active_interpreter(),
            Some(interpreter_in_conda(Path::new("/opt/conda")))
        );
    }

    #[test]
    fn search_path_without_python_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let host = EnvironmentHost::default().with_search_path(dir.path().as_os_str());
        assert!(host.is_available());
        assert!(host.active_interpreter().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn search_path_finds_python3() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let python = dir.path().join("python3");
        fs::write(&python, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&python, fs::Permissions::from_mode(0o755)).unwrap();

        let host = EnvironmentHost::default().with_search_path(dir.path().as_os_str());
        assert_eq!(host.active_interpreter(), Some(python));
    }

    #[test]
    fn dev_settings_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(dev_settings_interpreter(dir.path()).unwrap().is_none());
    }

    #[test]
    fn dev_settings_resolves_relative_env() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".vscode")).unwrap();
        fs::write(
            dir.path().join(".vscode").join("settings.json"),
            r#"{ "python.defaultInterpreterPath": ".venv" }"#,
        )
        .unwrap();

        let resolved = dev_settings_interpreter(dir.path()).unwrap().unwrap();
        assert_eq!(resolved, interpreter_in_env(&dir.path().join(".venv")));
    }

    #[test]
    fn dev_settings_without_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".vscode")).unwrap();
        fs::write(
            dir.path().join(".vscode").join("settings.json"),
            r#"{ "editor.tabSize": 4 }"#,
        )
        .unwrap();
        assert!(dev_settings_interpreter(dir.path()).unwrap().is_none());
    }

    #[test]
    fn dev_settings_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".vscode")).unwrap();
        fs::write(dir.path().join(".vscode").join("settings.json"), "{ nope").unwrap();
        assert!(matches!(
            dev_settings_interpreter(dir.path()),
            Err(DevSettingsError::Parse { .. })
        ));
    }
}
