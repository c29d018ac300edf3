//! `~/.spacyls/config.toml`: loading, defaults, and interpreter persistence.

mod persist;

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use spacyls_types::{Requirement, default_requirements};
use thiserror::Error;

pub use persist::{persist_default_interpreter, persist_default_interpreter_at};

const CONFIG_DIR: &str = ".spacyls";

const CONFIG_FILE: &str = "config.toml";

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write config at {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("could not determine home directory for config")]
    NoHome,
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } | Self::Write { path, .. } => {
                Some(path)
            }
            Self::NoHome => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    pub interpreter: InterpreterConfig,
    pub server: ServerConfig,
    pub requirements: Vec<Requirement>,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig::default(),
            server: ServerConfig::default(),
            requirements: default_requirements(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Interpreter or environment directory. `${VAR}` references are expanded.
    pub default_path: Option<String>,
    pub follow_changes: bool,
    pub probe_timeout_secs: u64,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            default_path: None,
            follow_changes: true,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }
}

impl InterpreterConfig {
    /// The configured interpreter after env expansion; `None` when unset or blank.
    #[must_use]
    pub fn default_interpreter(&self) -> Option<PathBuf> {
        let raw = self.default_path.as_deref()?;
        let expanded = expand_env_vars(raw);
        let trimmed = expanded.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub module: String,
    /// Working directory for the server; the current directory when unset.
    pub root: Option<PathBuf>,
    pub args: Vec<String>,
    pub document_extensions: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            module: "server".to_string(),
            root: None,
            args: Vec::new(),
            document_extensions: vec!["cfg".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn root_or_current_dir(&self) -> io::Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => env::current_dir(),
        }
    }
}

/// Replace `${VAR}` with the variable's value (empty when unset).
///
/// An unclosed `${` is kept as written.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl ExtensionConfig {
    /// Load the user config. `Ok(None)` when there is no home directory or no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {}: {err}", path.display());
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {}: {err}", path.display());
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Like [`load_from`](Self::load_from), but any failure falls back to defaults.
    #[must_use]
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let loaded = match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        };
        match loaded {
            Ok(config) => config.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("Using default configuration: {err}");
                Self::default()
            }
        }
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use spacyls_types::Version;

    use super::*;

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("/opt/venv/bin/python"), "/opt/venv/bin/python");
    }

    #[test]
    fn expand_env_vars_single_var() {
        unsafe {
            std::env::set_var("SPACYLS_TEST_HOME", "/home/ines");
        }
        let result = expand_env_vars("${SPACYLS_TEST_HOME}/.venv");
        assert_eq!(result, "/home/ines/.venv");
        unsafe {
            std::env::remove_var("SPACYLS_TEST_HOME");
        }
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        unsafe {
            std::env::remove_var("SPACYLS_MISSING_FOR_TEST");
        }
        assert_eq!(expand_env_vars("a${SPACYLS_MISSING_FOR_TEST}b"), "ab");
    }

    #[test]
    fn expand_env_vars_unclosed_and_empty() {
        assert_eq!(expand_env_vars("test ${UNCLOSED"), "test ${UNCLOSED");
        assert_eq!(expand_env_vars("test ${} more"), "test  more");
    }

    #[test]
    fn parse_empty_config_gives_defaults() {
        let config: ExtensionConfig = toml::from_str("").unwrap();
        assert_eq!(config, ExtensionConfig::default());
        assert!(config.interpreter.follow_changes);
        assert_eq!(config.interpreter.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.server.module, "server");
        assert_eq!(config.server.document_extensions, vec!["cfg"]);
        assert_eq!(config.requirements, default_requirements());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[interpreter]
default_path = "/envs/nlp/bin/python"
follow_changes = false
probe_timeout_secs = 3

[server]
module = "spacy_ls"
root = "/opt/spacy-vscode"
args = ["--stdio"]
document_extensions = ["cfg", "ini"]

[[requirements]]
name = "pygls"
minimum = "1.0.0"

[[requirements]]
name = "spacy"
minimum = "3.5"
"#;
        let config: ExtensionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.interpreter.default_interpreter(),
            Some(PathBuf::from("/envs/nlp/bin/python"))
        );
        assert!(!config.interpreter.follow_changes);
        assert_eq!(config.interpreter.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.server.module, "spacy_ls");
        assert_eq!(
            config.server.root_or_current_dir().unwrap(),
            PathBuf::from("/opt/spacy-vscode")
        );
        assert_eq!(config.server.args, vec!["--stdio"]);
        assert_eq!(config.requirements.len(), 2);
        assert_eq!(
            config.requirements[1].minimum(),
            &"3.5".parse::<Version>().unwrap()
        );
    }

    #[test]
    fn blank_default_path_means_unset() {
        let config: ExtensionConfig =
            toml::from_str("[interpreter]\ndefault_path = \"  \"\n").unwrap();
        assert!(config.interpreter.default_interpreter().is_none());
    }

    #[test]
    fn bad_requirement_version_is_a_parse_error() {
        let result: Result<ExtensionConfig, _> =
            toml::from_str("[[requirements]]\nname = \"spacy\"\nminimum = \"latest\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ExtensionConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[interpreter\nfollow_changes = ").unwrap();

        let err = ExtensionConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), Some(path.as_path()));

        // Callers that can't act on the error get defaults.
        assert_eq!(
            ExtensionConfig::load_or_default(Some(&path)),
            ExtensionConfig::default()
        );
    }

    #[test]
    fn load_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nmodule = \"other\"\n").unwrap();

        let config = ExtensionConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(config.server.module, "other");
        assert!(config.interpreter.follow_changes);
    }

    #[test]
    fn config_path_is_under_home() {
        if let Some(path) = config_path() {
            assert!(path.ends_with(".spacyls/config.toml"));
        }
    }
}
