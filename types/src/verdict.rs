//! Library requirements and the compatibility verdict for an interpreter.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::messages::MessageCode;
use crate::version::Version;

/// Minimum `pygls` release the analysis server is written against.
pub const PYGLS_MINIMUM: [u64; 3] = [1, 0, 0];
/// Minimum `spacy` release the analysis server is written against.
pub const SPACY_MINIMUM: [u64; 3] = [3, 4, 4];

/// A library the interpreter must provide, with its lowest accepted version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Requirement {
    name: String,
    minimum: Version,
}

impl Requirement {
    #[must_use]
    pub fn new(name: impl Into<String>, minimum: Version) -> Self {
        Self {
            name: name.into(),
            minimum,
        }
    }

    /// Distribution and import name (e.g. `pygls`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn minimum(&self) -> &Version {
        &self.minimum
    }

    #[must_use]
    pub fn is_satisfied_by(&self, observed: &Version) -> bool {
        observed.satisfies(&self.minimum)
    }
}

/// `pygls >= 1.0.0`, `spacy >= 3.4.4`, in probe order.
#[must_use]
pub fn default_requirements() -> Vec<Requirement> {
    vec![
        Requirement::new("pygls", Version::from_release(&PYGLS_MINIMUM)),
        Requirement::new("spacy", Version::from_release(&SPACY_MINIMUM)),
    ]
}

/// A version observed for one library inside the probed interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryVersion {
    pub name: String,
    pub version: Version,
}

/// A library present in the interpreter but older than required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmetRequirement {
    pub name: String,
    pub observed: Version,
    pub required: Version,
}

/// Classification of a candidate interpreter.
///
/// Produced fresh by every verification; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Compatible {
        versions: Vec<LibraryVersion>,
    },
    NotFound {
        path: PathBuf,
    },
    MissingDependency {
        /// Module named in the import error, when it could be recovered.
        module: Option<String>,
    },
    VersionMismatch {
        versions: Vec<LibraryVersion>,
        unmet: Vec<UnmetRequirement>,
    },
    ProbeError {
        reason: String,
    },
}

impl Verdict {
    #[must_use]
    pub fn is_compatible(&self) -> bool {
        matches!(self, Self::Compatible { .. })
    }

    /// Observed library versions, if the probe got far enough to report them.
    #[must_use]
    pub fn observed_versions(&self) -> &[LibraryVersion] {
        match self {
            Self::Compatible { versions } | Self::VersionMismatch { versions, .. } => versions,
            Self::NotFound { .. } | Self::MissingDependency { .. } | Self::ProbeError { .. } => &[],
        }
    }

    /// The most specific message code for this verdict.
    #[must_use]
    pub fn code(&self) -> MessageCode {
        match self {
            Self::Compatible { .. } => MessageCode::InterpreterCompatible,
            Self::NotFound { .. } => MessageCode::InterpreterNotFound,
            Self::MissingDependency { module } => match module.as_deref() {
                Some("pygls") => MessageCode::PyglsNotFound,
                Some("spacy") => MessageCode::SpacyNotFound,
                _ => MessageCode::MissingModules,
            },
            Self::VersionMismatch { unmet, .. } => match unmet.first().map(|u| u.name.as_str()) {
                Some("pygls") => MessageCode::PyglsVersion,
                Some("spacy") => MessageCode::SpacyVersion,
                _ => MessageCode::VersionsIncompatible,
            },
            Self::ProbeError { .. } => MessageCode::InterpreterError,
        }
    }
}

fn join_versions(versions: &[LibraryVersion]) -> String {
    versions
        .iter()
        .map(|v| format!("{} {}", v.name, v.version))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        match self {
            Self::Compatible { versions } => write!(f, "{code}: {}", join_versions(versions)),
            Self::NotFound { path } => write!(f, "{code}: {}", path.display()),
            Self::MissingDependency { module } => match module {
                Some(module) if code == MessageCode::MissingModules => {
                    write!(f, "{code}: {module}")
                }
                _ => write!(f, "{code}"),
            },
            Self::VersionMismatch { unmet, .. } => {
                let detail = unmet
                    .iter()
                    .map(|u| format!("{} {} >= {}", u.name, u.observed, u.required))
                    .collect::<Vec<_>>()
                    .join(" | ");
                write!(f, "{}: {detail}", MessageCode::VersionsIncompatible)?;
                if code != MessageCode::VersionsIncompatible {
                    write!(f, " ({})", code.tag())?;
                }
                Ok(())
            }
            Self::ProbeError { reason } => write!(f, "{code}: {reason}"),
        }
    }
}
