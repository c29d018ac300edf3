//! Stable codes for every user-facing message.
//!
//! Codes are part of the user contract: they show up in notifications and
//! logs and are what people search for, so variants are never renumbered.

use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    /// E001
    HostUnavailable,
    /// E002
    InterpreterNotFound,
    /// E003
    MissingModules,
    /// E004
    VersionsIncompatible,
    /// E005
    InterpreterError,
    /// E006
    PyglsNotFound,
    /// E007
    SpacyNotFound,
    /// E008
    PyglsVersion,
    /// E009
    SpacyVersion,
    /// W001
    SelectInterpreter,
    /// I001
    Started,
    /// I002
    Stopped,
    /// I003
    InterpreterCompatible,
}

impl MessageCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HostUnavailable => "E001",
            Self::InterpreterNotFound => "E002",
            Self::MissingModules => "E003",
            Self::VersionsIncompatible => "E004",
            Self::InterpreterError => "E005",
            Self::PyglsNotFound => "E006",
            Self::SpacyNotFound => "E007",
            Self::PyglsVersion => "E008",
            Self::SpacyVersion => "E009",
            Self::SelectInterpreter => "W001",
            Self::Started => "I001",
            Self::Stopped => "I002",
            Self::InterpreterCompatible => "I003",
        }
    }

    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::HostUnavailable => "Python interpreter integration not available",
            Self::InterpreterNotFound => "Selected python interpreter path does not exist",
            Self::MissingModules => "Missing modules to run spaCy Extension",
            Self::VersionsIncompatible => "Module versions not compatible",
            Self::InterpreterError => "Error when using python interpreter",
            Self::PyglsNotFound => "Module pygls not found",
            Self::SpacyNotFound => "Module spaCy not found",
            Self::PyglsVersion => "Version of pygls not compatible",
            Self::SpacyVersion => "Version of spaCy not compatible",
            Self::SelectInterpreter => "Please select a python interpreter",
            Self::Started => "spaCy Extension started",
            Self::Stopped => "spaCy Extension stopped",
            Self::InterpreterCompatible => "Python interpreter compatible",
        }
    }

    #[must_use]
    pub const fn severity(self) -> Severity {
        match self.as_str().as_bytes()[0] {
            b'E' => Severity::Error,
            b'W' => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// Bracketed code alone, e.g. `[E008]`.
    #[must_use]
    pub fn tag(self) -> String {
        format!("[{}]", self.as_str())
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.as_str(), self.text())
    }
}

/// Status line shown while a server is running.
#[must_use]
pub fn status_active(interpreter: &Path) -> String {
    format!("spaCy Extension active on: {}", interpreter.display())
}

pub const STATUS_INACTIVE: &str = "spaCy Extension not active. Please select Python interpreter.";

pub const STATUS_INCOMPATIBLE: &str =
    "Selected python interpreter not compatible. See the output for more information.";
