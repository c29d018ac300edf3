//! Session lifecycle state shared between the controller and its host.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::messages::{STATUS_INACTIVE, status_active};

/// Identifies one launched server instance.
///
/// Ids increase monotonically within an activation, so a late exit report
/// from a replaced server can be told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl SessionState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
        }
    }
}

/// Snapshot published after every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    state: SessionState,
    interpreter: Option<PathBuf>,
}

impl SessionStatus {
    #[must_use]
    pub fn new(state: SessionState, interpreter: Option<PathBuf>) -> Self {
        Self { state, interpreter }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The interpreter bound to the session, if one was ever verified.
    #[must_use]
    pub fn interpreter(&self) -> Option<&Path> {
        self.interpreter.as_deref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Text for the status indicator.
    #[must_use]
    pub fn indicator(&self) -> String {
        match (&self.state, &self.interpreter) {
            (SessionState::Running, Some(path)) => status_active(path),
            _ => STATUS_INACTIVE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_stopped_without_interpreter() {
        let status = SessionStatus::default();
        assert_eq!(status.state(), SessionState::Stopped);
        assert!(status.interpreter().is_none());
        assert!(!status.is_active());
        assert_eq!(status.indicator(), STATUS_INACTIVE);
    }

    #[test]
    fn running_indicator_names_interpreter() {
        let status = SessionStatus::new(
            SessionState::Running,
            Some(PathBuf::from("/venv/bin/python")),
        );
        assert!(status.is_active());
        assert_eq!(
            status.indicator(),
            "spaCy Extension active on: /venv/bin/python"
        );
    }

    #[test]
    fn stopped_with_bound_interpreter_is_inactive() {
        let status = SessionStatus::new(
            SessionState::Stopped,
            Some(PathBuf::from("/venv/bin/python")),
        );
        assert_eq!(status.indicator(), STATUS_INACTIVE);
    }

    #[test]
    fn session_ids_increase() {
        let first = SessionId::new(1);
        assert!(first.next() > first);
        assert_eq!(first.next().get(), 2);
        assert_eq!(first.to_string(), "#1");
    }
}
