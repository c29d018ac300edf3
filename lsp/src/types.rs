//! Events the running server reports back to the host.

use spacyls_types::SessionId;

/// Severity of a server-originated message (LSP `MessageType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Error,
    Warning,
    Info,
    Log,
}

impl MessageKind {
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Info),
            4 => Some(Self::Log),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStopReason {
    /// The server closed its stdout.
    Exited,
    /// Reading from the server failed.
    Failed(String),
}

/// An event emitted by a running server's reader task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LspEvent {
    /// `window/showMessage`: meant for the user.
    ShowMessage {
        session: SessionId,
        kind: MessageKind,
        message: String,
    },
    /// `window/logMessage`: meant for the log.
    LogMessage {
        session: SessionId,
        kind: MessageKind,
        message: String,
    },
    ServerStopped {
        session: SessionId,
        reason: ServerStopReason,
    },
}

impl LspEvent {
    #[must_use]
    pub fn session(&self) -> SessionId {
        match self {
            Self::ShowMessage { session, .. }
            | Self::LogMessage { session, .. }
            | Self::ServerStopped { session, .. } => *session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_from_lsp() {
        assert_eq!(MessageKind::from_lsp(1), Some(MessageKind::Error));
        assert_eq!(MessageKind::from_lsp(4), Some(MessageKind::Log));
        assert_eq!(MessageKind::from_lsp(0), None);
    }

    #[test]
    fn event_session_accessor() {
        let event = LspEvent::ServerStopped {
            session: SessionId::new(9),
            reason: ServerStopReason::Exited,
        };
        assert_eq!(event.session(), SessionId::new(9));
    }
}
