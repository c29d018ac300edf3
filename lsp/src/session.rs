//! Session controller: the only owner of the running server.
//!
//! Every state-changing operation takes the same async mutex for its whole
//! duration, so overlapping restarts, interpreter changes and exit reports
//! are applied one at a time and at most one server is ever live.

use std::path::{Path, PathBuf};

use spacyls_interpreter::{InterpreterHost, Verify, resolve_selection};
use spacyls_types::{MessageCode, SessionId, SessionState, SessionStatus, Severity, Verdict};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};

use crate::launcher::{ServerHandle, ServerLauncher};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{}", MessageCode::HostUnavailable)]
    HostUnavailable,
    #[error("{}", MessageCode::SelectInterpreter)]
    NoInterpreter,
    #[error("{0}")]
    Incompatible(Verdict),
    #[error("failed to launch server: {0:#}")]
    Launch(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Configured interpreter; preferred over the host's active one.
    pub default_interpreter: Option<PathBuf>,
    /// Whether interpreter-change notifications override a configured default.
    pub follow_changes: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            default_interpreter: None,
            follow_changes: true,
        }
    }
}

/// Something the host should surface to the user or persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Notice {
        code: MessageCode,
        detail: Option<String>,
    },
    /// A newly verified interpreter became the preferred one.
    InterpreterBound(PathBuf),
    Incompatible {
        interpreter: PathBuf,
        verdict: Verdict,
    },
    /// A change was rejected; `current` stays in effect.
    KeptPrevious {
        rejected: PathBuf,
        current: Option<PathBuf>,
    },
    /// A change notification was ignored in favour of the configured default.
    ChangeIgnored(PathBuf),
}

struct Inner<S> {
    state: SessionState,
    interpreter: Option<PathBuf>,
    preferred: Option<PathBuf>,
    server: Option<(SessionId, S)>,
    next_session: SessionId,
}

pub struct SessionController<V, L: ServerLauncher, H> {
    verifier: V,
    launcher: L,
    host: H,
    settings: ControllerSettings,
    inner: Mutex<Inner<L::Handle>>,
    status_tx: watch::Sender<SessionStatus>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl<V, L, H> SessionController<V, L, H>
where
    V: Verify,
    L: ServerLauncher,
    H: InterpreterHost,
{
    pub fn new(
        verifier: V,
        launcher: L,
        host: H,
        settings: ControllerSettings,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(SessionStatus::default());
        let preferred = settings
            .default_interpreter
            .as_deref()
            .map(resolve_selection);

        let controller = Self {
            verifier,
            launcher,
            host,
            settings,
            inner: Mutex::new(Inner {
                state: SessionState::Stopped,
                interpreter: None,
                preferred,
                server: None,
                next_session: SessionId::new(1),
            }),
            status_tx,
            event_tx,
        };
        (controller, event_rx)
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    #[must_use]
    pub fn current_interpreter(&self) -> Option<PathBuf> {
        self.status_tx
            .borrow()
            .interpreter()
            .map(Path::to_path_buf)
    }

    /// Receives every published status.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub async fn activate(&self) -> Result<(), SessionError> {
        if !self.host.is_available() {
            self.notice(MessageCode::HostUnavailable, None);
            return Err(SessionError::HostUnavailable);
        }
        self.start().await
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
    }

    pub async fn restart(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
        self.start_locked(&mut inner).await
    }

    /// The host reports that the active interpreter changed.
    ///
    /// Ignored when `follow_changes` is off and a default interpreter is
    /// configured.
    pub async fn on_interpreter_changed(&self, selection: &Path) -> Result<(), SessionError> {
        self.switch_interpreter(selection, true).await
    }

    /// The user explicitly picked an interpreter (or environment directory).
    ///
    /// Always honoured, even over a pinned default.
    pub async fn select_interpreter(&self, selection: &Path) -> Result<(), SessionError> {
        self.switch_interpreter(selection, false).await
    }

    async fn switch_interpreter(
        &self,
        selection: &Path,
        respect_pin: bool,
    ) -> Result<(), SessionError> {
        let candidate = resolve_selection(selection);
        let mut inner = self.inner.lock().await;

        if respect_pin
            && !self.settings.follow_changes
            && self.settings.default_interpreter.is_some()
        {
            tracing::info!(
                interpreter = %candidate.display(),
                "Ignoring interpreter change, configured default takes precedence"
            );
            self.emit(SessionEvent::ChangeIgnored(candidate));
            return Ok(());
        }

        let verdict = self.verifier.verify(&candidate).await;
        if !verdict.is_compatible() {
            self.reject(&candidate, &verdict);
            tracing::warn!(
                rejected = %candidate.display(),
                "Keeping previous interpreter"
            );
            self.emit(SessionEvent::KeptPrevious {
                rejected: candidate,
                current: inner.interpreter.clone(),
            });
            return Err(SessionError::Incompatible(verdict));
        }

        self.launch_locked(&mut inner, candidate).await
    }

    /// The server for `session` went away on its own. Returns whether it was live.
    pub async fn on_server_stopped(&self, session: SessionId) -> bool {
        let mut inner = self.inner.lock().await;
        let is_live = matches!(&inner.server, Some((live, _)) if *live == session);
        if !is_live {
            tracing::debug!(session = %session, "Ignoring exit of replaced server");
            return false;
        }

        tracing::warn!(session = %session, "Server exited unexpectedly");
        inner.server = None;
        inner.state = SessionState::Stopped;
        self.publish(&inner);
        self.notice(MessageCode::Stopped, Some("server exited".to_string()));
        true
    }

    /// Returns whether the document was sent to a server.
    pub async fn open_document(&self, path: &Path, text: &str) -> bool {
        if !self.launcher.handles_document(path) {
            return false;
        }
        let mut inner = self.inner.lock().await;
        let Some((session, server)) = inner.server.as_mut() else {
            return false;
        };
        match server.open_document(path, text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session = %session, path = %path.display(), "Failed to send document: {e:#}");
                false
            }
        }
    }

    pub async fn deactivate(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
        inner.state = SessionState::Stopped;
        self.publish(&inner);
    }

    async fn start_locked(&self, inner: &mut Inner<L::Handle>) -> Result<(), SessionError> {
        let Some(candidate) = inner
            .preferred
            .clone()
            .or_else(|| self.host.active_interpreter())
        else {
            self.notice(MessageCode::SelectInterpreter, None);
            return Err(SessionError::NoInterpreter);
        };

        let verdict = self.verifier.verify(&candidate).await;
        if !verdict.is_compatible() {
            self.reject(&candidate, &verdict);
            return Err(SessionError::Incompatible(verdict));
        }

        self.launch_locked(inner, candidate).await
    }

    /// Bind a verified interpreter and replace any live server with a new one.
    async fn launch_locked(
        &self,
        inner: &mut Inner<L::Handle>,
        interpreter: PathBuf,
    ) -> Result<(), SessionError> {
        self.stop_locked(inner).await;

        let rebound = inner.preferred.as_deref() != Some(interpreter.as_path());
        inner.interpreter = Some(interpreter.clone());
        inner.preferred = Some(interpreter.clone());
        if rebound {
            self.emit(SessionEvent::InterpreterBound(interpreter.clone()));
        }

        inner.state = SessionState::Starting;
        self.publish(inner);

        let session = inner.next_session;
        inner.next_session = session.next();

        match self.launcher.launch(&interpreter, session).await {
            Ok(server) => {
                inner.server = Some((session, server));
                inner.state = SessionState::Running;
                self.publish(inner);
                tracing::info!(session = %session, interpreter = %interpreter.display(), "Server running");
                self.notice(MessageCode::Started, None);
                Ok(())
            }
            Err(e) => {
                tracing::error!(session = %session, "Server launch failed: {e:#}");
                inner.state = SessionState::Stopped;
                self.publish(inner);
                Err(SessionError::Launch(e))
            }
        }
    }

    /// Shut down the live server, if any. Returns whether one was stopped.
    async fn stop_locked(&self, inner: &mut Inner<L::Handle>) -> bool {
        let Some((session, server)) = inner.server.take() else {
            return false;
        };
        tracing::info!(session = %session, "Stopping server");
        server.shutdown().await;
        inner.state = SessionState::Stopped;
        self.publish(inner);
        self.notice(MessageCode::Stopped, None);
        true
    }

    fn reject(&self, interpreter: &Path, verdict: &Verdict) {
        tracing::warn!(
            interpreter = %interpreter.display(),
            code = verdict.code().as_str(),
            "Interpreter rejected: {verdict}"
        );
        self.emit(SessionEvent::Incompatible {
            interpreter: interpreter.to_path_buf(),
            verdict: verdict.clone(),
        });
    }

    fn publish(&self, inner: &Inner<L::Handle>) {
        self.status_tx.send_replace(SessionStatus::new(
            inner.state,
            inner.interpreter.clone(),
        ));
    }

    fn notice(&self, code: MessageCode, detail: Option<String>) {
        match code.severity() {
            Severity::Error => tracing::error!(code = code.as_str(), "{}", code.text()),
            Severity::Warning => tracing::warn!(code = code.as_str(), "{}", code.text()),
            Severity::Info => tracing::info!(code = code.as_str(), "{}", code.text()),
        }
        self.emit(SessionEvent::Notice { code, detail });
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::warn!("Session event channel full, dropping {event:?}");
        }
    }
}
