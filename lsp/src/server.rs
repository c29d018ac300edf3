//! Server handle: owns the analysis server child process and its stdio tasks.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use spacyls_types::SessionId;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::launcher::LaunchSpec;
use crate::protocol::{self, MessageParams, Notification, Request};
use crate::types::{LspEvent, ServerStopReason};

const INIT_TIMEOUT: Duration = Duration::from_secs(30);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let is_response = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method) {
        (Some(id), None) if is_response => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method)) => Some(IncomingFrame::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method)) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Shared state the reader task needs to route frames.
struct Router {
    session: SessionId,
    pending: PendingMap,
    event_tx: mpsc::Sender<LspEvent>,
    writer_tx: mpsc::Sender<WriterCommand>,
}

impl Router {
    async fn dispatch(&self, frame: &serde_json::Value) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!(session = %self.session, "Ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                if let Some(tx) = self.pending.lock().await.remove(&id) {
                    let _ = tx.send(body);
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // Unanswered requests can stall the server, so refuse explicitly.
                tracing::debug!(session = %self.session, "Server request {method}: replying method not found");
                let reply = protocol::method_not_found(&id, &method);
                let _ = self.writer_tx.send(WriterCommand::Send(reply)).await;
            }
            IncomingFrame::Notification { method, params } => {
                self.notification(&method, params).await;
            }
        }
    }

    async fn notification(&self, method: &str, params: Option<serde_json::Value>) {
        let show = match method {
            "window/showMessage" => true,
            "window/logMessage" => false,
            _ => {
                tracing::trace!(session = %self.session, "Ignoring notification: {method}");
                return;
            }
        };
        let Some(params) = params else { return };
        let params = match serde_json::from_value::<MessageParams>(params) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(session = %self.session, "Unreadable {method} params: {e}");
                return;
            }
        };

        let session = self.session;
        let kind = params.kind();
        let message = params.message;
        let event = if show {
            LspEvent::ShowMessage {
                session,
                kind,
                message,
            }
        } else {
            LspEvent::LogMessage {
                session,
                kind,
                message,
            }
        };
        let _ = self.event_tx.send(event).await;
    }

    async fn stopped(&self, reason: ServerStopReason) {
        let _ = self
            .event_tx
            .send(LspEvent::ServerStopped {
                session: self.session,
                reason,
            })
            .await;
    }
}

/// A launched and initialized analysis server.
///
/// Holding one is proof the `initialize` handshake succeeded. Dropping it
/// kills the child.
pub struct RunningServer {
    session: SessionId,
    language_id: String,
    child: Child,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: u64,
    pending: PendingMap,
    /// URIs we've sent didOpen for.
    opened_docs: HashSet<String>,
    doc_versions: HashMap<String, i32>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl RunningServer {
    /// Spawn `interpreter <spec.args()>` in `spec.root()` and run the handshake.
    pub async fn start(
        interpreter: &Path,
        spec: &LaunchSpec,
        session: SessionId,
        event_tx: mpsc::Sender<LspEvent>,
    ) -> Result<Self> {
        let mut child = Command::new(interpreter)
            .args(spec.args())
            .current_dir(spec.root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", interpreter.display()))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!(session = %session, "Server write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let router = Router {
            session,
            pending: pending.clone(),
            event_tx,
            writer_tx: writer_tx.clone(),
        };
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => router.dispatch(&frame).await,
                    Ok(None) => {
                        tracing::info!(session = %session, "Server closed stdout");
                        router.stopped(ServerStopReason::Exited).await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(session = %session, "Server read error: {e}");
                        router.stopped(ServerStopReason::Failed(e.to_string())).await;
                        break;
                    }
                }
            }
        });

        let mut server = Self {
            session,
            language_id: spec.language_id().to_string(),
            child,
            writer_tx,
            next_id: 1,
            pending,
            opened_docs: HashSet::new(),
            doc_versions: HashMap::new(),
            reader_handle,
            writer_handle,
        };

        server.initialize(spec.root()).await?;

        Ok(server)
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    async fn initialize(&mut self, root: &Path) -> Result<()> {
        let root = std::path::absolute(root).context("resolving server root")?;
        let root_uri = protocol::path_to_file_uri(&root).context("converting server root to URI")?;

        let params = protocol::initialize_params(root_uri.as_str());
        let response = self
            .send_request("initialize", Some(params), INIT_TIMEOUT)
            .await?;

        if let Some(error) = response.get("error") {
            bail!(
                "initialize failed: {}",
                error["message"].as_str().unwrap_or("unknown error")
            );
        }

        self.send_notification("initialized", Some(serde_json::json!({})))
            .await
    }

    async fn send_request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_value(Request::new(id, method, params))
            .context("serializing request")?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            bail!("writer channel closed");
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                bail!("server exited before answering {method}");
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                bail!("{method} timed out");
            }
        }
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .context("serializing notification")?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))
    }

    /// didOpen the first time a document is seen, didChange with a bumped
    /// version afterwards.
    pub async fn notify_document(&mut self, path: &Path, text: &str) -> Result<()> {
        let uri = protocol::path_to_file_uri(path)?.to_string();
        if self.opened_docs.contains(&uri) {
            let version = self.doc_versions.entry(uri.clone()).or_insert(1);
            *version += 1;
            let params = protocol::did_change_params(&uri, *version, text);
            self.send_notification("textDocument/didChange", Some(params))
                .await
        } else {
            self.doc_versions.insert(uri.clone(), 1);
            let params = protocol::did_open_params(&uri, &self.language_id, 1, text);
            self.opened_docs.insert(uri);
            self.send_notification("textDocument/didOpen", Some(params))
                .await
        }
    }

    /// `shutdown`, `exit`, then a bounded wait before killing the child.
    pub async fn shutdown(mut self) {
        if let Ok(response) = self
            .send_request("shutdown", None, SHUTDOWN_TIMEOUT)
            .await
            && response.get("error").is_none()
        {
            let _ = self.send_notification("exit", None).await;
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait())
            .await
            .is_err()
        {
            tracing::debug!(session = %self.session, "Server didn't exit in time, killing");
            let _ = self.child.kill().await;
        }

        let _ = self.writer_handle.await;
        self.reader_handle.abort();
    }
}
