//! How a session turns a verified interpreter into a running server.

use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};

use spacyls_types::SessionId;
use tokio::sync::mpsc;

use crate::server::RunningServer;
use crate::types::LspEvent;

pub const DEFAULT_SERVER_MODULE: &str = "server";

pub const DEFAULT_LANGUAGE_ID: &str = "cfg";

/// Fixed launch parameters for the analysis server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    module: String,
    root: PathBuf,
    extra_args: Vec<String>,
    document_extensions: Vec<String>,
    language_id: String,
}

impl LaunchSpec {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            module: DEFAULT_SERVER_MODULE.to_string(),
            root: root.into(),
            extra_args: Vec::new(),
            document_extensions: vec![DEFAULT_LANGUAGE_ID.to_string()],
            language_id: DEFAULT_LANGUAGE_ID.to_string(),
        }
    }

    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Extensions are matched case-insensitively, with or without a leading dot.
    #[must_use]
    pub fn with_document_extensions(mut self, extensions: Vec<String>) -> Self {
        self.document_extensions = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// `-m <module>` followed by any extra arguments.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-m".to_string(), self.module.clone()];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    #[must_use]
    pub fn handles_document(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| {
                self.document_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

/// A live server owned by the session controller.
pub trait ServerHandle: Send {
    fn open_document(
        &mut self,
        path: &Path,
        text: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

/// Starts servers for the session controller.
pub trait ServerLauncher: Send + Sync {
    type Handle: ServerHandle;

    fn launch(
        &self,
        interpreter: &Path,
        session: SessionId,
    ) -> impl Future<Output = anyhow::Result<Self::Handle>> + Send;

    fn handles_document(&self, path: &Path) -> bool;
}

impl ServerHandle for RunningServer {
    async fn open_document(&mut self, path: &Path, text: &str) -> anyhow::Result<()> {
        self.notify_document(path, text).await
    }

    async fn shutdown(self) {
        RunningServer::shutdown(self).await;
    }
}

/// Launches the real server over stdio.
pub struct LspLauncher {
    spec: LaunchSpec,
    event_tx: mpsc::Sender<LspEvent>,
}

impl LspLauncher {
    #[must_use]
    pub fn new(spec: LaunchSpec, event_tx: mpsc::Sender<LspEvent>) -> Self {
        Self { spec, event_tx }
    }

    #[must_use]
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }
}

impl ServerLauncher for LspLauncher {
    type Handle = RunningServer;

    async fn launch(&self, interpreter: &Path, session: SessionId) -> anyhow::Result<RunningServer> {
        tracing::info!(
            session = %session,
            interpreter = %interpreter.display(),
            root = %self.spec.root().display(),
            "Launching {} server",
            self.spec.module()
        );
        RunningServer::start(interpreter, &self.spec, session, self.event_tx.clone()).await
    }

    fn handles_document(&self, path: &Path) -> bool {
        self.spec.handles_document(path)
    }
}
