//! `spacyls run`: the interactive command loop around one session controller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use spacyls_config::{ExtensionConfig, persist_default_interpreter, persist_default_interpreter_at};
use spacyls_interpreter::{EnvironmentHost, ProcessRunner, Verifier, dev_settings_interpreter};
use spacyls_lsp::{
    ControllerSettings, LaunchSpec, LspEvent, LspLauncher, MessageKind, SessionController,
    SessionError, SessionEvent,
};
use spacyls_types::{STATUS_INCOMPATIBLE, SessionStatus};

const LSP_EVENT_CAPACITY: usize = 256;

const HELP: &str = "\
commands:
  status          show whether the server is running
  interpreter     show the bound interpreter
  restart         stop and start the server
  stop            stop the server
  use <path>      switch to another interpreter or environment directory
                  (applies even when the configured default is pinned)
  open <file>     send a .cfg document to the server
  help            show this help
  quit            stop the server and exit";

type Controller = SessionController<Verifier<ProcessRunner>, LspLauncher, EnvironmentHost>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Status,
    Interpreter,
    Restart,
    Stop,
    Use(PathBuf),
    Open(PathBuf),
    Help,
    Quit,
}

impl Command {
    /// `Ok(None)` for a blank line.
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let needs_path = |name: &str| {
            if rest.is_empty() {
                Err(format!("usage: {name} <path>"))
            } else {
                Ok(PathBuf::from(rest))
            }
        };

        let command = match word {
            "status" => Self::Status,
            "interpreter" => Self::Interpreter,
            "restart" => Self::Restart,
            "stop" => Self::Stop,
            "use" => Self::Use(needs_path("use")?),
            "open" => Self::Open(needs_path("open")?),
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{other}' (try 'help')")),
        };
        Ok(Some(command))
    }
}

fn controller_settings(
    config: &ExtensionConfig,
    dev_workspace: Option<&Path>,
) -> ControllerSettings {
    let mut default_interpreter = config.interpreter.default_interpreter();

    if let Some(workspace) = dev_workspace {
        match dev_settings_interpreter(workspace) {
            Ok(Some(path)) => {
                tracing::info!(interpreter = %path.display(), "Using development interpreter");
                default_interpreter = Some(path);
            }
            Ok(None) => {
                tracing::info!(workspace = %workspace.display(), "No development interpreter configured");
            }
            Err(e) => {
                tracing::warn!("Ignoring development settings: {e}");
                println!("Ignoring development settings: {e}");
            }
        }
    }

    ControllerSettings {
        default_interpreter,
        follow_changes: config.interpreter.follow_changes,
    }
}

fn persist_interpreter(config_override: Option<&Path>, interpreter: &Path) {
    let result = match config_override {
        Some(path) => persist_default_interpreter_at(path, interpreter),
        None => persist_default_interpreter(interpreter),
    };
    if let Err(e) = result {
        tracing::warn!("Failed to persist interpreter: {e}");
        println!("Could not save interpreter to config: {e}");
    }
}

fn report_error(err: &SessionError) {
    match err {
        // Already surfaced through session events.
        SessionError::Incompatible(_) | SessionError::NoInterpreter | SessionError::HostUnavailable => {}
        SessionError::Launch(_) => println!("{err}"),
    }
}

fn show_session_event(event: SessionEvent, config_override: Option<&Path>) {
    match event {
        SessionEvent::Notice { code, detail } => match detail {
            Some(detail) => println!("{code} ({detail})"),
            None => println!("{code}"),
        },
        SessionEvent::InterpreterBound(path) => persist_interpreter(config_override, &path),
        SessionEvent::Incompatible {
            interpreter,
            verdict,
        } => {
            println!("{}: {verdict}", interpreter.display());
            println!("{STATUS_INCOMPATIBLE}");
        }
        SessionEvent::KeptPrevious { rejected, current } => match current {
            Some(current) => println!(
                "Not switching to {}; still using {}",
                rejected.display(),
                current.display()
            ),
            None => println!("Not switching to {}", rejected.display()),
        },
        SessionEvent::ChangeIgnored(path) => println!(
            "Ignoring {}: the configured default interpreter is pinned",
            path.display()
        ),
    }
}

fn show_status(status: &SessionStatus) {
    println!("{} [{}]", status.indicator(), status.state().label());
}

fn spawn_session_op<F, Fut>(controller: &Arc<Controller>, op: F)
where
    F: FnOnce(Arc<Controller>) -> Fut,
    Fut: Future<Output = Result<(), SessionError>> + Send + 'static,
{
    let fut = op(Arc::clone(controller));
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            report_error(&e);
        }
    });
}

async fn open_file(controller: Arc<Controller>, path: PathBuf) {
    let path = match std::path::absolute(&path) {
        Ok(path) => path,
        Err(e) => {
            println!("Cannot resolve {}: {e}", path.display());
            return;
        }
    };
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) => {
            println!("Cannot read {}: {e}", path.display());
            return;
        }
    };
    if !controller.open_document(&path, &text).await {
        println!(
            "Not sent: {} (server not running or not a config document)",
            path.display()
        );
    }
}

/// Handle one command. Returns `false` to leave the loop.
fn dispatch(command: Command, controller: &Arc<Controller>) -> bool {
    match command {
        Command::Status => show_status(&controller.status()),
        Command::Interpreter => match controller.current_interpreter() {
            Some(path) => println!("{}", path.display()),
            None => println!("no interpreter bound"),
        },
        Command::Restart => {
            spawn_session_op(controller, |c| async move { c.restart().await });
        }
        Command::Stop => {
            let c = Arc::clone(controller);
            tokio::spawn(async move { c.stop().await });
        }
        Command::Use(path) => {
            spawn_session_op(controller, |c| async move {
                c.select_interpreter(&path).await
            });
        }
        Command::Open(path) => {
            tokio::spawn(open_file(Arc::clone(controller), path));
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

fn show_lsp_event(event: &LspEvent) {
    match event {
        LspEvent::ShowMessage { kind, message, .. } => {
            let prefix = match kind {
                MessageKind::Error => "server error",
                MessageKind::Warning => "server warning",
                MessageKind::Info | MessageKind::Log => "server",
            };
            println!("[{prefix}] {message}");
        }
        LspEvent::LogMessage {
            session,
            kind,
            message,
        } => match kind {
            MessageKind::Error => tracing::error!(session = %session, "{message}"),
            MessageKind::Warning => tracing::warn!(session = %session, "{message}"),
            MessageKind::Info => tracing::info!(session = %session, "{message}"),
            MessageKind::Log => tracing::debug!(session = %session, "{message}"),
        },
        LspEvent::ServerStopped { .. } => {}
    }
}

pub async fn run(
    config: ExtensionConfig,
    config_override: Option<PathBuf>,
    dev_workspace: Option<PathBuf>,
) -> Result<()> {
    let settings = controller_settings(&config, dev_workspace.as_deref());

    let root = config
        .server
        .root_or_current_dir()
        .context("resolving server root")?;
    let spec = LaunchSpec::new(root)
        .with_module(config.server.module.clone())
        .with_extra_args(config.server.args.clone())
        .with_document_extensions(config.server.document_extensions.clone());

    let (lsp_tx, mut lsp_rx) = mpsc::channel(LSP_EVENT_CAPACITY);
    let launcher = LspLauncher::new(spec, lsp_tx);
    let verifier = Verifier::new(ProcessRunner, config.requirements.clone())
        .with_timeout(config.interpreter.probe_timeout());
    let host = EnvironmentHost::from_env();

    let (controller, mut session_events) =
        SessionController::new(verifier, launcher, host, settings);
    let controller = Arc::new(controller);
    let mut status_rx = controller.subscribe();

    let mut activation = tokio::spawn({
        let c = Arc::clone(&controller);
        async move { c.activate().await }
    });
    let mut activating = true;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        tokio::select! {
            joined = &mut activation, if activating => {
                activating = false;
                match joined.context("activation task failed")? {
                    Ok(()) => {}
                    Err(SessionError::HostUnavailable) => {
                        // Nothing can start without the host's interpreter integration.
                        while let Ok(event) = session_events.try_recv() {
                            show_session_event(event, config_override.as_deref());
                        }
                        bail!(SessionError::HostUnavailable);
                    }
                    Err(e) => report_error(&e),
                }
            }
            line = stdin.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(Some(command)) => {
                        if !dispatch(command, &controller) {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                }
            }
            Some(event) = session_events.recv() => {
                show_session_event(event, config_override.as_deref());
            }
            Some(event) = lsp_rx.recv() => {
                show_lsp_event(&event);
                if let LspEvent::ServerStopped { session, reason } = event {
                    tracing::info!(session = %session, "Server stopped: {reason:?}");
                    let c = Arc::clone(&controller);
                    tokio::spawn(async move { c.on_server_stopped(session).await });
                }
            }
            Ok(()) = status_rx.changed() => {
                let status = status_rx.borrow_and_update().clone();
                show_status(&status);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    controller.deactivate().await;
    while let Ok(event) = session_events.try_recv() {
        show_session_event(event, config_override.as_deref());
    }
    Ok(())
}
