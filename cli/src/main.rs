//! spacyls - run the spaCy config language server from a terminal.
//!
//! ```text
//! main() -> Cli::parse() -> run   -> repl::run() -> SessionController + LspLauncher
//!                        -> check -> Verifier::verify() once
//!                        -> config
//! ```
//!
//! Logs go to `~/.spacyls/logs/spacyls.log`; stdout carries only what the
//! user should read.

mod repl;

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use spacyls_config::{ExtensionConfig, config_path};
use spacyls_interpreter::{ProcessRunner, Verifier, Verify, resolve_selection};

#[derive(Parser)]
#[command(name = "spacyls")]
#[command(about = "Verify a Python interpreter and run the spaCy config language server")]
#[command(version)]
struct Cli {
    /// Config file to use instead of ~/.spacyls/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Activate, start the server, and read commands from stdin
    Run {
        /// Take the interpreter from <workspace>/.vscode/settings.json
        #[arg(long)]
        dev: bool,

        /// Workspace searched by --dev
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },
    /// Verify an interpreter or environment directory (exit 1 if incompatible)
    Check {
        /// Interpreter executable or environment directory
        interpreter: PathBuf,
    },
    /// Show the configuration file and default interpreter
    Config,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay quiet rather than mixing logs into command output.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.spacyls/logs/spacyls.log
    if let Some(config_path) = config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("spacyls.log"));
    }

    candidates.push(PathBuf::from(".spacyls").join("logs").join("spacyls.log"));

    candidates
}

async fn check(config: &ExtensionConfig, selection: &Path) -> ExitCode {
    let interpreter = resolve_selection(selection);
    let verifier = Verifier::new(ProcessRunner, config.requirements.clone())
        .with_timeout(config.interpreter.probe_timeout());

    let verdict = verifier.verify(&interpreter).await;
    println!("{}: {verdict}", interpreter.display());
    if verdict.is_compatible() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn show_config(config: &ExtensionConfig, override_path: Option<&Path>) {
    match override_path.map(Path::to_path_buf).or_else(config_path) {
        Some(path) => {
            let state = if path.exists() { "" } else { " (not created yet)" };
            println!("config: {}{state}", path.display());
        }
        None => println!("config: no home directory"),
    }
    match config.interpreter.default_interpreter() {
        Some(path) => println!("default interpreter: {}", path.display()),
        None => println!("default interpreter: (host environment)"),
    }
    println!("follow interpreter changes: {}", config.interpreter.follow_changes);
    for requirement in &config.requirements {
        println!(
            "requires: {} >= {}",
            requirement.name(),
            requirement.minimum()
        );
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let config = ExtensionConfig::load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::Run { dev, workspace } => {
            let dev_workspace = dev.then_some(workspace);
            repl::run(config, cli.config, dev_workspace).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { interpreter } => Ok(check(&config, &interpreter).await),
        Commands::Config => {
            show_config(&config, cli.config.as_deref());
            Ok(ExitCode::SUCCESS)
        }
    }
}
