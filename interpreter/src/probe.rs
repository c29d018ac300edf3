//! Running the version probe inside a candidate interpreter.

use std::future::Future;
use std::io;
use std::path::Path;
use std::process::Stdio;

use spacyls_types::Requirement;
use tokio::process::Command;

/// Captured result of one probe subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutput {
    pub success: bool,
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Spawns a program to completion and captures its output.
///
/// Injected into the verifier so tests can script interpreter behaviour and
/// observe whether a process would have been spawned.
pub trait ProbeRunner: Send + Sync {
    fn run(
        &self,
        program: &Path,
        args: &[String],
    ) -> impl Future<Output = io::Result<ProbeOutput>> + Send;
}

/// Runs probes as real subprocesses.
///
/// The child is killed if the returned future is dropped, which is how the
/// verifier's timeout cancels a hung interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProbeRunner for ProcessRunner {
    async fn run(&self, program: &Path, args: &[String]) -> io::Result<ProbeOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(ProbeOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn python_str(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Inline script that imports every required module and prints their
/// distribution versions, space separated, in requirement order.
///
/// Importing first makes a missing library fail with `ModuleNotFoundError`
/// rather than a metadata lookup error.
#[must_use]
pub fn probe_script(requirements: &[Requirement]) -> String {
    let names = requirements
        .iter()
        .map(|r| python_str(r.name()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "import importlib.metadata as _m; _n = ({names},); \
         [__import__(_x) for _x in _n]; \
         print(' '.join(_m.version(_x) for _x in _n))"
    )
}

/// Arguments passed to the interpreter for a probe: `-c <script>`.
#[must_use]
pub fn probe_args(requirements: &[Requirement]) -> Vec<String> {
    vec!["-c".to_string(), probe_script(requirements)]
}
