//! Environment verification: is this interpreter able to run the server?

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use spacyls_types::{
    LibraryVersion, Requirement, UnmetRequirement, Verdict, Version, default_requirements,
};

use crate::probe::{ProbeOutput, ProbeRunner, ProcessRunner, probe_args};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Markers Python prints when an import fails.
const IMPORT_ERROR_MARKERS: [&str; 2] = ["ModuleNotFoundError:", "ImportError:"];

/// Classifies a candidate interpreter. Never fails: every failure is a verdict.
pub trait Verify: Send + Sync {
    fn verify(&self, interpreter: &Path) -> impl Future<Output = Verdict> + Send;
}

pub struct Verifier<R = ProcessRunner> {
    runner: R,
    requirements: Vec<Requirement>,
    timeout: Duration,
}

impl Verifier<ProcessRunner> {
    /// Verifier for the default requirements using real subprocesses.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ProcessRunner, default_requirements())
    }
}

impl<R: ProbeRunner> Verifier<R> {
    #[must_use]
    pub fn new(runner: R, requirements: Vec<Requirement>) -> Self {
        Self {
            runner,
            requirements,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    #[must_use]
    pub fn runner(&self) -> &R {
        &self.runner
    }
}

impl<R: ProbeRunner> Verify for Verifier<R> {
    async fn verify(&self, interpreter: &Path) -> Verdict {
        if !interpreter.exists() {
            tracing::error!(path = %interpreter.display(), "Interpreter does not exist");
            return Verdict::NotFound {
                path: interpreter.to_path_buf(),
            };
        }

        let args = probe_args(&self.requirements);
        let run = self.runner.run(interpreter, &args);
        let verdict = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => classify(&output, &self.requirements),
            Ok(Err(e)) => Verdict::ProbeError {
                reason: format!("failed to run interpreter: {e}"),
            },
            Err(_) => Verdict::ProbeError {
                reason: format!("probe timed out after {}s", self.timeout.as_secs_f32()),
            },
        };

        if verdict.is_compatible() {
            tracing::info!(path = %interpreter.display(), "{verdict}");
        } else {
            tracing::error!(path = %interpreter.display(), "{verdict}");
        }
        verdict
    }
}

/// Top-level module named by `No module named 'x.y'`.
fn missing_module(stderr: &str) -> Option<String> {
    let (_, rest) = stderr.split_once("No module named")?;
    let quoted = rest.trim_start().strip_prefix(['\'', '"'])?;
    let end = quoted.find(['\'', '"'])?;
    let module = &quoted[..end];
    let top = module.split('.').next().unwrap_or(module);
    (!top.is_empty()).then(|| top.to_string())
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rev().find(|l| !l.is_empty())
}

/// Classify captured probe output against the requirements.
///
/// Import errors only count when the interpreter itself failed; a successful
/// run may still print warnings that mention them.
#[must_use]
pub fn classify(output: &ProbeOutput, requirements: &[Requirement]) -> Verdict {
    if !output.success {
        if IMPORT_ERROR_MARKERS
            .iter()
            .any(|marker| output.stderr.contains(marker))
        {
            return Verdict::MissingDependency {
                module: missing_module(&output.stderr),
            };
        }

        let reason = match (last_line(&output.stderr), output.code) {
            (Some(line), _) => line.to_string(),
            (None, Some(code)) => format!("interpreter exited with status {code}"),
            (None, None) => "interpreter terminated by signal".to_string(),
        };
        return Verdict::ProbeError { reason };
    }

    let tokens: Vec<&str> = output.stdout.split_whitespace().collect();
    if tokens.len() != requirements.len() {
        return Verdict::ProbeError {
            reason: format!(
                "expected {} version strings, got '{}'",
                requirements.len(),
                output.stdout.trim()
            ),
        };
    }

    let mut versions = Vec::with_capacity(requirements.len());
    let mut unmet = Vec::new();
    for (requirement, token) in requirements.iter().zip(tokens) {
        let observed = match Version::parse(token) {
            Ok(v) => v,
            Err(e) => {
                return Verdict::ProbeError {
                    reason: format!("unreadable {} version: {e}", requirement.name()),
                };
            }
        };
        if !requirement.is_satisfied_by(&observed) {
            unmet.push(UnmetRequirement {
                name: requirement.name().to_string(),
                observed: observed.clone(),
                required: requirement.minimum().clone(),
            });
        }
        versions.push(LibraryVersion {
            name: requirement.name().to_string(),
            version: observed,
        });
    }

    if unmet.is_empty() {
        Verdict::Compatible { versions }
    } else {
        Verdict::VersionMismatch { versions, unmet }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted runner that records every spawn.
    struct FakeRunner {
        calls: AtomicUsize,
        last_program: Mutex<Option<PathBuf>>,
        response: Box<dyn Fn() -> io::Result<ProbeOutput> + Send + Sync>,
        delay: Option<Duration>,
    }

    impl FakeRunner {
        fn replying(stdout: &str) -> Self {
            let stdout = stdout.to_string();
            Self::with(move || {
                Ok(ProbeOutput {
                    success: true,
                    code: Some(0),
                    stdout: stdout.clone(),
                    stderr: String::new(),
                })
            })
        }

        fn failing(stderr: &str) -> Self {
            let stderr = stderr.to_string();
            Self::with(move || {
                Ok(ProbeOutput {
                    success: false,
                    code: Some(1),
                    stdout: String::new(),
                    stderr: stderr.clone(),
                })
            })
        }

        fn with(f: impl Fn() -> io::Result<ProbeOutput> + Send + Sync + 'static) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_program: Mutex::new(None),
                response: Box::new(f),
                delay: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProbeRunner for FakeRunner {
        async fn run(&self, program: &Path, _args: &[String]) -> io::Result<ProbeOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_program.lock().unwrap() = Some(program.to_path_buf());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.response)()
        }
    }

    fn existing_interpreter() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let python = dir.path().join("python");
        std::fs::write(&python, "").unwrap();
        (dir, python)
    }

    fn verifier(runner: FakeRunner) -> Verifier<FakeRunner> {
        Verifier::new(runner, default_requirements())
    }

    #[tokio::test]
    async fn nonexistent_path_is_not_found_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("bin").join("python");
        let verifier = verifier(FakeRunner::replying("1.0.0 3.4.4"));

        let verdict = verifier.verify(&missing).await;

        assert_eq!(verdict, Verdict::NotFound { path: missing });
        assert_eq!(verifier.runner().calls(), 0);
    }

    #[tokio::test]
    async fn minimum_versions_are_compatible() {
        let (_dir, python) = existing_interpreter();
        let verifier = verifier(FakeRunner::replying("1.0.0 3.4.4\n"));

        let verdict = verifier.verify(&python).await;

        assert!(verdict.is_compatible(), "{verdict:?}");
        let versions = verdict.observed_versions();
        assert_eq!(versions[0].name, "pygls");
        assert_eq!(versions[0].version.as_str(), "1.0.0");
        assert_eq!(versions[1].version.as_str(), "3.4.4");
        assert_eq!(verifier.runner().calls(), 1);
        assert_eq!(
            verifier.runner().last_program.lock().unwrap().as_deref(),
            Some(python.as_path())
        );
    }

    #[tokio::test]
    async fn old_pygls_is_version_mismatch() {
        let (_dir, python) = existing_interpreter();
        let verifier = verifier(FakeRunner::replying("0.9.0 3.4.4"));

        let verdict = verifier.verify(&python).await;

        match verdict {
            Verdict::VersionMismatch { versions, unmet } => {
                assert_eq!(versions.len(), 2);
                assert_eq!(unmet.len(), 1);
                assert_eq!(unmet[0].name, "pygls");
                assert_eq!(unmet[0].observed.as_str(), "0.9.0");
                assert_eq!(unmet[0].required.as_str(), "1.0.0");
            }
            other => panic!("expected VersionMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn newline_separated_versions_are_accepted() {
        let (_dir, python) = existing_interpreter();
        let verifier = verifier(FakeRunner::replying("1.2.0\n3.7.2\n"));
        assert!(verifier.verify(&python).await.is_compatible());
    }

    #[tokio::test]
    async fn module_not_found_is_missing_dependency() {
        let (_dir, python) = existing_interpreter();
        let verifier = verifier(FakeRunner::failing(
            "Traceback (most recent call last):\n  File \"<string>\", line 1, in <module>\n\
             ModuleNotFoundError: No module named 'spacy'\n",
        ));

        let verdict = verifier.verify(&python).await;

        assert_eq!(
            verdict,
            Verdict::MissingDependency {
                module: Some("spacy".to_string())
            }
        );
    }

    #[tokio::test]
    async fn spawn_failure_is_probe_error() {
        let (_dir, python) = existing_interpreter();
        let verifier = verifier(FakeRunner::with(|| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }));

        let verdict = verifier.verify(&python).await;

        assert!(
            matches!(&verdict, Verdict::ProbeError { reason } if reason.contains("denied")),
            "{verdict:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_times_out() {
        let (_dir, python) = existing_interpreter();
        let mut runner = FakeRunner::replying("1.0.0 3.4.4");
        runner.delay = Some(Duration::from_secs(3600));
        let verifier = verifier(runner).with_timeout(Duration::from_secs(5));

        let verdict = verifier.verify(&python).await;

        assert!(
            matches!(&verdict, Verdict::ProbeError { reason } if reason.contains("timed out")),
            "{verdict:?}"
        );
    }

    #[test]
    fn classify_unrecognised_failure_uses_last_stderr_line() {
        let output = ProbeOutput {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: "Traceback\nSyntaxError: invalid syntax\n\n".to_string(),
        };
        assert_eq!(
            classify(&output, &default_requirements()),
            Verdict::ProbeError {
                reason: "SyntaxError: invalid syntax".to_string()
            }
        );
    }

    #[test]
    fn classify_success_ignores_import_warnings_on_stderr() {
        let output = ProbeOutput {
            success: true,
            code: Some(0),
            stdout: "1.0.0 3.7.2\n".to_string(),
            stderr: "UserWarning: GPU support disabled \
                     (ImportError: No module named 'cupy')\n"
                .to_string(),
        };
        assert!(classify(&output, &default_requirements()).is_compatible());
    }

    #[test]
    fn classify_silent_failure_reports_exit_status() {
        let output = ProbeOutput {
            success: false,
            code: Some(2),
            ..ProbeOutput::default()
        };
        assert!(matches!(
            classify(&output, &default_requirements()),
            Verdict::ProbeError { reason } if reason.contains("status 2")
        ));
    }

    #[test]
    fn classify_wrong_token_count_is_probe_error() {
        let output = ProbeOutput {
            success: true,
            code: Some(0),
            stdout: "1.0.0".to_string(),
            stderr: String::new(),
        };
        assert!(matches!(
            classify(&output, &default_requirements()),
            Verdict::ProbeError { .. }
        ));
    }

    #[test]
    fn classify_unparseable_version_is_probe_error() {
        let output = ProbeOutput {
            success: true,
            code: Some(0),
            stdout: "1.0.0 unknown".to_string(),
            stderr: String::new(),
        };
        assert!(matches!(
            classify(&output, &default_requirements()),
            Verdict::ProbeError { reason } if reason.contains("spacy")
        ));
    }

    #[test]
    fn classify_both_unmet_lists_both() {
        let output = ProbeOutput {
            success: true,
            code: Some(0),
            stdout: "0.13.1 3.2.0".to_string(),
            stderr: String::new(),
        };
        match classify(&output, &default_requirements()) {
            Verdict::VersionMismatch { unmet, .. } => {
                let names: Vec<_> = unmet.iter().map(|u| u.name.as_str()).collect();
                assert_eq!(names, ["pygls", "spacy"]);
            }
            other => panic!("expected VersionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_module_parsing() {
        assert_eq!(
            missing_module("ModuleNotFoundError: No module named 'pygls.server'"),
            Some("pygls".to_string())
        );
        assert_eq!(
            missing_module("ModuleNotFoundError: No module named \"spacy\""),
            Some("spacy".to_string())
        );
        assert_eq!(missing_module("ImportError: cannot import name 'x'"), None);
    }

    #[test]
    fn import_error_without_module_name() {
        let output = ProbeOutput {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: "ImportError: libstdc++.so.6: cannot open shared object file".to_string(),
        };
        assert_eq!(
            classify(&output, &default_requirements()),
            Verdict::MissingDependency { module: None }
        );
    }
}
