//! Python interpreter discovery and environment verification.
//!
//! - **`discovery`**: turn a selection or the host environment into an interpreter path
//! - **`probe`**: run the version probe inside an interpreter
//! - **`verify`**: classify the probe result into a [`Verdict`](spacyls_types::Verdict)

pub mod discovery;
pub mod probe;
pub mod verify;

pub use discovery::{
    DevSettingsError, EnvironmentHost, InterpreterHost, dev_settings_interpreter,
    interpreter_in_env, resolve_selection,
};
pub use probe::{ProbeOutput, ProbeRunner, ProcessRunner};
pub use verify::{DEFAULT_PROBE_TIMEOUT, Verifier, Verify, classify};
