//! Analysis-server client and session lifecycle.
//!
//! - **`session`**: the [`SessionController`], sole owner of the running server
//! - **`launcher`**: how a verified interpreter becomes a running server
//! - **`codec`**: `Content-Length` framing on the server's stdio

pub mod codec;
pub mod types;

pub(crate) mod protocol;
pub(crate) mod server;

mod launcher;
mod session;

pub use launcher::{
    DEFAULT_LANGUAGE_ID, DEFAULT_SERVER_MODULE, LaunchSpec, LspLauncher, ServerHandle,
    ServerLauncher,
};
pub use server::RunningServer;
pub use session::{ControllerSettings, SessionController, SessionError, SessionEvent};
pub use types::{LspEvent, MessageKind, ServerStopReason};
