//! Core domain types for spacyls.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod messages;
mod session;
mod verdict;
mod version;

pub use messages::{
    MessageCode, STATUS_INACTIVE, STATUS_INCOMPATIBLE, Severity, status_active,
};
pub use session::{SessionId, SessionState, SessionStatus};
pub use verdict::{
    LibraryVersion, PYGLS_MINIMUM, Requirement, SPACY_MINIMUM, UnmetRequirement, Verdict,
    default_requirements,
};
pub use version::{Version, VersionParseError};
