#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Install-session orchestration
//!
//! [`InstallSession`] drives the OS package-installer protocol: open a
//! session, stream every part into it durably, commit, then bridge the
//! installer's asynchronous, possibly multi-step completion callbacks
//! into one awaited outcome. The OS itself sits behind the
//! [`InstallerBackend`] trait; [`StagingInstallerBackend`] realizes the
//! protocol against a local staging directory for tests and headless
//! use.

mod backend;
mod session;
mod staging;

pub use backend::{
    status_code, InstallerBackend, SessionId, SessionParams, StatusListener, StatusUpdate,
};
pub use session::{InstallOutcome, InstallSession};
pub use staging::StagingInstallerBackend;
