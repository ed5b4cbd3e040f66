//! Domain-grouped pipeline events

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Severity attached to the log-line projection of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Top-level event type carried on the pipeline channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum AppEvent {
    General(GeneralEvent),
    Download(DownloadEvent),
    Archive(ArchiveEvent),
    Patch(PatchEvent),
    Signing(SigningEvent),
    Install(InstallEvent),
}

impl AppEvent {
    /// Project this event to a `(level, message)` log line for UI
    /// consumption.
    #[must_use]
    pub fn log_line(&self) -> (EventLevel, String) {
        match self {
            AppEvent::General(e) => e.log_line(),
            AppEvent::Download(e) => e.log_line(),
            AppEvent::Archive(e) => e.log_line(),
            AppEvent::Patch(e) => e.log_line(),
            AppEvent::Signing(e) => e.log_line(),
            AppEvent::Install(e) => e.log_line(),
        }
    }
}

/// Freeform diagnostics and operation lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneralEvent {
    Debug {
        message: String,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
        details: Option<String>,
    },
    OperationStarted {
        operation: String,
    },
    OperationCompleted {
        operation: String,
        success: bool,
    },
    OperationFailed {
        operation: String,
        error: String,
    },
}

impl GeneralEvent {
    fn log_line(&self) -> (EventLevel, String) {
        match self {
            GeneralEvent::Debug { message } => (EventLevel::Debug, message.clone()),
            GeneralEvent::Warning { message } => (EventLevel::Warning, message.clone()),
            GeneralEvent::Error { message, details } => (
                EventLevel::Error,
                match details {
                    Some(details) => format!("{message}: {details}"),
                    None => message.clone(),
                },
            ),
            GeneralEvent::OperationStarted { operation } => {
                (EventLevel::Info, format!("{operation} started"))
            }
            GeneralEvent::OperationCompleted { operation, success } => (
                EventLevel::Info,
                if *success {
                    format!("{operation} completed")
                } else {
                    format!("{operation} did not complete")
                },
            ),
            GeneralEvent::OperationFailed { operation, error } => {
                (EventLevel::Error, format!("{operation} failed: {error}"))
            }
        }
    }
}

/// Download lifecycle and progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    Started {
        url: String,
        total_size: Option<u64>,
    },
    /// Progress update with EMA-smoothed speed and remaining-time estimate
    Progress {
        url: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
        speed_bps: f64,
        eta: Option<Duration>,
    },
    Retrying {
        url: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    Completed {
        url: String,
        size: u64,
    },
    Failed {
        url: String,
        error: String,
        attempts: u32,
    },
}

impl DownloadEvent {
    fn log_line(&self) -> (EventLevel, String) {
        match self {
            DownloadEvent::Started { url, .. } => {
                (EventLevel::Info, format!("downloading {url}"))
            }
            DownloadEvent::Progress {
                url,
                bytes_downloaded,
                ..
            } => (
                EventLevel::Debug,
                format!("{url}: {bytes_downloaded} bytes"),
            ),
            DownloadEvent::Retrying {
                url,
                attempt,
                max_attempts,
                ..
            } => (
                EventLevel::Warning,
                format!("retrying {url} (attempt {attempt}/{max_attempts})"),
            ),
            DownloadEvent::Completed { url, size } => {
                (EventLevel::Info, format!("downloaded {url} ({size} bytes)"))
            }
            DownloadEvent::Failed { url, error, .. } => {
                (EventLevel::Error, format!("download of {url} failed: {error}"))
            }
        }
    }
}

/// Archive validation and extraction events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchiveEvent {
    ValidationFailed {
        path: String,
    },
    ExtractionStarted {
        archive: String,
        target: String,
    },
    ExtractionCompleted {
        archive: String,
        entries: usize,
    },
}

impl ArchiveEvent {
    fn log_line(&self) -> (EventLevel, String) {
        match self {
            ArchiveEvent::ValidationFailed { path } => (
                EventLevel::Warning,
                format!("{path} failed validation and was removed"),
            ),
            ArchiveEvent::ExtractionStarted { archive, target } => {
                (EventLevel::Info, format!("extracting {archive} to {target}"))
            }
            ArchiveEvent::ExtractionCompleted { archive, entries } => (
                EventLevel::Info,
                format!("extracted {entries} entries from {archive}"),
            ),
        }
    }
}

/// Manifest patching and repacking events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatchEvent {
    ManifestPatchStarted {
        source_package: String,
        target_package: String,
    },
    ManifestPatchCompleted {
        target_package: String,
    },
    Repacked {
        package: String,
    },
}

impl PatchEvent {
    fn log_line(&self) -> (EventLevel, String) {
        match self {
            PatchEvent::ManifestPatchStarted {
                source_package,
                target_package,
            } => (
                EventLevel::Info,
                format!("patching manifest {source_package} -> {target_package}"),
            ),
            PatchEvent::ManifestPatchCompleted { target_package } => {
                (EventLevel::Info, format!("manifest now targets {target_package}"))
            }
            PatchEvent::Repacked { package } => {
                (EventLevel::Info, format!("repacked {package}"))
            }
        }
    }
}

/// Signing identity and package signing events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SigningEvent {
    KeystoreCreated {
        path: String,
    },
    SigningStarted {
        package: String,
    },
    SigningCompleted {
        package: String,
    },
}

impl SigningEvent {
    fn log_line(&self) -> (EventLevel, String) {
        match self {
            SigningEvent::KeystoreCreated { path } => {
                (EventLevel::Info, format!("created signing keystore at {path}"))
            }
            SigningEvent::SigningStarted { package } => {
                (EventLevel::Info, format!("signing {package}"))
            }
            SigningEvent::SigningCompleted { package } => {
                (EventLevel::Info, format!("signed {package}"))
            }
        }
    }
}

/// Install session events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallEvent {
    SessionOpened {
        session_id: u64,
        parts: usize,
    },
    PartStreamed {
        session_id: u64,
        name: String,
        bytes: u64,
    },
    Committed {
        session_id: u64,
    },
    /// The OS asked for interactive confirmation; the attached intent has
    /// been forwarded to the foreground UI and the session keeps waiting.
    ConfirmationForwarded {
        session_id: u64,
        intent: String,
    },
    Completed {
        session_id: u64,
    },
    Failed {
        session_id: u64,
        code: i32,
        message: String,
    },
    Abandoned {
        session_id: u64,
    },
}

impl InstallEvent {
    fn log_line(&self) -> (EventLevel, String) {
        match self {
            InstallEvent::SessionOpened { session_id, parts } => (
                EventLevel::Info,
                format!("opened install session {session_id} for {parts} part(s)"),
            ),
            InstallEvent::PartStreamed {
                name, bytes, ..
            } => (EventLevel::Debug, format!("wrote part {name} ({bytes} bytes)")),
            InstallEvent::Committed { session_id } => {
                (EventLevel::Info, format!("committed session {session_id}"))
            }
            InstallEvent::ConfirmationForwarded { session_id, .. } => (
                EventLevel::Info,
                format!("session {session_id} awaiting user confirmation"),
            ),
            InstallEvent::Completed { session_id } => {
                (EventLevel::Info, format!("session {session_id} installed"))
            }
            InstallEvent::Failed {
                session_id,
                code,
                message,
            } => (
                EventLevel::Error,
                format!("session {session_id} failed ({code}): {message}"),
            ),
            InstallEvent::Abandoned { session_id } => {
                (EventLevel::Warning, format!("abandoned session {session_id}"))
            }
        }
    }
}
