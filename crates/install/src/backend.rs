//! The OS install-session boundary

use apkforge_errors::Result;
use std::path::Path;
use tokio::sync::mpsc;

/// Identifier the installer assigns to an open session.
pub type SessionId = u64;

/// Parameters for opening an install session.
#[derive(Debug, Clone, Copy)]
pub struct SessionParams {
    /// Request the installer's fast-path full-install scenario.
    pub fast_path: bool,
    /// Ask the OS to skip interactive confirmation. The OS may still
    /// require it; this is a request, not a guarantee.
    pub skip_confirmation: bool,
    /// Total bytes across all parts, for installer preallocation.
    pub total_size: u64,
}

/// Status codes the installer delivers to a session's listener.
///
/// Non-negative codes other than `SUCCESS` form the failure family.
pub mod status_code {
    pub const PENDING_USER_ACTION: i32 = -1;
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const FAILURE_BLOCKED: i32 = 2;
    pub const FAILURE_ABORTED: i32 = 3;
    pub const FAILURE_INVALID: i32 = 4;
    pub const FAILURE_CONFLICT: i32 = 5;
    pub const FAILURE_STORAGE: i32 = 6;
    pub const FAILURE_INCOMPATIBLE: i32 = 7;
}

/// One out-of-band callback from the installer.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub code: i32,
    pub message: String,
    /// Attached when the OS needs the foreground UI to show a
    /// confirmation prompt. Opaque to this crate.
    pub confirmation_intent: Option<String>,
}

/// Receiver for one session's status callbacks.
///
/// Deregistration consumes the listener, so it can happen at most once;
/// dropping an armed listener deregisters as a fallback so a cancelled
/// caller never leaks a registered receiver.
pub struct StatusListener {
    rx: mpsc::UnboundedReceiver<StatusUpdate>,
    on_deregister: Option<Box<dyn FnOnce() + Send>>,
}

impl StatusListener {
    #[must_use]
    pub fn new(
        rx: mpsc::UnboundedReceiver<StatusUpdate>,
        on_deregister: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Self { rx, on_deregister }
    }

    /// Await the next callback. `None` means the backend dropped the
    /// session without a terminal status.
    pub async fn next(&mut self) -> Option<StatusUpdate> {
        self.rx.recv().await
    }

    /// Explicitly deregister from the installer.
    pub fn deregister(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(hook) = self.on_deregister.take() {
            hook();
        }
    }
}

impl Drop for StatusListener {
    fn drop(&mut self) {
        self.fire();
    }
}

impl std::fmt::Debug for StatusListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusListener")
            .field("registered", &self.on_deregister.is_some())
            .finish_non_exhaustive()
    }
}

/// Driver for the OS package-installer protocol.
///
/// `write_part` must leave the part durably written (flushed and synced)
/// before returning. `abandon` is synchronous and idempotent so it can
/// run from drop glue on cancellation.
#[allow(async_fn_in_trait)]
pub trait InstallerBackend: Send + Sync {
    /// Open a session and register its status listener.
    async fn create_session(&self, params: SessionParams) -> Result<(SessionId, StatusListener)>;

    /// Stream one named part into the session. Returns the bytes written.
    async fn write_part(&self, session: SessionId, name: &str, source: &Path) -> Result<u64>;

    /// Commit the session; terminal status arrives on the listener.
    async fn commit(&self, session: SessionId) -> Result<()>;

    /// Abandon the session, releasing installer-side state.
    fn abandon(&self, session: SessionId);
}
