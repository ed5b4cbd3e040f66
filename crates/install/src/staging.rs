//! Filesystem-backed realization of the installer protocol
//!
//! Parts are copied into a per-session staging directory with a forced
//! fsync, and commit reports success once every staged part is in place.
//! Useful for tests and for headless environments where the real
//! installer shim is bound in at a higher layer.

use crate::backend::{status_code, InstallerBackend, SessionId, SessionParams, StatusListener, StatusUpdate};
use apkforge_errors::{InstallError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug)]
struct SessionEntry {
    dir: PathBuf,
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

type SessionMap = Arc<Mutex<HashMap<SessionId, SessionEntry>>>;

/// Install backend that stages parts under a root directory.
#[derive(Debug)]
pub struct StagingInstallerBackend {
    root: PathBuf,
    next_id: AtomicU64,
    sessions: SessionMap,
}

impl StagingInstallerBackend {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_id: AtomicU64::new(1),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Directory a session stages its parts into.
    #[must_use]
    pub fn session_dir(&self, session: SessionId) -> PathBuf {
        self.root.join(format!("session-{session}"))
    }

    fn entry_tx(&self, session: SessionId) -> Result<mpsc::UnboundedSender<StatusUpdate>> {
        let sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(&session)
            .map(|entry| entry.tx.clone())
            .ok_or_else(|| {
                InstallError::Backend {
                    message: format!("no open session {session}"),
                }
                .into()
            })
    }
}

impl InstallerBackend for StagingInstallerBackend {
    async fn create_session(&self, _params: SessionParams) -> Result<(SessionId, StatusListener)> {
        let session = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dir = self.session_dir(session);
        tokio::fs::create_dir_all(&dir).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut sessions = self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            sessions.insert(session, SessionEntry { dir, tx });
        }

        // Dropping the receiver is all the unhooking this backend needs;
        // the channel closes and later sends are discarded.
        let listener = StatusListener::new(rx, None);
        Ok((session, listener))
    }

    async fn write_part(&self, session: SessionId, name: &str, source: &Path) -> Result<u64> {
        let dir = {
            let sessions = self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            sessions
                .get(&session)
                .map(|entry| entry.dir.clone())
                .ok_or_else(|| InstallError::Backend {
                    message: format!("no open session {session}"),
                })?
        };

        let dest = dir.join(name);
        let bytes = tokio::fs::copy(source, &dest).await?;
        // Durability contract: the part must survive a crash before the
        // commit is attempted.
        let staged = tokio::fs::File::open(&dest).await?;
        staged.sync_all().await?;
        Ok(bytes)
    }

    async fn commit(&self, session: SessionId) -> Result<()> {
        let tx = self.entry_tx(session)?;
        let _ = tx.send(StatusUpdate {
            code: status_code::SUCCESS,
            message: "staged".to_string(),
            confirmation_intent: None,
        });
        Ok(())
    }

    fn abandon(&self, session: SessionId) {
        let entry = {
            let mut sessions = self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            sessions.remove(&session)
        };
        if let Some(entry) = entry {
            let _ = std::fs::remove_dir_all(entry.dir);
        }
    }
}
