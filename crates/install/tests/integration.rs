//! Integration tests for the install-session state machine

use apkforge_errors::{Error, InstallError, Result};
use apkforge_events::{channel, AppEvent, InstallEvent};
use apkforge_install::{
    status_code, InstallSession, InstallerBackend, SessionId, SessionParams, StatusListener,
    StatusUpdate,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Scripted installer: delivers the queued status updates on commit and
/// counts session lifecycle calls.
#[derive(Default)]
struct MockBackend {
    script: Mutex<Vec<StatusUpdate>>,
    /// Keep the sender alive after commit so a partially scripted session
    /// stays pending instead of closing the channel.
    hold_sender: bool,
    sessions_created: AtomicUsize,
    abandoned: AtomicUsize,
    deregistered: Arc<AtomicUsize>,
    tx_slot: Mutex<Option<mpsc::UnboundedSender<StatusUpdate>>>,
}

impl MockBackend {
    fn with_script(script: Vec<StatusUpdate>) -> Self {
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    fn holding_sender(mut self) -> Self {
        self.hold_sender = true;
        self
    }
}

fn update(code: i32, message: &str, confirmation_intent: Option<&str>) -> StatusUpdate {
    StatusUpdate {
        code,
        message: message.to_string(),
        confirmation_intent: confirmation_intent.map(str::to_string),
    }
}

impl InstallerBackend for MockBackend {
    async fn create_session(&self, _params: SessionParams) -> Result<(SessionId, StatusListener)> {
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx_slot.lock().unwrap() = Some(tx);
        let deregistered = Arc::clone(&self.deregistered);
        let listener = StatusListener::new(
            rx,
            Some(Box::new(move || {
                deregistered.fetch_add(1, Ordering::SeqCst);
            })),
        );
        Ok((7, listener))
    }

    async fn write_part(&self, _session: SessionId, _name: &str, source: &Path) -> Result<u64> {
        Ok(std::fs::metadata(source)?.len())
    }

    async fn commit(&self, _session: SessionId) -> Result<()> {
        let updates: Vec<StatusUpdate> = self.script.lock().unwrap().drain(..).collect();
        let mut slot = self.tx_slot.lock().unwrap();
        if let Some(tx) = slot.as_ref() {
            for update in updates {
                let _ = tx.send(update);
            }
        }
        if !self.hold_sender {
            // Dropping the sender ends the stream after the script.
            slot.take();
        }
        Ok(())
    }

    fn abandon(&self, _session: SessionId) {
        self.abandoned.fetch_add(1, Ordering::SeqCst);
    }
}

fn make_parts(dir: &TempDir, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            std::fs::write(&path, b"part-bytes").unwrap();
            path
        })
        .collect()
}

#[tokio::test]
async fn success_resolves_once_and_deregisters() {
    let dir = TempDir::new().unwrap();
    let parts = make_parts(&dir, &["base.apk"]);
    let backend = MockBackend::with_script(vec![update(status_code::SUCCESS, "done", None)]);
    let (tx, mut rx) = channel();

    let outcome = InstallSession::new(&backend, tx)
        .install_parts(&parts, true)
        .await
        .unwrap();
    assert_eq!(outcome.session_id, 7);
    assert_eq!(backend.deregistered.load(Ordering::SeqCst), 1);
    assert_eq!(backend.abandoned.load(Ordering::SeqCst), 0);

    let mut saw_completed = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, AppEvent::Install(InstallEvent::Completed { .. })) {
            saw_completed = true;
        }
    }
    assert!(saw_completed);
}

#[tokio::test]
async fn empty_part_list_fails_before_any_session() {
    let backend = MockBackend::with_script(vec![]);
    let (tx, _rx) = channel();

    let err = InstallSession::new(&backend, tx)
        .install_parts(&[], false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Install(InstallError::MissingParts { .. })
    ));
    assert_eq!(backend.sessions_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_length_part_fails_before_any_session() {
    let dir = TempDir::new().unwrap();
    let empty = dir.path().join("empty.apk");
    std::fs::write(&empty, b"").unwrap();
    let backend = MockBackend::with_script(vec![]);
    let (tx, _rx) = channel();

    let err = InstallSession::new(&backend, tx)
        .install_parts(&[empty], false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Install(InstallError::MissingParts { .. })
    ));
    assert_eq!(backend.sessions_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn every_status_code_yields_exactly_one_outcome() {
    let dir = TempDir::new().unwrap();
    let cases: Vec<(StatusUpdate, fn(&Error) -> bool)> = vec![
        (
            update(status_code::FAILURE, "generic", None),
            |e| matches!(e, Error::Install(InstallError::Failure { code: 1, .. })),
        ),
        (
            update(status_code::FAILURE_BLOCKED, "blocked", None),
            |e| matches!(e, Error::Install(InstallError::Failure { code: 2, .. })),
        ),
        (
            update(status_code::FAILURE_ABORTED, "aborted", None),
            |e| matches!(e, Error::Install(InstallError::Failure { code: 3, .. })),
        ),
        (
            update(status_code::FAILURE_INVALID, "invalid", None),
            |e| matches!(e, Error::Install(InstallError::Failure { code: 4, .. })),
        ),
        (
            update(status_code::FAILURE_CONFLICT, "conflict", None),
            |e| matches!(e, Error::Install(InstallError::Failure { code: 5, .. })),
        ),
        (
            update(status_code::FAILURE_STORAGE, "storage", None),
            |e| matches!(e, Error::Install(InstallError::Failure { code: 6, .. })),
        ),
        (
            update(status_code::FAILURE_INCOMPATIBLE, "incompatible", None),
            |e| matches!(e, Error::Install(InstallError::Failure { code: 7, .. })),
        ),
        (
            update(42, "mystery", None),
            |e| matches!(e, Error::Install(InstallError::UnknownStatus { code: 42, .. })),
        ),
        (
            update(status_code::PENDING_USER_ACTION, "confirm", None),
            |e| matches!(e, Error::Install(InstallError::ConfirmationMissing)),
        ),
    ];

    for (status, expect) in cases {
        let parts = make_parts(&dir, &["base.apk"]);
        let code = status.code;
        let backend = MockBackend::with_script(vec![status]);
        let (tx, _rx) = channel();

        let err = InstallSession::new(&backend, tx)
            .install_parts(&parts, false)
            .await
            .unwrap_err();
        assert!(expect(&err), "code {code} mapped to {err:?}");
        assert_eq!(
            backend.deregistered.load(Ordering::SeqCst),
            1,
            "listener deregistered exactly once for code {code}"
        );
        assert_eq!(
            backend.abandoned.load(Ordering::SeqCst),
            1,
            "session abandoned for code {code}"
        );
    }
}

#[tokio::test]
async fn pending_user_action_forwards_and_keeps_waiting() {
    let dir = TempDir::new().unwrap();
    let parts = make_parts(&dir, &["base.apk"]);
    let backend = MockBackend::with_script(vec![
        update(
            status_code::PENDING_USER_ACTION,
            "needs confirmation",
            Some("confirm-intent"),
        ),
        update(status_code::SUCCESS, "done", None),
    ]);
    let (tx, mut rx) = channel();

    let outcome = InstallSession::new(&backend, tx)
        .install_parts(&parts, true)
        .await
        .unwrap();
    assert_eq!(outcome.session_id, 7);
    assert_eq!(backend.deregistered.load(Ordering::SeqCst), 1);

    let mut forwarded = 0;
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::Install(InstallEvent::ConfirmationForwarded { intent, .. }) = event {
            assert_eq!(intent, "confirm-intent");
            forwarded += 1;
        }
    }
    assert_eq!(forwarded, 1);
}

#[tokio::test]
async fn closed_stream_is_a_terminal_error() {
    let dir = TempDir::new().unwrap();
    let parts = make_parts(&dir, &["base.apk"]);
    // Commit sends nothing and drops the sender.
    let backend = MockBackend::with_script(vec![]);
    let (tx, _rx) = channel();

    let err = InstallSession::new(&backend, tx)
        .install_parts(&parts, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Install(InstallError::SessionClosed)
    ));
    assert_eq!(backend.deregistered.load(Ordering::SeqCst), 1);
    assert_eq!(backend.abandoned.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_abandons_session_and_deregisters() {
    let dir = TempDir::new().unwrap();
    let parts = make_parts(&dir, &["base.apk"]);
    // Holds the sender open without ever delivering a status, so the
    // session waits until the caller gives up.
    let backend = MockBackend::with_script(vec![]).holding_sender();
    let (tx, _rx) = channel();

    let session = InstallSession::new(&backend, tx);
    let result = tokio::time::timeout(
        Duration::from_millis(50),
        session.install_parts(&parts, false),
    )
    .await;
    assert!(result.is_err(), "install must still be pending");

    // Dropping the future must not leak a session or a registered
    // receiver.
    assert_eq!(backend.deregistered.load(Ordering::SeqCst), 1);
    assert_eq!(backend.abandoned.load(Ordering::SeqCst), 1);
}
