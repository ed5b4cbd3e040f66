//! The install-session state machine

use crate::backend::{status_code, InstallerBackend, SessionId, SessionParams, StatusListener};
use apkforge_errors::{Error, InstallError, Result};
use apkforge_events::{AppEvent, EventEmitter, EventSender, InstallEvent};
use std::path::{Path, PathBuf};

/// Successful terminal result of one install session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    pub session_id: SessionId,
}

/// Progression of one session. Exactly one terminal outcome is ever
/// delivered, tracked by the single-slot [`PendingOutcome`] cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    WritingParts,
    Committed,
    AwaitingUser,
}

/// Single-slot cell for the session's terminal result. The first
/// resolution wins; later ones are ignored, which makes the
/// "exactly one outcome, ever" invariant local and checkable.
#[derive(Debug, Default)]
struct PendingOutcome(Option<Result<InstallOutcome>>);

impl PendingOutcome {
    fn resolve(&mut self, outcome: Result<InstallOutcome>) {
        if self.0.is_none() {
            self.0 = Some(outcome);
        }
    }

    fn is_pending(&self) -> bool {
        self.0.is_none()
    }

    fn take(self) -> Result<InstallOutcome> {
        self.0
            .unwrap_or_else(|| Err(InstallError::SessionClosed.into()))
    }
}

/// Abandons the session unless the install reached a positive outcome.
/// Covers both error returns and caller cancellation at a suspension
/// point: dropping the future runs this guard, so a walked-away caller
/// never leaks an open session.
struct AbandonGuard<'a, B: InstallerBackend> {
    backend: &'a B,
    session_id: SessionId,
    armed: bool,
}

impl<B: InstallerBackend> AbandonGuard<'_, B> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<B: InstallerBackend> Drop for AbandonGuard<'_, B> {
    fn drop(&mut self) {
        if self.armed {
            self.backend.abandon(self.session_id);
        }
    }
}

/// Drives one or more package parts through an installer session.
#[derive(Debug)]
pub struct InstallSession<'a, B: InstallerBackend> {
    backend: &'a B,
    tx: EventSender,
}

impl<'a, B: InstallerBackend> InstallSession<'a, B> {
    #[must_use]
    pub fn new(backend: &'a B, tx: EventSender) -> Self {
        Self { backend, tx }
    }

    /// Install the given parts, resolving to exactly one outcome.
    ///
    /// When `silent` is set the session asks the OS to skip interactive
    /// confirmation, but the OS may still require it; a
    /// pending-user-action callback forwards the OS-supplied intent and
    /// keeps awaiting the final callback.
    ///
    /// # Errors
    ///
    /// * [`InstallError::MissingParts`] before any session is opened if
    ///   `parts` is empty or any file is missing/zero-length.
    /// * [`InstallError::ConfirmationMissing`] if the OS requests
    ///   confirmation without attaching an intent.
    /// * [`InstallError::Failure`] / [`InstallError::UnknownStatus`] on
    ///   terminal installer failure; the session is abandoned.
    pub async fn install_parts(&self, parts: &[PathBuf], silent: bool) -> Result<InstallOutcome> {
        let total_size = precheck_parts(parts)?;

        let params = SessionParams {
            fast_path: true,
            skip_confirmation: silent,
            total_size,
        };
        let (session_id, mut listener) = self.backend.create_session(params).await?;
        let guard = AbandonGuard {
            backend: self.backend,
            session_id,
            armed: true,
        };
        self.tx.emit(AppEvent::Install(InstallEvent::SessionOpened {
            session_id,
            parts: parts.len(),
        }));

        let mut phase = Phase::Created;

        debug_assert_eq!(phase, Phase::Created);
        phase = Phase::WritingParts;
        for part in parts {
            let name = part_name(part)?;
            let bytes = self.backend.write_part(session_id, &name, part).await?;
            self.tx.emit(AppEvent::Install(InstallEvent::PartStreamed {
                session_id,
                name,
                bytes,
            }));
        }

        self.backend.commit(session_id).await?;
        debug_assert_eq!(phase, Phase::WritingParts);
        phase = Phase::Committed;
        self.tx
            .emit(AppEvent::Install(InstallEvent::Committed { session_id }));

        let mut pending = PendingOutcome::default();
        while pending.is_pending() {
            let Some(update) = listener.next().await else {
                pending.resolve(Err(InstallError::SessionClosed.into()));
                break;
            };

            match update.code {
                status_code::SUCCESS => {
                    pending.resolve(Ok(InstallOutcome { session_id }));
                }
                status_code::PENDING_USER_ACTION => {
                    match update.confirmation_intent {
                        Some(intent) => {
                            // Forwarding does not resolve the outcome;
                            // the listener stays registered for the
                            // final callback.
                            phase = Phase::AwaitingUser;
                            self.tx.emit(AppEvent::Install(
                                InstallEvent::ConfirmationForwarded { session_id, intent },
                            ));
                        }
                        None => {
                            pending.resolve(Err(InstallError::ConfirmationMissing.into()));
                        }
                    }
                }
                code @ status_code::FAILURE..=status_code::FAILURE_INCOMPATIBLE => {
                    pending.resolve(Err(InstallError::Failure {
                        code,
                        message: update.message,
                    }
                    .into()));
                }
                code => {
                    pending.resolve(Err(InstallError::UnknownStatus {
                        code,
                        message: update.message,
                    }
                    .into()));
                }
            }
        }
        debug_assert!(matches!(phase, Phase::Committed | Phase::AwaitingUser));

        // Exactly once, on every path that reaches a terminal outcome.
        listener.deregister();

        let outcome = pending.take();
        match &outcome {
            Ok(_) => {
                guard.disarm();
                self.tx
                    .emit(AppEvent::Install(InstallEvent::Completed { session_id }));
            }
            Err(err) => {
                drop(guard); // abandon now, before the error propagates
                self.emit_failure(session_id, err);
            }
        }
        outcome
    }

    fn emit_failure(&self, session_id: SessionId, err: &Error) {
        let (code, message) = match err {
            Error::Install(InstallError::Failure { code, message })
            | Error::Install(InstallError::UnknownStatus { code, message }) => {
                (*code, message.clone())
            }
            other => (status_code::FAILURE, other.to_string()),
        };
        self.tx.emit(AppEvent::Install(InstallEvent::Failed {
            session_id,
            code,
            message,
        }));
        self.tx
            .emit(AppEvent::Install(InstallEvent::Abandoned { session_id }));
    }
}

/// Fail fast before any session is opened: every listed part must exist
/// and be non-empty. Returns the combined size.
fn precheck_parts(parts: &[PathBuf]) -> Result<u64> {
    if parts.is_empty() {
        return Err(InstallError::MissingParts {
            part: "<no parts listed>".to_string(),
        }
        .into());
    }
    let mut total = 0u64;
    for part in parts {
        let len = std::fs::metadata(part).map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            return Err(InstallError::MissingParts {
                part: part.display().to_string(),
            }
            .into());
        }
        total += len;
    }
    Ok(total)
}

fn part_name(part: &Path) -> Result<String> {
    part.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            InstallError::MissingParts {
                part: part.display().to_string(),
            }
            .into()
        })
}
