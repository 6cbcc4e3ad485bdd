//! Resource ownership guard
//!
//! A process-wide single slot recording which logical session currently owns
//! the hardware capture resource. Arbitrarily many session controllers may
//! exist concurrently (a UI component remounting while a previous instance is
//! still tearing down); this service is the only thing that serializes their
//! access to the one native resource.

use crate::error::RecordingError;
use crate::session::SessionId;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Token {
    owner: Option<SessionId>,
    /// Whether the owner's underlying resource reports itself actively
    /// recording. A held-but-inactive token is stale and may be taken over.
    active: bool,
    /// Which session is currently negotiating the native resource. Must be
    /// clear before any other session begins resource creation.
    preparing_by: Option<SessionId>,
}

/// Injectable process-wide mutual-exclusion guard for the capture resource.
pub struct OwnershipService {
    token: Mutex<Token>,
    gate: Notify,
}

impl OwnershipService {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(Token::default()),
            gate: Notify::new(),
        }
    }

    /// Assign the token to `session`.
    ///
    /// Fails with `ResourceBusy` when a different session holds the token and
    /// its resource is still active. A stale owner (held but inactive) is
    /// force-released and logged.
    pub async fn acquire(&self, session: SessionId) -> Result<(), RecordingError> {
        let mut token = self.token.lock().await;
        match token.owner {
            Some(other) if other != session && token.active => {
                warn!(session, owner = other, "capture resource is busy");
                Err(RecordingError::ResourceBusy)
            }
            other => {
                if let Some(stale) = other.filter(|&o| o != session) {
                    warn!(session, stale, "taking over stale ownership token");
                }
                token.owner = Some(session);
                token.active = false;
                Ok(())
            }
        }
    }

    /// Clear the token, but only if `session` is the current owner. A late
    /// release from a torn-down session must not clobber a newer owner.
    pub async fn release(&self, session: SessionId) {
        let mut token = self.token.lock().await;
        if token.owner == Some(session) {
            token.owner = None;
            token.active = false;
            debug!(session, "ownership released");
        }
    }

    /// Record that the owner's resource is actively recording.
    pub async fn mark_active(&self, session: SessionId) {
        let mut token = self.token.lock().await;
        if token.owner == Some(session) {
            token.active = true;
        }
    }

    pub async fn owner(&self) -> Option<SessionId> {
        self.token.lock().await.owner
    }

    pub async fn is_preparing(&self) -> bool {
        self.token.lock().await.preparing_by.is_some()
    }

    /// Claim the preparing gate for `session`, waiting (bounded by `wait`)
    /// for any in-flight negotiation by another session to finish.
    ///
    /// If the gate does not clear within the bound, the stale gate is
    /// force-reset and claimed anyway rather than surfacing an error.
    pub async fn begin_preparing(&self, session: SessionId, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            {
                let mut token = self.token.lock().await;
                match token.preparing_by {
                    None => {
                        token.preparing_by = Some(session);
                        return;
                    }
                    Some(holder) if holder == session => return,
                    Some(_) => {}
                }
            }

            let notified = self.gate.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut token = self.token.lock().await;
                warn!(
                    session,
                    stale = ?token.preparing_by,
                    "preparing gate did not clear in time, forcing reset"
                );
                token.preparing_by = Some(session);
                return;
            }
        }
    }

    /// Clear the preparing gate and wake one waiter.
    pub async fn finish_preparing(&self, session: SessionId) {
        let mut token = self.token.lock().await;
        if token.preparing_by == Some(session) {
            token.preparing_by = None;
            self.gate.notify_one();
        }
    }
}

impl Default for OwnershipService {
    fn default() -> Self {
        Self::new()
    }
}
