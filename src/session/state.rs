use serde::{Deserialize, Serialize};

/// State of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No recording attempt made yet
    Idle,
    /// Negotiating the native capture resource
    Preparing,
    /// Actively capturing
    Recording,
    /// Capture suspended, resumable
    Paused,
    /// Stop in flight
    Stopping,
    /// Abandoned by the caller; artifact discarded
    Cancelled,
    /// Finished normally; artifact available
    Completed,
    /// Ended in error
    Failed,
}

impl SessionState {
    /// Terminal states: no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Cancelled | SessionState::Completed | SessionState::Failed
        )
    }

    /// States in which the session holds the capture resource.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}
