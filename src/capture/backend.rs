use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Reference to a capture artifact on disk (possibly still in temporary
/// storage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef(pub PathBuf);

impl ArtifactRef {
    pub fn path(&self) -> &PathBuf {
        &self.0
    }
}

/// Capture permission state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

/// Point-in-time status of a live capture resource.
///
/// Elapsed time always comes from here, never from an independently
/// incremented counter, so missed timer ticks cannot introduce drift.
#[derive(Debug, Clone)]
pub struct CaptureStatus {
    /// Whether the resource reports itself actively recording.
    pub is_recording: bool,
    /// Elapsed capture time as measured by the native resource.
    pub elapsed: Duration,
    /// Location of the capture artifact, if the resource has produced one.
    pub artifact: Option<ArtifactRef>,
}

/// Errors raised at the native capture boundary.
///
/// The variants that drive control flow are typed rather than matched by
/// message text: `AlreadyUnloaded` marks the benign stop/unload race and
/// `ExclusiveInstance` marks the "only one resource instance allowed"
/// failure that triggers a full reset before the retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    /// Stop/unload raced an internal auto-stop; the resource was already
    /// gone. Never an error from the caller's perspective.
    #[error("capture resource was already unloaded")]
    AlreadyUnloaded,

    /// The platform allows only one live capture instance and another one
    /// still exists.
    #[error("only one capture instance is allowed")]
    ExclusiveInstance,

    /// Permission request came back denied.
    #[error("capture permission denied")]
    PermissionDenied,

    /// Any other native failure.
    #[error("capture backend failure: {0}")]
    Backend(String),
}

/// Native capture API.
///
/// Platform-specific implementations negotiate the underlying OS resource;
/// [`MockBackend`](super::MockBackend) provides a deterministic in-process
/// implementation for tests and the demo binary.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Query the current permission state without prompting.
    async fn query_permission(&self) -> PermissionStatus;

    /// Prompt for permission if undetermined; returns the resulting state.
    async fn request_permission(&self) -> PermissionStatus;

    /// Reconfigure the capture mode from scratch. Used during a forced
    /// reset between acquisition attempts.
    async fn reset_mode(&self) -> Result<(), CaptureError>;

    /// Create and start a new native capture resource.
    async fn create(&self) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// Exclusively owned handle to a live native capture resource.
///
/// Owned by exactly one session at a time; `stop_and_unload` must be
/// attempted exactly once per acquisition, including on error paths.
#[async_trait::async_trait]
pub trait CaptureHandle: Send + Sync {
    async fn pause(&self) -> Result<(), CaptureError>;

    async fn resume(&self) -> Result<(), CaptureError>;

    /// Query recording flag, elapsed duration and artifact location.
    async fn status(&self) -> Result<CaptureStatus, CaptureError>;

    /// Stop capture and release the native resource.
    ///
    /// Calling this on an already-unloaded resource returns
    /// `Err(CaptureError::AlreadyUnloaded)`, distinguishable by type from
    /// real failures.
    async fn stop_and_unload(&self) -> Result<(), CaptureError>;
}
