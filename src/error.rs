use crate::capture::CaptureError;

/// Errors surfaced to the caller of the session controller.
///
/// Draft persistence failures are deliberately absent: they are logged and
/// swallowed, and never interrupt an in-progress recording. The benign
/// "already unloaded" condition lives on [`CaptureError`] and is treated as
/// success by stop/cancel, so it never appears here either.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordingError {
    /// The user declined capture permission. Terminal, no retry.
    #[error("capture permission denied")]
    PermissionDenied,

    /// Another session holds the capture resource and did not release it
    /// within the bounded wait.
    #[error("capture resource is busy")]
    ResourceBusy,

    /// All acquisition attempts were exhausted. `exclusive` is true when the
    /// last failure indicated the resource is held by another application.
    #[error("failed to acquire capture resource")]
    ResourceAcquisitionFailed { exclusive: bool },

    /// A real native failure during stop/unload (anything other than the
    /// benign already-unloaded race).
    #[error("capture backend error: {0}")]
    Capture(#[from] CaptureError),
}

impl RecordingError {
    /// User-facing message for display by the calling UI layer.
    pub fn user_message(&self) -> &'static str {
        match self {
            RecordingError::PermissionDenied => {
                "Microphone permission was denied. Enable it in system settings and try again."
            }
            RecordingError::ResourceAcquisitionFailed { exclusive: true } => {
                "The capture device is in use by another app. Please close it and retry."
            }
            _ => "Recording failed. Please try again.",
        }
    }
}
