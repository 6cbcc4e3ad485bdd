use crate::capture::ArtifactRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted, recoverable description of an in-progress capture.
///
/// Written periodically while recording and on every pause/resume transition;
/// deleted entirely once the session reaches Completed or Cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSnapshot {
    /// The capture artifact. Points at durable storage when `durable` is
    /// true, otherwise at the (possibly temporary) original location.
    pub artifact: ArtifactRef,

    /// When capture first transitioned to Recording.
    pub started_at: Option<DateTime<Utc>>,

    /// Elapsed capture time at snapshot time, as reported by the resource.
    pub elapsed_seconds: f64,

    /// Whether the session was paused when the snapshot was taken.
    pub paused: bool,

    /// Wall-clock time the snapshot was written.
    pub captured_at: DateTime<Utc>,

    /// True once the artifact has been copied out of temporary storage.
    pub durable: bool,
}
