pub mod capture;
pub mod config;
pub mod draft;
pub mod error;
pub mod lifecycle;
pub mod ownership;
pub mod session;

pub use capture::{
    ArtifactRef, CaptureBackend, CaptureError, CaptureHandle, CaptureStatus, MockBackend,
    PermissionStatus,
};
pub use config::RecorderConfig;
pub use draft::{ArtifactStore, DraftSnapshot, DraftStore, FsArtifactStore, FsDraftStore, MemoryDraftStore};
pub use error::RecordingError;
pub use lifecycle::{AppLifecycleEvent, InterruptionBus, InterruptionEvent, LifecycleBus};
pub use ownership::OwnershipService;
pub use session::{SessionController, SessionId, SessionState};
