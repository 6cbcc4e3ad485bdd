//! Draft persistence
//!
//! Makes an in-progress capture recoverable across process suspension or
//! termination: the session is snapshotted at a fixed interval while
//! recording, immediately after pause/resume transitions, and once more on
//! owning-component teardown. Each snapshot also tries to copy the capture
//! artifact out of temporary storage; when the copy fails the snapshot keeps
//! the temporary reference with `durable = false` rather than being skipped.

mod snapshot;
mod store;

pub use snapshot::DraftSnapshot;
pub use store::{ArtifactStore, DraftStore, FsArtifactStore, FsDraftStore, MemoryDraftStore};
