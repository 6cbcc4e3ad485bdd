//! Native capture boundary
//!
//! This module defines the contract with the platform's audio-capture API:
//! - `CaptureBackend`: permission queries and resource creation
//! - `CaptureHandle`: the exclusively owned live resource
//! - `CaptureError`: typed boundary errors (the benign already-unloaded race
//!   and the exclusive-instance failure are distinct variants, never matched
//!   by message text)
//! - `MockBackend`: deterministic implementation for tests and the demo

mod backend;
mod mock;

pub use backend::{
    ArtifactRef, CaptureBackend, CaptureError, CaptureHandle, CaptureStatus, PermissionStatus,
};
pub use mock::{MockBackend, MockHandle};
