//! Recording session management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - The start/pause/resume/stop/cancel state machine
//! - Exclusive ownership of the native capture resource (via the guard)
//! - The duration watchdog (near-limit warning, forced stop at the maximum)
//! - Draft snapshot scheduling
//! - App lifecycle and audio interruption handling
//! - Bounded retry on resource-acquisition failures

mod controller;
mod state;

/// Opaque session identifier; a process-wide monotonic counter.
pub type SessionId = u64;

pub use controller::SessionController;
pub use state::SessionState;
