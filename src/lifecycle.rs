//! App lifecycle and audio interruption events
//!
//! Typed broadcast buses the session controller subscribes to for the
//! duration of its own lifetime: foreground/background transitions trigger
//! draft saves and state re-sync, and external audio interruptions (an
//! incoming call, for example) pause capture outside the caller's control.

use tokio::sync::broadcast;

/// Application foreground/background transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycleEvent {
    Foreground,
    Background,
    Inactive,
}

/// External audio interruption signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionEvent {
    Began,
    Ended,
}

/// Small typed wrapper around a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Dropped silently when no subscriber is listening.
    pub fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type LifecycleBus = EventBus<AppLifecycleEvent>;
pub type InterruptionBus = EventBus<InterruptionEvent>;
