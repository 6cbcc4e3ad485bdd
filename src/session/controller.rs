use super::state::SessionState;
use super::SessionId;
use crate::capture::{
    ArtifactRef, CaptureBackend, CaptureError, CaptureHandle, PermissionStatus,
};
use crate::config::RecorderConfig;
use crate::draft::{ArtifactStore, DraftSnapshot, DraftStore};
use crate::error::RecordingError;
use crate::lifecycle::{AppLifecycleEvent, InterruptionBus, InterruptionEvent, LifecycleBus};
use crate::ownership::OwnershipService;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-session recording controller.
///
/// Exposes start/pause/resume/stop/cancel plus draft saving and read-only
/// state to the calling UI layer, and owns the duration watchdog, the draft
/// snapshot ticker and the lifecycle/interruption subscriptions for the
/// session's lifetime. All shared state mutations happen through async tasks
/// interleaved on the runtime; the process-wide `OwnershipService` is the
/// only cross-session synchronization.
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

struct Tasks {
    watchdog: Option<JoinHandle<()>>,
    drafts: Option<JoinHandle<()>>,
    lifecycle: Option<JoinHandle<()>>,
    interruption: Option<JoinHandle<()>>,
}

struct ControllerInner {
    session_id: SessionId,
    config: RecorderConfig,
    backend: Arc<dyn CaptureBackend>,
    ownership: Arc<OwnershipService>,
    drafts: Arc<dyn DraftStore>,
    artifacts: Arc<dyn ArtifactStore>,

    state: Mutex<SessionState>,
    handle: Mutex<Option<Arc<dyn CaptureHandle>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,

    /// Serializes stop/cancel; late concurrent stops wait here and then
    /// return the cached outcome.
    stop_gate: Mutex<()>,
    stop_outcome: Mutex<Option<Result<Option<ArtifactRef>, RecordingError>>>,

    is_starting: AtomicBool,
    near_limit: AtomicBool,
    /// Set when the current pause was interruption-initiated, so an
    /// interruption ending never overrides a user's own pause.
    interruption_paused: AtomicBool,
    last_elapsed_ms: AtomicU64,

    tasks: Mutex<Tasks>,
    interruption_bus: Mutex<Option<InterruptionBus>>,
}

impl SessionController {
    pub fn new(
        config: RecorderConfig,
        backend: Arc<dyn CaptureBackend>,
        ownership: Arc<OwnershipService>,
        drafts: Arc<dyn DraftStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst),
                config,
                backend,
                ownership,
                drafts,
                artifacts,
                state: Mutex::new(SessionState::Idle),
                handle: Mutex::new(None),
                started_at: Mutex::new(None),
                stop_gate: Mutex::new(()),
                stop_outcome: Mutex::new(None),
                is_starting: AtomicBool::new(false),
                near_limit: AtomicBool::new(false),
                interruption_paused: AtomicBool::new(false),
                last_elapsed_ms: AtomicU64::new(0),
                tasks: Mutex::new(Tasks {
                    watchdog: None,
                    drafts: None,
                    lifecycle: None,
                    interruption: None,
                }),
                interruption_bus: Mutex::new(None),
            }),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    /// Start capturing. No-op (with a warning) when a start is already in
    /// flight or the session has already left Idle.
    pub async fn start(&self) -> Result<(), RecordingError> {
        if self.inner.is_starting.swap(true, Ordering::SeqCst) {
            warn!(session = self.inner.session_id, "start already in progress");
            return Ok(());
        }
        let result = self.inner.start_core().await;
        self.inner.is_starting.store(false, Ordering::SeqCst);
        result
    }

    /// Pause capture. No-op outside Recording.
    pub async fn pause(&self) {
        self.inner.pause_core(false).await;
    }

    /// Resume capture. No-op outside Paused.
    pub async fn resume(&self) {
        self.inner.resume_core().await;
    }

    /// Stop capture and return the artifact reference, or `None` when there
    /// was nothing to stop. Idempotent under concurrent invocation: a stop
    /// already in flight shares its outcome with late callers.
    pub async fn stop(&self) -> Result<Option<ArtifactRef>, RecordingError> {
        self.inner.stop_core().await
    }

    /// Abandon the session from any non-terminal state, discarding the
    /// artifact and the draft. Always succeeds from the caller's view.
    pub async fn cancel(&self) {
        self.inner.cancel_core().await;
    }

    /// Force an out-of-band draft snapshot (used on background transitions).
    pub async fn save_draft_now(&self) {
        if self.inner.current_state().await.is_live() {
            self.inner.write_snapshot().await;
        }
    }

    /// Subscribe to app foreground/background transitions for the lifetime
    /// of this controller.
    pub async fn observe_lifecycle(&self, bus: &LifecycleBus) {
        let weak = Arc::downgrade(&self.inner);
        let mut rx = bus.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(AppLifecycleEvent::Background) | Ok(AppLifecycleEvent::Inactive) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if inner.current_state().await.is_live() {
                            debug!(
                                session = inner.session_id,
                                "app leaving foreground, saving draft"
                            );
                            inner.write_snapshot().await;
                        }
                    }
                    Ok(AppLifecycleEvent::Foreground) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if inner.current_state().await == SessionState::Recording {
                            // Re-sync elapsed from the resource and re-arm
                            // the watchdog after a suspension.
                            let handle = inner.handle.lock().await.clone();
                            if let Some(handle) = handle {
                                if let Ok(status) = handle.status().await {
                                    inner.store_elapsed(status.elapsed);
                                }
                            }
                            inner.arm_watchdog().await;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let mut tasks = self.inner.tasks.lock().await;
        if let Some(old) = tasks.lifecycle.replace(task) {
            old.abort();
        }
    }

    /// Register the interruption event source. The controller subscribes to
    /// it only while the session is recording.
    pub async fn observe_interruptions(&self, bus: &InterruptionBus) {
        *self.inner.interruption_bus.lock().await = Some(bus.clone());
    }

    /// Owning-component teardown: a final snapshot if still recording, then
    /// resource release and listener/timer teardown.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let state = inner.current_state().await;
        if state == SessionState::Recording {
            inner.write_snapshot().await;
        }
        if !state.is_terminal() {
            if let Some(handle) = inner.handle.lock().await.take() {
                match handle.stop_and_unload().await {
                    Ok(()) | Err(CaptureError::AlreadyUnloaded) => {}
                    Err(e) => error!(error = %e, "unload failed during teardown"),
                }
            }
            inner.ownership.release(inner.session_id).await;
        }

        let mut tasks = inner.tasks.lock().await;
        for task in [
            tasks.watchdog.take(),
            tasks.drafts.take(),
            tasks.lifecycle.take(),
            tasks.interruption.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        info!(session = inner.session_id, "session controller shut down");
    }

    pub async fn state(&self) -> SessionState {
        self.inner.current_state().await
    }

    pub async fn is_recording(&self) -> bool {
        self.inner.current_state().await == SessionState::Recording
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.current_state().await == SessionState::Paused
    }

    pub fn is_starting(&self) -> bool {
        self.inner.is_starting.load(Ordering::SeqCst)
    }

    /// Whether the one-time near-limit warning has fired.
    pub fn near_limit_warning(&self) -> bool {
        self.inner.near_limit.load(Ordering::SeqCst)
    }

    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.started_at.lock().await
    }

    /// Elapsed capture time, read from the native resource while one is
    /// live; falls back to the last sampled value afterwards.
    pub async fn elapsed_seconds(&self) -> f64 {
        let handle = self.inner.handle.lock().await.clone();
        if let Some(handle) = handle {
            if let Ok(status) = handle.status().await {
                self.inner.store_elapsed(status.elapsed);
                return status.elapsed.as_secs_f64();
            }
        }
        self.inner.last_elapsed_ms.load(Ordering::SeqCst) as f64 / 1000.0
    }
}

impl ControllerInner {
    async fn current_state(&self) -> SessionState {
        *self.state.lock().await
    }

    fn store_elapsed(&self, elapsed: Duration) {
        self.last_elapsed_ms
            .store(elapsed.as_millis() as u64, Ordering::SeqCst);
    }

    async fn start_core(self: &Arc<Self>) -> Result<(), RecordingError> {
        {
            let state = self.state.lock().await;
            if *state != SessionState::Idle {
                warn!(session = self.session_id, state = ?*state, "start ignored");
                return Ok(());
            }
        }

        // Permission first; denial is terminal with no retry.
        let permission = match self.backend.query_permission().await {
            PermissionStatus::Granted => PermissionStatus::Granted,
            _ => self.backend.request_permission().await,
        };
        if permission != PermissionStatus::Granted {
            warn!(session = self.session_id, "capture permission denied");
            *self.state.lock().await = SessionState::Failed;
            return Err(RecordingError::PermissionDenied);
        }

        *self.state.lock().await = SessionState::Preparing;
        self.ownership
            .begin_preparing(self.session_id, self.config.prepare_wait)
            .await;

        let negotiated = self.negotiate_resource().await;
        self.ownership.finish_preparing(self.session_id).await;

        let handle = match negotiated {
            Ok(handle) => handle,
            Err(err) => {
                self.ownership.release(self.session_id).await;
                *self.state.lock().await = SessionState::Failed;
                return Err(err);
            }
        };

        let handle: Arc<dyn CaptureHandle> = Arc::from(handle);
        *self.handle.lock().await = Some(Arc::clone(&handle));
        {
            let mut started = self.started_at.lock().await;
            if started.is_none() {
                *started = Some(Utc::now());
            }
        }
        self.near_limit.store(false, Ordering::SeqCst);
        *self.state.lock().await = SessionState::Recording;
        self.ownership.mark_active(self.session_id).await;

        self.arm_watchdog().await;
        self.arm_draft_ticker().await;
        self.spawn_interruption_listener().await;

        info!(session = self.session_id, "recording started");
        Ok(())
    }

    /// Acquire ownership and create the native resource, with the bounded
    /// forced-reset-and-retry policy for exclusive-instance failures.
    async fn negotiate_resource(
        self: &Arc<Self>,
    ) -> Result<Box<dyn CaptureHandle>, RecordingError> {
        self.ownership.acquire(self.session_id).await?;

        // Proactively tear down anything left over from a previous attempt
        // and give the platform a moment to settle.
        let stale = self.handle.lock().await.take();
        if let Some(stale) = stale {
            warn!(
                session = self.session_id,
                "unloading leftover capture handle before start"
            );
            match stale.stop_and_unload().await {
                Ok(()) | Err(CaptureError::AlreadyUnloaded) => {}
                Err(e) => warn!(error = %e, "failed to unload leftover handle"),
            }
            tokio::time::sleep(self.config.settle_delay).await;
        }

        let mut last_exclusive = false;
        for attempt in 1..=self.config.create_attempts {
            match self.try_create_verified().await {
                Ok(handle) => return Ok(handle),
                Err(CaptureError::PermissionDenied) => {
                    return Err(RecordingError::PermissionDenied)
                }
                Err(CaptureError::ExclusiveInstance) => {
                    warn!(
                        session = self.session_id,
                        attempt, "exclusive-instance failure, forcing full reset"
                    );
                    last_exclusive = true;
                    self.force_reset().await?;
                }
                Err(e) => {
                    warn!(
                        session = self.session_id,
                        attempt, error = %e, "capture resource creation failed"
                    );
                    last_exclusive = false;
                    tokio::time::sleep(self.config.settle_delay).await;
                }
            }
        }

        // An exclusive-instance failure on the last ordinary attempt earns
        // one retry after the full reset that just ran.
        if last_exclusive {
            if let Ok(handle) = self.try_create_verified().await {
                return Ok(handle);
            }
        }

        Err(RecordingError::ResourceAcquisitionFailed {
            exclusive: last_exclusive,
        })
    }

    /// Create the native resource and verify it reports itself recording.
    /// A created-but-not-recording resource is unloaded before the retry so
    /// nothing leaks.
    async fn try_create_verified(&self) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let handle = self.backend.create().await?;
        match handle.status().await {
            Ok(status) if status.is_recording => Ok(handle),
            Ok(_) => {
                self.unload_partial(&*handle).await;
                Err(CaptureError::Backend(
                    "resource not recording after start".into(),
                ))
            }
            Err(e) => {
                self.unload_partial(&*handle).await;
                Err(e)
            }
        }
    }

    async fn unload_partial(&self, handle: &dyn CaptureHandle) {
        match handle.stop_and_unload().await {
            Ok(()) | Err(CaptureError::AlreadyUnloaded) => {}
            Err(e) => warn!(error = %e, "failed to unload partial capture resource"),
        }
    }

    /// Full state reset between acquisition attempts: drop the ownership
    /// token, reconfigure the capture mode, settle, re-take the token.
    ///
    /// Losing the token to another session during the settle aborts the
    /// whole negotiation; creation must never run without holding it.
    async fn force_reset(&self) -> Result<(), RecordingError> {
        self.ownership.release(self.session_id).await;
        if let Err(e) = self.backend.reset_mode().await {
            warn!(error = %e, "capture mode reset failed");
        }
        tokio::time::sleep(self.config.settle_delay).await;
        self.ownership.acquire(self.session_id).await
    }

    async fn pause_core(&self, interruption: bool) {
        {
            let mut state = self.state.lock().await;
            if *state != SessionState::Recording {
                return;
            }
            *state = SessionState::Paused;
        }
        self.interruption_paused
            .store(interruption, Ordering::SeqCst);

        let handle = self.handle.lock().await.clone();
        if let Some(handle) = handle {
            if let Ok(status) = handle.status().await {
                self.store_elapsed(status.elapsed);
            }
            if let Err(e) = handle.pause().await {
                warn!(error = %e, "pause failed at capture boundary");
            }
        }

        // Immediate snapshot on the transition.
        self.write_snapshot().await;
        info!(session = self.session_id, "recording paused");
    }

    async fn resume_core(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if *state != SessionState::Paused {
                return;
            }
            *state = SessionState::Recording;
        }
        self.interruption_paused.store(false, Ordering::SeqCst);

        let handle = self.handle.lock().await.clone();
        if let Some(handle) = handle {
            if let Err(e) = handle.resume().await {
                warn!(error = %e, "resume failed at capture boundary");
            }
        }

        self.arm_watchdog().await;
        self.write_snapshot().await;
        info!(session = self.session_id, "recording resumed");
    }

    async fn stop_core(self: &Arc<Self>) -> Result<Option<ArtifactRef>, RecordingError> {
        let _gate = self.stop_gate.lock().await;

        if let Some(outcome) = self.stop_outcome.lock().await.clone() {
            debug!(session = self.session_id, "stop already completed, returning cached outcome");
            return outcome;
        }

        {
            let mut state = self.state.lock().await;
            if !state.is_live() {
                return Ok(None);
            }
            *state = SessionState::Stopping;
        }

        let handle = self.handle.lock().await.take();
        let Some(handle) = handle else {
            // Live state without a handle should not happen; reset anyway.
            error!(session = self.session_id, "no capture handle while stopping");
            *self.state.lock().await = SessionState::Failed;
            self.ownership.release(self.session_id).await;
            return Ok(None);
        };

        // Read the artifact location before unloading: if the unload races an
        // internal auto-stop, the reference is still valid.
        let mut artifact = None;
        match handle.status().await {
            Ok(status) => {
                artifact = status.artifact;
                self.store_elapsed(status.elapsed);
            }
            Err(e) => warn!(error = %e, "status query failed while stopping"),
        }

        let outcome = match handle.stop_and_unload().await {
            Ok(()) => {
                *self.state.lock().await = SessionState::Completed;
                Ok(artifact)
            }
            Err(CaptureError::AlreadyUnloaded) => {
                debug!(
                    session = self.session_id,
                    "resource already unloaded, treating stop as success"
                );
                *self.state.lock().await = SessionState::Completed;
                Ok(artifact)
            }
            Err(e) => {
                error!(error = %e, "unload failed while stopping");
                *self.state.lock().await = SessionState::Failed;
                Err(RecordingError::Capture(e))
            }
        };

        // A finished session must not be offered for recovery. A failed stop
        // keeps the draft: the artifact may still be recoverable.
        if outcome.is_ok() {
            if let Err(e) = self.drafts.clear().await {
                warn!(error = %e, "failed to clear draft after stop");
            }
        }

        self.ownership.release(self.session_id).await;
        *self.stop_outcome.lock().await = Some(outcome.clone());
        self.drop_interruption_listener().await;

        info!(session = self.session_id, ok = outcome.is_ok(), "recording stopped");
        outcome
    }

    async fn cancel_core(self: &Arc<Self>) {
        let _gate = self.stop_gate.lock().await;

        {
            let mut state = self.state.lock().await;
            if state.is_terminal() {
                return;
            }
            *state = SessionState::Cancelled;
        }

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let artifact = handle.status().await.ok().and_then(|s| s.artifact);
            match handle.stop_and_unload().await {
                Ok(()) | Err(CaptureError::AlreadyUnloaded) => {}
                Err(e) => error!(error = %e, "unload failed during cancel"),
            }
            if let Some(artifact) = artifact {
                match tokio::fs::remove_file(artifact.path()).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(error = %e, "failed to discard cancelled artifact"),
                }
            }
        }

        if let Err(e) = self.drafts.clear().await {
            warn!(error = %e, "failed to clear draft after cancel");
        }
        self.ownership.release(self.session_id).await;
        self.drop_interruption_listener().await;
        info!(session = self.session_id, "recording cancelled");
    }

    /// The interruption subscription only matters while the session can
    /// still record; terminal transitions tear it down.
    async fn drop_interruption_listener(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.interruption.take() {
            task.abort();
        }
    }

    /// Snapshot the session: copy the artifact toward durable storage
    /// (best-effort) and persist the metadata. Failures are logged and never
    /// interrupt recording.
    async fn write_snapshot(&self) {
        let handle = self.handle.lock().await.clone();
        let Some(handle) = handle else { return };

        let status = match handle.status().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "draft snapshot skipped, status unavailable");
                return;
            }
        };
        let Some(artifact) = status.artifact else {
            return;
        };

        let (artifact, durable) = match self.artifacts.persist(&artifact).await {
            Ok(durable_ref) => (durable_ref, true),
            Err(e) => {
                warn!(
                    error = %e,
                    "artifact copy to durable storage failed, keeping temporary reference"
                );
                (artifact, false)
            }
        };

        let snapshot = DraftSnapshot {
            artifact,
            started_at: *self.started_at.lock().await,
            elapsed_seconds: status.elapsed.as_secs_f64(),
            paused: self.current_state().await == SessionState::Paused,
            captured_at: Utc::now(),
            durable,
        };
        self.store_elapsed(status.elapsed);

        if let Err(e) = self.drafts.put(&snapshot).await {
            warn!(error = %e, "draft persist failed");
        }
    }

    /// Spawn the 1-second duration sampler. The task exits on its own
    /// whenever the session leaves Recording; resume arms a fresh one.
    async fn arm_watchdog(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let max = self.config.max_duration;
        let warn_at = max.saturating_sub(self.config.warning_window);

        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.current_state().await != SessionState::Recording {
                    break;
                }
                let handle = inner.handle.lock().await.clone();
                let Some(handle) = handle else { break };

                let status = match handle.status().await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(error = %e, "watchdog status query failed");
                        continue;
                    }
                };
                inner.store_elapsed(status.elapsed);

                if status.elapsed >= warn_at
                    && !inner.near_limit.swap(true, Ordering::SeqCst)
                {
                    info!(
                        session = inner.session_id,
                        elapsed_secs = status.elapsed.as_secs(),
                        "recording near duration limit"
                    );
                }

                if status.elapsed >= max {
                    info!(
                        session = inner.session_id,
                        "maximum duration reached, stopping"
                    );
                    if let Err(e) = inner.stop_core().await {
                        error!(error = %e, "watchdog auto-stop failed");
                    }
                    break;
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.watchdog.replace(task) {
            old.abort();
        }
    }

    /// Spawn the periodic draft snapshotter. Skips ticks while paused and
    /// exits once the session reaches Stopping or a terminal state.
    async fn arm_draft_ticker(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.snapshot_interval;

        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // first snapshot one full interval in
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let state = inner.current_state().await;
                if state.is_terminal() || state == SessionState::Stopping {
                    break;
                }
                if state == SessionState::Recording {
                    inner.write_snapshot().await;
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.drafts = Some(task);
    }

    /// Subscribe to the interruption source while recording, if one was
    /// registered.
    async fn spawn_interruption_listener(self: &Arc<Self>) {
        let bus = self.interruption_bus.lock().await.clone();
        let Some(bus) = bus else { return };
        let weak = Arc::downgrade(self);
        let mut rx = bus.subscribe();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(InterruptionEvent::Began) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if inner.current_state().await == SessionState::Recording {
                            info!(
                                session = inner.session_id,
                                "audio interruption began, pausing"
                            );
                            inner.pause_core(true).await;
                        }
                    }
                    Ok(InterruptionEvent::Ended) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if inner.interruption_paused.load(Ordering::SeqCst) {
                            info!(
                                session = inner.session_id,
                                "audio interruption ended, resuming"
                            );
                            inner.resume_core().await;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.interruption.replace(task) {
            old.abort();
        }
    }
}
