use super::backend::{
    ArtifactRef, CaptureBackend, CaptureError, CaptureHandle, CaptureStatus, PermissionStatus,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Deterministic in-process capture backend.
///
/// Used by the demo binary and the integration tests. Failures are scripted
/// up front (a queue of `create` errors, an optional error for the next
/// handle's unload) and elapsed time is driven by `tokio::time::Instant`, so
/// tests running on a paused clock control it exactly.
///
/// The backend enforces the platform's single-instance rule itself: `create`
/// fails with `ExclusiveInstance` while a previous handle is still loaded,
/// and `reset_mode` force-unloads any such leftover.
pub struct MockBackend {
    inner: Arc<Mutex<BackendInner>>,
}

struct BackendInner {
    permission: PermissionStatus,
    create_failures: VecDeque<CaptureError>,
    next_unload_error: Option<CaptureError>,
    live: Option<Arc<Mutex<HandleInner>>>,
    artifact_dir: PathBuf,
    create_calls: usize,
    reset_calls: usize,
    status_calls: usize,
}

impl MockBackend {
    pub fn new(artifact_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BackendInner {
                permission: PermissionStatus::Granted,
                create_failures: VecDeque::new(),
                next_unload_error: None,
                live: None,
                artifact_dir,
                create_calls: 0,
                reset_calls: 0,
                status_calls: 0,
            })),
        }
    }

    pub async fn set_permission(&self, permission: PermissionStatus) {
        self.inner.lock().await.permission = permission;
    }

    /// Queue an error to be returned by the next `create` call(s), in order.
    pub async fn script_create_failure(&self, error: CaptureError) {
        self.inner.lock().await.create_failures.push_back(error);
    }

    /// Make the next created handle's `stop_and_unload` return `error` once.
    pub async fn script_unload_error(&self, error: CaptureError) {
        self.inner.lock().await.next_unload_error = Some(error);
    }

    pub async fn create_calls(&self) -> usize {
        self.inner.lock().await.create_calls
    }

    pub async fn reset_calls(&self) -> usize {
        self.inner.lock().await.reset_calls
    }

    /// Total status queries across all handles created by this backend.
    pub async fn status_calls(&self) -> usize {
        self.inner.lock().await.status_calls
    }

    /// Whether a handle is still loaded (not yet unloaded).
    pub async fn live_handle_exists(&self) -> bool {
        self.inner.lock().await.live.is_some()
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MockBackend {
    async fn query_permission(&self) -> PermissionStatus {
        self.inner.lock().await.permission
    }

    async fn request_permission(&self) -> PermissionStatus {
        let mut inner = self.inner.lock().await;
        if inner.permission == PermissionStatus::Undetermined {
            inner.permission = PermissionStatus::Granted;
        }
        inner.permission
    }

    async fn reset_mode(&self) -> Result<(), CaptureError> {
        let mut inner = self.inner.lock().await;
        inner.reset_calls += 1;
        // A mode reset tears down whatever instance is still loaded.
        if let Some(stale) = inner.live.take() {
            stale.lock().await.unloaded = true;
            debug!("mock reset unloaded a stale capture instance");
        }
        Ok(())
    }

    async fn create(&self) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let (artifact_dir, artifact_path) = {
            let mut inner = self.inner.lock().await;
            inner.create_calls += 1;

            if let Some(err) = inner.create_failures.pop_front() {
                return Err(err);
            }
            if inner.live.is_some() {
                return Err(CaptureError::ExclusiveInstance);
            }
            let dir = inner.artifact_dir.clone();
            let path = dir.join(format!("capture-{}.tmp.wav", uuid::Uuid::new_v4()));
            (dir, path)
        };

        tokio::fs::create_dir_all(&artifact_dir)
            .await
            .map_err(|e| CaptureError::Backend(e.to_string()))?;
        tokio::fs::write(&artifact_path, b"RIFFmock")
            .await
            .map_err(|e| CaptureError::Backend(e.to_string()))?;

        let mut inner = self.inner.lock().await;
        let handle_inner = Arc::new(Mutex::new(HandleInner {
            artifact: ArtifactRef(artifact_path),
            accumulated: Duration::ZERO,
            running_since: Some(tokio::time::Instant::now()),
            unloaded: false,
            unload_error: inner.next_unload_error.take(),
        }));
        inner.live = Some(Arc::clone(&handle_inner));

        Ok(Box::new(MockHandle {
            inner: handle_inner,
            backend: Arc::clone(&self.inner),
        }))
    }
}

struct HandleInner {
    artifact: ArtifactRef,
    accumulated: Duration,
    running_since: Option<tokio::time::Instant>,
    unloaded: bool,
    unload_error: Option<CaptureError>,
}

impl HandleInner {
    fn elapsed(&self) -> Duration {
        let running = self
            .running_since
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        self.accumulated + running
    }
}

pub struct MockHandle {
    inner: Arc<Mutex<HandleInner>>,
    backend: Arc<Mutex<BackendInner>>,
}

#[async_trait::async_trait]
impl CaptureHandle for MockHandle {
    async fn pause(&self) -> Result<(), CaptureError> {
        let mut inner = self.inner.lock().await;
        if inner.unloaded {
            return Err(CaptureError::Backend("handle is unloaded".into()));
        }
        if let Some(since) = inner.running_since.take() {
            inner.accumulated += since.elapsed();
        }
        Ok(())
    }

    async fn resume(&self) -> Result<(), CaptureError> {
        let mut inner = self.inner.lock().await;
        if inner.unloaded {
            return Err(CaptureError::Backend("handle is unloaded".into()));
        }
        if inner.running_since.is_none() {
            inner.running_since = Some(tokio::time::Instant::now());
        }
        Ok(())
    }

    async fn status(&self) -> Result<CaptureStatus, CaptureError> {
        self.backend.lock().await.status_calls += 1;
        let inner = self.inner.lock().await;
        Ok(CaptureStatus {
            is_recording: !inner.unloaded && inner.running_since.is_some(),
            elapsed: inner.elapsed(),
            artifact: Some(inner.artifact.clone()),
        })
    }

    async fn stop_and_unload(&self) -> Result<(), CaptureError> {
        let result = {
            let mut inner = self.inner.lock().await;
            if inner.unloaded {
                return Err(CaptureError::AlreadyUnloaded);
            }
            if let Some(since) = inner.running_since.take() {
                inner.accumulated += since.elapsed();
            }
            inner.unloaded = true;
            match inner.unload_error.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        };

        // The resource is gone either way; drop the backend's live slot.
        let mut backend = self.backend.lock().await;
        if let Some(live) = &backend.live {
            if Arc::ptr_eq(live, &self.inner) {
                backend.live = None;
            }
        }

        result
    }
}
