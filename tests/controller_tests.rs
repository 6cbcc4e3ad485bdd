// Integration tests for the session controller state machine:
// start/pause/resume/stop/cancel transitions, the duration watchdog,
// acquisition retries and the benign unload race.

use anyhow::Result;
use capture_session::{
    AppLifecycleEvent, ArtifactRef, ArtifactStore, CaptureError, InterruptionBus,
    InterruptionEvent, LifecycleBus, MemoryDraftStore, MockBackend, OwnershipService,
    PermissionStatus, RecorderConfig, RecordingError, SessionController, SessionState,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Artifact store that keeps references as-is, so timer-sensitive tests do
/// no file IO on the paused clock.
struct NullArtifactStore;

#[async_trait::async_trait]
impl ArtifactStore for NullArtifactStore {
    async fn persist(&self, artifact: &ArtifactRef) -> Result<ArtifactRef> {
        Ok(artifact.clone())
    }
}

fn setup(
    config: RecorderConfig,
    dir: &Path,
) -> (
    SessionController,
    Arc<MockBackend>,
    Arc<MemoryDraftStore>,
    Arc<OwnershipService>,
) {
    let backend = Arc::new(MockBackend::new(dir.to_path_buf()));
    let ownership = Arc::new(OwnershipService::new());
    let drafts = Arc::new(MemoryDraftStore::new());
    let controller = SessionController::new(
        config,
        backend.clone(),
        ownership.clone(),
        drafts.clone(),
        Arc::new(NullArtifactStore),
    );
    (controller, backend, drafts, ownership)
}

#[tokio::test(start_paused = true)]
async fn start_pause_resume_stop_yields_artifact() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, _, _, _) = setup(RecorderConfig::default(), tmp.path());

    controller.start().await?;
    assert!(controller.is_recording().await);
    assert!(controller.started_at().await.is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    controller.pause().await;
    assert!(controller.is_paused().await);
    assert!((controller.elapsed_seconds().await - 2.0).abs() < 0.05);

    // Elapsed must not advance while paused.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!((controller.elapsed_seconds().await - 2.0).abs() < 0.05);

    controller.resume().await;
    assert!(controller.is_recording().await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let artifact = controller.stop().await?;
    let artifact = artifact.expect("stop should return an artifact");
    assert!(artifact.path().exists());
    assert!(!controller.is_recording().await);
    assert_eq!(controller.state().await, SessionState::Completed);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_stops_return_identical_artifact() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, _, _, _) = setup(RecorderConfig::default(), tmp.path());

    controller.start().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (a, b) = tokio::join!(controller.stop(), controller.stop());
    let a = a?.expect("first stop should return an artifact");
    let b = b?.expect("second stop should return the same artifact");
    assert_eq!(a, b);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn benign_unload_race_still_returns_artifact() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, _) = setup(RecorderConfig::default(), tmp.path());

    backend.script_unload_error(CaptureError::AlreadyUnloaded).await;
    controller.start().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let artifact = controller.stop().await?;
    assert!(artifact.is_some(), "already-unloaded is not an error");
    assert_eq!(controller.state().await, SessionState::Completed);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn real_unload_failure_fails_but_resets_state() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, ownership) = setup(RecorderConfig::default(), tmp.path());

    backend
        .script_unload_error(CaptureError::Backend("device wedged".into()))
        .await;
    controller.start().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let result = controller.stop().await;
    assert!(matches!(result, Err(RecordingError::Capture(_))));
    assert_eq!(controller.state().await, SessionState::Failed);
    assert!(!controller.is_recording().await);
    // The controller must not stay wedged: ownership is released and a fresh
    // session can start.
    assert_eq!(ownership.owner().await, None);

    let fresh = SessionController::new(
        RecorderConfig::default(),
        backend.clone(),
        ownership.clone(),
        Arc::new(MemoryDraftStore::new()),
        Arc::new(NullArtifactStore),
    );
    fresh.start().await?;
    assert!(fresh.is_recording().await);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn auto_stops_at_max_duration() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, _, _, _) = setup(RecorderConfig::default(), tmp.path());

    controller.start().await?;
    tokio::time::sleep(Duration::from_secs(601)).await;

    assert_eq!(controller.state().await, SessionState::Completed);
    let elapsed = controller.elapsed_seconds().await;
    assert!(
        (600.0..601.0).contains(&elapsed),
        "elapsed at stop time was {elapsed}"
    );

    // A caller stop after the auto-stop gets the cached outcome.
    let artifact = controller.stop().await?;
    assert!(artifact.is_some());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn near_limit_warning_fires_once() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, _, _, _) = setup(RecorderConfig::default(), tmp.path());

    controller.start().await?;
    tokio::time::sleep(Duration::from_secs(539)).await;
    assert!(!controller.near_limit_warning());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(controller.near_limit_warning());
    assert!(controller.is_recording().await, "warning must not stop capture");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(controller.near_limit_warning());
    assert!(controller.is_recording().await);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn foreground_rearm_replaces_the_watchdog() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, _) = setup(RecorderConfig::default(), tmp.path());
    let lifecycle = LifecycleBus::new();

    controller.observe_lifecycle(&lifecycle).await;
    controller.start().await?;

    // Each foreground transition re-arms the duration sampler; the previous
    // one must be gone, not left polling alongside.
    for _ in 0..3 {
        lifecycle.emit(AppLifecycleEvent::Foreground);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let before = backend.status_calls().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    let polls = backend.status_calls().await - before;
    assert!(
        (8..=13).contains(&polls),
        "expected one sampler poll per second, saw {polls} in 10s"
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exclusive_instance_failures_recover_via_forced_reset() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, _) = setup(RecorderConfig::default(), tmp.path());

    backend.script_create_failure(CaptureError::ExclusiveInstance).await;
    backend.script_create_failure(CaptureError::ExclusiveInstance).await;

    controller.start().await?;
    assert_eq!(controller.state().await, SessionState::Recording);
    assert_eq!(backend.create_calls().await, 3);
    assert_eq!(backend.reset_calls().await, 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn acquisition_fails_after_exhausted_retries() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, ownership) = setup(RecorderConfig::default(), tmp.path());

    for _ in 0..3 {
        backend.script_create_failure(CaptureError::ExclusiveInstance).await;
    }

    let result = controller.start().await;
    match result {
        Err(RecordingError::ResourceAcquisitionFailed { exclusive }) => {
            assert!(exclusive);
        }
        other => panic!("expected acquisition failure, got {other:?}"),
    }
    assert_eq!(controller.state().await, SessionState::Failed);
    // No leaked resources or ownership.
    assert!(!backend.live_handle_exists().await);
    assert_eq!(ownership.owner().await, None);

    let message = RecordingError::ResourceAcquisitionFailed { exclusive: true }.user_message();
    assert!(message.contains("in use by another app"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn non_exclusive_failures_get_no_bonus_retry() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, _) = setup(RecorderConfig::default(), tmp.path());

    backend
        .script_create_failure(CaptureError::Backend("boom".into()))
        .await;
    backend
        .script_create_failure(CaptureError::Backend("boom".into()))
        .await;

    let result = controller.start().await;
    assert!(matches!(
        result,
        Err(RecordingError::ResourceAcquisitionFailed { exclusive: false })
    ));
    assert_eq!(backend.create_calls().await, 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn permission_denial_fails_without_touching_the_resource() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, _) = setup(RecorderConfig::default(), tmp.path());

    backend.set_permission(PermissionStatus::Denied).await;

    let result = controller.start().await;
    assert!(matches!(result, Err(RecordingError::PermissionDenied)));
    assert_eq!(controller.state().await, SessionState::Failed);
    assert_eq!(backend.create_calls().await, 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn double_start_is_a_noop() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, _) = setup(RecorderConfig::default(), tmp.path());

    controller.start().await?;
    controller.start().await?;
    assert_eq!(backend.create_calls().await, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn interruption_pauses_and_resumes() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, _, _, _) = setup(RecorderConfig::default(), tmp.path());
    let interruptions = InterruptionBus::new();

    controller.observe_interruptions(&interruptions).await;
    controller.start().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    interruptions.emit(InterruptionEvent::Began);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(controller.is_paused().await);

    interruptions.emit(InterruptionEvent::Ended);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(controller.is_recording().await);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn interruption_end_does_not_override_user_pause() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, _, _, _) = setup(RecorderConfig::default(), tmp.path());
    let interruptions = InterruptionBus::new();

    controller.observe_interruptions(&interruptions).await;
    controller.start().await?;
    controller.pause().await;

    interruptions.emit(InterruptionEvent::Ended);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(controller.is_paused().await, "user pause must stick");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn ownership_lost_during_forced_reset_aborts_the_start() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, ownership) = setup(RecorderConfig::default(), tmp.path());

    backend.script_create_failure(CaptureError::ExclusiveInstance).await;

    // A rival session grabs the token mid-reset, while this one has dropped
    // it and is waiting out the settle delay.
    let rival = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ownership
            .acquire(999)
            .await
            .expect("token is free during the reset");
        ownership.mark_active(999).await;
    };

    let (result, ()) = tokio::join!(controller.start(), rival);
    assert!(matches!(result, Err(RecordingError::ResourceBusy)));
    assert_eq!(controller.state().await, SessionState::Failed);
    assert_eq!(ownership.owner().await, Some(999));
    assert_eq!(
        backend.create_calls().await,
        1,
        "no creation attempt without holding the token"
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn interruption_listener_is_dropped_on_stop() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, _, _, _) = setup(RecorderConfig::default(), tmp.path());
    let interruptions = InterruptionBus::new();

    controller.observe_interruptions(&interruptions).await;
    controller.start().await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(interruptions.receiver_count(), 1);

    controller.stop().await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        interruptions.receiver_count(),
        0,
        "listener torn down with the session"
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn interruption_listener_is_dropped_on_cancel() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, _, _, _) = setup(RecorderConfig::default(), tmp.path());
    let interruptions = InterruptionBus::new();

    controller.observe_interruptions(&interruptions).await;
    controller.start().await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(interruptions.receiver_count(), 1);

    controller.cancel().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(interruptions.receiver_count(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_discards_everything() -> Result<()> {
    let tmp = TempDir::new()?;
    let (controller, backend, _, ownership) = setup(RecorderConfig::default(), tmp.path());

    controller.start().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    controller.cancel().await;

    assert_eq!(controller.state().await, SessionState::Cancelled);
    assert!(!backend.live_handle_exists().await);
    assert_eq!(ownership.owner().await, None);

    // Stop after cancel has nothing to stop.
    assert!(controller.stop().await?.is_none());

    Ok(())
}
