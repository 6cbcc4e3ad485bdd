use anyhow::Result;
use capture_session::{
    FsArtifactStore, FsDraftStore, MockBackend, OwnershipService, RecorderConfig,
    SessionController,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Demo driver for the recording-session lifecycle manager.
///
/// Runs a scripted start -> pause -> resume -> stop sequence against the
/// mock capture backend and prints the resulting artifact reference.
#[derive(Debug, Parser)]
#[command(name = "capture-session")]
struct Args {
    /// Path to a recorder config file (defaults are used when omitted)
    #[arg(long)]
    config: Option<String>,

    /// Seconds to record before stopping
    #[arg(long, default_value_t = 3)]
    record_secs: u64,

    /// Insert a pause/resume cycle mid-recording
    #[arg(long)]
    pause: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RecorderConfig::load(path)?,
        None => RecorderConfig::default(),
    };

    let work_dir = std::env::temp_dir().join("capture-session-demo");
    info!("capture-session demo, working under {}", work_dir.display());

    let backend = Arc::new(MockBackend::new(work_dir.join("tmp")));
    let ownership = Arc::new(OwnershipService::new());
    let drafts = Arc::new(FsDraftStore::new(work_dir.join("draft.json")));
    let artifacts = Arc::new(FsArtifactStore::new(work_dir.join("durable")));

    let controller = SessionController::new(config, backend, ownership, drafts, artifacts);

    controller.start().await?;
    info!("recording (session {})", controller.session_id());

    if args.pause {
        tokio::time::sleep(Duration::from_secs(args.record_secs / 2 + 1)).await;
        controller.pause().await;
        info!("paused at {:.1}s", controller.elapsed_seconds().await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.resume().await;
    }

    tokio::time::sleep(Duration::from_secs(args.record_secs)).await;

    match controller.stop().await {
        Ok(Some(artifact)) => info!("finished: artifact at {}", artifact.path().display()),
        Ok(None) => info!("nothing was recorded"),
        Err(e) => {
            tracing::error!("stop failed: {e}");
            println!("{}", e.user_message());
        }
    }

    controller.shutdown().await;
    Ok(())
}
