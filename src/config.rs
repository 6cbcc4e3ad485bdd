use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Tunables for the recording session controller.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Hard cap on recording length; the watchdog force-stops at this point.
    pub max_duration: Duration,

    /// The one-time near-limit warning fires at `max_duration - warning_window`.
    pub warning_window: Duration,

    /// Draft snapshot cadence while recording and not paused.
    pub snapshot_interval: Duration,

    /// Total bound on waiting for a concurrent preparing negotiation to
    /// clear before forcing a reset.
    pub prepare_wait: Duration,

    /// Settle time after proactively unloading a stale resource.
    pub settle_delay: Duration,

    /// Ordinary resource-creation attempts before the acquisition is
    /// considered failed (an exclusive-instance failure on the last attempt
    /// still earns one forced-reset retry).
    pub create_attempts: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(600),
            warning_window: Duration::from_secs(60),
            snapshot_interval: Duration::from_secs(5),
            prepare_wait: Duration::from_secs(2),
            settle_delay: Duration::from_millis(100),
            create_attempts: 2,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    recorder: RawRecorder,
}

#[derive(Debug, Deserialize)]
struct RawRecorder {
    max_duration_secs: u64,
    warning_window_secs: u64,
    snapshot_interval_secs: u64,
    #[serde(default = "default_prepare_wait_ms")]
    prepare_wait_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    settle_delay_ms: u64,
    #[serde(default = "default_create_attempts")]
    create_attempts: u32,
}

fn default_prepare_wait_ms() -> u64 {
    2000
}

fn default_settle_delay_ms() -> u64 {
    100
}

fn default_create_attempts() -> u32 {
    2
}

impl RecorderConfig {
    /// Load from a config file (format resolved by extension).
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        let raw: RawConfig = settings.try_deserialize()?;
        Ok(Self {
            max_duration: Duration::from_secs(raw.recorder.max_duration_secs),
            warning_window: Duration::from_secs(raw.recorder.warning_window_secs),
            snapshot_interval: Duration::from_secs(raw.recorder.snapshot_interval_secs),
            prepare_wait: Duration::from_millis(raw.recorder.prepare_wait_ms),
            settle_delay: Duration::from_millis(raw.recorder.settle_delay_ms),
            create_attempts: raw.recorder.create_attempts,
        })
    }
}
