use async_trait::async_trait;
use tracing::info;

/// Media playback backend.
///
/// Calls may be slow (IPC round trips, process restarts) and may fail; the
/// controller never holds its state lock across them and treats every error
/// as non-fatal.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Replace the current media with `url` and start playing it.
    async fn play(&self, url: &str) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Absolute volume in the configured range (may exceed 100).
    async fn set_volume(&self, volume: i32) -> anyhow::Result<()>;

    async fn toggle_mute(&self) -> anyhow::Result<()>;
}

/// Engine that only logs.  Selected with `engine.backend = "none"`.
#[derive(Debug, Default)]
pub struct NullEngine;

#[async_trait]
impl AudioEngine for NullEngine {
    async fn play(&self, url: &str) -> anyhow::Result<()> {
        info!("null engine: play {}", url);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("null engine: stop");
        Ok(())
    }

    async fn set_volume(&self, volume: i32) -> anyhow::Result<()> {
        info!("null engine: volume {}", volume);
        Ok(())
    }

    async fn toggle_mute(&self) -> anyhow::Result<()> {
        info!("null engine: toggle mute");
        Ok(())
    }
}
