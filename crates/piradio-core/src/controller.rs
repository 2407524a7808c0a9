//! Controller: the one serialisation point for player state.
//!
//! Button presses, HTTP handlers and the two background monitors all go
//! through [`Controller`].  Each entry point takes the state mutex, mutates,
//! snapshots, and releases the lock *before* touching the audio engine or the
//! renderer:
//!
//! ```text
//!   apply(cmd) ── lock ── mutate ── snapshot ── unlock
//!                                                 │
//!                                                 ├── renderer.effect()   (0 or 1)
//!                                                 ├── engine call         (logged on failure)
//!                                                 └── renderer.render()   (exactly 1)
//! ```
//!
//! A render may therefore show a state that has already been superseded; the
//! next render catches up.
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::AudioEngine;
use crate::error::ControllerError;
use crate::protocol::{Command, Snapshot, Station};
use crate::render::{LedEffect, Renderer};
use crate::state::{PlayerState, VolumeBounds};

/// Optional features of a player.  Chosen once from the configured profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub timer: bool,
    pub persistence: bool,
}

/// Engine call decided under the lock, performed after it is released.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EngineAction {
    None,
    Play(String),
    SetVolume(i32),
    ToggleMute,
}

struct Plan {
    action: EngineAction,
    effect: Option<LedEffect>,
}

impl Plan {
    fn new(action: EngineAction, effect: Option<LedEffect>) -> Self {
        Self { action, effect }
    }

    fn idle() -> Self {
        Self::new(EngineAction::None, None)
    }
}

/// Where save-settings writes, plus the config it started from so fields the
/// controller does not own survive a save.
struct SettingsStore {
    path: PathBuf,
    base: Config,
    /// Serialises writers on the shared temp file.
    write_lock: Mutex<()>,
}

pub struct Controller {
    state: Mutex<PlayerState>,
    engine: Arc<dyn AudioEngine>,
    renderer: Arc<dyn Renderer>,
    capabilities: Capabilities,
    settle_delay: Duration,
    idle_timeout: Duration,
    store: Option<SettingsStore>,
}

impl Controller {
    pub fn new(config: &Config, engine: Arc<dyn AudioEngine>, renderer: Arc<dyn Renderer>) -> Self {
        let state = PlayerState::new(
            config.stations.clone(),
            VolumeBounds::from(&config.volume),
            config.volume.default,
            config.timer.interval,
            Instant::now(),
        );

        Self {
            state: Mutex::new(state),
            engine,
            renderer,
            capabilities: config.player.profile.capabilities(),
            settle_delay: Duration::from_millis(config.engine.settle_delay_ms),
            idle_timeout: Duration::from_secs(config.display.idle_timeout_secs),
            store: None,
        }
    }

    /// Enable save-settings against `path`.  Ignored when the profile has no
    /// persistence capability.
    pub fn with_settings_file(mut self, config: &Config, path: PathBuf) -> Self {
        if self.capabilities.persistence {
            self.store = Some(SettingsStore {
                path,
                base: config.clone(),
                write_lock: Mutex::new(()),
            });
        }
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn supports_persistence(&self) -> bool {
        self.store.is_some()
    }

    pub async fn status(&self) -> Snapshot {
        self.state.lock().await.snapshot(Instant::now())
    }

    pub async fn stations(&self) -> Vec<Station> {
        self.state.lock().await.stations().to_vec()
    }

    /// Apply one command.  Rejected commands leave the state untouched and
    /// produce no side effects.
    pub async fn apply(&self, command: Command) -> Result<Snapshot, ControllerError> {
        self.check_supported(&command)?;

        let now = Instant::now();
        let (plan, woke, snapshot) = {
            let mut state = self.state.lock().await;
            let plan = Self::mutate(&mut state, &command, now)?;
            let woke = state.touch(now);
            state.bump();
            (plan, woke, state.snapshot(now))
        };
        debug!("controller: {:?} -> rev {}", command, snapshot.rev);

        if woke {
            self.renderer.set_backlight(true);
        }
        if let Some(effect) = plan.effect {
            self.renderer.effect(effect);
        }
        self.perform(plan.action).await;
        self.renderer.render(&snapshot);

        Ok(snapshot)
    }

    fn check_supported(&self, command: &Command) -> Result<(), ControllerError> {
        match command {
            Command::ToggleTimer | Command::SetTimerInterval { .. } if !self.capabilities.timer => {
                Err(ControllerError::Unsupported("sleep timer"))
            }
            _ => Ok(()),
        }
    }

    fn mutate(state: &mut PlayerState, command: &Command, now: Instant) -> Result<Plan, ControllerError> {
        let plan = match command {
            Command::Next => match state.next_station() {
                Some(url) => Plan::new(EngineAction::Play(url), Some(LedEffect::NEXT_STATION)),
                None => Plan::idle(),
            },
            Command::Prev => match state.prev_station() {
                Some(url) => Plan::new(EngineAction::Play(url), Some(LedEffect::PREV_STATION)),
                None => Plan::idle(),
            },
            Command::VolumeUp => Plan::new(
                EngineAction::SetVolume(state.volume_up()),
                Some(LedEffect::VOLUME_UP),
            ),
            Command::VolumeDown => Plan::new(
                EngineAction::SetVolume(state.volume_down()),
                Some(LedEffect::VOLUME_DOWN),
            ),
            Command::ToggleMute => {
                let muted = state.toggle_mute();
                info!("{}", if muted { "Muted" } else { "Unmuted" });
                Plan::new(EngineAction::ToggleMute, Some(LedEffect::MUTE))
            }
            Command::SetVolume { value } => {
                Plan::new(EngineAction::SetVolume(state.set_volume(*value)), None)
            }
            Command::SetStation { url } => {
                let url = url.trim();
                if url.is_empty() {
                    return Err(ControllerError::invalid("missing url"));
                }
                if !state.select_url(url) {
                    warn!("{} is not a preset, playing it as unknown", url);
                }
                Plan::new(EngineAction::Play(url.to_string()), None)
            }
            Command::ToggleTimer => {
                if state.toggle_timer(now).is_armed() {
                    info!("Timer started for {} min", state.timer_interval());
                    Plan::new(EngineAction::None, Some(LedEffect::TIMER_ARMED))
                } else {
                    info!("Timer stopped");
                    Plan::new(EngineAction::None, Some(LedEffect::TIMER_CANCELLED))
                }
            }
            Command::SetTimerInterval { minutes } => {
                if state.set_timer_interval(*minutes, now)? {
                    info!("Timer restarted for {} min", minutes);
                }
                Plan::idle()
            }
            Command::AddPreset { label, url } => {
                state.add_station(Station::new(label.trim(), url.trim()))?;
                info!("Preset added: {}", label.trim());
                Plan::idle()
            }
            Command::Wake => Plan::idle(),
        };
        Ok(plan)
    }

    async fn perform(&self, action: EngineAction) {
        match action {
            EngineAction::None => {}
            EngineAction::Play(url) => self.play_url(&url).await,
            EngineAction::SetVolume(volume) => {
                if let Err(e) = self.engine.set_volume(volume).await {
                    warn!("engine: set volume {} failed: {:#}", volume, e);
                }
            }
            EngineAction::ToggleMute => {
                if let Err(e) = self.engine.toggle_mute().await {
                    warn!("engine: toggle mute failed: {:#}", e);
                }
            }
        }
    }

    /// Start `url`, wait for the engine to settle, then re-apply whatever the
    /// volume is *now* (it may have changed during the delay).
    async fn play_url(&self, url: &str) {
        if let Err(e) = self.engine.play(url).await {
            warn!("engine: play {} failed: {:#}", url, e);
            return;
        }
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        let volume = self.state.lock().await.volume();
        if let Err(e) = self.engine.set_volume(volume).await {
            warn!("engine: volume after load failed: {:#}", e);
        }
        info!("Playing: {}", url);
    }

    /// Called once a second by the timer monitor.  Returns whether the timer
    /// expired on this tick.
    pub async fn timer_tick(&self) -> bool {
        let now = Instant::now();
        let snapshot = {
            let mut state = self.state.lock().await;
            if !state.expire_timer(now) {
                return false;
            }
            state.bump();
            state.snapshot(now)
        };

        info!("Timer expired, stopping playback");
        if let Err(e) = self.engine.stop().await {
            warn!("engine: stop on timer expiry failed: {:#}", e);
        }
        self.renderer.effect(LedEffect::TIMER_EXPIRED);
        self.renderer.render(&snapshot);
        true
    }

    /// Called once a second by the idle monitor.  Returns whether the display
    /// was switched off on this tick.
    pub async fn idle_tick(&self) -> bool {
        if self.idle_timeout.is_zero() {
            return false;
        }
        let went_dark = {
            let mut state = self.state.lock().await;
            let went_dark = state.check_idle(Instant::now(), self.idle_timeout);
            if went_dark {
                state.bump();
            }
            went_dark
        };
        if went_dark {
            debug!("display idle for {:?}, backlight off", self.idle_timeout);
            self.renderer.set_backlight(false);
        }
        went_dark
    }

    /// Play the current station.  Used once at startup.
    pub async fn start_playback(&self) {
        let (url, snapshot) = {
            let state = self.state.lock().await;
            (state.current_url().to_string(), state.snapshot(Instant::now()))
        };
        self.renderer.render(&snapshot);
        if url.is_empty() {
            warn!("No stations configured, nothing to play");
            return;
        }
        self.play_url(&url).await;
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.engine.stop().await {
            warn!("engine: stop on shutdown failed: {:#}", e);
        }
    }

    /// Write volume, timer interval and presets back to the config file.
    pub async fn save(&self) -> Result<(), ControllerError> {
        let store = self
            .store
            .as_ref()
            .ok_or(ControllerError::Unsupported("saving settings"))?;

        let _guard = store.write_lock.lock().await;
        let config = {
            let state = self.state.lock().await;
            let mut config = store.base.clone();
            config.volume.default = state.volume();
            config.timer.interval = state.timer_interval();
            config.stations = state.stations().to_vec();
            config
        };
        config.save_to(&store.path)?;
        info!("Settings saved to {:?}", store.path);
        Ok(())
    }
}
