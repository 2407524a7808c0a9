use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::platform;
use crate::controller::Capabilities;
use crate::protocol::{Command, Station};
use crate::state::MAX_TIMER_MINUTES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialise config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub buttons: ButtonConfig,
    #[serde(default = "default_stations")]
    pub stations: Vec<Station>,
}

/// Which optional capabilities this appliance has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerProfile {
    /// Volume and station control only.
    Basic,
    /// Sleep timer and save-settings on top of basic.
    #[default]
    Full,
}

impl PlayerProfile {
    pub fn capabilities(self) -> Capabilities {
        match self {
            PlayerProfile::Basic => Capabilities {
                timer: false,
                persistence: false,
            },
            PlayerProfile::Full => Capabilities {
                timer: true,
                persistence: true,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub profile: PlayerProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default = "default_volume_min")]
    pub min: i32,
    #[serde(default = "default_volume_max")]
    pub max: i32,
    #[serde(default = "default_volume_step")]
    pub step: i32,
    /// Volume at startup.  Overwritten by save-settings.
    #[serde(default = "default_volume")]
    pub default: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Sleep timer length in minutes.
    #[serde(default = "default_timer_interval")]
    pub interval: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Seconds without activity before the backlight goes off.  0 keeps it on.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    #[default]
    Mpv,
    /// Log every call and do nothing.  For benches without a DAC.
    #[serde(rename = "none")]
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: EngineBackend,
    /// Pause after starting a stream before volume is re-applied.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_network_caching")]
    pub network_caching_ms: u64,
    /// mpv `--audio-device`, e.g. `alsa/hw:1,0` for the Pirate Audio DAC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_device: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_http_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
}

/// BCM pin numbers of the front-panel buttons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonConfig {
    #[serde(default = "default_btn_prev")]
    pub prev: u8,
    #[serde(default = "default_btn_next")]
    pub next: u8,
    #[serde(default = "default_btn_mute")]
    pub mute: u8,
    #[serde(default = "default_btn_volume_up")]
    pub volume_up: u8,
    #[serde(default = "default_btn_volume_down")]
    pub volume_down: u8,
    #[serde(default = "default_btn_timer")]
    pub timer: u8,
}

impl ButtonConfig {
    /// Map a pressed pin to its command.  First match wins if pins are shared.
    pub fn command_for(&self, pin: u8) -> Option<Command> {
        let table = [
            (self.prev, Command::Prev),
            (self.next, Command::Next),
            (self.mute, Command::ToggleMute),
            (self.volume_up, Command::VolumeUp),
            (self.volume_down, Command::VolumeDown),
            (self.timer, Command::ToggleTimer),
        ];
        table
            .into_iter()
            .find(|(p, _)| *p == pin)
            .map(|(_, cmd)| cmd)
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            min: default_volume_min(),
            max: default_volume_max(),
            step: default_volume_step(),
            default: default_volume(),
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval: default_timer_interval(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::default(),
            settle_delay_ms: default_settle_delay(),
            network_caching_ms: default_network_caching(),
            audio_device: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_http_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            bind_address: default_socket_bind_address(),
            port: default_socket_port(),
        }
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            prev: default_btn_prev(),
            next: default_btn_next(),
            mute: default_btn_mute(),
            volume_up: default_btn_volume_up(),
            volume_down: default_btn_volume_down(),
            timer: default_btn_timer(),
        }
    }
}

fn default_volume_min() -> i32 {
    0
}

fn default_volume_max() -> i32 {
    200
}

fn default_volume_step() -> i32 {
    10
}

fn default_volume() -> i32 {
    100
}

fn default_timer_interval() -> u32 {
    30
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_settle_delay() -> u64 {
    1000
}

fn default_network_caching() -> u64 {
    1500
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_socket_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_socket_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_btn_prev() -> u8 {
    13
}

fn default_btn_next() -> u8 {
    5
}

fn default_btn_mute() -> u8 {
    6
}

fn default_btn_volume_up() -> u8 {
    16
}

fn default_btn_volume_down() -> u8 {
    26
}

fn default_btn_timer() -> u8 {
    12
}

fn default_stations() -> Vec<Station> {
    vec![Station::new(
        "BBC World Service",
        "http://stream.live.vc.bbcmedia.co.uk/bbc_world_service",
    )]
}

impl Config {
    /// Load from `path`, writing the defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.volume;
        if v.min > v.max {
            return Err(ConfigError::Invalid(format!(
                "volume.min ({}) is above volume.max ({})",
                v.min, v.max
            )));
        }
        if v.step <= 0 {
            return Err(ConfigError::Invalid("volume.step must be positive".into()));
        }
        if !(v.min..=v.max).contains(&v.default) {
            return Err(ConfigError::Invalid(format!(
                "volume.default ({}) is outside {}..={}",
                v.default, v.min, v.max
            )));
        }
        if !(1..=MAX_TIMER_MINUTES).contains(&self.timer.interval) {
            return Err(ConfigError::Invalid(format!(
                "timer.interval must be between 1 and {} minutes",
                MAX_TIMER_MINUTES
            )));
        }
        Ok(())
    }

    /// Write to `path` via a sibling temp file and a rename, so a failed
    /// write never leaves a truncated config behind.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
            }
        }
        let content = toml::to_string_pretty(self)?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        if let Err(e) = std::fs::write(&tmp_path, content) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(ConfigError::io(&tmp_path, e));
        }
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(ConfigError::io(path, e));
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            player: PlayerConfig::default(),
            volume: VolumeConfig::default(),
            timer: TimerConfig::default(),
            display: DisplayConfig::default(),
            engine: EngineConfig::default(),
            http: HttpConfig::default(),
            socket: SocketConfig::default(),
            buttons: ButtonConfig::default(),
            stations: default_stations(),
        }
    }
}
