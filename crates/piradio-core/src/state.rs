//! The single owned player state.
//!
//! Everything here is synchronous and takes `now` explicitly; locking and side
//! effects live in [`crate::controller`].

use tokio::time::{Duration, Instant};

use crate::config::VolumeConfig;
use crate::error::ControllerError;
use crate::protocol::{Snapshot, Station, UNKNOWN_LABEL};

/// Longest accepted sleep timer: one day.
pub const MAX_TIMER_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeBounds {
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

impl VolumeBounds {
    pub fn clamp(&self, volume: i32) -> i32 {
        volume.clamp(self.min, self.max)
    }
}

impl From<&VolumeConfig> for VolumeBounds {
    fn from(v: &VolumeConfig) -> Self {
        Self {
            min: v.min,
            max: v.max,
            step: v.step,
        }
    }
}

/// Sleep timer.
///
/// Transitions:
///   Disarmed -> Armed            (toggle)
///   Armed -> Armed               (interval changed: restart from now)
///   Armed -> Disarmed            (toggle, or deadline reached)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerState {
    #[default]
    Disarmed,
    Armed { deadline: Instant },
}

impl TimerState {
    pub fn is_armed(&self) -> bool {
        matches!(self, TimerState::Armed { .. })
    }

    /// `"OFF"` or `"ON (<n> min left)"`, whole minutes rounded down.
    pub fn status(&self, now: Instant) -> String {
        match self {
            TimerState::Disarmed => "OFF".to_string(),
            TimerState::Armed { deadline } => {
                let remaining = deadline.saturating_duration_since(now).as_secs() / 60;
                format!("ON ({} min left)", remaining)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    On,
    Off,
}

#[derive(Debug, Clone)]
pub struct PlayerState {
    stations: Vec<Station>,
    station_index: usize,
    current_url: String,
    current_label: String,
    bounds: VolumeBounds,
    volume: i32,
    muted: bool,
    timer: TimerState,
    timer_interval: u32,
    display: DisplayState,
    last_activity: Instant,
    rev: u64,
}

impl PlayerState {
    pub fn new(
        stations: Vec<Station>,
        bounds: VolumeBounds,
        initial_volume: i32,
        timer_interval: u32,
        now: Instant,
    ) -> Self {
        let (current_url, current_label) = stations
            .first()
            .map(|s| (s.url.clone(), s.label.clone()))
            .unwrap_or_else(|| (String::new(), UNKNOWN_LABEL.to_string()));

        Self {
            stations,
            station_index: 0,
            current_url,
            current_label,
            bounds,
            volume: bounds.clamp(initial_volume),
            muted: false,
            timer: TimerState::Disarmed,
            timer_interval: timer_interval.clamp(1, MAX_TIMER_MINUTES),
            display: DisplayState::On,
            last_activity: now,
            rev: 1,
        }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn station_index(&self) -> usize {
        self.station_index
    }

    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    pub fn current_label(&self) -> &str {
        &self.current_label
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn timer(&self) -> TimerState {
        self.timer
    }

    pub fn timer_interval(&self) -> u32 {
        self.timer_interval
    }

    pub fn display(&self) -> DisplayState {
        self.display
    }

    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn bump(&mut self) {
        self.rev += 1;
    }

    // ── stations ──────────────────────────────────────────────────────────────

    fn select_index(&mut self, idx: usize) -> String {
        let station = &self.stations[idx];
        self.station_index = idx;
        self.current_url = station.url.clone();
        self.current_label = station.label.clone();
        self.current_url.clone()
    }

    /// Advance with wrap-around.  `None` when there are no presets.
    pub fn next_station(&mut self) -> Option<String> {
        let len = self.stations.len();
        if len == 0 {
            return None;
        }
        Some(self.select_index((self.station_index + 1) % len))
    }

    pub fn prev_station(&mut self) -> Option<String> {
        let len = self.stations.len();
        if len == 0 {
            return None;
        }
        Some(self.select_index((self.station_index + len - 1) % len))
    }

    /// Point playback at `url`.  A URL outside the preset list keeps the
    /// current index and is labelled [`UNKNOWN_LABEL`].  Returns whether the
    /// URL matched a preset.
    pub fn select_url(&mut self, url: &str) -> bool {
        match self.stations.iter().position(|s| s.url == url) {
            Some(idx) => {
                self.select_index(idx);
                true
            }
            None => {
                self.current_url = url.to_string();
                self.current_label = UNKNOWN_LABEL.to_string();
                false
            }
        }
    }

    pub fn add_station(&mut self, station: Station) -> Result<(), ControllerError> {
        if station.label.trim().is_empty() || station.url.trim().is_empty() {
            return Err(ControllerError::invalid("preset needs both a label and a url"));
        }
        if self.stations.iter().any(|s| s.url == station.url) {
            return Err(ControllerError::invalid(format!(
                "a preset for {} already exists",
                station.url
            )));
        }
        // A stream started by URL before it became a preset picks up its label.
        if self.current_url == station.url {
            self.station_index = self.stations.len();
            self.current_label = station.label.clone();
        }
        self.stations.push(station);
        Ok(())
    }

    // ── volume ────────────────────────────────────────────────────────────────

    pub fn volume_up(&mut self) -> i32 {
        self.volume = self.bounds.clamp(self.volume.saturating_add(self.bounds.step));
        self.volume
    }

    pub fn volume_down(&mut self) -> i32 {
        self.volume = self.bounds.clamp(self.volume.saturating_sub(self.bounds.step));
        self.volume
    }

    pub fn set_volume(&mut self, volume: i32) -> i32 {
        self.volume = self.bounds.clamp(volume);
        self.volume
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }

    // ── sleep timer ───────────────────────────────────────────────────────────

    fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.timer_interval) * 60)
    }

    pub fn toggle_timer(&mut self, now: Instant) -> TimerState {
        self.timer = match self.timer {
            TimerState::Armed { .. } => TimerState::Disarmed,
            TimerState::Disarmed => TimerState::Armed {
                deadline: now + self.interval(),
            },
        };
        self.timer
    }

    /// Store a new interval.  An armed timer restarts from `now` with it.
    /// Returns whether the timer was re-armed.
    pub fn set_timer_interval(&mut self, minutes: u32, now: Instant) -> Result<bool, ControllerError> {
        if !(1..=MAX_TIMER_MINUTES).contains(&minutes) {
            return Err(ControllerError::invalid(format!(
                "timer interval must be between 1 and {} minutes",
                MAX_TIMER_MINUTES
            )));
        }
        self.timer_interval = minutes;
        if self.timer.is_armed() {
            self.timer = TimerState::Armed {
                deadline: now + self.interval(),
            };
            return Ok(true);
        }
        Ok(false)
    }

    /// Disarm if the deadline has passed.  Returns whether it fired.
    pub fn expire_timer(&mut self, now: Instant) -> bool {
        match self.timer {
            TimerState::Armed { deadline } if now >= deadline => {
                self.timer = TimerState::Disarmed;
                true
            }
            _ => false,
        }
    }

    // ── idle display ──────────────────────────────────────────────────────────

    /// Record user activity.  Returns true if this woke the display.
    pub fn touch(&mut self, now: Instant) -> bool {
        self.last_activity = now;
        if self.display == DisplayState::Off {
            self.display = DisplayState::On;
            return true;
        }
        false
    }

    /// Switch the display off once idle for longer than `timeout`.
    /// Returns true on the On -> Off transition only.
    pub fn check_idle(&mut self, now: Instant, timeout: Duration) -> bool {
        if self.display == DisplayState::On
            && now.saturating_duration_since(self.last_activity) > timeout
        {
            self.display = DisplayState::Off;
            return true;
        }
        false
    }

    pub fn snapshot(&self, now: Instant) -> Snapshot {
        Snapshot {
            rev: self.rev,
            url: self.current_url.clone(),
            label: self.current_label.clone(),
            station_index: self.station_index,
            volume: self.volume,
            muted: self.muted,
            timer_status: self.timer.status(now),
            display_on: self.display == DisplayState::On,
        }
    }
}
