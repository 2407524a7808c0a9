//! Display / LED sink.
//!
//! The controller never talks to hardware.  It hands a [`Snapshot`] and the
//! occasional [`LedEffect`] to a [`Renderer`]; the daemon's renderer fans them
//! out to whichever helper process drives the ST7789 panel or the pHAT BEAT
//! LED bar.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::protocol::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedEffect {
    /// All pixels on at half brightness, then cleared.
    Flash { color: Rgb, duration_ms: u64 },
    /// Ramp brightness up over `steps`, back down, then clear.
    Pulse { color: Rgb, steps: u8, hold_ms: u64 },
}

impl LedEffect {
    pub const NEXT_STATION: Self = Self::flash(Rgb(255, 0, 0));
    pub const PREV_STATION: Self = Self::flash(Rgb(255, 0, 255));
    pub const VOLUME_UP: Self = Self::flash(Rgb(0, 255, 0));
    pub const VOLUME_DOWN: Self = Self::flash(Rgb(0, 0, 255));
    pub const MUTE: Self = Self::Pulse {
        color: Rgb(255, 200, 0),
        steps: 6,
        hold_ms: 30,
    };
    pub const TIMER_ARMED: Self = Self::flash(Rgb(0, 128, 0));
    pub const TIMER_CANCELLED: Self = Self::flash(Rgb(128, 0, 0));
    pub const TIMER_EXPIRED: Self = Self::flash(Rgb(255, 0, 0));

    const fn flash(color: Rgb) -> Self {
        Self::Flash {
            color,
            duration_ms: 180,
        }
    }
}

/// Side-effect-only sink.  Implementations must be cheap and must not block:
/// they are called right after a state change with no lock held.
pub trait Renderer: Send + Sync {
    fn render(&self, snapshot: &Snapshot);
    fn effect(&self, effect: LedEffect);
    fn set_backlight(&self, on: bool);
}

#[derive(Debug, Clone)]
pub enum RenderEvent {
    State(Snapshot),
    Effect(LedEffect),
    Backlight(bool),
}

/// Publishes every render call on a broadcast channel.  Having no subscribers
/// is normal (no helper connected yet), so send errors are ignored.
pub struct ChannelRenderer {
    tx: broadcast::Sender<RenderEvent>,
}

impl ChannelRenderer {
    pub fn new(tx: broadcast::Sender<RenderEvent>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: RenderEvent) {
        trace!("render: {:?}", event);
        let _ = self.tx.send(event);
    }
}

impl Renderer for ChannelRenderer {
    fn render(&self, snapshot: &Snapshot) {
        self.publish(RenderEvent::State(snapshot.clone()));
    }

    fn effect(&self, effect: LedEffect) {
        self.publish(RenderEvent::Effect(effect));
    }

    fn set_backlight(&self, on: bool) {
        self.publish(RenderEvent::Backlight(on));
    }
}
