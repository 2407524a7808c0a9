#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use piradio_core::config::{Config, PlayerProfile};
use piradio_core::controller::Controller;
use piradio_core::engine::AudioEngine;
use piradio_core::protocol::{Snapshot, Station};
use piradio_core::render::{LedEffect, Renderer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Play(String),
    Stop,
    SetVolume(i32),
    ToggleMute,
}

/// Records every call.  With `failing` set every call errors after being recorded.
#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    failing: AtomicBool,
}

impl RecordingEngine {
    pub fn failing() -> Self {
        let engine = Self::default();
        engine.failing.store(true, Ordering::SeqCst);
        engine
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn stops(&self) -> usize {
        self.count(&EngineCall::Stop)
    }

    fn record(&self, call: EngineCall) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call.clone());
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("engine unavailable during {:?}", call);
        }
        Ok(())
    }
}

#[async_trait]
impl AudioEngine for RecordingEngine {
    async fn play(&self, url: &str) -> anyhow::Result<()> {
        self.record(EngineCall::Play(url.to_string()))
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.record(EngineCall::Stop)
    }

    async fn set_volume(&self, volume: i32) -> anyhow::Result<()> {
        self.record(EngineCall::SetVolume(volume))
    }

    async fn toggle_mute(&self) -> anyhow::Result<()> {
        self.record(EngineCall::ToggleMute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    State(Snapshot),
    Effect(LedEffect),
    Backlight(bool),
}

#[derive(Default)]
pub struct RecordingRenderer {
    events: Mutex<Vec<Rendered>>,
}

impl RecordingRenderer {
    pub fn events(&self) -> Vec<Rendered> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn renders(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Rendered::State(_)))
            .count()
    }

    pub fn effects(&self) -> Vec<LedEffect> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Rendered::Effect(effect) => Some(effect),
                _ => None,
            })
            .collect()
    }

    pub fn backlight(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Rendered::Backlight(on) => Some(on),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, snapshot: &Snapshot) {
        self.events
            .lock()
            .unwrap()
            .push(Rendered::State(snapshot.clone()));
    }

    fn effect(&self, effect: LedEffect) {
        self.events.lock().unwrap().push(Rendered::Effect(effect));
    }

    fn set_backlight(&self, on: bool) {
        self.events.lock().unwrap().push(Rendered::Backlight(on));
    }
}

pub fn stations(n: usize) -> Vec<Station> {
    (0..n)
        .map(|i| Station::new(format!("Station {}", i), format!("http://radio.test/{}", i)))
        .collect()
}

/// Three stations, volume 0..=200 step 10 starting at 100, no settle delay.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.stations = stations(3);
    config.volume.min = 0;
    config.volume.max = 200;
    config.volume.step = 10;
    config.volume.default = 100;
    config.timer.interval = 30;
    config.engine.settle_delay_ms = 0;
    config.display.idle_timeout_secs = 60;
    config
}

pub fn basic_config() -> Config {
    let mut config = test_config();
    config.player.profile = PlayerProfile::Basic;
    config
}

pub struct Harness {
    pub controller: Arc<Controller>,
    pub engine: Arc<RecordingEngine>,
    pub renderer: Arc<RecordingRenderer>,
}

impl Harness {
    pub fn new(config: &Config) -> Self {
        Self::with_engine(config, RecordingEngine::default())
    }

    pub fn with_engine(config: &Config, engine: RecordingEngine) -> Self {
        let engine = Arc::new(engine);
        let renderer = Arc::new(RecordingRenderer::default());
        let controller = Arc::new(Controller::new(config, engine.clone(), renderer.clone()));
        Self {
            controller,
            engine,
            renderer,
        }
    }
}
