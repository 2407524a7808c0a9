//! Playback and sleep-timer controller for a Raspberry Pi internet radio.
//!
//! The daemon crate wires this up to mpv, an HTTP control surface and a TCP
//! socket used by the button/display helper.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod platform;
pub mod protocol;
pub mod render;
pub mod state;
