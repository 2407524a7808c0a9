use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::render::LedEffect;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Helpers check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Label reported for a URL that is not in the preset list.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Frames larger than this are treated as garbage rather than buffered.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// A preset entry.  Never mutated once loaded; new presets are appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub label: String,
    pub url: String,
}

impl Station {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Everything a button, HTTP request or socket client can ask the player to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Next,
    Prev,
    VolumeUp,
    VolumeDown,
    ToggleMute,
    SetVolume { value: i32 },
    SetStation { url: String },
    ToggleTimer,
    SetTimerInterval { minutes: u32 },
    AddPreset { label: String, url: String },
    /// Activity signal with no other effect; lights the display back up.
    Wake,
}

/// Point-in-time copy of the player state handed to renderers and clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotonic revision counter, incremented on every state change.
    pub rev: u64,
    pub url: String,
    pub label: String,
    pub station_index: usize,
    pub volume: i32,
    pub muted: bool,
    /// `"OFF"` or `"ON (<n> min left)"`.
    pub timer_status: String,
    pub display_on: bool,
}

/// Messages sent from helpers (button bridge, display driver) to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "request")]
pub enum Request {
    Command { command: Command },
    /// Raw button press, resolved through the configured pin map.
    Button { pin: u8 },
    GetState,
}

/// Messages sent from the daemon to helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        state: Snapshot,
    },
    State {
        data: Snapshot,
    },
    Effect {
        effect: LedEffect,
    },
    Backlight {
        on: bool,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Broadcast(Broadcast),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
    /// The frame was complete but not a valid message; `consumed` bytes can be skipped.
    #[error("malformed frame: {source}")]
    Malformed {
        consumed: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl Message {
    /// Length-prefixed JSON: `u32` big-endian length followed by the body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Returns `Ok(None)` until a whole frame is buffered.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>, FrameError> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        if data.len() < 4 + len {
            return Ok(None);
        }
        match serde_json::from_slice(&data[4..4 + len]) {
            Ok(msg) => Ok(Some((msg, 4 + len))),
            Err(source) => Err(FrameError::Malformed {
                consumed: 4 + len,
                source,
            }),
        }
    }
}
