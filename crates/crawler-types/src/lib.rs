//! `crawler-types` – shared data model for the Crawler steering stack.
//!
//! Everything that crosses a crate boundary lives here: raw camera frames,
//! per-tick hazard flags, the maneuver [`Command`], the wire messages
//! published to the outside world, bus [`Event`]s and the global
//! [`CrawlerError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod message;

pub use message::{wire_schemas, CommandMessage, GroupMessage};

// ────────────────────────────────────────────────────────────────────────────
// Frames
// ────────────────────────────────────────────────────────────────────────────

/// A raw RGB24 color frame as produced by a frame source.
///
/// Frames are immutable once produced; stages replace them rather than
/// mutate them.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ColorFrame {
    /// Wrap an interleaved RGB24 buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlerError::InvalidGeometry`] when the buffer length does
    /// not equal `width * height * 3` or either dimension is zero.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CrawlerError> {
        if width == 0 || height == 0 {
            return Err(CrawlerError::InvalidGeometry(format!(
                "frame dimensions must be non-zero (got {width}x{height})"
            )));
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CrawlerError::InvalidGeometry(format!(
                "RGB24 frame {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame filled with a single color. Unlike [`ColorFrame::new`] this
    /// accepts zero dimensions; consumers check [`ColorFrame::is_empty`].
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// Build a frame by evaluating `f(x, y) -> [r, g, b]` for every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// True when the frame has no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Interleaved RGB bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// RGB triple at `(x, y)`. Panics when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Hazards
// ────────────────────────────────────────────────────────────────────────────

/// Per-tick hazard record. All flags false means normal cruise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HazardFlags {
    /// Mean brightness fell below the darkness floor.
    pub is_dark: bool,
    /// Almost no apparent motion although the history is well filled.
    pub is_stuck: bool,
    /// Both extreme headings are obstructed.
    pub is_narrow: bool,
    /// The best available corridor is still above the wall limit.
    pub is_wall: bool,
}

impl HazardFlags {
    /// `true` when no hazard is raised.
    pub fn is_clear(&self) -> bool {
        !(self.is_dark || self.is_stuck || self.is_narrow || self.is_wall)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Commands
// ────────────────────────────────────────────────────────────────────────────

/// Discrete maneuver verbs understood by the drive base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandVerb {
    Forward,
    Backward,
    Left,
    Right,
    #[serde(rename = "turn_right_180")]
    TurnRight180,
    Stop,
    SlowForward,
}

impl CommandVerb {
    /// Wire name of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandVerb::Forward => "forward",
            CommandVerb::Backward => "backward",
            CommandVerb::Left => "left",
            CommandVerb::Right => "right",
            CommandVerb::TurnRight180 => "turn_right_180",
            CommandVerb::Stop => "stop",
            CommandVerb::SlowForward => "slow_forward",
        }
    }
}

impl std::fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One maneuver decision, produced once per tick and consumed exactly once
/// by the dispatch sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub target_id: String,
    pub verb: CommandVerb,
    /// Normalized intensity in `[0, 1]`.
    pub magnitude: f32,
    /// Heading angle in degrees, negative to the left.
    pub angle: i32,
    pub is_narrow: bool,
    pub timestamp: DateTime<Utc>,
}

impl Command {
    /// Build a command stamped with the current time. The magnitude is
    /// clamped into `[0, 1]`.
    pub fn new(target_id: impl Into<String>, verb: CommandVerb, magnitude: f32, angle: i32) -> Self {
        Self {
            target_id: target_id.into(),
            verb,
            magnitude: if magnitude.is_nan() {
                0.0
            } else {
                magnitude.clamp(0.0, 1.0)
            },
            angle,
            is_narrow: false,
            timestamp: Utc::now(),
        }
    }

    /// Builder-style setter for the narrow flag.
    pub fn narrow(mut self, is_narrow: bool) -> Self {
        self.is_narrow = is_narrow;
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// A free-text, timestamped telemetry line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogLine {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Unified event wrapper for the in-process bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"crawler-runtime::dispatch"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh event stamped now.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Command(CommandMessage),
    Group(GroupMessage),
    Log(LogLine),
    Fault { component: String, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for the steering stack.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CrawlerError {
    /// An external perception model or its transport failed this tick.
    #[error("Perception unavailable: {0}")]
    PerceptionUnavailable(String),

    /// Configuration does not fit the frame geometry.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The frame source cannot be opened or read.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The dispatch sink refused or could not deliver a message.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An inbound or outbound payload violates its schema.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
