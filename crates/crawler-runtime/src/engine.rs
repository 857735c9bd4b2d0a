//! Decision engine contract and the state it owns.
//!
//! A [`DecisionStrategy`] turns one tick's [`Observation`] into one
//! [`Decision`]. Everything that must survive between ticks (cooldown
//! timers, the climb counter, the FSM phase, the frame history) lives in a
//! [`MotionState`] that the processing task owns and lends to the strategy
//! for the duration of a single call.

use std::collections::VecDeque;
use std::time::Instant;

use crawler_perception::{Corridor, GrayImage, TerrainProfile};
use crawler_types::{CommandVerb, HazardFlags};

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Phase of the three-state climb FSM. The hazard engine leaves it alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Cruise,
    Climb,
    Avoid,
}

/// Fixed-length rolling history of recent grayscale frames.
#[derive(Debug, Clone)]
pub struct FrameHistory {
    capacity: usize,
    frames: VecDeque<GrayImage>,
}

impl FrameHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frames: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a frame, evicting the oldest once full.
    pub fn push(&mut self, frame: GrayImage) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn oldest(&self) -> Option<&GrayImage> {
        self.frames.front()
    }

    pub fn latest(&self) -> Option<&GrayImage> {
        self.frames.back()
    }

    /// The frame pushed just before the latest one.
    pub fn previous(&self) -> Option<&GrayImage> {
        self.frames.len().checked_sub(2).and_then(|i| self.frames.get(i))
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Robot motion state, persistent across ticks.
#[derive(Debug, Clone)]
pub struct MotionState {
    pub phase: Phase,
    pub climb_attempts: u32,
    /// When the last 180° maneuver was issued.
    pub last_maneuver: Option<Instant>,
    pub history: FrameHistory,
}

impl MotionState {
    pub fn new(history_len: usize) -> Self {
        Self {
            phase: Phase::Cruise,
            climb_attempts: 0,
            last_maneuver: None,
            history: FrameHistory::new(history_len),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tick input / output
// ─────────────────────────────────────────────────────────────────────────────

/// What the perception stages saw this tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observation {
    pub hazards: HazardFlags,
    /// Winning corridor; `None` on ticks without a cost field.
    pub corridor: Option<Corridor>,
    pub terrain: Option<TerrainProfile>,
}

/// A maneuver decision, before it is stamped into a [`crawler_types::Command`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub verb: CommandVerb,
    pub magnitude: f32,
    pub angle: i32,
    pub is_narrow: bool,
    /// Telemetry line describing why an override fired.
    pub note: Option<String>,
}

impl Decision {
    pub fn new(verb: CommandVerb, magnitude: f32, angle: i32) -> Self {
        Self {
            verb,
            magnitude,
            angle,
            is_narrow: false,
            note: None,
        }
    }

    /// Full-magnitude stop.
    pub fn stop() -> Self {
        Self::new(CommandVerb::Stop, 1.0, 0)
    }

    pub fn narrow(mut self, is_narrow: bool) -> Self {
        self.is_narrow = is_narrow;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// One decision policy. Implementations are pure apart from the state they
/// are handed.
pub trait DecisionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn decide(&self, state: &mut MotionState, observation: &Observation, now: Instant) -> Decision;
}

/// Round to two decimals, the precision commands are published with.
pub(crate) fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}
