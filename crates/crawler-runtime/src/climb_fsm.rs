//! [`ClimbFsm`] – three-state cruise/climb/avoid strategy.
//!
//! A simpler alternative to the hazard engine. It only reads the terrain
//! profile and never applies hazard overrides; darkness is still handled
//! upstream by the processor, which stops before any strategy runs.
//!
//! ```text
//!            LOW                 attempts >= limit
//!   CRUISE ───────► CLIMB ─────────────────────────► AVOID
//!     ▲  │ MID: left   │ slope: forward                │
//!     │  │ HIGH: right │ else: attempts += 1, forward  │
//!     └──┴─────────────┴───────────────────────────────┘
//!                      right, attempts = 0
//! ```

use std::time::Instant;

use crawler_perception::ObstacleHeight;
use crawler_types::CommandVerb;

use crate::engine::{Decision, DecisionStrategy, MotionState, Observation, Phase};

pub struct ClimbFsm {
    climb_limit: u32,
}

impl ClimbFsm {
    pub fn new(climb_limit: u32) -> Self {
        Self { climb_limit }
    }
}

impl DecisionStrategy for ClimbFsm {
    fn name(&self) -> &'static str {
        "climb"
    }

    fn decide(&self, state: &mut MotionState, obs: &Observation, _now: Instant) -> Decision {
        let go = |verb| Decision::new(verb, 1.0, 0);
        let Some(terrain) = obs.terrain else {
            return go(CommandVerb::Forward);
        };

        match state.phase {
            Phase::Cruise => match terrain.height {
                ObstacleHeight::Low => {
                    state.phase = Phase::Climb;
                    state.climb_attempts += 1;
                    go(CommandVerb::Forward)
                }
                ObstacleHeight::Mid => go(CommandVerb::Left),
                ObstacleHeight::High => go(CommandVerb::Right),
            },
            Phase::Climb => {
                if terrain.slope {
                    go(CommandVerb::Forward)
                } else if state.climb_attempts >= self.climb_limit {
                    state.phase = Phase::Avoid;
                    go(CommandVerb::Left).with_note("AVOID: climb limit reached")
                } else {
                    state.climb_attempts += 1;
                    go(CommandVerb::Forward)
                }
            }
            Phase::Avoid => {
                state.phase = Phase::Cruise;
                state.climb_attempts = 0;
                go(CommandVerb::Right)
            }
        }
    }
}
