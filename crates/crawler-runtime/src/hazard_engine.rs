//! [`HazardEngine`] – hazard overrides ahead of heading steering.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//!
//! | Order | Condition | Command |
//! |---|---|---|
//! | 1 | dark | `stop` 1.0 |
//! | 2 | wall, cooldown strictly exceeded | `turn_right_180` 1.0, cooldown restarts |
//! | 2 | wall, cooling down | `backward` at `wall_backward` |
//! | 3 | stuck | `left` at `escape_turn` |
//! | 4 | narrow | `slow_forward` at `narrow_speed` |
//! | 5 | otherwise | `left` / `forward` / `right` at `1 − cost` |

use std::time::Instant;

use crawler_types::CommandVerb;
use tracing::debug;

use crate::config::DecisionConfig;
use crate::engine::{Decision, DecisionStrategy, MotionState, Observation, round2};

pub struct HazardEngine {
    config: DecisionConfig,
}

impl HazardEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }
}

impl DecisionStrategy for HazardEngine {
    fn name(&self) -> &'static str {
        "hazard"
    }

    fn decide(&self, state: &mut MotionState, obs: &Observation, now: Instant) -> Decision {
        let cfg = &self.config;
        let hazards = &obs.hazards;

        if hazards.is_dark {
            return Decision::stop().with_note("CRITICAL: NO LIGHT");
        }
        let Some(corridor) = obs.corridor else {
            return Decision::stop().with_note("no corridor this tick");
        };
        let angle = corridor.angle;

        if hazards.is_wall {
            let ready = state
                .last_maneuver
                .is_none_or(|t| now.saturating_duration_since(t) > cfg.cooldown());
            if ready {
                state.last_maneuver = Some(now);
                debug!(cost = corridor.cost, "wall ahead, turning around");
                return Decision::new(CommandVerb::TurnRight180, 1.0, angle)
                    .with_note("WALL DETECTED: 180 degree maneuver");
            }
            return Decision::new(CommandVerb::Backward, cfg.wall_backward, angle);
        }
        if hazards.is_stuck {
            return Decision::new(CommandVerb::Left, cfg.escape_turn, angle).with_note("STUCK: escape turn");
        }
        if hazards.is_narrow {
            return Decision::new(CommandVerb::SlowForward, cfg.narrow_speed, angle)
                .narrow(true)
                .with_note("NARROW PATH: slowing down");
        }

        let verb = if corridor.offset < -cfg.dead_band {
            CommandVerb::Left
        } else if corridor.offset > cfg.dead_band {
            CommandVerb::Right
        } else {
            CommandVerb::Forward
        };
        Decision::new(verb, round2(1.0 - corridor.cost), angle)
    }
}
