//! Per-tick hazard derivation.

use crawler_types::HazardFlags;
use serde::{Deserialize, Serialize};

use crate::cost_field::CostField;
use crate::image::GrayImage;

fn default_dark_floor() -> f32 {
    10.0
}
fn default_stuck_flow() -> f32 {
    0.08
}
fn default_stuck_history() -> usize {
    25
}
fn default_narrow() -> f32 {
    0.65
}
fn default_wall_limit() -> f32 {
    0.92
}

/// Thresholds for the four hazard flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardThresholds {
    /// Mean gray level below which the scene counts as dark.
    #[serde(default = "default_dark_floor")]
    pub dark_floor: f32,
    /// Mean flow magnitude below which the robot may be stuck.
    #[serde(default = "default_stuck_flow")]
    pub stuck_flow: f32,
    /// The frame history must hold more than this many frames before
    /// low flow counts as stuck.
    #[serde(default = "default_stuck_history")]
    pub stuck_history: usize,
    /// Both extreme slots above this cost means a narrow passage.
    #[serde(default = "default_narrow")]
    pub narrow: f32,
    /// Best corridor cost above this is a wall.
    #[serde(default = "default_wall_limit")]
    pub wall_limit: f32,
}

impl Default for HazardThresholds {
    fn default() -> Self {
        Self {
            dark_floor: default_dark_floor(),
            stuck_flow: default_stuck_flow(),
            stuck_history: default_stuck_history(),
            narrow: default_narrow(),
            wall_limit: default_wall_limit(),
        }
    }
}

/// Evidence gathered during one tick.
#[derive(Debug, Clone, Copy)]
pub struct HazardEvidence<'a> {
    pub field: &'a CostField,
    /// Cost of the winning corridor or heading.
    pub best_cost: f32,
    /// `None` when the builder does not measure motion.
    pub mean_flow: Option<f32>,
    pub history_len: usize,
    /// Border columns averaged for the narrow check on a cost line;
    /// usually the corridor width. Ignored for heading fields.
    pub edge_span: usize,
}

impl HazardThresholds {
    /// Checked on its own, before any flow or model work.
    pub fn is_dark(&self, gray: &GrayImage) -> bool {
        gray.mean() < self.dark_floor
    }

    /// Derive the remaining flags. `is_dark` is always false here since a
    /// dark frame never reaches this point.
    pub fn derive(&self, evidence: &HazardEvidence<'_>) -> HazardFlags {
        let is_stuck = evidence
            .mean_flow
            .is_some_and(|f| f < self.stuck_flow && evidence.history_len > self.stuck_history);
        let is_narrow = evidence
            .field
            .extremes(evidence.edge_span)
            .is_some_and(|(l, r)| l > self.narrow && r > self.narrow);
        HazardFlags {
            is_dark: false,
            is_stuck,
            is_narrow,
            is_wall: evidence.best_cost > self.wall_limit,
        }
    }
}
