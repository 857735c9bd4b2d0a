//! Coarse obstacle-height and slope reading from flow zones.
//!
//! The frame is cut into three horizontal zones. Strong apparent motion in
//! a zone means something close to the camera occupies it: the higher the
//! zone, the taller the obstacle. A fast-moving but edge-free near zone is
//! read as a ramp the robot can climb.

use serde::{Deserialize, Serialize};

use crate::edges::EdgeMap;
use crate::flow::FlowField;

/// Zone boundaries as fractions of frame height.
const HIGH_ZONE_END: f32 = 0.3;
const LOW_ZONE_START: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleHeight {
    Low,
    Mid,
    High,
}

fn default_zone_flow() -> f32 {
    1.5
}
fn default_slope_edge() -> f32 {
    0.08
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainThresholds {
    /// Mean zone flow above which the zone counts as occupied.
    #[serde(default = "default_zone_flow")]
    pub flow: f32,
    /// Near-zone edge density below which fast flow reads as a slope.
    #[serde(default = "default_slope_edge")]
    pub edge: f32,
}

impl Default for TerrainThresholds {
    fn default() -> Self {
        Self {
            flow: default_zone_flow(),
            edge: default_slope_edge(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainProfile {
    pub height: ObstacleHeight,
    pub slope: bool,
    /// Mean flow in the near zone.
    pub near_flow: f32,
}

impl TerrainProfile {
    /// Classify from a flow field and the edge map of the current frame.
    pub fn classify(flow: &FlowField, edges: &EdgeMap, thresholds: &TerrainThresholds) -> Self {
        let h = flow.height();
        let high_end = (h as f32 * HIGH_ZONE_END) as usize;
        let low_start = (h as f32 * LOW_ZONE_START) as usize;

        let f_low = flow.band_mean(low_start, h);
        let f_mid = flow.band_mean(high_end, low_start);
        let f_high = flow.band_mean(0, high_end);
        let e_low = edges.band_density(low_start, edges.height());

        let height = if f_high > thresholds.flow {
            ObstacleHeight::High
        } else if f_mid > thresholds.flow {
            ObstacleHeight::Mid
        } else {
            ObstacleHeight::Low
        };

        Self {
            height,
            slope: f_low > thresholds.flow && e_low < thresholds.edge,
            near_flow: f_low,
        }
    }
}
