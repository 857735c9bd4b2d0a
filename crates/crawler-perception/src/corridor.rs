//! Corridor search over a cost field.
//!
//! Per-column lines are scanned with a sliding window the width of the
//! robot; the objective is the window's mean cost plus a penalty for
//! drifting away from the frame center. Heading fields have no window to
//! slide, so the search reduces to an argmin. Both keep the first minimum
//! in left-to-right order.

use crawler_types::CrawlerError;
use serde::{Deserialize, Serialize};

use crate::cost_field::{CostField, FieldLayout};

/// Steering angle, in degrees, reported for a window at the frame edge.
const EDGE_ANGLE: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorridorParams {
    /// Robot width in columns.
    pub width: usize,
    /// Scan step in columns. Values above 1 trade accuracy for speed.
    pub stride: usize,
    /// Weight of the normalized distance from the frame center.
    pub bias_weight: f32,
}

impl CorridorParams {
    /// A quarter of the frame wide, stride 10, bias weight 0.2.
    pub fn for_frame(frame_width: usize) -> Self {
        Self {
            width: frame_width / 4,
            stride: 10,
            bias_weight: 0.2,
        }
    }
}

/// Winner of a sliding-window search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorridorWindow {
    /// First column of `[start, start + width)`.
    pub start: usize,
    pub center: usize,
    pub mean_cost: f32,
    /// Mean cost plus center bias; the minimized objective.
    pub total_cost: f32,
}

/// Find the window minimizing `mean + bias_weight * |center - n/2| / n`.
///
/// # Errors
///
/// [`CrawlerError::InvalidGeometry`] when the window is empty, wider than
/// the line, or the stride is zero.
pub fn search_corridor(costs: &[f32], params: &CorridorParams) -> Result<CorridorWindow, CrawlerError> {
    let n = costs.len();
    let w = params.width;
    if w == 0 || params.stride == 0 {
        return Err(CrawlerError::InvalidGeometry(format!(
            "corridor width {w} and stride {} must be positive",
            params.stride
        )));
    }
    if n < w {
        return Err(CrawlerError::InvalidGeometry(format!(
            "corridor width {w} exceeds frame width {n}"
        )));
    }

    let frame_center = n / 2;
    let mut best: Option<CorridorWindow> = None;
    for start in (0..=n - w).step_by(params.stride) {
        let mean_cost = costs[start..start + w].iter().sum::<f32>() / w as f32;
        let center = start + w / 2;
        let bias = center.abs_diff(frame_center) as f32 / n as f32;
        let total_cost = mean_cost + params.bias_weight * bias;
        if best.is_none_or(|b| total_cost < b.total_cost) {
            best = Some(CorridorWindow {
                start,
                center,
                mean_cost,
                total_cost,
            });
        }
    }
    best.ok_or_else(|| CrawlerError::InvalidGeometry("no corridor candidates".to_string()))
}

/// Index of the first minimum.
pub fn argmin_heading(costs: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &c) in costs.iter().enumerate() {
        if best.is_none_or(|(_, b)| c < b) {
            best = Some((i, c));
        }
    }
    best.map(|(i, _)| i)
}

/// Where to steer, independent of the field layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    /// Heading in degrees, negative to the left.
    pub angle: i32,
    /// Cost of the winning heading or window objective.
    pub cost: f32,
    /// Lateral offset of the corridor from the frame center in
    /// `[-0.5, 0.5]`, negative to the left.
    pub offset: f32,
}

impl Corridor {
    /// Pick the best corridor in `field`.
    pub fn select(field: &CostField, params: &CorridorParams) -> Result<Self, CrawlerError> {
        match field.layout() {
            FieldLayout::Columns => {
                let n = field.len();
                let window = search_corridor(field.costs(), params)?;
                let offset = (window.center as f32 - (n / 2) as f32) / n as f32;
                Ok(Self {
                    angle: (offset * 2.0 * EDGE_ANGLE).round() as i32,
                    cost: window.total_cost,
                    offset,
                })
            }
            FieldLayout::Headings(angles) => {
                let i = argmin_heading(field.costs())
                    .ok_or_else(|| CrawlerError::InvalidGeometry("empty heading field".to_string()))?;
                let span = angles.iter().map(|a| a.unsigned_abs()).max().unwrap_or(0).max(1) as f32;
                Ok(Self {
                    angle: angles[i],
                    cost: field.costs()[i],
                    offset: angles[i] as f32 / (2.0 * span),
                })
            }
        }
    }
}
