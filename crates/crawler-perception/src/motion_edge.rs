//! Cost field from motion and edge cues.
//!
//! For every candidate heading the builder looks at that heading's floor
//! trapezoid and asks two questions: how much does it move relative to the
//! reference frame, and how cluttered is it? Calm, clean regions and fresh
//! shadows are cheap; everything else is charged for both.

use crawler_types::CrawlerError;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cost_field::CostField;
use crate::edges::canny;
use crate::flow::dense_flow;
use crate::image::GrayImage;
use crate::roi::RoiSet;
use crate::terrain::{TerrainProfile, TerrainThresholds};

/// Which history frame the current frame is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowReference {
    /// The frame immediately before the current one.
    #[default]
    Previous,
    /// The oldest frame still held in the rolling history.
    Oldest,
}

fn default_angles() -> Vec<i32> {
    (-30..=30).step_by(10).collect()
}
fn default_flow_passable() -> f32 {
    0.7
}
fn default_edge_passable() -> f32 {
    0.07
}
fn default_shadow_drop() -> f32 {
    35.0
}
fn default_shadow_edge() -> f32 {
    0.04
}
fn default_flow_weight() -> f32 {
    0.4
}
fn default_edge_weight() -> f32 {
    3.5
}
fn default_passable_cost() -> f32 {
    0.15
}
fn default_canny_low() -> f32 {
    50.0
}
fn default_canny_high() -> f32 {
    150.0
}
fn default_flow_radius() -> usize {
    7
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEdgeConfig {
    /// Candidate headings in degrees, left to right.
    #[serde(default = "default_angles")]
    pub angles: Vec<i32>,
    #[serde(default = "default_flow_passable")]
    pub flow_passable: f32,
    #[serde(default = "default_edge_passable")]
    pub edge_passable: f32,
    /// Brightness drop (reference minus current) that reads as a shadow.
    #[serde(default = "default_shadow_drop")]
    pub shadow_drop: f32,
    #[serde(default = "default_shadow_edge")]
    pub shadow_edge: f32,
    #[serde(default = "default_flow_weight")]
    pub flow_weight: f32,
    #[serde(default = "default_edge_weight")]
    pub edge_weight: f32,
    /// Cost given to passable and shadowed regions.
    #[serde(default = "default_passable_cost")]
    pub passable_cost: f32,
    #[serde(default = "default_canny_low")]
    pub canny_low: f32,
    #[serde(default = "default_canny_high")]
    pub canny_high: f32,
    /// Lucas–Kanade window half-size.
    #[serde(default = "default_flow_radius")]
    pub flow_radius: usize,
    #[serde(default)]
    pub reference: FlowReference,
    #[serde(default)]
    pub terrain: TerrainThresholds,
}

impl Default for MotionEdgeConfig {
    fn default() -> Self {
        Self {
            angles: default_angles(),
            flow_passable: default_flow_passable(),
            edge_passable: default_edge_passable(),
            shadow_drop: default_shadow_drop(),
            shadow_edge: default_shadow_edge(),
            flow_weight: default_flow_weight(),
            edge_weight: default_edge_weight(),
            passable_cost: default_passable_cost(),
            canny_low: default_canny_low(),
            canny_high: default_canny_high(),
            flow_radius: default_flow_radius(),
            reference: FlowReference::default(),
            terrain: TerrainThresholds::default(),
        }
    }
}

/// Everything one motion/edge pass measures.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEdgeReading {
    /// One cost per configured heading.
    pub field: CostField,
    /// Mean flow over the whole frame, used by the stuck check.
    pub mean_flow: f32,
    pub terrain: TerrainProfile,
}

pub struct MotionEdgeBuilder {
    config: MotionEdgeConfig,
    rois: RoiSet,
}

impl MotionEdgeBuilder {
    /// Precompute heading regions for a `width × height` processing frame.
    pub fn new(config: MotionEdgeConfig, width: usize, height: usize) -> Result<Self, CrawlerError> {
        let rois = RoiSet::new(&config.angles, width, height)?;
        Ok(Self { config, rois })
    }

    pub fn config(&self) -> &MotionEdgeConfig {
        &self.config
    }

    /// Build the heading cost field from a reference/current pair.
    ///
    /// Pure function of its inputs: the same pair always yields the same
    /// reading.
    pub fn build(&self, reference: &GrayImage, current: &GrayImage) -> Result<MotionEdgeReading, CrawlerError> {
        if current.width() != self.rois.width() || current.height() != self.rois.height() {
            return Err(CrawlerError::InvalidGeometry(format!(
                "builder expects {}x{}, got {}x{}",
                self.rois.width(),
                self.rois.height(),
                current.width(),
                current.height()
            )));
        }
        let cfg = &self.config;
        let flow = dense_flow(reference, current, cfg.flow_radius)?;
        let edges = canny(current, cfg.canny_low, cfg.canny_high);

        let mut costs = Vec::with_capacity(cfg.angles.len());
        for region in self.rois.regions() {
            let Some(f_mean) = region.mean_of(|x, y| flow.magnitude_at(x, y)) else {
                costs.push(1.0);
                continue;
            };
            let e_density = region
                .mean_of(|x, y| if edges.is_edge(x, y) { 1.0 } else { 0.0 })
                .unwrap_or(0.0);
            let before = region.mean_of(|x, y| reference.get(x, y) as f32).unwrap_or(0.0);
            let after = region.mean_of(|x, y| current.get(x, y) as f32).unwrap_or(0.0);

            let is_shadow = before - after > cfg.shadow_drop && e_density < cfg.shadow_edge;
            let is_passable = f_mean < cfg.flow_passable && e_density < cfg.edge_passable;
            let cost = if is_shadow || is_passable {
                cfg.passable_cost
            } else {
                (f_mean * cfg.flow_weight + e_density * cfg.edge_weight).min(1.0)
            };
            trace!(angle = region.angle, f_mean, e_density, cost, "heading cost");
            costs.push((cost * 1000.0).round() / 1000.0);
        }

        Ok(MotionEdgeReading {
            field: CostField::headings(cfg.angles.clone(), costs)?,
            mean_flow: flow.mean(),
            terrain: TerrainProfile::classify(&flow, &edges, &cfg.terrain),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 160;
    const H: usize = 120;

    fn floor() -> GrayImage {
        GrayImage::from_fn(W, H, |_, y| (90 + y / 4) as u8)
    }

    /// Floor with a high-contrast checker block over columns `[x0, x1)`.
    fn cluttered(x0: usize, x1: usize) -> GrayImage {
        GrayImage::from_fn(W, H, |x, y| {
            if (x0..x1).contains(&x) && y >= 36 {
                if (x / 4 + y / 4) % 2 == 0 { 20 } else { 235 }
            } else {
                (90 + y / 4) as u8
            }
        })
    }

    fn builder() -> Result<MotionEdgeBuilder, CrawlerError> {
        MotionEdgeBuilder::new(MotionEdgeConfig::default(), W, H)
    }

    #[test]
    fn calm_floor_is_passable_everywhere() -> Result<(), CrawlerError> {
        let reading = builder()?.build(&floor(), &floor())?;
        assert_eq!(reading.field.len(), 7);
        assert!(reading.field.costs().iter().all(|&c| c == 0.15));
        assert_eq!(reading.mean_flow, 0.0);
        Ok(())
    }

    #[test]
    fn clutter_raises_cost_on_its_side() -> Result<(), CrawlerError> {
        let img = cluttered(0, 50);
        let reading = builder()?.build(&img, &img)?;
        let costs = reading.field.costs();
        assert!(costs[0] > 0.5, "{costs:?}");
        assert_eq!(costs[6], 0.15);
        Ok(())
    }

    #[test]
    fn fresh_shadow_is_cheap() -> Result<(), CrawlerError> {
        let bright = GrayImage::from_fn(W, H, |_, _| 200);
        let dark = GrayImage::from_fn(W, H, |_, _| 120);
        let reading = builder()?.build(&bright, &dark)?;
        assert!(reading.field.costs().iter().all(|&c| c == 0.15));
        Ok(())
    }

    #[test]
    fn building_is_idempotent() -> Result<(), CrawlerError> {
        let b = builder()?;
        let (a, c) = (cluttered(20, 70), cluttered(24, 74));
        assert_eq!(b.build(&a, &c)?, b.build(&a, &c)?);
        Ok(())
    }

    #[test]
    fn wrong_frame_size_is_rejected() -> Result<(), CrawlerError> {
        let small = GrayImage::new(80, 60);
        assert!(matches!(
            builder()?.build(&small, &small),
            Err(CrawlerError::InvalidGeometry(_))
        ));
        Ok(())
    }

    #[test]
    fn config_defaults_fill_missing_fields() -> Result<(), Box<dyn std::error::Error>> {
        let cfg: MotionEdgeConfig = serde_json::from_str(r#"{"angles": [-15, 0, 15], "reference": "oldest"}"#)?;
        assert_eq!(cfg.angles, vec![-15, 0, 15]);
        assert_eq!(cfg.reference, FlowReference::Oldest);
        assert_eq!(cfg.edge_weight, 3.5);
        Ok(())
    }
}
