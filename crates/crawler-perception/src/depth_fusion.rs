//! Cost line from detector and depth outputs.
//!
//! The depth map is read over a horizontal band in the lower-middle of the
//! frame, where near-ground obstacles show up. Each column keeps its
//! nearest-obstacle value, then every confident detection whose box reaches
//! into the near field adds a flat penalty across the columns it spans.

use std::time::Duration;

use crawler_types::{ColorFrame, CrawlerError};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::backend::{DepthMap, Detection, PerceptionBackend};
use crate::cost_field::CostField;

/// Which end of the normalized depth scale means "close".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthConvention {
    /// 1 = near (inverse-depth models). Columns reduce with `max`.
    #[default]
    NearIsHigh,
    /// 0 = near (metric-style depth). Columns reduce with `min`, then the
    /// value is flipped so cost still grows with proximity.
    NearIsLow,
}

fn default_band_top() -> f32 {
    0.5
}
fn default_band_bottom() -> f32 {
    0.9
}
fn default_min_confidence() -> f32 {
    0.4
}
fn default_near_field() -> f32 {
    0.4
}
fn default_penalty() -> f32 {
    0.5
}
fn default_inference_timeout_ms() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthFusionConfig {
    /// Scan band `[band_top, band_bottom)` as fractions of frame height.
    #[serde(default = "default_band_top")]
    pub band_top: f32,
    #[serde(default = "default_band_bottom")]
    pub band_bottom: f32,
    /// Detections at or below this confidence are ignored.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// A detection counts when its lower edge is below this fraction of
    /// the frame height.
    #[serde(default = "default_near_field")]
    pub near_field: f32,
    #[serde(default = "default_penalty")]
    pub penalty: f32,
    #[serde(default)]
    pub convention: DepthConvention,
    /// Min-max rescale the cost line before penalties are added.
    #[serde(default)]
    pub normalize_cost_line: bool,
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
}

impl Default for DepthFusionConfig {
    fn default() -> Self {
        Self {
            band_top: default_band_top(),
            band_bottom: default_band_bottom(),
            min_confidence: default_min_confidence(),
            near_field: default_near_field(),
            penalty: default_penalty(),
            convention: DepthConvention::default(),
            normalize_cost_line: false,
            inference_timeout_ms: default_inference_timeout_ms(),
        }
    }
}

impl DepthFusionConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

pub struct DepthFusionBuilder {
    config: DepthFusionConfig,
    width: usize,
    height: usize,
}

impl DepthFusionBuilder {
    /// Builder producing a `width`-column cost line for a `width × height`
    /// processing frame.
    pub fn new(config: DepthFusionConfig, width: usize, height: usize) -> Result<Self, CrawlerError> {
        if width == 0 || height == 0 {
            return Err(CrawlerError::InvalidGeometry(format!(
                "depth fusion frame must be non-empty, got {width}x{height}"
            )));
        }
        if !(0.0..1.0).contains(&config.band_top) || config.band_bottom <= config.band_top || config.band_bottom > 1.0 {
            return Err(CrawlerError::InvalidGeometry(format!(
                "scan band [{}, {}) is not inside the frame",
                config.band_top, config.band_bottom
            )));
        }
        Ok(Self {
            config,
            width,
            height,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn config(&self) -> &DepthFusionConfig {
        &self.config
    }

    /// Query both collaborators concurrently and fuse their outputs.
    ///
    /// # Errors
    ///
    /// [`CrawlerError::PerceptionUnavailable`] when depth estimation fails or
    /// exceeds the inference timeout. A failing detector alone only drops
    /// the penalties for this tick.
    pub async fn build(&self, frame: &ColorFrame, backend: &dyn PerceptionBackend) -> Result<CostField, CrawlerError> {
        let limit = self.config.inference_timeout();
        let (detections, depth) = tokio::join!(
            timeout(limit, backend.detect(frame)),
            timeout(limit, backend.estimate_depth(frame)),
        );

        let depth = match depth {
            Ok(result) => result?,
            Err(_) => {
                return Err(CrawlerError::PerceptionUnavailable(format!(
                    "{}: depth estimate exceeded {limit:?}",
                    backend.name()
                )));
            }
        };
        let detections = match detections {
            Ok(Ok(d)) => d,
            Ok(Err(e)) => {
                warn!(backend = backend.name(), error = %e, "detector failed, no penalties this tick");
                Vec::new()
            }
            Err(_) => {
                warn!(backend = backend.name(), "detector timed out, no penalties this tick");
                Vec::new()
            }
        };

        self.fuse(&depth, &detections, (frame.width() as f32, frame.height() as f32))
    }

    /// Fuse already-computed model outputs. Detection boxes are given in
    /// `source` frame pixels and rescaled to the processing frame.
    pub fn fuse(&self, depth: &DepthMap, detections: &[Detection], source: (f32, f32)) -> Result<CostField, CrawlerError> {
        let cfg = &self.config;
        let depth = depth.normalized();
        let (w, h) = (self.width, self.height);
        let (dw, dh) = (depth.width(), depth.height());

        let y0 = (h as f32 * cfg.band_top) as usize;
        let y1 = ((h as f32 * cfg.band_bottom) as usize).clamp(y0 + 1, h);

        let mut line = Vec::with_capacity(w);
        for x in 0..w {
            let dx = (x * dw / w).min(dw - 1);
            let column = (y0..y1).map(|y| depth.get(dx, (y * dh / h).min(dh - 1)));
            let v = match cfg.convention {
                DepthConvention::NearIsHigh => column.fold(f32::NEG_INFINITY, f32::max),
                DepthConvention::NearIsLow => 1.0 - column.fold(f32::INFINITY, f32::min),
            };
            line.push(v);
        }

        if cfg.normalize_cost_line {
            let (lo, hi) = line
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            let span = (hi - lo).max(1e-5);
            line.iter_mut().for_each(|v| *v = (*v - lo) / span);
        }

        let (sx, sy) = (w as f32 / source.0.max(1.0), h as f32 / source.1.max(1.0));
        let mut penalized = 0;
        for det in detections.iter().filter(|d| d.confidence > cfg.min_confidence) {
            if det.bbox.bottom() * sy <= h as f32 * cfg.near_field {
                continue;
            }
            let x0 = (det.bbox.x1 * sx).max(0.0) as usize;
            let x1 = ((det.bbox.x2 * sx).max(0.0) as usize).min(w);
            for v in line.iter_mut().take(x1).skip(x0) {
                *v += cfg.penalty;
            }
            penalized += 1;
        }
        debug!(columns = w, penalized, "fused cost line");

        CostField::columns(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BoundingBox, StaticBackend, UnavailableBackend};
    use async_trait::async_trait;

    const W: usize = 64;
    const H: usize = 48;

    /// Depth rising left to right, with a near blob in columns 40..48
    /// inside the scan band.
    fn depth(convention: DepthConvention) -> Result<DepthMap, CrawlerError> {
        let mut values = Vec::with_capacity(W * H);
        for y in 0..H {
            for x in 0..W {
                let near = (40..48).contains(&x) && (30..40).contains(&y);
                let v = match (convention, near) {
                    (DepthConvention::NearIsHigh, true) => 1.0,
                    (DepthConvention::NearIsHigh, false) => 0.2,
                    (DepthConvention::NearIsLow, true) => 0.0,
                    (DepthConvention::NearIsLow, false) => 0.8,
                };
                values.push(v);
            }
        }
        DepthMap::new(W, H, values)
    }

    fn builder(config: DepthFusionConfig) -> Result<DepthFusionBuilder, CrawlerError> {
        DepthFusionBuilder::new(config, W, H)
    }

    #[test]
    fn near_is_high_reduces_with_max() -> Result<(), CrawlerError> {
        let b = builder(DepthFusionConfig::default())?;
        let field = b.fuse(&depth(DepthConvention::NearIsHigh)?, &[], (W as f32, H as f32))?;
        assert_eq!(field.len(), W);
        assert_eq!(field.costs()[44], 1.0);
        assert_eq!(field.costs()[10], 0.0);
        Ok(())
    }

    #[test]
    fn both_conventions_agree_on_the_obstacle() -> Result<(), CrawlerError> {
        let high = builder(DepthFusionConfig::default())?.fuse(
            &depth(DepthConvention::NearIsHigh)?,
            &[],
            (W as f32, H as f32),
        )?;
        let low = builder(DepthFusionConfig {
            convention: DepthConvention::NearIsLow,
            ..Default::default()
        })?
        .fuse(&depth(DepthConvention::NearIsLow)?, &[], (W as f32, H as f32))?;
        assert_eq!(high.costs(), low.costs());
        Ok(())
    }

    #[test]
    fn near_confident_detection_adds_penalty() -> Result<(), CrawlerError> {
        let flat = DepthMap::new(W, H, vec![0.0; W * H])?;
        let dets = [
            // Near and confident: columns 8..16 penalized.
            Detection {
                bbox: BoundingBox { x1: 8.0, y1: 20.0, x2: 16.0, y2: 40.0 },
                confidence: 0.9,
                class_id: 0,
            },
            // Too far up the frame.
            Detection {
                bbox: BoundingBox { x1: 20.0, y1: 0.0, x2: 28.0, y2: 10.0 },
                confidence: 0.9,
                class_id: 0,
            },
            // Not confident enough.
            Detection {
                bbox: BoundingBox { x1: 30.0, y1: 20.0, x2: 38.0, y2: 40.0 },
                confidence: 0.4,
                class_id: 0,
            },
        ];
        let field = builder(DepthFusionConfig::default())?.fuse(&flat, &dets, (W as f32, H as f32))?;
        let c = field.costs();
        assert_eq!(c[7], 0.0);
        assert_eq!(c[8], 0.5);
        assert_eq!(c[15], 0.5);
        assert_eq!(c[16], 0.0);
        assert_eq!(c[24], 0.0);
        assert_eq!(c[34], 0.0);
        Ok(())
    }

    #[test]
    fn detections_are_rescaled_from_source_frame() -> Result<(), CrawlerError> {
        let flat = DepthMap::new(W, H, vec![0.0; W * H])?;
        let det = Detection {
            bbox: BoundingBox { x1: 16.0, y1: 40.0, x2: 32.0, y2: 80.0 },
            confidence: 0.8,
            class_id: 2,
        };
        // Source frame twice the processing size.
        let field = builder(DepthFusionConfig::default())?.fuse(&flat, &[det], (128.0, 96.0))?;
        assert_eq!(field.costs()[8], 0.5);
        assert_eq!(field.costs()[16], 0.0);
        Ok(())
    }

    #[test]
    fn penalties_stay_clamped() -> Result<(), CrawlerError> {
        let b = builder(DepthFusionConfig::default())?;
        let det = Detection {
            bbox: BoundingBox { x1: 40.0, y1: 20.0, x2: 48.0, y2: 44.0 },
            confidence: 0.95,
            class_id: 1,
        };
        let field = b.fuse(&depth(DepthConvention::NearIsHigh)?, &[det], (W as f32, H as f32))?;
        assert!(field.costs().iter().all(|&c| (0.0..=1.0).contains(&c)));
        Ok(())
    }

    #[test]
    fn rejects_bad_band() {
        let cfg = DepthFusionConfig {
            band_top: 0.9,
            band_bottom: 0.5,
            ..Default::default()
        };
        assert!(builder(cfg).is_err());
    }

    #[tokio::test]
    async fn depth_failure_is_perception_unavailable() -> Result<(), CrawlerError> {
        let b = builder(DepthFusionConfig::default())?;
        let frame = ColorFrame::solid(W as u32, H as u32, [100, 100, 100]);
        let err = b.build(&frame, &UnavailableBackend).await.unwrap_err();
        assert!(matches!(err, CrawlerError::PerceptionUnavailable(_)));
        Ok(())
    }

    #[tokio::test]
    async fn static_backend_builds_a_full_line() -> Result<(), CrawlerError> {
        let b = builder(DepthFusionConfig::default())?;
        let frame = ColorFrame::solid(W as u32, H as u32, [100, 100, 100]);
        let backend = StaticBackend::new(depth(DepthConvention::NearIsHigh)?);
        let field = b.build(&frame, &backend).await?;
        assert_eq!(field.len(), W);
        assert_eq!(field.costs()[44], 1.0);
        Ok(())
    }

    struct SlowDepth;

    #[async_trait]
    impl PerceptionBackend for SlowDepth {
        fn name(&self) -> &str {
            "slow"
        }

        async fn detect(&self, _frame: &ColorFrame) -> Result<Vec<Detection>, CrawlerError> {
            Ok(Vec::new())
        }

        async fn estimate_depth(&self, _frame: &ColorFrame) -> Result<DepthMap, CrawlerError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            DepthMap::new(1, 1, vec![0.0])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_depth_model_times_out() -> Result<(), CrawlerError> {
        let b = builder(DepthFusionConfig::default())?;
        let frame = ColorFrame::solid(W as u32, H as u32, [100, 100, 100]);
        let err = b.build(&frame, &SlowDepth).await.unwrap_err();
        assert!(matches!(err, CrawlerError::PerceptionUnavailable(_)));
        Ok(())
    }
}
