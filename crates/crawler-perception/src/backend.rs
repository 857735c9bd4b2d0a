//! Contract with the external detector and depth estimator.
//!
//! The models themselves live outside this crate. A [`PerceptionBackend`]
//! is anything that can turn a frame into detections and a depth map, be it
//! an inference server, an accelerator binding or a canned test double.

use async_trait::async_trait;
use crawler_types::{ColorFrame, CrawlerError};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Box from a center point and size, as most detectors report them.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    /// Lower edge; larger means closer to the robot.
    pub fn bottom(&self) -> f32 {
        self.y2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: u32,
}

/// Dense relative depth, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl DepthMap {
    /// # Errors
    ///
    /// [`CrawlerError::PerceptionUnavailable`] when the buffer does not match
    /// the declared size or holds non-finite values. A malformed model
    /// output is treated like a missing one.
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Result<Self, CrawlerError> {
        if width == 0 || height == 0 || values.len() != width * height {
            return Err(CrawlerError::PerceptionUnavailable(format!(
                "depth map {width}x{height} with {} values",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CrawlerError::PerceptionUnavailable(
                "depth map contains non-finite values".to_string(),
            ));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.width + x]
    }

    /// Min-max rescale into `[0, 1]`. A constant map becomes all zeros.
    pub fn normalized(&self) -> Self {
        let (lo, hi) = self
            .values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let span = hi - lo;
        let values = if span > f32::EPSILON {
            self.values.iter().map(|v| (v - lo) / span).collect()
        } else {
            vec![0.0; self.values.len()]
        };
        Self {
            width: self.width,
            height: self.height,
            values,
        }
    }
}

/// The perception collaborator. Both calls may fail with
/// [`CrawlerError::PerceptionUnavailable`].
#[async_trait]
pub trait PerceptionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, frame: &ColorFrame) -> Result<Vec<Detection>, CrawlerError>;

    /// Relative depth at the frame's resolution or any other; callers
    /// resample.
    async fn estimate_depth(&self, frame: &ColorFrame) -> Result<DepthMap, CrawlerError>;
}

/// Returns the same detections and depth map for every frame.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    detections: Vec<Detection>,
    depth: DepthMap,
}

impl StaticBackend {
    pub fn new(depth: DepthMap) -> Self {
        Self {
            detections: Vec::new(),
            depth,
        }
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }
}

#[async_trait]
impl PerceptionBackend for StaticBackend {
    fn name(&self) -> &str {
        "static"
    }

    async fn detect(&self, _frame: &ColorFrame) -> Result<Vec<Detection>, CrawlerError> {
        Ok(self.detections.clone())
    }

    async fn estimate_depth(&self, _frame: &ColorFrame) -> Result<DepthMap, CrawlerError> {
        Ok(self.depth.clone())
    }
}

/// A backend with no models behind it; every call fails.
#[derive(Debug, Clone, Default)]
pub struct UnavailableBackend;

#[async_trait]
impl PerceptionBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn detect(&self, _frame: &ColorFrame) -> Result<Vec<Detection>, CrawlerError> {
        Err(CrawlerError::PerceptionUnavailable("no detector configured".to_string()))
    }

    async fn estimate_depth(&self, _frame: &ColorFrame) -> Result<DepthMap, CrawlerError> {
        Err(CrawlerError::PerceptionUnavailable("no depth model configured".to_string()))
    }
}
