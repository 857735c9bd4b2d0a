//! Per-heading trapezoid regions of interest.
//!
//! Each candidate heading looks at a trapezoid on the floor: narrow at the
//! far field (top), wide at the near field (bottom), shifted sideways in
//! proportion to the heading angle. Spans are precomputed once per frame
//! geometry and reused every tick.

use crawler_types::CrawlerError;

/// Heading (degrees) that maps to the full lateral shift.
const REFERENCE_ANGLE: f32 = 30.0;
/// Lateral shift at the reference heading, as a fraction of frame width.
const SHIFT_FRACTION: f32 = 0.28;
/// Far edge of the trapezoid as a fraction of frame height.
const TOP_FRACTION: f32 = 0.375;
/// Half-widths at the far and near edges, as fractions of frame width.
const TOP_HALF_WIDTH: f32 = 1.0 / 16.0;
const BOTTOM_HALF_WIDTH: f32 = 7.0 / 32.0;

/// One horizontal run `[x0, x1)` on row `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub y: usize,
    pub x0: usize,
    pub x1: usize,
}

/// Trapezoid for one heading.
#[derive(Debug, Clone, PartialEq)]
pub struct Trapezoid {
    pub angle: i32,
    spans: Vec<Span>,
    pixels: usize,
}

impl Trapezoid {
    fn new(angle: i32, width: usize, height: usize) -> Self {
        let (w, h) = (width as f32, height as f32);
        let center = w / 2.0 + (angle as f32 / REFERENCE_ANGLE) * w * SHIFT_FRACTION;
        let top = (h * TOP_FRACTION).round() as usize;
        let depth = (height - top.min(height)).max(1) as f32;
        let mut spans = Vec::new();
        let mut pixels = 0;
        for y in top.min(height)..height {
            let t = (y - top) as f32 / depth;
            let half = w * (TOP_HALF_WIDTH + t * (BOTTOM_HALF_WIDTH - TOP_HALF_WIDTH));
            let x0 = (center - half).round().max(0.0) as usize;
            let x1 = ((center + half).round().max(0.0) as usize).min(width);
            if x0 < x1 {
                pixels += x1 - x0;
                spans.push(Span { y, x0, x1 });
            }
        }
        Self {
            angle,
            spans,
            pixels,
        }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Number of pixels covered. Zero when the heading points fully off-frame.
    pub fn pixels(&self) -> usize {
        self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.pixels == 0
    }

    /// Mean of `f(x, y)` over the region, `None` when empty.
    pub fn mean_of(&self, mut f: impl FnMut(usize, usize) -> f32) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        let mut sum = 0.0f64;
        for span in &self.spans {
            for x in span.x0..span.x1 {
                sum += f(x, span.y) as f64;
            }
        }
        Some((sum / self.pixels as f64) as f32)
    }
}

/// All heading trapezoids for one frame geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiSet {
    width: usize,
    height: usize,
    regions: Vec<Trapezoid>,
}

impl RoiSet {
    /// # Errors
    ///
    /// [`CrawlerError::InvalidGeometry`] for an empty frame or heading list.
    pub fn new(angles: &[i32], width: usize, height: usize) -> Result<Self, CrawlerError> {
        if width == 0 || height == 0 {
            return Err(CrawlerError::InvalidGeometry(format!(
                "ROI frame must be non-empty, got {width}x{height}"
            )));
        }
        if angles.is_empty() {
            return Err(CrawlerError::InvalidGeometry("no candidate headings".to_string()));
        }
        Ok(Self {
            width,
            height,
            regions: angles.iter().map(|&a| Trapezoid::new(a, width, height)).collect(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn regions(&self) -> &[Trapezoid] {
        &self.regions
    }
}
