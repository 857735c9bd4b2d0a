//! Dense optical-flow magnitude.
//!
//! Single-level Lucas–Kanade evaluated at every pixel. The structure tensor
//! and mismatch vector are summed over a `(2r + 1)²` window with summed-area
//! tables, so the cost per pixel is constant regardless of window size.
//!
//! ```text
//! | Σ IxIx  Σ IxIy | |u|     | Σ IxIt |
//! | Σ IxIy  Σ IyIy | |v| = − | Σ IyIt |
//! ```
//!
//! Windows whose smaller tensor eigenvalue is below
//! `MIN_EIGEN_PER_PIXEL * window_area` carry no usable texture (flat floor,
//! aperture problem) and report zero motion.

use crawler_types::CrawlerError;

use crate::image::GrayImage;

/// Minimum smaller eigenvalue of the structure tensor, per window pixel.
const MIN_EIGEN_PER_PIXEL: f64 = 0.05;

/// Per-pixel flow magnitude in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    width: usize,
    height: usize,
    magnitude: Vec<f32>,
}

impl FlowField {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn magnitude_at(&self, x: usize, y: usize) -> f32 {
        self.magnitude[y * self.width + x]
    }

    /// Mean magnitude over the whole field.
    pub fn mean(&self) -> f32 {
        self.band_mean(0, self.height)
    }

    /// Mean magnitude over rows `[y0, y1)`.
    pub fn band_mean(&self, y0: usize, y1: usize) -> f32 {
        let y1 = y1.min(self.height);
        if y0 >= y1 || self.width == 0 {
            return 0.0;
        }
        let rows = &self.magnitude[y0 * self.width..y1 * self.width];
        rows.iter().sum::<f32>() / rows.len() as f32
    }
}

/// Summed-area table with a zero guard row/column.
struct Integral {
    stride: usize,
    sums: Vec<f64>,
}

impl Integral {
    fn new(width: usize, height: usize, values: &[f64]) -> Self {
        let stride = width + 1;
        let mut sums = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += values[y * width + x];
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { stride, sums }
    }

    /// Sum over the inclusive rectangle `[x0, x1] × [y0, y1]`.
    #[inline]
    fn rect(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let s = self.stride;
        self.sums[(y1 + 1) * s + x1 + 1] - self.sums[y0 * s + x1 + 1] - self.sums[(y1 + 1) * s + x0]
            + self.sums[y0 * s + x0]
    }
}

/// Compute the dense flow magnitude from `prev` to `curr`.
///
/// `radius` is the window half-size; 7 gives a 15×15 window.
///
/// # Errors
///
/// [`CrawlerError::InvalidGeometry`] when the two images differ in size.
pub fn dense_flow(prev: &GrayImage, curr: &GrayImage, radius: usize) -> Result<FlowField, CrawlerError> {
    if !prev.same_size(curr) {
        return Err(CrawlerError::InvalidGeometry(format!(
            "flow needs equal sizes, got {}x{} and {}x{}",
            prev.width(),
            prev.height(),
            curr.width(),
            curr.height()
        )));
    }
    let (w, h) = (prev.width(), prev.height());
    let n = w * h;
    let (mut ixx, mut iyy, mut ixy, mut ixt, mut iyt) =
        (vec![0.0; n], vec![0.0; n], vec![0.0; n], vec![0.0; n], vec![0.0; n]);

    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (x as isize, y as isize);
            // Central differences averaged over both frames.
            let dx = |img: &GrayImage| {
                (img.get_clamped(xi + 1, yi) as f64 - img.get_clamped(xi - 1, yi) as f64) * 0.5
            };
            let dy = |img: &GrayImage| {
                (img.get_clamped(xi, yi + 1) as f64 - img.get_clamped(xi, yi - 1) as f64) * 0.5
            };
            let gx = (dx(prev) + dx(curr)) * 0.5;
            let gy = (dy(prev) + dy(curr)) * 0.5;
            let gt = curr.get(x, y) as f64 - prev.get(x, y) as f64;
            let i = y * w + x;
            ixx[i] = gx * gx;
            iyy[i] = gy * gy;
            ixy[i] = gx * gy;
            ixt[i] = gx * gt;
            iyt[i] = gy * gt;
        }
    }

    let sxx = Integral::new(w, h, &ixx);
    let syy = Integral::new(w, h, &iyy);
    let sxy = Integral::new(w, h, &ixy);
    let sxt = Integral::new(w, h, &ixt);
    let syt = Integral::new(w, h, &iyt);

    let cap = (2 * radius + 1) as f32;
    let mut magnitude = vec![0.0f32; n];
    for y in 0..h {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius).min(h - 1);
        for x in 0..w {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius).min(w - 1);
            let area = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;

            let a = sxx.rect(x0, y0, x1, y1);
            let c = syy.rect(x0, y0, x1, y1);
            let b = sxy.rect(x0, y0, x1, y1);
            let trace_half = (a + c) * 0.5;
            let disc = (((a - c) * 0.5).powi(2) + b * b).sqrt();
            if trace_half - disc < MIN_EIGEN_PER_PIXEL * area {
                continue;
            }
            let det = a * c - b * b;
            let bx = -sxt.rect(x0, y0, x1, y1);
            let by = -syt.rect(x0, y0, x1, y1);
            let u = (c * bx - b * by) / det;
            let v = (a * by - b * bx) / det;
            magnitude[y * w + x] = ((u * u + v * v).sqrt() as f32).min(cap);
        }
    }

    Ok(FlowField {
        width: w,
        height: h,
        magnitude,
    })
}
