//! Canny-style edge detection.
//!
//! 3×3 Sobel gradients with replicated borders, L1 magnitude
//! (`|gx| + |gy|`), non-maximum suppression along the quantized gradient
//! direction, then double thresholding with 8-connected hysteresis.

use crate::image::GrayImage;

/// tan(22.5°) and tan(67.5°) in 15-bit fixed point.
const TAN_22_5: i64 = 13573;
const TAN_67_5: i64 = 79109;
const FIXED_SHIFT: u32 = 15;

/// Binary edge map with the same geometry as its source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMap {
    width: usize,
    height: usize,
    edges: Vec<bool>,
}

impl EdgeMap {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn is_edge(&self, x: usize, y: usize) -> bool {
        self.edges[y * self.width + x]
    }

    /// Number of edge pixels.
    pub fn count(&self) -> usize {
        self.edges.iter().filter(|&&e| e).count()
    }

    /// Fraction of edge pixels over rows `[y0, y1)`.
    pub fn band_density(&self, y0: usize, y1: usize) -> f32 {
        let y1 = y1.min(self.height);
        if y0 >= y1 || self.width == 0 {
            return 0.0;
        }
        let rows = &self.edges[y0 * self.width..y1 * self.width];
        rows.iter().filter(|&&e| e).count() as f32 / rows.len() as f32
    }
}

/// Detect edges with hysteresis thresholds `low` and `high` applied to the
/// L1 Sobel magnitude.
pub fn canny(img: &GrayImage, low: f32, high: f32) -> EdgeMap {
    let (w, h) = (img.width(), img.height());
    let (low, high) = if low > high { (high, low) } else { (low, high) };

    let mut gx = vec![0i32; w * h];
    let mut gy = vec![0i32; w * h];
    let mut mag = vec![0i32; w * h];
    for y in 0..h {
        for x in 0..w {
            let p = |dx: isize, dy: isize| img.get_clamped(x as isize + dx, y as isize + dy) as i32;
            let sx = (p(1, -1) + 2 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2 * p(-1, 0) + p(-1, 1));
            let sy = (p(-1, 1) + 2 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2 * p(0, -1) + p(1, -1));
            let i = y * w + x;
            gx[i] = sx;
            gy[i] = sy;
            mag[i] = sx.abs() + sy.abs();
        }
    }

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    let mut stack = Vec::new();
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let i = y * w + x;
            let m = mag[i];
            if (m as f32) <= low {
                continue;
            }
            let ax = gx[i].unsigned_abs() as i64;
            let ay = gy[i].unsigned_abs() as i64;
            let tg22 = ax * TAN_22_5;
            let tg67 = ax * TAN_67_5;
            let ay_fixed = ay << FIXED_SHIFT;
            let (a, b) = if ay_fixed < tg22 {
                // Horizontal gradient: compare left/right.
                (mag[i - 1], mag[i + 1])
            } else if ay_fixed > tg67 {
                // Vertical gradient: compare up/down.
                (mag[i - w], mag[i + w])
            } else if (gx[i] < 0) != (gy[i] < 0) {
                (mag[i - w + 1], mag[i + w - 1])
            } else {
                (mag[i - w - 1], mag[i + w + 1])
            };
            if m > a && m >= b {
                if (m as f32) > high {
                    class[i] = 2;
                    stack.push(i);
                } else {
                    class[i] = 1;
                }
            }
        }
    }

    while let Some(i) = stack.pop() {
        let (x, y) = ((i % w) as isize, (i / w) as isize);
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let j = ny as usize * w + nx as usize;
                if class[j] == 1 {
                    class[j] = 2;
                    stack.push(j);
                }
            }
        }
    }

    EdgeMap {
        width: w,
        height: h,
        edges: class.into_iter().map(|c| c == 2).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_has_no_edges() {
        let img = GrayImage::from_fn(32, 24, |_, _| 128);
        assert_eq!(canny(&img, 50.0, 150.0).count(), 0);
    }

    #[test]
    fn step_edge_yields_a_thin_line() {
        let img = GrayImage::from_fn(32, 24, |x, _| if x < 16 { 20 } else { 220 });
        let edges = canny(&img, 50.0, 150.0);
        assert!(edges.count() > 0);
        // Every detected pixel sits on the step, one column wide after NMS.
        for y in 0..24 {
            for x in 0..32 {
                if edges.is_edge(x, y) {
                    assert!(x == 15 || x == 16, "unexpected edge at ({x}, {y})");
                }
            }
        }
        let per_row = edges.count() as f32 / 22.0;
        assert!(per_row <= 1.0 + 1e-6, "edge should be one pixel thick, got {per_row}");
    }

    #[test]
    fn weak_gradient_is_ignored() {
        // A gentle ramp stays under the low threshold everywhere.
        let img = GrayImage::from_fn(64, 32, |x, _| (60 + x) as u8);
        assert_eq!(canny(&img, 50.0, 150.0).count(), 0);
    }

    #[test]
    fn checkerboard_is_edge_dense() {
        let img = GrayImage::from_fn(48, 48, |x, y| if (x / 6 + y / 6) % 2 == 0 { 20 } else { 235 });
        let edges = canny(&img, 50.0, 150.0);
        assert!(edges.band_density(0, 48) > 0.1);
    }

    #[test]
    fn detection_is_deterministic() {
        let img = GrayImage::from_fn(40, 30, |x, y| ((x * 7 + y * 13) % 255) as u8);
        assert_eq!(canny(&img, 50.0, 150.0), canny(&img, 50.0, 150.0));
    }
}
