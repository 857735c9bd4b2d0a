//! Single-channel 8-bit raster used by every perception stage.

use crawler_types::{ColorFrame, CrawlerError};

/// Row-major grayscale image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl GrayImage {
    /// Zero-filled image.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    /// Wrap an existing buffer.
    ///
    /// # Errors
    ///
    /// [`CrawlerError::InvalidGeometry`] if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<u8>) -> Result<Self, CrawlerError> {
        if data.len() != width * height {
            return Err(CrawlerError::InvalidGeometry(format!(
                "gray image {width}x{height} needs {} bytes, got {}",
                width * height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build from a per-pixel function.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Convert an RGB frame to luma (BT.601 weights) at the frame's own size.
    pub fn from_color(frame: &ColorFrame) -> Self {
        Self::from_color_resized(frame, frame.width() as usize, frame.height() as usize)
    }

    /// Convert to luma and resample (nearest neighbour) to `width x height`.
    /// An empty frame yields an all-black image.
    pub fn from_color_resized(frame: &ColorFrame, width: usize, height: usize) -> Self {
        let (fw, fh) = (frame.width() as usize, frame.height() as usize);
        let src = frame.data();
        if frame.is_empty() || src.len() < fw * fh * 3 {
            return Self::from_fn(width, height, |_, _| 0);
        }
        Self::from_fn(width, height, |x, y| {
            let sx = (x * fw / width.max(1)).min(fw.saturating_sub(1));
            let sy = (y * fh / height.max(1)).min(fh.saturating_sub(1));
            let i = (sy * fw + sx) * 3;
            let (r, g, b) = (src[i] as u32, src[i + 1] as u32, src[i + 2] as u32);
            // Fixed-point 0.299 / 0.587 / 0.114.
            ((r * 4899 + g * 9617 + b * 1868 + 8192) >> 14) as u8
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Pixel with coordinates clamped to the border.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> u8 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.get(x, y)
    }

    /// Mean intensity over the whole image (0 for an empty image).
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.data.iter().map(|&v| v as u64).sum();
        sum as f32 / self.data.len() as f32
    }

    /// Mean intensity over rows `[y0, y1)`.
    pub fn band_mean(&self, y0: usize, y1: usize) -> f32 {
        let y1 = y1.min(self.height);
        if y0 >= y1 {
            return 0.0;
        }
        let rows = &self.data[y0 * self.width..y1 * self.width];
        let sum: u64 = rows.iter().map(|&v| v as u64).sum();
        sum as f32 / rows.len() as f32
    }

    /// `true` when both images share dimensions.
    pub fn same_size(&self, other: &GrayImage) -> bool {
        self.width == other.width && self.height == other.height
    }
}
