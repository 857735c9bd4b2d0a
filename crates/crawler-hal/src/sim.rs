//! In-process frame sources for headless runs and CI.
//!
//! [`SimCamera`] renders a synthetic scene: a softly tiled floor that
//! scrolls toward the camera every frame, optionally with a high-contrast obstacle
//! block, or a near-black frame to exercise the darkness hazard.
//! [`ScriptedSource`] replays a fixed list of read results.
//!
//! # Example
//!
//! ```rust
//! use crawler_hal::sim::{SimCamera, SimScene};
//!
//! let cam = SimCamera::new("sim_front", 320, 240)
//!     .with_scene(SimScene::Obstacle { start_col: 0, end_col: 100 });
//! assert_eq!(cam.render(0).width(), 320);
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use crawler_types::{ColorFrame, CrawlerError};
use tracing::debug;

use crate::camera::FrameSource;

/// Size of one obstacle checker square in pixels.
const CHECKER: u32 = 6;
/// Floor tile size and contrast. Tile edges stay under the Canny high
/// threshold so the floor reads as passable texture, not clutter.
const FLOOR_TILE: u32 = 8;
const FLOOR_CONTRAST: u32 = 16;

/// What the simulated camera looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimScene {
    /// Empty floor.
    Open,
    /// A checkered block covering columns `[start_col, end_col)` from 30 %
    /// of the height down to the bottom edge.
    Obstacle { start_col: u32, end_col: u32 },
    /// Lights out.
    Dark,
}

// ────────────────────────────────────────────────────────────────────────────
// SimCamera
// ────────────────────────────────────────────────────────────────────────────

/// Deterministic synthetic camera.
pub struct SimCamera {
    id: String,
    width: u32,
    height: u32,
    scene: SimScene,
    tick: u64,
    open: bool,
    /// Number of `open` calls that fail before one succeeds.
    failing_opens: u32,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            scene: SimScene::Open,
            tick: 0,
            open: false,
            failing_opens: 0,
        }
    }

    pub fn with_scene(mut self, scene: SimScene) -> Self {
        self.scene = scene;
        self
    }

    /// Make the first `n` calls to `open` fail with
    /// [`CrawlerError::TransportUnavailable`].
    pub fn with_failing_opens(mut self, n: u32) -> Self {
        self.failing_opens = n;
        self
    }

    pub fn set_scene(&mut self, scene: SimScene) {
        self.scene = scene;
    }

    /// Render the frame for a given tick without advancing the camera.
    pub fn render(&self, tick: u64) -> ColorFrame {
        let h = self.height;
        let obstacle_top = h * 3 / 10;
        // The floor texture scrolls one row per tick, as if driving forward.
        let scroll = (tick % (2 * FLOOR_TILE as u64)) as u32;
        ColorFrame::from_fn(self.width, h, |x, y| {
            let v = match self.scene {
                SimScene::Dark => 3,
                SimScene::Obstacle { start_col, end_col }
                    if x >= start_col && x < end_col && y >= obstacle_top =>
                {
                    if ((x / CHECKER) + (y / CHECKER)) % 2 == 0 {
                        20
                    } else {
                        235
                    }
                }
                // Low-contrast tiles over a vertical shading ramp.
                _ => {
                    let tile = ((x / FLOOR_TILE) + (y + 2 * FLOOR_TILE - scroll) / FLOOR_TILE) % 2;
                    (80 + y * 60 / h.max(1) + tile * FLOOR_CONTRAST).min(255) as u8
                }
            };
            [v, v, v]
        })
    }
}

#[async_trait]
impl FrameSource for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&mut self) -> Result<(), CrawlerError> {
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(CrawlerError::TransportUnavailable(format!(
                "{}: simulated stream refused connection",
                self.id
            )));
        }
        debug!(camera = %self.id, "simulated camera opened");
        self.open = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<ColorFrame>, CrawlerError> {
        if !self.open {
            return Err(CrawlerError::TransportUnavailable(format!(
                "{}: camera not opened",
                self.id
            )));
        }
        let frame = self.render(self.tick);
        self.tick += 1;
        Ok(Some(frame))
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ScriptedSource
// ────────────────────────────────────────────────────────────────────────────

/// Replays a queue of read results, then reports "nothing new" forever.
pub struct ScriptedSource {
    id: String,
    script: VecDeque<Result<Option<ColorFrame>, CrawlerError>>,
    closed: bool,
}

impl ScriptedSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: VecDeque::new(),
            closed: false,
        }
    }

    /// Queue a frame.
    pub fn push_frame(mut self, frame: ColorFrame) -> Self {
        self.script.push_back(Ok(Some(frame)));
        self
    }

    /// Queue `n` copies of a frame.
    pub fn push_frames(mut self, frame: ColorFrame, n: usize) -> Self {
        for _ in 0..n {
            self.script.push_back(Ok(Some(frame.clone())));
        }
        self
    }

    /// Queue a read error.
    pub fn push_error(mut self, err: CrawlerError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&mut self) -> Result<(), CrawlerError> {
        self.closed = false;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<ColorFrame>, CrawlerError> {
        self.script.pop_front().unwrap_or(Ok(None))
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
