//! Pipeline configuration.
//!
//! Every field has a default so that an empty TOML document is a valid
//! configuration. [`PipelineConfig::validate`] runs once at startup; a
//! configuration that passes it cannot produce a geometry error mid-run.

use std::path::PathBuf;
use std::time::Duration;

use crawler_perception::{CorridorParams, DepthFusionConfig, HazardThresholds, MotionEdgeConfig};
use crawler_types::CrawlerError;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────────────────────────

/// Which cost field builder feeds the corridor search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderKind {
    /// Optical flow and edge density over heading trapezoids.
    #[default]
    MotionEdge,
    /// Detector boxes fused with a depth map into a per-column line.
    DepthFusion,
}

impl std::str::FromStr for BuilderKind {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motion_edge" => Ok(Self::MotionEdge),
            "depth_fusion" => Ok(Self::DepthFusion),
            other => Err(CrawlerError::InvalidConfig(format!("unknown builder '{other}'"))),
        }
    }
}

/// Which decision strategy runs on top of the corridor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Hazard overrides ahead of heading steering.
    #[default]
    Hazard,
    /// Three-state cruise/climb/avoid FSM without hazard overrides.
    Climb,
}

impl std::str::FromStr for StrategyKind {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hazard" => Ok(Self::Hazard),
            "climb" => Ok(Self::Climb),
            other => Err(CrawlerError::InvalidConfig(format!("unknown strategy '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

fn default_stride() -> usize {
    10
}
fn default_bias_weight() -> f32 {
    0.2
}

/// `[perception]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Processing resolution. Unset means 320×240 for `motion_edge` and
    /// 640×480 for `depth_fusion`.
    #[serde(default)]
    pub width: Option<usize>,
    #[serde(default)]
    pub height: Option<usize>,
    /// Corridor width in columns. Unset means a quarter of the width.
    #[serde(default)]
    pub corridor_width: Option<usize>,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default = "default_bias_weight")]
    pub bias_weight: f32,
    #[serde(default)]
    pub motion_edge: MotionEdgeConfig,
    #[serde(default)]
    pub depth_fusion: DepthFusionConfig,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            corridor_width: None,
            stride: default_stride(),
            bias_weight: default_bias_weight(),
            motion_edge: MotionEdgeConfig::default(),
            depth_fusion: DepthFusionConfig::default(),
        }
    }
}

fn default_cooldown_secs() -> f32 {
    7.0
}
fn default_wall_backward() -> f32 {
    0.4
}
fn default_escape_turn() -> f32 {
    0.75
}
fn default_narrow_speed() -> f32 {
    0.3
}
fn default_dead_band() -> f32 {
    0.12
}
fn default_climb_limit() -> u32 {
    2
}

/// `[decision]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(flatten)]
    pub hazards: HazardThresholds,
    /// Minimum seconds between two 180° maneuvers.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f32,
    /// Magnitude of the backward fallback while the 180° turn cools down.
    #[serde(default = "default_wall_backward")]
    pub wall_backward: f32,
    #[serde(default = "default_escape_turn")]
    pub escape_turn: f32,
    #[serde(default = "default_narrow_speed")]
    pub narrow_speed: f32,
    /// Offsets within `±dead_band` of the frame center steer straight.
    #[serde(default = "default_dead_band")]
    pub dead_band: f32,
    #[serde(default = "default_climb_limit")]
    pub climb_limit: u32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            hazards: HazardThresholds::default(),
            cooldown_secs: default_cooldown_secs(),
            wall_backward: default_wall_backward(),
            escape_turn: default_escape_turn(),
            narrow_speed: default_narrow_speed(),
            dead_band: default_dead_band(),
            climb_limit: default_climb_limit(),
        }
    }
}

impl DecisionConfig {
    /// Saturates for values `validate` would reject.
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f32(self.cooldown_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

fn default_command_capacity() -> usize {
    256
}
fn default_history_len() -> usize {
    30
}
fn default_stale_after_ms() -> u64 {
    1000
}
fn default_stale_ticks() -> u32 {
    3
}
fn default_read_timeout_ms() -> u64 {
    2000
}

/// `[pipeline]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Bound of the command conduit. Producers wait when it is full.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    /// Frames kept as drift reference.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    /// How long the processing task waits for a frame before counting a
    /// stale tick.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    #[serde(default = "default_stale_ticks")]
    pub stale_ticks_before_stop: u32,
    /// Upper bound on a single frame read.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
            history_len: default_history_len(),
            stale_after_ms: default_stale_after_ms(),
            stale_ticks_before_stop: default_stale_ticks(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Top level
// ─────────────────────────────────────────────────────────────────────────────

fn default_robot_id() -> String {
    "LEADER-01".to_string()
}
fn default_fps() -> f32 {
    15.0
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Id stamped on every outbound command.
    #[serde(default = "default_robot_id")]
    pub robot_id: String,
    /// Follower ids that receive the group broadcast. Empty disables it.
    #[serde(default)]
    pub followers: Vec<String>,
    /// Frame acquisition rate limit.
    #[serde(default = "default_fps")]
    pub fps: f32,
    #[serde(default)]
    pub builder: BuilderKind,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Telemetry log file. Unset means `brain_<robot_id>_log.txt`.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub pipeline: SchedulerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            robot_id: default_robot_id(),
            followers: Vec::new(),
            fps: default_fps(),
            builder: BuilderKind::default(),
            strategy: StrategyKind::default(),
            log_path: None,
            perception: PerceptionConfig::default(),
            decision: DecisionConfig::default(),
            pipeline: SchedulerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Effective processing resolution.
    pub fn frame_size(&self) -> (usize, usize) {
        let (w, h) = match self.builder {
            BuilderKind::MotionEdge => (320, 240),
            BuilderKind::DepthFusion => (640, 480),
        };
        (
            self.perception.width.unwrap_or(w),
            self.perception.height.unwrap_or(h),
        )
    }

    pub fn corridor_params(&self) -> CorridorParams {
        let (w, _) = self.frame_size();
        CorridorParams {
            width: self.perception.corridor_width.unwrap_or(w / 4),
            stride: self.perception.stride,
            bias_weight: self.perception.bias_weight,
        }
    }

    /// Minimum spacing between frame reads.
    pub fn frame_period(&self) -> Duration {
        Duration::try_from_secs_f32(1.0 / self.fps).unwrap_or(Duration::MAX)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("brain_{}_log.txt", self.robot_id)))
    }

    /// Startup validation.
    ///
    /// # Errors
    ///
    /// [`CrawlerError::InvalidGeometry`] when the corridor, stride or
    /// headings do not fit the frame; [`CrawlerError::InvalidConfig`] for
    /// everything else.
    pub fn validate(&self) -> Result<(), CrawlerError> {
        if self.robot_id.trim().is_empty() {
            return Err(CrawlerError::InvalidConfig("robot_id must not be empty".to_string()));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) || Duration::try_from_secs_f32(1.0 / self.fps).is_err() {
            return Err(CrawlerError::InvalidConfig(format!("fps must be positive, got {}", self.fps)));
        }
        let cooldown = self.decision.cooldown_secs;
        if !cooldown.is_finite() || cooldown < 0.0 || Duration::try_from_secs_f32(cooldown).is_err() {
            return Err(CrawlerError::InvalidConfig(format!(
                "cooldown_secs must be a finite, non-negative number of seconds, got {cooldown}"
            )));
        }
        let (w, h) = self.frame_size();
        if w == 0 || h == 0 {
            return Err(CrawlerError::InvalidGeometry(format!(
                "processing frame must be non-empty, got {w}x{h}"
            )));
        }
        let corridor = self.corridor_params();
        if corridor.width == 0 || corridor.width > w {
            return Err(CrawlerError::InvalidGeometry(format!(
                "corridor width {} must be in 1..={w}",
                corridor.width
            )));
        }
        if corridor.stride == 0 {
            return Err(CrawlerError::InvalidGeometry("stride must be positive".to_string()));
        }
        if self.perception.motion_edge.angles.is_empty() {
            return Err(CrawlerError::InvalidGeometry("no candidate headings".to_string()));
        }
        if self.strategy == StrategyKind::Climb && self.builder == BuilderKind::DepthFusion {
            return Err(CrawlerError::InvalidConfig(
                "the climb strategy needs flow terrain; use the motion_edge builder".to_string(),
            ));
        }
        if self.pipeline.command_capacity == 0 {
            return Err(CrawlerError::InvalidConfig("command_capacity must be positive".to_string()));
        }
        if self.pipeline.history_len < 2 {
            return Err(CrawlerError::InvalidConfig(
                "history_len must hold at least two frames".to_string(),
            ));
        }
        if self.pipeline.stale_after_ms == 0 {
            return Err(CrawlerError::InvalidConfig("stale_after_ms must be positive".to_string()));
        }
        Ok(())
    }
}
