//! One pipeline tick: frame in, at most one command out.
//!
//! The [`Processor`] is owned by the processing task and is the only holder
//! of the [`MotionState`]. Per tick it:
//!
//! 1. converts the frame to gray at the processing resolution,
//! 2. stops immediately on darkness,
//! 3. builds the cost field (falling back to an all-unknown field when the
//!    perception backend is unavailable),
//! 4. searches the corridor and derives hazards,
//! 5. asks the configured [`DecisionStrategy`] for a decision.

use std::sync::Arc;
use std::time::Instant;

use crawler_perception::{
    Corridor, CorridorParams, CostField, DepthFusionBuilder, FlowReference, GrayImage, HazardEvidence,
    HazardThresholds, MotionEdgeBuilder, PerceptionBackend, TerrainProfile,
};
use crawler_types::{ColorFrame, Command, CrawlerError, LogLine};
use tracing::{debug, warn};

use crate::climb_fsm::ClimbFsm;
use crate::config::{BuilderKind, PipelineConfig, StrategyKind};
use crate::engine::{Decision, DecisionStrategy, MotionState, Observation};
use crate::hazard_engine::HazardEngine;

/// The configured cost field builder.
enum FieldSource {
    MotionEdge(MotionEdgeBuilder),
    DepthFusion {
        builder: DepthFusionBuilder,
        backend: Arc<dyn PerceptionBackend>,
    },
}

/// Result of one tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub command: Option<Command>,
    pub logs: Vec<LogLine>,
}

impl TickOutcome {
    fn log(&mut self, message: impl Into<String>) {
        self.logs.push(LogLine::now(message));
    }
}

/// What the cost field stage produced.
struct FieldReading {
    field: CostField,
    mean_flow: Option<f32>,
    terrain: Option<TerrainProfile>,
}

pub struct Processor {
    robot_id: String,
    width: usize,
    height: usize,
    source: FieldSource,
    corridor: CorridorParams,
    hazards: HazardThresholds,
    strategy: Box<dyn DecisionStrategy>,
    state: MotionState,
    stale_limit: u32,
    stale_ticks: u32,
    safe_stop_sent: bool,
}

impl Processor {
    /// # Errors
    ///
    /// [`CrawlerError::InvalidGeometry`] / [`CrawlerError::InvalidConfig`]
    /// from validation or builder construction.
    pub fn new(config: &PipelineConfig, backend: Arc<dyn PerceptionBackend>) -> Result<Self, CrawlerError> {
        config.validate()?;
        let (width, height) = config.frame_size();
        let source = match config.builder {
            BuilderKind::MotionEdge => FieldSource::MotionEdge(MotionEdgeBuilder::new(
                config.perception.motion_edge.clone(),
                width,
                height,
            )?),
            BuilderKind::DepthFusion => FieldSource::DepthFusion {
                builder: DepthFusionBuilder::new(config.perception.depth_fusion.clone(), width, height)?,
                backend,
            },
        };
        let strategy: Box<dyn DecisionStrategy> = match config.strategy {
            StrategyKind::Hazard => Box::new(HazardEngine::new(config.decision.clone())),
            StrategyKind::Climb => Box::new(ClimbFsm::new(config.decision.climb_limit)),
        };
        debug!(builder = ?config.builder, strategy = strategy.name(), width, height, "processor ready");
        Ok(Self {
            robot_id: config.robot_id.clone(),
            width,
            height,
            source,
            corridor: config.corridor_params(),
            hazards: config.decision.hazards.clone(),
            strategy,
            state: MotionState::new(config.pipeline.history_len),
            stale_limit: config.pipeline.stale_ticks_before_stop.max(1),
            stale_ticks: 0,
            safe_stop_sent: false,
        })
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    /// Process one fresh frame.
    pub async fn tick(&mut self, frame: &ColorFrame, now: Instant) -> TickOutcome {
        let mut out = TickOutcome::default();
        if frame.is_empty() {
            warn!(width = frame.width(), height = frame.height(), "dropping empty frame");
            out.log(format!("REJECTED FRAME: {}x{}", frame.width(), frame.height()));
            return out;
        }
        self.stale_ticks = 0;
        self.safe_stop_sent = false;

        let gray = GrayImage::from_color_resized(frame, self.width, self.height);
        let dark = self.hazards.is_dark(&gray);
        self.state.history.push(gray);

        if dark {
            // Darkness bypasses the strategy so no FSM state moves.
            debug!("dark frame, stopping");
            self.emit(&mut out, Decision::stop().with_note("CRITICAL: NO LIGHT"), 1.0);
            return out;
        }

        let reading = match self.read_field(frame, &mut out).await {
            Some(r) => r,
            None => return out,
        };
        let corridor = match Corridor::select(&reading.field, &self.corridor) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "corridor search failed");
                out.log(format!("corridor search failed: {e}"));
                return out;
            }
        };
        let hazards = self.hazards.derive(&HazardEvidence {
            field: &reading.field,
            best_cost: corridor.cost,
            mean_flow: reading.mean_flow,
            history_len: self.state.history.len(),
            edge_span: self.corridor.width,
        });
        let obs = Observation {
            hazards,
            corridor: Some(corridor),
            terrain: reading.terrain,
        };
        let decision = self.strategy.decide(&mut self.state, &obs, now);
        self.emit(&mut out, decision, corridor.cost);
        out
    }

    /// Called when no frame arrived within the stale timeout. Emits a single
    /// safe stop once the stale streak reaches the configured limit.
    pub fn on_stale(&mut self) -> TickOutcome {
        let mut out = TickOutcome::default();
        self.stale_ticks = self.stale_ticks.saturating_add(1);
        if self.stale_ticks >= self.stale_limit && !self.safe_stop_sent {
            self.safe_stop_sent = true;
            warn!(stale_ticks = self.stale_ticks, "no fresh frames, safe stop");
            let decision = Decision::stop().with_note(format!("STALE: no frames for {} ticks", self.stale_ticks));
            self.emit(&mut out, decision, 1.0);
        }
        out
    }

    async fn read_field(&self, frame: &ColorFrame, out: &mut TickOutcome) -> Option<FieldReading> {
        match &self.source {
            FieldSource::MotionEdge(builder) => {
                let history = &self.state.history;
                let reference = match builder.config().reference {
                    FlowReference::Previous => history.previous(),
                    FlowReference::Oldest if history.len() >= 2 => history.oldest(),
                    FlowReference::Oldest => None,
                };
                // A single frame has nothing to compare against yet.
                let (reference, current) = (reference?, history.latest()?);
                match builder.build(reference, current) {
                    Ok(r) => Some(FieldReading {
                        field: r.field,
                        mean_flow: Some(r.mean_flow),
                        terrain: Some(r.terrain),
                    }),
                    Err(e) => {
                        warn!(error = %e, "motion/edge build failed");
                        out.log(format!("cost field failed: {e}"));
                        None
                    }
                }
            }
            FieldSource::DepthFusion { builder, backend } => {
                let field = match builder.build(frame, backend.as_ref()).await {
                    Ok(field) => field,
                    Err(e) => {
                        warn!(backend = backend.name(), error = %e, "perception unavailable, unknown field this tick");
                        out.log(format!("PERCEPTION UNAVAILABLE: {e}"));
                        CostField::unknown_columns(builder.width()).ok()?
                    }
                };
                Some(FieldReading {
                    field,
                    mean_flow: None,
                    terrain: None,
                })
            }
        }
    }

    fn emit(&self, out: &mut TickOutcome, decision: Decision, cost: f32) {
        if let Some(note) = &decision.note {
            out.log(note.clone());
        }
        let command = Command::new(self.robot_id.clone(), decision.verb, decision.magnitude, decision.angle)
            .narrow(decision.is_narrow);
        out.log(format!(
            "CMD: {} | VAL: {} | A:{} | C:{:.3}",
            command.verb, command.magnitude, command.angle, cost
        ));
        out.command = Some(command);
    }
}

#[cfg(test)]
mod tests {
    use crawler_perception::{DepthMap, StaticBackend, UnavailableBackend};
    use crawler_types::CommandVerb;

    use super::*;

    fn frame(v: u8) -> ColorFrame {
        ColorFrame::solid(320, 240, [v, v, v])
    }

    fn processor(config: &PipelineConfig) -> Result<Processor, CrawlerError> {
        Processor::new(config, Arc::new(UnavailableBackend))
    }

    #[tokio::test]
    async fn dark_frame_stops_immediately() -> Result<(), CrawlerError> {
        let mut p = processor(&PipelineConfig::default())?;
        let out = p.tick(&frame(3), Instant::now()).await;
        let cmd = out.command.ok_or(CrawlerError::Channel("no command".into()))?;
        assert_eq!((cmd.verb, cmd.magnitude), (CommandVerb::Stop, 1.0));
        assert!(out.logs.iter().any(|l| l.message.contains("NO LIGHT")));
        Ok(())
    }

    #[tokio::test]
    async fn empty_frame_is_rejected_without_a_command() -> Result<(), CrawlerError> {
        let mut p = processor(&PipelineConfig::default())?;
        for (w, h) in [(0, 0), (320, 0), (0, 240)] {
            let out = p.tick(&ColorFrame::solid(w, h, [120; 3]), Instant::now()).await;
            assert!(out.command.is_none());
            assert!(out.logs.iter().any(|l| l.message.starts_with("REJECTED FRAME")));
        }
        assert_eq!(p.state().history.len(), 0);

        // The pipeline keeps working afterwards.
        p.tick(&frame(120), Instant::now()).await;
        let out = p.tick(&frame(120), Instant::now()).await;
        assert!(out.command.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn first_frame_only_primes_the_history() -> Result<(), CrawlerError> {
        let mut p = processor(&PipelineConfig::default())?;
        let out = p.tick(&frame(120), Instant::now()).await;
        assert!(out.command.is_none());
        let out = p.tick(&frame(120), Instant::now()).await;
        let cmd = out.command.ok_or(CrawlerError::Channel("no command".into()))?;
        // Calm floor: every heading costs 0.15, first minimum is -30.
        assert_eq!(cmd.verb, CommandVerb::Left);
        assert_eq!(cmd.magnitude, 0.85);
        assert_eq!(cmd.angle, -30);
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_backend_falls_back_to_unknown_field() -> Result<(), CrawlerError> {
        let config = PipelineConfig {
            builder: BuilderKind::DepthFusion,
            ..Default::default()
        };
        let mut p = processor(&config)?;
        let out = p.tick(&ColorFrame::solid(640, 480, [120, 120, 120]), Instant::now()).await;
        let cmd = out.command.ok_or(CrawlerError::Channel("no command".into()))?;
        assert_eq!(cmd.verb, CommandVerb::Forward);
        assert_eq!(cmd.magnitude, 0.5);
        assert!(out.logs.iter().any(|l| l.message.starts_with("PERCEPTION UNAVAILABLE")));
        Ok(())
    }

    #[tokio::test]
    async fn depth_obstacle_on_the_right_steers_left() -> Result<(), CrawlerError> {
        let config = PipelineConfig {
            builder: BuilderKind::DepthFusion,
            ..Default::default()
        };
        let (w, h) = (64, 48);
        let values = (0..w * h).map(|i| if i % w >= w / 2 { 1.0 } else { 0.0 }).collect();
        let backend = StaticBackend::new(DepthMap::new(w, h, values)?);
        let mut p = Processor::new(&config, Arc::new(backend))?;
        let out = p.tick(&ColorFrame::solid(640, 480, [120, 120, 120]), Instant::now()).await;
        let cmd = out.command.ok_or(CrawlerError::Channel("no command".into()))?;
        assert_eq!(cmd.verb, CommandVerb::Left);
        Ok(())
    }

    #[test]
    fn stale_streak_emits_one_safe_stop() -> Result<(), CrawlerError> {
        let mut p = processor(&PipelineConfig::default())?;
        assert!(p.on_stale().command.is_none());
        assert!(p.on_stale().command.is_none());
        let stop = p.on_stale().command.ok_or(CrawlerError::Channel("no command".into()))?;
        assert_eq!(stop.verb, CommandVerb::Stop);
        assert!(p.on_stale().command.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn fresh_frame_rearms_the_safe_stop() -> Result<(), CrawlerError> {
        let config = PipelineConfig {
            pipeline: crate::config::SchedulerConfig {
                stale_ticks_before_stop: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut p = processor(&config)?;
        assert!(p.on_stale().command.is_some());
        assert!(p.on_stale().command.is_none());
        p.tick(&frame(120), Instant::now()).await;
        assert!(p.on_stale().command.is_some());
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = PipelineConfig::default();
        config.perception.corridor_width = Some(1000);
        assert!(matches!(processor(&config), Err(CrawlerError::InvalidGeometry(_))));
    }
}
