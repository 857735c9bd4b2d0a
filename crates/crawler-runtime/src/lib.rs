//! `crawler-runtime` – decisions and the pipeline that feeds them.
//!
//! # Modules
//!
//! - [`engine`] – the [`DecisionStrategy`] seam, [`MotionState`] and the
//!   rolling [`FrameHistory`][engine::FrameHistory].
//! - [`hazard_engine`] – [`HazardEngine`]: hazard overrides (dark, wall,
//!   stuck, narrow) ahead of corridor steering, with a 180° turn cooldown.
//! - [`climb_fsm`] – [`ClimbFsm`]: the three-state cruise/climb/avoid
//!   alternative driven only by terrain.
//! - [`broadcast`] – [`derive_group`]: the follower message derived from
//!   each leader command.
//! - [`processor`] – [`Processor`]: one tick from frame to command.
//! - [`pipeline`] – [`Pipeline`]: source, processing, dispatch and log tasks
//!   joined by bounded conduits and stopped by a cancellation token.
//! - [`sink`] – [`CommandSink`] / [`LogSink`] and the bus, file and tracing
//!   implementations.
//! - [`config`] – [`PipelineConfig`], loaded from TOML and validated once at
//!   startup.
//! - [`backoff`] – reconnect delays for the frame source.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing] with optional
//!   OTLP export.
//!
//! Only the processing task ever touches [`MotionState`]; everything else
//! talks through the conduits.

pub mod backoff;
pub mod broadcast;
pub mod climb_fsm;
pub mod config;
pub mod engine;
pub mod hazard_engine;
pub mod pipeline;
pub mod processor;
pub mod sink;
pub mod telemetry;

pub use backoff::Backoff;
pub use broadcast::{NARROW_FOLLOW_SPEED, derive_group};
pub use climb_fsm::ClimbFsm;
pub use config::{BuilderKind, DecisionConfig, PerceptionConfig, PipelineConfig, SchedulerConfig, StrategyKind};
pub use engine::{Decision, DecisionStrategy, FrameHistory, MotionState, Observation, Phase};
pub use hazard_engine::HazardEngine;
pub use pipeline::{Pipeline, PipelineReport};
pub use processor::{Processor, TickOutcome};
pub use sink::{BusSink, CommandSink, FileLogSink, LogSink, TeeLogSink, TracingLogSink, format_line};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
