//! `crawler-hal` – frame acquisition boundary.
//!
//! Camera drivers and stream decoders live outside this workspace. They
//! plug in by implementing [`FrameSource`]; the pipeline only ever sees
//! decoded [`ColorFrame`][crawler_types::ColorFrame]s.
//!
//! # Modules
//!
//! - [`camera`] – the [`FrameSource`] trait.
//! - [`sim`] – a deterministic simulated camera and a scripted source for
//!   headless runs and tests.

pub mod camera;
pub mod sim;

pub use camera::FrameSource;
pub use sim::{ScriptedSource, SimCamera, SimScene};
