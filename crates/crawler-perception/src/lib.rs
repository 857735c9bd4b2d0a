//! `crawler-perception` – from camera frames to a traversability field.
//!
//! Turns raw frames into a normalized cost field over the horizontal field
//! of view and picks the corridor the robot should drive through.
//!
//! # Modules
//!
//! - [`image`] – [`GrayImage`][image::GrayImage], the processing raster.
//! - [`edges`] – Canny-style edge map.
//! - [`flow`] – dense Lucas–Kanade optical-flow magnitude.
//! - [`roi`] – trapezoidal per-heading regions of interest.
//! - [`cost_field`] – [`CostField`][cost_field::CostField], the fixed-arity
//!   output of every builder.
//! - [`motion_edge`] – cost builder from motion and edge cues.
//! - [`backend`] – the detector/depth collaborator contract.
//! - [`depth_fusion`] – cost builder from detector + depth outputs.
//! - [`corridor`] – sliding-window corridor search and heading argmin.
//! - [`terrain`] – zone-based obstacle height and slope profile.
//! - [`hazards`] – darkness, stuck and narrow-passage derivation.

pub mod backend;
pub mod corridor;
pub mod cost_field;
pub mod depth_fusion;
pub mod edges;
pub mod flow;
pub mod hazards;
pub mod image;
pub mod motion_edge;
pub mod roi;
pub mod terrain;

pub use backend::{BoundingBox, DepthMap, Detection, PerceptionBackend, StaticBackend, UnavailableBackend};
pub use corridor::{Corridor, CorridorParams, CorridorWindow, argmin_heading, search_corridor};
pub use cost_field::{CostField, FieldLayout, UNKNOWN_COST};
pub use depth_fusion::{DepthConvention, DepthFusionBuilder, DepthFusionConfig};
pub use hazards::{HazardEvidence, HazardThresholds};
pub use image::GrayImage;
pub use motion_edge::{FlowReference, MotionEdgeBuilder, MotionEdgeConfig, MotionEdgeReading};
pub use terrain::{ObstacleHeight, TerrainProfile, TerrainThresholds};
