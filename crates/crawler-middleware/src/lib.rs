//! `crawler-middleware` – in-process routing for outbound traffic.
//!
//! The steering pipeline never talks to the message-bus client directly. It
//! publishes to the [`EventBus`]; bridges subscribe to the topics they care
//! about and forward to whatever transport the deployment uses.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned publish/subscribe bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
