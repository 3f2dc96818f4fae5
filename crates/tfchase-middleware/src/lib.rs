//! `tfchase-middleware` – plumbing between agents, frames, and services.
//!
//! Moves pose samples, velocity commands, and spawn calls between the
//! controller and the outside world without caring what produces or consumes
//! them.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`broadcaster`] – [`PoseToFrameBroadcaster`]: turns an agent's planar
//!   pose stream into `world → agent` frame updates.
//! - [`motion`] – [`MotionSink`] capability and the bus-backed
//!   [`BusMotionSink`] (`<agent>/cmd_vel`).
//! - [`spawn_client`] – [`SpawnService`] capability (`is_ready` /
//!   `call_async` / `poll`) and the bus-backed [`BusSpawnClient`].

pub mod broadcaster;
pub mod bus;
pub mod motion;
pub mod spawn_client;

pub use broadcaster::PoseToFrameBroadcaster;
pub use bus::{EventBus, Topic, TopicReceiver};
pub use motion::{BusMotionSink, MotionSink};
pub use spawn_client::{BusSpawnClient, SpawnHandle, SpawnPoll, SpawnService};
