//! `tfchase-runtime` – the pursuit loop.
//!
//! Spawns a pursuer agent, then once per tick looks up where the target is
//! relative to it and commands it toward the target.
//!
//! # Modules
//!
//! - [`spawn`] – [`SpawnStateMachine`][spawn::SpawnStateMachine]: one-shot,
//!   non-blocking spawn handshake driven one step per tick.
//! - [`pursuit`] – [`PursuitController`][pursuit::PursuitController]: the
//!   per-tick control step and the proportional
//!   [`pursuit_command`][pursuit::pursuit_command] law.
//! - [`config`] – [`NodeConfig`][config::NodeConfig]: TOML configuration with
//!   `TFCHASE_*` environment overrides.
//! - [`node`] – [`PursuitNode`][node::PursuitNode]: runs the broadcasters
//!   and the ticking controller on one event bus until shutdown.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable trace export.

pub mod config;
pub mod node;
pub mod pursuit;
pub mod spawn;
pub mod telemetry;

pub use config::{BroadcasterConfig, NodeConfig, SpawnConfig};
pub use node::PursuitNode;
pub use pursuit::{PursuitConfig, PursuitController, PursuitGains, TickOutcome, pursuit_command};
pub use spawn::{SpawnProgress, SpawnState, SpawnStateMachine};
