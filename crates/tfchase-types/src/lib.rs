use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A planar pose sample: position in metres, heading in radians.
///
/// `heading` is not wrapped; callers may pass unwrapped angles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanarPose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl PlanarPose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }
}

/// One pose report for a named agent, as delivered by a pose source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub agent_name: String,
    pub pose: PlanarPose,
    pub stamp: DateTime<Utc>,
}

/// Request to create a new agent at the given pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Final answer from a spawn service for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpawnResult {
    /// The agent exists; `name` is the name the service assigned.
    Spawned { name: String },
    /// The service rejected or could not complete the request.
    Failed { reason: String },
}

/// Differential-drive velocity command (`geometry_msgs/Twist` subset).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityCommand {
    /// Forward speed in m/s.
    pub linear_x: f64,
    /// Yaw rate in rad/s, counter-clockwise positive.
    pub angular_z: f64,
}

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "tfchase::turtle2/cmd_vel"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh event stamped with the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A planar pose report from a pose source.
    Pose(PoseSample),
    /// A velocity command for a motion consumer.
    Velocity(VelocityCommand),
    /// A spawn call addressed to whichever spawn server is listening.
    SpawnRequested {
        request_id: Uuid,
        request: SpawnRequest,
    },
    /// The spawn server's answer to an earlier `SpawnRequested`.
    SpawnCompleted {
        request_id: Uuid,
        result: SpawnResult,
    },
    /// Operator-facing diagnostic text.
    Diagnostic { component: String, message: String },
}

/// Global error type spanning frame lookups, the spawn handshake, and plumbing.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChaseError {
    #[error("Frame lookup {parent} -> {child} failed: {reason}")]
    FrameNotFound {
        parent: String,
        child: String,
        reason: String,
    },

    #[error("Extrapolation on {parent} -> {child}: stamps differ by {skew_ms} ms")]
    Extrapolation {
        parent: String,
        child: String,
        skew_ms: i64,
    },

    #[error("Frame store unreachable: {0}")]
    StoreConnectivity(String),

    #[error("Invalid frame name: {0:?}")]
    InvalidFrame(String),

    #[error("Spawn service not ready: {0}")]
    ServiceNotReady(String),

    #[error("Spawn of {name} failed: {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChaseError {
    /// `true` for lookup failures that are expected while frames are still
    /// being published and only cost the current tick.
    pub fn is_transform_unavailable(&self) -> bool {
        matches!(
            self,
            ChaseError::FrameNotFound { .. } | ChaseError::Extrapolation { .. }
        )
    }

    /// `true` when no further progress is possible without intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChaseError::StoreConnectivity(_) | ChaseError::SpawnFailed { .. }
        )
    }
}
