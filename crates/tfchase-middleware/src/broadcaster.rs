//! [`PoseToFrameBroadcaster`] – republishes an agent's planar pose as a frame.
//!
//! Every pose sample becomes a fresh [`StampedTransform`] `world → <agent>`
//! with translation `(x, y, 0)` and a pure-yaw rotation.  One sample, one
//! publish: nothing is batched, coalesced, or deduplicated.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use tfchase_middleware::PoseToFrameBroadcaster;
//! use tfchase_perception::{FrameStore, TfBuffer};
//! use tfchase_types::PlanarPose;
//!
//! let store = Arc::new(TfBuffer::new());
//! let broadcaster = PoseToFrameBroadcaster::new("turtle1", store.clone()).unwrap();
//! broadcaster
//!     .on_pose_sample("turtle1", PlanarPose::new(5.5, 5.5, 0.0), Utc::now())
//!     .unwrap();
//! assert!(store.query_latest("world", "turtle1").is_ok());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tfchase_perception::{FrameStore, StampedTransform};
use tfchase_types::{ChaseError, EventPayload, PlanarPose, PoseSample};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, instrument, warn};

use crate::bus::TopicReceiver;

/// Fixed parent frame of every broadcast transform unless overridden.
pub const WORLD_FRAME: &str = "world";

/// Converts the pose stream of one named agent into frame updates.
pub struct PoseToFrameBroadcaster {
    agent_name: String,
    world_frame: String,
    store: Arc<dyn FrameStore>,
    published: AtomicU64,
    skipped: AtomicU64,
}

impl PoseToFrameBroadcaster {
    /// Bind a broadcaster to `agent_name`.
    ///
    /// # Errors
    ///
    /// [`ChaseError::InvalidFrame`] if `agent_name` is empty.
    pub fn new(agent_name: impl Into<String>, store: Arc<dyn FrameStore>) -> Result<Self, ChaseError> {
        let agent_name = agent_name.into();
        if agent_name.trim().is_empty() {
            return Err(ChaseError::InvalidFrame(agent_name));
        }
        Ok(Self {
            agent_name,
            world_frame: WORLD_FRAME.to_string(),
            store,
            published: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        })
    }

    /// Use `frame` instead of `"world"` as the parent frame.
    pub fn with_world_frame(mut self, frame: impl Into<String>) -> Self {
        self.world_frame = frame.into();
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Number of transforms successfully handed to the frame store.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of pose events [`run`][Self::run] lost because it fell behind
    /// the pose topic.  Counts events of every agent on the topic, not only
    /// this broadcaster's.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Build the transform for `pose` and publish it under frame `name`.
    ///
    /// Returns the transform that was published.  Store failures are
    /// returned to the caller unchanged.
    #[instrument(level = "trace", skip(self, pose), fields(parent = %self.world_frame))]
    pub fn on_pose_sample(
        &self,
        name: &str,
        pose: PlanarPose,
        now: DateTime<Utc>,
    ) -> Result<StampedTransform, ChaseError> {
        if name.trim().is_empty() {
            return Err(ChaseError::InvalidFrame(name.to_string()));
        }
        let transform = StampedTransform::from_planar(self.world_frame.as_str(), name, pose, now);
        self.store.publish(transform.clone())?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(transform)
    }

    /// Publish `sample` if it belongs to the bound agent.
    ///
    /// Returns `Ok(false)` for samples of other agents, which are ignored.
    pub fn handle_sample(&self, sample: &PoseSample) -> Result<bool, ChaseError> {
        if sample.agent_name != self.agent_name {
            return Ok(false);
        }
        self.on_pose_sample(&sample.agent_name, sample.pose, sample.stamp)?;
        Ok(true)
    }

    /// Consume pose events from `rx` in arrival order until the bus closes.
    ///
    /// Every received sample of the bound agent is published exactly once.
    /// Samples the channel evicted before they were received cannot be; a
    /// lag is logged and added to [`skipped`][Self::skipped], and the loop
    /// carries on with the oldest sample still buffered.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error (see [`ChaseError::is_fatal`]); any
    /// other per-sample failure is logged and the loop continues.
    pub async fn run(&self, mut rx: TopicReceiver) -> Result<(), ChaseError> {
        debug!(agent = %self.agent_name, topic = ?rx.topic(), "pose broadcaster started");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let EventPayload::Pose(sample) = event.payload else {
                        continue;
                    };
                    match self.handle_sample(&sample) {
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => warn!(agent = %self.agent_name, error = %e, "dropping pose sample"),
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    let total = self.skipped.fetch_add(n, Ordering::Relaxed) + n;
                    warn!(agent = %self.agent_name, lagged_by = n, total_skipped = total, "pose broadcaster lagged");
                }
                Err(RecvError::Closed) => {
                    debug!(agent = %self.agent_name, "pose topic closed");
                    return Ok(());
                }
            }
        }
    }
}

impl std::fmt::Debug for PoseToFrameBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseToFrameBroadcaster")
            .field("agent_name", &self.agent_name)
            .field("world_frame", &self.world_frame)
            .field("published", &self.published())
            .field("skipped", &self.skipped())
            .finish()
    }
}
