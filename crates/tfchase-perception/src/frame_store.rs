//! Frame store capability and its in-memory backend.
//!
//! [`FrameStore`] is the narrow interface every component uses to share
//! transforms: broadcasters [`publish`][FrameStore::publish], controllers
//! [`query_latest`][FrameStore::query_latest].  Components receive an
//! `Arc<dyn FrameStore>` at construction; there is no global buffer.
//!
//! [`TfBuffer`] keeps the most recent transform for every child frame.  Each
//! child has exactly one parent, so the frames form a forest; a query walks
//! both frames up to their common ancestor and composes the two chains.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use tfchase_perception::{FrameStore, StampedTransform, TfBuffer};
//! use tfchase_types::PlanarPose;
//!
//! let store = TfBuffer::new();
//! let now = Utc::now();
//! store.publish(StampedTransform::from_planar("world", "turtle1", PlanarPose::new(4.0, 5.0, 0.0), now)).unwrap();
//! store.publish(StampedTransform::from_planar("world", "turtle2", PlanarPose::new(1.0, 1.0, 0.0), now)).unwrap();
//!
//! // Where is turtle1 as seen from turtle2?
//! let rel = store.query_latest("turtle2", "turtle1").unwrap();
//! assert!((rel.transform.translation.x - 3.0).abs() < 1e-9);
//! assert!((rel.transform.translation.y - 4.0).abs() < 1e-9);
//! ```

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};

use chrono::{DateTime, Duration, Utc};
use tfchase_types::ChaseError;
use tracing::{debug, trace};

use crate::transform::{StampedTransform, Transform3D};

// ────────────────────────────────────────────────────────────────────────────
// FrameStore trait
// ────────────────────────────────────────────────────────────────────────────

/// Shared storage of named, timestamped rigid transforms.
///
/// # Contract
///
/// * `publish` – record `transform` as the latest known relation between its
///   parent and child frames.  Fails with [`ChaseError::InvalidFrame`] for
///   malformed frame names and [`ChaseError::StoreConnectivity`] when the
///   backing storage cannot be reached.
///
/// * `query_latest` – return the transform whose parent is `parent` and whose
///   child is `child`, i.e. the pose of `child` expressed in `parent`, at the
///   latest time for which data is available.  Unknown or unconnected frames
///   yield [`ChaseError::FrameNotFound`]; data that cannot be brought to a
///   common time yields [`ChaseError::Extrapolation`].
///
/// A transform that was just published is not guaranteed to be visible to an
/// immediately following query.
pub trait FrameStore: Send + Sync {
    fn publish(&self, transform: StampedTransform) -> Result<(), ChaseError>;

    fn query_latest(&self, parent: &str, child: &str) -> Result<StampedTransform, ChaseError>;
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

/// In-memory [`FrameStore`] holding the latest transform per child frame.
///
/// Safe to share between a broadcaster task and a control loop: publishes
/// take a write lock, queries a read lock.  A poisoned lock is reported as
/// [`ChaseError::StoreConnectivity`].
#[derive(Debug, Default)]
pub struct TfBuffer {
    /// `links[child] = latest transform parent -> child`
    links: RwLock<HashMap<String, StampedTransform>>,
    /// Largest stamp spread tolerated along a lookup chain.
    max_skew: Option<Duration>,
}

impl TfBuffer {
    /// Create an empty buffer that accepts any stamp spread.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject lookups whose links were observed more than `max_skew` apart.
    pub fn with_max_skew(mut self, max_skew: Duration) -> Self {
        self.max_skew = Some(max_skew);
        self
    }

    /// Number of child frames currently stored.
    pub fn len(&self) -> Result<usize, ChaseError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ChaseError> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StampedTransform>>, ChaseError> {
        self.links
            .read()
            .map_err(|e| ChaseError::StoreConnectivity(format!("frame buffer lock poisoned: {e}")))
    }
}

impl FrameStore for TfBuffer {
    fn publish(&self, transform: StampedTransform) -> Result<(), ChaseError> {
        validate_frame(&transform.parent_frame)?;
        validate_frame(&transform.child_frame)?;
        if transform.parent_frame == transform.child_frame {
            return Err(ChaseError::InvalidFrame(transform.child_frame));
        }

        let mut links = self
            .links
            .write()
            .map_err(|e| ChaseError::StoreConnectivity(format!("frame buffer lock poisoned: {e}")))?;

        // Re-parenting is allowed, but never under one of the frame's own
        // descendants.
        if chain_to_root(&links, &transform.parent_frame)
            .iter()
            .any(|link| link.parent_frame == transform.child_frame)
        {
            return Err(ChaseError::InvalidFrame(format!(
                "{} -> {} would close a loop",
                transform.parent_frame, transform.child_frame
            )));
        }

        trace!(
            parent = %transform.parent_frame,
            child = %transform.child_frame,
            stamp = %transform.stamp,
            "storing transform"
        );
        links.insert(transform.child_frame.clone(), transform);
        Ok(())
    }

    fn query_latest(&self, parent: &str, child: &str) -> Result<StampedTransform, ChaseError> {
        let links = self.read()?;

        let not_found = |reason: String| ChaseError::FrameNotFound {
            parent: parent.to_string(),
            child: child.to_string(),
            reason,
        };

        for frame in [parent, child] {
            if !is_known(&links, frame) {
                return Err(not_found(format!("frame \"{frame}\" does not exist")));
            }
        }

        if parent == child {
            let stamp = links.get(child).map(|l| l.stamp).unwrap_or_else(Utc::now);
            return Ok(StampedTransform::new(parent, child, Transform3D::identity(), stamp));
        }

        let mut up_from_parent = chain_to_root(&links, parent);
        let mut up_from_child = chain_to_root(&links, child);

        let parent_root = root_of(&up_from_parent, parent);
        let child_root = root_of(&up_from_child, child);
        if parent_root != child_root {
            return Err(not_found(format!(
                "frames are not connected (roots \"{parent_root}\" and \"{child_root}\")"
            )));
        }

        // Drop the links both chains share; they cancel out.
        while let (Some(a), Some(b)) = (up_from_parent.last(), up_from_child.last()) {
            if a.child_frame != b.child_frame {
                break;
            }
            up_from_parent.pop();
            up_from_child.pop();
        }

        let (oldest, newest) = stamp_bounds(up_from_parent.iter().chain(up_from_child.iter()).copied())
            .ok_or_else(|| not_found("no links between frames".to_string()))?;
        if let Some(max_skew) = self.max_skew {
            let skew = newest - oldest;
            if skew > max_skew {
                debug!(parent, child, skew_ms = skew.num_milliseconds(), "lookup exceeds skew bound");
                return Err(ChaseError::Extrapolation {
                    parent: parent.to_string(),
                    child: child.to_string(),
                    skew_ms: skew.num_milliseconds(),
                });
            }
        }

        let ancestor_to_parent = compose_down(&up_from_parent);
        let ancestor_to_child = compose_down(&up_from_child);
        Ok(StampedTransform::new(
            parent,
            child,
            ancestor_to_parent.inverse().compose(ancestor_to_child),
            oldest,
        ))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ────────────────────────────────────────────────────────────────────────────

fn validate_frame(name: &str) -> Result<(), ChaseError> {
    if name.trim().is_empty() {
        return Err(ChaseError::InvalidFrame(name.to_string()));
    }
    Ok(())
}

fn is_known(links: &HashMap<String, StampedTransform>, frame: &str) -> bool {
    links.contains_key(frame) || links.values().any(|l| l.parent_frame == frame)
}

/// Links from `frame` upward, nearest first.
fn chain_to_root<'a>(
    links: &'a HashMap<String, StampedTransform>,
    frame: &str,
) -> Vec<&'a StampedTransform> {
    let mut chain = Vec::new();
    let mut current = frame;
    while let Some(link) = links.get(current) {
        // publish() refuses loops; the bound only protects against a corrupt map.
        if chain.len() > links.len() {
            break;
        }
        chain.push(link);
        current = &link.parent_frame;
    }
    chain
}

fn root_of<'a>(chain: &[&'a StampedTransform], frame: &'a str) -> &'a str {
    chain.last().map(|l| l.parent_frame.as_str()).unwrap_or(frame)
}

/// Compose a nearest-first chain into the transform ancestor -> frame.
fn compose_down(chain: &[&StampedTransform]) -> Transform3D {
    chain
        .iter()
        .rev()
        .fold(Transform3D::identity(), |acc, link| acc.compose(link.transform))
}

fn stamp_bounds<'a>(
    links: impl Iterator<Item = &'a StampedTransform>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    links.fold(None, |bounds, link| match bounds {
        None => Some((link.stamp, link.stamp)),
        Some((lo, hi)) => Some((lo.min(link.stamp), hi.max(link.stamp))),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
