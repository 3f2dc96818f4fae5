//! Rigid-body transform primitives.
//!
//! A [`Transform3D`] is a translation plus a unit-quaternion rotation.  A
//! [`StampedTransform`] additionally names its parent and child frames and
//! carries the time at which it was observed; it is the unit of exchange
//! with a [`FrameStore`][crate::frame_store::FrameStore].
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use tfchase_perception::transform::StampedTransform;
//! use tfchase_types::PlanarPose;
//!
//! let tf = StampedTransform::from_planar(
//!     "world",
//!     "turtle1",
//!     PlanarPose::new(5.5, 5.5, std::f64::consts::FRAC_PI_2),
//!     Utc::now(),
//! );
//! assert_eq!(tf.transform.translation.z, 0.0);
//! assert!((tf.transform.rotation.yaw() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
//! ```

use chrono::{DateTime, Utc};
use tfchase_types::PlanarPose;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A unit quaternion representing a 3-D rotation.
///
/// Constructed in (w, x, y, z) order; serialised message formats usually
/// list it as (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Static-axis roll/pitch/yaw (applied X, then Y, then Z) to quaternion.
    pub fn from_euler(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    /// Rotation about +Z only.
    pub fn from_yaw(yaw: f64) -> Self {
        Self::from_euler(0.0, 0.0, yaw)
    }

    /// Yaw angle in `(-π, π]`.
    pub fn yaw(self) -> f64 {
        let siny_cosp = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy_cosp = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny_cosp.atan2(cosy_cosp)
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: translation followed by rotation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// If `self` = T_A_B, return T_B_A.
    pub fn inverse(self) -> Self {
        let inv_rot = self.rotation.conjugate();
        Self::new(inv_rot.rotate(self.translation).neg(), inv_rot)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StampedTransform
// ────────────────────────────────────────────────────────────────────────────

/// A [`Transform3D`] from `parent_frame` to `child_frame`, observed at
/// `stamp`.  Created fresh for every observation and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedTransform {
    pub stamp: DateTime<Utc>,
    pub parent_frame: String,
    pub child_frame: String,
    pub transform: Transform3D,
}

impl StampedTransform {
    pub fn new(
        parent_frame: impl Into<String>,
        child_frame: impl Into<String>,
        transform: Transform3D,
        stamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stamp,
            parent_frame: parent_frame.into(),
            child_frame: child_frame.into(),
            transform,
        }
    }

    /// Lift a planar pose into 3-D: `(x, y, 0)` translation and a pure yaw
    /// rotation of `pose.heading`.
    pub fn from_planar(
        parent_frame: impl Into<String>,
        child_frame: impl Into<String>,
        pose: PlanarPose,
        stamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            parent_frame,
            child_frame,
            Transform3D::new(
                Vec3::new(pose.x, pose.y, 0.0),
                Quaternion::from_yaw(pose.heading),
            ),
            stamp,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
