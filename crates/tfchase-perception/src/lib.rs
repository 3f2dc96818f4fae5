//! `tfchase-perception` – frames and transforms.
//!
//! Turns planar agent poses into rigid 3-D transforms and answers "where is
//! frame B as seen from frame A" questions.
//!
//! # Modules
//!
//! - [`transform`] – [`Vec3`][transform::Vec3], [`Quaternion`][transform::Quaternion],
//!   [`Transform3D`][transform::Transform3D] and the timestamped
//!   [`StampedTransform`][transform::StampedTransform] exchanged with a frame
//!   store.
//! - [`frame_store`] – the [`FrameStore`][frame_store::FrameStore] capability
//!   trait and [`TfBuffer`][frame_store::TfBuffer], an in-memory tree of the
//!   latest transform per frame.

pub mod frame_store;
pub mod transform;

pub use frame_store::{FrameStore, TfBuffer};
pub use transform::{Quaternion, StampedTransform, Transform3D, Vec3};
