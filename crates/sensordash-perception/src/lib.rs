//! `sensordash-perception` – turns one raw motion sample into a device pose.
//!
//! # Modules
//!
//! - [`orientation`] – [`estimate_orientation`][orientation::estimate_orientation]:
//!   a stateless tilt-compensated compass mapping acceleration + magnetic
//!   field to pitch/roll/yaw.
//! - [`geometry`] – [`Vec3`][geometry::Vec3], [`Quaternion`][geometry::Quaternion]
//!   and [`build_pose_geometry`][geometry::build_pose_geometry], which rotates
//!   a box template into the 12-triangle mesh drawn by the dashboard.

pub mod geometry;
pub mod orientation;

pub use geometry::{BoxDims, PoseGeometry, Quaternion, Vec3, build_pose_geometry};
pub use orientation::{DegenerateVectorError, OrientationEstimate, SensorVector, estimate_orientation};
