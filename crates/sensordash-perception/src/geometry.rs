//! Pose geometry.
//!
//! Builds the oriented box mesh shown in the dashboard's 3-D panel.  A box
//! template centred at the origin is rotated by the Euler angles of an
//! [`OrientationEstimate`] and paired with a fixed triangle table.
//!
//! Rotation order is intrinsic yaw → roll → pitch:
//!
//! ```text
//! R = Rz(yaw) · Rx(roll) · Ry(pitch)
//! ```
//!
//! so pitch turns about the lateral (y) axis, roll about the longitudinal (x)
//! axis and yaw about the vertical (z) axis.
//!
//! # Example
//!
//! ```rust
//! use sensordash_perception::geometry::{build_pose_geometry, BoxDims};
//! use sensordash_perception::orientation::OrientationEstimate;
//!
//! let level = OrientationEstimate { pitch_deg: 0.0, roll_deg: 0.0, yaw_deg: 0.0 };
//! let dims = BoxDims::default();
//! let pose = build_pose_geometry(&level, dims);
//! assert_eq!(pose.vertices, BoxDims::default().template());
//! assert_eq!(pose.faces.len(), 12);
//! ```

use serde::{Deserialize, Serialize};

use crate::orientation::OrientationEstimate;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
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

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    /// Euclidean length.  Computed with `hypot` so components near the
    /// limits of `f64` neither overflow nor underflow when squared.
    pub fn norm(self) -> f64 {
        self.x.hypot(self.y).hypot(self.z)
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self::new(x, y, z)
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
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

    /// Rotation of `angle_rad` about the unit vector `axis`.
    pub fn from_axis_angle(axis: Vec3, angle_rad: f64) -> Self {
        let (s, c) = (angle_rad / 2.0).sin_cos();
        Self::new(c, axis.x * s, axis.y * s, axis.z * s)
    }

    /// Intrinsic yaw → roll → pitch rotation built from angles in degrees.
    pub fn from_euler_deg(estimate: &OrientationEstimate) -> Self {
        let yaw = Self::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), estimate.yaw_deg.to_radians());
        let roll = Self::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), estimate.roll_deg.to_radians());
        let pitch =
            Self::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), estimate.pitch_deg.to_radians());
        yaw.mul(roll).mul(pitch)
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
// Box template
// ────────────────────────────────────────────────────────────────────────────

/// Half-extents of the box drawn for the device.
///
/// The default is a phone-shaped slab: 0.2 wide, 0.4 tall, 0.05 deep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxDims {
    pub half_width: f64,
    pub half_height: f64,
    pub half_depth: f64,
}

impl Default for BoxDims {
    fn default() -> Self {
        Self::new(0.2, 0.4, 0.05)
    }
}

impl BoxDims {
    pub fn new(half_width: f64, half_height: f64, half_depth: f64) -> Self {
        Self {
            half_width,
            half_height,
            half_depth,
        }
    }

    /// The eight unrotated corners.
    ///
    /// Indices 0–3 walk the back face (z = −d) counter-clockwise seen from
    /// +z, indices 4–7 repeat the walk on the front face (z = +d).
    pub fn template(&self) -> [Vec3; 8] {
        let (w, h, d) = (self.half_width, self.half_height, self.half_depth);
        [
            Vec3::new(-w, -h, -d),
            Vec3::new(w, -h, -d),
            Vec3::new(w, h, -d),
            Vec3::new(-w, h, -d),
            Vec3::new(-w, -h, d),
            Vec3::new(w, -h, d),
            Vec3::new(w, h, d),
            Vec3::new(-w, h, d),
        ]
    }
}

/// Triangle table over [`BoxDims::template`] indices.
///
/// Two triangles per face, sharing one diagonal, wound counter-clockwise when
/// seen from outside.
pub const BOX_FACES: [[usize; 3]; 12] = [
    // z = −d
    [0, 2, 1],
    [0, 3, 2],
    // z = +d
    [4, 5, 6],
    [4, 6, 7],
    // y = −h
    [0, 1, 5],
    [0, 5, 4],
    // y = +h
    [3, 7, 6],
    [3, 6, 2],
    // x = −w
    [0, 4, 7],
    [0, 7, 3],
    // x = +w
    [1, 2, 6],
    [1, 6, 5],
];

// ────────────────────────────────────────────────────────────────────────────
// PoseGeometry
// ────────────────────────────────────────────────────────────────────────────

/// The rotated box mesh for one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseGeometry {
    pub vertices: [Vec3; 8],
    pub faces: [[usize; 3]; 12],
}

impl PoseGeometry {
    /// Unnormalised normal of triangle `face` (right-hand rule over its
    /// winding).
    pub fn face_normal(&self, face: usize) -> Vec3 {
        let [a, b, c] = self.faces[face];
        let (a, b, c) = (self.vertices[a], self.vertices[b], self.vertices[c]);
        b.sub(a).cross(c.sub(a))
    }
}

/// Rotate the box template described by `dims` into the pose `estimate`.
pub fn build_pose_geometry(estimate: &OrientationEstimate, dims: BoxDims) -> PoseGeometry {
    let rotation = Quaternion::from_euler_deg(estimate);
    PoseGeometry {
        vertices: dims.template().map(|v| rotation.rotate(v)),
        faces: BOX_FACES,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
