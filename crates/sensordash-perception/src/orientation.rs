//! Tilt-compensated compass.
//!
//! Maps a single accelerometer + magnetometer reading to Euler angles.  No
//! state is carried between calls and no filtering across time happens.
//!
//! ```text
//! a, m    = acc / |acc|, mag / |mag|
//! pitch   = asin(−a.x)
//! roll    = atan2(a.y, a.z)
//! mx_h    = m.x·cos(pitch) + m.z·sin(pitch)
//! my_h    = m.x·sin(roll)·sin(pitch) + m.y·cos(roll) − m.z·sin(roll)·cos(pitch)
//! yaw     = atan2(−my_h, mx_h)
//! ```
//!
//! The formulas above are the contract; they are not a textbook aerospace
//! convention and should not be "corrected" towards one.
//!
//! Near pitch = ±90° roll loses meaning (gimbal lock).  Results stay finite
//! there but carry little information.
//!
//! # Example
//!
//! ```rust
//! use sensordash_perception::{estimate_orientation, Vec3};
//!
//! let level = estimate_orientation(Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0)).unwrap();
//! assert!(level.pitch_deg.abs() < 1e-9);
//! assert!(level.roll_deg.abs() < 1e-9);
//! assert!(level.yaw_deg.abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::geometry::Vec3;

/// Pitch magnitude beyond which roll is reported as unreliable in traces.
const GIMBAL_LOCK_WARN_DEG: f64 = 89.0;

/// Which input vector was unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorVector {
    Acceleration,
    MagneticField,
}

impl std::fmt::Display for SensorVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorVector::Acceleration => write!(f, "acceleration"),
            SensorVector::MagneticField => write!(f, "magnetic field"),
        }
    }
}

/// An input vector had zero (or non-finite) length and cannot be normalised.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("degenerate {vector} vector (norm = {norm})")]
pub struct DegenerateVectorError {
    pub vector: SensorVector,
    pub norm: f64,
}

/// Device attitude in degrees.
///
/// `pitch_deg` ∈ [−90, 90], `roll_deg` ∈ (−180, 180], `yaw_deg` ∈ (−180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationEstimate {
    pub pitch_deg: f64,
    pub roll_deg: f64,
    pub yaw_deg: f64,
}

fn normalize(v: Vec3, vector: SensorVector) -> Result<Vec3, DegenerateVectorError> {
    let norm = v.norm();
    if norm > 0.0 && norm.is_finite() {
        // Divide rather than multiply by 1/norm: a subnormal norm has no
        // finite reciprocal.
        Ok(Vec3::new(v.x / norm, v.y / norm, v.z / norm))
    } else {
        Err(DegenerateVectorError { vector, norm })
    }
}

/// Fold `atan2`'s −180° onto +180° so the range is (−180, 180].
fn half_open_deg(angle_deg: f64) -> f64 {
    if angle_deg <= -180.0 {
        angle_deg + 360.0
    } else {
        angle_deg
    }
}

/// Estimate pitch, roll and yaw from one acceleration and one magnetic-field
/// reading.
///
/// # Errors
///
/// Returns [`DegenerateVectorError`] when either vector has zero or
/// non-finite length; no NaN angles are ever produced.
pub fn estimate_orientation(acc: Vec3, mag: Vec3) -> Result<OrientationEstimate, DegenerateVectorError> {
    let a = normalize(acc, SensorVector::Acceleration)?;
    let m = normalize(mag, SensorVector::MagneticField)?;

    // Rounding after normalisation can push |a.x| a hair past 1.
    let pitch = (-a.x).clamp(-1.0, 1.0).asin();
    let roll = a.y.atan2(a.z);

    let (sin_p, cos_p) = pitch.sin_cos();
    let (sin_r, cos_r) = roll.sin_cos();
    let mag_x_comp = m.x * cos_p + m.z * sin_p;
    let mag_y_comp = m.x * sin_r * sin_p + m.y * cos_r - m.z * sin_r * cos_p;
    let yaw = (-mag_y_comp).atan2(mag_x_comp);

    let estimate = OrientationEstimate {
        pitch_deg: pitch.to_degrees(),
        roll_deg: half_open_deg(roll.to_degrees()),
        yaw_deg: half_open_deg(yaw.to_degrees()),
    };
    if estimate.pitch_deg.abs() > GIMBAL_LOCK_WARN_DEG {
        trace!(pitch_deg = estimate.pitch_deg, "pitch near ±90°; roll is unreliable");
    }
    Ok(estimate)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Inverse of the fusion model: build (acc, mag) that must yield the
    /// given angles.  `dip` adds a vertical field component, which the
    /// estimator has to ignore.
    fn synthesize(pitch_deg: f64, roll_deg: f64, yaw_deg: f64, dip: f64) -> (Vec3, Vec3) {
        let (p, r, y) = (pitch_deg.to_radians(), roll_deg.to_radians(), yaw_deg.to_radians());
        let (sin_p, cos_p) = p.sin_cos();
        let (sin_r, cos_r) = r.sin_cos();
        let acc = Vec3::new(-sin_p, cos_p * sin_r, cos_p * cos_r);
        // Rows of the tilt-compensation matrix; orthonormal, so the transpose
        // maps a horizontal field back into the device frame.
        let row_x = Vec3::new(cos_p, 0.0, sin_p);
        let row_y = Vec3::new(sin_r * sin_p, cos_r, -sin_r * cos_p);
        let row_z = row_x.cross(row_y);
        let mag = row_x
            .scale(y.cos())
            .add(row_y.scale(-y.sin()))
            .add(row_z.scale(dip));
        (acc, mag)
    }

    fn angle_diff(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    #[test]
    fn level_device_pointing_north_is_zero() {
        let e = estimate_orientation(Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(e.pitch_deg, 0.0);
        assert_eq!(e.roll_deg, 0.0);
        assert!(e.yaw_deg.abs() < 1e-12);
    }

    #[test]
    fn nose_down_45_degrees() {
        let e = estimate_orientation(Vec3::new(-0.70711, 0.0, 0.70711), Vec3::new(1.0, 0.0, 0.0))
            .unwrap();
        assert!((e.pitch_deg - 45.0).abs() < 1e-9, "pitch = {}", e.pitch_deg);
        assert!(e.roll_deg.abs() < 1e-9);
        assert!(e.yaw_deg.abs() < 1e-9);
    }

    #[test]
    fn unnormalised_inputs_give_same_angles() {
        let unit = estimate_orientation(Vec3::new(0.1, 0.3, 0.9), Vec3::new(0.4, -0.2, 0.5)).unwrap();
        let scaled =
            estimate_orientation(Vec3::new(1.0, 3.0, 9.0), Vec3::new(40.0, -20.0, 50.0)).unwrap();
        assert!((unit.pitch_deg - scaled.pitch_deg).abs() < 1e-9);
        assert!((unit.roll_deg - scaled.roll_deg).abs() < 1e-9);
        assert!((unit.yaw_deg - scaled.yaw_deg).abs() < 1e-9);
    }

    #[test]
    fn zero_acceleration_is_degenerate() {
        let err = estimate_orientation(Vec3::zero(), Vec3::new(1.0, 0.0, 0.0)).unwrap_err();
        assert_eq!(err.vector, SensorVector::Acceleration);
        assert_eq!(err.norm, 0.0);
    }

    #[test]
    fn zero_magnetic_field_is_degenerate() {
        let err = estimate_orientation(Vec3::new(0.0, 0.0, 9.81), Vec3::zero()).unwrap_err();
        assert_eq!(err.vector, SensorVector::MagneticField);
        assert!(err.to_string().contains("magnetic field"));
    }

    #[test]
    fn non_finite_input_is_degenerate() {
        let err =
            estimate_orientation(Vec3::new(f64::NAN, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0)).unwrap_err();
        assert_eq!(err.vector, SensorVector::Acceleration);
        assert!(
            estimate_orientation(Vec3::new(0.0, 0.0, 1.0), Vec3::new(f64::INFINITY, 0.0, 0.0))
                .is_err()
        );
    }

    #[test]
    fn extreme_but_finite_magnitudes_are_accepted() {
        let north = Vec3::new(1.0, 0.0, 0.0);
        for az in [1e200, 1e-170, f64::MAX, 1e-320] {
            let e = estimate_orientation(Vec3::new(0.0, 0.0, az), north)
                .unwrap_or_else(|err| panic!("az = {az}: {err}"));
            assert_eq!(e.pitch_deg, 0.0, "az = {az}");
            assert_eq!(e.roll_deg, 0.0, "az = {az}");
            assert!(e.yaw_deg.abs() < 1e-12, "az = {az}");
        }
        let e = estimate_orientation(Vec3::new(0.0, 0.0, 9.81), Vec3::new(1e-300, 0.0, 1e-300))
            .unwrap();
        assert!((e.yaw_deg).abs() < 1e-9);
    }

    #[test]
    fn upside_down_roll_is_plus_180() {
        // atan2(−0, −1) is −180°, which must fold onto +180°.
        let e = estimate_orientation(Vec3::new(0.0, -0.0, -1.0), Vec3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(e.roll_deg, 180.0);
    }

    #[test]
    fn vertical_device_stays_finite() {
        let e = estimate_orientation(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.3, 0.5, 0.8)).unwrap();
        assert!((e.pitch_deg - 90.0).abs() < 1e-9);
        assert!(e.roll_deg.is_finite());
        assert!(e.yaw_deg.is_finite());
    }

    #[test]
    fn angles_stay_within_ranges() {
        let axis = [-1.0, -0.5, -1e-9, 0.0, 1e-9, 0.5, 1.0];
        for &ax in &axis {
            for &ay in &axis {
                for &az in &axis {
                    for &(mx, my, mz) in &[(1.0, 0.0, 0.0), (-1.0, -0.0, 0.2), (0.1, -0.9, -0.4)] {
                        let acc = Vec3::new(ax, ay, az);
                        if acc.norm() == 0.0 {
                            continue;
                        }
                        let e = estimate_orientation(acc, Vec3::new(mx, my, mz)).unwrap();
                        assert!((-90.0..=90.0).contains(&e.pitch_deg), "{e:?}");
                        assert!(e.roll_deg > -180.0 && e.roll_deg <= 180.0, "{e:?}");
                        assert!(e.yaw_deg > -180.0 && e.yaw_deg <= 180.0, "{e:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn synthesized_readings_round_trip() {
        for pitch in [-80.0, -45.0, -10.0, 0.0, 12.5, 60.0, 85.0] {
            for roll in [-170.0, -90.0, -30.0, 0.0, 45.0, 120.0, 179.0] {
                for yaw in [-175.0, -100.0, -5.0, 0.0, 33.0, 90.0, 160.0] {
                    for dip in [0.0, 0.8, -1.5] {
                        let (acc, mag) = synthesize(pitch, roll, yaw, dip);
                        let e = estimate_orientation(acc, mag).unwrap();
                        assert!(angle_diff(e.pitch_deg, pitch) < 1e-6, "pitch {pitch} -> {e:?}");
                        assert!(angle_diff(e.roll_deg, roll) < 1e-6, "roll {roll} -> {e:?}");
                        assert!(angle_diff(e.yaw_deg, yaw) < 1e-6, "yaw {yaw} -> {e:?}");
                    }
                }
            }
        }
    }
}
