//! `sensordash-types` – shared vocabulary of the SensorDash workspace.
//!
//! - [`Sample`]: one motion reading posted by a device (accelerometer,
//!   gyroscope, magnetometer, GPS).  Every sensor field is optional so that a
//!   partially filled reading is still chartable.
//! - [`SampleWindow`]: the newest-first slice of samples fetched for one
//!   dashboard refresh.
//! - [`IngestionError`] / [`SensorError`]: error types shared across crates.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A POSTed sample document could not be accepted.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("malformed sample document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("sample has an empty user identifier")]
    MissingUser,

    #[error("field {field} is not a finite number")]
    NonFinite { field: &'static str },

    #[error("unrecognised timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Process-level error type spanning server, configuration and store
/// start-up failures.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Bind error on {addr}: {details}")]
    Bind { addr: String, details: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sample store unavailable: {0}")]
    Store(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamps
// ─────────────────────────────────────────────────────────────────────────────

/// Parse an ISO-8601 timestamp.
///
/// RFC 3339 strings keep their offset (converted to UTC).  Naive strings such
/// as `2024-05-01T12:00:00.123456`, which is what the device poller emits,
/// are taken to be UTC already.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, IngestionError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| IngestionError::InvalidTimestamp(raw.to_string()))
}

/// Canonical textual form used on the wire and in the store.
///
/// Fixed-width microsecond precision with a `Z` suffix, so lexical order
/// equals chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

mod timestamp_format {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sample
// ─────────────────────────────────────────────────────────────────────────────

/// One motion reading as posted by a device.
///
/// Field names on the wire follow the phyphox buffer names (`accX`, `magZ`,
/// `gpsLat`, …).  `null` and absent values both mean "not measured".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Identifier of the user/device that produced the sample.
    #[serde(rename = "user", alias = "userId")]
    pub user_id: String,
    /// Wall-clock time at which the sample was assembled (UTC).
    #[serde(with = "timestamp_format")]
    pub timestamp: DateTime<Utc>,
    /// Device-side accelerometer clock, in seconds since the experiment start.
    #[serde(default)]
    pub acc_time: Option<f64>,

    #[serde(rename = "accX", default)]
    pub acc_x: Option<f64>,
    #[serde(rename = "accY", default)]
    pub acc_y: Option<f64>,
    #[serde(rename = "accZ", default)]
    pub acc_z: Option<f64>,

    #[serde(rename = "gyroX", default)]
    pub gyro_x: Option<f64>,
    #[serde(rename = "gyroY", default)]
    pub gyro_y: Option<f64>,
    #[serde(rename = "gyroZ", default)]
    pub gyro_z: Option<f64>,

    #[serde(rename = "magX", default)]
    pub mag_x: Option<f64>,
    #[serde(rename = "magY", default)]
    pub mag_y: Option<f64>,
    #[serde(rename = "magZ", default)]
    pub mag_z: Option<f64>,

    #[serde(rename = "gpsLat", default)]
    pub gps_lat: Option<f64>,
    #[serde(rename = "gpsLon", default)]
    pub gps_lon: Option<f64>,
}

fn triple(x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Option<[f64; 3]> {
    Some([x?, y?, z?])
}

impl Sample {
    /// Create a sample for `user_id` at `timestamp` with no sensor values.
    pub fn new(user_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp,
            acc_time: None,
            acc_x: None,
            acc_y: None,
            acc_z: None,
            gyro_x: None,
            gyro_y: None,
            gyro_z: None,
            mag_x: None,
            mag_y: None,
            mag_z: None,
            gps_lat: None,
            gps_lon: None,
        }
    }

    /// Builder-style setter for the three acceleration axes.
    pub fn with_acceleration(mut self, [x, y, z]: [f64; 3]) -> Self {
        (self.acc_x, self.acc_y, self.acc_z) = (Some(x), Some(y), Some(z));
        self
    }

    /// Builder-style setter for the three gyroscope axes.
    pub fn with_gyroscope(mut self, [x, y, z]: [f64; 3]) -> Self {
        (self.gyro_x, self.gyro_y, self.gyro_z) = (Some(x), Some(y), Some(z));
        self
    }

    /// Builder-style setter for the three magnetometer axes.
    pub fn with_magnetic_field(mut self, [x, y, z]: [f64; 3]) -> Self {
        (self.mag_x, self.mag_y, self.mag_z) = (Some(x), Some(y), Some(z));
        self
    }

    /// Builder-style setter for the GPS fix.
    pub fn with_gps(mut self, lat: f64, lon: f64) -> Self {
        (self.gps_lat, self.gps_lon) = (Some(lat), Some(lon));
        self
    }

    /// The acceleration vector, if all three axes were measured.
    pub fn acceleration(&self) -> Option<[f64; 3]> {
        triple(self.acc_x, self.acc_y, self.acc_z)
    }

    /// The angular-rate vector, if all three axes were measured.
    pub fn gyroscope(&self) -> Option<[f64; 3]> {
        triple(self.gyro_x, self.gyro_y, self.gyro_z)
    }

    /// The magnetic-field vector, if all three axes were measured.
    pub fn magnetic_field(&self) -> Option<[f64; 3]> {
        triple(self.mag_x, self.mag_y, self.mag_z)
    }

    /// `(latitude, longitude)` when both coordinates are present.
    pub fn gps(&self) -> Option<(f64, f64)> {
        Some((self.gps_lat?, self.gps_lon?))
    }

    /// The `(acceleration, magnetic field)` pair needed for orientation.
    ///
    /// Returns `None` for an incomplete sample; such a sample is still
    /// usable for charting the fields it does carry.
    pub fn orientation_inputs(&self) -> Option<([f64; 3], [f64; 3])> {
        Some((self.acceleration()?, self.magnetic_field()?))
    }

    /// Check the invariants the store relies on.
    pub fn validate(&self) -> Result<(), IngestionError> {
        if self.user_id.trim().is_empty() {
            return Err(IngestionError::MissingUser);
        }
        let fields = [
            ("acc_time", self.acc_time),
            ("accX", self.acc_x),
            ("accY", self.acc_y),
            ("accZ", self.acc_z),
            ("gyroX", self.gyro_x),
            ("gyroY", self.gyro_y),
            ("gyroZ", self.gyro_z),
            ("magX", self.mag_x),
            ("magY", self.mag_y),
            ("magZ", self.mag_z),
            ("gpsLat", self.gps_lat),
            ("gpsLon", self.gps_lon),
        ];
        for (field, value) in fields {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(IngestionError::NonFinite { field });
            }
        }
        Ok(())
    }

    /// Decode and validate one JSON sample document.
    pub fn from_json(body: &[u8]) -> Result<Self, IngestionError> {
        let sample: Sample = serde_json::from_slice(body)?;
        sample.validate()?;
        Ok(sample)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SampleWindow
// ─────────────────────────────────────────────────────────────────────────────

/// The most recent samples fetched for one refresh, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleWindow {
    samples: Vec<Sample>,
}

impl SampleWindow {
    /// Wrap `samples`, re-establishing newest-first order if needed.
    ///
    /// The sort is stable, so samples sharing a timestamp keep the order the
    /// store returned them in.
    pub fn new(mut samples: Vec<Sample>) -> Self {
        if !samples.is_sorted_by(|a, b| a.timestamp >= b.timestamp) {
            samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
        Self { samples }
    }

    /// A window with no samples.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The freshest sample, if any.
    pub fn newest(&self) -> Option<&Sample> {
        self.samples.first()
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Iterate oldest first, the order charts are drawn in.
    pub fn chronological(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().rev()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_564_800 + secs, 0).unwrap()
    }

    #[test]
    fn decodes_poller_payload_with_nulls() {
        let body = br#"{
            "user": "alice",
            "timestamp": "2024-05-01T12:00:00.250000",
            "acc_time": 12.5,
            "magX": 21.0, "magY": -3.5, "magZ": 40.0,
            "accX": 0.1, "accY": 0.2, "accZ": 9.7,
            "gyroX": null, "gyroY": null, "gyroZ": null,
            "gpsLat": null, "gpsLon": null
        }"#;
        let sample = Sample::from_json(body).unwrap();
        assert_eq!(sample.user_id, "alice");
        assert_eq!(format_timestamp(&sample.timestamp), "2024-05-01T12:00:00.250000Z");
        assert_eq!(sample.acceleration(), Some([0.1, 0.2, 9.7]));
        assert_eq!(sample.gyroscope(), None);
        assert_eq!(sample.gps(), None);
        assert!(sample.orientation_inputs().is_some());
    }

    #[test]
    fn accepts_user_id_alias_and_missing_fields() {
        let body = br#"{"userId": "bob", "timestamp": "2024-05-01T12:00:00Z", "accX": 1.0}"#;
        let sample = Sample::from_json(body).unwrap();
        assert_eq!(sample.user_id, "bob");
        assert_eq!(sample.acc_x, Some(1.0));
        assert_eq!(sample.acceleration(), None);
        assert!(sample.orientation_inputs().is_none());
    }

    #[test]
    fn rfc3339_offset_is_converted_to_utc() {
        let ts = parse_timestamp("2024-05-01T14:00:00+02:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-05-01T12:00:00.000000Z");
    }

    #[test]
    fn naive_timestamp_without_fraction_parses() {
        let ts = parse_timestamp("2024-05-01T12:00:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(IngestionError::InvalidTimestamp(_))
        ));
        let body = br#"{"user": "a", "timestamp": "yesterday"}"#;
        assert!(matches!(Sample::from_json(body), Err(IngestionError::Malformed(_))));
    }

    #[test]
    fn missing_timestamp_is_malformed() {
        let body = br#"{"user": "a", "accX": 1.0}"#;
        assert!(matches!(Sample::from_json(body), Err(IngestionError::Malformed(_))));
    }

    #[test]
    fn empty_user_is_rejected() {
        let body = br#"{"user": "  ", "timestamp": "2024-05-01T12:00:00Z"}"#;
        assert!(matches!(Sample::from_json(body), Err(IngestionError::MissingUser)));
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let sample = Sample::new("a", at(0)).with_magnetic_field([1.0, f64::NAN, 0.0]);
        assert!(matches!(
            sample.validate(),
            Err(IngestionError::NonFinite { field: "magY" })
        ));
    }

    #[test]
    fn serialises_with_device_field_names() {
        let sample = Sample::new("alice", at(0)).with_gps(51.5, -0.12);
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["user"], "alice");
        assert_eq!(json["gpsLat"], 51.5);
        assert!(json["accX"].is_null());
    }

    #[test]
    fn window_orders_newest_first() {
        let window = SampleWindow::new(vec![
            Sample::new("a", at(1)),
            Sample::new("a", at(3)),
            Sample::new("a", at(2)),
        ]);
        let order: Vec<_> = window.iter().map(|s| s.timestamp).collect();
        assert_eq!(order, vec![at(3), at(2), at(1)]);
        assert_eq!(window.newest().unwrap().timestamp, at(3));
        let chrono_order: Vec<_> = window.chronological().map(|s| s.timestamp).collect();
        assert_eq!(chrono_order, vec![at(1), at(2), at(3)]);
    }

    #[test]
    fn empty_window_has_no_newest() {
        let window = SampleWindow::empty();
        assert!(window.is_empty());
        assert_eq!(window.len(), 0);
        assert!(window.newest().is_none());
    }

    #[test]
    fn sensor_error_display() {
        let err = SensorError::Bind {
            addr: "0.0.0.0:8080".to_string(),
            details: "address in use".to_string(),
        };
        assert!(err.to_string().contains("0.0.0.0:8080"));
    }
}
