//! Visualization renderer.
//!
//! Converts one [`SampleWindow`] and the pose estimated from its newest
//! sample into a [`DashboardFrame`]: a serialisable description of the four
//! dashboard panels (acceleration lines, gyroscope lines, 3-D pose mesh, GPS
//! map).  The browser only has to hand each panel to its plotting library.
//!
//! Rendering never fails.  An empty window gives four empty panels, and a
//! missing pose gives an empty orientation panel whose
//! [`OrientationStatus`] says why.

use chrono::{DateTime, Utc};
use sensordash_perception::{OrientationEstimate, PoseGeometry};
use sensordash_types::{Sample, SampleWindow};
use serde::Serialize;
use uuid::Uuid;

/// Axis range of the 3-D scene, wide enough for any rotation of the default
/// box.
const SCENE_RANGE: [f64; 2] = [-1.0, 1.0];

/// Initial zoom level of the GPS map.
const MAP_ZOOM: u8 = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Pose input
// ─────────────────────────────────────────────────────────────────────────────

/// Estimated attitude together with the mesh built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub estimate: OrientationEstimate,
    pub geometry: PoseGeometry,
}

/// Result of the orientation step of one refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum PoseOutcome {
    Estimated(Pose),
    /// The window was empty.
    NoData,
    /// The newest sample lacks an acceleration or magnetometer axis.
    IncompleteSample,
    /// The newest sample had a zero-length acceleration or magnetic vector.
    DegenerateVector,
}

impl PoseOutcome {
    pub fn status(&self) -> OrientationStatus {
        match self {
            PoseOutcome::Estimated(_) => OrientationStatus::Estimated,
            PoseOutcome::NoData => OrientationStatus::NoData,
            PoseOutcome::IncompleteSample => OrientationStatus::IncompleteSample,
            PoseOutcome::DegenerateVector => OrientationStatus::DegenerateVector,
        }
    }

    pub fn pose(&self) -> Option<&Pose> {
        match self {
            PoseOutcome::Estimated(pose) => Some(pose),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Panels
// ─────────────────────────────────────────────────────────────────────────────

/// One named line of a [`LineChart`]; `None` marks a gap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Multi-axis time series, oldest point first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineChart {
    pub title: String,
    pub timestamps: Vec<DateTime<Utc>>,
    pub series: Vec<Series>,
}

impl LineChart {
    fn from_window(
        title: &str,
        window: &SampleWindow,
        axes: [(&str, fn(&Sample) -> Option<f64>); 3],
    ) -> Self {
        let timestamps = window.chronological().map(|s| s.timestamp).collect();
        let series = axes
            .iter()
            .map(|(name, field)| Series {
                name: (*name).to_string(),
                values: window.chronological().map(field).collect(),
            })
            .collect();
        Self {
            title: title.to_string(),
            timestamps,
            series,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Triangle mesh in the column layout plotting libraries expect: vertex
/// coordinates in `x`/`y`/`z`, triangle corner indices in `i`/`j`/`k`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshSpec {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub i: Vec<usize>,
    pub j: Vec<usize>,
    pub k: Vec<usize>,
}

impl From<&PoseGeometry> for MeshSpec {
    fn from(geometry: &PoseGeometry) -> Self {
        Self {
            x: geometry.vertices.iter().map(|v| v.x).collect(),
            y: geometry.vertices.iter().map(|v| v.y).collect(),
            z: geometry.vertices.iter().map(|v| v.z).collect(),
            i: geometry.faces.iter().map(|f| f[0]).collect(),
            j: geometry.faces.iter().map(|f| f[1]).collect(),
            k: geometry.faces.iter().map(|f| f[2]).collect(),
        }
    }
}

/// Why the orientation panel does or does not carry a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationStatus {
    Estimated,
    NoData,
    IncompleteSample,
    DegenerateVector,
}

/// The 3-D device pose panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrientationPanel {
    pub title: String,
    pub status: OrientationStatus,
    pub estimate: Option<OrientationEstimate>,
    pub mesh: Option<MeshSpec>,
    pub axis_range: [f64; 2],
}

impl OrientationPanel {
    pub fn is_empty(&self) -> bool {
        self.mesh.is_none()
    }
}

/// One GPS fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}

/// Scatter of GPS fixes on an OpenStreetMap base layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPanel {
    pub title: String,
    pub points: Vec<GeoPoint>,
    pub zoom: u8,
    pub style: String,
}

impl MapPanel {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Everything the dashboard draws for one refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardFrame {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Number of samples the frame was rendered from.
    pub window_len: usize,
    pub acceleration: LineChart,
    pub gyroscope: LineChart,
    pub orientation: OrientationPanel,
    pub gps: MapPanel,
}

impl DashboardFrame {
    /// The frame shown before any data has arrived.
    pub fn empty() -> Self {
        render_frame(&SampleWindow::empty(), &PoseOutcome::NoData)
    }

    /// `true` when all four panels are empty.
    pub fn is_empty(&self) -> bool {
        self.acceleration.is_empty()
            && self.gyroscope.is_empty()
            && self.orientation.is_empty()
            && self.gps.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

/// Build the four dashboard panels from `window` and the orientation
/// `outcome` of its newest sample.
pub fn render_frame(window: &SampleWindow, outcome: &PoseOutcome) -> DashboardFrame {
    let acceleration = LineChart::from_window(
        "Acceleration (X, Y, Z)",
        window,
        [("accX", |s| s.acc_x), ("accY", |s| s.acc_y), ("accZ", |s| s.acc_z)],
    );
    let gyroscope = LineChart::from_window(
        "Gyroscope (X, Y, Z)",
        window,
        [("gyroX", |s| s.gyro_x), ("gyroY", |s| s.gyro_y), ("gyroZ", |s| s.gyro_z)],
    );

    let pose = outcome.pose();
    let orientation = OrientationPanel {
        title: "3D Phone Orientation Block".to_string(),
        status: outcome.status(),
        estimate: pose.map(|p| p.estimate),
        mesh: pose.map(|p| MeshSpec::from(&p.geometry)),
        axis_range: SCENE_RANGE,
    };

    let gps = MapPanel {
        title: "Phone GPS Location".to_string(),
        points: window
            .chronological()
            .filter_map(|s| {
                let (lat, lon) = s.gps()?;
                Some(GeoPoint {
                    lat,
                    lon,
                    timestamp: s.timestamp,
                })
            })
            .collect(),
        zoom: MAP_ZOOM,
        style: "open-street-map".to_string(),
    };

    DashboardFrame {
        id: Uuid::new_v4(),
        generated_at: Utc::now(),
        window_len: window.len(),
        acceleration,
        gyroscope,
        orientation,
        gps,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
