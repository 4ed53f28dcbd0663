//! `sensordash-runtime` – the refresh pipeline.
//!
//! # Modules
//!
//! - [`scheduler`] – [`RefreshScheduler`][scheduler::RefreshScheduler]: the
//!   fixed-interval tick that fetches the latest sample window, estimates the
//!   device pose and publishes a rendered frame.  At most one refresh is in
//!   flight; ticks that arrive meanwhile are dropped.
//! - [`render`] – [`render_frame`][render::render_frame]: turns a sample
//!   window and an optional pose into the four dashboard panels.
//! - [`bus`] – [`FrameBus`][bus::FrameBus]: broadcast fan-out of rendered
//!   frames plus a snapshot of the latest one.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.

pub mod bus;
pub mod render;
pub mod scheduler;
pub mod telemetry;

pub use bus::FrameBus;
pub use render::{DashboardFrame, OrientationStatus, Pose, PoseOutcome, render_frame};
pub use scheduler::{RefreshScheduler, RefreshState, SchedulerConfig, TickOutcome, TickReport, estimate_pose};
pub use telemetry::{TracerProviderGuard, init_tracing};
