//! [`RefreshScheduler`] – the periodic refresh pipeline.
//!
//! Each tick:
//!
//! 1. **Fetch** – read the newest `window_size` samples from the
//!    [`SampleStore`], bounded by `query_timeout`.  A failed or timed-out
//!    query is logged and treated as an empty window.
//! 2. **Estimate** – take the newest sample of the window and, if it carries
//!    all acceleration and magnetometer axes, estimate its orientation and
//!    build the pose mesh.  A degenerate vector skips the pose for this tick.
//! 3. **Render** – build a [`DashboardFrame`] from the whole window and the
//!    pose outcome.
//! 4. **Publish** – hand the frame to the [`FrameBus`].
//!
//! # Exclusion
//!
//! The scheduler is either [`RefreshState::Idle`] or
//! [`RefreshState::Refreshing`].  A tick that arrives while a refresh is in
//! flight is dropped, never queued, so a slow store cannot build a backlog.
//! Nothing computed in one tick is carried into the next.
//!
//! The query timeout only abandons the await.  A store whose read runs on a
//! blocking thread may still be busy with it on the next tick; such a store
//! answers [`StoreError::Busy`] at once and that tick renders an empty
//! window like any other failed query.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sensordash_runtime::{FrameBus, RefreshScheduler, SchedulerConfig};
//! use sensordash_store::SqliteSampleStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(SqliteSampleStore::open_in_memory().unwrap());
//!     let scheduler = Arc::new(RefreshScheduler::new(store, FrameBus::default(), SchedulerConfig::default()));
//!     let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//!     scheduler.run(stop_rx).await;
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sensordash_perception::{BoxDims, build_pose_geometry, estimate_orientation};
use sensordash_store::{SampleStore, StoreError};
use sensordash_types::SampleWindow;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bus::FrameBus;
use crate::render::{DashboardFrame, OrientationStatus, Pose, PoseOutcome, render_frame};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for [`RefreshScheduler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Period of the refresh timer.
    pub interval: Duration,
    /// Maximum number of samples fetched per tick.
    pub window_size: usize,
    /// Upper bound on one store query.
    pub query_timeout: Duration,
    /// Half-extents of the pose box.
    pub box_dims: BoxDims,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            window_size: 100,
            query_timeout: Duration::from_secs(3),
            box_dims: BoxDims::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tick results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// What one completed refresh did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub window_len: usize,
    /// The store query failed or timed out; the frame was rendered empty.
    pub query_failed: bool,
    pub orientation: OrientationStatus,
    pub frame: Arc<DashboardFrame>,
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// A refresh was already in flight; this tick did nothing.
    Skipped,
    Completed(TickReport),
}

/// Resets the exclusion flag when a refresh finishes or is cancelled.
struct RefreshingGuard<'a>(&'a AtomicBool);

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orientation step
// ─────────────────────────────────────────────────────────────────────────────

/// Estimate the pose of the newest sample in `window`.
pub fn estimate_pose(window: &SampleWindow, box_dims: BoxDims) -> PoseOutcome {
    let Some(newest) = window.newest() else {
        return PoseOutcome::NoData;
    };
    let Some((acc, mag)) = newest.orientation_inputs() else {
        debug!(timestamp = %newest.timestamp, "newest sample incomplete; orientation skipped");
        return PoseOutcome::IncompleteSample;
    };
    match estimate_orientation(acc.into(), mag.into()) {
        Ok(estimate) => PoseOutcome::Estimated(Pose {
            estimate,
            geometry: build_pose_geometry(&estimate, box_dims),
        }),
        Err(e) => {
            warn!(error = %e, timestamp = %newest.timestamp, "orientation skipped this tick");
            PoseOutcome::DegenerateVector
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RefreshScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Drives the fetch → estimate → render → publish cycle.
///
/// Call [`tick`][Self::tick] to run one refresh by hand, or
/// [`run`][Self::run] to drive it from a fixed-interval timer until
/// shutdown.
pub struct RefreshScheduler {
    store: Arc<dyn SampleStore>,
    bus: FrameBus,
    config: SchedulerConfig,
    refreshing: AtomicBool,
}

impl RefreshScheduler {
    pub fn new(store: Arc<dyn SampleStore>, bus: FrameBus, config: SchedulerConfig) -> Self {
        Self {
            store,
            bus,
            config,
            refreshing: AtomicBool::new(false),
        }
    }

    /// Return a clone of the [`FrameBus`] frames are published on.
    pub fn bus(&self) -> FrameBus {
        self.bus.clone()
    }

    pub fn state(&self) -> RefreshState {
        if self.refreshing.load(Ordering::Acquire) {
            RefreshState::Refreshing
        } else {
            RefreshState::Idle
        }
    }

    /// Run one refresh unless another is already in flight.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("refresh still in flight; tick dropped");
            return TickOutcome::Skipped;
        }
        let _guard = RefreshingGuard(&self.refreshing);
        TickOutcome::Completed(self.refresh().await)
    }

    /// Drive [`tick`][Self::tick] from the configured interval until
    /// `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Each refresh runs as its own task so the timer keeps its cadence.  On
    /// shutdown the in-flight refresh is aborted and its result discarded.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(self.config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<TickOutcome>> = None;

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            window_size = self.config.window_size,
            "refresh scheduler started"
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                        debug!("refresh still in flight; tick dropped");
                        continue;
                    }
                    let scheduler = Arc::clone(&self);
                    in_flight = Some(tokio::spawn(async move { scheduler.tick().await }));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = in_flight.take() {
            handle.abort();
        }
        info!("refresh scheduler stopped");
    }

    async fn fetch_window(&self) -> Result<SampleWindow, StoreError> {
        let query = self.store.find_latest(self.config.window_size);
        match tokio::time::timeout(self.config.query_timeout, query).await {
            Ok(samples) => Ok(SampleWindow::new(samples?)),
            Err(_) => Err(StoreError::Timeout(self.config.query_timeout)),
        }
    }

    async fn refresh(&self) -> TickReport {
        let (window, query_failed) = match self.fetch_window().await {
            Ok(window) => (window, false),
            Err(e) => {
                warn!(error = %e, "store query failed; rendering empty window");
                (SampleWindow::empty(), true)
            }
        };

        let outcome = estimate_pose(&window, self.config.box_dims);
        let frame = Arc::new(render_frame(&window, &outcome));
        self.bus.publish(Arc::clone(&frame));

        debug!(
            window_len = window.len(),
            orientation = ?outcome.status(),
            "refresh complete"
        );
        TickReport {
            window_len: window.len(),
            query_failed,
            orientation: outcome.status(),
            frame,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
