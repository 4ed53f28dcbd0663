//! Device poller – bridges the phyphox app's remote-access server to the
//! ingestion endpoint.
//!
//! Once a second: fetch the first element of each sensor buffer, tag it with
//! the user id and the current UTC time, and POST it as one sample.  A
//! failed round is logged and forgotten; there is no retry and no backlog.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sensordash_types::{Sample, SensorError};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Buffers requested from phyphox, by their on-device names.
pub const PHYPHOX_BUFFERS: [&str; 12] = [
    "acc_time", "magX", "magY", "magZ", "accX", "accY", "accZ", "gyroX", "gyroY", "gyroZ",
    "gpsLat", "gpsLon",
];

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum PollError {
    #[error("phyphox request failed: {0}")]
    Fetch(#[source] reqwest::Error),

    #[error("phyphox response is not JSON: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("ingestion request failed: {0}")]
    Post(#[source] reqwest::Error),

    #[error("ingestion endpoint answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// `GET` URL asking phyphox for every buffer in [`PHYPHOX_BUFFERS`].
pub fn phyphox_query_url(base: &str) -> String {
    format!("{}/get?{}", base.trim_end_matches('/'), PHYPHOX_BUFFERS.join("&"))
}

/// First element of `buffer.<name>.buffer`, or `None` when the buffer is
/// missing, empty or not a number.
fn first_value(response: &Value, name: &str) -> Option<f64> {
    response
        .get("buffer")?
        .get(name)?
        .get("buffer")?
        .get(0)?
        .as_f64()
}

/// Map a phyphox `/get` response onto a [`Sample`].
pub fn sample_from_phyphox(user_id: &str, timestamp: DateTime<Utc>, response: &Value) -> Sample {
    let v = |name| first_value(response, name);
    let mut sample = Sample::new(user_id, timestamp);
    sample.acc_time = v("acc_time");
    sample.acc_x = v("accX");
    sample.acc_y = v("accY");
    sample.acc_z = v("accZ");
    sample.gyro_x = v("gyroX");
    sample.gyro_y = v("gyroY");
    sample.gyro_z = v("gyroZ");
    sample.mag_x = v("magX");
    sample.mag_y = v("magY");
    sample.mag_z = v("magZ");
    sample.gps_lat = v("gpsLat");
    sample.gps_lon = v("gpsLon");
    sample
}

pub struct Poller {
    client: reqwest::Client,
    user_id: String,
    query_url: String,
    ingest_url: String,
    interval: Duration,
}

impl Poller {
    pub fn new(user_id: &str, phyphox_url: &str, ingest_url: &str) -> Result<Self, SensorError> {
        if user_id.trim().is_empty() {
            return Err(SensorError::Config("a user id is required for polling".to_string()));
        }
        if phyphox_url.trim().is_empty() {
            return Err(SensorError::Config("a phyphox URL is required for polling".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| SensorError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            user_id: user_id.trim().to_string(),
            query_url: phyphox_query_url(phyphox_url.trim()),
            ingest_url: ingest_url.to_string(),
            interval: Duration::from_secs(1),
        })
    }

    /// Read one sample from the device.
    pub async fn fetch(&self) -> Result<Sample, PollError> {
        let response: Value = self
            .client
            .get(&self.query_url)
            .send()
            .await
            .map_err(PollError::Fetch)?
            .json()
            .await
            .map_err(PollError::Decode)?;
        Ok(sample_from_phyphox(&self.user_id, Utc::now(), &response))
    }

    /// Fetch one sample and post it; returns the endpoint's reply text.
    pub async fn poll_once(&self) -> Result<String, PollError> {
        let sample = self.fetch().await?;
        debug!(user = %sample.user_id, timestamp = %sample.timestamp, "sending sample");
        let response = self
            .client
            .post(&self.ingest_url)
            .json(&sample)
            .send()
            .await
            .map_err(PollError::Post)?;
        let status = response.status();
        let body = response.text().await.map_err(PollError::Post)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(PollError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Poll until `shutdown` turns `true`.  Rounds run back to back, never
    /// overlapping.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(device = %self.query_url, endpoint = %self.ingest_url, "poller started");

        loop {
            tokio::select! {
                _ = timer.tick() => match self.poll_once().await {
                    Ok(reply) => info!(reply = %reply.trim(), "sample sent"),
                    Err(e) => warn!(error = %e, "poll round failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("poller stopped");
    }
}
