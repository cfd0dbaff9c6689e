pub mod config;
pub mod data_loading;
pub mod ingest;
pub mod metrics;
pub mod output;
pub mod preprocessing;
pub mod session;
pub mod store;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One oximeter observation. Measurement fields are `None` when the device
/// did not report them; a missing SpO2 keeps the sample out of segmentation
/// but it still counts toward the analysed duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub spo2: Option<i64>,
    pub hr: Option<i64>,
    pub pi: Option<i64>,
    pub movement: Option<i64>,
    pub battery: Option<i64>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Sample {
            timestamp,
            spo2: None,
            hr: None,
            pi: None,
            movement: None,
            battery: None,
        }
    }
}

/// A contiguous period where SpO2 stayed below the threshold for at least
/// the configured minimum duration. Derived on demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DesatEvent {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_sec: f64,
    pub nadir_spo2: i64,
    pub mean_spo2: f64,
}

/// Aggregate metrics for one session. Extrema and means are `None` when no
/// sample carried the corresponding measurement, so "no data" stays distinct
/// from "measured zero".
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionSummary {
    pub analysed_duration_hours: f64,
    pub spo2_min: Option<i64>,
    pub spo2_mean: Option<f64>,
    pub hr_min: Option<i64>,
    pub hr_mean: Option<f64>,
    pub time_below_threshold_sec: f64,
    pub time_below_threshold_fraction: f64,
    pub events_count: usize,
    pub odi: f64,
}
