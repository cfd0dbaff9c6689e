use chrono::Duration;
use log::info;

use crate::Sample;

/// Plausibility bounds for artifact rejection. Values outside these ranges
/// are sensor artifacts (finger slip, motion), not physiology.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactBounds {
    pub min_spo2: i64,
    pub max_spo2: i64,
    pub min_hr: i64,
    pub max_hr: i64,
}

impl Default for ArtifactBounds {
    fn default() -> Self {
        ArtifactBounds {
            min_spo2: 50,
            max_spo2: 100,
            min_hr: 30,
            max_hr: 200,
        }
    }
}

/// Exclude the first/last few minutes of a recording: the initial hook-up
/// and settling period and the final wake / sensor-off period. Overlapping
/// trims return an empty set rather than an inverted window.
pub fn trim_recording(samples: &[Sample], trim_start_min: f64, trim_end_min: f64) -> Vec<Sample> {
    if samples.is_empty() || (trim_start_min <= 0.0 && trim_end_min <= 0.0) {
        return samples.to_vec();
    }

    let first = samples.iter().map(|s| s.timestamp).min();
    let last = samples.iter().map(|s| s.timestamp).max();
    let (first, last) = match (first, last) {
        (Some(first), Some(last)) => (first, last),
        _ => return Vec::new(),
    };

    let window_start = first + Duration::milliseconds((trim_start_min * 60_000.0) as i64);
    let window_end = last - Duration::milliseconds((trim_end_min * 60_000.0) as i64);
    if window_end <= window_start {
        return Vec::new();
    }

    samples
        .iter()
        .copied()
        .filter(|s| s.timestamp >= window_start && s.timestamp <= window_end)
        .collect()
}

/// Drop samples whose SpO2 or HR fall outside the plausibility bounds.
/// Samples missing a measurement are kept; the metrics core already treats
/// nulls as absent.
pub fn filter_artifacts(samples: &[Sample], bounds: &ArtifactBounds) -> Vec<Sample> {
    let kept: Vec<Sample> = samples
        .iter()
        .copied()
        .filter(|s| {
            let spo2_ok = s
                .spo2
                .map(|v| v >= bounds.min_spo2 && v <= bounds.max_spo2)
                .unwrap_or(true);
            let hr_ok = s
                .hr
                .map(|v| v >= bounds.min_hr && v <= bounds.max_hr)
                .unwrap_or(true);
            spo2_ok && hr_ok
        })
        .collect();

    if kept.len() < samples.len() {
        info!(
            "Removed {} samples as artifacts, {} remaining",
            samples.len() - kept.len(),
            kept.len()
        );
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(offset_sec: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap() + Duration::seconds(offset_sec)
    }

    fn sample(offset_sec: i64, spo2: Option<i64>, hr: Option<i64>) -> Sample {
        let mut s = Sample::new(ts(offset_sec));
        s.spo2 = spo2;
        s.hr = hr;
        s
    }

    #[test]
    fn trims_both_edges() {
        // 20 minutes of samples at 1-minute cadence.
        let samples: Vec<Sample> = (0..=20).map(|i| sample(i * 60, Some(95), Some(60))).collect();
        let trimmed = trim_recording(&samples, 5.0, 5.0);
        assert_eq!(trimmed.len(), 11);
        assert_eq!(trimmed[0].timestamp, ts(5 * 60));
        assert_eq!(trimmed.last().map(|s| s.timestamp), Some(ts(15 * 60)));
    }

    #[test]
    fn overlapping_trims_return_empty() {
        let samples: Vec<Sample> = (0..=10).map(|i| sample(i * 60, Some(95), None)).collect();
        assert!(trim_recording(&samples, 8.0, 8.0).is_empty());
    }

    #[test]
    fn zero_trim_is_identity() {
        let samples: Vec<Sample> = (0..5).map(|i| sample(i * 2, Some(95), None)).collect();
        assert_eq!(trim_recording(&samples, 0.0, 0.0), samples);
    }

    #[test]
    fn artifact_filter_drops_implausible_values() {
        let samples = vec![
            sample(0, Some(96), Some(62)),
            sample(2, Some(30), Some(62)),  // SpO2 artifact
            sample(4, Some(96), Some(250)), // HR artifact
            sample(6, None, None),          // missing data is kept
        ];
        let kept = filter_artifacts(&samples, &ArtifactBounds::default());
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0], samples[0]);
        assert_eq!(kept[1], samples[3]);
    }
}
