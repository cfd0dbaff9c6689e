use chrono::{DateTime, Duration, Utc};

use crate::{DesatEvent, Sample, SessionSummary};

/// Totals from the time-below-threshold aggregation. Unlike discrete events,
/// brief dips count here even when they fall under the minimum duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBelowThreshold {
    pub total_seconds_below: f64,
    pub fraction_of_analysed_time: f64,
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Estimate the typical spacing between consecutive samples as the median of
/// the timestamp deltas. The median is robust against transmission pauses
/// that would skew a mean. Fewer than two samples yields 0.0.
pub fn estimate_sample_interval(samples: &[Sample]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }

    let mut deltas: Vec<f64> = samples
        .windows(2)
        .map(|pair| seconds_between(pair[0].timestamp, pair[1].timestamp))
        .collect();

    deltas.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = deltas.len() / 2;
    if deltas.len() % 2 == 0 {
        (deltas[mid - 1] + deltas[mid]) / 2.0
    } else {
        deltas[mid]
    }
}

/// Samples carrying an SpO2 value, sorted by timestamp. Null-SpO2 samples
/// neither start, extend, nor end a run, so they are removed up front.
fn valid_sorted(samples: &[Sample]) -> Vec<Sample> {
    let mut valid: Vec<Sample> = samples
        .iter()
        .copied()
        .filter(|s| s.spo2.is_some())
        .collect();
    valid.sort_by_key(|s| s.timestamp);
    valid
}

/// Group consecutive below-threshold samples into maximal runs, returned as
/// slices into `valid`. Both event detection and time-below-threshold use
/// this single grouping so the two can never disagree.
fn below_threshold_runs(valid: &[Sample], threshold: i64) -> Vec<&[Sample]> {
    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;

    for (idx, sample) in valid.iter().enumerate() {
        let below = sample.spo2.map(|v| v < threshold).unwrap_or(false);
        match (below, run_start) {
            (true, None) => run_start = Some(idx),
            (false, Some(start)) => {
                runs.push(&valid[start..idx]);
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        runs.push(&valid[start..]);
    }

    runs
}

fn run_duration_sec(run: &[Sample], sample_interval: f64) -> f64 {
    // The raw span undercounts by one inter-sample gap: a run of a single
    // sample would otherwise report a duration of zero.
    let first = run[0].timestamp;
    let last = run[run.len() - 1].timestamp;
    seconds_between(first, last) + sample_interval
}

/// Detect desaturation events: contiguous runs of `spo2 < threshold` lasting
/// at least `min_duration_sec`. Deterministic for identical inputs; returns
/// an empty list for empty or all-null input.
pub fn compute_desaturations(
    samples: &[Sample],
    threshold: i64,
    min_duration_sec: f64,
) -> Vec<DesatEvent> {
    let valid = valid_sorted(samples);
    if valid.is_empty() {
        return Vec::new();
    }

    let sample_interval = estimate_sample_interval(&valid);
    let mut events = Vec::new();

    for run in below_threshold_runs(&valid, threshold) {
        let duration = run_duration_sec(run, sample_interval);
        if duration < min_duration_sec {
            continue;
        }

        let mut nadir = i64::MAX;
        let mut sum = 0i64;
        let mut count = 0usize;
        for sample in run {
            if let Some(value) = sample.spo2 {
                nadir = nadir.min(value);
                sum += value;
                count += 1;
            }
        }

        let last = run[run.len() - 1].timestamp;
        events.push(DesatEvent {
            start_time: run[0].timestamp,
            end_time: last + Duration::milliseconds((sample_interval * 1000.0).round() as i64),
            duration_sec: duration,
            nadir_spo2: nadir,
            mean_spo2: sum as f64 / count as f64,
        });
    }

    events
}

/// Total elapsed time spent below threshold, independent of the
/// minimum-duration filter, plus the fraction of the analysed duration.
pub fn compute_time_below_threshold(samples: &[Sample], threshold: i64) -> TimeBelowThreshold {
    let valid = valid_sorted(samples);
    if valid.is_empty() {
        return TimeBelowThreshold {
            total_seconds_below: 0.0,
            fraction_of_analysed_time: 0.0,
        };
    }

    let sample_interval = estimate_sample_interval(&valid);
    let total_below: f64 = below_threshold_runs(&valid, threshold)
        .iter()
        .map(|run| run_duration_sec(run, sample_interval))
        .sum();

    let analysed = analysed_duration_seconds(samples);
    let fraction = if analysed > 0.0 {
        total_below / analysed
    } else {
        0.0
    };

    TimeBelowThreshold {
        total_seconds_below: total_below,
        fraction_of_analysed_time: fraction,
    }
}

/// Elapsed seconds between the first and last sample. The input need not be
/// sorted; extrema are taken over all timestamps.
pub fn analysed_duration_seconds(samples: &[Sample]) -> f64 {
    let first = samples.iter().map(|s| s.timestamp).min();
    let last = samples.iter().map(|s| s.timestamp).max();
    match (first, last) {
        (Some(first), Some(last)) => seconds_between(first, last),
        _ => 0.0,
    }
}

/// ODI: desaturation events per analysed hour. Zero analysed time yields an
/// ODI of exactly 0, never a division by zero.
pub fn compute_odi(events_count: usize, analysed_duration_hours: f64) -> f64 {
    if analysed_duration_hours <= 0.0 {
        return 0.0;
    }
    events_count as f64 / analysed_duration_hours
}

/// Single entry point combining extrema, means, time below threshold, event
/// count, and ODI for one session's samples.
pub fn summarize_session(
    samples: &[Sample],
    threshold: i64,
    min_duration_sec: f64,
) -> SessionSummary {
    let analysed_hours = analysed_duration_seconds(samples) / 3600.0;
    let events = compute_desaturations(samples, threshold, min_duration_sec);
    let below = compute_time_below_threshold(samples, threshold);

    let spo2_values: Vec<i64> = samples.iter().filter_map(|s| s.spo2).collect();
    let hr_values: Vec<i64> = samples.iter().filter_map(|s| s.hr).collect();

    SessionSummary {
        analysed_duration_hours: analysed_hours,
        spo2_min: spo2_values.iter().min().copied(),
        spo2_mean: mean_of(&spo2_values),
        hr_min: hr_values.iter().min().copied(),
        hr_mean: mean_of(&hr_values),
        time_below_threshold_sec: below.total_seconds_below,
        time_below_threshold_fraction: below.fraction_of_analysed_time,
        events_count: events.len(),
        odi: compute_odi(events.len(), analysed_hours),
    }
}

fn mean_of(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<i64>() as f64 / values.len() as f64)
}

/// Trailing time-windowed mean over a sorted series: each output value
/// averages the points in `(t - window_sec, t]`. The window is a duration,
/// not a row count, so irregular cadence keeps consistent smoothing.
pub fn rolling_mean(points: &[(DateTime<Utc>, f64)], window_sec: f64) -> Vec<(DateTime<Utc>, f64)> {
    let mut smoothed = Vec::with_capacity(points.len());
    let mut window_start = 0usize;
    let mut sum = 0.0;

    for (idx, (timestamp, value)) in points.iter().enumerate() {
        sum += value;
        while window_start < idx
            && seconds_between(points[window_start].0, *timestamp) >= window_sec
        {
            sum -= points[window_start].1;
            window_start += 1;
        }
        smoothed.push((*timestamp, sum / (idx - window_start + 1) as f64));
    }

    smoothed
}
