use anyhow::{Context, Result};
use std::path::Path;

use crate::data_loading::format_timestamp;
use crate::metrics::rolling_mean;
use crate::{DesatEvent, Sample, SessionSummary};

fn fmt_opt_int(value: Option<i64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{} {}", v, unit),
        None => "--".to_string(),
    }
}

fn fmt_opt_float(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.1} {}", v, unit),
        None => "--".to_string(),
    }
}

pub fn print_summary(summary: &SessionSummary, threshold: i64, min_duration_sec: f64) {
    println!("\nSession summary");
    println!("---------------");
    println!(
        "Analysed duration:     {:.2} h",
        summary.analysed_duration_hours
    );
    println!("Min SpO2:              {}", fmt_opt_int(summary.spo2_min, "%"));
    println!("Mean SpO2:             {}", fmt_opt_float(summary.spo2_mean, "%"));
    println!("Min HR:                {}", fmt_opt_int(summary.hr_min, "bpm"));
    println!("Mean HR:               {}", fmt_opt_float(summary.hr_mean, "bpm"));
    println!(
        "Time below threshold:  {:.1} min ({:.1}% of analysed time)",
        summary.time_below_threshold_sec / 60.0,
        summary.time_below_threshold_fraction * 100.0
    );
    println!("Desaturation events:   {}", summary.events_count);
    println!("ODI:                   {:.1} events/hour", summary.odi);
    println!(
        "\nDesat definition: SpO2 < {}% for at least {:.0} s",
        threshold, min_duration_sec
    );
}

pub fn print_events(events: &[DesatEvent]) {
    if events.is_empty() {
        println!("\nNo desaturation events detected with the current settings.");
        return;
    }

    println!("\nDesaturation events:");
    println!("Start                End                  Duration   Nadir   Mean SpO2");
    println!("--------------------------------------------------------------------");
    for event in events {
        println!(
            "{}  {}  {:7.1}s   {:3}%   {:6.1}%",
            event.start_time.format("%Y-%m-%d %H:%M:%S"),
            event.end_time.format("%Y-%m-%d %H:%M:%S"),
            event.duration_sec,
            event.nadir_spo2,
            event.mean_spo2
        );
    }
}

pub fn print_summary_json(summary: &SessionSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

pub fn write_events_csv(path: &Path, events: &[DesatEvent]) -> Result<()> {
    println!("Writing events to {}", path.display());
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record([
        "start_time",
        "end_time",
        "duration_sec",
        "nadir_spo2",
        "mean_spo2",
    ])?;
    for event in events {
        writer.write_record(&[
            format_timestamp(event.start_time),
            format_timestamp(event.end_time),
            format!("{:.1}", event.duration_sec),
            event.nadir_spo2.to_string(),
            format!("{:.1}", event.mean_spo2),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the SpO2/HR series plus rolling means, one row per sample. Rows
/// missing a measurement leave the corresponding cells blank.
pub fn write_series_csv(path: &Path, samples: &[Sample], smoothing_window_sec: f64) -> Result<()> {
    println!("Writing series to {}", path.display());
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    let spo2_points: Vec<_> = samples
        .iter()
        .filter_map(|s| s.spo2.map(|v| (s.timestamp, v as f64)))
        .collect();
    let hr_points: Vec<_> = samples
        .iter()
        .filter_map(|s| s.hr.map(|v| (s.timestamp, v as f64)))
        .collect();
    let spo2_smoothed = rolling_mean(&spo2_points, smoothing_window_sec);
    let hr_smoothed = rolling_mean(&hr_points, smoothing_window_sec);

    writer.write_record(["timestamp_utc", "spo2", "spo2_ma", "hr", "hr_ma", "movement"])?;
    let mut spo2_idx = 0usize;
    let mut hr_idx = 0usize;
    for sample in samples {
        let spo2_ma = if sample.spo2.is_some() {
            let value = spo2_smoothed[spo2_idx].1;
            spo2_idx += 1;
            format!("{:.2}", value)
        } else {
            String::new()
        };
        let hr_ma = if sample.hr.is_some() {
            let value = hr_smoothed[hr_idx].1;
            hr_idx += 1;
            format!("{:.2}", value)
        } else {
            String::new()
        };

        let as_cell = |value: Option<i64>| value.map(|v| v.to_string()).unwrap_or_default();
        writer.write_record(&[
            format_timestamp(sample.timestamp),
            as_cell(sample.spo2),
            spo2_ma,
            as_cell(sample.hr),
            hr_ma,
            as_cell(sample.movement),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
