use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{debug, info};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::data_loading::{read_log_csv, DailyCsvWriter};
use crate::session::sleep_date_for;
use crate::store::SampleStore;
use crate::Sample;

/// Measurements decoded from one oximeter output line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedVitals {
    pub spo2: i64,
    pub hr: i64,
    pub pi: i64,
    pub movement: i64,
    pub battery: i64,
}

fn field_after(lower: &str, label: &str) -> Option<i64> {
    let start = lower.find(label)? + label.len();
    let digits: String = lower[start..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Parse a decoded oximeter line of the form
/// `SpO2: 97% HR: 64 bpm PI: 3 Movement: 2 Battery: 88`.
/// Labels are matched case-insensitively; anything else returns `None`.
pub fn parse_sample_line(line: &str) -> Option<ParsedVitals> {
    let lower = line.to_ascii_lowercase();
    Some(ParsedVitals {
        spo2: field_after(&lower, "spo2:")?,
        hr: field_after(&lower, "hr:")?,
        pi: field_after(&lower, "pi:")?,
        movement: field_after(&lower, "movement:")?,
        battery: field_after(&lower, "battery:")?,
    })
}

/// Streams decoded oximeter lines into the store plus per-night CSV backups.
/// The transport producing the lines (BLE bridge, replayed capture) stays
/// external; any `BufRead` works.
pub struct Ingestor {
    store: SampleStore,
    backup: DailyCsvWriter,
    tz: Tz,
    user_id: i64,
}

impl Ingestor {
    pub fn new(store: SampleStore, backup: DailyCsvWriter, tz: Tz, user_id: i64) -> Self {
        Ingestor {
            store,
            backup,
            tz,
            user_id,
        }
    }

    /// Route one line stamped with `now` to its session. Non-matching lines
    /// are skipped with a debug log.
    pub fn ingest_line(&mut self, line: &str, now: DateTime<Utc>) -> Result<()> {
        let vitals = match parse_sample_line(line) {
            Some(vitals) => vitals,
            None => {
                debug!("ignoring line: {}", line.trim());
                return Ok(());
            }
        };

        let sleep_date = sleep_date_for(now, self.tz);
        let session_id = self
            .store
            .touch_session(self.user_id, sleep_date, Some(now))?;

        let sample = Sample {
            timestamp: now,
            spo2: Some(vitals.spo2),
            hr: Some(vitals.hr),
            pi: Some(vitals.pi),
            movement: Some(vitals.movement),
            battery: Some(vitals.battery),
        };
        self.store.insert_sample(session_id, &sample)?;
        self.backup.append(sleep_date, &sample)?;

        info!(
            "{} sleep_date={} SpO2={} HR={} PI={}",
            now.to_rfc3339(),
            sleep_date,
            vitals.spo2,
            vitals.hr,
            vitals.pi
        );
        Ok(())
    }

    pub fn run(&mut self, reader: impl BufRead) -> Result<()> {
        for line in reader.lines() {
            let line = line.context("failed to read input line")?;
            self.ingest_line(&line, Utc::now())?;
        }
        Ok(())
    }
}

/// Import historical per-night CSV logs into the store, routing each row to
/// its sleep date and skipping timestamps already present.
pub fn migrate_csv_dir(store: &mut SampleStore, dir: &Path, user_id: i64, tz: Tz) -> Result<()> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("csv") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        migrate_file(store, &path, user_id, tz)?;
    }
    Ok(())
}

fn migrate_file(store: &mut SampleStore, path: &Path, user_id: i64, tz: Tz) -> Result<()> {
    info!("migrating {}", path.display());
    let samples = read_log_csv(path)?;

    let mut seen_by_date = HashMap::new();
    let mut inserted = 0usize;
    let mut skipped = 0usize;

    for sample in samples {
        let sleep_date = sleep_date_for(sample.timestamp, tz);
        let seen = match seen_by_date.entry(sleep_date) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(store.session_timestamps(user_id, sleep_date)?)
            }
        };
        if seen.contains(&sample.timestamp) {
            skipped += 1;
            continue;
        }

        let session_id = store.touch_session(user_id, sleep_date, Some(sample.timestamp))?;
        store.insert_sample(session_id, &sample)?;
        seen.insert(sample.timestamp);
        inserted += 1;
    }

    info!(
        "migrated {}: {} inserted, {} duplicates skipped",
        path.display(),
        inserted,
        skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Chicago;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn parses_verbose_oximeter_line() {
        let vitals =
            parse_sample_line("SpO2: 97% HR: 64 bpm PI: 3 Movement: 2 Battery: 88").unwrap();
        assert_eq!(
            vitals,
            ParsedVitals {
                spo2: 97,
                hr: 64,
                pi: 3,
                movement: 2,
                battery: 88
            }
        );
    }

    #[test]
    fn label_matching_is_case_insensitive() {
        assert!(parse_sample_line("SPO2: 97% hr: 64 BPM Pi: 3 MOVEMENT: 2 battery: 88").is_some());
    }

    #[test]
    fn rejects_unrelated_lines() {
        assert!(parse_sample_line("Connecting to device AA:BB:CC...").is_none());
        assert!(parse_sample_line("SpO2: 97% HR: 64 bpm").is_none());
        assert!(parse_sample_line("").is_none());
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pulseox-ingest-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn ingest_routes_lines_to_sleep_date_session() {
        let dir = temp_dir("routes");
        let store = SampleStore::open_in_memory(1).unwrap();
        let backup = DailyCsvWriter::new(&dir).unwrap();
        let mut ingestor = Ingestor::new(store, backup, Chicago, 1);

        // 03:00 local on May 2 belongs to the May 1 night.
        let now = Chicago
            .with_ymd_and_hms(2024, 5, 2, 3, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        ingestor
            .ingest_line("SpO2: 93% HR: 58 bpm PI: 4 Movement: 0 Battery: 81", now)
            .unwrap();
        ingestor.ingest_line("noise line", now).unwrap();

        let night = chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let samples = ingestor.store.load_session_samples(1, night).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].spo2, Some(93));
        assert_eq!(samples[0].hr, Some(58));
    }

    #[test]
    fn migration_skips_duplicate_timestamps() {
        let dir = temp_dir("migrate");
        let csv_path = dir.join("pulseox_20240501.csv");
        let mut file = std::fs::File::create(&csv_path).unwrap();
        file.write_all(
            b"timestamp_utc,spo2,hr,pi,movement,battery\n\
              2024-05-02T08:00:00.000000Z,95,60,4,0,88\n\
              2024-05-02T08:00:02.000000Z,94,61,4,0,88\n",
        )
        .unwrap();

        let mut store = SampleStore::open_in_memory(1).unwrap();
        migrate_csv_dir(&mut store, &dir, 1, Chicago).unwrap();
        // Second pass is a no-op.
        migrate_csv_dir(&mut store, &dir, 1, Chicago).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        let night = chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let samples = store.load_session_samples(1, night).unwrap();
        assert_eq!(samples.len(), 2);
    }
}
