use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::Sample;

pub const CSV_COLUMNS: [&str; 6] = ["timestamp_utc", "spo2", "hr", "pi", "movement", "battery"];

/// Parse a stored timestamp. Accepts RFC 3339 (what we and the logger
/// write) and falls back to naive forms from older logs, which are taken as
/// UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    bail!("unparseable timestamp '{}'", value)
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_optional_int(value: Option<&str>) -> Result<Option<i64>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .with_context(|| format!("invalid integer value '{}'", raw)),
    }
}

/// Read one per-night log CSV into samples sorted by timestamp.
///
/// A missing required column is a fatal error: silently dropping a column
/// could corrupt clinical interpretation downstream. Blank measurement
/// cells become `None`.
pub fn read_log_csv(path: &Path) -> Result<Vec<Sample>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header in {}", path.display()))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    // Older logs used "timestamp" for the same UTC column.
    let timestamp_idx = match column("timestamp_utc").or_else(|| column("timestamp")) {
        Some(idx) => idx,
        None => bail!("Missing column 'timestamp_utc' in {}", path.display()),
    };
    let missing: Vec<&str> = CSV_COLUMNS[1..]
        .iter()
        .copied()
        .filter(|&name| column(name).is_none())
        .collect();
    if !missing.is_empty() {
        bail!("Missing columns {:?} in {}", missing, path.display());
    }

    let indices: Vec<usize> = CSV_COLUMNS[1..]
        .iter()
        .copied()
        .filter_map(|name| column(name))
        .collect();

    let mut samples = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
        let raw_timestamp = record
            .get(timestamp_idx)
            .map(str::trim)
            .unwrap_or_default();
        if raw_timestamp.is_empty() {
            continue;
        }

        let mut sample = Sample::new(parse_timestamp(raw_timestamp)?);
        sample.spo2 = parse_optional_int(record.get(indices[0]))?;
        sample.hr = parse_optional_int(record.get(indices[1]))?;
        sample.pi = parse_optional_int(record.get(indices[2]))?;
        sample.movement = parse_optional_int(record.get(indices[3]))?;
        sample.battery = parse_optional_int(record.get(indices[4]))?;
        samples.push(sample);
    }

    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

pub fn backup_file_name(sleep_date: NaiveDate) -> String {
    format!("pulseox_{}.csv", sleep_date.format("%Y%m%d"))
}

/// Appends samples to per-night backup CSVs, rolling to a new file when the
/// sleep date changes. The header is written only when a file is created.
pub struct DailyCsvWriter {
    dir: PathBuf,
    current_sleep_date: Option<NaiveDate>,
    writer: Option<csv::Writer<File>>,
}

impl DailyCsvWriter {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        Ok(DailyCsvWriter {
            dir: dir.to_path_buf(),
            current_sleep_date: None,
            writer: None,
        })
    }

    fn open_for(&mut self, sleep_date: NaiveDate) -> Result<()> {
        let path = self.dir.join(backup_file_name(sleep_date));
        let header_needed = !path.exists();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("Failed to open backup file {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        if header_needed {
            writer.write_record(CSV_COLUMNS)?;
        }
        self.writer = Some(writer);
        self.current_sleep_date = Some(sleep_date);
        Ok(())
    }

    pub fn append(&mut self, sleep_date: NaiveDate, sample: &Sample) -> Result<()> {
        if self.current_sleep_date != Some(sleep_date) {
            self.open_for(sleep_date)?;
        }

        let as_cell = |value: Option<i64>| value.map(|v| v.to_string()).unwrap_or_default();
        if let Some(writer) = self.writer.as_mut() {
            writer.write_record(&[
                format_timestamp(sample.timestamp),
                as_cell(sample.spo2),
                as_cell(sample.hr),
                as_cell(sample.pi),
                as_cell(sample.movement),
                as_cell(sample.battery),
            ])?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pulseox-test-{}-{}", std::process::id(), name))
    }

    fn write_temp_csv(name: &str, contents: &str) -> PathBuf {
        let path = temp_path(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_log_with_blank_cells() {
        let path = write_temp_csv(
            "blank-cells.csv",
            "timestamp_utc,spo2,hr,pi,movement,battery\n\
             2024-05-02T03:12:08.000000Z,96,61,4,0,88\n\
             2024-05-02T03:12:10.000000Z,,,,,\n",
        );
        let samples = read_log_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].spo2, Some(96));
        assert_eq!(samples[0].hr, Some(61));
        assert_eq!(samples[1].spo2, None);
        assert_eq!(samples[1].battery, None);
    }

    #[test]
    fn accepts_legacy_timestamp_column_and_formats() {
        let path = write_temp_csv(
            "legacy.csv",
            "timestamp,spo2,hr,pi,movement,battery\n\
             2024-05-02 03:12:10,95,60,4,0,88\n\
             2024-05-02T03:12:08+00:00,96,61,4,0,88\n",
        );
        let samples = read_log_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        // Sorted by timestamp despite file order.
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].spo2, Some(96));
        assert_eq!(samples[1].spo2, Some(95));
    }

    #[test]
    fn missing_column_is_fatal() {
        let path = write_temp_csv(
            "missing-column.csv",
            "timestamp_utc,spo2,hr,pi,movement\n2024-05-02T03:12:08Z,96,61,4,0\n",
        );
        let err = read_log_csv(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(err.to_string().contains("battery"));
    }

    #[test]
    fn daily_writer_rolls_files_and_headers() {
        let dir = temp_path("daily-writer");
        std::fs::create_dir_all(&dir).unwrap();
        let mut writer = DailyCsvWriter::new(&dir).unwrap();

        let night_one = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let night_two = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let mut sample = Sample::new(Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 0).unwrap());
        sample.spo2 = Some(95);

        writer.append(night_one, &sample).unwrap();
        writer.append(night_one, &sample).unwrap();
        writer.append(night_two, &sample).unwrap();

        let first = dir.join(backup_file_name(night_one));
        let second = dir.join(backup_file_name(night_two));
        let first_rows = read_log_csv(&first).unwrap();
        let second_rows = read_log_csv(&second).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(first_rows.len(), 2);
        assert_eq!(second_rows.len(), 1);
        assert_eq!(first_rows[0].spo2, Some(95));
    }
}
