use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;

use crate::data_loading::{format_timestamp, parse_timestamp};
use crate::Sample;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name TEXT,
    notes TEXT
);
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    sleep_date TEXT NOT NULL,
    start_time_utc TEXT,
    end_time_utc TEXT,
    created_at_utc TEXT NOT NULL,
    note TEXT
);
CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    timestamp_utc TEXT NOT NULL,
    spo2 INTEGER,
    hr INTEGER,
    pi INTEGER,
    movement INTEGER,
    battery INTEGER
);
CREATE INDEX IF NOT EXISTS idx_samples_session_time
    ON samples(session_id, timestamp_utc);
CREATE INDEX IF NOT EXISTS idx_sessions_sleep_date
    ON sessions(sleep_date);
";

/// Durable, append-only store for samples grouped into `(user, sleep_date)`
/// sessions. The metrics core only ever reads ordered snapshots from here.
pub struct SampleStore {
    conn: Connection,
}

impl SampleStore {
    /// Open (creating parent directories and schema as needed) a store at
    /// `path` and make sure the default user row exists.
    pub fn open(path: &Path, default_user_id: i64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let conn = Connection::open(path).with_context(|| {
            format!(
                "Unable to open database at {}. Ensure the directory exists and is writable.",
                path.display()
            )
        })?;
        Self::from_connection(conn, default_user_id)
    }

    pub fn open_in_memory(default_user_id: i64) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, default_user_id)
    }

    fn from_connection(conn: Connection, default_user_id: i64) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("failed to create schema")?;
        let store = SampleStore { conn };
        store.ensure_user(default_user_id)?;
        Ok(store)
    }

    fn ensure_user(&self, user_id: i64) -> Result<()> {
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT id FROM users WHERE id = ?1", params![user_id], |row| {
                row.get(0)
            })
            .optional()?;
        if existing.is_none() {
            self.conn.execute(
                "INSERT INTO users (id, name, notes) VALUES (?1, ?2, ?3)",
                params![user_id, "default", "primary user"],
            )?;
        }
        Ok(())
    }

    fn session_id(&self, user_id: i64, sleep_date: NaiveDate) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM sessions WHERE user_id = ?1 AND sleep_date = ?2",
                params![user_id, sleep_date.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Get or create the session for `(user_id, sleep_date)`. A new session
    /// starts with both bounds set to `start_time_utc` when provided.
    pub fn touch_session(
        &self,
        user_id: i64,
        sleep_date: NaiveDate,
        start_time_utc: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        self.ensure_user(user_id)?;
        if let Some(id) = self.session_id(user_id, sleep_date)? {
            return Ok(id);
        }

        let start = start_time_utc.map(format_timestamp);
        self.conn.execute(
            "INSERT INTO sessions (user_id, sleep_date, start_time_utc, end_time_utc, created_at_utc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                sleep_date.to_string(),
                start,
                start,
                format_timestamp(Utc::now()),
            ],
        )?;
        debug!("created session for user {} on {}", user_id, sleep_date);
        Ok(self.conn.last_insert_rowid())
    }

    /// Append one sample and bump the session end time in a single
    /// transaction, so a concurrent reader never observes a sample without
    /// its session bound (or vice versa).
    pub fn insert_sample(&mut self, session_id: i64, sample: &Sample) -> Result<i64> {
        let timestamp = format_timestamp(sample.timestamp);
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO samples (session_id, timestamp_utc, spo2, hr, pi, movement, battery)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                timestamp,
                sample.spo2,
                sample.hr,
                sample.pi,
                sample.movement,
                sample.battery,
            ],
        )?;
        let sample_id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE sessions SET end_time_utc = ?1 WHERE id = ?2",
            params![timestamp, session_id],
        )?;
        tx.commit()?;
        Ok(sample_id)
    }

    /// All samples for a session ordered by timestamp ascending. A session
    /// with no data yet yields an empty vec, not an error.
    pub fn load_session_samples(&self, user_id: i64, sleep_date: NaiveDate) -> Result<Vec<Sample>> {
        let session_id = match self.session_id(user_id, sleep_date)? {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let mut stmt = self.conn.prepare(
            "SELECT timestamp_utc, spo2, hr, pi, movement, battery
             FROM samples WHERE session_id = ?1 ORDER BY timestamp_utc",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (timestamp, spo2, hr, pi, movement, battery) = row?;
            samples.push(Sample {
                timestamp: parse_timestamp(&timestamp)?,
                spo2,
                hr,
                pi,
                movement,
                battery,
            });
        }
        // Stored timestamps sort lexicographically in time order, but resort
        // in case older rows used a different format.
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    /// Sleep dates for a user, most recent first.
    pub fn list_sleep_dates(&self, user_id: i64) -> Result<Vec<NaiveDate>> {
        let mut stmt = self.conn.prepare(
            "SELECT sleep_date FROM sessions WHERE user_id = ?1 ORDER BY sleep_date DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;

        let mut dates = Vec::new();
        for row in rows {
            let raw = row?;
            dates.push(
                raw.parse::<NaiveDate>()
                    .with_context(|| format!("invalid sleep_date '{}'", raw))?,
            );
        }
        Ok(dates)
    }

    /// Timestamps already present in a session, for import deduplication.
    pub fn session_timestamps(
        &self,
        user_id: i64,
        sleep_date: NaiveDate,
    ) -> Result<HashSet<DateTime<Utc>>> {
        let samples = self.load_session_samples(user_id, sleep_date)?;
        Ok(samples.iter().map(|s| s.timestamp).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(offset_sec: i64, spo2: Option<i64>) -> Sample {
        let base = Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 0).unwrap();
        let mut s = Sample::new(base + chrono::Duration::seconds(offset_sec));
        s.spo2 = spo2;
        s.hr = Some(60);
        s
    }

    fn night(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[test]
    fn touch_session_is_idempotent() {
        let store = SampleStore::open_in_memory(1).unwrap();
        let first = store.touch_session(1, night(1), None).unwrap();
        let second = store.touch_session(1, night(1), None).unwrap();
        assert_eq!(first, second);

        let other_night = store.touch_session(1, night(2), None).unwrap();
        assert_ne!(first, other_night);
    }

    #[test]
    fn samples_round_trip_in_timestamp_order() {
        let mut store = SampleStore::open_in_memory(1).unwrap();
        let session = store.touch_session(1, night(1), None).unwrap();

        // Inserted out of order; read back sorted.
        store.insert_sample(session, &sample(4, Some(94))).unwrap();
        store.insert_sample(session, &sample(0, Some(96))).unwrap();
        store.insert_sample(session, &sample(2, None)).unwrap();

        let samples = store.load_session_samples(1, night(1)).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].spo2, Some(96));
        assert_eq!(samples[1].spo2, None);
        assert_eq!(samples[2].spo2, Some(94));
        assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn unknown_session_yields_empty_vec() {
        let store = SampleStore::open_in_memory(1).unwrap();
        assert!(store.load_session_samples(1, night(9)).unwrap().is_empty());
    }

    #[test]
    fn sleep_dates_are_listed_descending() {
        let store = SampleStore::open_in_memory(1).unwrap();
        store.touch_session(1, night(1), None).unwrap();
        store.touch_session(1, night(3), None).unwrap();
        store.touch_session(1, night(2), None).unwrap();

        let dates = store.list_sleep_dates(1).unwrap();
        assert_eq!(dates, vec![night(3), night(2), night(1)]);
        assert!(store.list_sleep_dates(2).unwrap().is_empty());
    }

    #[test]
    fn session_timestamps_support_dedup() {
        let mut store = SampleStore::open_in_memory(1).unwrap();
        let session = store.touch_session(1, night(1), None).unwrap();
        let existing = sample(0, Some(95));
        store.insert_sample(session, &existing).unwrap();

        let seen = store.session_timestamps(1, night(1)).unwrap();
        assert!(seen.contains(&existing.timestamp));
        assert!(!seen.contains(&sample(2, None).timestamp));
    }
}
