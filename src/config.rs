use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pulse-oximetry session logging and desaturation analysis
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// SQLite database path
    #[arg(long, env = "PULSEOX_DB", default_value = "pulseox_logs/pulseox.db")]
    pub db_path: PathBuf,

    /// Directory for per-night CSV backup logs
    #[arg(long, env = "PULSEOX_LOG_DIR", default_value = "pulseox_logs")]
    pub log_dir: PathBuf,

    /// IANA timezone used for sleep-date assignment
    #[arg(long, env = "PULSEOX_TZ", default_value = "America/Chicago")]
    pub timezone: String,

    /// User identifier for single-user operation
    #[arg(long, default_value = "1")]
    pub user_id: i64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream decoded oximeter lines from stdin into the store
    Ingest,

    /// Import historical per-night CSV logs into the database
    Migrate {
        /// Directory containing CSV logs
        directory: PathBuf,
    },

    /// Analyse one night: desaturation events and session summary
    Report(ReportArgs),

    /// List stored sleep dates, most recent first
    Dates,
}

#[derive(clap::Args, Debug)]
pub struct ReportArgs {
    /// Sleep date to analyse (YYYY-MM-DD), defaults to the most recent
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Analyse a CSV log file instead of the database
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// SpO2 event threshold (percent)
    #[arg(long, default_value = "90")]
    pub threshold: i64,

    /// Minimum event duration in seconds below threshold
    #[arg(long, default_value = "10.0")]
    pub min_duration: f64,

    /// Exclude first minutes (hook-up / settling)
    #[arg(long, default_value = "0.0")]
    pub trim_start: f64,

    /// Exclude last minutes (wake / sensor off)
    #[arg(long, default_value = "0.0")]
    pub trim_end: f64,

    /// Minimum plausible SpO2; lower values are dropped as artifacts
    #[arg(long, default_value = "50")]
    pub min_valid_spo2: i64,

    /// Maximum plausible SpO2
    #[arg(long, default_value = "100")]
    pub max_valid_spo2: i64,

    /// Minimum plausible heart rate (bpm)
    #[arg(long, default_value = "30")]
    pub min_valid_hr: i64,

    /// Maximum plausible heart rate (bpm)
    #[arg(long, default_value = "200")]
    pub max_valid_hr: i64,

    /// Rolling-mean window for the series output, in seconds
    #[arg(long, default_value = "30.0")]
    pub smoothing_window: f64,

    /// Write detected events to this CSV file
    #[arg(long)]
    pub events_csv: Option<PathBuf>,

    /// Write the SpO2/HR series (with rolling means) to this CSV file
    #[arg(long)]
    pub series_csv: Option<PathBuf>,

    /// Print the summary as JSON instead of the text report
    #[arg(long)]
    pub json: bool,
}
