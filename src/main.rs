use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use pulseox::config::{Args, Command, ReportArgs};
use pulseox::data_loading::{read_log_csv, DailyCsvWriter};
use pulseox::ingest::{migrate_csv_dir, Ingestor};
use pulseox::metrics::{compute_desaturations, summarize_session};
use pulseox::output;
use pulseox::preprocessing::{filter_artifacts, trim_recording, ArtifactBounds};
use pulseox::session::parse_timezone;
use pulseox::store::SampleStore;

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let tz = parse_timezone(&args.timezone)?;

    match &args.command {
        Command::Ingest => {
            let store = SampleStore::open(&args.db_path, args.user_id)?;
            let backup = DailyCsvWriter::new(&args.log_dir)?;
            let mut ingestor = Ingestor::new(store, backup, tz, args.user_id);
            info!("ingesting oximeter lines from stdin");
            ingestor.run(std::io::stdin().lock())?;
        }
        Command::Migrate { directory } => {
            let mut store = SampleStore::open(&args.db_path, args.user_id)?;
            migrate_csv_dir(&mut store, directory, args.user_id, tz)?;
        }
        Command::Report(report) => {
            run_report(&args, report)?;
        }
        Command::Dates => {
            let store = SampleStore::open(&args.db_path, args.user_id)?;
            for date in store.list_sleep_dates(args.user_id)? {
                println!("{}", date);
            }
        }
    }

    Ok(())
}

fn run_report(args: &Args, report: &ReportArgs) -> Result<()> {
    let samples = if let Some(csv_path) = &report.csv {
        println!("Loading log file: {}", csv_path.display());
        read_log_csv(csv_path)?
    } else {
        let store = SampleStore::open(&args.db_path, args.user_id)?;
        let date = match report.date {
            Some(date) => date,
            None => match store.list_sleep_dates(args.user_id)?.into_iter().next() {
                Some(date) => date,
                None => bail!("no sessions stored yet; ingest or migrate data first"),
            },
        };
        println!("Analysing session for sleep date {}", date);
        store.load_session_samples(args.user_id, date)?
    };

    if samples.is_empty() {
        println!("Selected session has no samples.");
    }

    let trimmed = trim_recording(&samples, report.trim_start, report.trim_end);
    let bounds = ArtifactBounds {
        min_spo2: report.min_valid_spo2,
        max_spo2: report.max_valid_spo2,
        min_hr: report.min_valid_hr,
        max_hr: report.max_valid_hr,
    };
    let cleaned = filter_artifacts(&trimmed, &bounds);
    info!(
        "{} samples loaded, {} after trimming, {} after artifact filtering",
        samples.len(),
        trimmed.len(),
        cleaned.len()
    );

    let events = compute_desaturations(&cleaned, report.threshold, report.min_duration);
    let summary = summarize_session(&cleaned, report.threshold, report.min_duration);

    if report.json {
        output::print_summary_json(&summary)?;
    } else {
        output::print_summary(&summary, report.threshold, report.min_duration);
        output::print_events(&events);
    }

    if let Some(path) = &report.events_csv {
        output::write_events_csv(path, &events)?;
    }
    if let Some(path) = &report.series_csv {
        output::write_series_csv(path, &cleaned, report.smoothing_window)?;
    }

    Ok(())
}
