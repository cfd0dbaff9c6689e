use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

/// Local time-of-day cutoff for sleep-date assignment. Samples before noon
/// plus one minute belong to the previous night, so a session running 11pm
/// to 7am (plus stray samples near noon) resolves to one logical date.
pub fn default_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 1, 0).unwrap()
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| anyhow!("unknown timezone '{}'", name))
}

/// Map a UTC instant to its logical sleep date: convert to the local
/// timezone, and anything strictly before the cutoff belongs to the previous
/// local calendar day.
pub fn compute_sleep_date(instant: DateTime<Utc>, tz: Tz, cutoff: NaiveTime) -> NaiveDate {
    let local = instant.with_timezone(&tz);
    if local.time() < cutoff {
        local.date_naive() - Duration::days(1)
    } else {
        local.date_naive()
    }
}

/// Sleep date under the standard 12:01 local cutoff.
pub fn sleep_date_for(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    compute_sleep_date(instant, tz, default_cutoff())
}
