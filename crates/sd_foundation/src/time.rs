// crates/sd_foundation/src/time.rs

//! Timestep keys and water-year arithmetic
//!
//! A timestep key is a naive (zone-free) timestamp. Keys are produced in
//! strictly increasing order by [`date_range`] and are used to align forcing
//! samples, state updates and output records.
//!
//! The water year starts on 1 October; a date in October–December belongs to
//! the water year of the following calendar year.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::error::{SdError, SdResult};

/// Timestep identifier
pub type TimestepKey = NaiveDateTime;

/// Seconds per hour
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Water year a key belongs to
pub fn water_year(key: &TimestepKey) -> i32 {
    if key.month() >= 10 {
        key.year() + 1
    } else {
        key.year()
    }
}

/// 1 October 00:00 of the key's water year
pub fn water_year_start(key: &TimestepKey) -> TimestepKey {
    let wy = water_year(key);
    NaiveDate::from_ymd_opt(wy - 1, 10, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(*key)
}

/// Hours elapsed since the start of the key's water year
pub fn water_year_hour(key: &TimestepKey) -> f64 {
    let elapsed = *key - water_year_start(key);
    elapsed.num_seconds() as f64 / SECONDS_PER_HOUR
}

/// Inclusive chronological sequence from `start` to `end` with a fixed step
pub fn date_range(
    start: TimestepKey,
    end: TimestepKey,
    step_minutes: u32,
) -> SdResult<Vec<TimestepKey>> {
    if step_minutes == 0 {
        return Err(SdError::invalid_input("time step must be positive"));
    }
    if end < start {
        return Err(SdError::invalid_input(format!(
            "end {} is before start {}",
            end, start
        )));
    }

    let step = Duration::minutes(i64::from(step_minutes));
    let mut keys = Vec::new();
    let mut next = start;
    while next <= end {
        keys.push(next);
        next += step;
    }
    Ok(keys)
}

/// Format a key the way logs and file names show it
pub fn format_key(key: &TimestepKey) -> String {
    key.format("%Y-%m-%d %H:%M").to_string()
}
