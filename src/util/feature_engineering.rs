// External crates
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use log::{debug, info};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::f64::consts::PI;

// Local modules
use crate::constants::{
    DATE_COLUMN, DAYS_PER_YEAR, DAY_OF_YEAR_COLUMN, DAY_SIN_COLUMN, LOAD_COLUMN, MINUTES_OF_DAY_COLUMN,
    MINUTES_PER_DAY, MINUTE_SIN_COLUMN, TIMESTAMP_COLUMN,
};
use crate::error::{GridError, GridResult};
use crate::util::file_utils::required_column;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Sinusoidal component of the day in the year
pub fn day_sine(day_of_year: u32) -> f64 {
    (2.0 * PI * day_of_year as f64 / DAYS_PER_YEAR).sin()
}

/// Sinusoidal component of the minutes in the day
pub fn minute_sine(minutes_of_day: u32) -> f64 {
    (2.0 * PI * minutes_of_day as f64 / MINUTES_PER_DAY).sin()
}

/// Converts nanoseconds since the Unix epoch into a UTC calendar time
pub fn datetime_from_nanos(nanos: i64) -> Option<NaiveDateTime> {
    let seconds = nanos.div_euclid(NANOS_PER_SECOND);
    let subsec = nanos.rem_euclid(NANOS_PER_SECOND) as u32;
    DateTime::from_timestamp(seconds, subsec).map(|dt| dt.naive_utc())
}

fn minutes_of_day(at: &NaiveDateTime) -> u32 {
    at.hour() * 60 + at.minute()
}

/// Day and minute sine components for a timestamp in epoch seconds
///
/// Used when feeding live readings to an exported model, where timestamps
/// arrive in seconds rather than nanoseconds.
pub fn generate_sin_components(epoch_seconds: i64) -> GridResult<(f32, f32)> {
    let at = DateTime::from_timestamp(epoch_seconds, 0)
        .ok_or_else(|| GridError::Timestamp {
            value: epoch_seconds.to_string(),
            format: "epoch seconds".to_string(),
        })?
        .naive_utc();

    let day_sin = day_sine(at.ordinal()) as f32;
    let minute_sin = minute_sine(minutes_of_day(&at)) as f32;
    Ok((day_sin, minute_sin))
}

/// Adds calendar and sinusoidal features derived from the timestamp column
///
/// New columns: `date` (days since the common era), `day_of_year`,
/// `minutes_of_day`, `day_sin` and `minute_sin`.
///
/// # Arguments
///
/// * `df` - Cleaned table with a nanosecond `timestamp` column
///
/// # Returns
///
/// Returns a new DataFrame with the feature columns appended
pub fn add_sinusoidal_features(df: &DataFrame) -> GridResult<DataFrame> {
    let timestamps = required_column(df, TIMESTAMP_COLUMN)?.i64()?;

    let mut dates = Vec::with_capacity(df.height());
    let mut days_of_year = Vec::with_capacity(df.height());
    let mut minutes = Vec::with_capacity(df.height());
    let mut day_sins = Vec::with_capacity(df.height());
    let mut minute_sins = Vec::with_capacity(df.height());

    for nanos in timestamps.into_iter() {
        match nanos.and_then(datetime_from_nanos) {
            Some(at) => {
                let day = at.ordinal();
                let minute = minutes_of_day(&at);
                dates.push(Some(at.date().num_days_from_ce()));
                days_of_year.push(Some(day as i32));
                minutes.push(Some(minute as i32));
                day_sins.push(Some(day_sine(day)));
                minute_sins.push(Some(minute_sine(minute)));
            }
            None => {
                dates.push(None);
                days_of_year.push(None);
                minutes.push(None);
                day_sins.push(None);
                minute_sins.push(None);
            }
        }
    }

    let mut featurized = df.clone();
    featurized.with_column(Series::new(DATE_COLUMN.into(), dates))?;
    featurized.with_column(Series::new(DAY_OF_YEAR_COLUMN.into(), days_of_year))?;
    featurized.with_column(Series::new(MINUTES_OF_DAY_COLUMN.into(), minutes))?;
    featurized.with_column(Series::new(DAY_SIN_COLUMN.into(), day_sins))?;
    featurized.with_column(Series::new(MINUTE_SIN_COLUMN.into(), minute_sins))?;

    debug!("Featurized columns: {:?}", featurized.get_column_names());
    Ok(featurized)
}

/// Min-max scale fitted on one calendar year
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearScale {
    pub min: f64,
    pub max: f64,
}

impl YearScale {
    fn fit(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Scales a value into [0, 1]; a flat year maps to 0
    pub fn apply(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range > 0.0 {
            (value - self.min) / range
        } else {
            0.0
        }
    }
}

/// Rescales the load column into [0, 1] independently for every calendar year
///
/// Each year gets its own min-max scale, so magnitudes are not comparable
/// across years afterwards. The fitted scales are local to this call.
pub fn normalize_load_per_year(df: &DataFrame) -> GridResult<DataFrame> {
    let timestamps = required_column(df, TIMESTAMP_COLUMN)?.i64()?;
    let loads = required_column(df, LOAD_COLUMN)?.f64()?;

    let years: Vec<Option<i32>> = timestamps
        .into_iter()
        .map(|nanos| nanos.and_then(datetime_from_nanos).map(|at| at.year()))
        .collect();

    let mut scales: BTreeMap<i32, YearScale> = BTreeMap::new();
    for (year, load) in years.iter().zip(loads.into_iter()) {
        if let (Some(year), Some(load)) = (year, load) {
            scales
                .entry(*year)
                .or_insert(YearScale {
                    min: load,
                    max: load,
                })
                .fit(load);
        }
    }
    for (year, scale) in &scales {
        info!("Year {} load range: [{:.4}, {:.4}]", year, scale.min, scale.max);
    }

    let normalized: Vec<Option<f64>> = years
        .iter()
        .zip(loads.into_iter())
        .map(|(year, load)| match (year, load) {
            (Some(year), Some(load)) => scales.get(year).map(|scale| scale.apply(load)),
            _ => None,
        })
        .collect();

    let mut out = df.clone();
    out.replace(LOAD_COLUMN, Series::new(LOAD_COLUMN.into(), normalized))?;
    Ok(out)
}
