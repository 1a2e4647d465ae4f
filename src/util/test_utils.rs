// External imports
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

// Internal imports
use crate::constants::{LOAD_COLUMN, TIMESTAMP_COLUMN, TIMESTAMP_FORMAT};

/// Writes a raw grid CSV (semicolon separated, timestamp first) into `dir`
pub fn write_grid_csv(
    dir: &Path,
    file_name: &str,
    headers: &[&str],
    rows: &[(&str, &[&str])],
) -> PathBuf {
    let mut contents = String::from("TIMESTAMP");
    for header in headers {
        contents.push(';');
        contents.push_str(header);
    }
    contents.push('\n');
    for (timestamp, values) in rows {
        contents.push_str(timestamp);
        for value in values.iter() {
            contents.push(';');
            contents.push_str(value);
        }
        contents.push('\n');
    }

    let path = dir.join(file_name);
    std::fs::write(&path, contents).expect("Failed to write test CSV");
    path
}

/// Writes `days` full days of 15-minute readings from two meters
///
/// Loads follow a daily sine profile so the series is learnable. Values use
/// decimal commas like the raw exports.
pub fn write_synthetic_grid_csv(dir: &Path, file_name: &str, days: usize, readings_per_day: usize) -> PathBuf {
    let start = NaiveDateTime::parse_from_str("2012-03-01 00:00", "%Y-%m-%d %H:%M").unwrap();
    let mut contents = String::from("TIMESTAMP;MT_001;MT_002;MT_003\n");
    for day in 0..days {
        for step in 0..readings_per_day {
            let at = start + Duration::days(day as i64) + Duration::minutes(15 * step as i64);
            let phase = step as f64 / 96.0 * std::f64::consts::TAU;
            let first = 1000.0 + 400.0 * phase.sin() + 10.0 * day as f64;
            let second = 600.0 + 200.0 * phase.cos();
            let _ = writeln!(
                contents,
                "{};{};{};0",
                at.format(TIMESTAMP_FORMAT),
                format!("{:.2}", first).replace('.', ","),
                format!("{:.2}", second).replace('.', ","),
            );
        }
    }

    let path = dir.join(file_name);
    std::fs::write(&path, contents).expect("Failed to write synthetic CSV");
    path
}

/// Builds a cleaned `{timestamp, load}` table from naive timestamps
pub fn cleaned_frame(readings: &[(&str, f64)]) -> DataFrame {
    let timestamps: Vec<i64> = readings
        .iter()
        .map(|(at, _)| {
            NaiveDateTime::parse_from_str(at, "%Y-%m-%d %H:%M")
                .unwrap()
                .and_utc()
                .timestamp_nanos_opt()
                .unwrap()
        })
        .collect();
    let loads: Vec<f64> = readings.iter().map(|(_, load)| *load).collect();
    DataFrame::new(vec![
        Series::new(TIMESTAMP_COLUMN.into(), timestamps).into(),
        Series::new(LOAD_COLUMN.into(), loads).into(),
    ])
    .unwrap()
}

/// Builds a cleaned table with `count` readings 15 minutes apart starting at `start`
pub fn cleaned_day(start: &str, count: usize, first_load: f64) -> DataFrame {
    let start = NaiveDateTime::parse_from_str(start, "%Y-%m-%d %H:%M").unwrap();
    let timestamps: Vec<i64> = (0..count)
        .map(|i| {
            (start + Duration::minutes(15 * i as i64))
                .and_utc()
                .timestamp_nanos_opt()
                .unwrap()
        })
        .collect();
    let loads: Vec<f64> = (0..count).map(|i| first_load + i as f64).collect();
    DataFrame::new(vec![
        Series::new(TIMESTAMP_COLUMN.into(), timestamps).into(),
        Series::new(LOAD_COLUMN.into(), loads).into(),
    ])
    .unwrap()
}
