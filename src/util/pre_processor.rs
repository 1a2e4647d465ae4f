// External crates
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Local modules
use crate::constants::{LOAD_COLUMN, LOAD_SCALE_DIVISOR, TIMESTAMP_COLUMN, TIMESTAMP_FORMAT};
use crate::error::{GridError, GridResult};
use crate::util::file_utils::{column_to_decimals, read_semicolon_csv};

/// How the remaining signal columns of a row collapse into one load value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadAggregate {
    /// Row sum divided by `divisor`
    ScaledSum { divisor: f64 },
    /// Row median
    Median,
}

impl Default for LoadAggregate {
    fn default() -> Self {
        LoadAggregate::ScaledSum {
            divisor: LOAD_SCALE_DIVISOR,
        }
    }
}

/// Where the record timestamp lives in the raw file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampLayout {
    /// First column is the timestamp
    #[default]
    Single,
    /// First two columns are the start and end of the interval; the start is kept
    StartEnd,
}

impl TimestampLayout {
    /// Index of the first signal column
    fn signal_offset(self) -> usize {
        match self {
            TimestampLayout::Single => 1,
            TimestampLayout::StartEnd => 2,
        }
    }
}

/// Raw loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub timestamp_format: String,
    pub layout: TimestampLayout,
    pub aggregate: LoadAggregate,
    /// Rescale the load into [0, 1] independently per calendar year
    pub normalize_per_year: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            timestamp_format: TIMESTAMP_FORMAT.to_string(),
            layout: TimestampLayout::Single,
            aggregate: LoadAggregate::default(),
            normalize_per_year: false,
        }
    }
}

/// What the cleaning stages removed from a raw file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Lines with more fields than the header, skipped before parsing
    pub malformed_lines_skipped: usize,
    pub rows_read: usize,
    pub zero_rows_dropped: usize,
    pub zero_columns_dropped: Vec<String>,
    pub incomplete_rows_dropped: usize,
    pub rows_kept: usize,
    /// Signal columns that contributed to the aggregate
    pub signal_columns: Vec<String>,
}

/// Parses a raw timestamp into nanoseconds since the Unix epoch (UTC)
pub fn parse_timestamp(value: &str, format: &str) -> GridResult<i64> {
    let invalid = || GridError::Timestamp {
        value: value.to_string(),
        format: format.to_string(),
    };
    NaiveDateTime::parse_from_str(value.trim(), format)
        .map_err(|_| invalid())?
        .and_utc()
        .timestamp_nanos_opt()
        .ok_or_else(invalid)
}

/// Collapses one row of signal values into a load value
fn aggregate_row(values: &[f64], aggregate: LoadAggregate) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    match aggregate {
        LoadAggregate::ScaledSum { divisor } => Some(values.iter().sum::<f64>() / divisor),
        LoadAggregate::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                Some((sorted[mid - 1] + sorted[mid]) / 2.0)
            } else {
                Some(sorted[mid])
            }
        }
    }
}

/// Loads a raw semicolon-delimited grid export into a `{timestamp, load}` table
///
/// Cleaning order: all-zero rows are dropped, then signal columns that are
/// zero across every remaining row, then the per-row aggregate is computed and
/// rows with any missing value (including an unparseable timestamp) are
/// dropped. The result is sorted by timestamp.
///
/// # Arguments
///
/// * `full_path` - Path to the raw CSV file
/// * `config` - Timestamp layout/format and aggregation strategy
///
/// # Returns
///
/// Returns the cleaned DataFrame and a report of what was removed
pub fn load_and_preprocess(
    full_path: &Path,
    config: &LoaderConfig,
) -> GridResult<(DataFrame, LoadReport)> {
    info!("Loading data from: {}", full_path.display());

    let (raw, malformed_lines_skipped) = read_semicolon_csv(full_path)?;
    let columns = raw.get_columns();
    let signal_offset = config.layout.signal_offset();
    if columns.len() < signal_offset {
        return Err(GridError::InvalidConfig(format!(
            "expected at least {} timestamp column(s), found {} column(s)",
            signal_offset,
            columns.len()
        )));
    }

    let rows_read = raw.height();

    // Timestamps that fail to parse count as missing values
    let timestamps: Vec<Option<i64>> = columns[0]
        .cast(&DataType::String)?
        .str()?
        .into_iter()
        .map(|cell| cell.and_then(|value| parse_timestamp(value, &config.timestamp_format).ok()))
        .collect();

    let mut signals = Vec::with_capacity(columns.len() - signal_offset);
    for column in &columns[signal_offset..] {
        signals.push((column.name().to_string(), column_to_decimals(column)?));
    }

    // Rows that are zero in every signal column
    let kept_rows: Vec<usize> = (0..rows_read)
        .filter(|&row| signals.iter().any(|(_, values)| values[row] != Some(0.0)))
        .collect();
    let zero_rows_dropped = rows_read - kept_rows.len();

    // Columns that are zero in every remaining row
    let (signals, zero_columns): (Vec<_>, Vec<_>) = signals
        .into_iter()
        .partition(|(_, values)| kept_rows.iter().any(|&row| values[row] != Some(0.0)));
    let zero_columns_dropped: Vec<String> = zero_columns.into_iter().map(|(name, _)| name).collect();
    if !zero_columns_dropped.is_empty() {
        info!(
            "Dropped {} all-zero signal column(s): {:?}",
            zero_columns_dropped.len(),
            zero_columns_dropped
        );
    }

    let mut out_timestamps = Vec::with_capacity(kept_rows.len());
    let mut out_loads = Vec::with_capacity(kept_rows.len());
    let mut row_values = Vec::with_capacity(signals.len());
    for &row in &kept_rows {
        row_values.clear();
        let mut complete = true;
        for (_, values) in &signals {
            match values[row] {
                Some(value) if !value.is_nan() => row_values.push(value),
                _ => {
                    complete = false;
                    break;
                }
            }
        }
        let aggregate = if complete {
            aggregate_row(&row_values, config.aggregate)
        } else {
            None
        };
        if let (Some(timestamp), Some(load)) = (timestamps[row], aggregate) {
            out_timestamps.push(timestamp);
            out_loads.push(load);
        }
    }
    let incomplete_rows_dropped = kept_rows.len() - out_loads.len();
    if incomplete_rows_dropped > 0 {
        warn!(
            "Dropped {} row(s) with missing or unparseable values",
            incomplete_rows_dropped
        );
    }

    let df = DataFrame::new(vec![
        Series::new(TIMESTAMP_COLUMN.into(), out_timestamps).into(),
        Series::new(LOAD_COLUMN.into(), out_loads).into(),
    ])?;
    let df = df.sort(vec![TIMESTAMP_COLUMN], SortMultipleOptions::default())?;

    let report = LoadReport {
        malformed_lines_skipped,
        rows_read,
        zero_rows_dropped,
        zero_columns_dropped,
        incomplete_rows_dropped,
        rows_kept: df.height(),
        signal_columns: signals.into_iter().map(|(name, _)| name).collect(),
    };
    info!(
        "Preprocessed {} of {} rows ({} all-zero, {} incomplete, {} malformed line(s) skipped)",
        report.rows_kept,
        report.rows_read,
        report.zero_rows_dropped,
        report.incomplete_rows_dropped,
        report.malformed_lines_skipped
    );
    debug!("Tail of the preprocessed dataset:\n{}", df.tail(Some(5)));

    Ok((df, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_utils::write_grid_csv;

    fn loads(df: &DataFrame) -> Vec<f64> {
        df.column(LOAD_COLUMN)
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect()
    }

    #[test]
    fn test_parse_timestamp_day_month_short_year() {
        let ns = parse_timestamp("02/01/12 00:15", TIMESTAMP_FORMAT).unwrap();
        let expected = NaiveDateTime::parse_from_str("2012-01-02 00:15", "%Y-%m-%d %H:%M")
            .unwrap()
            .and_utc()
            .timestamp_nanos_opt()
            .unwrap();
        assert_eq!(ns, expected);
        assert!(parse_timestamp("2012-01-02", TIMESTAMP_FORMAT).is_err());
    }

    #[test]
    fn test_aggregate_row_strategies() {
        let scaled = LoadAggregate::ScaledSum { divisor: 1000.0 };
        assert_eq!(aggregate_row(&[1000.0, 500.0, 500.0], scaled), Some(2.0));
        assert_eq!(aggregate_row(&[3.0, 1.0, 2.0], LoadAggregate::Median), Some(2.0));
        assert_eq!(aggregate_row(&[4.0, 1.0, 2.0, 3.0], LoadAggregate::Median), Some(2.5));
        assert_eq!(aggregate_row(&[], LoadAggregate::Median), None);
    }

    #[test]
    fn test_load_drops_zero_rows_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid_csv(
            dir.path(),
            "grid.csv",
            &["MT_001", "MT_002", "MT_003"],
            &[
                ("01/01/12 00:15", &["1000", "0", "0"]),
                ("01/01/12 00:30", &["0", "0", "0"]),
                ("01/01/12 00:45", &["2000,5", "0", "500"]),
            ],
        );

        let (df, report) = load_and_preprocess(&path, &LoaderConfig::default()).unwrap();

        assert_eq!(report.rows_read, 3);
        assert_eq!(report.zero_rows_dropped, 1);
        assert_eq!(report.zero_columns_dropped, vec!["MT_002".to_string()]);
        assert_eq!(report.signal_columns, vec!["MT_001".to_string(), "MT_003".to_string()]);
        assert_eq!(df.get_column_names().len(), 2);
        assert!(df.column("MT_002").is_err());

        let values = loads(&df);
        assert_eq!(values.len(), 2);
        assert!((values[0] - 1.0).abs() < 1e-12);
        assert!((values[1] - 2.5005).abs() < 1e-12);
    }

    #[test]
    fn test_load_drops_incomplete_and_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid_csv(
            dir.path(),
            "grid.csv",
            &["MT_001", "MT_002"],
            &[
                ("01/01/12 00:15", &["1", "2"]),
                ("01/01/12 00:30", &["x", "2"]),
                ("not a date", &["1", "2"]),
                ("01/01/12 00:45", &["3", "4"]),
            ],
        );

        let config = LoaderConfig {
            aggregate: LoadAggregate::Median,
            ..LoaderConfig::default()
        };
        let (df, report) = load_and_preprocess(&path, &config).unwrap();

        assert_eq!(report.incomplete_rows_dropped, 2);
        assert_eq!(loads(&df), vec![1.5, 3.5]);
    }

    #[test]
    fn test_load_sorts_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid_csv(
            dir.path(),
            "grid.csv",
            &["MT_001"],
            &[
                ("01/01/12 01:00", &["3000"]),
                ("01/01/12 00:15", &["1000"]),
                ("01/01/12 00:30", &["2000"]),
            ],
        );

        let (df, _) = load_and_preprocess(&path, &LoaderConfig::default()).unwrap();
        assert_eq!(loads(&df), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_load_start_end_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("start_end.csv");
        std::fs::write(
            &path,
            "START;END;LOAD\n01/01/12 00:00;01/01/12 00:15;5000\n01/01/12 00:15;01/01/12 00:30;7000\n",
        )
        .unwrap();

        let config = LoaderConfig {
            layout: TimestampLayout::StartEnd,
            ..LoaderConfig::default()
        };
        let (df, report) = load_and_preprocess(&path, &config).unwrap();
        assert_eq!(report.signal_columns, vec!["LOAD".to_string()]);
        assert_eq!(loads(&df), vec![5.0, 7.0]);
    }

    #[test]
    fn test_load_all_zero_file_yields_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid_csv(
            dir.path(),
            "zeros.csv",
            &["MT_001", "MT_002"],
            &[("01/01/12 00:15", &["0", "0"]), ("01/01/12 00:30", &["0", "0"])],
        );

        let (df, report) = load_and_preprocess(&path, &LoaderConfig::default()).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(report.zero_rows_dropped, 2);
        assert_eq!(report.zero_columns_dropped.len(), 2);
    }

    #[test]
    fn test_load_skips_lines_with_extra_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid_csv(
            dir.path(),
            "ragged.csv",
            &["MT_001", "MT_002"],
            &[
                ("01/01/12 00:15", &["1000", "3000"]),
                ("01/01/12 00:30", &["5000", "5000", "99", "junk"]),
                ("01/01/12 00:45", &["2000", "2000"]),
            ],
        );

        let (df, report) = load_and_preprocess(&path, &LoaderConfig::default()).unwrap();

        assert_eq!(report.malformed_lines_skipped, 1);
        assert_eq!(report.rows_read, 2);
        assert_eq!(df.height(), 2);
        assert_eq!(loads(&df), vec![4.0, 4.0]);
    }
}
