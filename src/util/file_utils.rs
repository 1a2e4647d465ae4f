// External crates
use log::{debug, warn};
use polars::prelude::*;
use std::io::Cursor;
use std::path::Path;

// Local modules
use crate::constants::CSV_SEPARATOR;
use crate::error::{GridError, GridResult};

/// Counts the fields of one CSV line, ignoring separators inside double quotes
fn field_count(line: &str, separator: char) -> usize {
    let mut in_quotes = false;
    let mut count = 1;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => count += 1,
            _ => {}
        }
    }
    count
}

/// Drops data lines that carry more fields than the header
///
/// Blank lines are removed without being counted. Returns the remaining text and the number of lines removed.
fn drop_overlong_lines(text: &str, separator: char) -> (String, usize) {
    let mut lines = text.lines();
    let Some(header) = lines.next() else {
        return (String::new(), 0);
    };
    let expected = field_count(header.trim_end_matches('\r'), separator);

    let mut kept = String::with_capacity(text.len());
    kept.push_str(header);
    kept.push('\n');
    let mut skipped = 0;
    for line in lines {
        let trimmed = line.trim_end_matches('\r');
        if trimmed.is_empty() {
            continue;
        }
        if field_count(trimmed, separator) > expected {
            skipped += 1;
            continue;
        }
        kept.push_str(trimmed);
        kept.push('\n');
    }
    (kept, skipped)
}

/// Reads a semicolon-delimited CSV file with every column kept as text
///
/// Raw grid exports use decimal commas, so numeric coercion is left to
/// [`parse_decimal`]. Lines with more fields than the header are skipped
/// entirely and counted; lines with too few are padded with nulls, which
/// later cleaning stages drop.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
///
/// # Returns
///
/// Returns a DataFrame of String columns in file order and the number of
/// over-long lines that were skipped
pub fn read_semicolon_csv<P: AsRef<Path>>(file_path: P) -> GridResult<(DataFrame, usize)> {
    let path = file_path.as_ref();
    if !path.exists() {
        return Err(GridError::FileNotFound(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path)?;
    let (kept, skipped) = drop_overlong_lines(&text, char::from(CSV_SEPARATOR));
    if skipped > 0 {
        warn!(
            "Skipped {} line(s) with more fields than the header in {}",
            skipped,
            path.display()
        );
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_ignore_errors(true)
        .map_parse_options(|options| options.with_separator(CSV_SEPARATOR))
        .into_reader_with_file_handle(Cursor::new(kept.into_bytes()))
        .finish()?;

    debug!(
        "Read {} rows x {} columns from {}",
        df.height(),
        df.width(),
        path.display()
    );
    Ok((df, skipped))
}

/// Parses a numeric cell that may use a comma as decimal separator
///
/// Unparseable or empty cells become `None`.
pub fn parse_decimal(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.replace(',', ".").parse::<f64>().ok()
}

/// Coerces a column into optional floats
///
/// Text columns go through [`parse_decimal`]; numeric columns are cast.
pub fn column_to_decimals(column: &Column) -> GridResult<Vec<Option<f64>>> {
    match column.dtype() {
        DataType::String => Ok(column
            .str()?
            .into_iter()
            .map(|cell| cell.and_then(parse_decimal))
            .collect()),
        _ => {
            let casted = column.cast(&DataType::Float64)?;
            Ok(casted.f64()?.into_iter().collect())
        }
    }
}

/// Looks up a column by name, reporting the name when it is absent
pub fn required_column<'a>(df: &'a DataFrame, name: &str) -> GridResult<&'a Column> {
    df.column(name)
        .map_err(|_| GridError::MissingColumn(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_accepts_comma_and_period() {
        assert_eq!(parse_decimal("2,5"), Some(2.5));
        assert_eq!(parse_decimal("2.5"), Some(2.5));
        assert_eq!(parse_decimal(" 10 "), Some(10.0));
        assert_eq!(parse_decimal("0"), Some(0.0));
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("n/a"), None);
        assert_eq!(parse_decimal("1.234,5"), None);
    }

    #[test]
    fn test_read_semicolon_csv_keeps_text_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        std::fs::write(
            &path,
            "TIMESTAMP;MT_001;MT_002\n01/01/12 00:15;1,5;2\n01/01/12 00:30;3;4,25\n",
        )
        .unwrap();

        let (df, skipped) = read_semicolon_csv(&path).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 3);
        assert_eq!(df.column("MT_001").unwrap().dtype(), &DataType::String);

        let values = column_to_decimals(df.column("MT_002").unwrap()).unwrap();
        assert_eq!(values, vec![Some(2.0), Some(4.25)]);
    }

    #[test]
    fn test_read_semicolon_csv_missing_file() {
        let result = read_semicolon_csv("non_existent_file.csv");
        match result {
            Err(GridError::FileNotFound(path)) => {
                assert!(path.ends_with("non_existent_file.csv"))
            }
            other => panic!("Expected FileNotFound, got {:?}", other.map(|(df, _)| df.height())),
        }
    }

    #[test]
    fn test_read_semicolon_csv_skips_overlong_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        std::fs::write(
            &path,
            "TIMESTAMP;MT_001;MT_002\r\n\
             01/01/12 00:15;1;2\r\n\
             01/01/12 00:30;5000;5000;99;junk\r\n\
             \r\n\
             01/01/12 01:00;\"4;5\";6\r\n",
        )
        .unwrap();

        let (df, skipped) = read_semicolon_csv(&path).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(df.height(), 2);

        let first = df.column("MT_001").unwrap().str().unwrap();
        assert_eq!(first.get(1), Some("4;5"));
        let second = column_to_decimals(df.column("MT_002").unwrap()).unwrap();
        assert_eq!(second, vec![Some(2.0), Some(6.0)]);
    }

    #[test]
    fn test_field_count_respects_quotes() {
        assert_eq!(field_count("a;b;c", ';'), 3);
        assert_eq!(field_count("a;\"b;c\"", ';'), 2);
        assert_eq!(field_count("", ';'), 1);
    }
}
