//! Tabular input reading and value coercion.
//!
//! Reads one input file into a polars `DataFrame`: spreadsheets through
//! calamine (first worksheet, first row as header, per-column type
//! inference) and CSV through the polars reader. Also holds the scalar
//! coercions shared by the merge engine and the observation writer.

use crate::constants::{CSV_EXTENSIONS, CSV_INFER_SCHEMA_ROWS, SPREADSHEET_EXTENSIONS};
use crate::error::{GwsiError, Result};
use calamine::{Data, DataType as CellDataType, Reader, open_workbook_auto};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Input table formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Spreadsheet,
    Csv,
}

impl TableFormat {
    /// Format implied by a file extension, if it is a supported table
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
            Some(TableFormat::Spreadsheet)
        } else if CSV_EXTENSIONS.contains(&ext.as_str()) {
            Some(TableFormat::Csv)
        } else {
            None
        }
    }
}

/// Read a supported table file
pub fn read_table(path: &Path) -> Result<DataFrame> {
    match TableFormat::from_path(path) {
        Some(TableFormat::Spreadsheet) => read_spreadsheet(path),
        Some(TableFormat::Csv) => read_csv(path),
        None => Err(GwsiError::invalid_format(path, "unsupported table extension")),
    }
}

/// Read a CSV file with a header row, parsing date-like columns
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(CSV_INFER_SCHEMA_ROWS))
        .map_parse_options(|options| options.with_try_parse_dates(true))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    debug!("Read {} rows x {} columns from {}", frame.height(), frame.width(), path.display());
    Ok(frame)
}

/// Read the first worksheet of a spreadsheet
pub fn read_spreadsheet(path: &Path) -> Result<DataFrame> {
    let spreadsheet_error = |reason: String| GwsiError::Spreadsheet {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| spreadsheet_error(e.to_string()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| spreadsheet_error("workbook has no worksheets".to_string()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| spreadsheet_error(e.to_string()))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(DataFrame::empty());
    };
    let names = header_names(header);
    let mut cells: Vec<Vec<&Data>> = vec![Vec::with_capacity(range.height()); names.len()];
    for row in rows {
        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        for (i, column) in cells.iter_mut().enumerate() {
            column.push(row.get(i).unwrap_or(&Data::Empty));
        }
    }

    let columns = names
        .iter()
        .zip(cells.iter())
        .map(|(name, values)| build_column(name, values))
        .collect::<Result<Vec<_>>>()?;
    let frame = DataFrame::new(columns)?;
    debug!(
        "Read {} rows x {} columns from sheet '{}' of {}",
        frame.height(),
        frame.width(),
        sheet,
        path.display()
    );
    Ok(frame)
}

/// Header cells as unique, non-empty column names
fn header_names(header: &[Data]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    header
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let base = match cell {
                Data::Empty => format!("column_{}", i),
                other => other.to_string().trim().to_string(),
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 { base } else { format!("{}.{}", base, *count - 1) }
        })
        .collect()
}

/// Kind a spreadsheet column settles on after looking at every non-empty cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Empty,
    Int,
    Float,
    Bool,
    DateTime,
    Duration,
    Text,
}

fn cell_kind(cell: &Data) -> CellKind {
    match cell {
        Data::Empty | Data::Error(_) => CellKind::Empty,
        Data::Int(_) => CellKind::Int,
        Data::Float(_) => CellKind::Float,
        Data::Bool(_) => CellKind::Bool,
        Data::DateTime(dt) if dt.is_duration() => CellKind::Duration,
        Data::DateTime(_) | Data::DateTimeIso(_) => CellKind::DateTime,
        Data::DurationIso(_) => CellKind::Duration,
        Data::String(s) if s.trim().is_empty() => CellKind::Empty,
        Data::String(_) => CellKind::Text,
    }
}

fn unify(a: CellKind, b: CellKind) -> CellKind {
    use CellKind::*;
    match (a, b) {
        (Empty, k) | (k, Empty) => k,
        (x, y) if x == y => x,
        (Int, Float) | (Float, Int) => Float,
        _ => Text,
    }
}

/// Build a typed column from raw cells, falling back to text when kinds conflict
pub(crate) fn build_column(name: &str, values: &[&Data]) -> Result<Column> {
    let kind = values
        .iter()
        .map(|cell| cell_kind(cell))
        .fold(CellKind::Empty, unify);

    let series = match kind {
        CellKind::Int => Series::new(
            name.into(),
            values.iter().map(|c| c.get_int()).collect::<Vec<Option<i64>>>(),
        ),
        CellKind::Float => Series::new(
            name.into(),
            values.iter().map(|c| c.as_f64()).collect::<Vec<Option<f64>>>(),
        ),
        CellKind::Bool => Series::new(
            name.into(),
            values.iter().map(|c| c.get_bool()).collect::<Vec<Option<bool>>>(),
        ),
        CellKind::DateTime => Series::new(
            name.into(),
            values
                .iter()
                .map(|c| c.as_datetime().map(|dt| dt.and_utc().timestamp_micros()))
                .collect::<Vec<Option<i64>>>(),
        )
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
        CellKind::Duration => Series::new(
            name.into(),
            values
                .iter()
                .map(|c| c.as_duration().map(|d| d.num_milliseconds()))
                .collect::<Vec<Option<i64>>>(),
        )
        .cast(&DataType::Duration(TimeUnit::Milliseconds))?,
        CellKind::Text | CellKind::Empty => Series::new(
            name.into(),
            values
                .iter()
                .map(|c| match cell_kind(c) {
                    CellKind::Empty => None,
                    _ => Some(c.to_string()),
                })
                .collect::<Vec<Option<String>>>(),
        ),
    };
    Ok(series.into_column())
}

/// Canonical string form of a join key.
///
/// Integral floats lose their fractional part so `7`, `7.0` and `"7"`
/// all normalize to `"7"`. Strings are trimmed; nulls, NaN and blank
/// strings have no key.
pub fn normalize_key(value: &AnyValue) -> Option<String> {
    let key = match value {
        AnyValue::Null => return None,
        AnyValue::String(s) => s.trim().to_string(),
        AnyValue::StringOwned(s) => s.trim().to_string(),
        AnyValue::Int8(v) => v.to_string(),
        AnyValue::Int16(v) => v.to_string(),
        AnyValue::Int32(v) => v.to_string(),
        AnyValue::Int64(v) => v.to_string(),
        AnyValue::UInt8(v) => v.to_string(),
        AnyValue::UInt16(v) => v.to_string(),
        AnyValue::UInt32(v) => v.to_string(),
        AnyValue::UInt64(v) => v.to_string(),
        AnyValue::Float32(v) => return normalize_float(*v as f64),
        AnyValue::Float64(v) => return normalize_float(*v),
        other => other.to_string().trim_matches('"').trim().to_string(),
    };
    if key.is_empty() { None } else { Some(key) }
}

fn normalize_float(v: f64) -> Option<String> {
    if v.is_nan() {
        None
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        Some(format!("{}", v as i64))
    } else {
        Some(v.to_string())
    }
}

/// Replace `column` with its normalized string form
pub fn normalize_key_column(frame: &DataFrame, column: &str) -> Result<DataFrame> {
    let source = frame.column(column)?;
    let keys = (0..source.len())
        .map(|i| source.get(i).map(|v| normalize_key(&v)))
        .collect::<PolarsResult<Vec<Option<String>>>>()?;

    let mut out = frame.clone();
    out.with_column(Series::new(column.into(), keys))?;
    Ok(out)
}

/// Numeric value of a cell, if it has one
pub fn f64_from_any(value: &AnyValue) -> Option<f64> {
    let v = match value {
        AnyValue::Float64(v) => *v,
        AnyValue::Float32(v) => *v as f64,
        AnyValue::Int8(v) => *v as f64,
        AnyValue::Int16(v) => *v as f64,
        AnyValue::Int32(v) => *v as f64,
        AnyValue::Int64(v) => *v as f64,
        AnyValue::UInt8(v) => *v as f64,
        AnyValue::UInt16(v) => *v as f64,
        AnyValue::UInt32(v) => *v as f64,
        AnyValue::UInt64(v) => *v as f64,
        AnyValue::String(s) => s.trim().parse().ok()?,
        AnyValue::StringOwned(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    if v.is_nan() { None } else { Some(v) }
}

/// Timestamp of a cell, interpreting naive values as UTC
pub fn datetime_from_any(value: &AnyValue) -> Option<DateTime<Utc>> {
    match value {
        AnyValue::Datetime(v, unit, _) => timestamp_to_utc(*v, *unit),
        AnyValue::DatetimeOwned(v, unit, _) => timestamp_to_utc(*v, *unit),
        AnyValue::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)?
            .checked_add_signed(chrono::Duration::days(*days as i64))?
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc()),
        AnyValue::String(s) => parse_datetime(s),
        AnyValue::StringOwned(s) => parse_datetime(s),
        _ => None,
    }
}

fn timestamp_to_utc(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Nanoseconds => Some(Utc.timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    }
}

/// Parse the timestamp spellings found in exported tables
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}
