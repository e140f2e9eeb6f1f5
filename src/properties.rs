//! Row to JSON property serialization.

use crate::constants::GEOMETRY_COLUMN;
use crate::error::Result;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Timelike, Utc};
use polars::prelude::*;
use serde_json::{Map, Number, Value};

const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S";
const ISO_TIME: &str = "%H:%M:%S";

/// Microsecond fraction when present, nothing otherwise
fn iso_pattern(base: &str, nanos: u32) -> String {
    if nanos / 1_000 == 0 {
        base.to_string()
    } else {
        format!("{}%.6f", base)
    }
}

/// Serialize one row of `frame` into a JSON object.
///
/// Columns named in `exclude` are skipped; the geometry column is always
/// skipped.
pub fn to_properties(frame: &DataFrame, row: usize, exclude: &[&str]) -> Result<Map<String, Value>> {
    let mut properties = Map::new();
    for column in frame.get_columns() {
        let name = column.name().as_str();
        if name == GEOMETRY_COLUMN || exclude.contains(&name) {
            continue;
        }
        properties.insert(name.to_string(), value_to_json(&column.get(row)?));
    }
    Ok(properties)
}

/// Serialize every row of `frame`
pub fn rows_to_properties(frame: &DataFrame, exclude: &[&str]) -> Result<Vec<Map<String, Value>>> {
    (0..frame.height())
        .map(|row| to_properties(frame, row, exclude))
        .collect()
}

/// JSON form of a single cell
pub fn value_to_json(value: &AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(v) => Value::from(*v),
        AnyValue::Int16(v) => Value::from(*v),
        AnyValue::Int32(v) => Value::from(*v),
        AnyValue::Int64(v) => Value::from(*v),
        AnyValue::UInt8(v) => Value::from(*v),
        AnyValue::UInt16(v) => Value::from(*v),
        AnyValue::UInt32(v) => Value::from(*v),
        AnyValue::UInt64(v) => Value::from(*v),
        // NaN and infinities have no JSON form
        AnyValue::Float32(v) => float_to_json(*v as f64),
        AnyValue::Float64(v) => float_to_json(*v),
        AnyValue::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(*days as i64)))
            .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        AnyValue::Datetime(v, unit, tz) => datetime_to_json(*v, *unit, tz.map(|tz| tz.as_str())),
        AnyValue::DatetimeOwned(v, unit, tz) => {
            datetime_to_json(*v, *unit, tz.as_deref().map(|tz| tz.as_str()))
        }
        AnyValue::Duration(v, unit) => Value::String(format_duration(*v, *unit)),
        AnyValue::Time(nanos) => {
            let secs = (*nanos / 1_000_000_000) as u32;
            let frac = (*nanos % 1_000_000_000) as u32;
            NaiveTime::from_num_seconds_from_midnight_opt(secs, frac)
                .map(|t| Value::String(t.format(&iso_pattern(ISO_TIME, frac)).to_string()))
                .unwrap_or(Value::Null)
        }
        other => Value::String(other.to_string()),
    }
}

fn float_to_json(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Naive datetimes render without an offset; zoned ones keep theirs. Named
/// zones other than UTC have no offset table here and render in UTC.
fn datetime_to_json(value: i64, unit: TimeUnit, time_zone: Option<&str>) -> Value {
    let datetime = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    };
    let Some(datetime) = datetime else {
        return Value::Null;
    };

    let pattern = iso_pattern(ISO_DATETIME, datetime.nanosecond());
    let rendered = match time_zone {
        None => datetime.naive_utc().format(&pattern).to_string(),
        Some(zone) => {
            let offset = fixed_offset(zone).unwrap_or(Utc.fix());
            datetime
                .with_timezone(&offset)
                .format(&format!("{}%:z", pattern))
                .to_string()
        }
    };
    Value::String(rendered)
}

/// `+07:00` style offsets, and the `Etc/GMT` names polars canonicalizes them to
fn fixed_offset(zone: &str) -> Option<FixedOffset> {
    if let Ok(offset) = zone.parse::<FixedOffset>() {
        return Some(offset);
    }
    // Etc/GMT names carry the reversed sign
    let hours: i32 = zone.strip_prefix("Etc/GMT")?.parse().ok()?;
    FixedOffset::west_opt(hours * 3600)
}

/// `D days HH:MM:SS[.ffffff]`, the conventional rendering of a time delta
fn format_duration(value: i64, unit: TimeUnit) -> String {
    let micros = match unit {
        TimeUnit::Nanoseconds => value / 1_000,
        TimeUnit::Microseconds => value,
        TimeUnit::Milliseconds => value * 1_000,
    };
    let days = micros.div_euclid(86_400_000_000);
    let rest = micros.rem_euclid(86_400_000_000);
    let (hours, rest) = (rest / 3_600_000_000, rest % 3_600_000_000);
    let (minutes, rest) = (rest / 60_000_000, rest % 60_000_000);
    let (seconds, fraction) = (rest / 1_000_000, rest % 1_000_000);

    if fraction == 0 {
        format!("{} days {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{} days {:02}:{:02}:{:02}.{:06}", days, hours, minutes, seconds, fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use serde_json::json;

    #[test]
    fn test_row_serialization() {
        let t = NaiveDateTime::parse_from_str("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let frame = df!(
            "t" => [t],
            "n" => [f64::NAN],
            "s" => ["ok"],
            "geometry" => ["POINT(1 2)"]
        )
        .unwrap();

        let properties = to_properties(&frame, 0, &[]).unwrap();
        assert_eq!(
            Value::Object(properties),
            json!({"t": "2024-01-01T00:00:00", "n": null, "s": "ok"})
        );
    }

    #[test]
    fn test_geometry_always_excluded() {
        let frame = df!("SITE_ID" => ["1"], "geometry" => ["POINT(1 2)"], "DEPTH" => [3i64]).unwrap();

        let properties = to_properties(&frame, 0, &["SITE_ID"]).unwrap();
        assert_eq!(Value::Object(properties), json!({"DEPTH": 3}));

        let rows = rows_to_properties(&frame, &[]).unwrap();
        assert!(!rows[0].contains_key("geometry"));
        assert_eq!(rows[0]["SITE_ID"], json!("1"));
    }

    #[test]
    fn test_scalar_values() {
        assert_eq!(value_to_json(&AnyValue::Null), Value::Null);
        assert_eq!(value_to_json(&AnyValue::Boolean(true)), json!(true));
        assert_eq!(value_to_json(&AnyValue::Float64(1.5)), json!(1.5));
        assert_eq!(value_to_json(&AnyValue::Float32(f32::INFINITY)), Value::Null);
        assert_eq!(value_to_json(&AnyValue::Date(19723)), json!("2024-01-01"));
        assert_eq!(
            value_to_json(&AnyValue::Datetime(1_500_000, TimeUnit::Microseconds, None)),
            json!("1970-01-01T00:00:01.500000")
        );
    }

    #[test]
    fn test_zoned_datetimes_keep_their_offset() {
        assert_eq!(
            value_to_json(&AnyValue::Datetime(0, TimeUnit::Milliseconds, Some(&TimeZone::UTC))),
            json!("1970-01-01T00:00:00+00:00")
        );
        let mst = TimeZone::opt_try_new(Some("-07:00")).unwrap().unwrap();
        assert_eq!(
            value_to_json(&AnyValue::Datetime(1_500, TimeUnit::Milliseconds, Some(&mst))),
            json!("1969-12-31T17:00:01.500000-07:00")
        );
        assert_eq!(fixed_offset("Etc/GMT+7"), FixedOffset::west_opt(7 * 3600));
        assert!(fixed_offset("America/Phoenix").is_none());
    }

    #[test]
    fn test_duration_rendering() {
        assert_eq!(
            value_to_json(&AnyValue::Duration(90_061_000, TimeUnit::Milliseconds)),
            json!("1 days 01:01:01")
        );
        assert_eq!(format_duration(-1_000, TimeUnit::Milliseconds), "-1 days 23:59:59");
        assert_eq!(format_duration(1_500, TimeUnit::Microseconds), "0 days 00:00:00.001500");
    }
}
