//! Time-series routing: placeholders, parameters and observations

use super::{default_config, pipeline_with};
use crate::config::ParameterPolicy;
use crate::error::GwsiError;
use crate::models::{FileOutcome, MeasuredField, TimeSeriesDataset};
use crate::registry::DatasetRegistry;
use chrono::{TimeZone, Utc};
use polars::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn well_lifts() -> DataFrame {
    df!(
        "SITE_ID" => [1i64, 1, 2],
        "WLLI_ENTRY_DATE" => ["2024-01-01", "2024-02-01", "2024-01-01"],
        "WLWA_DEPTH_TO_WATER" => [Some(120.5), None, Some(98.0)],
        "PSI" => [Some(12.0), Some(13.0), None]
    )
    .unwrap()
}

#[tokio::test]
async fn test_time_series_creates_placeholders_and_observations() {
    let (mut pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1"]);

    let outcome = pipeline
        .process_table("GWSI_WELL_LIFTS.csv", well_lifts())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        FileOutcome::TimeSeries {
            placeholders_created: 2,
            parameters_registered: 2,
            observations_upserted: 4,
        }
    );
    // Time-series files never bootstrap
    assert!(!pipeline.state().is_bootstrapped());

    let placeholder = store.location("2").unwrap();
    assert!(placeholder.geometry_wkt.is_none());
    assert_eq!(placeholder.properties, serde_json::json!({}));

    let parameter = store.parameter("WLWA_DEPTH_TO_WATER").unwrap();
    assert_eq!(parameter.unit_symbol, "ft");

    let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(store.observation("1", "WLWA_DEPTH_TO_WATER", jan), Some(120.5));
    assert_eq!(store.observation("2", "WLWA_DEPTH_TO_WATER", jan), Some(98.0));
    assert_eq!(store.observation("2", "PSI", jan), None);
    assert_eq!(store.observation_count(), 4);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let (mut pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1"]);

    pipeline
        .process_table("GWSI_WELL_LIFTS.csv", well_lifts())
        .await
        .unwrap();
    let outcome = pipeline
        .process_table("GWSI_WELL_LIFTS.csv", well_lifts())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        FileOutcome::TimeSeries {
            placeholders_created: 0,
            parameters_registered: 0,
            observations_upserted: 4,
        }
    );
    assert_eq!(store.location_count(), 2);
    assert_eq!(store.parameter_count(), 2);
    assert_eq!(store.observation_count(), 4);
}

#[tokio::test]
async fn test_strict_policy_rejects_registered_parameter() {
    let config = default_config(Path::new("unused")).with_parameter_policy(ParameterPolicy::Strict);
    let (mut pipeline, store) = pipeline_with(config, &["1"]);

    pipeline
        .process_table("GWSI_WELL_LIFTS.csv", well_lifts())
        .await
        .unwrap();
    let err = pipeline
        .process_table("GWSI_WELL_LIFTS.csv", well_lifts())
        .await
        .unwrap_err();

    assert!(matches!(err, GwsiError::DuplicateKey { .. }));
    assert!(!err.is_fatal());
    assert_eq!(store.observation_count(), 4);
}

#[tokio::test]
async fn test_missing_time_column_fails_file() {
    let (mut pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1"]);

    let frame = df!("SITE_ID" => ["1"], "PSI" => [12.0]).unwrap();
    let err = pipeline
        .process_table("GWSI_WELL_LIFTS.csv", frame)
        .await
        .unwrap_err();

    assert!(matches!(err, GwsiError::InvalidFormat { .. }));
    assert!(err.to_string().contains("WLLI_ENTRY_DATE"));
    assert_eq!(store.location_count(), 0);
}

#[tokio::test]
async fn test_missing_measured_field_is_skipped() {
    let (mut pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1"]);

    let frame = df!(
        "SITE_ID" => ["1"],
        "WLLI_ENTRY_DATE" => ["2024-03-01 08:30:00"],
        "PSI" => [14.5]
    )
    .unwrap();
    let outcome = pipeline
        .process_table("GWSI_WELL_LIFTS.csv", frame)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        FileOutcome::TimeSeries {
            parameters_registered: 1,
            observations_upserted: 1,
            ..
        }
    ));
    assert!(store.parameter("WLWA_DEPTH_TO_WATER").is_none());
    let time = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
    assert_eq!(store.observation("1", "PSI", time), Some(14.5));
}

#[tokio::test]
async fn test_custom_registry() {
    let registry = DatasetRegistry::new(vec![TimeSeriesDataset {
        file: "levels.csv".to_string(),
        time_field: "DATE".to_string(),
        measured_fields: vec![MeasuredField::new("LEVEL", "ft", "Feet")],
    }]);
    let (pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1"]);
    let mut pipeline = pipeline.with_registry(registry);

    let frame = df!("WELL" => ["A-1"], "DATE" => ["2024-01-01"], "LEVEL" => [3.25]).unwrap();
    pipeline.process_table("levels.csv", frame).await.unwrap();

    let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(store.observation("A-1", "LEVEL", jan), Some(3.25));

    // The built-in declarations no longer apply
    let frame = df!("SITE_ID" => ["1"], "OWNER" => ["ADWR"]).unwrap();
    let outcome = pipeline.process_table("GWSI_WELL_LIFTS.csv", frame).await.unwrap();
    assert!(matches!(outcome, FileOutcome::Static { bootstrap: true, .. }));
}

#[tokio::test]
async fn test_custom_registry_keeps_configured_key_columns() {
    let registry = DatasetRegistry::new(vec![TimeSeriesDataset {
        file: "levels.csv".to_string(),
        time_field: "DATE".to_string(),
        measured_fields: vec![MeasuredField::new("LEVEL", "ft", "Feet")],
    }]);
    let config = default_config(Path::new("unused")).with_key_column("levels.csv", "WELL");
    let (pipeline, store) = pipeline_with(config, &["1"]);
    let mut pipeline = pipeline.with_registry(registry);

    let frame = df!(
        "ROW" => [1i64],
        "WELL" => ["A-1"],
        "DATE" => ["2024-01-01"],
        "LEVEL" => [3.25]
    )
    .unwrap();
    pipeline.process_table("levels.csv", frame).await.unwrap();

    let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(store.observation("A-1", "LEVEL", jan), Some(3.25));
    assert!(store.location("1").is_none());
}

#[tokio::test]
async fn test_cancellation_stops_before_store_calls() {
    let cancelled = Arc::new(AtomicBool::new(true));
    let (pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1"]);
    let mut pipeline = pipeline.with_cancellation(cancelled);

    let err = pipeline
        .process_table("GWSI_WELL_LIFTS.csv", well_lifts())
        .await
        .unwrap_err();

    assert!(matches!(err, GwsiError::ProcessingInterrupted { .. }));
    assert!(err.is_fatal());
    assert_eq!(store.location_count(), 0);
}
