//! Bootstrap and carry-forward handling of static tables

use super::{default_config, pipeline_with};
use crate::crs::{Crs, ProjReprojector};
use crate::error::{GwsiError, Result};
use crate::geometry::{GeometryRecord, GeometrySet};
use crate::models::{FileOutcome, LocationRecord, ObservationRecord, Parameter};
use crate::pipeline::{Pipeline, RunState};
use crate::store::{MemoryStore, PropertyBatch, Store};
use async_trait::async_trait;
use calamine::Data;
use geo::{Geometry, point};
use polars::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Memory store whose first location write fails
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failed_once: AtomicBool,
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_location(&self, location: &LocationRecord) -> Result<()> {
        self.inner.insert_location(location).await
    }

    async fn upsert_locations(&self, locations: &[LocationRecord]) -> Result<u64> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(GwsiError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.upsert_locations(locations).await
    }

    async fn ensure_locations(&self, names: &[String]) -> Result<u64> {
        self.inner.ensure_locations(names).await
    }

    async fn location_names(&self) -> Result<HashSet<String>> {
        self.inner.location_names().await
    }

    async fn merge_location_properties(&self, batch: &PropertyBatch) -> Result<u64> {
        self.inner.merge_location_properties(batch).await
    }

    async fn insert_parameter(&self, parameter: &Parameter) -> Result<()> {
        self.inner.insert_parameter(parameter).await
    }

    async fn upsert_parameter(&self, parameter: &Parameter) -> Result<bool> {
        self.inner.upsert_parameter(parameter).await
    }

    async fn upsert_observations(&self, observations: &[ObservationRecord]) -> Result<u64> {
        self.inner.upsert_observations(observations).await
    }
}

#[tokio::test]
async fn test_first_static_table_bootstraps_locations() {
    let (mut pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1", "2"]);
    assert!(!pipeline.state().is_bootstrapped());

    let sites = df!("SITE_ID" => [1i64, 2, 3], "OWNER" => ["ADWR", "USGS", "BLM"]).unwrap();
    let outcome = pipeline.process_table("GWSI_SITES.csv", sites).await.unwrap();

    assert_eq!(
        outcome,
        FileOutcome::Static {
            bootstrap: true,
            locations_written: 2,
            properties_merged: 2,
        }
    );
    assert!(pipeline.state().is_bootstrapped());
    assert_eq!(store.location_count(), 2);

    let site = store.location("1").unwrap();
    assert_eq!(site.geometry_wkt.as_deref(), Some("POINT(-111 33)"));
    assert_eq!(site.properties, json!({"OWNER": "ADWR", "SITE_ID": 1}));
    // Key 3 has no geometry and is dropped by the bootstrap merge
    assert!(store.location("3").is_none());
}

#[tokio::test]
async fn test_later_static_tables_merge_properties() {
    let (mut pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1", "2"]);

    let sites = df!("SITE_ID" => ["1", "2"], "OWNER" => ["ADWR", "USGS"]).unwrap();
    pipeline.process_table("GWSI_SITES.csv", sites).await.unwrap();

    let logs = df!("WELL_SITE" => [2.0f64, 9.0], "LOG_TYPE" => ["gamma", "sonic"]).unwrap();
    let outcome = pipeline.process_table("GWSI_WELL_LOGS.csv", logs).await.unwrap();

    assert_eq!(
        outcome,
        FileOutcome::Static {
            bootstrap: false,
            locations_written: 0,
            properties_merged: 1,
        }
    );
    assert_eq!(
        store.location("2").unwrap().properties,
        json!({"OWNER": "USGS", "SITE_ID": "2", "WELL_SITE": 2.0, "LOG_TYPE": "gamma"})
    );
    assert_eq!(store.location("1").unwrap().properties["OWNER"], json!("ADWR"));
    assert!(store.location("9").is_none());

    // The carry-forward table keeps every location and gains the new column
    let RunState::Bootstrapped { locations } = pipeline.state() else {
        panic!("expected bootstrapped state");
    };
    assert_eq!(locations.height(), 2);
    assert!(locations.frame().column("LOG_TYPE").is_ok());
    assert!(locations.frame().column("WELL_SITE").is_err());
}

#[tokio::test]
async fn test_unmatched_bootstrap_leaves_store_empty() {
    let (mut pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1"]);

    let sites = df!("SITE_ID" => ["7"], "OWNER" => ["ADWR"]).unwrap();
    let outcome = pipeline.process_table("GWSI_SITES.csv", sites).await.unwrap();

    assert!(matches!(
        outcome,
        FileOutcome::Static {
            locations_written: 0,
            properties_merged: 0,
            ..
        }
    ));
    assert_eq!(store.location_count(), 0);
}

#[tokio::test]
async fn test_key_column_override() {
    let config =
        default_config(Path::new("unused")).with_key_column("GWSI_SITES.csv", "SITE");
    let (mut pipeline, store) = pipeline_with(config, &["1"]);

    let sites = df!("ROW" => [1, 2], "SITE" => ["9", "1"], "OWNER" => ["x", "ADWR"]).unwrap();
    pipeline.process_table("GWSI_SITES.csv", sites).await.unwrap();

    assert_eq!(store.location("1").unwrap().properties["OWNER"], json!("ADWR"));
    assert_eq!(store.location("1").unwrap().properties["ROW"], json!(2));
}

#[tokio::test]
async fn test_empty_table_is_skipped() {
    let (mut pipeline, store) = pipeline_with(default_config(Path::new("unused")), &["1"]);

    let empty = df!("SITE_ID" => Vec::<String>::new()).unwrap();
    let outcome = pipeline.process_table("GWSI_SITES.csv", empty).await.unwrap();

    assert!(matches!(outcome, FileOutcome::Skipped { .. }));
    assert!(!pipeline.state().is_bootstrapped());
    assert_eq!(store.location_count(), 0);
}

#[tokio::test]
async fn test_failed_bootstrap_write_is_retried_by_next_static_table() {
    let store = Arc::new(FlakyStore::default());
    let mut pipeline = Pipeline::new(
        default_config(Path::new("unused")),
        super::geometry_set(&["1", "2"]),
        store.clone(),
    );

    let sites = df!("SITE_ID" => ["1", "2"], "OWNER" => ["ADWR", "USGS"]).unwrap();
    let err = pipeline.process_table("GWSI_SITES.csv", sites.clone()).await.unwrap_err();
    assert!(matches!(err, GwsiError::Database(_)));
    assert!(!pipeline.state().is_bootstrapped());

    let outcome = pipeline.process_table("GWSI_SITES.csv", sites).await.unwrap();
    assert_eq!(
        outcome,
        FileOutcome::Static {
            bootstrap: true,
            locations_written: 2,
            properties_merged: 2,
        }
    );
    assert_eq!(store.inner.location_count(), 2);
}

#[tokio::test]
async fn test_static_tables_sharing_a_column() {
    let (mut pipeline, store) =
        pipeline_with(default_config(Path::new("unused")), &["1", "2", "3"]);

    let sites = df!("SITE_ID" => ["1", "2", "3"], "OWNER" => ["ADWR", "USGS", "BLM"]).unwrap();
    pipeline.process_table("GWSI_SITES.csv", sites).await.unwrap();
    let permits = df!("SITE_ID" => ["2"], "OWNER" => ["NPS"], "PERMIT" => ["55-1"]).unwrap();
    pipeline.process_table("GWSI_PERMITS.csv", permits).await.unwrap();
    let transfers = df!("SITE_ID" => ["2"], "OWNER" => ["USFS"]).unwrap();
    let outcome = pipeline.process_table("GWSI_TRANSFERS.csv", transfers).await.unwrap();

    assert!(matches!(outcome, FileOutcome::Static { properties_merged: 1, .. }));
    assert_eq!(store.location("2").unwrap().properties["OWNER"], json!("USFS"));
    assert_eq!(store.location("1").unwrap().properties["OWNER"], json!("ADWR"));

    let locations = pipeline.locations().unwrap();
    let owner = locations.frame().column("OWNER").unwrap();
    assert_eq!(owner.get(1).unwrap(), AnyValue::String("USFS"));
    assert!(locations.frame().column("PERMIT").is_ok());
}

#[tokio::test]
async fn test_geometry_attribute_shared_with_static_tables() {
    let records = vec![
        GeometryRecord::new("1", Some(Geometry::Point(point!(x: -111.0, y: 33.0))))
            .with_attribute("BASIN", Data::String("SALT".into())),
    ];
    let geometry =
        GeometrySet::from_records("SITE_ID", records, Some(&Crs::wgs84()), &ProjReprojector)
            .unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = Pipeline::new(default_config(Path::new("unused")), geometry, store.clone());

    let sites = df!("SITE_ID" => ["1"], "BASIN" => ["SALT"]).unwrap();
    pipeline.process_table("GWSI_SITES.csv", sites).await.unwrap();
    let wells = df!("SITE_ID" => ["1"], "BASIN" => ["VERDE"], "DEPTH" => [120i64]).unwrap();
    let outcome = pipeline.process_table("GWSI_WELLS.csv", wells).await.unwrap();

    assert!(matches!(outcome, FileOutcome::Static { properties_merged: 1, .. }));
    assert_eq!(
        store.location("1").unwrap().properties,
        json!({"SITE_ID": "1", "BASIN": "VERDE", "DEPTH": 120})
    );
}
