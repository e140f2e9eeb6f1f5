//! Tests for the load pipeline
//!
//! Exercise the orchestrator against an in-memory store and an in-memory
//! geometry reference.

pub mod static_tables;
pub mod time_series;

use crate::config::LoaderConfig;
use crate::crs::{Crs, ProjReprojector};
use crate::geometry::{GeometryRecord, GeometrySet};
use crate::pipeline::Pipeline;
use crate::store::MemoryStore;
use geo::{Geometry, point};
use std::path::Path;
use std::sync::Arc;

/// Geometry reference with one point per key
pub fn geometry_set(keys: &[&str]) -> GeometrySet {
    let records = keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            GeometryRecord::new(
                *key,
                Some(Geometry::Point(point!(x: -111.0 - i as f64, y: 33.0))),
            )
        })
        .collect();
    GeometrySet::from_records("SITE_ID", records, Some(&Crs::wgs84()), &ProjReprojector).unwrap()
}

/// Pipeline over `data_dir` writing to a fresh memory store
pub fn pipeline_with(
    config: LoaderConfig,
    keys: &[&str],
) -> (Pipeline, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(config, geometry_set(keys), store.clone());
    (pipeline, store)
}

pub fn default_config(data_dir: &Path) -> LoaderConfig {
    LoaderConfig::new(data_dir, data_dir.join("Shape")).with_dry_run()
}
