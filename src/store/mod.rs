//! Persistence boundary for locations, parameters and observations.
//!
//! [`Store`] is the contract the pipeline writes through. Every operation
//! is a single transaction. [`PgStore`] implements it against a PostGIS
//! schema; [`MemoryStore`] holds the same data in process for dry runs and
//! tests.

mod memory;
mod postgres;
mod schema;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use schema::{schema_ddl, validate_schema_name};

use crate::error::Result;
use crate::models::{LocationRecord, ObservationColumns, ObservationRecord, Parameter};
use crate::table::{datetime_from_any, f64_from_any, normalize_key};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A batch of `(location name, properties)` pairs to merge
pub type PropertyBatch = [(String, Map<String, Value>)];

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert one location; an existing name is a duplicate-key error
    async fn insert_location(&self, location: &LocationRecord) -> Result<()>;

    /// Insert locations, or merge properties into existing ones of the same
    /// name. A null geometry never replaces a stored one. Returns rows written.
    async fn upsert_locations(&self, locations: &[LocationRecord]) -> Result<u64>;

    /// Create empty placeholder locations for names not yet stored.
    /// Returns how many were created.
    async fn ensure_locations(&self, names: &[String]) -> Result<u64>;

    async fn location_names(&self) -> Result<HashSet<String>>;

    /// Union each entry's properties into the stored location of that name
    /// (entry values win). Unknown names are ignored. Returns rows updated.
    async fn merge_location_properties(&self, batch: &PropertyBatch) -> Result<u64>;

    /// Register a parameter; an existing id is a duplicate-key error
    async fn insert_parameter(&self, parameter: &Parameter) -> Result<()>;

    /// Register a parameter unless it exists. Returns whether it was created.
    async fn upsert_parameter(&self, parameter: &Parameter) -> Result<bool>;

    /// Insert or overwrite observations keyed by (location, parameter, time).
    ///
    /// Every location and parameter must already exist; otherwise nothing is
    /// written and the error lists every missing key.
    async fn upsert_observations(&self, observations: &[ObservationRecord]) -> Result<u64>;

    /// Upsert the complete rows of `frame`, read through `columns`
    async fn upsert_observation_frame(
        &self,
        frame: &DataFrame,
        columns: ObservationColumns<'_>,
    ) -> Result<u64> {
        let observations = collect_observations(frame, columns)?;
        if observations.is_empty() {
            return Ok(0);
        }
        self.upsert_observations(&observations).await
    }
}

/// Read observations out of a table, dropping rows with any field missing
pub fn collect_observations(
    frame: &DataFrame,
    columns: ObservationColumns<'_>,
) -> Result<Vec<ObservationRecord>> {
    let location = frame.column(columns.location)?;
    let parameter = frame.column(columns.parameter)?;
    let value = frame.column(columns.value)?;
    let time = frame.column(columns.time)?;

    let mut observations = Vec::with_capacity(frame.height());
    for row in 0..frame.height() {
        let record = (|| {
            Some(ObservationRecord {
                location: normalize_key(&location.get(row).ok()?)?,
                parameter: normalize_key(&parameter.get(row).ok()?)?,
                value: f64_from_any(&value.get(row).ok()?)?,
                time: datetime_from_any(&time.get(row).ok()?)?,
            })
        })();
        if let Some(record) = record {
            observations.push(record);
        }
    }

    let dropped = frame.height() - observations.len();
    if dropped > 0 {
        debug!("Dropped {} incomplete rows for {}", dropped, columns.value);
    }
    Ok(observations)
}

/// One entry per (location, parameter, time); later entries win
pub(crate) fn dedup_observations(observations: &[ObservationRecord]) -> Vec<&ObservationRecord> {
    let mut index: HashMap<(&str, &str, DateTime<Utc>), usize> = HashMap::new();
    let mut unique: Vec<&ObservationRecord> = Vec::with_capacity(observations.len());
    for observation in observations {
        let key = (
            observation.location.as_str(),
            observation.parameter.as_str(),
            observation.time,
        );
        match index.get(&key) {
            Some(&i) => unique[i] = observation,
            None => {
                index.insert(key, unique.len());
                unique.push(observation);
            }
        }
    }
    unique
}

/// Collapse repeated names: properties are unioned in order and the last
/// non-null geometry is kept
pub(crate) fn coalesce_locations(locations: &[LocationRecord]) -> Vec<LocationRecord> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut merged: Vec<LocationRecord> = Vec::with_capacity(locations.len());
    for location in locations {
        match index.get(location.name.as_str()) {
            Some(&i) => {
                let existing = &mut merged[i];
                merge_json_objects(&mut existing.properties, &location.properties);
                if location.geometry_wkt.is_some() {
                    existing.geometry_wkt = location.geometry_wkt.clone();
                }
            }
            None => {
                index.insert(location.name.as_str(), merged.len());
                merged.push(location.clone());
            }
        }
    }
    merged
}

/// Collapse repeated names in a property batch, later values winning
pub(crate) fn coalesce_properties(batch: &PropertyBatch) -> Vec<(String, Map<String, Value>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut merged: Vec<(String, Map<String, Value>)> = Vec::with_capacity(batch.len());
    for (name, properties) in batch {
        match index.get(name.as_str()) {
            Some(&i) => merged[i]
                .1
                .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone()))),
            None => {
                index.insert(name.as_str(), merged.len());
                merged.push((name.clone(), properties.clone()));
            }
        }
    }
    merged
}

/// Shallow JSON object union; `update` wins on key collisions.
/// A non-object target is replaced.
pub fn merge_json_objects(target: &mut Value, update: &Value) {
    match (target.as_object_mut(), update.as_object()) {
        (Some(existing), Some(new)) => {
            for (key, value) in new {
                existing.insert(key.clone(), value.clone());
            }
        }
        (_, Some(_)) => *target = update.clone(),
        (_, None) => {}
    }
}
