//! In-process store with the same semantics as the PostgreSQL store.

use super::{PropertyBatch, Store, coalesce_locations, coalesce_properties, dedup_observations};
use crate::error::{GwsiError, Result};
use crate::models::{LocationRecord, ObservationRecord, Parameter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    locations: BTreeMap<String, LocationRecord>,
    parameters: BTreeMap<String, Parameter>,
    observations: BTreeMap<(String, String, DateTime<Utc>), f64>,
}

/// Store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // Mutations validate before writing, so a poisoned state is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn location(&self, name: &str) -> Option<LocationRecord> {
        self.state().locations.get(name).cloned()
    }

    pub fn locations(&self) -> Vec<LocationRecord> {
        self.state().locations.values().cloned().collect()
    }

    pub fn parameter(&self, parameter_id: &str) -> Option<Parameter> {
        self.state().parameters.get(parameter_id).cloned()
    }

    pub fn observation(&self, location: &str, parameter: &str, time: DateTime<Utc>) -> Option<f64> {
        self.state()
            .observations
            .get(&(location.to_string(), parameter.to_string(), time))
            .copied()
    }

    pub fn location_count(&self) -> usize {
        self.state().locations.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.state().parameters.len()
    }

    pub fn observation_count(&self) -> usize {
        self.state().observations.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_location(&self, location: &LocationRecord) -> Result<()> {
        let mut state = self.state();
        if state.locations.contains_key(&location.name) {
            return Err(GwsiError::duplicate_key("location", &location.name));
        }
        state.locations.insert(location.name.clone(), location.clone());
        Ok(())
    }

    async fn upsert_locations(&self, locations: &[LocationRecord]) -> Result<u64> {
        let mut state = self.state();
        let mut written = 0;
        for location in coalesce_locations(locations) {
            match state.locations.get_mut(&location.name) {
                Some(existing) => {
                    super::merge_json_objects(&mut existing.properties, &location.properties);
                    if location.geometry_wkt.is_some() {
                        existing.geometry_wkt = location.geometry_wkt;
                    }
                }
                None => {
                    state.locations.insert(location.name.clone(), location);
                }
            }
            written += 1;
        }
        Ok(written)
    }

    async fn ensure_locations(&self, names: &[String]) -> Result<u64> {
        let mut state = self.state();
        let mut created = 0;
        for name in names {
            if !state.locations.contains_key(name) {
                state
                    .locations
                    .insert(name.clone(), LocationRecord::placeholder(name.clone()));
                created += 1;
            }
        }
        Ok(created)
    }

    async fn location_names(&self) -> Result<HashSet<String>> {
        Ok(self.state().locations.keys().cloned().collect())
    }

    async fn merge_location_properties(&self, batch: &PropertyBatch) -> Result<u64> {
        let mut state = self.state();
        let mut updated = 0;
        for (name, properties) in coalesce_properties(batch) {
            if let Some(existing) = state.locations.get_mut(&name) {
                super::merge_json_objects(&mut existing.properties, &Value::Object(properties));
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert_parameter(&self, parameter: &Parameter) -> Result<()> {
        let mut state = self.state();
        if state.parameters.contains_key(&parameter.parameter_id) {
            return Err(GwsiError::duplicate_key("parameter", &parameter.parameter_id));
        }
        state
            .parameters
            .insert(parameter.parameter_id.clone(), parameter.clone());
        Ok(())
    }

    async fn upsert_parameter(&self, parameter: &Parameter) -> Result<bool> {
        let mut state = self.state();
        if state.parameters.contains_key(&parameter.parameter_id) {
            return Ok(false);
        }
        state
            .parameters
            .insert(parameter.parameter_id.clone(), parameter.clone());
        Ok(true)
    }

    async fn upsert_observations(&self, observations: &[ObservationRecord]) -> Result<u64> {
        if observations.is_empty() {
            return Ok(0);
        }
        let mut state = self.state();

        let missing_locations: BTreeSet<&str> = observations
            .iter()
            .map(|o| o.location.as_str())
            .filter(|name| !state.locations.contains_key(*name))
            .collect();
        let missing_parameters: BTreeSet<&str> = observations
            .iter()
            .map(|o| o.parameter.as_str())
            .filter(|id| !state.parameters.contains_key(*id))
            .collect();
        if !missing_locations.is_empty() || !missing_parameters.is_empty() {
            return Err(GwsiError::unresolved(
                missing_locations.into_iter().map(String::from).collect(),
                missing_parameters.into_iter().map(String::from).collect(),
            ));
        }

        let unique = dedup_observations(observations);
        for observation in &unique {
            state.observations.insert(
                (
                    observation.location.clone(),
                    observation.parameter.clone(),
                    observation.time,
                ),
                observation.value,
            );
        }
        Ok(unique.len() as u64)
    }
}
