//! Core data structures and types for site inventory loading.
//!
//! Defines dataset classifications, the entity records written to the
//! store, and the statistics reported at the end of a run.

use crate::error::{GwsiError, Result};
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which column of a table holds the location join key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KeyColumn {
    /// Positional convention: the table's first column
    #[default]
    First,
    /// An explicitly named column
    Named(String),
}

impl KeyColumn {
    /// Resolve to a concrete column name of `frame`
    pub fn resolve(&self, frame: &DataFrame) -> Result<String> {
        match self {
            KeyColumn::First => frame
                .get_column_names()
                .first()
                .map(|name| name.to_string())
                .ok_or_else(|| GwsiError::missing_column("<first column>")),
            KeyColumn::Named(name) => {
                if frame.get_column_names().iter().any(|c| c.as_str() == name.as_str()) {
                    Ok(name.clone())
                } else {
                    Err(GwsiError::missing_column(name.as_str()))
                }
            }
        }
    }
}

/// A measured quantity declared by a time-series dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasuredField {
    pub name: String,
    pub unit_symbol: String,
    pub unit_label: String,
}

impl MeasuredField {
    pub fn new(name: &str, unit_symbol: &str, unit_label: &str) -> Self {
        Self {
            name: name.to_string(),
            unit_symbol: unit_symbol.to_string(),
            unit_label: unit_label.to_string(),
        }
    }

    /// The parameter registered for this field
    pub fn parameter(&self) -> Parameter {
        Parameter {
            parameter_id: self.name.clone(),
            unit_symbol: self.unit_symbol.clone(),
            unit_label: self.unit_label.clone(),
        }
    }
}

/// Declaration of a time-series dataset in the classifier registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesDataset {
    pub file: String,
    pub time_field: String,
    pub measured_fields: Vec<MeasuredField>,
}

impl TimeSeriesDataset {
    pub fn field_names(&self) -> Vec<&str> {
        self.measured_fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Classification of an input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    Static,
    TimeSeries(TimeSeriesDataset),
}

/// A named measured quantity; the id doubles as display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub parameter_id: String,
    pub unit_symbol: String,
    pub unit_label: String,
}

/// A location row ready to be written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub name: String,
    pub properties: serde_json::Value,
    pub geometry_wkt: Option<String>,
}

impl LocationRecord {
    /// Placeholder created for a key first seen in a time-series file
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: serde_json::Value::Object(serde_json::Map::new()),
            geometry_wkt: None,
        }
    }
}

/// A single scalar measurement keyed by location and parameter names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub location: String,
    pub parameter: String,
    pub value: f64,
    pub time: DateTime<Utc>,
}

/// Column names an observation table is read through
#[derive(Debug, Clone, Copy)]
pub struct ObservationColumns<'a> {
    pub location: &'a str,
    pub parameter: &'a str,
    pub value: &'a str,
    pub time: &'a str,
}

/// What happened to one input file
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Static {
        bootstrap: bool,
        locations_written: usize,
        properties_merged: u64,
    },
    TimeSeries {
        placeholders_created: u64,
        parameters_registered: usize,
        observations_upserted: u64,
    },
    Skipped {
        reason: String,
    },
}

/// Processing statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub locations_written: usize,
    pub placeholders_created: u64,
    pub properties_merged: u64,
    pub parameters_registered: usize,
    pub observations_upserted: u64,
    pub last_error: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    pub processing_time_ms: u128,
}

impl ProcessingStats {
    /// Fold the outcome of one file into the run totals
    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Static {
                locations_written,
                properties_merged,
                ..
            } => {
                self.files_processed += 1;
                self.locations_written += locations_written;
                self.properties_merged += properties_merged;
            }
            FileOutcome::TimeSeries {
                placeholders_created,
                parameters_registered,
                observations_upserted,
            } => {
                self.files_processed += 1;
                self.placeholders_created += placeholders_created;
                self.parameters_registered += parameters_registered;
                self.observations_upserted += observations_upserted;
            }
            FileOutcome::Skipped { .. } => self.files_skipped += 1,
        }
    }

    pub fn record_failure(&mut self, error: &GwsiError) {
        self.files_failed += 1;
        self.last_error = Some(error.to_string());
    }

    pub fn succeeded(&self) -> bool {
        self.files_failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_key_column_resolution() {
        let frame = df!("SITE_ID" => ["1", "2"], "OWNER" => ["a", "b"]).unwrap();

        assert_eq!(KeyColumn::First.resolve(&frame).unwrap(), "SITE_ID");
        assert_eq!(
            KeyColumn::Named("OWNER".to_string())
                .resolve(&frame)
                .unwrap(),
            "OWNER"
        );
        assert!(
            KeyColumn::Named("MISSING".to_string())
                .resolve(&frame)
                .is_err()
        );
        assert!(KeyColumn::First.resolve(&DataFrame::empty()).is_err());
    }

    #[test]
    fn test_stats_accumulate_outcomes() {
        let mut stats = ProcessingStats::default();
        stats.record(&FileOutcome::Static {
            bootstrap: true,
            locations_written: 3,
            properties_merged: 3,
        });
        stats.record(&FileOutcome::TimeSeries {
            placeholders_created: 1,
            parameters_registered: 2,
            observations_upserted: 10,
        });
        stats.record(&FileOutcome::Skipped {
            reason: "empty".to_string(),
        });
        stats.record_failure(&GwsiError::configuration("boom"));

        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.locations_written, 3);
        assert_eq!(stats.observations_upserted, 10);
        assert!(!stats.succeeded());
        assert!(stats.last_error.unwrap().contains("boom"));
    }

    #[test]
    fn test_placeholder_location() {
        let location = LocationRecord::placeholder("553311");
        assert_eq!(location.name, "553311");
        assert_eq!(location.properties, serde_json::json!({}));
        assert!(location.geometry_wkt.is_none());
    }
}
