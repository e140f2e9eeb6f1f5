//! Dataset classification registry.
//!
//! Holds the ordered declarations of time-series datasets and classifies
//! input files by exact file-name equality. Files without a declaration
//! are static attribute tables.

use crate::models::{DatasetKind, KeyColumn, MeasuredField, TimeSeriesDataset};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Ordered classifier registry; the first declaration for a file wins
#[derive(Clone, Debug)]
pub struct DatasetRegistry {
    datasets: Vec<TimeSeriesDataset>,
    key_columns: HashMap<String, KeyColumn>,
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        Self::new(builtin_datasets())
    }
}

impl DatasetRegistry {
    pub fn new(datasets: Vec<TimeSeriesDataset>) -> Self {
        Self {
            datasets,
            key_columns: HashMap::new(),
        }
    }

    /// An empty registry: every file classifies as static
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Override the key column for one file
    pub fn with_key_column(mut self, file: impl Into<String>, key: KeyColumn) -> Self {
        self.key_columns.insert(file.into(), key);
        self
    }

    /// Classify a file identifier (its file name)
    pub fn classify(&self, file_id: &str) -> DatasetKind {
        match self.datasets.iter().find(|d| d.file == file_id) {
            Some(dataset) => {
                debug!("{} classified as time series ({})", file_id, dataset.time_field);
                DatasetKind::TimeSeries(dataset.clone())
            }
            None => DatasetKind::Static,
        }
    }

    /// Key column for a file, defaulting to the first column
    pub fn key_column(&self, file_id: &str) -> KeyColumn {
        self.key_columns.get(file_id).cloned().unwrap_or_default()
    }

    /// Declarations that can never match because an earlier one has the same file
    pub fn shadowed(&self) -> Vec<&TimeSeriesDataset> {
        let mut seen = HashSet::new();
        self.datasets
            .iter()
            .filter(|d| !seen.insert(d.file.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Time-series datasets of the GWSI export
pub fn builtin_datasets() -> Vec<TimeSeriesDataset> {
    let gpm = |name: &str| MeasuredField::new(name, "gpm", "Gallons per minute");
    let feet = |name: &str| MeasuredField::new(name, "ft", "Feet");

    vec![
        TimeSeriesDataset {
            file: "GWSI_FLOWING_DISCHARGES.xlsx".to_string(),
            time_field: "FLWD_MEASURE_DATE".to_string(),
            measured_fields: vec![gpm("FLWD_DISCHARGE_RATE")],
        },
        TimeSeriesDataset {
            file: "GWSI_PUMPING_DISCHARGES.xlsx".to_string(),
            time_field: "PMPD_MEASURE_DATE".to_string(),
            measured_fields: vec![
                gpm("PMPD_DISCHARGE_RATE"),
                feet("PMPD_PRODUCTION_WATER_LEVEL"),
                feet("PMPD_STATIC_WATER_LEVEL"),
                MeasuredField::new("PMPD_PUMPING_PERIOD", "h", "Hours"),
                MeasuredField::new("PMPD_SPECIFIC_CAPACITY", "gpm/ft", "Gallons per minute per foot"),
                feet("PMPD_WELL_DRAWDOWN"),
            ],
        },
        TimeSeriesDataset {
            file: "GWSI_TRANSDUCER_LEVELS.csv".to_string(),
            time_field: "MEASUREMENT_DATE".to_string(),
            measured_fields: vec![
                feet("DEPTH_TO_WATER"),
                MeasuredField::new("WATER_LEVEL_ELEVATION", "ft", "Feet above mean sea level"),
                MeasuredField::new("TEMPERATURE", "degC", "Degrees Celsius"),
                MeasuredField::new("BATTERY_VOLTAGE", "V", "Volts"),
                MeasuredField::new("PSI", "psi", "Pounds per square inch"),
            ],
        },
        // Shadowed by the declaration above; kept so the export's alternate
        // column naming is documented alongside it.
        TimeSeriesDataset {
            file: "GWSI_TRANSDUCER_LEVELS.csv".to_string(),
            time_field: "WLWA_MEASUREMENT_DATE".to_string(),
            measured_fields: vec![
                feet("WLWA_DEPTH_TO_WATER"),
                MeasuredField::new("PSI", "psi", "Pounds per square inch"),
            ],
        },
        TimeSeriesDataset {
            file: "GWSI_WELL_LIFTS.csv".to_string(),
            time_field: "WLLI_ENTRY_DATE".to_string(),
            measured_fields: vec![
                feet("WLWA_DEPTH_TO_WATER"),
                MeasuredField::new("PSI", "psi", "Pounds per square inch"),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_file_is_static() {
        let registry = DatasetRegistry::default();
        assert_eq!(registry.classify("GWSI_SITES.xlsx"), DatasetKind::Static);
        assert_eq!(registry.classify(""), DatasetKind::Static);
        // Matching is exact, not case-insensitive or by prefix
        assert_eq!(
            registry.classify("gwsi_flowing_discharges.xlsx"),
            DatasetKind::Static
        );
    }

    #[test]
    fn test_time_series_declaration() {
        let registry = DatasetRegistry::default();
        match registry.classify("GWSI_PUMPING_DISCHARGES.xlsx") {
            DatasetKind::TimeSeries(dataset) => {
                assert_eq!(dataset.time_field, "PMPD_MEASURE_DATE");
                assert_eq!(dataset.measured_fields.len(), 6);
                assert_eq!(dataset.field_names()[0], "PMPD_DISCHARGE_RATE");
            }
            DatasetKind::Static => panic!("expected time series"),
        }
    }

    #[test]
    fn test_first_declaration_wins() {
        let registry = DatasetRegistry::default();
        match registry.classify("GWSI_TRANSDUCER_LEVELS.csv") {
            DatasetKind::TimeSeries(dataset) => {
                assert_eq!(dataset.time_field, "MEASUREMENT_DATE");
            }
            DatasetKind::Static => panic!("expected time series"),
        }

        let shadowed = registry.shadowed();
        assert_eq!(shadowed.len(), 1);
        assert_eq!(shadowed[0].time_field, "WLWA_MEASUREMENT_DATE");
    }

    #[test]
    fn test_classification_is_deterministic() {
        let registry = DatasetRegistry::default();
        for file in [
            "GWSI_SITES.xlsx",
            "GWSI_WELL_LIFTS.csv",
            "GWSI_FLOWING_DISCHARGES.xlsx",
        ] {
            let first = registry.classify(file);
            for _ in 0..5 {
                assert_eq!(registry.classify(file), first);
            }
        }
    }

    #[test]
    fn test_key_column_override() {
        let registry = DatasetRegistry::empty()
            .with_key_column("GWSI_WELL_LOGS.xlsx", KeyColumn::Named("WELL_SITE_ID".into()));

        assert_eq!(registry.key_column("GWSI_SITES.xlsx"), KeyColumn::First);
        assert_eq!(
            registry.key_column("GWSI_WELL_LOGS.xlsx"),
            KeyColumn::Named("WELL_SITE_ID".into())
        );
        assert!(registry.is_empty());
    }
}
