//! GWSI Processor Library
//!
//! Loads groundwater site inventory (GWSI) tables and the site geometry
//! layer into a normalized locations/parameters/observations schema.
//!
//! This library provides tools for:
//! - Classifying input tables as static site attributes or time series
//! - Reading spreadsheets and CSV tables into polars frames
//! - Loading site geometry from shapefiles, reprojected to EPSG:4326
//! - Joining static tables to the geometry and to each other by site key
//! - Writing locations, parameters and observations with upsert semantics

pub mod config;
pub mod constants;
pub mod crs;
pub mod error;
pub mod geometry;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod properties;
pub mod registry;
pub mod store;
pub mod table;

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
}

// Re-export commonly used types
pub use config::{DatabaseConfig, LoaderConfig, ParameterPolicy};
pub use error::{GwsiError, Result};
pub use models::{DatasetKind, FileOutcome, KeyColumn, ProcessingStats};
pub use pipeline::Pipeline;
pub use store::{MemoryStore, PgStore, Store};
