//! Application constants for the GWSI processor
//!
//! Default names, spatial reference codes, environment variable names and
//! batch sizes used throughout the loader.

// =============================================================================
// Input Conventions
// =============================================================================

/// Identity column of the site geometry layer
pub const DEFAULT_GEOMETRY_ID_COLUMN: &str = "SITE_ID";

/// Name of the geometry column carried by geometry-bearing tables
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Spreadsheet extensions read through calamine
pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls", "xlsm", "ods"];

/// Delimited text extensions read through the polars CSV reader
pub const CSV_EXTENSIONS: &[&str] = &["csv"];

/// Default directory names under the project root
pub const DEFAULT_DATA_DIR: &str = "Data_Tables";
pub const DEFAULT_SHAPE_DIR: &str = "Shape";

/// Rows sampled by the CSV reader for schema inference
pub const CSV_INFER_SCHEMA_ROWS: usize = 10_000;

// =============================================================================
// Spatial Reference
// =============================================================================

/// Canonical spatial reference of every stored geometry
pub const TARGET_EPSG: u16 = 4326;

/// Sidecar file carrying the source projection of a shapefile
pub const PRJ_EXTENSION: &str = "prj";

// =============================================================================
// Store
// =============================================================================

/// Destination schema holding locations, parameters and observations
pub const DEFAULT_SCHEMA: &str = "edr_quickstart";

pub const LOCATIONS_TABLE: &str = "locations";
pub const PARAMETERS_TABLE: &str = "parameters";
pub const OBSERVATIONS_TABLE: &str = "observations";

/// Observation rows written per INSERT statement
pub const DEFAULT_OBSERVATION_BATCH_SIZE: usize = 10_000;

/// Location rows written per INSERT/UPDATE statement
pub const DEFAULT_LOCATION_BATCH_SIZE: usize = 2_000;

/// PostgreSQL identifier length limit
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

// =============================================================================
// Environment
// =============================================================================

pub const ENV_POSTGRES_HOST: &str = "POSTGRES_HOST";
pub const ENV_POSTGRES_DB: &str = "POSTGRES_DB";
pub const ENV_POSTGRES_USER: &str = "POSTGRES_USER";
pub const ENV_POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const ENV_POSTGRES_PORT: &str = "POSTGRES_PORT";

pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Default maximum connections; the pipeline is sequential
pub const DEFAULT_MAX_CONNECTIONS: u32 = 2;

/// Connection acquire timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
