//! Configuration management and validation.
//!
//! Provides the loader configuration (input locations, key conventions,
//! write policies) and the database connection settings read from the
//! environment.

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_GEOMETRY_ID_COLUMN, DEFAULT_LOCATION_BATCH_SIZE,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_OBSERVATION_BATCH_SIZE, DEFAULT_POSTGRES_PORT,
    DEFAULT_SCHEMA, ENV_POSTGRES_DB, ENV_POSTGRES_HOST, ENV_POSTGRES_PASSWORD, ENV_POSTGRES_PORT,
    ENV_POSTGRES_USER,
};
use crate::error::{GwsiError, Result};
use crate::models::KeyColumn;
use crate::registry::DatasetRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// How parameter registration treats a parameter that already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ParameterPolicy {
    /// Insert if absent, otherwise keep the stored row
    #[default]
    Upsert,
    /// Fail the file with a duplicate-key error
    Strict,
}

/// Global configuration for a load run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directory of input tables
    pub data_dir: PathBuf,

    /// Site geometry shapefile, or a directory containing one
    pub geometry_path: PathBuf,

    /// Identity column of the geometry layer
    pub geometry_id_column: String,

    /// Source CRS of the geometry layer (`EPSG:n`, a bare code, or a proj string).
    /// When unset the `.prj` sidecar is used.
    pub source_crs: Option<String>,

    /// Destination schema
    pub schema: String,

    /// Observation rows per INSERT statement
    pub observation_batch_size: usize,

    /// Location rows per statement for bulk location writes
    pub location_batch_size: usize,

    /// Static file forced to be processed first as the bootstrap table
    pub bootstrap_file: Option<String>,

    /// Per-file key column overrides (file name -> column name)
    pub key_columns: HashMap<String, String>,

    pub parameter_policy: ParameterPolicy,

    /// Write the final location table to this parquet file
    pub snapshot_path: Option<PathBuf>,

    /// Create the destination tables when they do not exist
    pub create_schema: bool,

    /// Use an in-memory store instead of PostgreSQL
    pub dry_run: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(crate::constants::DEFAULT_DATA_DIR),
            geometry_path: PathBuf::from(crate::constants::DEFAULT_SHAPE_DIR),
            geometry_id_column: DEFAULT_GEOMETRY_ID_COLUMN.to_string(),
            source_crs: None,
            schema: DEFAULT_SCHEMA.to_string(),
            observation_batch_size: DEFAULT_OBSERVATION_BATCH_SIZE,
            location_batch_size: DEFAULT_LOCATION_BATCH_SIZE,
            bootstrap_file: None,
            key_columns: HashMap::new(),
            parameter_policy: ParameterPolicy::default(),
            snapshot_path: None,
            create_schema: false,
            dry_run: false,
        }
    }
}

impl LoaderConfig {
    pub fn new(data_dir: impl Into<PathBuf>, geometry_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            geometry_path: geometry_path.into(),
            ..Self::default()
        }
    }

    pub fn with_geometry_id_column(mut self, column: impl Into<String>) -> Self {
        self.geometry_id_column = column.into();
        self
    }

    pub fn with_source_crs(mut self, crs: impl Into<String>) -> Self {
        self.source_crs = Some(crs.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_observation_batch_size(mut self, batch_size: usize) -> Self {
        self.observation_batch_size = batch_size;
        self
    }

    pub fn with_bootstrap_file(mut self, file: impl Into<String>) -> Self {
        self.bootstrap_file = Some(file.into());
        self
    }

    /// Use a named key column for one file instead of its first column
    pub fn with_key_column(mut self, file: impl Into<String>, column: impl Into<String>) -> Self {
        self.key_columns.insert(file.into(), column.into());
        self
    }

    pub fn with_parameter_policy(mut self, policy: ParameterPolicy) -> Self {
        self.parameter_policy = policy;
        self
    }

    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn with_create_schema(mut self) -> Self {
        self.create_schema = true;
        self
    }

    pub fn with_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Check values that would otherwise fail deep inside a run
    pub fn validate(&self) -> Result<()> {
        crate::store::validate_schema_name(&self.schema)?;

        if self.observation_batch_size == 0 || self.location_batch_size == 0 {
            return Err(GwsiError::configuration("batch sizes must be greater than zero"));
        }
        if self.geometry_id_column.trim().is_empty() {
            return Err(GwsiError::configuration("geometry id column cannot be empty"));
        }
        Ok(())
    }

    /// Registry with this configuration's key column overrides applied
    pub fn registry(&self) -> DatasetRegistry {
        self.apply_key_columns(DatasetRegistry::default())
    }

    pub fn apply_key_columns(&self, registry: DatasetRegistry) -> DatasetRegistry {
        self.key_columns.iter().fold(registry, |registry, (file, column)| {
            registry.with_key_column(file.clone(), KeyColumn::Named(column.clone()))
        })
    }
}

/// Connection settings for the PostgreSQL/PostGIS store
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl DatabaseConfig {
    /// Read settings from the process environment, loading `.env` first if present
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(GwsiError::configuration(format!("invalid .env file: {}", e))),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Missing required keys are all
    /// reported together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = [
            ENV_POSTGRES_HOST,
            ENV_POSTGRES_DB,
            ENV_POSTGRES_USER,
            ENV_POSTGRES_PASSWORD,
        ];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| lookup(key).is_none_or(|v| v.is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(GwsiError::configuration(format!(
                "missing database environment variables: {}",
                missing.join(", ")
            )));
        }

        let port = match lookup(ENV_POSTGRES_PORT) {
            Some(raw) if !raw.is_empty() => raw.parse::<u16>().map_err(|_| {
                GwsiError::configuration(format!("{} is not a valid port: {}", ENV_POSTGRES_PORT, raw))
            })?,
            _ => DEFAULT_POSTGRES_PORT,
        };

        let get = |key: &str| lookup(key).unwrap_or_default();
        Ok(Self {
            host: get(ENV_POSTGRES_HOST),
            port,
            database: get(ENV_POSTGRES_DB),
            user: get(ENV_POSTGRES_USER),
            password: get(ENV_POSTGRES_PASSWORD),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        })
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}
