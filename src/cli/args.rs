//! Command-line argument definitions for the GWSI processor
//!
//! Defines the CLI interface using the clap derive API.

use crate::config::{LoaderConfig, ParameterPolicy};
use crate::constants::{
    DEFAULT_DATA_DIR, DEFAULT_GEOMETRY_ID_COLUMN, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_OBSERVATION_BATCH_SIZE, DEFAULT_SCHEMA, DEFAULT_SHAPE_DIR,
};
use crate::error::{GwsiError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

/// CLI arguments for the groundwater site inventory loader
///
/// Loads GWSI spreadsheets and the site geometry layer into the
/// locations/parameters/observations schema of a PostGIS database.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "gwsi-processor",
    version,
    about = "Load groundwater site inventory tables and site geometry into PostGIS",
    long_about = "Reads every table of a GWSI data directory, joins static site tables to the \
                  site geometry layer (reprojected to EPSG:4326), and writes locations, \
                  parameters and time-series observations with upsert semantics so a load \
                  can be rerun safely."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Load a data directory into the database
    Load(LoadArgs),
    /// Print how each table of a data directory would be classified
    Classify(ClassifyArgs),
}

/// Arguments for the load command
#[derive(Debug, Clone, Parser)]
pub struct LoadArgs {
    /// Directory holding the GWSI tables (.xlsx, .xls, .ods, .csv)
    #[arg(
        short = 'i',
        long = "data-dir",
        value_name = "PATH",
        default_value = DEFAULT_DATA_DIR,
        help = "Directory of input tables"
    )]
    pub data_dir: PathBuf,

    /// Site geometry shapefile, or a directory containing exactly one
    #[arg(
        short = 'g',
        long = "geometry",
        value_name = "PATH",
        default_value = DEFAULT_SHAPE_DIR,
        help = "Site geometry shapefile or its directory"
    )]
    pub geometry_path: PathBuf,

    #[arg(
        long = "id-column",
        value_name = "COLUMN",
        default_value = DEFAULT_GEOMETRY_ID_COLUMN,
        help = "Identity column of the geometry layer"
    )]
    pub id_column: String,

    /// Source spatial reference of the geometry layer
    ///
    /// Accepts `EPSG:26912`, a bare code, or a proj string. When omitted the
    /// shapefile's .prj sidecar is used.
    #[arg(
        long = "source-crs",
        value_name = "CRS",
        help = "Override the geometry layer's spatial reference"
    )]
    pub source_crs: Option<String>,

    #[arg(
        short = 's',
        long = "schema",
        value_name = "NAME",
        default_value = DEFAULT_SCHEMA,
        help = "Destination schema"
    )]
    pub schema: String,

    #[arg(
        short = 'b',
        long = "batch-size",
        value_name = "ROWS",
        default_value_t = DEFAULT_OBSERVATION_BATCH_SIZE,
        help = "Observation rows per INSERT statement"
    )]
    pub batch_size: usize,

    /// Static table processed first and merged against the geometry layer
    ///
    /// Without this the first static table in file name order bootstraps
    /// the location table.
    #[arg(
        long = "bootstrap",
        value_name = "FILE",
        help = "Static table used to bootstrap locations"
    )]
    pub bootstrap: Option<String>,

    /// Key column override for one file, as FILE=COLUMN (repeatable)
    #[arg(
        short = 'k',
        long = "key",
        value_name = "FILE=COLUMN",
        help = "Use COLUMN instead of the first column as the key of FILE"
    )]
    pub key_columns: Vec<KeyOverride>,

    /// Fail a file when one of its parameters is already registered
    #[arg(long = "strict-parameters")]
    pub strict_parameters: bool,

    #[arg(
        long = "snapshot",
        value_name = "FILE",
        help = "Write the final location table to a parquet file"
    )]
    pub snapshot: Option<PathBuf>,

    /// Create the destination schema and tables if they do not exist
    #[arg(long = "create-schema")]
    pub create_schema: bool,

    /// Run against an in-memory store; no database credentials needed
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    #[arg(
        long = "max-connections",
        value_name = "COUNT",
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        help = "Maximum database connections"
    )]
    pub max_connections: u32,

    /// Logging verbosity level
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)"
    )]
    pub verbose: u8,

    #[arg(
        short = 'q',
        long = "quiet",
        help = "Suppress output except errors",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,
}

/// Arguments for the classify command
#[derive(Debug, Clone, Parser)]
pub struct ClassifyArgs {
    #[arg(
        short = 'i',
        long = "data-dir",
        value_name = "PATH",
        default_value = DEFAULT_DATA_DIR,
        help = "Directory of input tables"
    )]
    pub data_dir: PathBuf,

    #[arg(long = "bootstrap", value_name = "FILE")]
    pub bootstrap: Option<String>,

    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)"
    )]
    pub verbose: u8,
}

/// A `FILE=COLUMN` key column override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOverride {
    pub file: String,
    pub column: String,
}

impl FromStr for KeyOverride {
    type Err = GwsiError;

    fn from_str(s: &str) -> Result<Self> {
        let (file, column) = s.split_once('=').ok_or_else(|| {
            GwsiError::configuration(format!("Key override must be FILE=COLUMN, got: {}", s))
        })?;
        let (file, column) = (file.trim(), column.trim());
        if file.is_empty() || column.is_empty() {
            return Err(GwsiError::configuration(format!(
                "Key override has an empty file or column: {}",
                s
            )));
        }
        Ok(Self {
            file: file.to_string(),
            column: column.to_string(),
        })
    }
}

impl LoadArgs {
    /// Validate the load arguments for consistency
    pub fn validate(&self) -> Result<()> {
        if !self.data_dir.is_dir() {
            return Err(GwsiError::configuration(format!(
                "Data directory does not exist: {}",
                self.data_dir.display()
            )));
        }
        if !self.geometry_path.exists() {
            return Err(GwsiError::configuration(format!(
                "Geometry path does not exist: {}",
                self.geometry_path.display()
            )));
        }
        if self.max_connections == 0 {
            return Err(GwsiError::configuration(
                "Max connections must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Build the loader configuration these arguments describe
    pub fn to_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig::new(&self.data_dir, &self.geometry_path)
            .with_geometry_id_column(&self.id_column)
            .with_schema(&self.schema)
            .with_observation_batch_size(self.batch_size);

        if let Some(crs) = &self.source_crs {
            config = config.with_source_crs(crs);
        }
        if let Some(bootstrap) = &self.bootstrap {
            config = config.with_bootstrap_file(bootstrap);
        }
        for key in &self.key_columns {
            config = config.with_key_column(&key.file, &key.column);
        }
        if self.strict_parameters {
            config = config.with_parameter_policy(ParameterPolicy::Strict);
        }
        if let Some(snapshot) = &self.snapshot {
            config = config.with_snapshot(snapshot);
        }
        if self.create_schema {
            config = config.with_create_schema();
        }
        if self.dry_run {
            config = config.with_dry_run();
        }
        config
    }

    /// Determine the appropriate log level based on verbosity flags
    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            log_level(self.verbose)
        }
    }
}

impl ClassifyArgs {
    pub fn get_log_level(&self) -> &'static str {
        log_level(self.verbose)
    }
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args.iter().copied()).unwrap()
    }

    #[test]
    fn test_load_defaults() {
        let args = parse(&["gwsi-processor", "load"]);
        let Some(Commands::Load(load)) = args.command else {
            panic!("expected load command");
        };

        assert_eq!(load.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(load.schema, DEFAULT_SCHEMA);
        assert_eq!(load.batch_size, DEFAULT_OBSERVATION_BATCH_SIZE);
        assert_eq!(load.get_log_level(), "warn");

        let config = load.to_config();
        assert_eq!(config.parameter_policy, ParameterPolicy::Upsert);
        assert!(!config.dry_run);
        assert!(config.bootstrap_file.is_none());
    }

    #[test]
    fn test_load_options_reach_config() {
        let args = parse(&[
            "gwsi-processor",
            "load",
            "--data-dir",
            "tables",
            "--source-crs",
            "EPSG:26912",
            "--bootstrap",
            "GWSI_SITES.xlsx",
            "-k",
            "GWSI_WELL_LOGS.xlsx=WELL_SITE_ID",
            "--strict-parameters",
            "--snapshot",
            "out/locations.parquet",
            "--dry-run",
            "-vv",
        ]);
        let Some(Commands::Load(load)) = args.command else {
            panic!("expected load command");
        };
        assert_eq!(load.get_log_level(), "debug");

        let config = load.to_config();
        assert_eq!(config.data_dir, PathBuf::from("tables"));
        assert_eq!(config.source_crs.as_deref(), Some("EPSG:26912"));
        assert_eq!(config.bootstrap_file.as_deref(), Some("GWSI_SITES.xlsx"));
        assert_eq!(
            config.key_columns.get("GWSI_WELL_LOGS.xlsx").map(String::as_str),
            Some("WELL_SITE_ID")
        );
        assert_eq!(config.parameter_policy, ParameterPolicy::Strict);
        assert_eq!(
            config.snapshot_path,
            Some(PathBuf::from("out/locations.parquet"))
        );
        assert!(config.dry_run);
    }

    #[test]
    fn test_key_override_parsing() {
        let key: KeyOverride = "GWSI_SITES.xlsx = SITE_ID".parse().unwrap();
        assert_eq!(key.file, "GWSI_SITES.xlsx");
        assert_eq!(key.column, "SITE_ID");

        assert!("GWSI_SITES.xlsx".parse::<KeyOverride>().is_err());
        assert!("=SITE_ID".parse::<KeyOverride>().is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["gwsi-processor", "load", "-q", "-v"]).is_err());

        let args = parse(&["gwsi-processor", "load", "-q"]);
        let Some(Commands::Load(load)) = args.command else {
            panic!("expected load command");
        };
        assert_eq!(load.get_log_level(), "error");
    }

    #[test]
    fn test_validate_missing_data_dir() {
        let args = parse(&["gwsi-processor", "load", "--data-dir", "/nonexistent/gwsi"]);
        let Some(Commands::Load(load)) = args.command else {
            panic!("expected load command");
        };
        assert!(load.validate().unwrap_err().is_fatal());
    }
}
