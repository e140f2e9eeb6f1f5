//! Command implementations for the GWSI processor CLI
//!
//! Wires the parsed arguments to logging, configuration, the store and the
//! load pipeline.

use crate::cli::args::{ClassifyArgs, Commands, LoadArgs};
use crate::config::{DatabaseConfig, LoaderConfig};
use crate::crs::ProjReprojector;
use crate::geometry::GeometrySet;
use crate::models::{DatasetKind, ProcessingStats};
use crate::pipeline::Pipeline;
use crate::pipeline::discovery::{FileDiscovery, file_id};
use crate::registry::DatasetRegistry;
use crate::store::{MemoryStore, PgStore, Store};
use anyhow::{Context, Result, bail};
use colored::*;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

/// Run one subcommand to completion
pub async fn run(command: Commands, cancelled: Arc<AtomicBool>) -> Result<()> {
    match command {
        Commands::Load(args) => {
            let stats = run_load(args, cancelled).await?;
            if !stats.succeeded() {
                bail!(
                    "{} of {} files failed; last error: {}",
                    stats.files_failed,
                    stats.files_processed + stats.files_failed + stats.files_skipped,
                    stats.last_error.unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Classify(args) => run_classify(args).await,
    }
}

/// Load a data directory
///
/// Credentials and the geometry layer are checked before any table is read.
async fn run_load(args: LoadArgs, cancelled: Arc<AtomicBool>) -> Result<ProcessingStats> {
    setup_logging(args.get_log_level(), args.quiet);
    debug!("Command line arguments: {:?}", args);

    args.validate()?;
    let config = args.to_config();
    config.validate()?;
    debug!("Loader configuration: {:?}", config);

    let store = open_store(&config, args.max_connections).await?;

    let geometry = GeometrySet::load(
        &config.geometry_path,
        &config.geometry_id_column,
        config.source_crs.as_deref(),
        &ProjReprojector,
    )
    .with_context(|| format!("loading site geometry from {}", config.geometry_path.display()))?;
    info!(
        "Loaded {} site geometries ({} duplicate keys dropped)",
        geometry.len(),
        geometry.duplicates_dropped()
    );

    let mut pipeline = Pipeline::new(config, geometry, store).with_cancellation(cancelled);
    Ok(pipeline.run().await?)
}

async fn open_store(config: &LoaderConfig, max_connections: u32) -> Result<Arc<dyn Store>> {
    if config.dry_run {
        info!("Dry run: writing to an in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let database = DatabaseConfig::from_env()?.with_max_connections(max_connections);
    let store = PgStore::connect(&database, &config.schema)
        .await
        .with_context(|| format!("connecting to {}:{}", database.host, database.port))?
        .with_observation_batch_size(config.observation_batch_size)
        .with_location_batch_size(config.location_batch_size);

    if config.create_schema {
        store.create_schema().await?;
    }
    store.ensure_geometry_srid().await?;
    Ok(Arc::new(store))
}

/// Print the classification of every discovered table
async fn run_classify(args: ClassifyArgs) -> Result<()> {
    setup_logging(args.get_log_level(), false);

    let registry = DatasetRegistry::default();
    for dataset in registry.shadowed() {
        println!(
            "{} {} is declared more than once; {} is never used",
            "Warning:".bright_yellow(),
            dataset.file,
            dataset.time_field
        );
    }

    let files = FileDiscovery::new(args.data_dir.clone())
        .discover_tables(args.bootstrap.as_deref())
        .await?;
    println!(
        "{} {} tables in {}",
        "Found".bright_green(),
        files.len().to_string().bright_white().bold(),
        args.data_dir.display()
    );

    for path in &files {
        let id = file_id(path);
        match registry.classify(&id) {
            DatasetKind::TimeSeries(dataset) => println!(
                "  {:<40} {} by {} [{}]",
                id,
                "time series".bright_cyan(),
                dataset.time_field,
                dataset.field_names().join(", ")
            ),
            DatasetKind::Static => println!("  {:<40} {}", id, "static".bright_white()),
        }
    }
    Ok(())
}

/// Set up structured logging based on CLI arguments
fn setup_logging(log_level: &str, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gwsi_processor={}", log_level)));

    if quiet {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    debug!("Logging initialized at level: {}", log_level);
}
