//! Load pipeline orchestration.
//!
//! Drives the per-file loop: classify each table, route time-series
//! tables to the observation writer and static tables through the
//! bootstrap or carry-forward merge, and write everything through a
//! [`Store`]. Files are processed strictly in order; a failed file is
//! recorded and the run continues.

pub mod discovery;
pub mod snapshot;

#[cfg(test)]
pub mod tests;

use self::discovery::{FileDiscovery, file_id};
use self::snapshot::write_snapshot;

use crate::config::{LoaderConfig, ParameterPolicy};
use crate::error::{GwsiError, Result};
use crate::geometry::{GeoFrame, GeometrySet};
use crate::merge::{merge_with_geometry, merge_with_locations};
use crate::models::{
    DatasetKind, FileOutcome, KeyColumn, LocationRecord, ObservationColumns, ProcessingStats,
    TimeSeriesDataset,
};
use crate::properties::{rows_to_properties, to_properties};
use crate::registry::DatasetRegistry;
use crate::store::Store;
use crate::table::{normalize_key, normalize_key_column, read_table};

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::*;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::task;
use tracing::{debug, error, info, warn};

/// Column carrying the parameter id while observations are written
const PARAMETER_COLUMN: &str = "__gwsi_parameter_id";

/// Bootstrap state of a run
#[derive(Debug, Default)]
pub enum RunState {
    /// No static table has been merged against the geometry reference yet
    #[default]
    AwaitingBootstrap,
    /// The location table, carried forward through every later static table
    Bootstrapped { locations: GeoFrame },
}

impl RunState {
    pub fn is_bootstrapped(&self) -> bool {
        matches!(self, RunState::Bootstrapped { .. })
    }
}

/// Sequential loader over one data directory
pub struct Pipeline {
    config: LoaderConfig,
    registry: DatasetRegistry,
    geometry: GeometrySet,
    store: Arc<dyn Store>,
    state: RunState,
    cancelled: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: LoaderConfig, geometry: GeometrySet, store: Arc<dyn Store>) -> Self {
        let registry = config.registry();
        for dataset in registry.shadowed() {
            warn!(
                "Registry declares {} more than once; the declaration with time field {} is never used",
                dataset.file, dataset.time_field
            );
        }

        Self {
            config,
            registry,
            geometry,
            store,
            state: RunState::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the classifier registry; configured key columns still apply
    pub fn with_registry(mut self, registry: DatasetRegistry) -> Self {
        self.registry = self.config.apply_key_columns(registry);
        self
    }

    /// Share a cancellation flag; once set, the run stops before the next store call
    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// The carry-forward location table, once bootstrapped
    pub fn locations(&self) -> Option<&GeoFrame> {
        match &self.state {
            RunState::Bootstrapped { locations } => Some(locations),
            RunState::AwaitingBootstrap => None,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(GwsiError::ProcessingInterrupted {
                reason: "cancelled by user".to_string(),
            });
        }
        Ok(())
    }

    /// Main processing entry point
    pub async fn run(&mut self) -> Result<ProcessingStats> {
        let start_time = Instant::now();
        println!("{}", "Starting GWSI load".bright_green().bold());
        println!("  {} {}", "Data:".bright_cyan(), self.config.data_dir.display());
        println!(
            "  {} {} sites",
            "Geometry:".bright_cyan(),
            self.geometry.len().to_string().bright_white()
        );

        let files = FileDiscovery::new(self.config.data_dir.clone())
            .discover_tables(self.config.bootstrap_file.as_deref())
            .await?;
        println!(
            "  {} {} tables",
            "Found".bright_green(),
            files.len().to_string().bright_white().bold()
        );

        let mut stats = ProcessingStats::default();
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        for path in &files {
            let id = file_id(path);
            pb.set_message(id.clone());

            match self.process_file(path.clone()).await {
                Ok(outcome) => {
                    info!("{}: {:?}", id, outcome);
                    stats.record(&outcome);
                }
                Err(e) if e.is_fatal() => {
                    pb.abandon_with_message(format!("Stopped at {}", id));
                    return Err(e);
                }
                Err(e) => {
                    error!("{} failed: {}", id, e);
                    pb.println(format!("  {} {}: {}", "Failed".bright_red(), id, e));
                    stats.record_failure(&e);
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message("All tables processed");

        if let (Some(path), Some(locations)) = (&self.config.snapshot_path, self.locations()) {
            write_snapshot(locations, path)?;
            stats.snapshot_path = Some(path.clone());
        }

        stats.processing_time_ms = start_time.elapsed().as_millis();
        print_summary(&stats);
        Ok(stats)
    }

    async fn process_file(&mut self, path: PathBuf) -> Result<FileOutcome> {
        self.check_cancelled()?;
        let id = file_id(&path);
        let frame = task::spawn_blocking(move || read_table(&path))
            .await
            .map_err(|e| GwsiError::invalid_format(&id, format!("reader task failed: {}", e)))??;
        self.process_table(&id, frame).await
    }

    /// Classify and load one table
    pub async fn process_table(&mut self, file_id: &str, frame: DataFrame) -> Result<FileOutcome> {
        if frame.height() == 0 || frame.width() == 0 {
            return Ok(FileOutcome::Skipped {
                reason: "table has no rows".to_string(),
            });
        }

        match self.registry.classify(file_id) {
            DatasetKind::TimeSeries(dataset) => self.process_time_series(file_id, &dataset, frame).await,
            DatasetKind::Static => self.process_static(file_id, frame).await,
        }
    }

    async fn process_time_series(
        &mut self,
        file_id: &str,
        dataset: &TimeSeriesDataset,
        frame: DataFrame,
    ) -> Result<FileOutcome> {
        let key = self.registry.key_column(file_id).resolve(&frame)?;
        if frame.column(&dataset.time_field).is_err() {
            return Err(GwsiError::invalid_format(
                file_id,
                format!("time column {} not present", dataset.time_field),
            ));
        }
        let frame = normalize_key_column(&frame, &key)?;

        let names: Vec<String> = frame
            .column(&key)?
            .str()?
            .iter()
            .flatten()
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.check_cancelled()?;
        let placeholders_created = self.store.ensure_locations(&names).await?;
        if placeholders_created > 0 {
            info!("{}: created {} placeholder locations", file_id, placeholders_created);
        }

        let mut parameters_registered = 0;
        let mut observations_upserted = 0;
        for field in &dataset.measured_fields {
            if frame.column(&field.name).is_err() {
                warn!("{}: measured field {} not present, skipping", file_id, field.name);
                continue;
            }

            self.check_cancelled()?;
            let parameter = field.parameter();
            match self.config.parameter_policy {
                ParameterPolicy::Upsert => {
                    if self.store.upsert_parameter(&parameter).await? {
                        parameters_registered += 1;
                    }
                }
                ParameterPolicy::Strict => {
                    self.store.insert_parameter(&parameter).await?;
                    parameters_registered += 1;
                }
            }

            let batch = frame
                .clone()
                .lazy()
                .select([
                    col(key.as_str()),
                    col(dataset.time_field.as_str()),
                    col(field.name.as_str()),
                    lit(field.name.as_str()).alias(PARAMETER_COLUMN),
                ])
                .collect()?;
            let columns = ObservationColumns {
                location: &key,
                parameter: PARAMETER_COLUMN,
                value: &field.name,
                time: &dataset.time_field,
            };

            self.check_cancelled()?;
            let upserted = self.store.upsert_observation_frame(&batch, columns).await?;
            debug!("{}: {} -> {} observations", file_id, field.name, upserted);
            observations_upserted += upserted;
        }

        Ok(FileOutcome::TimeSeries {
            placeholders_created,
            parameters_registered,
            observations_upserted,
        })
    }

    async fn process_static(&mut self, file_id: &str, frame: DataFrame) -> Result<FileOutcome> {
        let key = KeyColumn::Named(self.registry.key_column(file_id).resolve(&frame)?);

        let (bootstrap, locations_written) = match &self.state {
            RunState::AwaitingBootstrap => {
                let merged = merge_with_geometry(&self.geometry, &frame, &key)?;
                let records = location_records(&merged)?;
                info!(
                    "{}: bootstrap merge matched {} of {} rows",
                    file_id,
                    merged.height(),
                    frame.height()
                );

                self.check_cancelled()?;
                let written = self.store.upsert_locations(&records).await?;
                self.state = RunState::Bootstrapped { locations: merged };
                (true, written as usize)
            }
            RunState::Bootstrapped { locations } => {
                // The store merge below does not depend on the location table
                match merge_with_locations(locations, &frame, &key) {
                    Ok(merged) => self.state = RunState::Bootstrapped { locations: merged },
                    Err(e) => warn!("{}: location table not updated: {}", file_id, e),
                }
                (false, 0)
            }
        };

        let batch = property_batch(&frame, &key)?;
        self.check_cancelled()?;
        let properties_merged = self.store.merge_location_properties(&batch).await?;

        Ok(FileOutcome::Static {
            bootstrap,
            locations_written,
            properties_merged,
        })
    }
}

/// Location rows of a bootstrap merge: named by key, properties without key or geometry
fn location_records(merged: &GeoFrame) -> Result<Vec<LocationRecord>> {
    let keys = merged.keys()?;
    let mut records = Vec::with_capacity(keys.len());
    for (row, key) in keys.into_iter().enumerate() {
        let Some(name) = key else { continue };
        records.push(LocationRecord {
            name,
            properties: Value::Object(to_properties(merged.frame(), row, &[merged.key_column()])?),
            geometry_wkt: merged.geometry_wkt(row)?,
        });
    }
    Ok(records)
}

/// A static table's own rows keyed by its key column; rows without a key are dropped
fn property_batch(
    frame: &DataFrame,
    key: &KeyColumn,
) -> Result<Vec<(String, serde_json::Map<String, Value>)>> {
    let key_name = key.resolve(frame)?;
    let key_column = frame.column(&key_name)?;
    let rows = rows_to_properties(frame, &[])?;

    let mut batch = Vec::with_capacity(rows.len());
    for (row, properties) in rows.into_iter().enumerate() {
        if let Some(name) = normalize_key(&key_column.get(row)?) {
            batch.push((name, properties));
        }
    }
    Ok(batch)
}

fn print_summary(stats: &ProcessingStats) {
    println!("\n{}", "Load Summary".bright_green().bold());
    println!(
        "  {} {}ms",
        "Time elapsed:".bright_cyan(),
        stats.processing_time_ms.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Files processed:".bright_cyan(),
        stats.files_processed.to_string().bright_white()
    );
    if stats.files_skipped > 0 {
        println!(
            "  {} {}",
            "Files skipped:".bright_yellow(),
            stats.files_skipped.to_string().bright_yellow()
        );
    }
    if stats.files_failed > 0 {
        println!(
            "  {} {}",
            "Files failed:".bright_red(),
            stats.files_failed.to_string().bright_red().bold()
        );
    }
    println!(
        "  {} {} ({} placeholders)",
        "Locations written:".bright_cyan(),
        stats.locations_written.to_string().bright_white().bold(),
        stats.placeholders_created
    );
    println!(
        "  {} {}",
        "Properties merged:".bright_cyan(),
        stats.properties_merged.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Parameters registered:".bright_cyan(),
        stats.parameters_registered.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Observations upserted:".bright_cyan(),
        stats.observations_upserted.to_string().bright_white().bold()
    );
    if let Some(path) = &stats.snapshot_path {
        println!("  {} {}", "Snapshot:".bright_cyan(), path.display());
    }
}
