//! Parquet snapshot of the carry-forward location table.

use crate::error::Result;
use crate::geometry::GeoFrame;
use polars::prelude::{ParquetCompression, ParquetWriter, StatisticsOptions};
use std::fs;
use std::path::Path;
use tracing::info;

/// Write the location table, geometry as WKT text. Returns rows written.
pub fn write_snapshot(locations: &GeoFrame, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut frame = locations.frame().clone();
    let file = fs::File::create(path)?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Snappy)
        .with_statistics(StatisticsOptions::default())
        .finish(&mut frame)?;

    info!("Wrote {} locations to {}", frame.height(), path.display());
    Ok(frame.height())
}
