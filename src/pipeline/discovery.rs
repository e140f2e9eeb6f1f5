//! Input table discovery.
//!
//! Lists the supported tables of the data directory in a deterministic
//! order: by file name, with the configured bootstrap table first.

use crate::error::{GwsiError, Result};
use crate::table::TableFormat;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// File discovery component for the input data directory
#[derive(Debug)]
pub struct FileDiscovery {
    data_dir: PathBuf,
}

impl FileDiscovery {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Discover every supported table directly under the data directory.
    ///
    /// Office lock files (`~$name.xlsx`) and hidden files are ignored.
    pub async fn discover_tables(&self, bootstrap: Option<&str>) -> Result<Vec<PathBuf>> {
        if !self.data_dir.is_dir() {
            return Err(GwsiError::DatasetNotFound {
                path: self.data_dir.clone(),
            });
        }
        debug!("Searching for tables in: {}", self.data_dir.display());

        let mut files = Vec::new();
        let mut dir = fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && is_table_file(&path) {
                files.push(path);
            }
        }
        files.sort_by_key(|path| file_id(path));

        if let Some(bootstrap) = bootstrap {
            let position = files
                .iter()
                .position(|path| file_id(path) == bootstrap)
                .ok_or_else(|| {
                    GwsiError::configuration(format!(
                        "bootstrap table {} not found in {}",
                        bootstrap,
                        self.data_dir.display()
                    ))
                })?;
            let file = files.remove(position);
            files.insert(0, file);
        }

        debug!("Found {} tables", files.len());
        Ok(files)
    }
}

/// File identifier used for classification: the file name
pub fn file_id(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn is_table_file(path: &Path) -> bool {
    let name = file_id(path);
    !name.starts_with('.') && !name.starts_with("~$") && TableFormat::from_path(path).is_some()
}
