//! Error handling for site inventory loading.
//!
//! Separates fatal configuration problems from failures that only abort
//! the current file (unresolved references, duplicate keys, bad input).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GwsiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error(
        "Unresolved references in observation batch - locations: {locations:?}, parameters: {parameters:?}"
    )]
    UnresolvedReference {
        locations: Vec<String>,
        parameters: Vec<String>,
    },

    #[error("Duplicate {entity} key: {key}")]
    DuplicateKey { entity: String, key: String },

    #[error("Data directory not found at path: {path}")]
    DatasetNotFound { path: PathBuf },

    #[error("Spreadsheet error in file: {path} - {reason}")]
    Spreadsheet { path: PathBuf, reason: String },

    #[error("Shapefile error in file: {path} - {reason}")]
    Shapefile { path: PathBuf, reason: String },

    #[error("Reprojection failed: {reason}")]
    Projection { reason: String },

    #[error("Column not found in table: {column}")]
    MissingColumn { column: String },

    #[error("Invalid table format in file: {path} - {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("Processing interrupted: {reason}")]
    ProcessingInterrupted { reason: String },
}

impl GwsiError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Builds an unresolved-reference error with both key lists sorted.
    pub fn unresolved(
        mut locations: Vec<String>,
        mut parameters: Vec<String>,
    ) -> Self {
        locations.sort();
        parameters.sort();
        Self::UnresolvedReference {
            locations,
            parameters,
        }
    }

    pub fn duplicate_key(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            entity: entity.into(),
            key: key.into(),
        }
    }

    pub fn invalid_format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_column(column: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
        }
    }

    pub fn projection(reason: impl Into<String>) -> Self {
        Self::Projection {
            reason: reason.into(),
        }
    }

    /// Errors that must stop the whole run rather than just the current file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GwsiError::Configuration { .. } | GwsiError::ProcessingInterrupted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GwsiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_lists_are_sorted() {
        let err = GwsiError::unresolved(
            vec!["b".to_string(), "a".to_string()],
            vec!["Z".to_string(), "Y".to_string()],
        );
        match err {
            GwsiError::UnresolvedReference {
                locations,
                parameters,
            } => {
                assert_eq!(locations, vec!["a", "b"]);
                assert_eq!(parameters, vec!["Y", "Z"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GwsiError::configuration("missing POSTGRES_HOST").is_fatal());
        assert!(!GwsiError::duplicate_key("parameter", "PSI").is_fatal());
        assert!(!GwsiError::unresolved(vec!["1".into()], vec![]).is_fatal());
        assert!(!GwsiError::missing_column("SITE_ID").is_fatal());
    }
}
