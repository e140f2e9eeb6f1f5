//! Destination schema naming and DDL.

use crate::constants::{
    LOCATIONS_TABLE, MAX_IDENTIFIER_LENGTH, OBSERVATIONS_TABLE, PARAMETERS_TABLE, TARGET_EPSG,
};
use crate::error::{GwsiError, Result};

/// Names that may not be used as the destination schema
const RESERVED_SCHEMAS: &[&str] = &[
    "pg_catalog",
    "information_schema",
    "pg_toast",
    "select",
    "insert",
    "update",
    "delete",
    "drop",
    "create",
    "alter",
    "table",
    "grant",
];

/// Validate a schema name before it is interpolated into SQL.
///
/// Must be 1 to 63 ASCII letters, digits or underscores, not starting with
/// a digit, and not a reserved name.
pub fn validate_schema_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GwsiError::configuration("schema name cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(GwsiError::configuration(format!(
            "schema name exceeds {} characters: {}",
            MAX_IDENTIFIER_LENGTH,
            name.len()
        )));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(GwsiError::configuration(format!(
            "schema name must not start with a digit: {}",
            name
        )));
    }
    if let Some(bad) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(GwsiError::configuration(format!(
            "schema name contains invalid character '{}'",
            bad
        )));
    }
    if RESERVED_SCHEMAS.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(GwsiError::configuration(format!("schema name is reserved: {}", name)));
    }
    Ok(())
}

/// Statements creating the destination tables if they do not exist
pub fn schema_ddl(schema: &str) -> Vec<String> {
    let locations = format!("{}.{}", schema, LOCATIONS_TABLE);
    let parameters = format!("{}.{}", schema, PARAMETERS_TABLE);
    let observations = format!("{}.{}", schema, OBSERVATIONS_TABLE);

    vec![
        "CREATE EXTENSION IF NOT EXISTS postgis".to_string(),
        format!("CREATE SCHEMA IF NOT EXISTS {}", schema),
        format!(
            "CREATE TABLE IF NOT EXISTS {locations} (
                location_id SERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                properties JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                geometry geometry(Geometry, {srid})
            )",
            srid = TARGET_EPSG
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {parameters} (
                parameter_id TEXT PRIMARY KEY,
                parameter_name TEXT NOT NULL,
                parameter_unit_symbol TEXT,
                parameter_unit_label TEXT
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {observations} (
                observation_id BIGSERIAL PRIMARY KEY,
                location_id INTEGER NOT NULL REFERENCES {locations} (location_id),
                parameter_id TEXT NOT NULL REFERENCES {parameters} (parameter_id),
                observation_value DOUBLE PRECISION NOT NULL,
                observation_time TIMESTAMPTZ NOT NULL,
                UNIQUE (location_id, parameter_id, observation_time)
            )"
        ),
    ]
}
