//! PostgreSQL/PostGIS store.

use super::schema::{schema_ddl, validate_schema_name};
use super::{PropertyBatch, Store, coalesce_locations, coalesce_properties, dedup_observations};
use crate::config::DatabaseConfig;
use crate::constants::{
    DEFAULT_LOCATION_BATCH_SIZE, DEFAULT_OBSERVATION_BATCH_SIZE, GEOMETRY_COLUMN, LOCATIONS_TABLE,
    OBSERVATIONS_TABLE, PARAMETERS_TABLE, TARGET_EPSG,
};
use crate::error::{GwsiError, Result};
use crate::models::{LocationRecord, ObservationRecord, Parameter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Geometry reference check runs once per process
static SRID_CHECKED: OnceCell<()> = OnceCell::const_new();

pub struct PgStore {
    pool: PgPool,
    schema: String,
    observation_batch_size: usize,
    location_batch_size: usize,
}

/// Map a unique violation to a duplicate-key error, anything else to a database error
fn classify_insert_error(error: sqlx::Error, entity: &str, key: &str) -> GwsiError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => GwsiError::duplicate_key(entity, key),
        _ => GwsiError::Database(error),
    }
}

impl PgStore {
    /// Connect, then bring the location geometry column to EPSG:4326 if needed
    pub async fn connect(config: &DatabaseConfig, schema: &str) -> Result<Self> {
        let start = Instant::now();
        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_connections = config.max_connections,
            "Connecting to database"
        );

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await?;

        info!(elapsed_ms = start.elapsed().as_millis() as u64, "Database connection established");
        Self::from_pool(pool, schema)
    }

    pub fn from_pool(pool: PgPool, schema: &str) -> Result<Self> {
        validate_schema_name(schema)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
            observation_batch_size: DEFAULT_OBSERVATION_BATCH_SIZE,
            location_batch_size: DEFAULT_LOCATION_BATCH_SIZE,
        })
    }

    pub fn with_observation_batch_size(mut self, batch_size: usize) -> Self {
        self.observation_batch_size = batch_size.max(1);
        self
    }

    pub fn with_location_batch_size(mut self, batch_size: usize) -> Self {
        self.location_batch_size = batch_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    /// Create the schema and tables if absent
    pub async fn create_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in schema_ddl(&self.schema) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("Ensured schema {}", self.schema);
        Ok(())
    }

    /// Ensure the location geometry column is in EPSG:4326, at most once per process
    pub async fn ensure_geometry_srid(&self) -> Result<()> {
        SRID_CHECKED
            .get_or_try_init(|| self.migrate_geometry_srid())
            .await?;
        Ok(())
    }

    async fn migrate_geometry_srid(&self) -> Result<()> {
        let srid: Option<i32> = sqlx::query_scalar(
            "SELECT srid FROM geometry_columns
             WHERE f_table_schema = $1 AND f_table_name = $2 AND f_geometry_column = $3",
        )
        .bind(&self.schema)
        .bind(LOCATIONS_TABLE)
        .bind(GEOMETRY_COLUMN)
        .fetch_optional(&self.pool)
        .await?;

        let target = TARGET_EPSG as i32;
        match srid {
            None => {
                warn!("No registered geometry column on {}", self.table(LOCATIONS_TABLE));
            }
            Some(srid) if srid == target => {
                debug!("Location geometry already in EPSG:{}", target);
            }
            Some(srid) => {
                // SRID 0 means unknown: label it rather than transform from nothing
                let using = if srid == 0 {
                    format!("ST_SetSRID({}, {})", GEOMETRY_COLUMN, target)
                } else {
                    format!("ST_Transform({}, {})", GEOMETRY_COLUMN, target)
                };
                info!("Migrating location geometry from SRID {} to {}", srid, target);
                sqlx::query(&format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE geometry(Geometry, {}) USING {}",
                    self.table(LOCATIONS_TABLE),
                    GEOMETRY_COLUMN,
                    target,
                    using
                ))
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_location(&self, location: &LocationRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (name, properties, geometry)
             VALUES ($1, $2::jsonb, ST_GeomFromText($3, {}))",
            self.table(LOCATIONS_TABLE),
            TARGET_EPSG
        ))
        .bind(&location.name)
        .bind(serde_json::to_string(&location.properties)?)
        .bind(&location.geometry_wkt)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_insert_error(e, "location", &location.name))?;
        Ok(())
    }

    async fn upsert_locations(&self, locations: &[LocationRecord]) -> Result<u64> {
        let locations = coalesce_locations(locations);
        if locations.is_empty() {
            return Ok(0);
        }
        let table = self.table(LOCATIONS_TABLE);
        let sql = format!(
            "INSERT INTO {table} (name, properties, geometry)
             SELECT n, p::jsonb, ST_GeomFromText(g, {srid})
             FROM UNNEST($1::text[], $2::text[], $3::text[]) AS t(n, p, g)
             ON CONFLICT (name) DO UPDATE SET
                 properties = COALESCE({table}.properties, '{{}}'::jsonb) || EXCLUDED.properties,
                 geometry = COALESCE(EXCLUDED.geometry, {table}.geometry)",
            srid = TARGET_EPSG
        );

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for chunk in locations.chunks(self.location_batch_size) {
            let names: Vec<&str> = chunk.iter().map(|l| l.name.as_str()).collect();
            let properties = chunk
                .iter()
                .map(|l| serde_json::to_string(&l.properties))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let geometries: Vec<Option<&str>> =
                chunk.iter().map(|l| l.geometry_wkt.as_deref()).collect();

            written += sqlx::query(&sql)
                .bind(&names)
                .bind(&properties)
                .bind(&geometries)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            debug!("Upserted {} locations", chunk.len());
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn ensure_locations(&self, names: &[String]) -> Result<u64> {
        let unique: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(0);
        }

        let created = sqlx::query(&format!(
            "INSERT INTO {} (name, properties, geometry)
             SELECT n, '{{}}'::jsonb, NULL FROM UNNEST($1::text[]) AS t(n)
             ON CONFLICT (name) DO NOTHING",
            self.table(LOCATIONS_TABLE)
        ))
        .bind(&unique)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(created)
    }

    async fn location_names(&self) -> Result<HashSet<String>> {
        let names: Vec<String> =
            sqlx::query_scalar(&format!("SELECT name FROM {}", self.table(LOCATIONS_TABLE)))
                .fetch_all(&self.pool)
                .await?;
        Ok(names.into_iter().collect())
    }

    async fn merge_location_properties(&self, batch: &PropertyBatch) -> Result<u64> {
        let batch = coalesce_properties(batch);
        if batch.is_empty() {
            return Ok(0);
        }
        let table = self.table(LOCATIONS_TABLE);
        let sql = format!(
            "UPDATE {table} AS l
             SET properties = COALESCE(l.properties, '{{}}'::jsonb) || u.p::jsonb
             FROM UNNEST($1::text[], $2::text[]) AS u(n, p)
             WHERE l.name = u.n"
        );

        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for chunk in batch.chunks(self.location_batch_size) {
            let names: Vec<&str> = chunk.iter().map(|(name, _)| name.as_str()).collect();
            let properties = chunk
                .iter()
                .map(|(_, p)| serde_json::to_string(p))
                .collect::<std::result::Result<Vec<_>, _>>()?;

            updated += sqlx::query(&sql)
                .bind(&names)
                .bind(&properties)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn insert_parameter(&self, parameter: &Parameter) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (parameter_id, parameter_name, parameter_unit_symbol, parameter_unit_label)
             VALUES ($1, $1, $2, $3)",
            self.table(PARAMETERS_TABLE)
        ))
        .bind(&parameter.parameter_id)
        .bind(&parameter.unit_symbol)
        .bind(&parameter.unit_label)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_insert_error(e, "parameter", &parameter.parameter_id))?;
        Ok(())
    }

    async fn upsert_parameter(&self, parameter: &Parameter) -> Result<bool> {
        let created = sqlx::query(&format!(
            "INSERT INTO {} (parameter_id, parameter_name, parameter_unit_symbol, parameter_unit_label)
             VALUES ($1, $1, $2, $3)
             ON CONFLICT (parameter_id) DO NOTHING",
            self.table(PARAMETERS_TABLE)
        ))
        .bind(&parameter.parameter_id)
        .bind(&parameter.unit_symbol)
        .bind(&parameter.unit_label)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(created == 1)
    }

    async fn upsert_observations(&self, observations: &[ObservationRecord]) -> Result<u64> {
        let unique = dedup_observations(observations);
        if unique.is_empty() {
            return Ok(0);
        }

        let location_names: Vec<&str> = unique
            .iter()
            .map(|o| o.location.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let parameter_ids: Vec<&str> = unique
            .iter()
            .map(|o| o.parameter.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tx = self.pool.begin().await?;

        let location_ids: HashMap<String, i32> = sqlx::query_as::<_, (String, i32)>(&format!(
            "SELECT name, location_id FROM {} WHERE name = ANY($1)",
            self.table(LOCATIONS_TABLE)
        ))
        .bind(&location_names)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();
        let known_parameters: HashSet<String> = sqlx::query_scalar::<_, String>(&format!(
            "SELECT parameter_id FROM {} WHERE parameter_id = ANY($1)",
            self.table(PARAMETERS_TABLE)
        ))
        .bind(&parameter_ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let missing_locations: Vec<String> = location_names
            .iter()
            .filter(|name| !location_ids.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        let missing_parameters: Vec<String> = parameter_ids
            .iter()
            .filter(|id| !known_parameters.contains(**id))
            .map(|id| id.to_string())
            .collect();
        if !missing_locations.is_empty() || !missing_parameters.is_empty() {
            tx.rollback().await?;
            return Err(GwsiError::unresolved(missing_locations, missing_parameters));
        }

        let sql = format!(
            "INSERT INTO {} (location_id, parameter_id, observation_value, observation_time)
             SELECT * FROM UNNEST($1::int4[], $2::text[], $3::float8[], $4::timestamptz[])
             ON CONFLICT (location_id, parameter_id, observation_time)
             DO UPDATE SET observation_value = EXCLUDED.observation_value",
            self.table(OBSERVATIONS_TABLE)
        );
        let mut upserted = 0;
        for chunk in unique.chunks(self.observation_batch_size) {
            let mut ids = Vec::with_capacity(chunk.len());
            let mut parameters = Vec::with_capacity(chunk.len());
            let mut values = Vec::with_capacity(chunk.len());
            let mut times: Vec<DateTime<Utc>> = Vec::with_capacity(chunk.len());
            for observation in chunk {
                // Every name was resolved above
                let Some(&id) = location_ids.get(&observation.location) else {
                    continue;
                };
                ids.push(id);
                parameters.push(observation.parameter.as_str());
                values.push(observation.value);
                times.push(observation.time);
            }

            upserted += sqlx::query(&sql)
                .bind(&ids)
                .bind(&parameters)
                .bind(&values)
                .bind(&times)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            debug!("Upserted observation chunk of {} rows", chunk.len());
        }
        tx.commit().await?;
        Ok(upserted)
    }
}
