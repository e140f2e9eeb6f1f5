//! Tabular merge engine.
//!
//! Joins input tables to the site geometry reference (bootstrap, inner
//! join) or to the already materialized location table (carry-forward,
//! left join). Keys are compared in their normalized string form on both
//! sides, so `"7"`, `7` and `7.0` match each other.

use crate::constants::GEOMETRY_COLUMN;
use crate::error::Result;
use crate::geometry::{GeoFrame, GeometrySet};
use crate::models::KeyColumn;
use crate::table::normalize_key_column;
use polars::prelude::*;
use std::collections::HashSet;
use tracing::debug;

/// Name the table key is carried under while joining
const JOIN_KEY: &str = "__gwsi_join_key";

/// Suffix for table columns that collide with a location column
const INCOMING_SUFFIX: &str = "__gwsi_incoming";

/// Set on every table row, so it is null where a location found no partner
const MATCHED: &str = "__gwsi_matched";

/// Bootstrap merge: inner join of `table` against the geometry reference.
///
/// Rows without a counterpart on either side are dropped. The result keeps
/// the geometry reference's key column name and spatial reference.
pub fn merge_with_geometry(
    geometry: &GeometrySet,
    table: &DataFrame,
    key: &KeyColumn,
) -> Result<GeoFrame> {
    let reference = geometry.as_geoframe();
    let right = prepare_table(table, key)?;

    let joined = join(reference, right, JoinType::Inner)?;
    debug!(
        "Bootstrap merge: {} table rows x {} geometries -> {} rows",
        table.height(),
        reference.height(),
        joined.height()
    );
    GeoFrame::new(joined, reference.key_column(), reference.crs().clone())
}

/// Carry-forward merge: left join of the location table with `table`.
///
/// Every location row is preserved; the table's key column is dropped.
/// The table is reduced to its first row per key so the location table
/// stays one row per site.
pub fn merge_with_locations(
    locations: &GeoFrame,
    table: &DataFrame,
    key: &KeyColumn,
) -> Result<GeoFrame> {
    let right = keep_first_per_key(prepare_table(table, key)?)?;

    let joined = join(locations, right, JoinType::Left)?;
    debug!(
        "Carry-forward merge: {} locations, {} table rows -> {} columns",
        locations.height(),
        table.height(),
        joined.width()
    );
    // The join yields a plain frame; re-attach the key and reference
    GeoFrame::new(joined, locations.key_column(), locations.crs().clone())
}

/// Normalize the table's key and move it under the join name
fn prepare_table(table: &DataFrame, key: &KeyColumn) -> Result<DataFrame> {
    let key_name = key.resolve(table)?;
    let mut prepared = normalize_key_column(table, &key_name)?;
    prepared.rename(&key_name, JOIN_KEY.into())?;
    Ok(prepared)
}

fn keep_first_per_key(frame: DataFrame) -> Result<DataFrame> {
    let keys = frame.column(JOIN_KEY)?.str()?.clone();
    let mut seen = HashSet::new();
    let mask: Vec<bool> = keys
        .iter()
        .map(|key| key.is_some_and(|k| seen.insert(k.to_string())))
        .collect();
    if mask.iter().all(|keep| *keep) {
        return Ok(frame);
    }
    debug!("Dropping {} repeated or empty keys", mask.iter().filter(|k| !**k).count());
    Ok(frame.filter(&BooleanChunked::from_slice(JOIN_KEY.into(), &mask))?)
}

fn join(left: &GeoFrame, right: DataFrame, how: JoinType) -> Result<DataFrame> {
    let existing = left.frame();
    let (right, shared) = separate_shared_columns(left, right)?;

    // Shared columns take the table's value on matched rows, like the store's property merge
    let folded: Vec<Expr> = shared
        .iter()
        .map(|(name, incoming, same_dtype)| {
            let (current, update) = if *same_dtype {
                (col(name.as_str()), col(incoming.as_str()))
            } else {
                (
                    col(name.as_str()).cast(DataType::String),
                    col(incoming.as_str()).cast(DataType::String),
                )
            };
            when(col(MATCHED).is_not_null())
                .then(update)
                .otherwise(current)
                .alias(name.as_str())
        })
        .collect();

    let mut args = JoinArgs::new(how).with_coalesce(JoinCoalesce::CoalesceColumns);
    args.maintain_order = MaintainOrderJoin::Left;

    let mut frame = existing
        .clone()
        .lazy()
        .join(
            right.lazy().with_column(lit(true).alias(MATCHED)),
            [col(left.key_column())],
            [col(JOIN_KEY)],
            args,
        )
        .with_columns(folded)
        .collect()?;

    frame.drop_in_place(MATCHED)?;
    for (_, incoming, _) in &shared {
        frame.drop_in_place(incoming)?;
    }
    Ok(frame)
}

/// Rename table columns that already exist on the left so the join never
/// has to suffix them. Columns that would shadow the location key or
/// geometry are dropped. Returns `(name, joined name, same dtype)` per
/// renamed column.
fn separate_shared_columns(
    left: &GeoFrame,
    mut right: DataFrame,
) -> Result<(DataFrame, Vec<(String, String, bool)>)> {
    let existing = left.frame();
    let names: Vec<String> = right
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut shared = Vec::new();
    for name in names {
        if name == JOIN_KEY {
            continue;
        }
        let Ok(current) = existing.column(&name) else {
            continue;
        };
        if name == left.key_column() || name == GEOMETRY_COLUMN {
            debug!("Dropping table column {} that shadows the location table", name);
            right.drop_in_place(&name)?;
            continue;
        }

        let same_dtype = current.dtype() == right.column(&name)?.dtype();
        let incoming = format!("{}{}", name, INCOMING_SUFFIX);
        right.rename(&name, incoming.as_str().into())?;
        shared.push((name, incoming, same_dtype));
    }
    Ok((right, shared))
}
