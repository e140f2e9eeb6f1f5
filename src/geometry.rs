//! Geometry-bearing tables and the site geometry reference.
//!
//! A [`GeoFrame`] is a polars `DataFrame` carrying a WKT geometry column
//! and the spatial reference it is expressed in. [`GeometrySet`] is the
//! loaded, key-normalized, deduplicated and reprojected site layer that
//! every bootstrap merge joins against.

use crate::constants::GEOMETRY_COLUMN;
use crate::crs::{Crs, Reproject, resolve_source_crs};
use crate::error::{GwsiError, Result};
use crate::table::{build_column, normalize_key};
use calamine::Data;
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use polars::prelude::*;
use shapefile::dbase::FieldValue;
use shapefile::{PolygonRing, Reader, Shape};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wkt::ToWkt;

/// A table with a WKT geometry column in a known spatial reference
#[derive(Debug, Clone)]
pub struct GeoFrame {
    frame: DataFrame,
    key_column: String,
    crs: Crs,
}

impl GeoFrame {
    /// Wrap `frame`, which must contain `key_column` and the geometry column
    pub fn new(frame: DataFrame, key_column: impl Into<String>, crs: Crs) -> Result<Self> {
        let key_column = key_column.into();
        for required in [key_column.as_str(), GEOMETRY_COLUMN] {
            if frame.column(required).is_err() {
                return Err(GwsiError::configuration(format!(
                    "geometry table is missing column '{}'",
                    required
                )));
            }
        }
        Ok(Self {
            frame,
            key_column,
            crs,
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Normalized keys in row order
    pub fn keys(&self) -> Result<Vec<Option<String>>> {
        let column = self.frame.column(&self.key_column)?;
        (0..column.len())
            .map(|i| Ok(normalize_key(&column.get(i)?)))
            .collect()
    }

    /// WKT geometry of one row
    pub fn geometry_wkt(&self, row: usize) -> Result<Option<String>> {
        match self.frame.column(GEOMETRY_COLUMN)?.get(row)? {
            AnyValue::String(s) => Ok(Some(s.to_string())),
            AnyValue::StringOwned(s) => Ok(Some(s.to_string())),
            _ => Ok(None),
        }
    }
}

/// One feature read from a geometry source
#[derive(Debug, Clone)]
pub struct GeometryRecord {
    pub key: Option<String>,
    pub geometry: Option<Geometry<f64>>,
    pub attributes: Vec<(String, Data)>,
}

impl GeometryRecord {
    pub fn new(key: impl Into<String>, geometry: Option<Geometry<f64>>) -> Self {
        Self {
            key: Some(key.into()),
            geometry,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Data) -> Self {
        self.attributes.push((name.into(), value));
        self
    }
}

/// The site geometry reference: one row per key, in EPSG:4326
#[derive(Debug, Clone)]
pub struct GeometrySet {
    inner: GeoFrame,
    duplicates_dropped: usize,
}

impl GeometrySet {
    /// Load a shapefile (or the first `.shp` in a directory)
    pub fn load(
        path: &Path,
        id_column: &str,
        source_crs: Option<&str>,
        reprojector: &dyn Reproject,
    ) -> Result<Self> {
        let shp_path = locate_shapefile(path)?;
        info!("Loading site geometry from {}", shp_path.display());

        let records = read_shapefile(&shp_path, id_column)?;
        let crs = resolve_source_crs(source_crs, &shp_path)?;
        Self::from_records(id_column, records, crs.as_ref(), reprojector)
    }

    /// Build the reference from already-read features
    pub fn from_records(
        id_column: &str,
        records: Vec<GeometryRecord>,
        source_crs: Option<&Crs>,
        reprojector: &dyn Reproject,
    ) -> Result<Self> {
        let total = records.len();
        let mut seen = HashSet::new();
        let mut missing_key = 0usize;
        let records: Vec<GeometryRecord> = records
            .into_iter()
            .filter(|record| match &record.key {
                Some(key) => seen.insert(key.clone()),
                None => {
                    missing_key += 1;
                    false
                }
            })
            .collect();
        let duplicates_dropped = total - records.len() - missing_key;
        if duplicates_dropped > 0 {
            debug!("Dropped {} duplicate geometry keys (first kept)", duplicates_dropped);
        }
        if missing_key > 0 {
            warn!("Dropped {} geometry features without a '{}' value", missing_key, id_column);
        }

        let target = Crs::wgs84();
        let (positions, shapes): (Vec<usize>, Vec<Geometry<f64>>) = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.geometry.clone().map(|g| (i, g)))
            .unzip();
        let reprojected = reprojector.reproject(shapes, source_crs, &target)?;

        let mut wkt: Vec<Option<String>> = vec![None; records.len()];
        for (position, geometry) in positions.into_iter().zip(reprojected) {
            wkt[position] = Some(geometry.wkt_string());
        }

        let frame = build_frame(id_column, &records, wkt)?;
        info!("Loaded {} site geometries ({} source features)", frame.height(), total);
        Ok(Self {
            inner: GeoFrame::new(frame, id_column, target)?,
            duplicates_dropped,
        })
    }

    pub fn as_geoframe(&self) -> &GeoFrame {
        &self.inner
    }

    pub fn key_column(&self) -> &str {
        self.inner.key_column()
    }

    pub fn len(&self) -> usize {
        self.inner.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.duplicates_dropped
    }
}

fn build_frame(
    id_column: &str,
    records: &[GeometryRecord],
    wkt: Vec<Option<String>>,
) -> Result<DataFrame> {
    let keys: Vec<Option<String>> = records.iter().map(|r| r.key.clone()).collect();
    let mut columns = vec![Series::new(id_column.into(), keys).into_column()];

    // Attribute columns in name order; features missing a field get an empty cell
    let names: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.attributes.iter().map(|(name, _)| name.as_str()))
        .filter(|name| *name != id_column && *name != GEOMETRY_COLUMN)
        .collect();
    for name in names {
        let cells: Vec<&Data> = records
            .iter()
            .map(|r| {
                r.attributes
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, value)| value)
                    .unwrap_or(&Data::Empty)
            })
            .collect();
        columns.push(build_column(name, &cells)?);
    }

    columns.push(Series::new(GEOMETRY_COLUMN.into(), wkt).into_column());
    Ok(DataFrame::new(columns)?)
}

fn locate_shapefile(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if !path.is_dir() {
        return Err(GwsiError::DatasetNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("shp"))
        })
        .collect();
    candidates.sort();
    if candidates.len() > 1 {
        warn!(
            "Found {} shapefiles in {}, using {}",
            candidates.len(),
            path.display(),
            candidates[0].display()
        );
    }
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| GwsiError::Shapefile {
            path: path.to_path_buf(),
            reason: "no .shp file found".to_string(),
        })
}

fn read_shapefile(path: &Path, id_column: &str) -> Result<Vec<GeometryRecord>> {
    let shapefile_error = |reason: String| GwsiError::Shapefile {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = Reader::from_path(path).map_err(|e| shapefile_error(e.to_string()))?;
    let mut records = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.map_err(|e| shapefile_error(e.to_string()))?;
        let fields: HashMap<String, FieldValue> = record.into();
        if records.is_empty() && !fields.contains_key(id_column) {
            return Err(GwsiError::configuration(format!(
                "identity column '{}' not found in {}",
                id_column,
                path.display()
            )));
        }

        let key = fields.get(id_column).and_then(field_key);
        let attributes = fields
            .into_iter()
            .map(|(name, value)| (name, field_to_cell(value)))
            .collect();
        records.push(GeometryRecord {
            key,
            geometry: shape_to_geometry(shape),
            attributes,
        });
    }
    Ok(records)
}

fn field_key(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => normalize_key(&AnyValue::String(s)),
        FieldValue::Numeric(Some(v)) | FieldValue::Double(v) | FieldValue::Currency(v) => {
            normalize_key(&AnyValue::Float64(*v))
        }
        FieldValue::Float(Some(v)) => normalize_key(&AnyValue::Float32(*v)),
        FieldValue::Integer(v) => normalize_key(&AnyValue::Int32(*v)),
        _ => None,
    }
}

fn field_to_cell(value: FieldValue) -> Data {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => Data::String(s.trim().to_string()),
        FieldValue::Numeric(Some(v)) | FieldValue::Double(v) | FieldValue::Currency(v) => Data::Float(v),
        FieldValue::Float(Some(v)) => Data::Float(v as f64),
        FieldValue::Integer(v) => Data::Int(v as i64),
        FieldValue::Logical(Some(b)) => Data::Bool(b),
        FieldValue::Date(Some(d)) => Data::DateTimeIso(format!(
            "{:04}-{:02}-{:02}T00:00:00",
            d.year(),
            d.month(),
            d.day()
        )),
        _ => Data::Empty,
    }
}

fn ring_coords(points: &[shapefile::Point]) -> LineString<f64> {
    LineString::from(
        points
            .iter()
            .map(|p| Coord { x: p.x, y: p.y })
            .collect::<Vec<_>>(),
    )
}

/// Convert a shapefile shape; null and measured/3D multipatch shapes have no geometry
fn shape_to_geometry(shape: Shape) -> Option<Geometry<f64>> {
    match shape {
        Shape::Point(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::PointZ(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::PointM(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::Multipoint(mp) => Some(Geometry::MultiPoint(MultiPoint::from(
            mp.points()
                .iter()
                .map(|p| Point::new(p.x, p.y))
                .collect::<Vec<_>>(),
        ))),
        Shape::Polyline(line) => {
            let parts: Vec<LineString<f64>> = line.parts().iter().map(|part| ring_coords(part)).collect();
            if parts.len() == 1 {
                parts.into_iter().next().map(Geometry::LineString)
            } else {
                Some(Geometry::MultiLineString(MultiLineString::new(parts)))
            }
        }
        Shape::Polygon(polygon) => {
            let mut polygons: Vec<Polygon<f64>> = Vec::new();
            for ring in polygon.rings() {
                match ring {
                    PolygonRing::Outer(points) => {
                        polygons.push(Polygon::new(ring_coords(points), vec![]));
                    }
                    PolygonRing::Inner(points) => {
                        if let Some(last) = polygons.last_mut() {
                            last.interiors_push(ring_coords(points));
                        }
                    }
                }
            }
            if polygons.len() == 1 {
                polygons.pop().map(Geometry::Polygon)
            } else {
                Some(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
            }
        }
        Shape::NullShape => None,
        other => {
            debug!("Unsupported shape type {:?}", other.shapetype());
            None
        }
    }
}
