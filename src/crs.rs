//! Spatial reference resolution and reprojection.
//!
//! A [`Crs`] is a proj definition string, optionally tagged with its EPSG
//! code. The source reference of a shapefile comes from an explicit
//! override or its `.prj` sidecar; reprojection itself is delegated to
//! proj4rs behind the [`Reproject`] trait.

use crate::constants::{PRJ_EXTENSION, TARGET_EPSG};
use crate::error::{GwsiError, Result};
use geo::{Coord, Geometry, MapCoords};
use proj4rs::proj::Proj;
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static AUTHORITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"AUTHORITY\["EPSG",\s*"?(\d+)"?\]"#).unwrap());
static UTM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"PROJCS\["([A-Za-z0-9_ ]*?)[_ ]UTM[_ ]Zone[_ ](\d{1,2})([NS]?)""#).unwrap()
});
static GEOGCS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*GEOGCS\["([^"]+)""#).unwrap());

/// A coordinate reference system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crs {
    epsg: Option<u16>,
    definition: String,
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epsg {
            Some(code) => write!(f, "EPSG:{}", code),
            None => write!(f, "{}", self.definition),
        }
    }
}

impl Crs {
    /// EPSG:4326, the reference every stored geometry uses
    pub fn wgs84() -> Self {
        Self {
            epsg: Some(TARGET_EPSG),
            definition: "+proj=longlat +datum=WGS84 +no_defs".to_string(),
        }
    }

    /// Look up a supported EPSG code
    pub fn from_epsg(code: u16) -> Result<Self> {
        let definition = match code {
            4326 => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            4269 => "+proj=longlat +datum=NAD83 +no_defs".to_string(),
            3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
                .to_string(),
            32601..=32660 => format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", code - 32600),
            32701..=32760 => format!(
                "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
                code - 32700
            ),
            26901..=26923 => format!("+proj=utm +zone={} +datum=NAD83 +units=m +no_defs", code - 26900),
            _ => {
                return Err(GwsiError::configuration(format!(
                    "EPSG:{} has no built-in definition; pass a proj string instead",
                    code
                )));
            }
        };
        Ok(Self {
            epsg: Some(code),
            definition,
        })
    }

    /// A custom proj definition without an EPSG tag
    pub fn from_proj_string(definition: impl Into<String>) -> Self {
        Self {
            epsg: None,
            definition: definition.into(),
        }
    }

    /// Parse a user-supplied reference: `EPSG:n`, a bare code, or a proj string
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.starts_with('+') {
            return Ok(Self::from_proj_string(value));
        }
        let code = value
            .strip_prefix("EPSG:")
            .or_else(|| value.strip_prefix("epsg:"))
            .unwrap_or(value);
        code.parse::<u16>()
            .map_err(|_| GwsiError::configuration(format!("unrecognised spatial reference: {}", value)))
            .and_then(Self::from_epsg)
    }

    /// Interpret the WKT of a `.prj` sidecar. Returns `None` when the
    /// reference cannot be identified.
    pub fn from_prj(wkt: &str) -> Option<Self> {
        // The outermost AUTHORITY is the last one in OGC WKT
        if let Some(code) = AUTHORITY_RE
            .captures_iter(wkt)
            .last()
            .and_then(|c| c[1].parse::<u16>().ok())
        {
            if let Ok(crs) = Self::from_epsg(code) {
                return Some(crs);
            }
        }

        if let Some(caps) = UTM_RE.captures(wkt) {
            let datum = caps[1].to_ascii_uppercase();
            let zone: u16 = caps[2].parse().ok()?;
            let south = &caps[3] == "S";
            let code = if datum.contains("NAD") && datum.contains("83") {
                26900 + zone
            } else if datum.contains("WGS") && datum.contains("84") {
                if south { 32700 + zone } else { 32600 + zone }
            } else {
                return None;
            };
            return Self::from_epsg(code).ok();
        }

        if wkt.contains("Web_Mercator") {
            return Self::from_epsg(3857).ok();
        }

        let name = GEOGCS_RE.captures(wkt)?[1].to_ascii_uppercase();
        match name.as_str() {
            "GCS_WGS_1984" | "WGS 84" => Self::from_epsg(4326).ok(),
            "GCS_NORTH_AMERICAN_1983" | "NAD83" => Self::from_epsg(4269).ok(),
            _ => None,
        }
    }

    pub fn epsg(&self) -> Option<u16> {
        self.epsg
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn is_target(&self) -> bool {
        self.epsg == Some(TARGET_EPSG)
    }
}

/// Source reference of a shapefile: the explicit override, else its `.prj`.
/// `None` means the layer has no `.prj`; an unidentified `.prj` is an error.
pub fn resolve_source_crs(override_crs: Option<&str>, shp_path: &Path) -> Result<Option<Crs>> {
    if let Some(value) = override_crs {
        return Crs::parse(value).map(Some);
    }

    let prj_path = shp_path.with_extension(PRJ_EXTENSION);
    if !prj_path.exists() {
        debug!("No projection sidecar at {}", prj_path.display());
        return Ok(None);
    }
    let wkt = fs::read_to_string(&prj_path)?;
    match Crs::from_prj(&wkt) {
        Some(crs) => Ok(Some(crs)),
        None => Err(GwsiError::projection(format!(
            "unrecognised spatial reference in {}; pass --source-crs with its EPSG code or proj string",
            prj_path.display()
        ))),
    }
}

/// Reprojects a set of geometries between spatial references
pub trait Reproject {
    /// Fails with a configuration error when `from` is `None`
    fn reproject(
        &self,
        geometries: Vec<Geometry<f64>>,
        from: Option<&Crs>,
        to: &Crs,
    ) -> Result<Vec<Geometry<f64>>>;
}

/// proj4rs-backed reprojection
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjReprojector;

struct Transformer {
    src: Proj,
    dst: Proj,
}

impl Transformer {
    fn new(from: &Crs, to: &Crs) -> Result<Self> {
        let build = |crs: &Crs| {
            Proj::from_proj_string(crs.definition())
                .map_err(|e| GwsiError::projection(format!("{}: {}", crs, e)))
        };
        Ok(Self {
            src: build(from)?,
            dst: build(to)?,
        })
    }

    fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        // proj4rs works in radians for geographic references
        let mut point = if self.src.is_latlong() {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        proj4rs::transform::transform(&self.src, &self.dst, &mut point)
            .map_err(|e| GwsiError::projection(format!("({}, {}): {}", coord.x, coord.y, e)))?;

        if self.dst.is_latlong() {
            Ok(Coord {
                x: point.0.to_degrees(),
                y: point.1.to_degrees(),
            })
        } else {
            Ok(Coord {
                x: point.0,
                y: point.1,
            })
        }
    }
}

impl Reproject for ProjReprojector {
    fn reproject(
        &self,
        geometries: Vec<Geometry<f64>>,
        from: Option<&Crs>,
        to: &Crs,
    ) -> Result<Vec<Geometry<f64>>> {
        let from = from.ok_or_else(|| {
            GwsiError::configuration("geometry layer has no spatial reference to reproject from")
        })?;
        if from == to {
            return Ok(geometries);
        }

        debug!("Reprojecting {} geometries from {} to {}", geometries.len(), from, to);
        let transformer = Transformer::new(from, to)?;
        let transformer = &transformer;
        geometries
            .iter()
            .map(|geometry| geometry.try_map_coords(|coord| transformer.transform(coord)))
            .collect()
    }
}
