use std::str::FromStr;

use geo_types::{Coord, LineString, Polygon};
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};

use crate::error::WorkerHexError;

/// Resolution used when a query does not ask for one.
pub const DEFAULT_RESOLUTION: u8 = 10;

/// A WGS84 point, as carried on the wire (`{lat, lon}`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AreaUnit {
    #[default]
    Km2,
    M2,
}

/// Validates a raw resolution number against the H3 range (0-15).
pub fn resolution(value: u8) -> Result<Resolution, WorkerHexError> {
    Resolution::try_from(value).map_err(|_| WorkerHexError::InvalidResolution(value))
}

/// Returns true when `lat`/`lon` are finite and inside WGS84 bounds.
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Maps a point to the H3 cell containing it at `resolution`.
pub fn cell_id(lat: f64, lon: f64, resolution: Resolution) -> Result<CellIndex, WorkerHexError> {
    if !is_valid_coordinate(lat, lon) {
        return Err(WorkerHexError::InvalidCoordinate { lat, lon });
    }

    let point = LatLng::new(lat, lon).map_err(|_| WorkerHexError::InvalidCoordinate { lat, lon })?;
    Ok(point.to_cell(resolution))
}

pub fn cell_center(cell: CellIndex) -> LatLon {
    let center = LatLng::from(cell);
    LatLon {
        lat: center.lat(),
        lon: center.lng(),
    }
}

/// Area of the cell. Pentagons and cells near them are slightly smaller
/// than the resolution average; the value comes straight from h3o.
pub fn cell_area(cell: CellIndex, unit: AreaUnit) -> f64 {
    match unit {
        AreaUnit::Km2 => cell.area_km2(),
        AreaUnit::M2 => cell.area_m2(),
    }
}

pub fn resolution_of(cell: CellIndex) -> u8 {
    u8::from(cell.resolution())
}

/// Parses the hexadecimal string form used on the wire.
pub fn parse_cell(h3_index: &str) -> Result<CellIndex, WorkerHexError> {
    Ok(CellIndex::from_str(h3_index)?)
}

/// Cell boundary as a closed WGS84 polygon (x = lon, y = lat).
pub fn cell_polygon(cell: CellIndex) -> Polygon<f64> {
    let ring: Vec<Coord<f64>> = cell
        .boundary()
        .iter()
        .map(|vertex| Coord {
            x: vertex.lng(),
            y: vertex.lat(),
        })
        .collect();

    Polygon::new(LineString::new(ring), vec![])
}
