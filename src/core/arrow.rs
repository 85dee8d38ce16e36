use arrow_array::{
    Float64Array, RecordBatch, StringArray, TimestampMillisecondArray, UInt8Array, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use geoarrow_array::IntoArrow;
use geoarrow_array::builder::PolygonBuilder;
use geoarrow_schema::{Crs, Dimension, Metadata, PolygonType};
use serde_json::json;
use std::sync::Arc;

use crate::error::WorkerHexError;

use super::aggregate::{AggregateCollection, H3CellAggregate};
use super::hex::cell_polygon;

fn wgs84_metadata() -> Arc<Metadata> {
    let crs = Crs::from_projjson(json!({
        "type": "GeographicCRS",
        "name": "WGS 84",
        "id": {"authority": "EPSG", "code": 4326}
    }));
    Arc::new(Metadata::new(crs, None))
}

fn summary_fields() -> Vec<Field> {
    let utc = DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()));
    vec![
        Field::new("h3_index", DataType::Utf8, false),
        Field::new("resolution", DataType::UInt8, false),
        Field::new("center_lat", DataType::Float64, false),
        Field::new("center_lon", DataType::Float64, false),
        Field::new("area_km2", DataType::Float64, false),
        Field::new("count", DataType::UInt64, false),
        Field::new("unique_users", DataType::UInt64, false),
        Field::new("first_seen", utc.clone(), false),
        Field::new("last_seen", utc, false),
    ]
}

fn summary_columns(cells: &[&H3CellAggregate]) -> Vec<Arc<dyn arrow_array::Array>> {
    let h3_index: StringArray = cells
        .iter()
        .map(|c| Some(c.h3_index.to_string()))
        .collect();
    let resolution: UInt8Array = cells.iter().map(|c| Some(c.resolution)).collect();
    let center_lat: Float64Array = cells.iter().map(|c| Some(c.center.lat)).collect();
    let center_lon: Float64Array = cells.iter().map(|c| Some(c.center.lon)).collect();
    let area: Float64Array = cells.iter().map(|c| Some(c.area)).collect();
    let count: UInt64Array = cells.iter().map(|c| Some(c.count)).collect();
    let unique_users: UInt64Array = cells
        .iter()
        .map(|c| Some(c.users.len() as u64))
        .collect();
    let first_seen = TimestampMillisecondArray::from(
        cells
            .iter()
            .map(|c| c.first_seen.timestamp_millis())
            .collect::<Vec<_>>(),
    )
    .with_timezone("UTC");
    let last_seen = TimestampMillisecondArray::from(
        cells
            .iter()
            .map(|c| c.last_seen.timestamp_millis())
            .collect::<Vec<_>>(),
    )
    .with_timezone("UTC");

    vec![
        Arc::new(h3_index),
        Arc::new(resolution),
        Arc::new(center_lat),
        Arc::new(center_lon),
        Arc::new(area),
        Arc::new(count),
        Arc::new(unique_users),
        Arc::new(first_seen),
        Arc::new(last_seen),
    ]
}

/// One row per cell, densest first, without geometry.
pub fn to_record_batch_no_geom(
    collection: &AggregateCollection,
) -> Result<RecordBatch, WorkerHexError> {
    let cells = collection.sorted_by_count();
    let schema = Schema::new(summary_fields());

    Ok(RecordBatch::try_new(
        Arc::new(schema),
        summary_columns(&cells),
    )?)
}

/// One row per cell, densest first, with the cell boundary as a GeoArrow
/// polygon column in WGS84.
pub fn to_record_batch(collection: &AggregateCollection) -> Result<RecordBatch, WorkerHexError> {
    let cells = collection.sorted_by_count();

    let polygons: Vec<_> = cells.iter().map(|c| cell_polygon(c.h3_index)).collect();
    let poly_type = PolygonType::new(Dimension::XY, wgs84_metadata());
    let geometry_array = PolygonBuilder::from_polygons(&polygons, poly_type).finish();
    let geometry_field = geometry_array.extension_type().to_field("geometry", false);

    let mut fields = summary_fields();
    fields.push(geometry_field);

    let mut columns = summary_columns(&cells);
    columns.push(Arc::new(geometry_array.into_arrow()));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}
