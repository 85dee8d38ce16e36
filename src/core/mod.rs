mod aggregate;
mod arrow;
mod hex;
mod merge;
mod stats;

pub use aggregate::{AggregateCollection, H3CellAggregate, fold, fold_pages};
pub use arrow::{to_record_batch, to_record_batch_no_geom};
pub use hex::{
    AreaUnit, DEFAULT_RESOLUTION, LatLon, cell_area, cell_center, cell_id, cell_polygon,
    is_valid_coordinate, parse_cell, resolution, resolution_of,
};
pub use merge::{merge, merge_all};
pub use stats::H3Stats;
