pub mod cache;
pub mod client;
pub mod core;
pub mod error;
pub mod service;

pub use cache::{MemoryCache, ResponseCache, ResultCache};
pub use client::{
    Bounds, CoordinateClient, CoordinateData, CoordinateQuery, CoordinateRecord, DriverState,
    Filter, FilterState, H3CellAggregateDto, H3IndexResponse, MemoryStore, PageSource,
    PaginationConfig, PaginationCursor, PaginationDriver, RawPages,
};
pub use self::core::{
    AggregateCollection, AreaUnit, H3CellAggregate, H3Stats, LatLon, cell_area, cell_center,
    cell_id, fold, fold_pages, merge, merge_all, resolution_of, to_record_batch,
    to_record_batch_no_geom,
};
pub use error::WorkerHexError;
pub use service::{CachedH3Index, H3IndexService};

pub use h3o::{CellIndex, Resolution};

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::{
        AggregateCollection, CoordinateRecord, Filter, MemoryStore, PaginationConfig,
        PaginationDriver, RawPages, WorkerHexError, fold, merge,
    };

    fn pings() -> Vec<CoordinateRecord> {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        (0..240)
            .map(|i| {
                CoordinateRecord::new(
                    format!("ping-{i}"),
                    (i % 12) as i64,
                    base + Duration::seconds(i as i64 * 45),
                    -0.95 + (i % 20) as f64 * 0.002,
                    101.40 + (i % 15) as f64 * 0.002,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_estate_pipeline() -> Result<(), WorkerHexError> {
        let records = pings();
        let driver = PaginationDriver::new(
            RawPages(MemoryStore::new(records.clone())),
            PaginationConfig::default(),
        );

        let filter = Filter::new().with_resolution(9).with_limit(50);
        let collection = driver.start(filter).await?;

        assert_eq!(collection.total_coordinates(), 240);
        assert_eq!(collection.unique_users().len(), 12);

        // Halves folded separately and merged agree with the full fold.
        let (left, right) = records.split_at(100);
        let halves = merge(
            fold(left, 9, AggregateCollection::new())?,
            fold(right, 9, AggregateCollection::new())?,
        )?;
        assert_eq!(halves, collection);

        for cell in collection.top(3) {
            println!("{} {} pings, {} users", cell.h3_index, cell.count, cell.users.len());
        }
        Ok(())
    }
}
