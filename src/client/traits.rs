use std::future::Future;

use chrono::{DateTime, Utc};

use super::filter::Filter;
use super::types::{CoordinatePage, CoordinateRecord, PaginationCursor};
use crate::core::AggregateCollection;
use crate::error::WorkerHexError;

/// Trait for GPS ping records from different sources.
/// Implement this for a record type to enable hex aggregation.
pub trait CoordinateData: Send + Sync {
    fn lat(&self) -> f64;

    fn lon(&self) -> f64;

    fn user_id(&self) -> i64;

    fn timestamp(&self) -> DateTime<Utc>;
}

/// The coordinate query layer: one page of raw records matching a filter,
/// newest first, plus the total match count.
pub trait CoordinateQuery {
    fn query_page(
        &self,
        filter: &Filter,
    ) -> impl Future<Output = Result<CoordinatePage, WorkerHexError>> + Send;
}

/// What a page fetch hands to the pagination driver.
#[derive(Debug, Clone)]
pub enum PagePayload {
    /// Raw pings, folded by the driver.
    Records(Vec<CoordinateRecord>),
    /// Cells already aggregated upstream.
    Aggregates(AggregateCollection),
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub payload: PagePayload,
    pub pagination: PaginationCursor,
}

/// Anything the pagination driver can pull pages from. The page number and
/// limit travel inside the filter.
pub trait PageSource {
    fn fetch_page(
        &self,
        filter: &Filter,
    ) -> impl Future<Output = Result<FetchedPage, WorkerHexError>> + Send;
}

/// Adapts a coordinate query layer into a page source that yields raw
/// records for the driver to fold.
pub struct RawPages<Q>(pub Q);

impl<Q: CoordinateQuery + Sync> PageSource for RawPages<Q> {
    async fn fetch_page(&self, filter: &Filter) -> Result<FetchedPage, WorkerHexError> {
        let page = self.0.query_page(filter).await?;
        Ok(FetchedPage {
            payload: PagePayload::Records(page.records),
            pagination: page.pagination,
        })
    }
}
