//! Server side of `GET /coordinate-history/h3-index`: one page of raw
//! coordinates folded into cells, plus optional response caching.

use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::client::types::H3_INDEX_PATH;
use crate::client::{
    CoordinateQuery, FetchedPage, Filter, H3CellAggregateDto, H3IndexResponse, PagePayload,
    PageSource, PaginationCursor,
};
use crate::core::{AggregateCollection, H3Stats, fold, resolution};
use crate::error::WorkerHexError;

/// Matches every cached coordinate-history response, raw or aggregated.
pub const COORDINATE_HISTORY_PATTERN: &str = "/coordinate-history*";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Serializes a folded page into the endpoint's response body. Cells are
/// ordered by count descending.
pub fn build_response(
    collection: &AggregateCollection,
    pagination: PaginationCursor,
) -> H3IndexResponse {
    H3IndexResponse {
        data: collection
            .sorted_by_count()
            .into_iter()
            .map(H3CellAggregateDto::from)
            .collect(),
        pagination,
        h3_stats: H3Stats::from(collection),
    }
}

pub struct H3IndexService<Q> {
    query: Q,
}

impl<Q: CoordinateQuery + Sync> H3IndexService<Q> {
    pub fn new(query: Q) -> Self {
        Self { query }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    pub async fn respond(&self, filter: &Filter) -> Result<H3IndexResponse, WorkerHexError> {
        resolution(filter.resolution)?;

        let page = self.query.query_page(filter).await?;
        let collection = fold(&page.records, filter.resolution, AggregateCollection::new())?;
        debug!(
            page = filter.page,
            records = page.records.len(),
            cells = collection.len(),
            "built h3-index page"
        );

        Ok(build_response(&collection, page.pagination))
    }
}

/// Pre-aggregated pages straight from the service, as a client would see
/// them after decoding the JSON body.
impl<Q: CoordinateQuery + Sync> PageSource for H3IndexService<Q> {
    async fn fetch_page(&self, filter: &Filter) -> Result<FetchedPage, WorkerHexError> {
        let response = self.respond(filter).await?;
        let pagination = response.pagination;
        Ok(FetchedPage {
            payload: PagePayload::Aggregates(response.into_collection()?),
            pagination,
        })
    }
}

/// [`H3IndexService`] behind a response cache keyed by path and query string.
pub struct CachedH3Index<Q, C> {
    service: H3IndexService<Q>,
    cache: C,
    ttl: Duration,
}

impl<Q: CoordinateQuery + Sync, C: ResponseCache + Sync> CachedH3Index<Q, C> {
    pub fn new(service: H3IndexService<Q>, cache: C) -> Self {
        Self {
            service,
            cache,
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn service(&self) -> &H3IndexService<Q> {
        &self.service
    }

    pub async fn respond(&self, filter: &Filter) -> Result<H3IndexResponse, WorkerHexError> {
        let key = filter.cache_key(H3_INDEX_PATH);

        if let Some(body) = self.cache.get(&key).await {
            match serde_json::from_str(&body) {
                Ok(response) => {
                    debug!(%key, "cache hit");
                    return Ok(response);
                }
                Err(e) => warn!(%key, "ignoring unreadable cache entry: {e}"),
            }
        }

        let response = self.service.respond(filter).await?;
        self.cache
            .set(&key, serde_json::to_string(&response)?, self.ttl)
            .await;
        Ok(response)
    }

    /// Drops every cached coordinate-history response, e.g. after an upload.
    pub async fn invalidate(&self) -> usize {
        self.cache.invalidate(COORDINATE_HISTORY_PATTERN).await
    }
}
