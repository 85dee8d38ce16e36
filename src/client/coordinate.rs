use crate::error::WorkerHexError;

use super::filter::Filter;
use super::traits::{CoordinateQuery, FetchedPage, PagePayload, PageSource};
use super::types::{
    ApiResponse, CoordinatePage, CoordinateRecord, H3_INDEX_PATH, H3IndexResponse, HttpClient,
};

const COORDINATE_HISTORY_PATH: &str = "/coordinate-history";

/// HTTP client for the worker-tracking API.
///
/// As a [`CoordinateQuery`] it pulls raw pings from `/coordinate-history`;
/// as a [`PageSource`] it pulls cells already aggregated by the server from
/// `/coordinate-history/h3-index`.
pub struct CoordinateClient {
    http: HttpClient,
    base_url: String,
}

impl CoordinateClient {
    /// Reads `WORKER_HEX_API_URL` and, if set, `WORKER_HEX_API_TOKEN`.
    pub fn new() -> Result<Self, WorkerHexError> {
        let base_url = std::env::var("WORKER_HEX_API_URL")
            .map_err(|_| WorkerHexError::Config("WORKER_HEX_API_URL not set".into()))?;

        let mut http = HttpClient::new();
        if let Ok(token) = std::env::var("WORKER_HEX_API_TOKEN") {
            http = http.with_token(token);
        }

        Ok(Self::with_http(http, base_url))
    }

    pub fn with_http(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str, filter: &Filter) -> String {
        format!("{}{}?{}", self.base_url, path, filter.query_string())
    }

    pub async fn fetch_h3_index(&self, filter: &Filter) -> Result<H3IndexResponse, WorkerHexError> {
        self.http
            .fetch_json(&self.url(H3_INDEX_PATH, filter))
            .await
    }
}

impl CoordinateQuery for CoordinateClient {
    async fn query_page(&self, filter: &Filter) -> Result<CoordinatePage, WorkerHexError> {
        let response: ApiResponse<CoordinateRecord> = self
            .http
            .fetch_json(&self.url(COORDINATE_HISTORY_PATH, filter))
            .await?;

        Ok(CoordinatePage {
            records: response.data,
            pagination: response.pagination,
        })
    }
}

impl PageSource for CoordinateClient {
    async fn fetch_page(&self, filter: &Filter) -> Result<FetchedPage, WorkerHexError> {
        let response = self.fetch_h3_index(filter).await?;
        let pagination = response.pagination;

        Ok(FetchedPage {
            payload: PagePayload::Aggregates(response.into_collection()?),
            pagination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Bounds, PaginationConfig, PaginationDriver};

    #[test]
    fn test_url_building() {
        let client = CoordinateClient::with_http(HttpClient::new(), "http://localhost:3000/api/");
        let filter = Filter::new()
            .with_user(4)
            .with_bounds(Bounds::new(1.0, -1.0, 2.0, -2.0));

        assert_eq!(
            client.url(H3_INDEX_PATH, &filter),
            "http://localhost:3000/api/coordinate-history/h3-index?page=1&limit=1000&userId=4&north=1&south=-1&east=2&west=-2&resolution=10"
        );
    }

    #[tokio::test]
    #[ignore = "requires network access and WORKER_HEX_API_URL"]
    async fn test_fetch_h3_index_page() -> Result<(), WorkerHexError> {
        let client = CoordinateClient::new()?;
        let response = client.fetch_h3_index(&Filter::new().with_limit(100)).await?;
        println!(
            "Got {} cells over {} coordinates",
            response.h3_stats.total_h3_cells, response.h3_stats.total_coordinates
        );
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires network access and WORKER_HEX_API_URL"]
    async fn test_drive_all_pages() -> Result<(), WorkerHexError> {
        let driver = PaginationDriver::new(CoordinateClient::new()?, PaginationConfig::default());
        let collection = driver.start(Filter::new().with_resolution(9)).await?;
        println!("Got {} cells", collection.len());
        Ok(())
    }
}
