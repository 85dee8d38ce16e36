use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{AggregateCollection, H3CellAggregate, H3Stats, LatLon, parse_cell, resolution_of};
use crate::error::WorkerHexError;

use super::traits::CoordinateData;

pub const H3_INDEX_PATH: &str = "/coordinate-history/h3-index";

/// Envelope of the paged coordinate endpoints: `{data, pagination}`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ApiResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationCursor,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub nama: Option<String>,
    #[serde(default)]
    pub jabatan: Option<String>,
}

/// A single GPS ping from a field worker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateRecord {
    pub id: String,
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

impl CoordinateRecord {
    pub fn new(
        id: impl Into<String>,
        user_id: i64,
        timestamp: DateTime<Utc>,
        lat: f64,
        lon: f64,
    ) -> Self {
        Self {
            id: id.into(),
            user_id,
            timestamp,
            lat,
            lon,
            user: None,
        }
    }
}

impl CoordinateData for CoordinateRecord {
    fn lat(&self) -> f64 {
        self.lat
    }

    fn lon(&self) -> f64 {
        self.lon
    }

    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Page bookkeeping, recomputed from `total` and `limit` on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationCursor {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationCursor {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total_pages = total.div_ceil(u64::from(limit)) as u32;

        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    /// Zero-based record offset of this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

/// One page of raw records from the coordinate query layer.
#[derive(Debug, Clone)]
pub struct CoordinatePage {
    pub records: Vec<CoordinateRecord>,
    pub pagination: PaginationCursor,
}

/// Wire form of a cell aggregate.
///
/// `userIds` carries the exact user set so that pages can be merged on the
/// client without approximating `uniqueUsers`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct H3CellAggregateDto {
    pub h3_index: String,
    pub center: LatLon,
    pub resolution: u8,
    pub area: f64,
    pub count: u64,
    pub unique_users: usize,
    pub user_ids: Vec<i64>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<&H3CellAggregate> for H3CellAggregateDto {
    fn from(aggregate: &H3CellAggregate) -> Self {
        Self {
            h3_index: aggregate.h3_index.to_string(),
            center: aggregate.center,
            resolution: aggregate.resolution,
            area: aggregate.area,
            count: aggregate.count,
            unique_users: aggregate.users.len(),
            user_ids: aggregate.users.iter().copied().collect(),
            first_seen: aggregate.first_seen,
            last_seen: aggregate.last_seen,
        }
    }
}

impl TryFrom<H3CellAggregateDto> for H3CellAggregate {
    type Error = WorkerHexError;

    fn try_from(dto: H3CellAggregateDto) -> Result<Self, Self::Error> {
        let cell = parse_cell(&dto.h3_index)?;

        if resolution_of(cell) != dto.resolution {
            return Err(WorkerHexError::InconsistentAggregateKey {
                h3_index: dto.h3_index,
                reason: format!(
                    "resolution {} does not match index resolution {}",
                    dto.resolution,
                    resolution_of(cell)
                ),
            });
        }

        let users: BTreeSet<i64> = dto.user_ids.into_iter().collect();
        if users.len() != dto.unique_users {
            return Err(WorkerHexError::Api(format!(
                "cell {} reports {} unique users but carries {} user ids",
                dto.h3_index,
                dto.unique_users,
                users.len()
            )));
        }
        if (users.len() as u64) > dto.count || dto.first_seen > dto.last_seen {
            return Err(WorkerHexError::Api(format!(
                "cell {} has inconsistent count or time range",
                dto.h3_index
            )));
        }

        Ok(H3CellAggregate {
            h3_index: cell,
            center: dto.center,
            resolution: dto.resolution,
            area: dto.area,
            count: dto.count,
            users,
            first_seen: dto.first_seen,
            last_seen: dto.last_seen,
        })
    }
}

/// Body of `GET /coordinate-history/h3-index`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct H3IndexResponse {
    pub data: Vec<H3CellAggregateDto>,
    pub pagination: PaginationCursor,
    pub h3_stats: H3Stats,
}

impl H3IndexResponse {
    /// Rebuilds the aggregate collection carried by this page.
    pub fn into_collection(self) -> Result<AggregateCollection, WorkerHexError> {
        let aggregates = self
            .data
            .into_iter()
            .map(H3CellAggregate::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        AggregateCollection::from_aggregates(aggregates)
    }
}

pub struct HttpClient {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, WorkerHexError> {
        let mut request = self.client.get(url);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(WorkerHexError::Api(format!(
                "API returned status {}",
                response.status()
            )));
        }

        let data: T = response.json().await?;
        Ok(data)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
