use chrono::{DateTime, SecondsFormat, Utc};

use super::traits::CoordinateData;
use crate::core::DEFAULT_RESOLUTION;

/// Default number of raw records per page.
pub const DEFAULT_PAGE_LIMIT: u32 = 1000;

/// Viewport window in WGS84 degrees. No antimeridian wrap: `west <= east`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.south <= lat && lat <= self.north && self.west <= lon && lon <= self.east
    }
}

/// Parameters of one logical query. A changed filter is a new query.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub user_id: Option<i64>,
    pub north: Option<f64>,
    pub south: Option<f64>,
    pub east: Option<f64>,
    pub west: Option<f64>,
    pub resolution: u8,
    pub page: u32,
    pub limit: u32,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            user_id: None,
            north: None,
            south: None,
            east: None,
            west: None,
            resolution: DEFAULT_RESOLUTION,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.north = Some(bounds.north);
        self.south = Some(bounds.south);
        self.east = Some(bounds.east);
        self.west = Some(bounds.west);
        self
    }

    pub fn with_resolution(mut self, resolution: u8) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// The geographic window, only when all four edges are set.
    pub fn bounds(&self) -> Option<Bounds> {
        match (self.north, self.south, self.east, self.west) {
            (Some(north), Some(south), Some(east), Some(west)) => {
                Some(Bounds::new(north, south, east, west))
            }
            _ => None,
        }
    }

    /// Applies the time range (inclusive), user, and bounding box predicates.
    pub fn matches<T: CoordinateData>(&self, record: &T) -> bool {
        let ts = record.timestamp();

        if self.start_date.is_some_and(|start| ts < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| ts > end) {
            return false;
        }
        if self.user_id.is_some_and(|id| id != record.user_id()) {
            return false;
        }

        self.bounds()
            .is_none_or(|b| b.contains(record.lat(), record.lon()))
    }

    /// Query parameters in a fixed order, so equal filters render equal
    /// strings.
    pub fn query_string(&self) -> String {
        let mut params = vec![
            format!("page={}", self.page),
            format!("limit={}", self.limit),
        ];

        if let Some(start) = self.start_date {
            params.push(format!("startDate={}", encode_instant(start)));
        }
        if let Some(end) = self.end_date {
            params.push(format!("endDate={}", encode_instant(end)));
        }
        if let Some(user_id) = self.user_id {
            params.push(format!("userId={}", user_id));
        }
        if let Some(bounds) = self.bounds() {
            params.push(format!("north={}", bounds.north));
            params.push(format!("south={}", bounds.south));
            params.push(format!("east={}", bounds.east));
            params.push(format!("west={}", bounds.west));
        }
        params.push(format!("resolution={}", self.resolution));

        params.join("&")
    }

    /// Cache key for a response served at `path` for this filter.
    pub fn cache_key(&self, path: &str) -> String {
        format!("{}?{}", path, self.query_string())
    }

    /// Identity of the whole query, independent of which page is current.
    pub fn query_key(&self) -> String {
        self.clone().with_page(1).query_string()
    }
}

fn encode_instant(instant: DateTime<Utc>) -> String {
    urlencoding::encode(&instant.to_rfc3339_opts(SecondsFormat::Millis, true)).into_owned()
}

/// Live dashboard window. Each change bumps `revision`; `filter()` snapshots
/// the current window into an immutable query filter starting at page 1.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    user_id: Option<i64>,
    viewport: Option<Bounds>,
    resolution: Option<u8>,
    limit: Option<u32>,
    revision: u64,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time_range(&mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) {
        self.start_date = start;
        self.end_date = end;
        self.revision += 1;
    }

    pub fn select_user(&mut self, user_id: Option<i64>) {
        self.user_id = user_id;
        self.revision += 1;
    }

    pub fn set_viewport(&mut self, viewport: Option<Bounds>) {
        self.viewport = viewport;
        self.revision += 1;
    }

    pub fn set_resolution(&mut self, resolution: u8) {
        self.resolution = Some(resolution);
        self.revision += 1;
    }

    pub fn set_limit(&mut self, limit: u32) {
        self.limit = Some(limit);
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn filter(&self) -> Filter {
        let mut filter = Filter::new()
            .with_time_range(self.start_date, self.end_date)
            .with_resolution(self.resolution.unwrap_or(DEFAULT_RESOLUTION))
            .with_limit(self.limit.unwrap_or(DEFAULT_PAGE_LIMIT));

        filter.user_id = self.user_id;
        if let Some(viewport) = self.viewport {
            filter = filter.with_bounds(viewport);
        }
        filter
    }
}
