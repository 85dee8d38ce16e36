use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerHexError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Invalid H3 resolution: {0} (expected 0-15)")]
    InvalidResolution(u8),

    #[error("Invalid H3 cell index: {0}")]
    InvalidCellIndex(#[from] h3o::error::InvalidCellIndex),

    #[error("Inconsistent aggregate for cell {h3_index}: {reason}")]
    InconsistentAggregateKey { h3_index: String, reason: String },

    #[error("Page {page} fetch failed: {source}")]
    FetchFailed {
        page: u32,
        #[source]
        source: Box<WorkerHexError>,
    },

    #[error("Query spans {total_pages} pages, over the cap of {max_pages}")]
    PageCapReached { max_pages: u32, total_pages: u32 },

    #[error("Query generation {stale} superseded by {current}")]
    StaleGeneration { stale: u64, current: u64 },
}

impl WorkerHexError {
    /// Wraps a transport/server error raised while fetching `page`.
    pub fn fetch_failed(page: u32, source: WorkerHexError) -> Self {
        WorkerHexError::FetchFailed {
            page,
            source: Box::new(source),
        }
    }

    /// True for responses belonging to an abandoned query. These are
    /// dropped quietly rather than shown to the user.
    pub fn is_stale(&self) -> bool {
        matches!(self, WorkerHexError::StaleGeneration { .. })
    }
}
