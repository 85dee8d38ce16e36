pub mod coordinate;
pub mod filter;
pub mod memory;
pub mod pagination;
pub mod traits;
pub mod types;

pub use coordinate::CoordinateClient;
pub use filter::{Bounds, DEFAULT_PAGE_LIMIT, Filter, FilterState};
pub use memory::MemoryStore;
pub use pagination::{DriverSnapshot, DriverState, PaginationConfig, PaginationDriver};
pub use traits::{CoordinateData, CoordinateQuery, FetchedPage, PagePayload, PageSource, RawPages};
pub use types::{
    ApiResponse, CoordinatePage, CoordinateRecord, H3CellAggregateDto, H3IndexResponse,
    HttpClient, PaginationCursor, UserInfo,
};
