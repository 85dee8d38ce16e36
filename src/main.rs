use std::str::FromStr;

use arrow_cast::pretty::pretty_format_batches;
use chrono::{DateTime, FixedOffset, Utc};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use worker_hex_rs::core::DEFAULT_RESOLUTION;
use worker_hex_rs::{
    Bounds, CoordinateClient, Filter, H3Stats, PaginationConfig, PaginationDriver, WorkerHexError,
    to_record_batch_no_geom,
};

const TOP_CELLS: usize = 10;

/// Parses an optional positional argument; `-` or a missing argument means
/// "not set".
fn optional<T: FromStr>(arg: Option<String>, name: &str) -> Result<Option<T>, WorkerHexError> {
    match arg.as_deref() {
        None | Some("-") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| WorkerHexError::Config(format!("invalid {name}: {value}"))),
    }
}

fn optional_instant(arg: Option<String>, name: &str) -> Result<Option<DateTime<Utc>>, WorkerHexError> {
    Ok(optional::<DateTime<FixedOffset>>(arg, name)?.map(|t| t.with_timezone(&Utc)))
}

/// `[resolution] [user_id] [start] [end] [north south east west]`
fn parse_filter(args: impl IntoIterator<Item = String>) -> Result<Filter, WorkerHexError> {
    let mut args = args.into_iter();

    let resolution = optional(args.next(), "resolution")?.unwrap_or(DEFAULT_RESOLUTION);
    let mut filter = Filter::new().with_resolution(resolution);

    if let Some(user_id) = optional(args.next(), "user id")? {
        filter = filter.with_user(user_id);
    }

    let start = optional_instant(args.next(), "start date")?;
    let end = optional_instant(args.next(), "end date")?;
    filter = filter.with_time_range(start, end);

    let edges: Vec<f64> = args
        .map(|arg| {
            arg.parse()
                .map_err(|_| WorkerHexError::Config(format!("invalid bound: {arg}")))
        })
        .collect::<Result<_, _>>()?;
    match edges[..] {
        [] => {}
        [north, south, east, west] => {
            filter = filter.with_bounds(Bounds::new(north, south, east, west));
        }
        _ => {
            return Err(WorkerHexError::Config(
                "bounding box needs north south east west".into(),
            ));
        }
    }

    Ok(filter)
}

/// Usage: `worker-hex-rs [resolution] [user_id] [start] [end] [north south east west]`
///
/// Dates are RFC 3339; pass `-` to leave a position unset.
#[tokio::main]
async fn main() -> Result<(), WorkerHexError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let filter = parse_filter(std::env::args().skip(1))?;
    let resolution = filter.resolution;

    let client = CoordinateClient::new()?;
    let driver = PaginationDriver::new(client, PaginationConfig::default());

    info!("Fetching all coordinate pages at resolution {resolution}...");
    let collection = match driver.start_concurrent(filter).await {
        Ok(collection) => collection,
        Err(e) => {
            warn!("query failed: {e}");
            return Err(e);
        }
    };

    let stats = H3Stats::from(&collection);
    info!(
        cells = stats.total_h3_cells,
        coordinates = stats.total_coordinates,
        users = stats.total_unique_users,
        "aggregation complete"
    );
    println!(
        "{} cells, {} coordinates, {} users, {:.2} coordinates/cell",
        stats.total_h3_cells,
        stats.total_coordinates,
        stats.total_unique_users,
        stats.average_coordinates_per_cell
    );

    let batch = to_record_batch_no_geom(&collection)?;
    let top = batch.slice(0, batch.num_rows().min(TOP_CELLS));
    println!("{}", pretty_format_batches(&[top])?);

    Ok(())
}
