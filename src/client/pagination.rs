use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::core::{AggregateCollection, fold_pages, merge, resolution};
use crate::error::WorkerHexError;

use super::filter::Filter;
use super::traits::{FetchedPage, PagePayload, PageSource};
use super::types::PaginationCursor;

/// Configuration for paginated fetching.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Pages requested at once by [`PaginationDriver::start_concurrent`].
    pub batch_size: usize,
    pub batch_delay: Duration,
    /// Hard stop on the number of pages one query may pull. A query that
    /// needs more pages fails instead of completing with a partial result.
    pub max_pages: Option<u32>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            batch_delay: Duration::from_millis(100),
            max_pages: None,
        }
    }
}

impl PaginationConfig {
    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the delay between batches.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Sets the maximum number of pages.
    pub fn with_max_pages(mut self, max: u32) -> Self {
        self.max_pages = Some(max.max(1));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Fetching,
    Merging,
    Complete,
    Failed,
}

/// Point-in-time view of a driver.
#[derive(Debug, Clone)]
pub struct DriverSnapshot {
    pub generation: u64,
    pub state: DriverState,
    pub filter: Option<Filter>,
    pub cursor: Option<PaginationCursor>,
    pub aggregates: AggregateCollection,
    pub error: Option<String>,
}

impl DriverSnapshot {
    pub fn is_complete(&self) -> bool {
        self.state == DriverState::Complete
    }
}

#[derive(Debug)]
struct DriverInner {
    generation: u64,
    state: DriverState,
    filter: Option<Filter>,
    cursor: Option<PaginationCursor>,
    aggregates: AggregateCollection,
    error: Option<String>,
}

/// Drives fetch → fold → merge over every page of one filter.
///
/// Cloning yields another handle onto the same query state. Each `start`
/// bumps the generation; a page that arrives for an older generation is
/// dropped and the older call returns [`WorkerHexError::StaleGeneration`].
/// A failed fetch discards everything gathered so far for that query.
pub struct PaginationDriver<S> {
    source: Arc<S>,
    config: PaginationConfig,
    inner: Arc<Mutex<DriverInner>>,
    results: Option<Arc<ResultCache>>,
}

impl<S> Clone for PaginationDriver<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            results: self.results.clone(),
        }
    }
}

impl<S: PageSource + Send + Sync> PaginationDriver<S> {
    pub fn new(source: S, config: PaginationConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
            inner: Arc::new(Mutex::new(DriverInner {
                generation: 0,
                state: DriverState::Idle,
                filter: None,
                cursor: None,
                aggregates: AggregateCollection::new(),
                error: None,
            })),
            results: None,
        }
    }

    /// Serves repeated queries for the same filter from `cache`.
    pub fn with_result_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.results = Some(cache);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn snapshot(&self) -> DriverSnapshot {
        let inner = self.lock();
        DriverSnapshot {
            generation: inner.generation,
            state: inner.state,
            filter: inner.filter.clone(),
            cursor: inner.cursor,
            aggregates: inner.aggregates.clone(),
            error: inner.error.clone(),
        }
    }

    /// Fetches every page of `filter` one after another, starting at page 1.
    pub async fn start(&self, filter: Filter) -> Result<AggregateCollection, WorkerHexError> {
        let generation = match self.begin(&filter)? {
            Begin::Cached(collection) => return Ok(collection),
            Begin::Fresh(generation) => generation,
        };

        let mut page = 1;
        loop {
            let request = filter.clone().with_page(page);
            let fetched = self.source.fetch_page(&request).await;
            let fetched = self.arrived(generation, page, fetched)?;

            let has_next = self.absorb(generation, &filter, vec![fetched])?;
            if !has_next {
                return self.finish(generation, &filter);
            }
            if self.at_page_cap(page) {
                return Err(self.capped(generation));
            }

            page += 1;
            self.set_state(generation, DriverState::Fetching)?;
        }
    }

    /// Like [`start`](Self::start), but after page 1 reveals the page count
    /// the remaining pages are fetched `batch_size` at a time. Each page folds
    /// into its own collection; merging happens once per batch.
    pub async fn start_concurrent(
        &self,
        filter: Filter,
    ) -> Result<AggregateCollection, WorkerHexError> {
        let generation = match self.begin(&filter)? {
            Begin::Cached(collection) => return Ok(collection),
            Begin::Fresh(generation) => generation,
        };

        let first = self.source.fetch_page(&filter.clone().with_page(1)).await;
        let first = self.arrived(generation, 1, first)?;
        let total_pages = first.pagination.total_pages;

        let has_next = self.absorb(generation, &filter, vec![first])?;
        if !has_next {
            return self.finish(generation, &filter);
        }
        if self.config.max_pages.is_some_and(|max| total_pages > max) {
            return Err(self.capped(generation));
        }

        let pages: Vec<u32> = (2..=total_pages).collect();

        for (i, chunk) in pages.chunks(self.config.batch_size).enumerate() {
            if i > 0 {
                sleep(self.config.batch_delay).await;
            }

            self.set_state(generation, DriverState::Fetching)?;
            let requests: Vec<Filter> = chunk
                .iter()
                .map(|&page| filter.clone().with_page(page))
                .collect();
            let responses = join_all(requests.iter().map(|r| self.source.fetch_page(r))).await;

            let mut batch = Vec::with_capacity(responses.len());
            for (&page, response) in chunk.iter().zip(responses) {
                batch.push(self.arrived(generation, page, response)?);
            }
            self.absorb(generation, &filter, batch)?;
        }

        self.finish(generation, &filter)
    }

    fn lock(&self) -> MutexGuard<'_, DriverInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, filter: &Filter) -> Result<Begin, WorkerHexError> {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.filter = Some(filter.clone());
        inner.cursor = None;
        inner.aggregates = AggregateCollection::new();
        inner.error = None;

        if let Err(e) = resolution(filter.resolution) {
            inner.state = DriverState::Failed;
            inner.error = Some(e.to_string());
            return Err(e);
        }

        if let Some(hit) = self.results.as_ref().and_then(|c| c.get(&filter.query_key())) {
            debug!(generation = inner.generation, "result cache hit");
            inner.state = DriverState::Complete;
            inner.aggregates = hit.clone();
            return Ok(Begin::Cached(hit));
        }

        inner.state = DriverState::Fetching;
        Ok(Begin::Fresh(inner.generation))
    }

    fn current(inner: &DriverInner, generation: u64) -> Result<(), WorkerHexError> {
        if inner.generation == generation {
            Ok(())
        } else {
            Err(WorkerHexError::StaleGeneration {
                stale: generation,
                current: inner.generation,
            })
        }
    }

    fn set_state(&self, generation: u64, state: DriverState) -> Result<(), WorkerHexError> {
        let mut inner = self.lock();
        Self::current(&inner, generation)?;
        inner.state = state;
        Ok(())
    }

    /// Checks a page response against the live generation. Stale responses
    /// are dropped whether or not they succeeded.
    fn arrived(
        &self,
        generation: u64,
        page: u32,
        response: Result<FetchedPage, WorkerHexError>,
    ) -> Result<FetchedPage, WorkerHexError> {
        let mut inner = self.lock();
        if let Err(stale) = Self::current(&inner, generation) {
            debug!(generation, page, "discarding page for abandoned query");
            return Err(stale);
        }

        match response {
            Ok(fetched) => {
                inner.state = DriverState::Merging;
                Ok(fetched)
            }
            Err(e) => {
                warn!(generation, page, "page fetch failed: {e}");
                let err = WorkerHexError::fetch_failed(page, e);
                Self::fail(&mut inner, &err);
                Err(err)
            }
        }
    }

    fn fail(inner: &mut DriverInner, err: &WorkerHexError) {
        inner.state = DriverState::Failed;
        inner.aggregates = AggregateCollection::new();
        inner.error = Some(err.to_string());
    }

    /// Folds and merges a set of fetched pages into the running collection.
    /// Raw pages are folded in parallel; pre-aggregated pages must be at the
    /// filter's resolution. Returns whether the furthest page reports a
    /// successor.
    fn absorb(
        &self,
        generation: u64,
        filter: &Filter,
        pages: Vec<FetchedPage>,
    ) -> Result<bool, WorkerHexError> {
        let mut collections = Vec::with_capacity(pages.len() + 1);
        let mut raw = Vec::new();
        let mut furthest: Option<PaginationCursor> = None;

        for fetched in pages {
            if furthest.is_none_or(|c| fetched.pagination.page >= c.page) {
                furthest = Some(fetched.pagination);
            }
            match fetched.payload {
                PagePayload::Records(records) => raw.push(records),
                PagePayload::Aggregates(collection) => {
                    collections.push(at_resolution(collection, filter.resolution))
                }
            }
        }
        if !raw.is_empty() {
            collections.push(fold_pages(&raw, filter.resolution));
        }

        let mut inner = self.lock();
        Self::current(&inner, generation)?;

        let mut running = std::mem::take(&mut inner.aggregates);
        for collection in collections {
            running = match collection.and_then(|c| merge(running, c)) {
                Ok(merged) => merged,
                Err(e) => {
                    Self::fail(&mut inner, &e);
                    return Err(e);
                }
            };
        }
        inner.aggregates = running;

        if let Some(cursor) = furthest {
            debug!(
                generation,
                page = cursor.page,
                total_pages = cursor.total_pages,
                cells = inner.aggregates.len(),
                "merged page"
            );
            inner.cursor = Some(cursor);
        }

        Ok(furthest.is_some_and(|c| c.has_next))
    }

    fn at_page_cap(&self, page: u32) -> bool {
        self.config.max_pages.is_some_and(|max| page >= max)
    }

    /// Fails a query that still has pages left once the cap is reached.
    fn capped(&self, generation: u64) -> WorkerHexError {
        let mut inner = self.lock();
        if let Err(stale) = Self::current(&inner, generation) {
            return stale;
        }

        let err = WorkerHexError::PageCapReached {
            max_pages: self.config.max_pages.unwrap_or_default(),
            total_pages: inner.cursor.map_or(0, |c| c.total_pages),
        };
        warn!(generation, "{err}");
        Self::fail(&mut inner, &err);
        err
    }

    fn finish(&self, generation: u64, filter: &Filter) -> Result<AggregateCollection, WorkerHexError> {
        let mut inner = self.lock();
        Self::current(&inner, generation)?;
        inner.state = DriverState::Complete;

        let result = inner.aggregates.clone();
        info!(
            generation,
            cells = result.len(),
            coordinates = result.total_coordinates(),
            "query complete"
        );

        if let Some(cache) = &self.results {
            cache.put(filter.query_key(), result.clone());
        }
        Ok(result)
    }
}

/// Rejects a pre-aggregated page holding cells at another resolution.
fn at_resolution(
    collection: AggregateCollection,
    resolution: u8,
) -> Result<AggregateCollection, WorkerHexError> {
    if let Some(cell) = collection.values().find(|c| c.resolution != resolution) {
        return Err(WorkerHexError::InconsistentAggregateKey {
            h3_index: cell.h3_index.to_string(),
            reason: format!(
                "resolution {} in a query at resolution {}",
                cell.resolution, resolution
            ),
        });
    }
    Ok(collection)
}

enum Begin {
    Cached(AggregateCollection),
    Fresh(u64),
}
