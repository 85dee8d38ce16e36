use std::sync::atomic::{AtomicUsize, Ordering};

use super::filter::Filter;
use super::traits::CoordinateQuery;
use super::types::{CoordinatePage, CoordinateRecord, PaginationCursor};
use crate::error::WorkerHexError;

/// In-process coordinate query layer over a fixed set of records.
///
/// Serves the same contract as the relational store: filter, order by
/// timestamp descending, then offset/limit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<CoordinateRecord>,
    queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new(mut records: Vec<CoordinateRecord>) -> Self {
        // Stable on id so equal timestamps page deterministically.
        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self {
            records,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of page queries served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn page(&self, filter: &Filter) -> CoordinatePage {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let matching: Vec<&CoordinateRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(*r))
            .collect();

        let pagination = PaginationCursor::new(filter.page, filter.limit, matching.len() as u64);
        let records = matching
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();

        CoordinatePage {
            records,
            pagination,
        }
    }

    /// Records sorted newest first, as the store holds them.
    pub fn records(&self) -> &[CoordinateRecord] {
        &self.records
    }
}

impl CoordinateQuery for MemoryStore {
    async fn query_page(&self, filter: &Filter) -> Result<CoordinatePage, WorkerHexError> {
        Ok(self.page(filter))
    }
}
