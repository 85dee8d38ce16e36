use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use h3o::CellIndex;
use rayon::prelude::*;
use tracing::warn;

use crate::client::CoordinateData;
use crate::error::WorkerHexError;

use super::hex::{self, AreaUnit, LatLon, cell_area, cell_center, cell_id, resolution_of};
use super::merge::merge;

/// Per-cell statistics over every ping folded into the cell.
#[derive(Debug, Clone, PartialEq)]
pub struct H3CellAggregate {
    pub h3_index: CellIndex,
    pub center: LatLon,
    pub resolution: u8,
    /// Cell area in km².
    pub area: f64,
    pub count: u64,
    pub users: BTreeSet<i64>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl H3CellAggregate {
    /// An empty aggregate for `cell`, with both time bounds at `timestamp`.
    pub fn seeded(cell: CellIndex, timestamp: DateTime<Utc>) -> Self {
        Self {
            h3_index: cell,
            center: cell_center(cell),
            resolution: resolution_of(cell),
            area: cell_area(cell, AreaUnit::Km2),
            count: 0,
            users: BTreeSet::new(),
            first_seen: timestamp,
            last_seen: timestamp,
        }
    }

    pub fn observe(&mut self, user_id: i64, timestamp: DateTime<Utc>) {
        self.count += 1;
        self.users.insert(user_id);
        self.first_seen = self.first_seen.min(timestamp);
        self.last_seen = self.last_seen.max(timestamp);
    }

    pub fn unique_users(&self) -> usize {
        self.users.len()
    }
}

/// Cell aggregates keyed by H3 index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateCollection {
    cells: HashMap<CellIndex, H3CellAggregate>,
}

impl AggregateCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, cell: &CellIndex) -> Option<&H3CellAggregate> {
        self.cells.get(cell)
    }

    pub fn contains(&self, cell: &CellIndex) -> bool {
        self.cells.contains_key(cell)
    }

    pub fn values(&self) -> impl Iterator<Item = &H3CellAggregate> {
        self.cells.values()
    }

    pub fn into_values(self) -> impl Iterator<Item = H3CellAggregate> {
        self.cells.into_values()
    }

    pub(super) fn get_mut(&mut self, cell: &CellIndex) -> Option<&mut H3CellAggregate> {
        self.cells.get_mut(cell)
    }

    pub(super) fn put(&mut self, aggregate: H3CellAggregate) {
        self.cells.insert(aggregate.h3_index, aggregate);
    }

    /// Builds a collection from standalone aggregates, merging any that
    /// share an index.
    pub fn from_aggregates(
        aggregates: impl IntoIterator<Item = H3CellAggregate>,
    ) -> Result<Self, WorkerHexError> {
        let mut single = AggregateCollection::new();
        for aggregate in aggregates {
            let mut one = AggregateCollection::new();
            one.put(aggregate);
            single = merge(single, one)?;
        }
        Ok(single)
    }

    /// Sum of `count` over every cell.
    pub fn total_coordinates(&self) -> u64 {
        self.cells.values().map(|c| c.count).sum()
    }

    /// Union of user sets over every cell.
    pub fn unique_users(&self) -> BTreeSet<i64> {
        self.cells
            .values()
            .flat_map(|c| c.users.iter().copied())
            .collect()
    }

    /// Cells ordered by count descending, ties broken by index.
    pub fn sorted_by_count(&self) -> Vec<&H3CellAggregate> {
        let mut sorted: Vec<_> = self.cells.values().collect();
        sorted.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.h3_index.to_string().cmp(&b.h3_index.to_string()))
        });
        sorted
    }

    /// The `n` densest cells.
    pub fn top(&self, n: usize) -> Vec<&H3CellAggregate> {
        let mut sorted = self.sorted_by_count();
        sorted.truncate(n);
        sorted
    }
}

/// Folds `records` into `into` at `resolution`.
///
/// The resolution is checked before any record is touched, so an invalid
/// resolution leaves no partial result. Records with out-of-range
/// coordinates are skipped with a warning.
pub fn fold<T: CoordinateData>(
    records: &[T],
    resolution: u8,
    mut into: AggregateCollection,
) -> Result<AggregateCollection, WorkerHexError> {
    let res = hex::resolution(resolution)?;
    let mut skipped = 0usize;

    for record in records {
        let cell = match cell_id(record.lat(), record.lon(), res) {
            Ok(cell) => cell,
            Err(e) => {
                warn!(user_id = record.user_id(), "skipping record: {e}");
                skipped += 1;
                continue;
            }
        };

        let timestamp = record.timestamp();
        into.cells
            .entry(cell)
            .or_insert_with(|| H3CellAggregate::seeded(cell, timestamp))
            .observe(record.user_id(), timestamp);
    }

    if skipped > 0 {
        warn!(
            skipped,
            total = records.len(),
            "fold skipped records with invalid coordinates"
        );
    }

    Ok(into)
}

/// Folds independent pages in parallel, each into its own collection, and
/// reduces them with [`merge`].
pub fn fold_pages<T: CoordinateData>(
    pages: &[Vec<T>],
    resolution: u8,
) -> Result<AggregateCollection, WorkerHexError> {
    hex::resolution(resolution)?;

    pages
        .par_iter()
        .map(|page| fold(page, resolution, AggregateCollection::new()))
        .try_reduce(AggregateCollection::new, merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CoordinateRecord;
    use crate::core::hex::resolution;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn scenario() -> Vec<CoordinateRecord> {
        vec![
            CoordinateRecord::new("a", 1, at(0), -2.5, 118.0),
            CoordinateRecord::new("b", 2, at(1), -2.5, 118.0),
            CoordinateRecord::new("c", 1, at(2), -2.6, 118.1),
        ]
    }

    #[test]
    fn test_fold_same_cell() {
        let records = vec![
            CoordinateRecord::new("a", 1, at(5), 1.0, 1.0),
            CoordinateRecord::new("b", 2, at(2), 1.0, 1.0),
        ];
        let collection = fold(&records, 9, AggregateCollection::new()).unwrap();

        assert_eq!(collection.len(), 1);
        let cell = collection.values().next().unwrap();
        assert_eq!(cell.count, 2);
        assert_eq!(cell.users, BTreeSet::from([1, 2]));
        assert_eq!(cell.first_seen, at(2));
        assert_eq!(cell.last_seen, at(5));
        assert_eq!(cell.resolution, 9);
    }

    #[test]
    fn test_fold_scenario() {
        let collection = fold(&scenario(), 9, AggregateCollection::new()).unwrap();
        assert_eq!(collection.len(), 2);

        let res = resolution(9).unwrap();
        let near = collection.get(&cell_id(-2.5, 118.0, res).unwrap()).unwrap();
        assert_eq!(near.count, 2);
        assert_eq!(near.users, BTreeSet::from([1, 2]));
        assert_eq!(near.first_seen, at(0));
        assert_eq!(near.last_seen, at(1));

        let far = collection.get(&cell_id(-2.6, 118.1, res).unwrap()).unwrap();
        assert_eq!(far.count, 1);
        assert_eq!(far.users, BTreeSet::from([1]));
        assert_eq!(far.first_seen, far.last_seen);
    }

    #[test]
    fn test_fold_skips_invalid_coordinates() {
        let mut records = scenario();
        records.push(CoordinateRecord::new("bad", 9, at(3), 200.0, 118.0));
        records.push(CoordinateRecord::new("nan", 9, at(3), f64::NAN, 118.0));

        let collection = fold(&records, 9, AggregateCollection::new()).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.total_coordinates(), 3);
        assert!(!collection.unique_users().contains(&9));
    }

    #[test]
    fn test_fold_invalid_resolution_does_no_work() {
        let seed = fold(&scenario(), 9, AggregateCollection::new()).unwrap();
        let result = fold(&scenario(), 99, seed);
        assert!(matches!(result, Err(WorkerHexError::InvalidResolution(99))));
    }

    #[test]
    fn test_fold_accumulates_into_existing() {
        let records = scenario();
        let first = fold(&records[..1], 9, AggregateCollection::new()).unwrap();
        let both = fold(&records[1..], 9, first).unwrap();
        assert_eq!(both, fold(&records, 9, AggregateCollection::new()).unwrap());
    }

    #[test]
    fn test_fold_leaves_input_untouched() {
        let records = scenario();
        let before = records.clone();
        let _ = fold(&records, 9, AggregateCollection::new()).unwrap();
        assert_eq!(records, before);
    }

    #[test]
    fn test_fold_invariants_hold() {
        let collection = fold(&scenario(), 7, AggregateCollection::new()).unwrap();
        for cell in collection.values() {
            assert!(cell.unique_users() as u64 <= cell.count);
            assert!(cell.first_seen <= cell.last_seen);
            assert_eq!(resolution_of(cell.h3_index), cell.resolution);
        }
    }

    #[test]
    fn test_fold_pages_matches_single_fold() {
        let records = scenario();
        let pages: Vec<Vec<CoordinateRecord>> = records.chunks(1).map(|c| c.to_vec()).collect();

        let parallel = fold_pages(&pages, 9).unwrap();
        let serial = fold(&records, 9, AggregateCollection::new()).unwrap();
        assert_eq!(parallel, serial);
    }

    #[test]
    fn test_sorted_by_count_and_top() {
        let collection = fold(&scenario(), 9, AggregateCollection::new()).unwrap();
        let sorted = collection.sorted_by_count();
        assert_eq!(sorted[0].count, 2);
        assert_eq!(sorted[1].count, 1);
        assert_eq!(collection.top(1).len(), 1);
        assert_eq!(collection.top(10).len(), 2);
    }

    #[test]
    fn test_from_aggregates_merges_duplicates() {
        let collection = fold(&scenario(), 9, AggregateCollection::new()).unwrap();
        let doubled: Vec<_> = collection
            .values()
            .cloned()
            .chain(collection.values().cloned())
            .collect();

        let merged = AggregateCollection::from_aggregates(doubled).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.total_coordinates(), 6);
    }
}
