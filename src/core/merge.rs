use crate::error::WorkerHexError;

use super::aggregate::{AggregateCollection, H3CellAggregate};

// Tolerances for fields recomputed on both sides of a JSON round trip.
const CENTER_EPSILON: f64 = 1e-9;
const AREA_RELATIVE_EPSILON: f64 = 1e-9;

/// Merges two collections cell by cell.
///
/// Counts add, user sets union, `first_seen`/`last_seen` take the min/max.
/// The geometry of a cell (`center`, `resolution`, `area`) is a function of
/// its index, so a disagreement means resolutions were mixed within one
/// query and is reported as [`WorkerHexError::InconsistentAggregateKey`].
/// Cells present on both sides keep `a`'s geometry.
/// The operation is commutative and associative; `merge(a, empty) == a`.
pub fn merge(
    a: AggregateCollection,
    b: AggregateCollection,
) -> Result<AggregateCollection, WorkerHexError> {
    // Fold the smaller side into the larger one.
    let swapped = a.len() < b.len();
    let (mut into, from) = if swapped { (b, a) } else { (a, b) };

    for other in from.into_values() {
        if let Some(existing) = into.get(&other.h3_index) {
            check_consistent(existing, &other)?;
        }
        into.absorb(other, swapped);
    }

    Ok(into)
}

/// Merges any number of collections, e.g. the per-page results of a
/// concurrent prefetch.
pub fn merge_all(
    collections: impl IntoIterator<Item = AggregateCollection>,
) -> Result<AggregateCollection, WorkerHexError> {
    collections
        .into_iter()
        .try_fold(AggregateCollection::new(), merge)
}

fn check_consistent(a: &H3CellAggregate, b: &H3CellAggregate) -> Result<(), WorkerHexError> {
    let inconsistent = |reason: String| WorkerHexError::InconsistentAggregateKey {
        h3_index: a.h3_index.to_string(),
        reason,
    };

    if a.resolution != b.resolution {
        return Err(inconsistent(format!(
            "resolution {} vs {}",
            a.resolution, b.resolution
        )));
    }

    if (a.center.lat - b.center.lat).abs() > CENTER_EPSILON
        || (a.center.lon - b.center.lon).abs() > CENTER_EPSILON
    {
        return Err(inconsistent(format!(
            "center ({}, {}) vs ({}, {})",
            a.center.lat, a.center.lon, b.center.lat, b.center.lon
        )));
    }

    let scale = a.area.abs().max(b.area.abs()).max(f64::MIN_POSITIVE);
    if (a.area - b.area).abs() / scale > AREA_RELATIVE_EPSILON {
        return Err(inconsistent(format!("area {} vs {}", a.area, b.area)));
    }

    Ok(())
}

impl AggregateCollection {
    /// Adds `other` into the matching cell, or inserts it. Callers check
    /// consistency first. With `take_geometry`, a matching cell adopts
    /// `other`'s center and area.
    fn absorb(&mut self, other: H3CellAggregate, take_geometry: bool) {
        match self.get_mut(&other.h3_index) {
            Some(existing) => {
                if take_geometry {
                    existing.center = other.center;
                    existing.area = other.area;
                }
                existing.count += other.count;
                existing.users.extend(other.users);
                existing.first_seen = existing.first_seen.min(other.first_seen);
                existing.last_seen = existing.last_seen.max(other.last_seen);
            }
            None => self.put(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CoordinateRecord;
    use crate::core::fold;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn collection(records: &[(f64, f64, u32, i64)]) -> AggregateCollection {
        let records: Vec<_> = records
            .iter()
            .enumerate()
            .map(|(i, &(lat, lon, hour, user))| {
                CoordinateRecord::new(i.to_string(), user, at(hour), lat, lon)
            })
            .collect();
        fold(&records, 9, AggregateCollection::new()).unwrap()
    }

    fn samples() -> (AggregateCollection, AggregateCollection, AggregateCollection) {
        let a = collection(&[(-2.5, 118.0, 0, 1), (-2.6, 118.1, 3, 2)]);
        let b = collection(&[(-2.5, 118.0, 5, 2), (10.0, 10.0, 1, 3)]);
        let c = collection(&[(-2.6, 118.1, 1, 1), (-2.5, 118.0, 2, 4), (10.0, 10.0, 9, 3)]);
        (a, b, c)
    }

    #[test]
    fn test_merge_overlapping_cell() {
        let (a, b, _) = samples();
        let merged = merge(a, b).unwrap();
        assert_eq!(merged.len(), 3);

        let shared = merged
            .values()
            .find(|c| c.count == 2 && c.users.len() == 2 && c.users.contains(&1))
            .unwrap();
        assert_eq!(shared.first_seen, at(0));
        assert_eq!(shared.last_seen, at(5));
    }

    #[test]
    fn test_merge_commutative() {
        let (a, b, _) = samples();
        assert_eq!(
            merge(a.clone(), b.clone()).unwrap(),
            merge(b, a).unwrap()
        );
    }

    #[test]
    fn test_merge_associative() {
        let (a, b, c) = samples();
        let left = merge(merge(a.clone(), b.clone()).unwrap(), c.clone()).unwrap();
        let right = merge(a, merge(b, c).unwrap()).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn test_merge_empty_is_identity() {
        let (a, _, _) = samples();
        assert_eq!(merge(a.clone(), AggregateCollection::new()).unwrap(), a);
        assert_eq!(merge(AggregateCollection::new(), a.clone()).unwrap(), a);
    }

    #[test]
    fn test_merge_all_matches_pairwise() {
        let (a, b, c) = samples();
        let all = merge_all([c.clone(), a.clone(), b.clone()]).unwrap();
        let pairwise = merge(merge(a, b).unwrap(), c).unwrap();
        assert_eq!(all, pairwise);
    }

    #[test]
    fn test_merge_rejects_inconsistent_center() {
        let (a, _, _) = samples();
        let mut tampered: Vec<_> = a.values().cloned().collect();
        for cell in &mut tampered {
            cell.center.lat += 0.5;
        }
        let b = AggregateCollection::from_aggregates(tampered).unwrap();

        assert!(matches!(
            merge(a, b),
            Err(WorkerHexError::InconsistentAggregateKey { .. })
        ));
    }

    #[test]
    fn test_merge_rejects_inconsistent_area() {
        let (a, _, _) = samples();
        let mut tampered: Vec<_> = a.values().cloned().collect();
        tampered[0].area *= 1.01;
        let b = AggregateCollection::from_aggregates(tampered).unwrap();

        let err = merge(a, b).unwrap_err();
        match err {
            WorkerHexError::InconsistentAggregateKey { reason, .. } => {
                assert!(reason.starts_with("area"), "unexpected reason {reason}")
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_merge_tolerates_round_trip_noise() {
        let (a, _, _) = samples();
        let mut nudged: Vec<_> = a.values().cloned().collect();
        for cell in &mut nudged {
            cell.center.lat += 1e-12;
            cell.area *= 1.0 + 1e-12;
        }
        let b = AggregateCollection::from_aggregates(nudged).unwrap();

        let merged = merge(a.clone(), b).unwrap();
        assert_eq!(merged.total_coordinates(), 2 * a.total_coordinates());
    }

    #[test]
    fn test_merge_keeps_first_geometry() {
        let (a, b, _) = samples();
        // One cell of `a`, nudged within tolerance, against the larger `b`.
        let shared = a
            .values()
            .find(|c| b.contains(&c.h3_index))
            .cloned()
            .unwrap();
        let mut nudged = shared.clone();
        nudged.center.lat += 1e-12;
        nudged.area *= 1.0 + 1e-12;
        let small = AggregateCollection::from_aggregates([nudged.clone()]).unwrap();
        assert!(small.len() < b.len());

        let merged = merge(small.clone(), b.clone()).unwrap();
        let cell = merged.get(&shared.h3_index).unwrap();
        assert_eq!(cell.center, nudged.center);
        assert_eq!(cell.area, nudged.area);

        let reversed = merge(b.clone(), small).unwrap();
        let cell = reversed.get(&shared.h3_index).unwrap();
        assert_eq!(cell.center, b.get(&shared.h3_index).unwrap().center);
    }

    #[test]
    fn test_merge_rejects_inconsistent_resolution() {
        let (a, _, _) = samples();
        let mut tampered: Vec<_> = a.values().cloned().collect();
        tampered[0].resolution = 10;
        let b = AggregateCollection::from_aggregates(tampered).unwrap();

        assert!(matches!(
            merge(a, b),
            Err(WorkerHexError::InconsistentAggregateKey { .. })
        ));
    }
}
