use serde::{Deserialize, Serialize};

use super::aggregate::AggregateCollection;

/// Summary block returned alongside every `h3-index` page.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct H3Stats {
    pub total_h3_cells: usize,
    pub total_coordinates: u64,
    pub total_unique_users: usize,
    pub average_coordinates_per_cell: f64,
}

impl From<&AggregateCollection> for H3Stats {
    fn from(collection: &AggregateCollection) -> Self {
        let total_h3_cells = collection.len();
        let total_coordinates = collection.total_coordinates();
        let average_coordinates_per_cell = if total_h3_cells == 0 {
            0.0
        } else {
            total_coordinates as f64 / total_h3_cells as f64
        };

        Self {
            total_h3_cells,
            total_coordinates,
            total_unique_users: collection.unique_users().len(),
            average_coordinates_per_cell,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CoordinateRecord;
    use crate::core::fold;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_stats_over_scenario() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let records = vec![
            CoordinateRecord::new("a", 1, t, -2.5, 118.0),
            CoordinateRecord::new("b", 2, t, -2.5, 118.0),
            CoordinateRecord::new("c", 1, t, -2.6, 118.1),
        ];
        let collection = fold(&records, 9, AggregateCollection::new()).unwrap();
        let stats = H3Stats::from(&collection);

        assert_eq!(stats.total_h3_cells, 2);
        assert_eq!(stats.total_coordinates, 3);
        assert_eq!(stats.total_unique_users, 2);
        assert_relative_eq!(stats.average_coordinates_per_cell, 1.5);
    }

    #[test]
    fn test_stats_empty() {
        let stats = H3Stats::from(&AggregateCollection::new());
        assert_eq!(stats, H3Stats::default());
    }

    #[test]
    fn test_stats_wire_names() {
        let json = serde_json::to_value(H3Stats::default()).unwrap();
        for key in [
            "totalH3Cells",
            "totalCoordinates",
            "totalUniqueUsers",
            "averageCoordinatesPerCell",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
