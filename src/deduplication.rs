// 🔍 Deduplication - collapse staging snapshots to one record per natural key
// Staging is append-only: every load adds rows, so a key can appear many times.
// The latest load wins (load timestamp, then load id, then staging row id).

use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::warn;

// ============================================================================
// LOAD STAMP
// ============================================================================

/// Provenance of one staging row; field order is the tie-break order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadStamp {
    pub load_timestamp: String,
    pub load_id: i64,
    pub stg_id: i64,
}

#[derive(Debug, Clone)]
pub struct Staged<T> {
    pub record: T,
    pub stamp: LoadStamp,
}

// ============================================================================
// COLLAPSE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollapseReport {
    pub staged_rows: usize,
    pub distinct_keys: usize,
    /// Older rows discarded in favour of a later load
    pub superseded: usize,
    /// Keys whose discarded rows carried different content than the winner
    pub conflicting_keys: usize,
}

/// Keep the most recently loaded record per natural key, ordered by key
pub fn latest_per_key<T, K, F>(rows: Vec<Staged<T>>, key: F) -> (Vec<T>, CollapseReport)
where
    T: PartialEq,
    K: Ord,
    F: Fn(&T) -> K,
{
    let staged_rows = rows.len();
    let mut winners: BTreeMap<K, (Staged<T>, bool)> = BTreeMap::new();

    for row in rows {
        match winners.entry(key(&row.record)) {
            Entry::Vacant(slot) => {
                slot.insert((row, false));
            }
            Entry::Occupied(mut slot) => {
                let (current, conflict) = slot.get_mut();
                if row.record != current.record {
                    *conflict = true;
                }
                if row.stamp > current.stamp {
                    *current = row;
                }
            }
        }
    }

    let conflicting_keys = winners.values().filter(|(_, conflict)| *conflict).count();
    let distinct_keys = winners.len();
    let report = CollapseReport {
        staged_rows,
        distinct_keys,
        superseded: staged_rows - distinct_keys,
        conflicting_keys,
    };

    if conflicting_keys > 0 {
        warn!(
            conflicting_keys,
            "staged rows share a natural key with different content; latest load kept"
        );
    }

    let records = winners.into_values().map(|(staged, _)| staged.record).collect();
    (records, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(id: &str, city: &str, ts: &str, load_id: i64, stg_id: i64) -> Staged<(String, String)> {
        Staged {
            record: (id.to_string(), city.to_string()),
            stamp: LoadStamp {
                load_timestamp: ts.to_string(),
                load_id,
                stg_id,
            },
        }
    }

    #[test]
    fn test_latest_load_wins() {
        let rows = vec![
            staged("CUST000002", "Boston", "2024-03-01T10:00:00.000000Z", 1, 1),
            staged("CUST000001", "Austin", "2024-03-01T10:00:00.000000Z", 1, 2),
            staged("CUST000001", "Dallas", "2024-03-02T10:00:00.000000Z", 2, 3),
        ];

        let (records, report) = latest_per_key(rows, |r| r.0.clone());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0], ("CUST000001".to_string(), "Dallas".to_string()));
        assert_eq!(report.superseded, 1);
        assert_eq!(report.conflicting_keys, 1);
    }

    #[test]
    fn test_same_timestamp_breaks_tie_on_load_then_row_id() {
        let rows = vec![
            staged("CUST000001", "Later", "2024-03-01T10:00:00.000000Z", 7, 2),
            staged("CUST000001", "Earlier", "2024-03-01T10:00:00.000000Z", 7, 1),
        ];

        let (records, _) = latest_per_key(rows, |r| r.0.clone());

        assert_eq!(records[0].1, "Later");
    }

    #[test]
    fn test_exact_duplicates_are_not_conflicts() {
        let rows = vec![
            staged("CUST000001", "Austin", "2024-03-01T10:00:00.000000Z", 1, 1),
            staged("CUST000001", "Austin", "2024-03-02T10:00:00.000000Z", 2, 2),
        ];

        let (records, report) = latest_per_key(rows, |r| r.0.clone());

        assert_eq!(records.len(), 1);
        assert_eq!(report.superseded, 1);
        assert_eq!(report.conflicting_keys, 0);
    }
}
