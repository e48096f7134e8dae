//! The validated fact table.

use std::collections::HashMap;

use indexmap::IndexSet;
use thiserror::Error;
use tracing::debug;

use crate::common::{DateId, FactKey, FactRow};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Two different counts for the same dimension key. Deduplication cannot
    /// explain this away: it means aggregation or encoding double-counted.
    #[error(
        "{} dimension key(s) have more than one count row: {}",
        .duplicates.len(),
        format_duplicates(.duplicates)
    )]
    DuplicateKeys { duplicates: Vec<(FactKey, usize)> },
}

fn format_duplicates(duplicates: &[(FactKey, usize)]) -> String {
    duplicates
        .iter()
        .map(|(key, n)| format!("{key} x{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fact rows with exact duplicates removed and at most one row per [`FactKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactTable {
    rows: Vec<FactRow>,
    duplicates_removed: usize,
}

impl FactTable {
    /// Drops exact duplicate rows (keeping the first) and then checks key uniqueness.
    pub fn from_rows(rows: Vec<FactRow>) -> Result<Self, ValidationError> {
        let total = rows.len();
        let unique: IndexSet<FactRow> = rows.into_iter().collect();
        let duplicates_removed = total - unique.len();
        if duplicates_removed > 0 {
            debug!("Removed {duplicates_removed} exact duplicate fact rows");
        }

        let mut per_key: HashMap<FactKey, usize> = HashMap::with_capacity(unique.len());
        for row in &unique {
            *per_key.entry(row.key).or_insert(0) += 1;
        }
        let mut duplicates: Vec<(FactKey, usize)> =
            per_key.into_iter().filter(|(_, n)| *n > 1).collect();
        if !duplicates.is_empty() {
            duplicates.sort();
            return Err(ValidationError::DuplicateKeys { duplicates });
        }

        Ok(Self {
            rows: unique.into_iter().collect(),
            duplicates_removed,
        })
    }

    pub fn rows(&self) -> &[FactRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn duplicates_removed(&self) -> usize {
        self.duplicates_removed
    }

    pub fn max_date_id(&self) -> Option<DateId> {
        self.rows.iter().map(|r| r.key.as_of_date_id).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AgeBucketId, DistrictId, GenderId};

    fn row(district: u32, bucket: u32, gender: u32, date: u32, count: u64) -> FactRow {
        FactRow {
            key: FactKey {
                district_id: DistrictId(district),
                age_bucket_id: AgeBucketId(bucket),
                gender_id: GenderId(gender),
                family_status_id: None,
                as_of_date_id: DateId(date),
            },
            count,
        }
    }

    #[test]
    fn test_exact_duplicates_are_removed() {
        let table = FactTable::from_rows(vec![
            row(0, 0, 0, 0, 5),
            row(1, 0, 0, 0, 2),
            row(0, 0, 0, 0, 5),
        ])
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.duplicates_removed(), 1);
        assert_eq!(table.rows()[0], row(0, 0, 0, 0, 5));
        assert_eq!(table.rows()[1], row(1, 0, 0, 0, 2));
    }

    #[test]
    fn test_each_key_appears_once() {
        let table = FactTable::from_rows(vec![
            row(0, 0, 0, 0, 5),
            row(0, 1, 0, 0, 5),
            row(0, 0, 1, 0, 5),
            row(0, 0, 0, 1, 5),
        ])
        .unwrap();
        let mut per_key: HashMap<FactKey, usize> = HashMap::new();
        for r in table.rows() {
            *per_key.entry(r.key).or_insert(0) += 1;
        }
        assert!(per_key.values().all(|&n| n == 1));
        assert_eq!(table.max_date_id(), Some(DateId(1)));
    }

    #[test]
    fn test_conflicting_counts_are_reported() {
        let err = FactTable::from_rows(vec![
            row(3, 1, 0, 2, 5),
            row(3, 1, 0, 2, 6),
            row(0, 0, 0, 0, 1),
            row(3, 1, 0, 2, 7),
        ])
        .unwrap_err();
        let ValidationError::DuplicateKeys { duplicates } = &err;
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].0, row(3, 1, 0, 2, 0).key);
        assert_eq!(duplicates[0].1, 3);
        let msg = err.to_string();
        assert!(msg.contains("district_id=3"), "{msg}");
        assert!(msg.contains("x3"), "{msg}");
    }

    #[test]
    fn test_empty_table() {
        let table = FactTable::from_rows(Vec::new()).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.max_date_id(), None);
    }
}
