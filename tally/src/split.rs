//! Temporal train/test split and the evaluation solution file.
//!
//! The last `holdout_periods` months (counting from the maximum as-of id) are
//! held out. Test rows are published without their count; the counts go to a
//! separate solution table whose rows are randomly marked `Public` or
//! `Private`, deciding which rows a grader scores on the public leaderboard.

use std::fmt;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{FactKey, FactRow, RowId};
use crate::validate::FactTable;

pub const DEFAULT_HOLDOUT_PERIODS: u32 = 12;
pub const DEFAULT_PUBLIC_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct SplitConfig {
    /// Months before the last as-of id that still belong to the test set.
    pub holdout_periods: u32,
    /// Share of solution rows marked `Public`.
    pub public_fraction: f64,
    /// Seed for the Public/Private draw. `None` draws a fresh seed.
    pub seed: Option<u64>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            holdout_periods: DEFAULT_HOLDOUT_PERIODS,
            public_fraction: DEFAULT_PUBLIC_FRACTION,
            seed: None,
        }
    }
}

/// Evaluation visibility of one solution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Usage {
    Public,
    Private,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Usage::Public => f.write_str("Public"),
            Usage::Private => f.write_str("Private"),
        }
    }
}

/// A published test row: the features of a held-out fact row, without its count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestRow {
    pub id: RowId,
    pub key: FactKey,
}

/// A held-out row with its count and visibility flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolutionRow {
    pub id: RowId,
    pub key: FactKey,
    pub count: u64,
    pub usage: Usage,
}

#[derive(Debug, Clone)]
pub struct DatasetSplit {
    /// Rows with `as_of_date_id < cutoff` go to train. Signed: a table spanning
    /// fewer months than the holdout has a negative cutoff and an empty train set.
    pub cutoff: i64,
    /// The seed actually used for the Public/Private draw.
    pub seed: u64,
    pub train: Vec<FactRow>,
    pub test: Vec<TestRow>,
    pub solution: Vec<SolutionRow>,
}

impl DatasetSplit {
    pub fn public_rows(&self) -> usize {
        self.solution
            .iter()
            .filter(|r| r.usage == Usage::Public)
            .count()
    }
}

/// Splits the fact table at `max(as_of_date_id) - holdout_periods`.
pub fn split_dataset(table: &FactTable, config: &SplitConfig) -> DatasetSplit {
    let seed = config.seed.unwrap_or_else(|| rand::rng().random());
    let cutoff = table
        .max_date_id()
        .map(|max| max.0 as i64 - config.holdout_periods as i64)
        .unwrap_or(0);

    let mut train = Vec::new();
    let mut test = Vec::new();
    let mut solution = Vec::new();
    for row in table.rows() {
        if (row.key.as_of_date_id.0 as i64) < cutoff {
            train.push(*row);
            continue;
        }
        let id = RowId(test.len() as u32);
        test.push(TestRow { id, key: row.key });
        solution.push(SolutionRow {
            id,
            key: row.key,
            count: row.count,
            usage: Usage::Private,
        });
    }

    let num_public = public_count(solution.len(), config.public_fraction);
    let mut rng = SmallRng::seed_from_u64(seed);
    for idx in rand::seq::index::sample(&mut rng, solution.len(), num_public) {
        solution[idx].usage = Usage::Public;
    }
    debug!(
        "Split at cutoff {cutoff}: {} train, {} test ({num_public} public, seed {seed})",
        train.len(),
        test.len()
    );

    DatasetSplit {
        cutoff,
        seed,
        train,
        test,
        solution,
    }
}

fn public_count(rows: usize, fraction: f64) -> usize {
    ((rows as f64 * fraction.clamp(0.0, 1.0)).round() as usize).min(rows)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::common::{AgeBucketId, DateId, DistrictId, GenderId};

    fn table(months: u32, districts: u32) -> FactTable {
        let mut rows = Vec::new();
        for date in 0..months {
            for district in 0..districts {
                rows.push(FactRow {
                    key: FactKey {
                        district_id: DistrictId(district),
                        age_bucket_id: AgeBucketId(0),
                        gender_id: GenderId(0),
                        family_status_id: None,
                        as_of_date_id: DateId(date),
                    },
                    count: (date * 100 + district + 1) as u64,
                });
            }
        }
        FactTable::from_rows(rows).unwrap()
    }

    fn seeded(seed: u64) -> SplitConfig {
        SplitConfig {
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_partition_is_exhaustive_and_disjoint() {
        let t = table(30, 4);
        let split = split_dataset(&t, &seeded(7));
        // max id 29, cutoff 17
        assert_eq!(split.cutoff, 17);
        assert_eq!(split.train.len() + split.test.len(), t.len());
        assert!(split.train.iter().all(|r| r.key.as_of_date_id.0 < 17));
        assert!(split.test.iter().all(|r| r.key.as_of_date_id.0 >= 17));

        let train_keys: HashSet<FactKey> = split.train.iter().map(|r| r.key).collect();
        let test_keys: HashSet<FactKey> = split.test.iter().map(|r| r.key).collect();
        assert!(train_keys.is_disjoint(&test_keys));
        let all: HashSet<FactKey> = t.rows().iter().map(|r| r.key).collect();
        assert_eq!(
            train_keys.union(&test_keys).copied().collect::<HashSet<_>>(),
            all
        );
    }

    #[test]
    fn test_test_rows_are_reindexed_sequentially() {
        let split = split_dataset(&table(20, 3), &seeded(1));
        let ids: Vec<u32> = split.test.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, (0..split.test.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_test_plus_count_reconstructs_solution() {
        let t = table(16, 5);
        let split = split_dataset(&t, &seeded(3));
        assert_eq!(split.test.len(), split.solution.len());
        let counts: std::collections::HashMap<FactKey, u64> =
            t.rows().iter().map(|r| (r.key, r.count)).collect();
        for (test, sol) in split.test.iter().zip(&split.solution) {
            assert_eq!(test.id, sol.id);
            assert_eq!(test.key, sol.key);
            assert_eq!(counts[&test.key], sol.count);
        }
    }

    #[test]
    fn test_public_fraction_and_seed_reproducibility() {
        let t = table(20, 7);
        let a = split_dataset(&t, &seeded(42));
        let b = split_dataset(&t, &seeded(42));
        let n = a.solution.len();
        assert_eq!(a.public_rows(), (n as f64 * 0.5).round() as usize);
        let usages = |s: &DatasetSplit| s.solution.iter().map(|r| r.usage).collect::<Vec<_>>();
        assert_eq!(usages(&a), usages(&b));
        assert_eq!(a.seed, 42);
    }

    #[test]
    fn test_unseeded_split_reports_its_seed() {
        let t = table(20, 7);
        let a = split_dataset(&t, &SplitConfig::default());
        let replay = split_dataset(&t, &seeded(a.seed));
        let usages = |s: &DatasetSplit| s.solution.iter().map(|r| r.usage).collect::<Vec<_>>();
        assert_eq!(usages(&a), usages(&replay));
    }

    #[test]
    fn test_short_history_has_empty_train() {
        let split = split_dataset(&table(5, 2), &seeded(0));
        assert_eq!(split.cutoff, -8);
        assert!(split.train.is_empty());
        assert_eq!(split.test.len(), 10);
    }

    #[test]
    fn test_public_count_bounds() {
        assert_eq!(public_count(0, 0.5), 0);
        assert_eq!(public_count(4, 0.5), 2);
        assert_eq!(public_count(4, 2.0), 4);
        assert_eq!(public_count(4, -1.0), 0);
    }

    #[test]
    fn test_usage_display() {
        assert_eq!(Usage::Public.to_string(), "Public");
        assert_eq!(Usage::Private.to_string(), "Private");
    }
}
