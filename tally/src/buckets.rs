//! Age bucketing.
//!
//! Buckets are defined by an ascending list of lower bounds `B = [b0, b1, ..., bk]`.
//! Bucket `i < k` covers the half-open interval `(B[i], B[i+1]]`; bucket `k` is the
//! open-ended terminal bucket `"{bk}+"`. With the default bounds
//! `[-1, 5, 10, 18, 35, 65]` the labels are:
//!
//! | index | interval   | label   |
//! |-------|------------|---------|
//! | 0     | `(-1, 5]`  | `0-5`   |
//! | 1     | `(5, 10]`  | `5-10`  |
//! | 2     | `(10, 18]` | `10-18` |
//! | 3     | `(18, 35]` | `18-35` |
//! | 4     | `(35, 65]` | `35-65` |
//! | 5     | `> 65`     | `65+`   |
//!
//! A missing age is assigned to the terminal bucket. So is an age at or below
//! `b0`, which with the default bounds only happens for negative ages produced
//! by birth years later than the observation year.

use thiserror::Error;

/// Default reporting age bands.
pub const DEFAULT_AGE_BOUNDS: [i64; 6] = [-1, 5, 10, 18, 35, 65];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BucketError {
    #[error("at least two age bounds are required, got {0}")]
    TooFewBounds(usize),

    #[error("age bounds must be strictly ascending, but bound {index} ({value}) <= {previous}")]
    NotAscending { index: usize, value: i64, previous: i64 },
}

/// A validated set of age buckets with precomputed labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeBuckets {
    bounds: Vec<i64>,
    /// `bounds.len() - 1` interval labels followed by the terminal label.
    labels: Vec<String>,
}

impl AgeBuckets {
    pub fn new(bounds: Vec<i64>) -> Result<Self, BucketError> {
        if bounds.len() < 2 {
            return Err(BucketError::TooFewBounds(bounds.len()));
        }
        for (index, pair) in bounds.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(BucketError::NotAscending {
                    index: index + 1,
                    value: pair[1],
                    previous: pair[0],
                });
            }
        }

        let mut labels: Vec<String> = bounds
            .windows(2)
            .map(|pair| format!("{}-{}", display_lower(pair[0]), pair[1]))
            .collect();
        labels.push(format!("{}+", bounds[bounds.len() - 1]));

        Ok(Self { bounds, labels })
    }

    pub fn bounds(&self) -> &[i64] {
        &self.bounds
    }

    /// Number of buckets, including the terminal one.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Index of the open-ended terminal bucket.
    pub fn terminal(&self) -> usize {
        self.labels.len() - 1
    }

    /// Index of the bucket containing `age`.
    pub fn assign(&self, age: Option<i64>) -> usize {
        let Some(age) = age else {
            return self.terminal();
        };
        let first = self.bounds[0];
        let last = self.bounds[self.bounds.len() - 1];
        if age <= first || age > last {
            return self.terminal();
        }
        // Count of bounds strictly below `age`; at least 1 because age > first.
        self.bounds.partition_point(|&b| b < age) - 1
    }

    pub fn label(&self, index: usize) -> &str {
        &self.labels[index]
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn assign_label(&self, age: Option<i64>) -> &str {
        self.label(self.assign(age))
    }
}

impl Default for AgeBuckets {
    fn default() -> Self {
        Self::new(DEFAULT_AGE_BOUNDS.to_vec()).expect("default age bounds are valid")
    }
}

/// The conceptual lower edge `-1` means "from 0 inclusive".
fn display_lower(bound: i64) -> i64 {
    if bound == -1 { 0 } else { bound }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels() {
        let buckets = AgeBuckets::default();
        assert_eq!(
            buckets.labels(),
            &["0-5", "5-10", "10-18", "18-35", "35-65", "65+"]
        );
        assert_eq!(buckets.len(), 6);
        assert_eq!(buckets.terminal(), 5);
    }

    #[test]
    fn test_documented_examples() {
        let buckets = AgeBuckets::default();
        assert_eq!(buckets.assign_label(Some(0)), "0-5");
        assert_eq!(buckets.assign_label(Some(70)), "65+");
        assert_eq!(buckets.assign_label(None), "65+");
    }

    #[test]
    fn test_interval_edges_are_upper_inclusive() {
        let buckets = AgeBuckets::default();
        assert_eq!(buckets.assign_label(Some(5)), "0-5");
        assert_eq!(buckets.assign_label(Some(6)), "5-10");
        assert_eq!(buckets.assign_label(Some(18)), "10-18");
        assert_eq!(buckets.assign_label(Some(19)), "18-35");
        assert_eq!(buckets.assign_label(Some(65)), "35-65");
        assert_eq!(buckets.assign_label(Some(66)), "65+");
    }

    #[test]
    fn test_every_non_negative_age_has_exactly_one_bucket() {
        let buckets = AgeBuckets::default();
        let bounds = buckets.bounds();
        for age in 0..=130i64 {
            let idx = buckets.assign(Some(age));
            assert!(idx < buckets.len());
            // Exactly one interval (or the terminal bucket) contains the age.
            let containing: Vec<usize> = (0..bounds.len() - 1)
                .filter(|&i| age > bounds[i] && age <= bounds[i + 1])
                .collect();
            match containing.as_slice() {
                [] => assert_eq!(idx, buckets.terminal(), "age {age}"),
                [i] => assert_eq!(idx, *i, "age {age}"),
                _ => panic!("age {age} falls into overlapping intervals"),
            }
        }
    }

    #[test]
    fn test_negative_age_goes_to_terminal() {
        let buckets = AgeBuckets::default();
        assert_eq!(buckets.assign(Some(-1)), buckets.terminal());
        assert_eq!(buckets.assign(Some(-3)), buckets.terminal());
    }

    #[test]
    fn test_custom_bounds_without_sentinel() {
        let buckets = AgeBuckets::new(vec![0, 14, 64]).unwrap();
        assert_eq!(buckets.labels(), &["0-14", "14-64", "64+"]);
        assert_eq!(buckets.assign_label(Some(1)), "0-14");
        assert_eq!(buckets.assign_label(Some(64)), "14-64");
    }

    #[test]
    fn test_invalid_bounds() {
        assert_eq!(AgeBuckets::new(vec![5]), Err(BucketError::TooFewBounds(1)));
        assert_eq!(
            AgeBuckets::new(vec![-1, 10, 10]),
            Err(BucketError::NotAscending {
                index: 2,
                value: 10,
                previous: 10
            })
        );
    }
}
