//! Grouping of normalized residents into counts.

use indexmap::IndexMap;

use crate::buckets::AgeBuckets;
use crate::common::{AggregatedCount, YearMonth};
use crate::schema::NormalizedRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    bucket: usize,
    district: String,
    gender: String,
    family_status: Option<String>,
}

/// Counts records per (age bucket, district, gender[, family status]) and tags
/// every group with `as_of`.
///
/// Groups are emitted in order of first appearance, so the output is a pure
/// function of the input sequence. Family status participates in the key only
/// when the records carry it.
pub fn aggregate<I>(records: I, as_of: YearMonth, buckets: &AgeBuckets) -> Vec<AggregatedCount>
where
    I: IntoIterator<Item = NormalizedRecord>,
{
    let mut groups: IndexMap<GroupKey, u64> = IndexMap::new();
    for record in records {
        let key = GroupKey {
            bucket: buckets.assign(record.age),
            district: record.district,
            gender: record.gender,
            family_status: record.family_status,
        };
        *groups.entry(key).or_insert(0) += 1;
    }

    groups
        .into_iter()
        .map(|(key, count)| AggregatedCount {
            age_bucket: buckets.label(key.bucket).to_string(),
            district: key.district,
            gender: key.gender,
            family_status: key.family_status,
            as_of,
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(district: &str, gender: &str, age: Option<i64>) -> NormalizedRecord {
        NormalizedRecord {
            district: district.to_string(),
            gender: gender.to_string(),
            age,
            family_status: None,
        }
    }

    fn jan_2020() -> YearMonth {
        YearMonth::new(2020, 1).unwrap()
    }

    #[test]
    fn test_identical_rows_collapse_to_one_count() {
        let rows = vec![
            record("old town", "f", Some(3)),
            record("old town", "f", Some(3)),
        ];
        let out = aggregate(rows, jan_2020(), &AgeBuckets::default());
        assert_eq!(
            out,
            vec![AggregatedCount {
                age_bucket: "0-5".to_string(),
                district: "old town".to_string(),
                gender: "f".to_string(),
                family_status: None,
                as_of: jan_2020(),
                count: 2,
            }]
        );
    }

    #[test]
    fn test_ages_in_same_bucket_share_a_group() {
        let rows = vec![
            record("verkių", "m", Some(20)),
            record("verkių", "m", Some(34)),
            record("verkių", "m", Some(36)),
            record("verkių", "m", None),
            record("verkių", "m", Some(90)),
        ];
        let out = aggregate(rows, jan_2020(), &AgeBuckets::default());
        let summary: Vec<(&str, u64)> = out
            .iter()
            .map(|c| (c.age_bucket.as_str(), c.count))
            .collect();
        assert_eq!(summary, vec![("18-35", 2), ("35-65", 1), ("65+", 2)]);
    }

    #[test]
    fn test_keys_are_unique_and_counts_positive() {
        let rows = vec![
            record("a", "m", Some(1)),
            record("b", "m", Some(1)),
            record("a", "v", Some(1)),
            record("a", "m", Some(2)),
            record("b", "m", Some(40)),
        ];
        let out = aggregate(rows, jan_2020(), &AgeBuckets::default());
        assert_eq!(out.len(), 4);
        assert_eq!(out.iter().map(|c| c.count).sum::<u64>(), 5);
        assert!(out.iter().all(|c| c.count > 0 && c.as_of == jan_2020()));
        let mut keys: Vec<_> = out
            .iter()
            .map(|c| (&c.age_bucket, &c.district, &c.gender))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), out.len());
    }

    #[test]
    fn test_family_status_splits_groups() {
        let mut married = record("a", "m", Some(40));
        married.family_status = Some("vedęs".to_string());
        let mut other = record("a", "m", Some(40));
        other.family_status = Some("Other".to_string());
        let out = aggregate(
            vec![married.clone(), other, married],
            jan_2020(),
            &AgeBuckets::default(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].family_status.as_deref(), Some("vedęs"));
        assert_eq!(out[0].count, 2);
        assert_eq!(out[1].count, 1);
    }

    #[test]
    fn test_empty_input() {
        let out = aggregate(Vec::new(), jan_2020(), &AgeBuckets::default());
        assert!(out.is_empty());
    }
}
