//! Dictionary encoding of the aggregated counts.
//!
//! Every categorical dimension (district, age bucket, gender, and family status
//! when tracked) is factorized into dense surrogate ids `0..k-1` in order of first
//! appearance. As-of months are encoded against a [`Calendar`] that spans the
//! observed range without gaps, so month ids are both dense and chronological.

use std::borrow::Borrow;
use std::hash::Hash;

use indexmap::IndexSet;
use thiserror::Error;
use tracing::debug;

use crate::common::{
    AgeBucketId, AggregatedCount, DateId, DistrictId, FactKey, FactRow, FamilyStatusId, GenderId,
    YearMonth,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("no aggregated rows to encode")]
    Empty,

    #[error("as-of month {month} is outside the calendar {first}..={last}")]
    DateOutsideCalendar {
        month: YearMonth,
        first: YearMonth,
        last: YearMonth,
    },

    #[error("aggregated rows disagree on whether family status is tracked")]
    InconsistentFamilyStatus,
}

// ============================================================================
// Dictionary
// ============================================================================

/// Bijection between natural values and dense `u32` ids, assigned in order of
/// first appearance.
#[derive(Debug, Clone)]
pub struct Dictionary<T: Hash + Eq> {
    values: IndexSet<T>,
}

impl<T: Hash + Eq> Default for Dictionary<T> {
    fn default() -> Self {
        Self {
            values: IndexSet::new(),
        }
    }
}

impl<T: Hash + Eq> Dictionary<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `value`, assigning the next free id if it is new.
    pub fn encode<Q>(&mut self, value: &Q) -> u32
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = T> + ?Sized,
    {
        if let Some(idx) = self.values.get_index_of(value) {
            return idx as u32;
        }
        let (idx, _) = self.values.insert_full(value.to_owned());
        idx as u32
    }

    pub fn id_of<Q>(&self, value: &Q) -> Option<u32>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.values.get_index_of(value).map(|idx| idx as u32)
    }

    pub fn decode(&self, id: u32) -> Option<&T> {
        self.values.get_index(id as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(id, value)` pairs in id order. This is the decoder table.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.values.iter().enumerate().map(|(i, v)| (i as u32, v))
    }
}

// ============================================================================
// Calendar
// ============================================================================

/// Every month from `first` to `last` inclusive, with ids in chronological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    months: Vec<YearMonth>,
}

impl Calendar {
    /// Builds the gap-filled calendar. Empty if `last < first`.
    pub fn spanning(first: YearMonth, last: YearMonth) -> Self {
        let mut months = Vec::new();
        let mut current = Some(first);
        while let Some(month) = current {
            if month > last {
                break;
            }
            months.push(month);
            current = month.succ();
        }
        Self { months }
    }

    pub fn id_of(&self, month: YearMonth) -> Option<DateId> {
        let first = self.months.first()?;
        let offset = first.months_until(&month);
        if offset < 0 || offset as usize >= self.months.len() {
            return None;
        }
        Some(DateId(offset as u32))
    }

    pub fn month(&self, id: DateId) -> Option<YearMonth> {
        self.months.get(id.0 as usize).copied()
    }

    pub fn first(&self) -> Option<YearMonth> {
        self.months.first().copied()
    }

    pub fn last(&self) -> Option<YearMonth> {
        self.months.last().copied()
    }

    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateId, YearMonth)> + '_ {
        self.months
            .iter()
            .enumerate()
            .map(|(i, m)| (DateId(i as u32), *m))
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Every decoder needed to read encoded fact rows back.
#[derive(Debug, Clone)]
pub struct Decoders {
    pub districts: Dictionary<String>,
    pub age_buckets: Dictionary<String>,
    pub genders: Dictionary<String>,
    /// `Some` iff the aggregated rows carry family status.
    pub family_statuses: Option<Dictionary<String>>,
    pub calendar: Calendar,
}

#[derive(Debug, Clone)]
pub struct EncodedDataset {
    pub decoders: Decoders,
    /// One row per aggregated count, in input order. Not yet deduplicated.
    pub rows: Vec<FactRow>,
}

/// Factorizes the unioned aggregated counts of all snapshots.
pub fn encode(counts: &[AggregatedCount]) -> Result<EncodedDataset, EncodeError> {
    let (Some(first), Some(last)) = (
        counts.iter().map(|c| c.as_of).min(),
        counts.iter().map(|c| c.as_of).max(),
    ) else {
        return Err(EncodeError::Empty);
    };
    let calendar = Calendar::spanning(first, last);
    debug!("Calendar {}..={} ({} months)", first, last, calendar.len());

    let tracks_family_status = counts[0].family_status.is_some();
    let mut districts: Dictionary<String> = Dictionary::new();
    let mut age_buckets: Dictionary<String> = Dictionary::new();
    let mut genders: Dictionary<String> = Dictionary::new();
    let mut family_statuses: Option<Dictionary<String>> =
        tracks_family_status.then(Dictionary::new);
    let mut rows = Vec::with_capacity(counts.len());

    for count in counts {
        let family_status_id = match (&mut family_statuses, &count.family_status) {
            (Some(dict), Some(value)) => Some(FamilyStatusId(dict.encode(value.as_str()))),
            (None, None) => None,
            _ => return Err(EncodeError::InconsistentFamilyStatus),
        };
        let as_of_date_id = calendar.id_of(count.as_of).ok_or(EncodeError::DateOutsideCalendar {
            month: count.as_of,
            first,
            last,
        })?;

        rows.push(FactRow {
            key: FactKey {
                district_id: DistrictId(districts.encode(count.district.as_str())),
                age_bucket_id: AgeBucketId(age_buckets.encode(count.age_bucket.as_str())),
                gender_id: GenderId(genders.encode(count.gender.as_str())),
                family_status_id,
                as_of_date_id,
            },
            count: count.count,
        });
    }

    Ok(EncodedDataset {
        decoders: Decoders {
            districts,
            age_buckets,
            genders,
            family_statuses,
            calendar,
        },
        rows,
    })
}
