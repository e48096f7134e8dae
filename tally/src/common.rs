//! Common types and constants used throughout the project.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

// ============================================================================
// Raw column names
// ============================================================================
// The registry extracts changed their headers over the years. These are the
// only names the schema adapter recognizes.

/// District name (older and newer extracts).
pub const COL_DISTRICT_NAME: &str = "SENIUNIJA";
/// Numeric district code (used by some extracts instead of the name).
pub const COL_DISTRICT_CODE: &str = "SENIUNNR";
/// Explicit age in years.
pub const COL_AGE: &str = "AMZIUS";
/// Birth year; age is derived against the observation year.
pub const COL_BIRTH_YEAR: &str = "GIMIMO_METAI";
pub const COL_GENDER: &str = "LYTIS";
pub const COL_FAMILY_STATUS: &str = "SEIMOS_PADETIS";

// ============================================================================
// Index NewTypes
// ============================================================================
/// Surrogate id of a normalized district name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DistrictId(pub u32);

/// Surrogate id of an age bucket label.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AgeBucketId(pub u32);

/// Surrogate id of a normalized gender code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GenderId(pub u32);

/// Surrogate id of a family status code. Only present when family status is tracked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FamilyStatusId(pub u32);

/// Position of a month in the calendar dimension.
/// Ids increase with chronological order, so comparisons on ids are comparisons on dates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DateId(pub u32);

/// Sequential row identifier of the published test set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RowId(pub u32);

// ============================================================================
// YearMonth
// ============================================================================

/// A calendar month, the grain of every as-of date in the pipeline.
///
/// Stored as the first day of the month so that chrono's month arithmetic
/// can be used directly. Renders and parses as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth(NaiveDate);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid year-month '{0}', expected YYYY-MM")]
pub struct ParseYearMonthError(pub String);

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Self)
    }

    /// The month containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        // Day 1 of an existing month always exists.
        Self(date.with_day(1).unwrap_or(date))
    }

    /// Parses the compact `YYYYMM` token embedded in supplementary extract names.
    pub fn from_compact(token: &str) -> Option<Self> {
        if token.len() != 6 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year: i32 = token[..4].parse().ok()?;
        let month: u32 = token[4..].parse().ok()?;
        Self::new(year, month)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// The following month, or `None` past chrono's representable range.
    pub fn succ(&self) -> Option<Self> {
        self.0.checked_add_months(Months::new(1)).map(Self)
    }

    /// Number of whole months from `self` to `later` (negative if `later` is earlier).
    pub fn months_until(&self, later: &YearMonth) -> i64 {
        (later.year() as i64 - self.year() as i64) * 12 + later.month() as i64 - self.month() as i64
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = ParseYearMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseYearMonthError(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(err)?;
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        Self::new(year, month).ok_or_else(err)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Aggregated rows
// ============================================================================

/// Count of residents sharing one (age bucket, district, gender, [family status])
/// key at one as-of month. Produced by [`crate::aggregate::aggregate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedCount {
    pub age_bucket: String,
    pub district: String,
    pub gender: String,
    /// `None` unless the pipeline tracks family status.
    pub family_status: Option<String>,
    pub as_of: YearMonth,
    pub count: u64,
}

/// The dimension part of a fact row. At most one fact row may exist per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactKey {
    pub district_id: DistrictId,
    pub age_bucket_id: AgeBucketId,
    pub gender_id: GenderId,
    pub family_status_id: Option<FamilyStatusId>,
    pub as_of_date_id: DateId,
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(district_id={}, age_bin_id={}, gender_id={}",
            self.district_id.0, self.age_bucket_id.0, self.gender_id.0
        )?;
        if let Some(fs) = self.family_status_id {
            write!(f, ", family_status_id={}", fs.0)?;
        }
        write!(f, ", as_of_date_id={})", self.as_of_date_id.0)
    }
}

/// One dictionary-encoded count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactRow {
    pub key: FactKey,
    pub count: u64,
}
