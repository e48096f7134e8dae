//! Raw registry batches and the historical column layouts they come in.
//!
//! Extracts from different years name their columns differently. A batch either
//! identifies the district by name (`SENIUNIJA`) or by numeric code (`SENIUNNR`),
//! and carries either an explicit age (`AMZIUS`) or a birth year (`GIMIMO_METAI`).
//! [`Layout::detect`] picks one variant of each and [`adapt`] projects the batch
//! onto [`NormalizedRecord`]s.

use thiserror::Error;
use tracing::debug;

use crate::common::{
    COL_AGE, COL_BIRTH_YEAR, COL_DISTRICT_CODE, COL_DISTRICT_NAME, COL_FAMILY_STATUS, COL_GENDER,
};
use crate::normalize::normalize_text;

/// Imputed family status for rows that do not state one.
pub const FAMILY_STATUS_OTHER: &str = "Other";

/// Largest magnitude accepted for an age or birth year cell. Larger values read as missing.
pub const MAX_WHOLE_NUMBER: i64 = 9_999;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("batch has a district column but neither GIMIMO_METAI nor AMZIUS")]
    MissingAgeColumn,

    #[error("batch is missing required column {0}")]
    MissingColumn(&'static str),
}

// ============================================================================
// Raw batch
// ============================================================================

/// A header row plus string rows, as read from one extract.
/// Empty (or whitespace-only) cells are nulls.
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawBatch {
    pub fn new(headers: Vec<String>) -> Self {
        let headers = headers
            .into_iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows[row]
            .get(col)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

// ============================================================================
// Layout detection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistrictColumn {
    /// `SENIUNIJA`: district name.
    Name(usize),
    /// `SENIUNNR`: numeric district code.
    Code(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeColumn {
    /// `GIMIMO_METAI`: age is observation year minus birth year.
    BirthYear(usize),
    /// `AMZIUS`: age as recorded.
    Explicit(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub district: DistrictColumn,
    pub age: AgeColumn,
    pub gender: usize,
    pub family_status: Option<usize>,
}

impl Layout {
    /// Returns `Ok(None)` when the batch has no district column at all. Such
    /// extracts exist and contribute nothing.
    pub fn detect(batch: &RawBatch) -> Result<Option<Self>, SchemaError> {
        let district = match (
            batch.column_index(COL_DISTRICT_NAME),
            batch.column_index(COL_DISTRICT_CODE),
        ) {
            (Some(i), _) => DistrictColumn::Name(i),
            (None, Some(i)) => DistrictColumn::Code(i),
            (None, None) => return Ok(None),
        };
        let age = match (
            batch.column_index(COL_BIRTH_YEAR),
            batch.column_index(COL_AGE),
        ) {
            (Some(i), _) => AgeColumn::BirthYear(i),
            (None, Some(i)) => AgeColumn::Explicit(i),
            (None, None) => return Err(SchemaError::MissingAgeColumn),
        };
        let gender = batch
            .column_index(COL_GENDER)
            .ok_or(SchemaError::MissingColumn(COL_GENDER))?;
        let family_status = batch.column_index(COL_FAMILY_STATUS);

        Ok(Some(Self {
            district,
            age,
            gender,
            family_status,
        }))
    }
}

// ============================================================================
// Projection
// ============================================================================

/// One resident with normalized categorical fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub district: String,
    pub gender: String,
    /// `None` when the age (or birth year) is missing or unparseable.
    pub age: Option<i64>,
    /// `Some` only when family status is tracked.
    pub family_status: Option<String>,
}

/// Row accounting for one projected batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub rows_read: usize,
    pub dropped_null_district: usize,
    pub dropped_null_gender: usize,
    pub missing_age: usize,
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub layout: Layout,
    pub records: Vec<NormalizedRecord>,
    pub stats: ProjectionStats,
}

/// Projects a raw batch onto normalized records.
///
/// `observation_year` is the year the extract describes; it turns birth years
/// into ages. Returns `Ok(None)` if the batch has no district column.
pub fn adapt(
    batch: &RawBatch,
    observation_year: i32,
    track_family_status: bool,
) -> Result<Option<Projection>, SchemaError> {
    let Some(layout) = Layout::detect(batch)? else {
        return Ok(None);
    };
    debug!("Detected layout {:?}", layout);

    let district_col = match layout.district {
        DistrictColumn::Name(i) | DistrictColumn::Code(i) => i,
    };

    let mut stats = ProjectionStats {
        rows_read: batch.num_rows(),
        ..Default::default()
    };
    let mut records = Vec::with_capacity(batch.num_rows());

    for row in 0..batch.num_rows() {
        let Some(district) = batch.cell(row, district_col) else {
            stats.dropped_null_district += 1;
            continue;
        };
        let Some(gender) = batch.cell(row, layout.gender) else {
            stats.dropped_null_gender += 1;
            continue;
        };

        let age = match layout.age {
            AgeColumn::BirthYear(col) => batch
                .cell(row, col)
                .and_then(parse_whole_number)
                .and_then(|birth_year| i64::from(observation_year).checked_sub(birth_year)),
            AgeColumn::Explicit(col) => batch.cell(row, col).and_then(parse_whole_number),
        };
        if age.is_none() {
            stats.missing_age += 1;
        }

        let family_status = track_family_status.then(|| {
            layout
                .family_status
                .and_then(|col| batch.cell(row, col))
                .map(normalize_text)
                .unwrap_or_else(|| FAMILY_STATUS_OTHER.to_string())
        });

        records.push(NormalizedRecord {
            district: normalize_text(district),
            gender: normalize_text(gender),
            age,
            family_status,
        });
    }

    Ok(Some(Projection {
        layout,
        records,
        stats,
    }))
}

/// Integers, or floats with the fraction truncated (`"1985.0"`), within
/// `±MAX_WHOLE_NUMBER`. Anything else is missing.
fn parse_whole_number(raw: &str) -> Option<i64> {
    let limit = MAX_WHOLE_NUMBER as f64;
    let value = match raw.parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            let v = raw.parse::<f64>().ok()?.trunc();
            if !(-limit..=limit).contains(&v) {
                return None;
            }
            v as i64
        }
    };
    (-MAX_WHOLE_NUMBER..=MAX_WHOLE_NUMBER)
        .contains(&value)
        .then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(headers: &[&str], rows: &[&[&str]]) -> RawBatch {
        let mut b = RawBatch::new(headers.iter().map(|s| s.to_string()).collect());
        for r in rows {
            b.push_row(r.iter().map(|s| s.to_string()).collect());
        }
        b
    }

    #[test]
    fn test_detect_named_birth_year_layout() {
        let b = batch(&["GIMIMO_METAI", "LYTIS", "SENIUNIJA"], &[]);
        let layout = Layout::detect(&b).unwrap().unwrap();
        assert_eq!(layout.district, DistrictColumn::Name(2));
        assert_eq!(layout.age, AgeColumn::BirthYear(0));
        assert_eq!(layout.gender, 1);
        assert_eq!(layout.family_status, None);
    }

    #[test]
    fn test_detect_coded_explicit_age_layout() {
        let b = batch(&["SENIUNNR", "AMZIUS", "LYTIS", "SEIMOS_PADETIS"], &[]);
        let layout = Layout::detect(&b).unwrap().unwrap();
        assert_eq!(layout.district, DistrictColumn::Code(0));
        assert_eq!(layout.age, AgeColumn::Explicit(1));
        assert_eq!(layout.family_status, Some(3));
    }

    #[test]
    fn test_name_and_birth_year_preferred() {
        let b = batch(&["SENIUNNR", "SENIUNIJA", "AMZIUS", "GIMIMO_METAI", "LYTIS"], &[]);
        let layout = Layout::detect(&b).unwrap().unwrap();
        assert_eq!(layout.district, DistrictColumn::Name(1));
        assert_eq!(layout.age, AgeColumn::BirthYear(3));
    }

    #[test]
    fn test_headers_are_cleaned() {
        let b = batch(&["\u{feff}SENIUNIJA", " LYTIS ", "AMZIUS"], &[]);
        assert_eq!(b.headers(), &["SENIUNIJA", "LYTIS", "AMZIUS"]);
        assert!(Layout::detect(&b).unwrap().is_some());
    }

    #[test]
    fn test_missing_district_is_not_applicable() {
        let b = batch(&["AMZIUS", "LYTIS"], &[&["3", "V"]]);
        assert!(adapt(&b, 2020, false).unwrap().is_none());
    }

    #[test]
    fn test_missing_age_columns_is_an_error() {
        let b = batch(&["SENIUNIJA", "LYTIS"], &[&["Antakalnio", "V"]]);
        assert_eq!(
            adapt(&b, 2020, false).unwrap_err(),
            SchemaError::MissingAgeColumn
        );
    }

    #[test]
    fn test_missing_gender_column_is_an_error() {
        let b = batch(&["SENIUNIJA", "AMZIUS"], &[&["Antakalnio", "3"]]);
        assert_eq!(
            adapt(&b, 2020, false).unwrap_err(),
            SchemaError::MissingColumn(COL_GENDER)
        );
    }

    #[test]
    fn test_age_from_birth_year() {
        let b = batch(
            &["SENIUNIJA", "LYTIS", "GIMIMO_METAI"],
            &[&["Old Town", "F", "2017"], &["Old Town", "F", "1950.0"], &["Old Town", "F", ""]],
        );
        let p = adapt(&b, 2020, false).unwrap().unwrap();
        let ages: Vec<Option<i64>> = p.records.iter().map(|r| r.age).collect();
        assert_eq!(ages, vec![Some(3), Some(70), None]);
        assert_eq!(p.stats.missing_age, 1);
    }

    #[test]
    fn test_extreme_birth_years_read_as_missing() {
        let b = batch(
            &["SENIUNIJA", "LYTIS", "GIMIMO_METAI"],
            &[
                &["Verkių", "M", "-1e30"],
                &["Verkių", "M", "-9223372036854775808"],
                &["Verkių", "M", "9223372036854775807"],
                &["Verkių", "M", "inf"],
                &["Verkių", "M", "NaN"],
                &["Verkių", "M", "1e5"],
                &["Verkių", "M", "1990"],
            ],
        );
        let p = adapt(&b, 2020, false).unwrap().unwrap();
        let ages: Vec<Option<i64>> = p.records.iter().map(|r| r.age).collect();
        assert_eq!(ages, vec![None, None, None, None, None, None, Some(30)]);
        assert_eq!(p.stats.missing_age, 6);
    }

    #[test]
    fn test_parse_whole_number_bounds() {
        assert_eq!(parse_whole_number("1985.7"), Some(1985));
        assert_eq!(parse_whole_number("-3"), Some(-3));
        assert_eq!(parse_whole_number("9999"), Some(MAX_WHOLE_NUMBER));
        assert_eq!(parse_whole_number("-9999.9"), Some(-MAX_WHOLE_NUMBER));
        assert_eq!(parse_whole_number("10000"), None);
        assert_eq!(parse_whole_number("-1e30"), None);
        assert_eq!(parse_whole_number("abc"), None);
    }

    #[test]
    fn test_explicit_age_and_normalization() {
        let b = batch(
            &["SENIUNIJA", "LYTIS", "AMZIUS"],
            &[&["  OLD   town ", " F", "41"], &["Old Town", "f", "abc"]],
        );
        let p = adapt(&b, 1999, false).unwrap().unwrap();
        assert_eq!(p.records[0].district, "old town");
        assert_eq!(p.records[0].gender, "f");
        assert_eq!(p.records[0].age, Some(41));
        assert_eq!(p.records[1].district, "old town");
        assert_eq!(p.records[1].age, None);
        assert!(p.records.iter().all(|r| r.family_status.is_none()));
    }

    #[test]
    fn test_null_district_and_gender_rows_are_dropped() {
        let b = batch(
            &["SENIUNIJA", "LYTIS", "AMZIUS"],
            &[&["", "V", "3"], &["Naujininkų", "", "3"], &["Naujininkų", "V", "3"]],
        );
        let p = adapt(&b, 2020, false).unwrap().unwrap();
        assert_eq!(p.records.len(), 1);
        assert_eq!(
            p.stats,
            ProjectionStats {
                rows_read: 3,
                dropped_null_district: 1,
                dropped_null_gender: 1,
                missing_age: 0,
            }
        );
    }

    #[test]
    fn test_short_rows_read_as_nulls() {
        let b = batch(&["SENIUNIJA", "LYTIS", "AMZIUS"], &[&["Verkių", "M"]]);
        let p = adapt(&b, 2020, false).unwrap().unwrap();
        assert_eq!(p.records.len(), 1);
        assert_eq!(p.records[0].age, None);
    }

    #[test]
    fn test_family_status_imputed_when_tracked() {
        let b = batch(
            &["SENIUNIJA", "LYTIS", "AMZIUS", "SEIMOS_PADETIS"],
            &[&["Verkių", "M", "30", "Vedęs"], &["Verkių", "M", "30", ""]],
        );
        let p = adapt(&b, 2020, true).unwrap().unwrap();
        assert_eq!(p.records[0].family_status.as_deref(), Some("vedęs"));
        assert_eq!(p.records[1].family_status.as_deref(), Some(FAMILY_STATUS_OTHER));

        // Tracked but the column is absent: everything is "Other".
        let b = batch(&["SENIUNIJA", "LYTIS", "AMZIUS"], &[&["Verkių", "M", "30"]]);
        let p = adapt(&b, 2020, true).unwrap().unwrap();
        assert_eq!(p.records[0].family_status.as_deref(), Some(FAMILY_STATUS_OTHER));
    }
}
