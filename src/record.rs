//! Parsing a single line of the patients extract.
//!
//! The extract is plain comma-separated text with positional columns:
//!
//! ```text
//! ROW_ID,SUBJECT_ID,GENDER,DOB,DOD[,...]
//! ```
//!
//! Only `DOB` (index 3) and `DOD` (index 4) are read. `DOD` is empty for patients who were alive
//! when the data was extracted. Quoting is not supported: the date columns never contain commas.
use crate::config::JobConfig;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fmt;

/// Column holding the date of birth.
pub const DOB_FIELD: usize = 3;
/// Column holding the date of death.
pub const DOD_FIELD: usize = 4;
/// A data line must have at least this many columns.
pub const MIN_FIELDS: usize = DOD_FIELD + 1;

/// The two dates we need from a row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PatientRecord {
    pub date_of_birth: DateTime<Utc>,
    /// `None` when the column was empty.
    pub date_of_death: Option<DateTime<Utc>>,
}

impl PatientRecord {
    /// The date of death, or `reference` if the patient has none.
    pub fn end_of_follow_up(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        self.date_of_death.unwrap_or(reference)
    }
}

/// Which of the date columns failed to parse.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DateField {
    Birth,
    Death,
}

impl fmt::Display for DateField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DateField::Birth => f.write_str("date of birth"),
            DateField::Death => f.write_str("date of death"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("expected at least {} fields, found {found}", MIN_FIELDS)]
    TooFewFields { found: usize },
    #[error("could not read {field} \"{value}\": {source}")]
    BadDate {
        field: DateField,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Is this the header line (or a repeat of it, as happens when files are concatenated)?
pub fn is_header(line: &str, config: &JobConfig) -> bool {
    line.starts_with(&*config.header_token)
}

/// Read the dates out of a line.
///
/// This does not check for the header: a header line will fail with `BadDate`.
pub fn parse(line: &str, config: &JobConfig) -> Result<PatientRecord, ParseError> {
    // `split` keeps trailing empty fields, so a row ending in an empty DOD still has 5 fields.
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < MIN_FIELDS {
        return Err(ParseError::TooFewFields {
            found: fields.len(),
        });
    }

    let date_of_birth = parse_date(fields[DOB_FIELD], DateField::Birth, config)?;
    let date_of_death = match fields[DOD_FIELD] {
        "" => None,
        raw => Some(parse_date(raw, DateField::Death, config)?),
    };
    Ok(PatientRecord {
        date_of_birth,
        date_of_death,
    })
}

fn parse_date(
    raw: &str,
    field: DateField,
    config: &JobConfig,
) -> Result<DateTime<Utc>, ParseError> {
    NaiveDateTime::parse_from_str(raw, &config.date_format)
        .map(|date| Utc.from_utc_datetime(&date))
        .map_err(|source| ParseError::BadDate {
            field,
            value: raw.to_owned(),
            source,
        })
}
