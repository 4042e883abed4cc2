//! Read-only job configuration.
//!
//! Everything here is built once when the job starts and then only ever borrowed by the map and
//! reduce functions.
use crate::{age::OpenInterval, ArcStr};
use chrono::{
    format::{Item, StrftimeItems},
    DateTime, NaiveDateTime, TimeZone, Utc,
};
use once_cell::sync::Lazy;
use qu::ick_use::*;
use serde::Deserialize;
use std::{fs, path::Path};

/// The token that starts the header line of the patients extract.
pub const HEADER_TOKEN: &str = "ROW_ID";

/// Format of the `DOB` and `DOD` columns (`yyyy-MM-dd HH:mm:ss`, always UTC).
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// All samples are currently aggregated under this key.
pub const AGE_GROUP_KEY: &str = "age";

/// Label written in front of the mean in the output.
pub const RESULT_LABEL: &str = "Average Age";

/// Used in place of the date of death for patients still alive at the end of the extract.
pub static REFERENCE_INSTANT: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(2008, 1, 1, 0, 0, 0).unwrap());

/// The built-in configuration.
pub static DEFAULT_CONFIG: Lazy<JobConfig> = Lazy::new(JobConfig::default);

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Lines equal to or starting with this are headers.
    pub header_token: ArcStr,
    /// A chrono format string.
    pub date_format: ArcStr,
    /// Substituted when the date of death is empty.
    pub reference_instant: DateTime<Utc>,
    /// Key attached to every emitted sample.
    pub group_key: ArcStr,
    /// Key attached to the aggregated result.
    pub result_label: ArcStr,
    /// Ages (in years) outside this interval are not plausible and are dropped.
    pub plausible_years: OpenInterval<f64>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            header_token: HEADER_TOKEN.into(),
            date_format: DATE_FORMAT.into(),
            reference_instant: *REFERENCE_INSTANT,
            group_key: AGE_GROUP_KEY.into(),
            result_label: RESULT_LABEL.into(),
            plausible_years: crate::age::PLAUSIBLE_YEARS,
        }
    }
}

impl JobConfig {
    /// Load a config from a toml file. Missing keys take their default value.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<JobConfig> {
            let raw = fs::read_to_string(path)?;
            let config: JobConfig = toml::from_str(&raw)?;
            config.validate()?;
            Ok(config)
        }

        let path = path.as_ref();
        inner(path).with_context(|| format!("loading job config from \"{}\"", path.display()))
    }

    /// Check the values that serde can't check for us.
    pub fn validate(&self) -> Result {
        ensure!(
            !self.header_token.is_empty(),
            "the header token must not be empty"
        );
        ensure!(
            self.plausible_years.lower() < self.plausible_years.upper(),
            "plausible age interval must go from low to high, found {}",
            self.plausible_years
        );
        ensure!(
            !StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error)),
            "invalid date format \"{}\"",
            self.date_format
        );
        // Round trip the reference instant to make sure the format can actually read dates.
        let written = self
            .reference_instant
            .naive_utc()
            .format(&self.date_format)
            .to_string();
        NaiveDateTime::parse_from_str(&written, &self.date_format).with_context(|| {
            format!(
                "date format \"{}\" cannot parse the dates it writes",
                self.date_format
            )
        })?;
        Ok(())
    }
}
