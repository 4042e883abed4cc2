use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the mean Julian year, in days.
pub const DAYS_PER_YEAR: f64 = 365.25;

const MILLIS_PER_DAY: f64 = 1000. * 60. * 60. * 24.;

/// Anything outside this range is a placeholder or corrupt date rather than a real age.
pub const PLAUSIBLE_YEARS: OpenInterval<f64> = OpenInterval {
    lower: 0.,
    upper: 120.,
};

/// The time between `from` and `to` in years, without rounding.
///
/// Negative when `to` is before `from`. This never fails: deciding whether the answer makes sense
/// is up to the caller.
pub fn derive(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let millis = (to - from).num_milliseconds() as f64;
    millis / MILLIS_PER_DAY / DAYS_PER_YEAR
}

/// Interval where both bounds are exclusive.
///
/// Only built from config, where [`JobConfig::validate`](crate::JobConfig::validate) checks the
/// bounds are in order.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterval<T> {
    lower: T,
    upper: T,
}

impl<T> OpenInterval<T>
where
    T: PartialOrd,
{
    /// `false` for anything that doesn't compare, e.g. NaN.
    pub fn contains(&self, val: &T) -> bool {
        val > &self.lower && val < &self.upper
    }
}

impl<T: Copy> OpenInterval<T> {
    pub fn lower(&self) -> T {
        self.lower
    }

    pub fn upper(&self) -> T {
        self.upper
    }
}

impl<T> fmt::Display for OpenInterval<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.lower, self.upper)
    }
}
