//! The map step: one line in, at most one age sample out.
use crate::{
    age,
    config::JobConfig,
    record::{self, ParseError},
    ArcStr,
};

/// An age in years, tagged with the key it will be aggregated under.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeSample {
    pub group_key: ArcStr,
    pub years: f64,
}

/// What happened to a line in the map step.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Header,
    Malformed(ParseError),
    /// The derived age (in years) was outside the plausible range.
    Implausible(f64),
    Sample(AgeSample),
}

impl LineOutcome {
    pub fn into_sample(self) -> Option<AgeSample> {
        match self {
            LineOutcome::Sample(sample) => Some(sample),
            _ => None,
        }
    }
}

/// Work out what a line contributes, and if it contributes nothing, why.
pub fn classify(line: &str, config: &JobConfig) -> LineOutcome {
    if record::is_header(line, config) {
        return LineOutcome::Header;
    }
    let record = match record::parse(line, config) {
        Ok(record) => record,
        Err(e) => return LineOutcome::Malformed(e),
    };

    let years = age::derive(
        record.date_of_birth,
        record.end_of_follow_up(config.reference_instant),
    );
    if !config.plausible_years.contains(&years) {
        return LineOutcome::Implausible(years);
    }
    LineOutcome::Sample(AgeSample {
        group_key: config.group_key.clone(),
        years,
    })
}

/// The map function: emits no sample for headers, malformed rows and implausible ages, and
/// exactly one otherwise.
///
/// Pure, so running it again on the same line (e.g. a retried task) gives the same answer.
pub fn map(line: &str, config: &JobConfig) -> Option<AgeSample> {
    classify(line, config).into_sample()
}
