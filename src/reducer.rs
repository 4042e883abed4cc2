//! The reduce step.
//!
//! The mean is carried as a `(sum, count)` pair rather than a running mean so that partial results
//! can be merged in any order and any grouping. Only the last bits of the sum depend on the order
//! values arrive in.
use crate::{config::JobConfig, ArcStr};
use std::{fmt, iter, ops};

/// Running sum and count.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct MeanAccumulator {
    sum: f64,
    count: u64,
}

impl MeanAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Combine with a partial result computed elsewhere.
    pub fn merge(&mut self, other: Self) {
        self.sum += other.sum;
        self.count += other.count;
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `None` if nothing was seen, so we never divide by zero.
    pub fn finish(self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

impl Extend<f64> for MeanAccumulator {
    fn extend<T: IntoIterator<Item = f64>>(&mut self, iter: T) {
        for value in iter {
            self.update(value);
        }
    }
}

impl iter::FromIterator<f64> for MeanAccumulator {
    fn from_iter<T: IntoIterator<Item = f64>>(iter: T) -> Self {
        let mut acc = Self::new();
        acc.extend(iter);
        acc
    }
}

impl ops::Add for MeanAccumulator {
    type Output = Self;
    fn add(mut self, other: Self) -> Self {
        self.merge(other);
        self
    }
}

impl iter::Sum for MeanAccumulator {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::new(), ops::Add::add)
    }
}

/// The final record for one group.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub label: ArcStr,
    pub mean_years: f64,
}

/// Formats as one line of job output: label, tab, mean.
impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}\t{}", self.label, self.mean_years)
    }
}

/// The reduce function. Called once per group key with every value emitted for that key.
///
/// There is currently a single group, so the key is not part of the output.
pub fn reduce(
    group_key: &str,
    values: impl IntoIterator<Item = f64>,
    config: &JobConfig,
) -> Option<AggregateResult> {
    let whole: MeanAccumulator = values.into_iter().collect();
    reduce_partials(group_key, iter::once(whole), config)
}

/// As [`reduce`], but the values for the key arrive already summed in parts (one per input
/// partition when the map side combines).
pub fn reduce_partials(
    _group_key: &str,
    partials: impl IntoIterator<Item = MeanAccumulator>,
    config: &JobConfig,
) -> Option<AggregateResult> {
    let mean_years = partials.into_iter().sum::<MeanAccumulator>().finish()?;
    Some(AggregateResult {
        label: config.result_label.clone(),
        mean_years,
    })
}
