//! Mean patient age at death (or at the end of the extract) over a patients table.
//!
//! The calculation is a map/reduce job. [`mapper::map`] turns each line of the extract into at
//! most one age sample, independently of every other line, and [`reducer::reduce`] folds all the
//! samples for a key into a mean. Both are pure, so lines can be mapped in any order, on any
//! number of threads, and more than once. [`job`] wires them together on a single machine.
//!
//! Rows we can't use (the header, rows with missing columns, unreadable dates, ages outside
//! `(0, 120)`) are skipped without failing the job. They are tallied in [`JobCounters`].
pub mod age;
pub mod config;
pub mod job;
pub mod mapper;
pub mod record;
pub mod reducer;
mod util;

pub use anyhow::{Context, Error};
use std::sync::Arc;

pub use crate::{
    config::JobConfig,
    job::{JobCounters, JobReport},
    mapper::{map, AgeSample, LineOutcome},
    record::{parse, ParseError, PatientRecord},
    reducer::{reduce, AggregateResult, MeanAccumulator},
    util::{counters_table, header},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
