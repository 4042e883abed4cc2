//! Runs the whole job on one machine.
//!
//! This plays the part of the cluster: it finds the input partitions, maps every line of every
//! partition in parallel, groups the samples by key, reduces each group and commits the output
//! directory. The map and reduce functions themselves know nothing about any of this.
//!
//! The output directory follows the layout Hadoop's text output uses, so downstream tooling can
//! read either:
//!
//! ```text
//! <output>/part-r-00000   the result, `Average Age\t<mean>`, or empty
//! <output>/_SUCCESS       written last, empty
//! ```
use crate::{
    config::JobConfig,
    mapper::{self, AgeSample, LineOutcome},
    record::ParseError,
    reducer::{self, AggregateResult, MeanAccumulator},
    util, ArcStr,
};
use itertools::Itertools;
use qu::ick_use::*;
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    fs,
    io::{self, prelude::*},
    ops,
    path::{Path, PathBuf},
};

/// File holding the reduce output.
pub const RESULT_FILE: &str = "part-r-00000";
/// Empty file marking a complete output directory.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// UTF-8 byte order mark, as written by some spreadsheet exports.
const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Tallies for one run. Partial counts from different partitions are combined with `+`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct JobCounters {
    pub partitions: u64,
    pub input_records: u64,
    pub header_records: u64,
    pub too_few_fields: u64,
    pub bad_dates: u64,
    pub implausible_ages: u64,
    pub map_output_records: u64,
    pub reduce_input_groups: u64,
    pub reduce_output_records: u64,
}

impl JobCounters {
    fn count(&mut self, outcome: &LineOutcome) {
        self.input_records += 1;
        match outcome {
            LineOutcome::Header => self.header_records += 1,
            LineOutcome::Malformed(ParseError::TooFewFields { .. }) => self.too_few_fields += 1,
            LineOutcome::Malformed(ParseError::BadDate { .. }) => self.bad_dates += 1,
            LineOutcome::Implausible(_) => self.implausible_ages += 1,
            LineOutcome::Sample(_) => self.map_output_records += 1,
        }
    }

    /// Data lines that did not produce a sample.
    pub fn skipped_records(&self) -> u64 {
        self.too_few_fields + self.bad_dates + self.implausible_ages
    }

    /// (label, count, counts input records) in a fixed order, for reporting. Only rows where the
    /// last item is `true` make sense as a share of `input_records`.
    pub fn rows(&self) -> [(&'static str, u64, bool); 9] {
        [
            ("input partitions", self.partitions, false),
            ("input records", self.input_records, true),
            ("header records", self.header_records, true),
            ("skipped: too few fields", self.too_few_fields, true),
            ("skipped: bad date", self.bad_dates, true),
            ("skipped: implausible age", self.implausible_ages, true),
            ("map output records", self.map_output_records, true),
            ("reduce input groups", self.reduce_input_groups, false),
            ("reduce output records", self.reduce_output_records, false),
        ]
    }
}

impl ops::Add for JobCounters {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            partitions: self.partitions + other.partitions,
            input_records: self.input_records + other.input_records,
            header_records: self.header_records + other.header_records,
            too_few_fields: self.too_few_fields + other.too_few_fields,
            bad_dates: self.bad_dates + other.bad_dates,
            implausible_ages: self.implausible_ages + other.implausible_ages,
            map_output_records: self.map_output_records + other.map_output_records,
            reduce_input_groups: self.reduce_input_groups + other.reduce_input_groups,
            reduce_output_records: self.reduce_output_records + other.reduce_output_records,
        }
    }
}

/// Counters and per-key partial sums from mapping some lines.
///
/// Samples are folded into their group's accumulator as they are produced, so memory use depends
/// on the number of group keys, not the number of lines.
#[derive(Debug, Default)]
pub struct MapOutput {
    pub groups: BTreeMap<ArcStr, MeanAccumulator>,
    pub counters: JobCounters,
}

impl MapOutput {
    fn push(mut self, outcome: LineOutcome) -> Self {
        self.counters.count(&outcome);
        if let Some(sample) = outcome.into_sample() {
            self.add_sample(sample);
        }
        self
    }

    fn add_sample(&mut self, sample: AgeSample) {
        self.groups
            .entry(sample.group_key)
            .or_default()
            .update(sample.years);
    }

    fn merge(mut self, other: Self) -> Self {
        for (key, partial) in other.groups {
            self.groups.entry(key).or_default().merge(partial);
        }
        self.counters = self.counters + other.counters;
        self
    }
}

/// The result of a run.
#[derive(Debug)]
pub struct JobReport {
    /// At most one entry per group key, in key order.
    pub results: Vec<AggregateResult>,
    pub counters: JobCounters,
}

/// Map every line of one partition held in memory, in parallel.
pub fn map_partition<S>(lines: &[S], config: &JobConfig) -> MapOutput
where
    S: AsRef<str> + Sync,
{
    let mut out = lines
        .par_iter()
        .map(|line| mapper::classify(line.as_ref(), config))
        .fold(MapOutput::default, MapOutput::push)
        .reduce(MapOutput::default, MapOutput::merge);
    out.counters.partitions = 1;
    out
}

/// Map every line of one partition as it is read, in parallel.
///
/// Lines end at `\n`, and a `\r` before it is dropped. A byte order mark at the start is
/// dropped too. Bytes that aren't UTF-8 are replaced with U+FFFD, so at worst the line is skipped
/// as malformed.
pub fn map_reader<R>(reader: R, config: &JobConfig) -> io::Result<MapOutput>
where
    R: BufRead + Send,
{
    let mut out = reader
        .split(b'\n')
        .enumerate()
        .map(|(idx, line)| line.map(|bytes| decode_line(bytes, idx == 0)))
        .par_bridge()
        .map(|line| line.map(|line| mapper::classify(&line, config)))
        .try_fold(MapOutput::default, |out, outcome| {
            outcome.map(|outcome| out.push(outcome))
        })
        .try_reduce(MapOutput::default, |left, right| Ok(left.merge(right)))?;
    out.counters.partitions = 1;
    Ok(out)
}

fn decode_line(mut bytes: Vec<u8>, first: bool) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    if first && bytes.starts_with(BOM) {
        bytes.drain(..BOM.len());
    }
    match String::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Map one partition file.
pub fn map_file(path: &Path, config: &JobConfig) -> Result<MapOutput> {
    fn inner(path: &Path, config: &JobConfig) -> Result<MapOutput> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        Ok(map_reader(reader, config)?)
    }

    inner(path, config).with_context(|| format!("reading input partition \"{}\"", path.display()))
}

/// Bring the partial sums for each key together. Every partial for a key ends up in the same
/// group.
pub fn shuffle(
    partials: impl IntoIterator<Item = (ArcStr, MeanAccumulator)>,
) -> BTreeMap<ArcStr, Vec<MeanAccumulator>> {
    partials.into_iter().into_group_map().into_iter().collect()
}

/// Reduce each group once. Groups with no values produce nothing.
pub fn reduce_groups(
    groups: BTreeMap<ArcStr, Vec<MeanAccumulator>>,
    config: &JobConfig,
) -> (Vec<AggregateResult>, JobCounters) {
    let mut counters = JobCounters::default();
    let mut results = Vec::with_capacity(groups.len());
    for (key, partials) in groups {
        counters.reduce_input_groups += 1;
        if let Some(result) = reducer::reduce_partials(&key, partials, config) {
            counters.reduce_output_records += 1;
            results.push(result);
        }
    }
    (results, counters)
}

/// Run the map, shuffle and reduce phases over partitions already in memory.
pub fn run_in_memory<S>(partitions: &[Vec<S>], config: &JobConfig) -> JobReport
where
    S: AsRef<str> + Sync,
{
    let mapped = partitions
        .par_iter()
        .map(|lines| map_partition(lines, config))
        .collect::<Vec<_>>();
    finish(mapped, config)
}

/// Run the whole job from `input` (a file or a directory of partitions) to the `output`
/// directory.
///
/// Bad records never fail the job; only problems reading the input or writing the output do.
pub fn run(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &JobConfig,
    overwrite: bool,
) -> Result<JobReport> {
    let (input, output) = (input.as_ref(), output.as_ref());
    // Fail before any work is done if the output is taken.
    check_output_is_not_input(input, output)?;
    prepare_output(output, overwrite)?;

    let partitions = list_partitions(input)?;
    event!(
        Level::INFO,
        "mapping {} partition(s) from \"{}\"",
        partitions.len(),
        input.display()
    );
    let mapped = partitions
        .par_iter()
        .map(|path| -> Result<MapOutput> {
            let out = map_file(path, config)?;
            event!(
                Level::DEBUG,
                "mapped {} lines from \"{}\"",
                out.counters.input_records,
                path.display()
            );
            Ok(out)
        })
        .collect::<Result<Vec<MapOutput>>>()?;

    let report = finish(mapped, config);
    write_output(output, &report.results)?;
    log_counters(&report.counters);
    Ok(report)
}

fn finish(mapped: Vec<MapOutput>, config: &JobConfig) -> JobReport {
    let counters = mapped
        .iter()
        .map(|out| out.counters)
        .fold(JobCounters::default(), ops::Add::add);
    let groups = shuffle(mapped.into_iter().flat_map(|out| out.groups));
    let (results, reduce_counters) = reduce_groups(groups, config);
    JobReport {
        results,
        counters: counters + reduce_counters,
    }
}

/// The files making up the input.
///
/// A file is its own single partition. For a directory, every regular file directly inside it is
/// a partition, apart from names starting with `_` or `.` (markers and hidden files).
pub fn list_partitions(input: &Path) -> Result<Vec<PathBuf>> {
    fn inner(input: &Path) -> Result<Vec<PathBuf>> {
        let meta = fs::metadata(input)?;
        if !meta.is_dir() {
            return Ok(vec![input.to_owned()]);
        }
        let mut paths = vec![];
        for entry in fs::read_dir(input)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('_') || name.starts_with('.') {
                continue;
            }
            // follows symlinks
            if fs::metadata(entry.path())?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    inner(input).with_context(|| format!("listing input partitions in \"{}\"", input.display()))
}

/// Refuse to write to `output` if that would replace or delete any of `input`.
fn check_output_is_not_input(input: &Path, output: &Path) -> Result {
    let input = fs::canonicalize(input)
        .with_context(|| format!("reading input \"{}\"", input.display()))?;
    let output = match fs::canonicalize(output) {
        Ok(output) => output,
        // nothing there yet, so nothing to clobber
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("checking output \"{}\"", output.display()))
        }
    };
    ensure!(
        !input.starts_with(&output),
        "output \"{}\" is or contains the input \"{}\"",
        output.display(),
        input.display()
    );
    Ok(())
}

/// Make sure we can write to `output`, removing what's there if `overwrite` is set.
fn prepare_output(output: &Path, overwrite: bool) -> Result {
    if !util::path_exists(output)? {
        return Ok(());
    }
    ensure!(
        overwrite,
        "output \"{}\" already exists (pass --overwrite to replace it)",
        output.display()
    );
    event!(
        Level::WARN,
        "overwriting existing output at \"{}\"",
        output.display()
    );
    let removed = if output.is_dir() {
        fs::remove_dir_all(output)
    } else {
        fs::remove_file(output)
    };
    removed.with_context(|| format!("removing old output \"{}\"", output.display()))
}

/// Write the results as tab separated lines, then the success marker.
pub fn write_output(output: &Path, results: &[AggregateResult]) -> Result {
    fn inner(output: &Path, results: &[AggregateResult]) -> Result {
        fs::create_dir_all(output)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .from_path(output.join(RESULT_FILE))?;
        for result in results {
            let mean = result.mean_years.to_string();
            writer.write_record([&*result.label, &*mean])?;
        }
        writer.flush()?;
        fs::File::create(output.join(SUCCESS_MARKER))?;
        Ok(())
    }

    inner(output, results)
        .with_context(|| format!("writing job output to \"{}\"", output.display()))
}

fn log_counters(counters: &JobCounters) {
    event!(
        Level::INFO,
        "{} of {} input records produced a sample",
        counters.map_output_records,
        counters.input_records
    );
    if counters.skipped_records() > 0 {
        event!(
            Level::INFO,
            "skipped {} records: {} with too few fields, {} with a bad date, {} with an implausible age",
            counters.skipped_records(),
            counters.too_few_fields,
            counters.bad_dates,
            counters.implausible_ages
        );
    }
}
