use clap::Parser;
use patient_age::{counters_table, header, job, JobConfig};
use qu::ick_use::*;
use std::path::PathBuf;

/// Compute the mean age of patients at death, or at the reference date for those still alive.
#[derive(Parser)]
struct Opt {
    /// The patients extract: a csv file, or a directory of csv partitions.
    input: PathBuf,
    /// Directory to write the result to. Must not exist yet.
    output: PathBuf,
    /// A toml file overriding the built-in job settings.
    #[clap(long)]
    config: Option<PathBuf>,
    /// If set, replace anything already at the output location
    #[clap(long)]
    overwrite: bool,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = match &opt.config {
        Some(path) => JobConfig::load(path)?,
        None => JobConfig::default(),
    };

    let report = job::run(&opt.input, &opt.output, &config, opt.overwrite)?;

    header("Job counters");
    println!("{}", counters_table(&report.counters));
    header("Result");
    if report.results.is_empty() {
        println!("no valid records, output is empty");
    }
    for result in &report.results {
        println!("{}", result);
    }
    Ok(())
}
