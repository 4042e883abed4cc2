use patient_age::{
    job::{self, RESULT_FILE, SUCCESS_MARKER},
    JobConfig,
};
use std::{fs, path::Path, process::Command};
use tempfile::TempDir;

const EPS: f64 = 1e-6;

const HEADER: &str = "ROW_ID,SUBJECT_ID,GENDER,DOB,DOD,DOD_HOSP,DOD_SSN,EXPIRE_FLAG";

fn write_lines(path: &Path, lines: &[&str]) {
    fs::write(path, lines.join("\n")).unwrap();
}

fn read_result(output: &Path) -> String {
    fs::read_to_string(output.join(RESULT_FILE)).unwrap()
}

/// Parse `Average Age\t<mean>` back out of the output file.
fn read_mean(output: &Path) -> f64 {
    let contents = read_result(output);
    let mut lines = contents.lines();
    let line = lines.next().expect("one result line");
    assert!(lines.next().is_none(), "more than one result line");
    let (label, mean) = line.split_once('\t').unwrap();
    assert_eq!(label, "Average Age");
    mean.parse().unwrap()
}

#[test]
fn mean_of_dead_and_alive() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("PATIENTS.csv");
    let output = dir.path().join("avg_age");
    write_lines(
        &input,
        &[
            HEADER,
            "1,101,F,1950-01-01 00:00:00,2000-01-01 00:00:00",
            "2,102,M,1960-01-01 00:00:00,",
        ],
    );

    let report = job::run(&input, &output, &JobConfig::default(), false).unwrap();

    // 18262 days and 17532 days
    let expected = (18262. / 365.25 + 17532. / 365.25) / 2.;
    assert!((read_mean(&output) - expected).abs() < EPS);
    assert!((read_mean(&output) - 48.9993).abs() < 1e-3);
    assert!(output.join(SUCCESS_MARKER).exists());
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.counters.header_records, 1);
    assert_eq!(report.counters.map_output_records, 2);
}

#[test]
fn too_few_fields_gives_empty_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("PATIENTS.csv");
    let output = dir.path().join("out");
    write_lines(&input, &["1,101,F"]);

    let report = job::run(&input, &output, &JobConfig::default(), false).unwrap();

    assert!(report.results.is_empty());
    assert_eq!(read_result(&output), "");
    assert!(output.join(SUCCESS_MARKER).exists());
    assert_eq!(report.counters.too_few_fields, 1);
}

#[test]
fn born_after_reference_is_excluded() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("PATIENTS.csv");
    let output = dir.path().join("out");
    write_lines(
        &input,
        &[
            "3,103,F,2010-01-01 00:00:00,",
            "4,104,M,1958-01-01 00:00:00,2008-01-01 00:00:00",
        ],
    );

    let report = job::run(&input, &output, &JobConfig::default(), false).unwrap();

    assert_eq!(report.counters.implausible_ages, 1);
    // Only the second patient counts: 1958-01-01 to 2008-01-01 is 18262 days.
    assert!((read_mean(&output) - 18262. / 365.25).abs() < EPS);
}

#[test]
fn directory_of_partitions() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("patients");
    let output = dir.path().join("out");
    fs::create_dir(&input).unwrap();
    // Each partition has its own header, as when an extract is split with `split`.
    write_lines(
        &input.join("part-0.csv"),
        &[HEADER, "1,101,F,1950-01-01 00:00:00,2000-01-01 00:00:00"],
    );
    // Windows line endings
    fs::write(
        input.join("part-1.csv"),
        "ROW_ID,SUBJECT_ID,GENDER,DOB,DOD\r\n2,102,M,1960-01-01 00:00:00,\r\n",
    )
    .unwrap();
    // Ignored
    write_lines(&input.join("_SUCCESS"), &["1,1,M,1900-01-01 00:00:00,"]);
    write_lines(&input.join(".part-1.csv.crc"), &["garbage"]);

    let report = job::run(&input, &output, &JobConfig::default(), false).unwrap();

    assert_eq!(report.counters.partitions, 2);
    assert_eq!(report.counters.header_records, 2);
    assert_eq!(report.counters.map_output_records, 2);
    let expected = (18262. / 365.25 + 17532. / 365.25) / 2.;
    assert!((read_mean(&output) - expected).abs() < EPS);
}

#[test]
fn existing_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("PATIENTS.csv");
    let output = dir.path().join("out");
    write_lines(&input, &["1,101,F,1950-01-01 00:00:00,2000-01-01 00:00:00"]);
    fs::create_dir(&output).unwrap();
    fs::write(output.join("stale"), "old").unwrap();

    assert!(job::run(&input, &output, &JobConfig::default(), false).is_err());
    assert!(output.join("stale").exists());

    job::run(&input, &output, &JobConfig::default(), true).unwrap();
    assert!(!output.join("stale").exists());
    assert!((read_mean(&output) - 18262. / 365.25).abs() < EPS);
}

#[test]
fn output_must_not_replace_input() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("patients");
    fs::create_dir(&input).unwrap();
    let part = input.join("part-0.csv");
    write_lines(&part, &["1,101,F,1950-01-01 00:00:00,2000-01-01 00:00:00"]);

    // same directory
    assert!(job::run(&input, &input, &JobConfig::default(), true).is_err());
    assert!(part.exists());
    // same directory, spelled differently
    let dotted = input.join(".");
    assert!(job::run(&input, &dotted, &JobConfig::default(), true).is_err());
    assert!(part.exists());
    // input inside the output
    assert!(job::run(&input, dir.path(), &JobConfig::default(), true).is_err());
    assert!(part.exists());
    // a single file
    assert!(job::run(&part, &part, &JobConfig::default(), true).is_err());
    assert!(part.exists());

    // a sibling is fine
    let output = dir.path().join("out");
    job::run(&input, &output, &JobConfig::default(), true).unwrap();
    assert!((read_mean(&output) - 18262. / 365.25).abs() < EPS);
}

#[test]
fn invalid_utf8_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("PATIENTS.csv");
    let output = dir.path().join("out");
    let mut contents = b"1,101,F,1950-01-01 00:00:00,2000-01-01 00:00:00\n".to_vec();
    contents.extend_from_slice(b"2,102,M,1960-01-01 00:00:00,,Jos\xe9\n");
    fs::write(&input, contents).unwrap();

    let report = job::run(&input, &output, &JobConfig::default(), false).unwrap();

    assert_eq!(report.counters.map_output_records, 2);
    let expected = (18262. / 365.25 + 17532. / 365.25) / 2.;
    assert!((read_mean(&output) - expected).abs() < EPS);
}

#[test]
fn byte_order_mark_header() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("PATIENTS.csv");
    let output = dir.path().join("out");
    fs::write(
        &input,
        format!("\u{feff}{}\n2,102,M,1960-01-01 00:00:00,\n", HEADER),
    )
    .unwrap();

    let report = job::run(&input, &output, &JobConfig::default(), false).unwrap();

    assert_eq!(report.counters.header_records, 1);
    assert_eq!(report.counters.bad_dates, 0);
    assert!((read_mean(&output) - 48.).abs() < EPS);
}

#[cfg(unix)]
#[test]
fn symlinked_partition() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("patients");
    let output = dir.path().join("out");
    fs::create_dir(&input).unwrap();
    let target = dir.path().join("elsewhere.csv");
    write_lines(&target, &["2,102,M,1960-01-01 00:00:00,"]);
    std::os::unix::fs::symlink(&target, input.join("part-0.csv")).unwrap();
    write_lines(
        &input.join("part-1.csv"),
        &["1,101,F,1950-01-01 00:00:00,2000-01-01 00:00:00"],
    );

    let report = job::run(&input, &output, &JobConfig::default(), false).unwrap();

    assert_eq!(report.counters.partitions, 2);
    assert_eq!(report.counters.map_output_records, 2);
    let expected = (18262. / 365.25 + 17532. / 365.25) / 2.;
    assert!((read_mean(&output) - expected).abs() < EPS);
}

#[test]
fn missing_input() {
    let dir = TempDir::new().unwrap();
    let err = job::run(
        dir.path().join("nope.csv"),
        dir.path().join("out"),
        &JobConfig::default(),
        false,
    )
    .unwrap_err();
    assert!(format!("{:#}", err).contains("nope.csv"));
}

#[test]
fn config_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("PATIENTS.csv");
    let output = dir.path().join("out");
    let config_path = dir.path().join("job.toml");
    write_lines(&input, &["1,101,F,1960-01-01 00:00:00,"]);
    fs::write(
        &config_path,
        "reference_instant = \"2010-01-01T00:00:00Z\"\nresult_label = \"Mean Age\"\n",
    )
    .unwrap();

    let config = JobConfig::load(&config_path).unwrap();
    job::run(&input, &output, &config, false).unwrap();

    let contents = read_result(&output);
    let (label, mean) = contents.trim_end().split_once('\t').unwrap();
    assert_eq!(label, "Mean Age");
    // 1960-01-01 to 2010-01-01 is 50 years with 13 leap days.
    let mean: f64 = mean.parse().unwrap();
    assert!((mean - 18263. / 365.25).abs() < EPS);
}

#[test]
fn binary_exit_status() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("PATIENTS.csv");
    let output = dir.path().join("out");
    write_lines(&input, &["bad", "1,2,3"]);

    let status = Command::new(env!("CARGO_BIN_EXE_average_age"))
        .arg(&input)
        .arg(&output)
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(read_result(&output), "");

    // The output now exists, so a second run must fail.
    let status = Command::new(env!("CARGO_BIN_EXE_average_age"))
        .arg(&input)
        .arg(&output)
        .status()
        .unwrap();
    assert!(!status.success());
}
