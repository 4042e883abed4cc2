use crate::job::JobCounters;
use std::{fs, io, path::Path};
use term_data_table::{Cell, Row, Table};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}

/// Job counters as a terminal table, with the record counts as a share of the input.
pub fn counters_table(counters: &JobCounters) -> Table<'static> {
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Counter"))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage of input")),
    );
    for (label, count, of_input) in counters.rows() {
        let pct = if !of_input || counters.input_records == 0 {
            String::from("-")
        } else {
            format!("{:.1}%", count as f64 / counters.input_records as f64 * 100.)
        };
        table.add_row(
            Row::new()
                .with_cell(Cell::from(label))
                .with_cell(Cell::from(count.to_string()))
                .with_cell(Cell::from(pct)),
        );
    }
    table
}
