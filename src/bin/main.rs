// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use registrar_rs::{
    CourseId, Registrar, RegistrationId, SectionId, SectionSpec, StudentId, TermId,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// Registrar - Process enrollment CSV files
///
/// Reads enrollment operations from a CSV file and outputs section
/// rosters to stdout. Supports section creation, registrations,
/// cancellations, and transfers.
#[derive(Parser, Debug)]
#[command(name = "registrar-rs")]
#[command(about = "A registration engine that processes enrollment CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with enrollment operations
    ///
    /// Expected format: op,student,section,course,term,capacity,registration
    /// Example: cargo run -- enrollment.csv > sections.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args = Args::parse();

    // Open input file
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    // Process operations from CSV
    let registrar = match process_operations(BufReader::new(file)) {
        Ok(registrar) => registrar,
        Err(e) => {
            eprintln!("Error processing operations: {}", e);
            process::exit(1);
        }
    };

    // Write results to stdout
    if let Err(e) = write_sections(&registrar, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, student, section, course, term, capacity, registration`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    student: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    section: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    course: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    term: Option<u16>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    capacity: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    registration: Option<u64>,
}

/// One enrollment operation parsed out of a CSV row.
#[derive(Debug)]
enum Operation {
    AddSection(SectionSpec),
    Register {
        student: StudentId,
        section: SectionId,
    },
    Cancel {
        registration: RegistrationId,
    },
    Transfer {
        registration: RegistrationId,
        new_section: SectionId,
    },
}

impl CsvRecord {
    /// Converts a CSV record to an operation.
    ///
    /// Returns `None` for unknown ops or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        match self.op.to_lowercase().as_str() {
            "section" => {
                let section = self.section?;
                Some(Operation::AddSection(SectionSpec {
                    section_id: SectionId(section),
                    // A roster CSV may omit the course; fall back to the
                    // section id so the output stays self-consistent.
                    course_id: CourseId(self.course.unwrap_or(section)),
                    term_id: TermId(self.term.unwrap_or(1)),
                    max_capacity: self.capacity?,
                    schedule_code: None,
                }))
            }
            "register" => Some(Operation::Register {
                student: StudentId(self.student?),
                section: SectionId(self.section?),
            }),
            "cancel" => Some(Operation::Cancel {
                registration: RegistrationId(self.registration?),
            }),
            "transfer" => Some(Operation::Transfer {
                registration: RegistrationId(self.registration?),
                new_section: SectionId(self.section?),
            }),
            _ => None,
        }
    }
}

/// Process enrollment operations from a CSV reader.
///
/// Streaming: rows are applied as they are read, so arbitrarily large
/// files never load into memory at once. Malformed rows and failed
/// operations are logged and skipped; the batch keeps going.
///
/// # CSV Format
///
/// Expected columns: `op, student, section, course, term, capacity, registration`
///
/// ```csv
/// op,student,section,course,term,capacity,registration
/// section,,101,1,20251,30,
/// register,1,101,,,,
/// cancel,,,,,,1
/// transfer,,102,,,,2
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is
/// invalid. Individual operation failures (full section, duplicate, lock
/// timeout) don't stop processing.
pub fn process_operations<R: Read>(reader: R) -> Result<Registrar, csv::Error> {
    let registrar = Registrar::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " register "
        .flexible(true) // Allow short rows
        .has_headers(true) // Skip first row as header
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(op) = record.into_operation() else {
                    tracing::debug!("skipping invalid operation record");
                    continue;
                };

                let outcome = match op {
                    Operation::AddSection(spec) => registrar.add_section(spec),
                    Operation::Register { student, section } => {
                        registrar.register(student, section).map(|_| ())
                    }
                    Operation::Cancel { registration } => registrar.cancel(registration),
                    Operation::Transfer {
                        registration,
                        new_section,
                    } => registrar.transfer(registration, new_section),
                };
                if let Err(e) = outcome {
                    tracing::debug!("skipping operation: {e}");
                }
            }
            Err(e) => {
                // Skip malformed rows
                tracing::debug!("skipping malformed row: {e}");
                continue;
            }
        }
    }

    Ok(registrar)
}

/// Write section rosters to a CSV writer.
///
/// # CSV Format
///
/// Columns: `section, course, term, capacity, enrolled`
///
/// ```csv
/// section,course,term,capacity,enrolled
/// 101,1,20251,30,28
/// 102,1,20251,30,30
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_sections<W: Write>(registrar: &Registrar, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for section in registrar.sections() {
        wtr.serialize(&*section)?;
    }

    // Flush to ensure all data is written
    wtr.flush()?;
    Ok(())
}
