//! Output formatting for CLI display
//!
//! Renders projected host rows (see
//! [`TagIndex::host_fields`](crate::db::TagIndex::host_fields)) in one of the
//! [`OutputFormat`]s, and styles the messages printed around them.

use crate::config::OutputFormat;
use colored::Colorize;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::io::{self, Write};
use thiserror::Error;

/// Errors while writing results
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Write `rows` of `fields` to `out`
///
/// `header` prints the field names first; it has no effect on JSON, whose
/// objects are keyed by field name.
///
/// # Errors
///
/// Returns `OutputError` if writing or encoding fails.
pub fn write_rows<W: Write>(
    mut out: W,
    format: OutputFormat,
    fields: &[String],
    rows: &[Vec<String>],
    header: bool,
) -> Result<(), OutputError> {
    match format {
        OutputFormat::Plain => {
            if header {
                writeln!(out, "{}", fields.join(" "))?;
            }
            for row in rows {
                writeln!(out, "{}", row.join(" "))?;
            }
        }
        OutputFormat::Csv | OutputFormat::Tsv => {
            let delimiter = if format == OutputFormat::Csv { b',' } else { b'\t' };
            let mut writer = csv::WriterBuilder::new().delimiter(delimiter).from_writer(out);
            if header {
                writer.write_record(fields)?;
            }
            for row in rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        OutputFormat::Json => {
            let objects: Vec<Map<String, Value>> = rows
                .iter()
                .map(|row| {
                    fields
                        .iter()
                        .zip(row)
                        .map(|(field, value)| (field.clone(), Value::String(value.clone())))
                        .collect()
                })
                .collect();
            serde_json::to_writer_pretty(&mut out, &objects)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Format an error for stderr
#[must_use]
pub fn error_line(error: &dyn Display) -> String {
    format!("{} {error}", "error:".red().bold())
}

/// Format an informational message
#[must_use]
pub fn info_line(message: &str) -> String {
    message.green().to_string()
}
