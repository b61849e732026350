//! Batch input and output files.
//!
//! Input is a newline/tab-delimited file whose first column holds the
//! identifiers. Output is a tab-delimited file with one row per resolved
//! identifier, in input order.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::identifier::{Identifier, IdentifierKind};
use crate::record::{Field, MetadataRecord};

/// Output header row.
pub const OUTPUT_HEADER: [&str; 4] = ["ISBN", "OCLC", "LCCN", "LCCN-Source"];

/// Errors reading or writing batch files.
#[derive(Debug, Error)]
pub enum BatchIoError {
    /// The input file could not be read.
    #[error("cannot read input file '{path}': {source}\n  Suggestion: Check the path and file permissions")]
    Read {
        /// Input path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The output file could not be written.
    #[error("cannot write output file '{path}': {source}\n  Suggestion: Check that the directory exists and is writable")]
    Write {
        /// Output path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Identifiers read from an input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBatch {
    /// Identifiers in file order.
    pub identifiers: Vec<Identifier>,
    /// Kind inferred from the first identifier and applied to all.
    pub kind: Option<IdentifierKind>,
    /// Rows whose inferred kind differed from the batch kind.
    pub mismatched: usize,
}

impl InputBatch {
    /// Returns whether the batch holds no identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

/// Parses input text: first tab-separated column of each non-blank line.
///
/// The batch kind is inferred from the first identifier; later rows are
/// coerced to it, with a warning when their own length suggests otherwise.
#[must_use]
pub fn parse_input(text: &str) -> InputBatch {
    let mut identifiers = Vec::new();
    let mut kind = None;
    let mut mismatched = 0;

    for (line_no, line) in text.lines().enumerate() {
        let value = line.split('\t').next().unwrap_or_default().trim();
        let value = value.trim_start_matches('\u{feff}');
        if value.is_empty() {
            continue;
        }
        let own_kind = IdentifierKind::infer(value);
        let batch_kind = *kind.get_or_insert(own_kind);
        if own_kind != batch_kind {
            mismatched += 1;
            warn!(
                line = line_no + 1,
                value,
                expected = %batch_kind,
                "identifier length suggests a different kind; using the batch kind"
            );
        }
        identifiers.push(Identifier::new(value, batch_kind));
    }

    debug!(count = identifiers.len(), kind = ?kind, "parsed input batch");
    InputBatch {
        identifiers,
        kind,
        mismatched,
    }
}

/// Reads and parses an input file.
///
/// # Errors
///
/// Returns [`BatchIoError::Read`] if the file cannot be read.
pub fn read_input(path: &Path) -> Result<InputBatch, BatchIoError> {
    let text = std::fs::read_to_string(path).map_err(|source| BatchIoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_input(&text))
}

/// Replaces characters that would break the row layout.
fn sanitize_cell(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Formats one output row (without line terminator).
#[must_use]
pub fn format_row(record: &MetadataRecord) -> String {
    [Field::Isbn, Field::Oclc, Field::Lccn, Field::LccnSource]
        .iter()
        .map(|field| sanitize_cell(record.get(*field).unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\t")
}

/// Writes the header and one row per record to `writer`.
///
/// # Errors
///
/// Returns any IO error from `writer`.
pub fn write_rows<'a, W: Write>(
    writer: &mut W,
    records: impl IntoIterator<Item = &'a MetadataRecord>,
) -> std::io::Result<()> {
    writeln!(writer, "{}", OUTPUT_HEADER.join("\t"))?;
    for record in records {
        writeln!(writer, "{}", format_row(record))?;
    }
    writer.flush()
}

/// Writes the output file, creating or truncating it.
///
/// # Errors
///
/// Returns [`BatchIoError::Write`] if the file cannot be created or written.
pub fn write_output<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a MetadataRecord>,
) -> Result<(), BatchIoError> {
    let to_error = |source| BatchIoError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::create(path).map_err(to_error)?;
    let mut writer = std::io::BufWriter::new(file);
    write_rows(&mut writer, records).map_err(to_error)
}

/// Default output path: `<input stem>_results.tsv` next to the input.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "batch".into(), |stem| stem.to_string_lossy());
    input.with_file_name(format!("{stem}_results.tsv"))
}
