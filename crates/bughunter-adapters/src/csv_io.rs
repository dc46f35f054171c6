//! CSV input/output for the batch pipeline.
//!
//! Input columns: `ID`, `Code`, `Context` (required), `Correct Code`,
//! `Explanation` (optional). Output columns: `ID`, `Bug Line`, `Explanation`.

use anyhow::{Context, Result};
use bughunter_core::{BugHunterError, InputRow, ReportRow};
use std::io::{Read, Write};
use std::path::Path;

const REQUIRED_COLUMNS: [&str; 3] = ["ID", "Code", "Context"];
const OUTPUT_COLUMNS: [&str; 3] = ["ID", "Bug Line", "Explanation"];

/// Read the input CSV at `path`.
pub fn load_input_csv(path: &Path) -> Result<Vec<InputRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open input CSV {}", path.display()))?;
    read_rows(file).with_context(|| format!("Failed to read input CSV {}", path.display()))
}

/// Parse input rows from any reader. Column validation happens before any
/// row is decoded, so a bad header fails fast.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<InputRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let missing: Vec<String> = REQUIRED_COLUMNS
        .into_iter()
        .filter(|name| column(name).is_none())
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(BugHunterError::MissingColumns { missing }.into());
    }

    let id_col = column("ID");
    let code_col = column("Code");
    let context_col = column("Context");
    let correct_col = column("Correct Code");
    let explanation_col = column("Explanation");

    let mut rows = Vec::new();
    for (idx, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed CSV record {}", idx + 1))?;
        let field = |col: Option<usize>| {
            col.and_then(|c| record.get(c))
                .unwrap_or_default()
                .to_string()
        };
        rows.push(InputRow {
            id: field(id_col),
            code: field(code_col),
            correct_code: field(correct_col),
            context: field(context_col),
            explanation: field(explanation_col),
        });
    }
    Ok(rows)
}

/// Write the output CSV at `path`.
pub fn write_output_csv(results: &[ReportRow], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create output CSV {}", path.display()))?;
    write_rows(results, file)
}

pub fn write_rows<W: Write>(results: &[ReportRow], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(OUTPUT_COLUMNS)?;
    for row in results {
        csv_writer.write_record([
            row.id.as_str(),
            row.bug_line.as_str(),
            row.bug_explanation.as_str(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}
