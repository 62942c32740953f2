//! Semicolon-separated CSV output, and filling a discovery dataset from
//! finished records.
//!
//! Discovery datasets carry one row per (company, disclosure type) with
//! `NAME`, `TYPE`, `SRC` and `REFYEAR` columns. [`fill_dataset`] writes the
//! found URL and fiscal year into empty `FIN_REP` rows and leaves every
//! other cell untouched.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::{info, instrument, warn};

use finsource_shared::{FinSourceError, OutputRecord, Result};

use crate::{ResultWriter, RunReport, write_atomic};

/// Field delimiter of discovery datasets and CSV results.
pub const DELIMITER: u8 = b';';

/// Row type that receives the financial-report source.
const FIN_REP: &str = "FIN_REP";

#[derive(Serialize)]
struct CsvRow<'a> {
    company: &'a str,
    final_url: Option<&'a str>,
    fiscal_year: Option<i32>,
    accepted: bool,
    termination_reason: &'a str,
    iterations_used: u32,
    criteria_met: Option<usize>,
    last_feedback: Option<&'a str>,
}

impl<'a> From<&'a OutputRecord> for CsvRow<'a> {
    fn from(record: &'a OutputRecord) -> Self {
        Self {
            company: &record.company,
            final_url: record.final_url.as_deref(),
            fiscal_year: record.fiscal_year,
            accepted: record.accepted,
            termination_reason: record.termination_reason.as_str(),
            iterations_used: record.iterations_used,
            criteria_met: record.criteria_met,
            last_feedback: record.last_feedback.as_deref(),
        }
    }
}

/// One header row, then one `;`-separated row per record. Missing values
/// are empty cells.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvWriter;

impl ResultWriter for CsvWriter {
    #[instrument(skip_all, fields(path = %path.display(), records = report.records.len()))]
    fn write(&self, report: &RunReport, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .from_writer(Vec::new());
        for record in &report.records {
            writer
                .serialize(CsvRow::from(record))
                .map_err(|e| FinSourceError::validation(format!("CSV serialization failed: {e}")))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| FinSourceError::validation(format!("CSV serialization failed: {e}")))?;

        write_atomic(path, &bytes)?;
        info!(run_id = %report.run_id, "CSV results written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dataset fill
// ---------------------------------------------------------------------------

/// Counts from one [`fill_dataset`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillSummary {
    pub rows: usize,
    /// `FIN_REP` rows that received a source in this pass.
    pub filled: usize,
    /// `FIN_REP` rows still without a source afterwards.
    pub unresolved: usize,
}

fn column(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| FinSourceError::validation(format!("dataset has no `{name}` column")))
}

/// Read the dataset at `dataset`, fill empty `SRC`/`REFYEAR` cells of
/// `FIN_REP` rows from `records`, and write the result to `output`.
///
/// Records match rows by company name, ignoring case. Only records with
/// both a URL and a fiscal year are used; with `accepted_only`, records
/// the judge did not accept are skipped too. Rows that already have both
/// cells are left as they are.
#[instrument(skip(records), fields(records = records.len()))]
pub fn fill_dataset(
    dataset: &Path,
    records: &[OutputRecord],
    output: &Path,
    accepted_only: bool,
) -> Result<FillSummary> {
    let sources: HashMap<String, (&str, i32)> = records
        .iter()
        .filter(|r| r.accepted || !accepted_only)
        .filter_map(|r| Some((r.company.to_lowercase(), (r.final_url.as_deref()?, r.fiscal_year?))))
        .collect();

    let content = std::fs::read(dataset).map_err(|e| FinSourceError::io(dataset, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .flexible(true)
        .from_reader(content.as_slice());
    let headers = reader
        .headers()
        .map_err(|e| FinSourceError::parse(format!("invalid dataset header: {e}")))?
        .clone();

    let name_col = column(&headers, "NAME")?;
    let type_col = column(&headers, "TYPE")?;
    let src_col = column(&headers, "SRC")?;
    let year_col = column(&headers, "REFYEAR")?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .flexible(true)
        .from_writer(Vec::new());
    let write_err = |e: csv::Error| FinSourceError::validation(format!("CSV serialization failed: {e}"));
    writer.write_record(&headers).map_err(write_err)?;

    let mut summary = FillSummary::default();
    for row in reader.records() {
        let row = row.map_err(|e| FinSourceError::parse(format!("invalid dataset row: {e}")))?;
        summary.rows += 1;

        let is_fin_rep = row.get(type_col).is_some_and(|t| t.trim() == FIN_REP);
        let blank = |col: usize| row.get(col).is_none_or(|v| v.trim().is_empty());
        if !is_fin_rep || !(blank(src_col) || blank(year_col)) {
            writer.write_record(&row).map_err(write_err)?;
            continue;
        }

        let name = row.get(name_col).unwrap_or_default().trim();
        let Some((url, year)) = sources.get(&name.to_lowercase()) else {
            summary.unresolved += 1;
            writer.write_record(&row).map_err(write_err)?;
            continue;
        };

        let mut cells: Vec<String> = row.iter().map(str::to_string).collect();
        if cells.len() < headers.len() {
            cells.resize(headers.len(), String::new());
        }
        cells[src_col] = (*url).to_string();
        cells[year_col] = year.to_string();
        writer.write_record(&cells).map_err(write_err)?;
        summary.filled += 1;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| FinSourceError::validation(format!("CSV serialization failed: {e}")))?;
    write_atomic(output, &bytes)?;

    if summary.unresolved > 0 {
        warn!(unresolved = summary.unresolved, "some FIN_REP rows have no source");
    }
    info!(rows = summary.rows, filled = summary.filled, output = %output.display(), "dataset filled");
    Ok(summary)
}
