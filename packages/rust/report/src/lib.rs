//! Result persistence for FinSource batch runs.
//!
//! A [`RunReport`] summarises a finished batch; a [`ResultWriter`] puts it
//! on disk. Every writer goes through [`write_atomic`], so a crashed run
//! never leaves a half-written output file behind.

pub mod delimited;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use finsource_shared::{CompanyResult, FinSourceError, OutputRecord, Result, RunId};

pub use delimited::{CsvWriter, FillSummary, fill_dataset};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub companies: usize,
    pub accepted: usize,
    /// Count per termination reason, keyed by its snake_case name.
    pub by_reason: BTreeMap<String, usize>,
}

/// A finished batch, ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub tool_version: String,
    pub totals: Totals,
    /// Accepted companies over all companies, 0.0 for an empty batch.
    pub accepted_rate: f64,
    /// SHA-256 of the compact JSON encoding of `records`.
    pub checksum: String,
    pub records: Vec<OutputRecord>,
}

impl RunReport {
    pub fn new(run_id: RunId, results: &[CompanyResult]) -> Result<Self> {
        let records: Vec<OutputRecord> = results.iter().map(CompanyResult::to_record).collect();

        let mut by_reason = BTreeMap::new();
        for record in &records {
            *by_reason
                .entry(record.termination_reason.as_str().to_string())
                .or_insert(0) += 1;
        }
        let accepted = records.iter().filter(|r| r.accepted).count();
        let accepted_rate = if records.is_empty() {
            0.0
        } else {
            accepted as f64 / records.len() as f64
        };

        Ok(Self {
            run_id,
            generated_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            totals: Totals {
                companies: records.len(),
                accepted,
                by_reason,
            },
            accepted_rate,
            checksum: records_checksum(&records)?,
            records,
        })
    }

    /// Whether `checksum` still matches `records`.
    pub fn verify(&self) -> Result<bool> {
        Ok(records_checksum(&self.records)? == self.checksum)
    }
}

pub fn records_checksum(records: &[OutputRecord]) -> Result<String> {
    let payload = serde_json::to_vec(records)
        .map_err(|e| FinSourceError::validation(format!("record serialization failed: {e}")))?;
    Ok(format!("{:x}", Sha256::digest(&payload)))
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Output formats understood by [`writer_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    JsonLines,
    /// `;`-separated, one row per record.
    Csv,
}

pub trait ResultWriter {
    fn write(&self, report: &RunReport, path: &Path) -> Result<()>;
}

/// The whole report as one pretty-printed JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonReportWriter;

impl ResultWriter for JsonReportWriter {
    #[instrument(skip_all, fields(path = %path.display(), records = report.records.len()))]
    fn write(&self, report: &RunReport, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| FinSourceError::validation(format!("JSON serialization failed: {e}")))?;
        write_atomic(path, json.as_bytes())?;
        info!(run_id = %report.run_id, "report written");
        Ok(())
    }
}

/// One record per line; the run summary is not part of the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesWriter;

impl ResultWriter for JsonLinesWriter {
    #[instrument(skip_all, fields(path = %path.display(), records = report.records.len()))]
    fn write(&self, report: &RunReport, path: &Path) -> Result<()> {
        let mut out = String::new();
        for record in &report.records {
            let line = serde_json::to_string(record).map_err(|e| {
                FinSourceError::validation(format!("record serialization failed: {e}"))
            })?;
            out.push_str(&line);
            out.push('\n');
        }
        write_atomic(path, out.as_bytes())?;
        info!(run_id = %report.run_id, "records written");
        Ok(())
    }
}

pub fn writer_for(format: ReportFormat) -> Box<dyn ResultWriter> {
    match format {
        ReportFormat::Json => Box::new(JsonReportWriter),
        ReportFormat::JsonLines => Box::new(JsonLinesWriter),
        ReportFormat::Csv => Box::new(CsvWriter),
    }
}

/// Read records back from a JSON report or a JSON-lines file.
pub fn load_records(path: &Path) -> Result<Vec<OutputRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| FinSourceError::io(path, e))?;
    if let Ok(report) = serde_json::from_str::<RunReport>(&content) {
        return Ok(report.records);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| FinSourceError::parse(format!("line {}: invalid record: {e}", i + 1)))
        })
        .collect()
}

/// Write to a dot-prefixed sibling temp file, then rename over `path`.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().map_err(|e| FinSourceError::io(path, e))?,
    };
    std::fs::create_dir_all(&parent).map_err(|e| FinSourceError::io(&parent, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FinSourceError::validation(format!("not a file path: {}", path.display())))?;
    let temp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| FinSourceError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| FinSourceError::io(path, e))?;

    debug!(path = %path.display(), size = content.len(), "wrote file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use finsource_shared::{Answer, CompanyTask, ReferenceContext, TerminationReason, Verdict};

    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("finsource-report-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn result(name: &str, url: Option<&str>, termination: TerminationReason) -> CompanyResult {
        let accepted = termination == TerminationReason::Accepted;
        CompanyResult {
            company: CompanyTask::new(name, None).unwrap(),
            answer: Answer {
                url: url.map(String::from),
                fiscal_year: url.map(|_| 2023),
                ..Answer::default()
            },
            accepted,
            last_verdict: Some(Verdict::from_judge(
                accepted, true, accepted, true, true, "feedback",
            )),
            reference: ReferenceContext::default(),
            termination,
            iterations_used: 2,
        }
    }

    fn sample() -> Vec<CompanyResult> {
        vec![
            result("Acme Corp", Some("https://acme.com/10k-2023.pdf"), TerminationReason::Accepted),
            result("Globex", Some("https://globex.com/investors"), TerminationReason::Exhausted),
            result("Initech", None, TerminationReason::ModelError),
            result("Umbrella", Some("https://umbrella.com/ar.pdf"), TerminationReason::Accepted),
        ]
    }

    #[test]
    fn totals_and_rate() {
        let report = RunReport::new(RunId::new(), &sample()).unwrap();
        assert_eq!(report.totals.companies, 4);
        assert_eq!(report.totals.accepted, 2);
        assert_eq!(report.totals.by_reason["accepted"], 2);
        assert_eq!(report.totals.by_reason["model_error"], 1);
        assert!((report.accepted_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(report.checksum.len(), 64);
        assert!(report.verify().unwrap());
    }

    #[test]
    fn empty_batch_has_zero_rate() {
        let report = RunReport::new(RunId::new(), &[]).unwrap();
        assert_eq!(report.totals.companies, 0);
        assert_eq!(report.accepted_rate, 0.0);
    }

    #[test]
    fn tampered_records_fail_verification() {
        let mut report = RunReport::new(RunId::new(), &sample()).unwrap();
        report.records[1].accepted = true;
        assert!(!report.verify().unwrap());
    }

    #[test]
    fn json_report_reads_back() {
        let tmp = temp_dir();
        let path = tmp.join("out").join("report.json");
        let report = RunReport::new(RunId::new(), &sample()).unwrap();

        JsonReportWriter.write(&report, &path).unwrap();

        let back: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.records, report.records);
        assert!(back.verify().unwrap());
        assert!(!tmp.join("out").join(".report.json.tmp").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn json_lines_has_one_record_per_line() {
        let tmp = temp_dir();
        let path = tmp.join("results.jsonl");
        let report = RunReport::new(RunId::new(), &sample()).unwrap();

        writer_for(ReportFormat::JsonLines).write(&report, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        let first: OutputRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.termination_reason, TerminationReason::Accepted);
        let third: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(third["termination_reason"], "model_error");
        assert!(third["final_url"].is_null());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn records_load_from_either_json_format() {
        let tmp = temp_dir();
        let report = RunReport::new(RunId::new(), &sample()).unwrap();

        let json = tmp.join("report.json");
        JsonReportWriter.write(&report, &json).unwrap();
        assert_eq!(load_records(&json).unwrap(), report.records);

        let jsonl = tmp.join("results.jsonl");
        JsonLinesWriter.write(&report, &jsonl).unwrap();
        assert_eq!(load_records(&jsonl).unwrap(), report.records);

        std::fs::write(&jsonl, "{\"company\": \"Acme\"}\n").unwrap();
        let err = load_records(&jsonl).unwrap_err();
        assert!(err.to_string().contains("line 1"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rewriting_replaces_previous_output() {
        let tmp = temp_dir();
        let path = tmp.join("report.json");

        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
