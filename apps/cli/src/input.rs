//! Company list loading.
//!
//! Two formats are accepted:
//! - JSON: an array of names, or of objects with `name` and an optional
//!   `domain_hint` (alias `domain`).
//! - Text: one company per line, optionally `Name | domain`. Blank lines
//!   and `#` comments are skipped.
//! - CSV (`.csv` files): `;`-separated with a header row. Names come from
//!   the `NAME` column, or the first column when there is none; an optional
//!   `DOMAIN` column supplies hints.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use finsource_report::delimited::DELIMITER;
use finsource_shared::{CompanyTask, FinSourceError, Result};

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonEntry {
    Name(String),
    Company {
        name: String,
        #[serde(default, alias = "domain")]
        domain_hint: Option<String>,
    },
}

/// Read companies from `path`, dropping case-insensitive duplicates.
pub(crate) fn load_companies(path: &Path) -> Result<Vec<CompanyTask>> {
    let content = std::fs::read_to_string(path).map_err(|e| FinSourceError::io(path, e))?;
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let companies = if is_csv {
        dedupe(parse_csv(&content)?)
    } else {
        parse_companies(&content)?
    };
    debug!(path = %path.display(), count = companies.len(), "companies loaded");
    Ok(companies)
}

pub(crate) fn parse_companies(content: &str) -> Result<Vec<CompanyTask>> {
    let parsed = if content.trim_start().starts_with('[') {
        parse_json(content)?
    } else {
        parse_lines(content)?
    };
    Ok(dedupe(parsed))
}

fn parse_json(content: &str) -> Result<Vec<CompanyTask>> {
    let entries: Vec<JsonEntry> = serde_json::from_str(content)
        .map_err(|e| FinSourceError::parse(format!("invalid company list: {e}")))?;

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let (name, hint) = match entry {
                JsonEntry::Name(name) => (name, None),
                JsonEntry::Company { name, domain_hint } => (name, domain_hint),
            };
            CompanyTask::new(name, hint).map_err(|e| {
                FinSourceError::parse(format!("company list entry {}: {e}", i + 1))
            })
        })
        .collect()
}

fn parse_lines(content: &str) -> Result<Vec<CompanyTask>> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| {
            let (name, hint) = match line.split_once('|') {
                Some((name, hint)) => (name.trim(), Some(hint.trim().to_string())),
                None => (line, None),
            };
            CompanyTask::new(name, hint)
                .map_err(|e| FinSourceError::parse(format!("line {line_no}: {e}")))
        })
        .collect()
}

fn parse_csv(content: &str) -> Result<Vec<CompanyTask>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| FinSourceError::parse(format!("invalid CSV header: {e}")))?
        .clone();

    let name_col = column(&headers, &["NAME"]).unwrap_or_else(|| {
        warn!(
            column = headers.get(0).unwrap_or_default(),
            "no NAME column, using the first column"
        );
        0
    });
    let domain_col = column(&headers, &["DOMAIN", "DOMAIN_HINT"]);

    let mut companies = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| FinSourceError::parse(format!("invalid CSV row: {e}")))?;
        let Some(name) = row.get(name_col).filter(|n| !n.is_empty()) else {
            continue;
        };
        let hint = domain_col.and_then(|col| row.get(col)).map(str::to_string);
        let line = row.position().map_or(0, |p| p.line());
        companies.push(
            CompanyTask::new(name, hint)
                .map_err(|e| FinSourceError::parse(format!("line {line}: {e}")))?,
        );
    }
    Ok(companies)
}

fn column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

fn dedupe(companies: Vec<CompanyTask>) -> Vec<CompanyTask> {
    let mut seen = HashSet::new();
    let total = companies.len();
    let kept: Vec<CompanyTask> = companies
        .into_iter()
        .filter(|company| {
            let fresh = seen.insert(company.name.to_lowercase());
            if !fresh {
                debug!(company = %company.name, "duplicate company dropped");
            }
            fresh
        })
        .collect();
    if kept.len() < total {
        warn!(dropped = total - kept.len(), "duplicate companies dropped");
    }
    kept
}
