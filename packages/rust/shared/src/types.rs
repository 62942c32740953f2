//! Core domain types for finsource batches.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FinSourceError, Result};

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one batch run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CompanyTask
// ---------------------------------------------------------------------------

/// One company to research. Construct through [`CompanyTask::new`] so the
/// name is always validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyTask {
    /// Company name, trimmed and non-empty.
    pub name: String,
    /// Optional domain hint (e.g. `acme.com`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_hint: Option<String>,
    /// Position in the input list, used for ordered output.
    #[serde(default)]
    pub position: usize,
}

impl CompanyTask {
    pub fn new(name: impl Into<String>, domain_hint: Option<String>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(FinSourceError::validation("company name must not be empty"));
        }

        let domain_hint = domain_hint
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());

        Ok(Self {
            name,
            domain_hint,
            position: 0,
        })
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }
}

// ---------------------------------------------------------------------------
// Answer
// ---------------------------------------------------------------------------

/// A candidate produced by the answer model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiscal_year: Option<i32>,
    /// Free-text description of the document, if the model gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_description: Option<String>,
    /// Self-reported confidence, if the model gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
}

impl Answer {
    /// The empty answer, used when the model reply could not be decoded.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Neither a URL nor a fiscal year.
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.fiscal_year.is_none()
    }

    /// Both fields present; only usable answers are sent to the judge.
    pub fn is_usable(&self) -> bool {
        self.url.is_some() && self.fiscal_year.is_some()
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Where a [`Verdict`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOrigin {
    /// Scored by the judge model.
    Judge,
    /// Synthesized: the answer model produced neither URL nor year.
    NoAnswer,
    /// Synthesized: the answer model produced only one of URL and year.
    IncompleteAnswer,
    /// Synthesized: the judge replied but its reply could not be decoded.
    JudgeUnparseable,
}

/// The judge's assessment of one [`Answer`].
///
/// `accepted` is only ever true when all four criteria hold; the
/// constructors enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub accepted: bool,
    pub url_valid: bool,
    pub url_specific: bool,
    pub year_correct: bool,
    pub year_recent: bool,
    pub feedback: String,
    pub origin: VerdictOrigin,
}

/// Feedback text for a synthesized verdict on an empty answer.
pub const NO_ANSWER_FEEDBACK: &str = "no answer produced";

impl Verdict {
    /// Build a verdict from judge output. The judge's own `accepted` flag
    /// is overridden to false unless every criterion is satisfied.
    pub fn from_judge(
        accepted: bool,
        url_valid: bool,
        url_specific: bool,
        year_correct: bool,
        year_recent: bool,
        feedback: impl Into<String>,
    ) -> Self {
        let all = url_valid && url_specific && year_correct && year_recent;
        Self {
            accepted: accepted && all,
            url_valid,
            url_specific,
            year_correct,
            year_recent,
            feedback: feedback.into(),
            origin: VerdictOrigin::Judge,
        }
    }

    /// A negative verdict produced without consulting the judge.
    pub fn synthesized(origin: VerdictOrigin, feedback: impl Into<String>) -> Self {
        Self {
            accepted: false,
            url_valid: false,
            url_specific: false,
            year_correct: false,
            year_recent: false,
            feedback: feedback.into(),
            origin,
        }
    }

    /// Number of the four criteria this verdict satisfies.
    pub fn satisfied_count(&self) -> usize {
        [
            self.url_valid,
            self.url_specific,
            self.year_correct,
            self.year_recent,
        ]
        .into_iter()
        .filter(|c| *c)
        .count()
    }

    pub fn all_criteria_met(&self) -> bool {
        self.satisfied_count() == 4
    }
}

// ---------------------------------------------------------------------------
// Reference context
// ---------------------------------------------------------------------------

/// Best-effort grounding data scraped once per company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_page: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidate_links: Vec<String>,
    /// Set when scraping failed or timed out, as opposed to finding nothing.
    #[serde(default)]
    pub unavailable: bool,
}

impl ReferenceContext {
    /// The empty context returned when scraping fails.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// No grounding signal at all.
    pub fn is_empty(&self) -> bool {
        self.homepage.is_none() && self.ir_page.is_none() && self.candidate_links.is_empty()
    }
}

/// Outcome of probing a candidate URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reachability {
    Reachable { status: u16 },
    Unreachable { reason: String },
    /// Not probed (scraping disabled, or the probe itself timed out).
    Unknown,
}

impl std::fmt::Display for Reachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reachable { status } => write!(f, "reachable (HTTP {status})"),
            Self::Unreachable { reason } => write!(f, "unreachable ({reason})"),
            Self::Unknown => write!(f, "not checked"),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Why a company's refinement loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Accepted,
    Exhausted,
    ScrapeUnavailable,
    ModelError,
    Cancelled,
    UnexpectedError,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Exhausted => "exhausted",
            Self::ScrapeUnavailable => "scrape_unavailable",
            Self::ModelError => "model_error",
            Self::Cancelled => "cancelled",
            Self::UnexpectedError => "unexpected_error",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome for one company. Built once by the refinement loop (or by
/// the coordinator for tasks that never ran to completion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyResult {
    pub company: CompanyTask,
    pub answer: Answer,
    pub accepted: bool,
    pub last_verdict: Option<Verdict>,
    pub reference: ReferenceContext,
    pub termination: TerminationReason,
    pub iterations_used: u32,
}

impl CompanyResult {
    /// Record for a task that panicked or otherwise escaped its worker.
    pub fn unexpected(company: CompanyTask, message: impl Into<String>) -> Self {
        Self {
            company,
            answer: Answer::empty(),
            accepted: false,
            last_verdict: Some(Verdict::synthesized(VerdictOrigin::NoAnswer, message)),
            reference: ReferenceContext::default(),
            termination: TerminationReason::UnexpectedError,
            iterations_used: 0,
        }
    }

    /// Record for a task that was never dispatched because the batch was cancelled.
    pub fn cancelled_before_start(company: CompanyTask) -> Self {
        Self {
            company,
            answer: Answer::empty(),
            accepted: false,
            last_verdict: None,
            reference: ReferenceContext::default(),
            termination: TerminationReason::Cancelled,
            iterations_used: 0,
        }
    }

    /// Flatten into the persisted output shape.
    pub fn to_record(&self) -> OutputRecord {
        OutputRecord {
            company: self.company.name.clone(),
            final_url: self.answer.url.clone(),
            fiscal_year: self.answer.fiscal_year,
            accepted: self.accepted,
            termination_reason: self.termination,
            iterations_used: self.iterations_used,
            last_feedback: self.last_verdict.as_ref().map(|v| v.feedback.clone()),
            domain_hint: self.company.domain_hint.clone(),
            reference_homepage: self.reference.homepage.clone(),
            reference_ir_page: self.reference.ir_page.clone(),
            criteria_met: self.last_verdict.as_ref().map(Verdict::satisfied_count),
        }
    }
}

/// One line of output, as handed to a result writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub company: String,
    pub final_url: Option<String>,
    pub fiscal_year: Option<i32>,
    pub accepted: bool,
    pub termination_reason: TerminationReason,
    pub iterations_used: u32,
    pub last_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_ir_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_met: Option<usize>,
}
