//! Prompt construction and refinement.
//!
//! [`PromptBuilder`] owns every template the loop sends: the initial search
//! prompt, the judge prompt, the rewrite request, and the two fallbacks used
//! when a rewrite is skipped or fails.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use finsource_model::{CompletionModel, ResponseSchema, RetryPolicy, complete_with_retry};
use finsource_shared::{
    Answer, CompanyTask, ModelError, Reachability, ReferenceContext, Verdict, VerdictOrigin,
};

use crate::decode::decode_rewrite;
use crate::hints::company_hint;

/// Rewrites shorter than this are treated as failed.
pub const MIN_REWRITE_CHARS: usize = 100;

/// Which rewrite path produced the next prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineStrategy {
    /// The model rewrote the prompt.
    Rewritten,
    /// The rewrite failed; the judge feedback was appended as a directive.
    FeedbackAppended,
    /// No answer and no grounding on the first refinement: template broadening, no model call.
    Broadened,
}

impl RefineStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rewritten => "rewritten",
            Self::FeedbackAppended => "feedback_appended",
            Self::Broadened => "broadened",
        }
    }
}

/// Output of [`PromptBuilder::refine`].
#[derive(Debug, Clone)]
pub struct Refinement {
    pub prompt: String,
    pub strategy: RefineStrategy,
}

/// Everything a refinement looks at.
#[derive(Debug, Clone, Copy)]
pub struct RefineRequest<'a> {
    pub company: &'a CompanyTask,
    pub prompt: &'a str,
    pub answer: &'a Answer,
    pub verdict: &'a Verdict,
    pub reference: &'a ReferenceContext,
    /// 1-based index of this refinement within the loop.
    pub attempt: u32,
}

/// Decide whether a refinement needs a model call at all.
///
/// Broadening applies only on the very first refinement, when the answer
/// model produced nothing and scraping produced nothing either.
pub fn plan_refinement(
    verdict: &Verdict,
    reference: &ReferenceContext,
    attempt: u32,
) -> RefineStrategy {
    if attempt == 1 && verdict.origin == VerdictOrigin::NoAnswer && reference.is_empty() {
        RefineStrategy::Broadened
    } else {
        RefineStrategy::Rewritten
    }
}

/// Short SHA-256 fingerprint of a prompt, for log correlation.
pub fn prompt_fingerprint(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    format!("{digest:x}")[..12].to_string()
}

/// Builds and rewrites prompts for one batch.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    source_type: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new("Annual Report")
    }
}

impl PromptBuilder {
    pub fn new(source_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
        }
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    /// The first search prompt for `company`.
    pub fn initial(&self, company: &CompanyTask, reference: &ReferenceContext) -> String {
        let mut prompt = format!(
            "TASK: Find the most authoritative, specific, and up-to-date official financial \
             disclosure for \"{name}\" (requested source type: {source_type}).\n\
             \n\
             URL SELECTION\n\
             - Give the most specific URL: the document itself (PDF, XBRL, filing index) rather \
             than the homepage or a generic investor-relations landing page.\n\
             - Prefer the company's own investor-relations site or a regulator (SEC EDGAR for \
             US filers, ESEF reports for EU issuers) over aggregators and news sites.\n\
             - The URL must be publicly reachable without login.\n\
             \n\
             FISCAL YEAR\n\
             - Report the fiscal year the data covers, not the publication year.\n\
             - Choose the most recent fiscal year available.\n",
            name = company.name,
            source_type = self.source_type,
        );

        if let Some(domain) = &company.domain_hint {
            let _ = write!(prompt, "\nThe company's website is believed to be {domain}.\n");
        }

        if let Some(hint) = company_hint(&company.name) {
            let _ = write!(prompt, "\nCOMPANY NOTES\n- {hint}\n");
        }

        prompt.push_str(&reference_section(reference));
        prompt.push_str(&answer_format_section());
        prompt
    }

    /// The judge prompt for one candidate answer.
    pub fn judge(
        &self,
        company: &CompanyTask,
        answer: &Answer,
        reachability: &Reachability,
        reference: &ReferenceContext,
    ) -> String {
        let url = answer.url.as_deref().unwrap_or("(none)");
        let year = answer
            .fiscal_year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "(none)".into());

        format!(
            "You are reviewing a proposed financial source for \"{name}\" \
             (requested source type: {source_type}).\n\
             \n\
             PROPOSED ANSWER\n\
             - URL: {url}\n\
             - Fiscal year: {year}\n\
             - HTTP check: {reachability}\n\
             {reference}\
             \n\
             Score each criterion true or false:\n\
             - url_valid: the URL is well-formed, reachable, and belongs to the company or a \
             recognised regulator.\n\
             - url_specific: the URL points to a specific filing or report, not a homepage, \
             news section, or generic investor-relations landing page.\n\
             - year_correct: the fiscal year is present and matches the data behind the URL.\n\
             - year_recent: the fiscal year is the most recent one obtainable for this source \
             type.\n\
             \n\
             Set accepted to true only if all four criteria are true. In feedback, name each \
             failed criterion and say concretely how the next search should fix it.\n\
             \n\
             Reply with a JSON object only:\n\
             {{\"accepted\": bool, \"url_valid\": bool, \"url_specific\": bool, \
             \"year_correct\": bool, \"year_recent\": bool, \"feedback\": \"...\"}}\n",
            name = company.name,
            source_type = self.source_type,
            reference = reference_section(reference),
        )
    }

    /// Produce the next search prompt from a rejected attempt.
    ///
    /// Never fails: a failed or unusable rewrite degrades to
    /// [`RefineStrategy::FeedbackAppended`].
    pub async fn refine(
        &self,
        request: RefineRequest<'_>,
        model: &dyn CompletionModel,
        retry: &RetryPolicy,
    ) -> Refinement {
        if plan_refinement(request.verdict, request.reference, request.attempt)
            == RefineStrategy::Broadened
        {
            debug!(company = %request.company.name, "broadening prompt without a model call");
            return Refinement {
                prompt: self.broadened(request.company),
                strategy: RefineStrategy::Broadened,
            };
        }

        let rewrite_request = self.rewrite_request(&request);
        let schema = ResponseSchema::rewrite();
        let rewritten = complete_with_retry(model, &rewrite_request, &schema, retry)
            .await
            .and_then(|value| decode_rewrite(&value))
            .and_then(|prompt| validate_rewrite(&prompt, request.company).map(|()| prompt));

        match rewritten {
            Ok(prompt) => Refinement {
                prompt,
                strategy: RefineStrategy::Rewritten,
            },
            Err(err) => {
                warn!(
                    company = %request.company.name,
                    attempt = request.attempt,
                    error = %err,
                    "prompt rewrite failed, appending feedback instead"
                );
                Refinement {
                    prompt: append_feedback(request.prompt, request.verdict, request.attempt),
                    strategy: RefineStrategy::FeedbackAppended,
                }
            }
        }
    }

    fn rewrite_request(&self, request: &RefineRequest<'_>) -> String {
        let answer = match (&request.answer.url, request.answer.fiscal_year) {
            (None, None) => "no answer".to_string(),
            (url, year) => format!(
                "URL {}, fiscal year {}",
                url.as_deref().unwrap_or("(none)"),
                year.map(|y| y.to_string()).unwrap_or_else(|| "(none)".into())
            ),
        };

        format!(
            "You improve search prompts for a financial research model.\n\
             \n\
             The prompt below was used to find the official {source_type} of \"{name}\". \
             It produced {answer}, which a reviewer rejected with this feedback:\n\
             - {feedback}\n\
             {reference}\
             \n\
             Rewrite the whole prompt so the next search fixes every problem named in the \
             feedback. Keep the company name, the requested source type, and the instruction \
             to answer with JSON containing \"url\" and \"fiscal_year\". Make instructions more \
             specific where the feedback shows the model went wrong.\n\
             \n\
             PROMPT TO REWRITE\n\
             ---\n\
             {prompt}\n\
             ---\n\
             \n\
             Reply with a JSON object only: {{\"prompt\": \"<the complete rewritten prompt>\"}}\n",
            source_type = self.source_type,
            name = request.company.name,
            feedback = feedback_text(request.verdict),
            reference = reference_section(request.reference),
            prompt = request.prompt,
        )
    }

    /// Template rewrite for the "nothing at all" case: widen where to look.
    fn broadened(&self, company: &CompanyTask) -> String {
        let mut prompt = format!(
            "TASK: A previous search returned no result for \"{name}\". Search more broadly for \
             its latest {source_type}.\n\
             \n\
             WHERE TO LOOK\n\
             - The company's investor-relations site under names such as \"Investors\", \
             \"Financial information\", \"Reports and presentations\", or \"Results centre\".\n\
             - Regulator filings: SEC EDGAR (10-K, 20-F, 40-F) for US-listed issuers, the \
             national officially appointed mechanism or ESEF filings for EU issuers, \
             Companies House for UK companies.\n\
             - If the company is a subsidiary or was renamed, the parent or current entity's \
             reports.\n\
             - If no {source_type} exists, the closest official equivalent (integrated report, \
             universal registration document, audited financial statements).\n\
             \n\
             Still give the single most specific document URL and the most recent fiscal year \
             it covers.\n",
            name = company.name,
            source_type = self.source_type,
        );

        if let Some(domain) = &company.domain_hint {
            let _ = write!(prompt, "\nThe company's website is believed to be {domain}.\n");
        }
        if let Some(hint) = company_hint(&company.name) {
            let _ = write!(prompt, "\nCOMPANY NOTES\n- {hint}\n");
        }

        prompt.push_str(&answer_format_section());
        prompt
    }
}

fn validate_rewrite(prompt: &str, company: &CompanyTask) -> Result<(), ModelError> {
    if prompt.chars().count() < MIN_REWRITE_CHARS {
        return Err(ModelError::schema(format!(
            "rewritten prompt too short ({} chars)",
            prompt.chars().count()
        )));
    }
    if !prompt.to_lowercase().contains(&company.name.to_lowercase()) {
        return Err(ModelError::schema("rewritten prompt dropped the company name"));
    }
    Ok(())
}

fn feedback_text(verdict: &Verdict) -> &str {
    if verdict.feedback.trim().is_empty() {
        "the answer was rejected without details"
    } else {
        verdict.feedback.trim()
    }
}

/// Fallback refinement: keep the prompt, add the judge's feedback as an order.
pub fn append_feedback(prompt: &str, verdict: &Verdict, attempt: u32) -> String {
    format!(
        "{prompt}\n\nCORRECTION AFTER ATTEMPT {attempt}: the previous answer was rejected. \
         Reviewer feedback: {feedback}\nFix this before answering.\n",
        prompt = prompt.trim_end(),
        feedback = feedback_text(verdict),
    )
}

fn reference_section(reference: &ReferenceContext) -> String {
    if reference.is_empty() {
        return String::new();
    }

    let mut section = String::from("\nREFERENCE DATA (scraped, may be incomplete)\n");
    if let Some(home) = &reference.homepage {
        let _ = writeln!(section, "- Homepage: {home}");
    }
    if let Some(ir) = &reference.ir_page {
        let _ = writeln!(section, "- Investor relations: {ir}");
    }
    if !reference.candidate_links.is_empty() {
        section.push_str("- Candidate report links:\n");
        for link in &reference.candidate_links {
            let _ = writeln!(section, "  - {link}");
        }
    }
    section
}

fn answer_format_section() -> String {
    "\nRESPONSE FORMAT\n\
     Reply with a JSON object only, no extra text:\n\
     {\"url\": \"<exact document URL or null>\", \"fiscal_year\": <YYYY or null>, \
     \"source_description\": \"<what the document is>\", \"confidence\": \"HIGH|MEDIUM|LOW\"}\n"
        .to_string()
}
