//! The per-company search, judge, refine loop.
//!
//! ```text
//! INIT -> SEARCHING -> JUDGING -> ACCEPTED
//!              ^           |----> EXHAUSTED
//!              |           v
//!              +------ REFINING
//!
//! any model transport failure (after retries) -> FAILED
//! cancellation observed before a new iteration -> CANCELLED
//! ```
//!
//! Each company gets its own [`RefinementState`]; nothing in here is shared
//! between loops except the collaborator handles.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use finsource_model::{CompletionModel, ResponseSchema, RetryPolicy, complete_with_retry};
use finsource_scraper::ReferenceScraper;
use finsource_shared::{
    Answer, CompanyResult, CompanyTask, ModelError, NO_ANSWER_FEEDBACK, Reachability,
    ReferenceContext, RunConfig, TerminationReason, Verdict, VerdictOrigin,
};

use crate::decode::{decode_answer, decode_verdict};
use crate::prompt::{PromptBuilder, RefineRequest, prompt_fingerprint};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// One completed search + judge round.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    /// 1-based iteration index.
    pub iteration: u32,
    pub answer: Answer,
    pub verdict: Verdict,
    /// Fingerprint of the prompt that produced `answer`.
    pub prompt_fingerprint: String,
}

/// Mutable state owned by a single loop.
#[derive(Debug, Clone, Default)]
pub struct RefinementState {
    /// Iterations started so far; never exceeds the budget.
    pub iteration: u32,
    pub prompt: String,
    pub history: Vec<Attempt>,
    pub termination: Option<TerminationReason>,
}

impl RefinementState {
    fn record(&mut self, answer: Answer, verdict: Verdict) {
        self.history.push(Attempt {
            iteration: self.iteration,
            answer,
            verdict,
            prompt_fingerprint: prompt_fingerprint(&self.prompt),
        });
    }

    /// The most recently produced non-empty answer.
    fn last_known_answer(&self) -> Option<&Answer> {
        self.history
            .iter()
            .rev()
            .map(|a| &a.answer)
            .find(|a| !a.is_empty())
    }
}

/// Loop phases. Terminal phases carry what the result needs.
#[derive(Debug)]
enum Phase {
    Init,
    Searching,
    Judging { answer: Answer, note: Option<String> },
    Refining,
    Accepted,
    Exhausted,
    Failed { answer: Option<Answer>, error: ModelError },
    Cancelled,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Searching => "searching",
            Self::Judging { .. } => "judging",
            Self::Refining => "refining",
            Self::Accepted => "accepted",
            Self::Exhausted => "exhausted",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Transition guards
// ---------------------------------------------------------------------------

/// Where the loop goes once an attempt has been judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeOutcome {
    Accept,
    Exhaust,
    Refine,
}

/// Next step after judging iteration `iteration` of `max_iterations`.
pub fn after_judging(verdict: &Verdict, iteration: u32, max_iterations: u32) -> JudgeOutcome {
    if verdict.accepted {
        JudgeOutcome::Accept
    } else if iteration >= max_iterations {
        JudgeOutcome::Exhaust
    } else {
        JudgeOutcome::Refine
    }
}

/// The attempt whose verdict met the most criteria; ties go to the most recent.
pub fn select_best(history: &[Attempt]) -> Option<&Attempt> {
    history
        .iter()
        .max_by_key(|a| (a.verdict.satisfied_count(), a.iteration))
}

/// A negative verdict for an answer that never reached the judge.
pub fn synthesize_verdict(answer: &Answer, note: Option<&str>) -> Verdict {
    if answer.is_empty() {
        let feedback = match note {
            Some(note) => format!("{NO_ANSWER_FEEDBACK}: {note}"),
            None => NO_ANSWER_FEEDBACK.to_string(),
        };
        Verdict::synthesized(VerdictOrigin::NoAnswer, feedback)
    } else if answer.url.is_none() {
        Verdict::synthesized(
            VerdictOrigin::IncompleteAnswer,
            "incomplete answer: a fiscal year was given but no URL",
        )
    } else {
        Verdict::synthesized(
            VerdictOrigin::IncompleteAnswer,
            "incomplete answer: a URL was given but no fiscal year",
        )
    }
}

// ---------------------------------------------------------------------------
// RefinementLoop
// ---------------------------------------------------------------------------

/// Runs the search/judge/refine cycle for one company at a time.
///
/// Cheap to share: hold it in an `Arc` and call [`run`](Self::run) from
/// as many tasks as needed.
pub struct RefinementLoop {
    answer_model: Arc<dyn CompletionModel>,
    judge_model: Arc<dyn CompletionModel>,
    scraper: Arc<dyn ReferenceScraper>,
    prompts: PromptBuilder,
    max_iterations: u32,
    per_call_timeout: Duration,
    retry: RetryPolicy,
}

impl RefinementLoop {
    pub fn new(
        answer_model: Arc<dyn CompletionModel>,
        judge_model: Arc<dyn CompletionModel>,
        scraper: Arc<dyn ReferenceScraper>,
        config: &RunConfig,
    ) -> Self {
        Self {
            answer_model,
            judge_model,
            scraper,
            prompts: PromptBuilder::default(),
            max_iterations: config.max_iterations.max(1),
            per_call_timeout: config.per_call_timeout,
            retry: RetryPolicy::from(config),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    /// Override the delay between transport retries.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry = self.retry.with_backoff(backoff);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Drive `company` to a terminal state. Never fails: every outcome,
    /// including model outages and cancellation, is a [`CompanyResult`].
    #[instrument(skip_all, fields(company = %company.name))]
    pub async fn run(&self, company: CompanyTask, cancel: &CancellationToken) -> CompanyResult {
        let mut state = RefinementState::default();
        let mut reference = ReferenceContext::default();
        let mut phase = Phase::Init;

        let terminal = loop {
            debug!(phase = phase.name(), iteration = state.iteration, "transition");
            phase = match phase {
                Phase::Init => {
                    reference = self.scrape(&company).await;
                    state.prompt = self.prompts.initial(&company, &reference);
                    Phase::Searching
                }
                Phase::Searching => {
                    if cancel.is_cancelled() {
                        Phase::Cancelled
                    } else {
                        state.iteration += 1;
                        self.search(&state).await
                    }
                }
                Phase::Judging { answer, note } => {
                    let verdict = match self.judge(&company, &answer, note.as_deref(), &reference).await {
                        Ok(verdict) => verdict,
                        Err(error) => {
                            break Phase::Failed {
                                answer: Some(answer),
                                error,
                            };
                        }
                    };

                    info!(
                        iteration = state.iteration,
                        accepted = verdict.accepted,
                        criteria_met = verdict.satisfied_count(),
                        origin = ?verdict.origin,
                        "attempt judged"
                    );

                    let outcome = after_judging(&verdict, state.iteration, self.max_iterations);
                    state.record(answer, verdict);
                    match outcome {
                        JudgeOutcome::Accept => Phase::Accepted,
                        JudgeOutcome::Exhaust => Phase::Exhausted,
                        JudgeOutcome::Refine if cancel.is_cancelled() => Phase::Cancelled,
                        JudgeOutcome::Refine => Phase::Refining,
                    }
                }
                Phase::Refining => {
                    self.refine(&company, &reference, &mut state).await;
                    Phase::Searching
                }
                terminal @ (Phase::Accepted
                | Phase::Exhausted
                | Phase::Failed { .. }
                | Phase::Cancelled) => break terminal,
            };
        };

        self.finish(company, state, reference, terminal)
    }

    async fn scrape(&self, company: &CompanyTask) -> ReferenceContext {
        match tokio::time::timeout(self.per_call_timeout, self.scraper.scrape(company)).await {
            Ok(context) => {
                if context.unavailable {
                    warn!("reference scrape unavailable, continuing without grounding");
                }
                context
            }
            Err(_) => {
                warn!(timeout = ?self.per_call_timeout, "reference scrape timed out");
                ReferenceContext::unavailable()
            }
        }
    }

    /// SEARCHING: ask the answer model. Schema errors become an empty answer.
    async fn search(&self, state: &RefinementState) -> Phase {
        let schema = ResponseSchema::answer();
        let reply = complete_with_retry(self.answer_model.as_ref(), &state.prompt, &schema, &self.retry)
            .await
            .and_then(|value| decode_answer(&value));

        match reply {
            Ok(answer) => {
                debug!(
                    iteration = state.iteration,
                    url = ?answer.url,
                    fiscal_year = ?answer.fiscal_year,
                    prompt = %prompt_fingerprint(&state.prompt),
                    "answer received"
                );
                Phase::Judging { answer, note: None }
            }
            Err(error) if error.is_transport() => {
                warn!(iteration = state.iteration, %error, "answer model unavailable");
                Phase::Failed {
                    answer: state.last_known_answer().cloned(),
                    error,
                }
            }
            Err(error) => {
                warn!(iteration = state.iteration, %error, "answer could not be decoded");
                Phase::Judging {
                    answer: Answer::empty(),
                    note: Some(format!("the model reply could not be decoded ({error})")),
                }
            }
        }
    }

    /// JUDGING: synthesize a verdict for unusable answers, otherwise ask the judge.
    /// Only a transport failure is returned as an error.
    async fn judge(
        &self,
        company: &CompanyTask,
        answer: &Answer,
        note: Option<&str>,
        reference: &ReferenceContext,
    ) -> Result<Verdict, ModelError> {
        if !answer.is_usable() {
            return Ok(synthesize_verdict(answer, note));
        }

        let reachability = match answer.url.as_deref() {
            Some(url) => tokio::time::timeout(self.per_call_timeout, self.scraper.check_reachable(url))
                .await
                .unwrap_or(Reachability::Unknown),
            None => Reachability::Unknown,
        };

        let prompt = self.prompts.judge(company, answer, &reachability, reference);
        let schema = ResponseSchema::verdict();
        let reply = complete_with_retry(self.judge_model.as_ref(), &prompt, &schema, &self.retry)
            .await
            .and_then(|value| decode_verdict(&value));

        match reply {
            Ok(verdict) => Ok(verdict),
            Err(error) if error.is_transport() => {
                warn!(%error, "judge model unavailable");
                Err(error)
            }
            Err(error) => {
                warn!(%error, "judge reply could not be decoded");
                Ok(Verdict::synthesized(
                    VerdictOrigin::JudgeUnparseable,
                    format!("the judge reply could not be decoded ({error}); re-check the URL and fiscal year"),
                ))
            }
        }
    }

    /// REFINING: rewrite the prompt from the last verdict.
    async fn refine(
        &self,
        company: &CompanyTask,
        reference: &ReferenceContext,
        state: &mut RefinementState,
    ) {
        let Some(last) = state.history.last() else {
            return;
        };

        let refinement = self
            .prompts
            .refine(
                RefineRequest {
                    company,
                    prompt: &state.prompt,
                    answer: &last.answer,
                    verdict: &last.verdict,
                    reference,
                    attempt: state.iteration,
                },
                self.answer_model.as_ref(),
                &self.retry,
            )
            .await;

        info!(
            iteration = state.iteration,
            strategy = refinement.strategy.as_str(),
            prompt = %prompt_fingerprint(&refinement.prompt),
            "prompt refined"
        );
        state.prompt = refinement.prompt;
    }

    fn finish(
        &self,
        company: CompanyTask,
        mut state: RefinementState,
        reference: ReferenceContext,
        terminal: Phase,
    ) -> CompanyResult {
        let last_verdict = state.history.last().map(|a| a.verdict.clone());
        let best_answer = || {
            select_best(&state.history)
                .map(|a| a.answer.clone())
                .unwrap_or_default()
        };

        let (answer, accepted, termination) = match terminal {
            Phase::Accepted => {
                let answer = state
                    .history
                    .last()
                    .map(|a| a.answer.clone())
                    .unwrap_or_default();
                (answer, true, TerminationReason::Accepted)
            }
            Phase::Exhausted => {
                let never_answered = state.history.iter().all(|a| !a.answer.is_usable());
                let reason = if reference.unavailable && never_answered {
                    TerminationReason::ScrapeUnavailable
                } else {
                    TerminationReason::Exhausted
                };
                (best_answer(), false, reason)
            }
            Phase::Failed { answer, error } => {
                warn!(%error, iteration = state.iteration, "giving up on company after model failure");
                (answer.unwrap_or_default(), false, TerminationReason::ModelError)
            }
            Phase::Cancelled => (best_answer(), false, TerminationReason::Cancelled),
            Phase::Init | Phase::Searching | Phase::Judging { .. } | Phase::Refining => {
                (best_answer(), false, TerminationReason::UnexpectedError)
            }
        };

        state.termination = Some(termination);
        info!(
            termination = %termination,
            iterations = state.iteration,
            accepted,
            url = ?answer.url,
            fiscal_year = ?answer.fiscal_year,
            "company finished"
        );

        CompanyResult {
            company,
            answer,
            accepted,
            last_verdict,
            reference,
            termination,
            iterations_used: state.iteration,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::testing::{
        CancellingJudge, FakeScraper, ScriptedModel, accept, answer, no_answer, rewrite, verdict,
    };

    const ANSWER: &str = "financial_source";
    const JUDGE: &str = "judge_verdict";
    const REWRITE: &str = "rewritten_prompt";

    fn config(max_iterations: u32) -> RunConfig {
        RunConfig {
            max_iterations,
            concurrency: 1,
            per_call_timeout: Duration::from_secs(2),
            max_transport_retries: 2,
        }
    }

    fn build(
        answer_model: Arc<ScriptedModel>,
        judge_model: Arc<ScriptedModel>,
        scraper: FakeScraper,
        max_iterations: u32,
    ) -> RefinementLoop {
        RefinementLoop::new(answer_model, judge_model, Arc::new(scraper), &config(max_iterations))
            .with_retry_backoff(Duration::ZERO)
    }

    fn acme() -> CompanyTask {
        CompanyTask::new("Acme Corp", None).unwrap()
    }

    fn attempt(iteration: u32, satisfied: usize) -> Attempt {
        let flags: Vec<bool> = (0..4).map(|i| i < satisfied).collect();
        Attempt {
            iteration,
            answer: Answer {
                url: Some(format!("https://acme.com/{iteration}.pdf")),
                fiscal_year: Some(2020 + iteration as i32),
                ..Answer::default()
            },
            verdict: Verdict::from_judge(false, flags[0], flags[1], flags[2], flags[3], ""),
            prompt_fingerprint: String::new(),
        }
    }

    #[test]
    fn judge_outcome_guards() {
        let yes = Verdict::from_judge(true, true, true, true, true, "");
        let no = Verdict::from_judge(false, true, true, true, false, "");
        assert_eq!(after_judging(&yes, 3, 3), JudgeOutcome::Accept);
        assert_eq!(after_judging(&no, 2, 3), JudgeOutcome::Refine);
        assert_eq!(after_judging(&no, 3, 3), JudgeOutcome::Exhaust);
    }

    #[test]
    fn best_attempt_prefers_most_recent_on_ties() {
        let history = vec![attempt(1, 1), attempt(2, 3), attempt(3, 2), attempt(4, 3)];
        assert_eq!(select_best(&history).unwrap().iteration, 4);
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn synthesized_verdicts_explain_themselves() {
        let empty = synthesize_verdict(&Answer::empty(), None);
        assert_eq!(empty.origin, VerdictOrigin::NoAnswer);
        assert_eq!(empty.feedback, NO_ANSWER_FEEDBACK);

        let partial = Answer {
            url: Some("https://acme.com/ar.pdf".into()),
            ..Answer::default()
        };
        let v = synthesize_verdict(&partial, None);
        assert_eq!(v.origin, VerdictOrigin::IncompleteAnswer);
        assert!(v.feedback.contains("no fiscal year"));
        assert!(!v.accepted);
    }

    #[tokio::test]
    async fn acme_is_accepted_on_second_iteration_without_rewrite_call() {
        let answers = Arc::new(
            ScriptedModel::new()
                .on(ANSWER, vec![no_answer(), answer("https://acme.com/10k-2022.pdf", 2022)]),
        );
        let judge = Arc::new(ScriptedModel::new().on(JUDGE, vec![accept()]));
        let lp = build(answers.clone(), judge.clone(), FakeScraper::default(), 3);

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert!(result.accepted);
        assert_eq!(result.termination, TerminationReason::Accepted);
        assert_eq!(result.iterations_used, 2);
        assert_eq!(result.answer.url.as_deref(), Some("https://acme.com/10k-2022.pdf"));
        assert_eq!(result.answer.fiscal_year, Some(2022));
        // Iteration 1 skipped the judge; iteration 2 was judged once.
        assert_eq!(judge.calls(JUDGE), 1);
        // Broadening happened without a rewrite call.
        assert_eq!(answers.calls(REWRITE), 0);
        assert_eq!(answers.calls(ANSWER), 2);
        assert!(answers.prompts(ANSWER)[1].contains("Search more broadly"));
    }

    #[tokio::test]
    async fn exhaustion_returns_best_attempt() {
        let answers = Arc::new(
            ScriptedModel::new()
                .on(
                    ANSWER,
                    vec![
                        answer("https://acme.com/1.pdf", 2021),
                        answer("https://acme.com/2.pdf", 2022),
                        answer("https://acme.com/3.pdf", 2020),
                        answer("https://acme.com/4.pdf", 2023),
                    ],
                )
                .otherwise(REWRITE, rewrite("Acme Corp", "next")),
        );
        let judge = Arc::new(ScriptedModel::new().on(
            JUDGE,
            vec![
                verdict(true, false, false, false, "generic page"),
                verdict(true, true, true, false, "stale year"),
                verdict(true, true, false, false, "wrong year"),
                verdict(true, false, true, true, "landing page"),
            ],
        ));
        let lp = build(answers.clone(), judge.clone(), FakeScraper::default(), 4);

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert!(!result.accepted);
        assert_eq!(result.termination, TerminationReason::Exhausted);
        assert_eq!(result.iterations_used, 4);
        assert_eq!(result.answer.url.as_deref(), Some("https://acme.com/4.pdf"));
        assert_eq!(result.last_verdict.unwrap().feedback, "landing page");
        assert_eq!(judge.calls(JUDGE), 4);
        assert_eq!(answers.calls(REWRITE), 3);
    }

    #[tokio::test]
    async fn schema_error_consumes_one_iteration() {
        let answers = Arc::new(ScriptedModel::new().on(
            ANSWER,
            vec![Err(ModelError::schema("no JSON object in reply"))],
        ));
        let judge = Arc::new(ScriptedModel::new());
        let lp = build(answers.clone(), judge.clone(), FakeScraper::default(), 1);

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert_eq!(result.termination, TerminationReason::Exhausted);
        assert_eq!(result.iterations_used, 1);
        assert_eq!(answers.calls(ANSWER), 1);
        assert_eq!(judge.total_calls(), 0);
        let last = result.last_verdict.unwrap();
        assert!(!last.accepted);
        assert_eq!(last.origin, VerdictOrigin::NoAnswer);
        assert!(last.feedback.contains("could not be decoded"));
    }

    #[tokio::test]
    async fn judge_rejection_despite_accepted_flag_triggers_refinement() {
        let answers = Arc::new(
            ScriptedModel::new()
                .on(
                    ANSWER,
                    vec![
                        answer("https://acme.com/ar-2021.pdf", 2021),
                        answer("https://acme.com/ar-2023.pdf", 2023),
                    ],
                )
                .on(REWRITE, vec![rewrite("Acme Corp", "newer year")]),
        );
        let mut stale = verdict(true, true, true, false, "a 2023 report exists").unwrap();
        stale["accepted"] = Value::Bool(true);
        let judge = Arc::new(ScriptedModel::new().on(JUDGE, vec![Ok(stale), accept()]));
        let lp = build(answers.clone(), judge, FakeScraper::default(), 3);

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert!(result.accepted);
        assert_eq!(result.iterations_used, 2);
        assert_eq!(result.answer.fiscal_year, Some(2023));
        assert!(answers.prompts(ANSWER)[1].contains("[newer year]"));
    }

    #[tokio::test]
    async fn failed_rewrite_appends_feedback() {
        let answers = Arc::new(
            ScriptedModel::new()
                .on(
                    ANSWER,
                    vec![
                        answer("https://acme.com/investors", 2023),
                        answer("https://acme.com/ar-2023.pdf", 2023),
                    ],
                )
                .on(REWRITE, vec![Ok(serde_json::json!({ "prompt": "too short" }))]),
        );
        let judge = Arc::new(ScriptedModel::new().on(
            JUDGE,
            vec![verdict(true, false, true, true, "URL is the IR landing page"), accept()],
        ));
        let lp = build(answers.clone(), judge, FakeScraper::default(), 3);

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert!(result.accepted);
        let second_prompt = &answers.prompts(ANSWER)[1];
        assert!(second_prompt.contains("CORRECTION AFTER ATTEMPT 1"));
        assert!(second_prompt.contains("URL is the IR landing page"));
    }

    #[tokio::test]
    async fn answer_transport_failure_is_model_error() {
        let answers = Arc::new(
            ScriptedModel::new().otherwise(ANSWER, Err(ModelError::transport("401 Unauthorized"))),
        );
        let judge = Arc::new(ScriptedModel::new());
        let lp = build(answers.clone(), judge, FakeScraper::default(), 3);

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert_eq!(result.termination, TerminationReason::ModelError);
        assert!(!result.accepted);
        assert_eq!(result.iterations_used, 1);
        // One call plus two retries.
        assert_eq!(answers.calls(ANSWER), 3);
        assert!(result.last_verdict.is_none());
    }

    #[tokio::test]
    async fn judge_transport_failure_keeps_last_answer() {
        let answers = Arc::new(
            ScriptedModel::new().on(ANSWER, vec![answer("https://acme.com/ar-2023.pdf", 2023)]),
        );
        let judge = Arc::new(
            ScriptedModel::new().otherwise(JUDGE, Err(ModelError::Timeout(Duration::from_secs(2)))),
        );
        let lp = build(answers, judge.clone(), FakeScraper::default(), 3);

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert_eq!(result.termination, TerminationReason::ModelError);
        assert_eq!(result.answer.url.as_deref(), Some("https://acme.com/ar-2023.pdf"));
        assert_eq!(judge.calls(JUDGE), 3);
    }

    #[tokio::test]
    async fn unparseable_judge_reply_is_a_negative_verdict() {
        let answers = Arc::new(
            ScriptedModel::new().on(ANSWER, vec![answer("https://acme.com/ar-2023.pdf", 2023)]),
        );
        let judge = Arc::new(
            ScriptedModel::new().on(JUDGE, vec![Err(ModelError::schema("not json"))]),
        );
        let lp = build(answers, judge, FakeScraper::default(), 1);

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert_eq!(result.termination, TerminationReason::Exhausted);
        assert_eq!(result.answer.url.as_deref(), Some("https://acme.com/ar-2023.pdf"));
        assert_eq!(
            result.last_verdict.unwrap().origin,
            VerdictOrigin::JudgeUnparseable
        );
    }

    #[tokio::test]
    async fn unavailable_scrape_without_answers_is_reported() {
        let answers = Arc::new(ScriptedModel::new().otherwise(ANSWER, no_answer()));
        let judge = Arc::new(ScriptedModel::new());
        let scraper = FakeScraper {
            context: ReferenceContext::unavailable(),
            ..FakeScraper::default()
        };
        let lp = build(answers.clone(), judge, scraper, 2);

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert_eq!(result.termination, TerminationReason::ScrapeUnavailable);
        assert_eq!(result.iterations_used, 2);
        assert!(result.reference.unavailable);
        assert_eq!(answers.calls(REWRITE), 0);
    }

    #[tokio::test]
    async fn slow_scrape_times_out_softly() {
        let answers = Arc::new(
            ScriptedModel::new().on(ANSWER, vec![answer("https://acme.com/ar-2023.pdf", 2023)]),
        );
        let judge = Arc::new(ScriptedModel::new().on(JUDGE, vec![accept()]));
        let scraper = FakeScraper {
            context: ReferenceContext {
                homepage: Some("https://acme.com/".into()),
                ..ReferenceContext::default()
            },
            delay: Duration::from_secs(30),
            ..FakeScraper::default()
        };
        let lp = RefinementLoop::new(
            answers,
            judge,
            Arc::new(scraper),
            &RunConfig {
                per_call_timeout: Duration::from_millis(50),
                ..config(2)
            },
        );

        let result = lp.run(acme(), &CancellationToken::new()).await;

        assert!(result.accepted);
        assert!(result.reference.unavailable);
        assert!(result.reference.homepage.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_after_current_iteration() {
        let cancel = CancellationToken::new();
        let answers = Arc::new(
            ScriptedModel::new()
                .on(ANSWER, vec![answer("https://acme.com/ar-2021.pdf", 2021)])
                .otherwise(REWRITE, rewrite("Acme Corp", "retry")),
        );
        let lp = RefinementLoop::new(
            answers.clone(),
            Arc::new(CancellingJudge(cancel.clone())),
            Arc::new(FakeScraper::default()),
            &config(3),
        );

        let result = lp.run(acme(), &cancel).await;

        assert_eq!(result.termination, TerminationReason::Cancelled);
        assert_eq!(result.iterations_used, 1);
        assert_eq!(answers.calls(ANSWER), 1);
        assert_eq!(answers.calls(REWRITE), 0);
        assert_eq!(result.answer.url.as_deref(), Some("https://acme.com/ar-2021.pdf"));
    }
}
