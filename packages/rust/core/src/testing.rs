//! Scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use finsource_model::{CompletionModel, ResponseSchema};
use finsource_scraper::ReferenceScraper;
use finsource_shared::{CompanyTask, ModelError, Reachability, ReferenceContext};

/// Replies per schema name, in order; falls back to a fixed reply once a
/// script runs dry. Records every prompt it receives.
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<HashMap<&'static str, VecDeque<Result<Value, ModelError>>>>,
    fallbacks: HashMap<&'static str, Result<Value, ModelError>>,
    prompts: Mutex<HashMap<&'static str, Vec<String>>>,
    delay: Duration,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, schema: &'static str, outcomes: Vec<Result<Value, ModelError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(schema)
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn otherwise(mut self, schema: &'static str, outcome: Result<Value, ModelError>) -> Self {
        self.fallbacks.insert(schema, outcome);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, schema: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .get(schema)
            .map_or(0, Vec::len)
    }

    pub fn total_calls(&self) -> usize {
        self.prompts.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn prompts(&self, schema: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .get(schema)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, prompt: &str, schema: &ResponseSchema) -> Result<Value, ModelError> {
        self.prompts
            .lock()
            .unwrap()
            .entry(schema.name)
            .or_default()
            .push(prompt.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(schema.name)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(outcome) => outcome,
            None => match self.fallbacks.get(schema.name) {
                Some(outcome) => outcome.clone(),
                None => panic!("no scripted reply for schema {}", schema.name),
            },
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Scraper returning a fixed context. Optionally slow, or panicking for one company.
#[derive(Default)]
pub struct FakeScraper {
    pub context: ReferenceContext,
    pub reachability: Option<Reachability>,
    pub delay: Duration,
    /// Restricts `delay` to this company when set.
    pub slow_for: Option<String>,
    pub panic_for: Option<String>,
}

#[async_trait]
impl ReferenceScraper for FakeScraper {
    async fn scrape(&self, company: &CompanyTask) -> ReferenceContext {
        if self.panic_for.as_deref() == Some(company.name.as_str()) {
            panic!("scraper blew up for {}", company.name);
        }
        let slow = self
            .slow_for
            .as_deref()
            .is_none_or(|name| name == company.name);
        if slow && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.context.clone()
    }

    async fn check_reachable(&self, _url: &str) -> Reachability {
        self.reachability
            .clone()
            .unwrap_or(Reachability::Reachable { status: 200 })
    }
}

/// Judge that cancels `token` while scoring, then rejects with a wrong year.
pub struct CancellingJudge(pub CancellationToken);

#[async_trait]
impl CompletionModel for CancellingJudge {
    async fn complete(&self, _prompt: &str, _schema: &ResponseSchema) -> Result<Value, ModelError> {
        self.0.cancel();
        verdict(true, true, false, false, "wrong year")
    }

    fn model_name(&self) -> &str {
        "cancelling"
    }
}

pub fn answer(url: &str, year: i32) -> Result<Value, ModelError> {
    Ok(json!({ "url": url, "fiscal_year": year }))
}

pub fn no_answer() -> Result<Value, ModelError> {
    Ok(json!({ "url": null, "fiscal_year": null }))
}

/// Judge reply with the given criteria; `accepted` is true when all hold.
pub fn verdict(
    url_valid: bool,
    url_specific: bool,
    year_correct: bool,
    year_recent: bool,
    feedback: &str,
) -> Result<Value, ModelError> {
    Ok(json!({
        "accepted": url_valid && url_specific && year_correct && year_recent,
        "url_valid": url_valid,
        "url_specific": url_specific,
        "year_correct": year_correct,
        "year_recent": year_recent,
        "feedback": feedback,
    }))
}

pub fn accept() -> Result<Value, ModelError> {
    verdict(true, true, true, true, "looks right")
}

/// A rewrite reply long enough to pass validation.
pub fn rewrite(company: &str, marker: &str) -> Result<Value, ModelError> {
    Ok(json!({
        "prompt": format!(
            "Find the latest annual report of {company} as a direct PDF link on its investor \
             relations site or at the regulator, and report the fiscal year. [{marker}]"
        )
    }))
}
