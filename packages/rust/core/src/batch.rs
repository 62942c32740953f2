//! Batch coordination: many refinement loops under one concurrency cap.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use finsource_shared::{CompanyResult, CompanyTask, TerminationReason};

use crate::refine::RefinementLoop;

/// Observer for per-company lifecycle events. Called from worker tasks.
pub trait BatchProgress: Send + Sync {
    fn company_started(&self, _company: &CompanyTask) {}
    fn company_finished(&self, _result: &CompanyResult) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl BatchProgress for SilentProgress {}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Maximum number of companies in flight.
    pub concurrency: usize,
    /// Return results in input order instead of completion order.
    pub preserve_order: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            preserve_order: false,
        }
    }
}

/// Runs one [`RefinementLoop`] per company and gathers exactly one
/// [`CompanyResult`] for each input, whatever happens to the worker.
pub struct BatchCoordinator {
    refinement: Arc<RefinementLoop>,
    options: BatchOptions,
    progress: Arc<dyn BatchProgress>,
}

impl BatchCoordinator {
    pub fn new(refinement: Arc<RefinementLoop>, options: BatchOptions) -> Self {
        Self {
            refinement,
            options,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn BatchProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Process `companies`. Cancelling `cancel` stops dispatch; companies
    /// already running finish their current iteration and report
    /// `cancelled`, companies never started are reported the same way with
    /// zero iterations.
    #[instrument(skip_all, fields(companies = companies.len(), concurrency = self.options.concurrency))]
    pub async fn run(
        &self,
        companies: Vec<CompanyTask>,
        cancel: &CancellationToken,
    ) -> Vec<CompanyResult> {
        let total = companies.len();
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut join_set = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, CompanyTask> = HashMap::new();
        let mut results: Vec<CompanyResult> = Vec::with_capacity(total);

        info!("batch starting");

        let mut pending = companies
            .into_iter()
            .enumerate()
            .map(|(index, company)| company.with_position(index));

        for company in pending.by_ref() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                results.push(self.not_started(company));
                break;
            };

            let refinement = self.refinement.clone();
            let progress = self.progress.clone();
            let token = cancel.clone();
            let task = company.clone();
            let handle = join_set.spawn(async move {
                let _permit = permit;
                progress.company_started(&task);
                let result = refinement.run(task, &token).await;
                progress.company_finished(&result);
                result
            });
            in_flight.insert(handle.id(), company);
        }

        for company in pending {
            results.push(self.not_started(company));
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    in_flight.remove(&id);
                    results.push(result);
                }
                Err(join_error) => {
                    let Some(company) = in_flight.remove(&join_error.id()) else {
                        error!(error = %join_error, "worker failed for an unknown company");
                        continue;
                    };
                    error!(company = %company.name, error = %join_error, "worker did not complete");
                    let result = CompanyResult::unexpected(
                        company,
                        format!("worker did not complete: {join_error}"),
                    );
                    self.progress.company_finished(&result);
                    results.push(result);
                }
            }
        }

        if self.options.preserve_order {
            results.sort_by_key(|r| r.company.position);
        }

        let accepted = results.iter().filter(|r| r.accepted).count();
        let cancelled = count(&results, TerminationReason::Cancelled);
        let failed = count(&results, TerminationReason::ModelError)
            + count(&results, TerminationReason::UnexpectedError);
        info!(total, accepted, cancelled, failed, "batch finished");

        results
    }

    fn not_started(&self, company: CompanyTask) -> CompanyResult {
        warn!(company = %company.name, "batch cancelled before company started");
        let result = CompanyResult::cancelled_before_start(company);
        self.progress.company_finished(&result);
        result
    }
}

fn count(results: &[CompanyResult], reason: TerminationReason) -> usize {
    results.iter().filter(|r| r.termination == reason).count()
}
