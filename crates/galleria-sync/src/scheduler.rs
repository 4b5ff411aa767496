//! Job scheduling across owners and collections.
//!
//! ## Overview
//!
//! A [`SyncScheduler`] owns a queue of [`SyncJob`]s, one per (owner,
//! collection) pair, and runs them on a bounded pool of tokio tasks. Each
//! job is one call to [`CollectionSyncPlanner::run`]; pages within a job
//! are sequential, jobs run in parallel.
//!
//! ## Ordering
//!
//! Higher priorities run first. Within a priority tier owners take turns,
//! so one owner with many collections cannot starve the others.
//!
//! ## Failures
//!
//! | class | effect |
//! |---|---|
//! | transient | job re-queued after an exponential backoff, up to the retry cap |
//! | permanent | job failed |
//! | halt owner | every queued and running job of the owner is halted |
//! | store | job failed, flagged to retry on the next run |
//! | cancelled | job cancelled |
//! | panic | job failed, flagged to retry on the next run |
//!
//! A retried job resumes from its last committed page.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use galleria_core::{CollectionType, ItemId, OutcomeTally, PassMode};

use crate::error::FailureClass;
use crate::planner::{CollectionSyncPlanner, PassEnd, PassFailure, PassReport};
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryPolicy;

// ─────────────────────────────────────────────────────────────────────────────
// Jobs and configuration
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of work: a pass over one collection of one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub owner: String,
    pub collection: CollectionType,
    /// Higher runs first.
    pub priority: u8,
    /// Run a full pass even if one completed before.
    pub force_full: bool,
}

impl SyncJob {
    pub fn new(owner: impl Into<String>, collection: CollectionType) -> Self {
        Self {
            owner: owner.into(),
            collection,
            priority: 0,
            force_full: false,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn full(mut self) -> Self {
        self.force_full = true;
        self
    }

    fn key(&self) -> (String, CollectionType) {
        (self.owner.clone(), self.collection)
    }
}

/// Configuration for a scheduler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of jobs running at once.
    pub workers: usize,
    /// Limits for the shared request limiter.
    pub rate_limit: RateLimitConfig,
    /// Backoff for transient failures.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Final state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Succeeded,
    Failed {
        /// The failure is not the job's fault; the next run should retry it.
        retry_next_pass: bool,
    },
    /// The owner was halted by an authorization failure.
    Halted,
    Cancelled,
}

/// Why an owner was halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    Authorization,
    AccountDisabled,
}

/// Where a job stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLocation {
    pub page: u32,
    pub item: Option<ItemId>,
}

/// Outcome of one job across all its attempts.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: SyncJob,
    pub status: JobStatus,
    /// Number of times the job was started.
    pub attempts: u32,
    pub mode: Option<PassMode>,
    /// Outcomes committed across all attempts, plus the failing item of
    /// the last one.
    pub tally: OutcomeTally,
    pub end: Option<PassEnd>,
    pub stopped_at: Option<StopLocation>,
    pub error: Option<String>,
    pub class: Option<FailureClass>,
}

/// Everything a scheduler run did.
#[derive(Debug, Clone, Default)]
pub struct SchedulerReport {
    /// One report per job, in completion order.
    pub jobs: Vec<JobReport>,
    pub halted_owners: Vec<(String, HaltReason)>,
}

impl SchedulerReport {
    pub fn job(&self, owner: &str, collection: CollectionType) -> Option<&JobReport> {
        self.jobs
            .iter()
            .find(|r| r.job.owner == owner && r.job.collection == collection)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|r| r.status == JobStatus::Succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs
            .iter()
            .filter(|r| matches!(r.status, JobStatus::Failed { .. }))
    }

    pub fn is_halted(&self, owner: &str) -> bool {
        self.halted_owners.iter().any(|(o, _)| o == owner)
    }

    /// Outcomes of every job combined.
    pub fn totals(&self) -> OutcomeTally {
        let mut totals = OutcomeTally::default();
        for report in &self.jobs {
            totals.merge(report.tally.clone());
        }
        totals
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// A job plus what its earlier attempts left behind.
#[derive(Debug)]
struct QueuedJob {
    job: SyncJob,
    attempts: u32,
    retries: u32,
    tally: OutcomeTally,
}

impl QueuedJob {
    fn new(job: SyncJob) -> Self {
        Self {
            job,
            attempts: 0,
            retries: 0,
            tally: OutcomeTally::default(),
        }
    }

    fn report(self, status: JobStatus) -> JobReport {
        JobReport {
            job: self.job,
            status,
            attempts: self.attempts,
            mode: None,
            tally: self.tally,
            end: None,
            stopped_at: None,
            error: None,
            class: None,
        }
    }
}

/// Owners of one priority, served in turn.
#[derive(Debug, Default)]
struct Tier {
    owners: VecDeque<String>,
    jobs: HashMap<String, VecDeque<QueuedJob>>,
}

/// Priority tiers of per-owner job lists.
#[derive(Debug, Default)]
struct JobQueue {
    tiers: BTreeMap<Reverse<u8>, Tier>,
    queued: HashSet<(String, CollectionType)>,
}

impl JobQueue {
    /// Enqueue a job unless the same (owner, collection) is already queued.
    fn push(&mut self, queued: QueuedJob) -> bool {
        if !self.queued.insert(queued.job.key()) {
            return false;
        }
        let tier = self.tiers.entry(Reverse(queued.job.priority)).or_default();
        let jobs = tier.jobs.entry(queued.job.owner.clone()).or_default();
        if jobs.is_empty() {
            tier.owners.push_back(queued.job.owner.clone());
        }
        jobs.push_back(queued);
        true
    }

    /// The next job of the next owner in the highest non-empty tier.
    fn pop(&mut self) -> Option<QueuedJob> {
        let mut entry = self.tiers.first_entry()?;
        let tier = entry.get_mut();

        let owner = tier.owners.pop_front()?;
        let jobs = tier.jobs.get_mut(&owner)?;
        let next = jobs.pop_front();
        if jobs.is_empty() {
            tier.jobs.remove(&owner);
        } else {
            tier.owners.push_back(owner);
        }
        if tier.owners.is_empty() {
            entry.remove();
        }

        let next = next?;
        self.queued.remove(&next.job.key());
        Some(next)
    }

    /// Take every queued job of `owner`.
    fn remove_owner(&mut self, owner: &str) -> Vec<QueuedJob> {
        let mut removed = Vec::new();
        for tier in self.tiers.values_mut() {
            tier.owners.retain(|o| o != owner);
            if let Some(jobs) = tier.jobs.remove(owner) {
                removed.extend(jobs);
            }
        }
        self.tiers.retain(|_, tier| !tier.owners.is_empty());
        for queued in &removed {
            self.queued.remove(&queued.job.key());
        }
        removed
    }

    fn drain(&mut self) -> Vec<QueuedJob> {
        let mut drained = Vec::new();
        while let Some(queued) = self.pop() {
            drained.push(queued);
        }
        drained
    }

    fn len(&self) -> usize {
        self.queued.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// A job back from its task. The inner error means the pass panicked.
type Finished = (QueuedJob, Result<Result<PassReport, PassFailure>, JoinError>);

/// A delayed retry either comes due or is called off.
type Delayed = Result<QueuedJob, QueuedJob>;

/// Runs queued jobs on a bounded worker pool.
pub struct SyncScheduler {
    planner: Arc<CollectionSyncPlanner>,
    config: SchedulerConfig,
    queue: JobQueue,
    cancel: CancellationToken,
}

impl SyncScheduler {
    pub fn new(planner: Arc<CollectionSyncPlanner>, config: SchedulerConfig) -> Self {
        Self {
            planner,
            config,
            queue: JobQueue::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel the run through `cancel` instead of an internal token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the whole run.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue a job. Returns `false` if the same owner and collection is
    /// already queued.
    pub fn submit(&mut self, job: SyncJob) -> bool {
        self.queue.push(QueuedJob::new(job))
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Run every queued job to completion, or until cancelled.
    pub async fn run(mut self) -> SchedulerReport {
        let workers = self.config.workers.max(1);
        let mut running: JoinSet<Finished> = JoinSet::new();
        let mut delayed: JoinSet<Delayed> = JoinSet::new();
        let mut owner_tokens: HashMap<String, CancellationToken> = HashMap::new();
        let mut report = SchedulerReport::default();

        tracing::info!(jobs = self.queue.len(), workers, "scheduler started");

        loop {
            while !self.cancel.is_cancelled() && running.len() < workers {
                let Some(mut queued) = self.queue.pop() else {
                    break;
                };
                if report.is_halted(&queued.job.owner) {
                    report.jobs.push(queued.report(JobStatus::Halted));
                    continue;
                }

                queued.attempts += 1;
                let token = owner_tokens
                    .entry(queued.job.owner.clone())
                    .or_insert_with(|| self.cancel.child_token())
                    .clone();
                let span = tracing::info_span!(
                    "sync_job",
                    owner = %queued.job.owner,
                    collection = %queued.job.collection,
                    attempt = queued.attempts,
                );
                let planner = self.planner.clone();
                let job = queued.job.clone();
                running.spawn(
                    async move {
                        // A panicking pass must not take the job's report with it
                        let pass = tokio::spawn(
                            async move {
                                planner
                                    .run(&job.owner, job.collection, job.force_full, token)
                                    .await
                            }
                            .in_current_span(),
                        );
                        (queued, pass.await)
                    }
                    .instrument(span),
                );
            }

            if running.is_empty()
                && delayed.is_empty()
                && (self.queue.len() == 0 || self.cancel.is_cancelled())
            {
                break;
            }

            tokio::select! {
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    match joined {
                        Ok((queued, Ok(result))) => {
                            self.finish(queued, result, &mut delayed, &owner_tokens, &mut report);
                        }
                        Ok((queued, Err(e))) => {
                            tracing::error!(
                                owner = %queued.job.owner,
                                collection = %queued.job.collection,
                                error = %e,
                                "sync job panicked"
                            );
                            let mut failed = queued.report(JobStatus::Failed { retry_next_pass: true });
                            failed.error = Some(e.to_string());
                            report.jobs.push(failed);
                        }
                        Err(e) => tracing::error!(error = %e, "sync job task failed"),
                    }
                }
                Some(joined) = delayed.join_next(), if !delayed.is_empty() => {
                    match joined {
                        Ok(Ok(queued)) if !report.is_halted(&queued.job.owner) => {
                            self.queue.push(queued);
                        }
                        Ok(Ok(queued)) => report.jobs.push(queued.report(JobStatus::Halted)),
                        Ok(Err(queued)) => {
                            let status = if report.is_halted(&queued.job.owner) {
                                JobStatus::Halted
                            } else {
                                JobStatus::Cancelled
                            };
                            report.jobs.push(queued.report(status));
                        }
                        Err(e) => tracing::error!(error = %e, "retry task failed"),
                    }
                }
                else => break,
            }
        }

        for queued in self.queue.drain() {
            report.jobs.push(queued.report(JobStatus::Cancelled));
        }

        tracing::info!(
            jobs = report.jobs.len(),
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            halted = report.halted_owners.len(),
            "scheduler finished"
        );
        report
    }

    /// Settle a finished attempt: report it or schedule a retry.
    fn finish(
        &mut self,
        mut queued: QueuedJob,
        result: Result<PassReport, PassFailure>,
        delayed: &mut JoinSet<Delayed>,
        owner_tokens: &HashMap<String, CancellationToken>,
        report: &mut SchedulerReport,
    ) {
        let failure = match result {
            Ok(pass) => {
                queued.tally.merge(pass.tally);
                let mut job = queued.report(JobStatus::Succeeded);
                job.mode = Some(pass.mode);
                job.end = pass.end;
                report.jobs.push(job);
                return;
            }
            Err(failure) => failure,
        };

        let class = failure.error.class();
        let PassFailure {
            page,
            item,
            error,
            report: mut pass,
        } = failure;

        if class == FailureClass::Transient {
            if let Some(delay) = self.config.retry.delay_for(queued.retries) {
                tracing::warn!(
                    owner = %queued.job.owner,
                    collection = %queued.job.collection,
                    page,
                    retry = queued.retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient failure, retrying"
                );
                // The failing item is retried, not failed
                pass.tally.failed.clear();
                queued.tally.merge(pass.tally);
                queued.retries += 1;

                let token = owner_tokens
                    .get(&queued.job.owner)
                    .cloned()
                    .unwrap_or_else(|| self.cancel.child_token());
                delayed.spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => Ok(queued),
                        _ = token.cancelled() => Err(queued),
                    }
                });
                return;
            }
        }

        let status = match class {
            FailureClass::Transient | FailureClass::StoreFailure => JobStatus::Failed {
                retry_next_pass: true,
            },
            FailureClass::Permanent => JobStatus::Failed {
                retry_next_pass: false,
            },
            FailureClass::HaltOwner => {
                let reason = if error.is_account_disabled() {
                    HaltReason::AccountDisabled
                } else {
                    HaltReason::Authorization
                };
                self.halt_owner(&queued.job.owner, reason, owner_tokens, report);
                JobStatus::Halted
            }
            FailureClass::Cancelled if report.is_halted(&queued.job.owner) => JobStatus::Halted,
            FailureClass::Cancelled => JobStatus::Cancelled,
        };

        if class != FailureClass::Cancelled {
            tracing::warn!(
                owner = %queued.job.owner,
                collection = %queued.job.collection,
                page,
                attempts = queued.attempts,
                %error,
                "job failed"
            );
        }

        queued.tally.merge(pass.tally);
        let mut job = queued.report(status);
        job.mode = Some(pass.mode);
        job.stopped_at = Some(StopLocation { page, item });
        job.error = Some(error.to_string());
        job.class = Some(class);
        report.jobs.push(job);
    }

    /// Stop all work for `owner`: running jobs are cancelled, queued jobs
    /// are reported as halted.
    fn halt_owner(
        &mut self,
        owner: &str,
        reason: HaltReason,
        owner_tokens: &HashMap<String, CancellationToken>,
        report: &mut SchedulerReport,
    ) {
        if report.is_halted(owner) {
            return;
        }
        tracing::warn!(owner, reason = ?reason, "owner halted");
        report.halted_owners.push((owner.to_string(), reason));

        if let Some(token) = owner_tokens.get(owner) {
            token.cancel();
        }
        for queued in self.queue.remove_owner(owner) {
            report.jobs.push(queued.report(JobStatus::Halted));
        }
    }
}
