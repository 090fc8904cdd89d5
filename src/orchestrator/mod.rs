//! Sweep-driven orchestration of creation jobs.
//!
//! One sweep runs two phases:
//!
//! 1. **Dispatch**: claim each `pending` job and create one provider task
//!    per part, recording the handles.
//! 2. **Poll**: ask the provider about every handle of each `generating`
//!    job, then fail, wait, or assemble the results.
//!
//! A sweep never holds state between runs. Everything it needs is read back
//! from the job store, so sweeps may overlap or crash and resume.

pub mod assembly;
pub mod scheduler;

pub use scheduler::SweepScheduler;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{DispatchError, StoreError};
use crate::jobs::model::{Job, JobPatch, JobStatus, TaskHandle};
use crate::provider::{ErrorClass, MediaLocation, PartRequest, PollOutcome, ProviderAdapter};
use crate::store::traits::{AssetStore, JobStore};

/// Error recorded when no part produced usable media.
pub const NO_USABLE_OUTPUT_MESSAGE: &str =
    "Generation finished, but no output could be retrieved for any part";

/// Error recorded for a job with nothing to generate.
pub const NO_PARTS_MESSAGE: &str = "Job has no parts to generate";

/// Counts of what one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs whose tasks were all created this sweep.
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    /// Generating jobs left waiting on the provider.
    pub in_progress: usize,
    /// Jobs another sweep got to first.
    pub skipped: usize,
}

impl SweepReport {
    fn record(&mut self, step: Step) {
        match step {
            Step::Dispatched => self.dispatched += 1,
            Step::Completed => self.completed += 1,
            Step::Failed => self.failed += 1,
            Step::InProgress => self.in_progress += 1,
            Step::Skipped => self.skipped += 1,
        }
    }

    /// Whether the sweep changed nothing.
    pub fn is_idle(&self) -> bool {
        self.dispatched == 0 && self.completed == 0 && self.failed == 0
    }
}

/// What happened to one job in one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Dispatched,
    Completed,
    Failed,
    InProgress,
    Skipped,
}

pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    assets: Arc<dyn AssetStore>,
    provider: Arc<dyn ProviderAdapter>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        assets: Arc<dyn AssetStore>,
        provider: Arc<dyn ProviderAdapter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            jobs,
            assets,
            provider,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one dispatch phase followed by one poll phase.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        self.dispatch_pending(&mut report).await;
        self.poll_generating(&mut report).await;

        if report.is_idle() {
            debug!(in_progress = report.in_progress, "Sweep finished with no changes");
        } else {
            info!(
                dispatched = report.dispatched,
                completed = report.completed,
                failed = report.failed,
                in_progress = report.in_progress,
                "Sweep finished"
            );
        }
        report
    }

    // ── Dispatch ────────────────────────────────────────────────────

    async fn dispatch_pending(&self, report: &mut SweepReport) {
        let pending = match self.jobs.list_jobs_by_status(JobStatus::Pending).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to list pending jobs");
                return;
            }
        };

        let steps: Vec<Step> = stream::iter(pending)
            .map(|job| self.dispatch_job(job))
            .buffer_unordered(self.config.max_concurrent_jobs.max(1))
            .collect()
            .await;
        for step in steps {
            report.record(step);
        }
    }

    async fn dispatch_job(&self, job: Job) -> Step {
        match self.jobs.claim_pending(job.id).await {
            Ok(true) => {}
            Ok(false) => return Step::Skipped,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to claim job");
                return Step::Skipped;
            }
        }

        if job.parts.is_empty() {
            return self.settle(&job, JobPatch::failed(NO_PARTS_MESSAGE)).await;
        }

        let requests = match self.load_requests(&job).await {
            Ok(requests) => requests,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Reference asset unavailable");
                return self.settle(&job, JobPatch::failed(e.to_string())).await;
            }
        };

        // Sequential so the first rejection stops the rest
        let mut handles = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            match self.provider.create_task(request).await {
                Ok(handle) => {
                    debug!(job_id = %job.id, part = index, task_id = %handle, "Part dispatched");
                    handles.push(handle);
                }
                Err(e) => {
                    warn!(
                        job_id = %job.id,
                        part = index,
                        provider = self.provider.name(),
                        error = %e,
                        "Provider rejected part"
                    );
                    return self.settle(&job, JobPatch::failed(e.to_string())).await;
                }
            }
        }

        match self.jobs.update_job(job.id, JobPatch::dispatched(handles)).await {
            Ok(_) => {
                info!(job_id = %job.id, parts = job.parts.len(), "Job dispatched");
                Step::Dispatched
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record task handles");
                Step::InProgress
            }
        }
    }

    /// Build one provider request per part, loading each reference image once.
    async fn load_requests(&self, job: &Job) -> Result<Vec<PartRequest>, DispatchError> {
        let mut images: HashMap<&str, Vec<u8>> = HashMap::new();
        for key in job.parts.iter().filter_map(|p| p.image_key.as_deref()) {
            if images.contains_key(key) {
                continue;
            }
            let bytes = self.assets.get_asset(key).await.map_err(|e| match e {
                StoreError::NotFound { .. } => DispatchError::MissingAsset {
                    key: key.to_string(),
                },
                other => DispatchError::Transport {
                    provider: "asset-store".to_string(),
                    reason: other.to_string(),
                },
            })?;
            images.insert(key, bytes);
        }

        Ok(job
            .parts
            .iter()
            .map(|spec| PartRequest {
                spec: spec.clone(),
                image: spec
                    .image_key
                    .as_deref()
                    .and_then(|key| images.get(key).cloned()),
            })
            .collect())
    }

    // ── Poll ────────────────────────────────────────────────────────

    async fn poll_generating(&self, report: &mut SweepReport) {
        let generating = match self.jobs.list_jobs_by_status(JobStatus::Generating).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to list generating jobs");
                return;
            }
        };

        let steps: Vec<Step> = stream::iter(generating)
            .map(|job| self.poll_job(job))
            .buffer_unordered(self.config.max_concurrent_jobs.max(1))
            .collect()
            .await;
        for step in steps {
            report.record(step);
        }
    }

    async fn poll_job(&self, job: Job) -> Step {
        // Claimed but handles not recorded yet: a dispatch is in flight or died.
        if job.handles.is_empty() {
            return self.wait_or_time_out(&job).await;
        }

        let outcomes = join_all(job.handles.iter().map(|h| self.poll_handle(&job, h))).await;

        // Settle only once every part has a final answer
        if outcomes.iter().any(PollOutcome::is_unsettled) {
            return self.wait_or_time_out(&job).await;
        }

        if let Some(reason) = first_permanent_failure(&outcomes) {
            info!(job_id = %job.id, reason = %reason, "Provider reported permanent failure");
            return self.settle(&job, JobPatch::failed(reason)).await;
        }

        let locations: Option<Vec<MediaLocation>> = outcomes
            .into_iter()
            .map(|outcome| match outcome {
                PollOutcome::Succeeded { location } => Some(location),
                _ => None,
            })
            .collect();

        match locations {
            Some(locations) => {
                let keys = assembly::assemble(
                    job.id,
                    locations,
                    self.provider.as_ref(),
                    self.assets.as_ref(),
                    &self.config,
                )
                .await;
                if keys.iter().all(Option::is_none) {
                    self.settle(&job, JobPatch::failed(NO_USABLE_OUTPUT_MESSAGE))
                        .await
                } else {
                    self.settle(&job, JobPatch::completed(keys)).await
                }
            }
            None => self.wait_or_time_out(&job).await,
        }
    }

    async fn poll_handle(&self, job: &Job, handle: &TaskHandle) -> PollOutcome {
        let outcome = self.provider.poll_task(handle).await;
        if let PollOutcome::Failed {
            reason,
            class: ErrorClass::Transient,
        } = &outcome
        {
            warn!(job_id = %job.id, task_id = %handle, reason = %reason, "Transient poll error, will retry");
        }
        outcome
    }

    /// Leave an unsettled job alone unless it has run past the timeout.
    async fn wait_or_time_out(&self, job: &Job) -> Step {
        let Some(limit) = self.config.generation_timeout else {
            return Step::InProgress;
        };
        let started = job.dispatched_at.unwrap_or(job.updated_at);
        let elapsed = Utc::now().signed_duration_since(started);
        if elapsed.to_std().is_ok_and(|e| e > limit) {
            warn!(job_id = %job.id, elapsed_secs = elapsed.num_seconds(), "Generation timed out");
            let reason = format!("Generation timed out after {}s", limit.as_secs());
            return self.settle(job, JobPatch::failed(reason)).await;
        }
        Step::InProgress
    }

    // ── Terminal writes ─────────────────────────────────────────────

    /// Write a terminal patch. Losing the race to another sweep is not an error.
    async fn settle(&self, job: &Job, patch: JobPatch) -> Step {
        let target = patch.status;
        match self.jobs.update_job(job.id, patch).await {
            Ok(updated) => {
                match updated.status {
                    JobStatus::Completed => info!(
                        job_id = %job.id,
                        results = updated.result_keys.iter().flatten().count(),
                        parts = updated.parts.len(),
                        "Job completed"
                    ),
                    _ => info!(
                        job_id = %job.id,
                        error = updated.error.as_deref().unwrap_or_default(),
                        "Job failed"
                    ),
                }
                match target {
                    Some(JobStatus::Completed) => Step::Completed,
                    _ => Step::Failed,
                }
            }
            Err(StoreError::Conflict(reason)) => {
                debug!(job_id = %job.id, reason = %reason, "Job already settled elsewhere");
                Step::Skipped
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to settle job");
                Step::InProgress
            }
        }
    }
}

/// The first permanent failure in part order, if any.
fn first_permanent_failure(outcomes: &[PollOutcome]) -> Option<String> {
    outcomes.iter().find_map(|outcome| match outcome {
        PollOutcome::Failed {
            reason,
            class: ErrorClass::Permanent,
        } => Some(reason.clone()),
        _ => None,
    })
}
