//! End-to-end sweep scenarios against an in-memory store and a scripted
//! provider.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use creations::config::OrchestratorConfig;
use creations::error::{DispatchError, DownloadError};
use creations::jobs::model::{
    AspectRatio, Job, JobEvent, JobKind, JobStatus, PromoVideoDetails, TaskHandle, part_key,
};
use creations::orchestrator::{NO_PARTS_MESSAGE, NO_USABLE_OUTPUT_MESSAGE, Orchestrator};
use creations::provider::{
    ErrorClass, MediaLocation, MediaPayload, PartRequest, PollOutcome, ProviderAdapter,
};
use creations::store::{AssetStore, JobStore, LibSqlBackend};

// ── Scripted provider ───────────────────────────────────────────────

/// Provider whose every answer is set up by the test.
///
/// Tasks are named `task-0`, `task-1`, … in creation order. Poll scripts
/// repeat their last entry once exhausted; fetch scripts fall back to 404.
#[derive(Default)]
struct ScriptedProvider {
    created: AtomicUsize,
    fetches: AtomicUsize,
    create_delay: Option<Duration>,
    rejections: Mutex<HashMap<usize, String>>,
    polls: Mutex<HashMap<String, VecDeque<PollOutcome>>>,
    media: Mutex<HashMap<String, VecDeque<Result<MediaPayload, DownloadError>>>>,
}

impl ScriptedProvider {
    fn reject_call(self, call: usize, reason: &str) -> Self {
        self.rejections
            .lock()
            .unwrap()
            .insert(call, reason.to_string());
        self
    }

    fn polls(self, task: &str, outcomes: Vec<PollOutcome>) -> Self {
        self.polls
            .lock()
            .unwrap()
            .insert(task.to_string(), outcomes.into());
        self
    }

    fn media(self, location: &str, results: Vec<Result<MediaPayload, DownloadError>>) -> Self {
        self.media
            .lock()
            .unwrap()
            .insert(location.to_string(), results.into());
        self
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_task(&self, _request: &PartRequest) -> Result<TaskHandle, DispatchError> {
        let call = self.created.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.rejections.lock().unwrap().get(&call) {
            return Err(DispatchError::Rejected {
                provider: "scripted".into(),
                reason: reason.clone(),
            });
        }
        Ok(TaskHandle::new(format!("task-{call}")))
    }

    async fn poll_task(&self, handle: &TaskHandle) -> PollOutcome {
        let mut polls = self.polls.lock().unwrap();
        match polls.get_mut(handle.as_str()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(PollOutcome::Pending),
            None => PollOutcome::Pending,
        }
    }

    async fn fetch_media(&self, location: &MediaLocation) -> Result<MediaPayload, DownloadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.media
            .lock()
            .unwrap()
            .get_mut(location.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or(Err(DownloadError::Status { status: 404 }))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn succeeded(location: &str) -> PollOutcome {
    PollOutcome::Succeeded {
        location: MediaLocation::new(location),
    }
}

fn transient(reason: &str) -> PollOutcome {
    PollOutcome::Failed {
        reason: reason.to_string(),
        class: ErrorClass::Transient,
    }
}

fn permanent(reason: &str) -> PollOutcome {
    PollOutcome::Failed {
        reason: reason.to_string(),
        class: ErrorClass::Permanent,
    }
}

fn video(bytes: &[u8]) -> Result<MediaPayload, DownloadError> {
    Ok(MediaPayload {
        bytes: bytes.to_vec(),
        content_length: Some(bytes.len() as u64),
    })
}

fn promo_job(parts: usize) -> Job {
    Job::new(
        "Product teaser",
        JobKind::PromoVideo(PromoVideoDetails {
            prompts: (0..parts).map(|i| format!("scene {i}")).collect(),
            aspect_ratio: AspectRatio::Portrait,
            video_style: "Cinematic".into(),
            pacing: "Normal Pacing".into(),
            reference_image_key: None,
        }),
    )
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        download_retry_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

struct Harness {
    store: Arc<LibSqlBackend>,
    provider: Arc<ScriptedProvider>,
    orchestrator: Arc<Orchestrator>,
}

async fn harness(provider: ScriptedProvider, config: OrchestratorConfig) -> Harness {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let provider = Arc::new(provider);
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store.clone(),
        provider.clone(),
        config,
    ));
    Harness {
        store,
        provider,
        orchestrator,
    }
}

impl Harness {
    async fn submit(&self, job: &Job) {
        self.store.create_job(job).await.unwrap();
    }

    async fn job(&self, job: &Job) -> Job {
        self.store.get_job(job.id).await.unwrap()
    }
}

fn drain(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Pending => 0,
        JobStatus::Generating => 1,
        JobStatus::Completed | JobStatus::Failed => 2,
    }
}

// ── Round trip ──────────────────────────────────────────────────────

#[tokio::test]
async fn single_part_round_trip() {
    let provider = ScriptedProvider::default()
        .polls("task-0", vec![succeeded("cdn://0")])
        .media("cdn://0", vec![video(b"mp4-bytes")]);
    let h = harness(provider, test_config()).await;
    let job = promo_job(1);
    h.submit(&job).await;

    let report = h.orchestrator.sweep().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.completed, 1);

    let done = h.job(&job).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.handles.len(), done.parts.len());
    assert_eq!(done.result_keys, vec![Some(part_key(job.id, 0))]);
    assert!(done.error.is_none());
    assert_eq!(
        h.store.get_asset(&part_key(job.id, 0)).await.unwrap(),
        b"mp4-bytes"
    );
}

#[tokio::test]
async fn settled_job_is_left_alone() {
    let provider = ScriptedProvider::default()
        .polls("task-0", vec![succeeded("cdn://0")])
        .media("cdn://0", vec![video(b"v")]);
    let h = harness(provider, test_config()).await;
    let job = promo_job(1);
    h.submit(&job).await;
    h.orchestrator.sweep().await;

    let mut rx = h.store.subscribe();
    let report = h.orchestrator.sweep().await;
    assert!(report.is_idle());
    assert!(drain(&mut rx).is_empty());
    assert_eq!(h.provider.created(), 1);
    assert_eq!(h.provider.fetches(), 1);
}

// ── Scenario A: permanent failure on one part ───────────────────────

#[tokio::test]
async fn permanent_poll_failure_fails_job_without_assembly() {
    let provider = ScriptedProvider::default()
        .polls("task-0", vec![succeeded("cdn://0")])
        .polls("task-1", vec![permanent("not found")])
        .media("cdn://0", vec![video(b"first")]);
    let h = harness(provider, test_config()).await;
    let job = promo_job(2);
    h.submit(&job).await;

    h.orchestrator.sweep().await;

    let failed = h.job(&job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("not found"));
    assert_eq!(failed.result_keys, vec![None, None]);
    assert_eq!(h.provider.fetches(), 0);
}

#[tokio::test]
async fn permanent_failure_waits_for_pending_parts() {
    let provider = ScriptedProvider::default()
        .polls("task-0", vec![PollOutcome::Pending, succeeded("cdn://0")])
        .polls("task-1", vec![permanent("not found")])
        .media("cdn://0", vec![video(b"first")]);
    let h = harness(provider, test_config()).await;
    let job = promo_job(2);
    h.submit(&job).await;

    let report = h.orchestrator.sweep().await;
    assert_eq!(report.in_progress, 1);
    let waiting = h.job(&job).await;
    assert_eq!(waiting.status, JobStatus::Generating);
    assert!(waiting.error.is_none());

    h.orchestrator.sweep().await;
    let failed = h.job(&job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("not found"));
    assert_eq!(failed.result_keys, vec![None, None]);
    assert_eq!(h.provider.fetches(), 0);
}

#[tokio::test]
async fn permanent_failure_waits_for_transient_parts() {
    let provider = ScriptedProvider::default()
        .polls("task-0", vec![permanent("content policy")])
        .polls("task-1", vec![transient("HTTP 503"), succeeded("cdn://1")]);
    let h = harness(provider, test_config()).await;
    let job = promo_job(2);
    h.submit(&job).await;

    h.orchestrator.sweep().await;
    assert_eq!(h.job(&job).await.status, JobStatus::Generating);

    h.orchestrator.sweep().await;
    let failed = h.job(&job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("content policy"));
    assert_eq!(failed.result_keys.len(), failed.parts.len());
}

// ── Scenario B: transient errors then success ───────────────────────

#[tokio::test]
async fn transient_poll_errors_are_retried_silently() {
    let provider = ScriptedProvider::default()
        .polls(
            "task-0",
            vec![
                transient("HTTP 503"),
                transient("Internal error"),
                transient("server error"),
                succeeded("cdn://0"),
            ],
        )
        .media("cdn://0", vec![video(b"late")]);
    let h = harness(provider, test_config()).await;
    let job = promo_job(1);
    let mut rx = h.store.subscribe();
    h.submit(&job).await;

    h.orchestrator.sweep().await;
    assert_eq!(h.job(&job).await.status, JobStatus::Generating);
    let mut statuses: Vec<JobStatus> = drain(&mut rx).iter().map(JobEvent::status).collect();

    for sweep in 2..=3 {
        let before = h.job(&job).await;
        h.orchestrator.sweep().await;
        let after = h.job(&job).await;
        assert_eq!(after.status, JobStatus::Generating, "sweep {sweep}");
        assert_eq!(after.updated_at, before.updated_at, "sweep {sweep}");
        assert!(drain(&mut rx).is_empty(), "sweep {sweep} emitted an event");
    }

    h.orchestrator.sweep().await;
    let done = h.job(&job).await;
    assert_eq!(done.status, JobStatus::Completed);
    statuses.extend(drain(&mut rx).iter().map(JobEvent::status));

    assert_eq!(statuses.first(), Some(&JobStatus::Pending));
    assert_eq!(statuses.last(), Some(&JobStatus::Completed));
    assert!(
        statuses.windows(2).all(|w| rank(w[0]) <= rank(w[1])),
        "status went backwards: {statuses:?}"
    );
}

// ── Scenario C: every download attempt fails ────────────────────────

#[tokio::test]
async fn failed_downloads_fail_the_job() {
    let provider = ScriptedProvider::default()
        .polls("task-0", vec![succeeded("cdn://0")])
        .media(
            "cdn://0",
            vec![
                Err(DownloadError::Request("connection reset".into())),
                video(b""),
                Err(DownloadError::Status { status: 500 }),
            ],
        );
    let h = harness(provider, test_config()).await;
    let job = promo_job(1);
    h.submit(&job).await;

    h.orchestrator.sweep().await;

    let failed = h.job(&job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some(NO_USABLE_OUTPUT_MESSAGE));
    assert_eq!(failed.result_keys, vec![None]);
    assert_eq!(h.provider.fetches(), 3);
}

// ── Scenario D: partial success ─────────────────────────────────────

#[tokio::test]
async fn partial_downloads_complete_with_gaps() {
    let provider = ScriptedProvider::default()
        .polls("task-0", vec![succeeded("cdn://0")])
        .polls("task-1", vec![succeeded("cdn://1")])
        .polls("task-2", vec![succeeded("cdn://2")])
        .media("cdn://1", vec![video(b"middle")]);
    let h = harness(provider, test_config()).await;
    let job = promo_job(3);
    h.submit(&job).await;

    h.orchestrator.sweep().await;

    let done = h.job(&job).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(
        done.result_keys,
        vec![None, Some(part_key(job.id, 1)), None]
    );
    assert!(done.error.is_none());
    // 3 attempts each for the two missing parts, 1 for the good one
    assert_eq!(h.provider.fetches(), 7);
}

// ── Dispatch ────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_sweeps_dispatch_once() {
    let provider = ScriptedProvider {
        create_delay: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let h = harness(provider, test_config()).await;
    let job = promo_job(2);
    h.submit(&job).await;

    let (a, b) = tokio::join!(h.orchestrator.sweep(), h.orchestrator.sweep());

    assert_eq!(h.provider.created(), 2);
    assert_eq!(a.dispatched + b.dispatched, 1);
    let current = h.job(&job).await;
    assert_eq!(current.status, JobStatus::Generating);
    assert_eq!(current.handles.len(), 2);
}

#[tokio::test]
async fn rejected_part_stops_dispatch() {
    let provider = ScriptedProvider::default().reject_call(1, "Prompt violates content policy");
    let h = harness(provider, test_config()).await;
    let job = promo_job(3);
    h.submit(&job).await;

    let report = h.orchestrator.sweep().await;
    assert_eq!(report.failed, 1);

    let failed = h.job(&job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("Prompt violates content policy")
    );
    assert!(failed.handles.is_empty());
    assert_eq!(failed.result_keys, vec![None, None, None]);
    assert_eq!(h.provider.created(), 2);
}

#[tokio::test]
async fn missing_reference_image_fails_dispatch() {
    let h = harness(ScriptedProvider::default(), test_config()).await;
    let mut job = promo_job(1);
    job.parts[0].image_key = Some("nowhere_referenceImage".into());
    h.submit(&job).await;

    h.orchestrator.sweep().await;

    let failed = h.job(&job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("nowhere_referenceImage"));
    assert_eq!(h.provider.created(), 0);
}

#[tokio::test]
async fn job_without_parts_fails() {
    let h = harness(ScriptedProvider::default(), test_config()).await;
    let job = promo_job(0);
    h.submit(&job).await;

    h.orchestrator.sweep().await;

    let failed = h.job(&job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some(NO_PARTS_MESSAGE));
    assert_eq!(failed.result_keys.len(), failed.parts.len());
}

// ── Timeout ─────────────────────────────────────────────────────────

#[tokio::test]
async fn stuck_job_times_out() {
    let config = OrchestratorConfig {
        generation_timeout: Some(Duration::from_millis(50)),
        ..test_config()
    };
    let h = harness(ScriptedProvider::default(), config).await;
    let job = promo_job(1);
    h.submit(&job).await;

    h.orchestrator.sweep().await;
    assert_eq!(h.job(&job).await.status, JobStatus::Generating);

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.orchestrator.sweep().await;

    let failed = h.job(&job).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.result_keys, vec![None]);
    assert!(failed.error.unwrap().starts_with("Generation timed out"));
}

#[tokio::test]
async fn timeout_disabled_keeps_waiting() {
    let config = OrchestratorConfig {
        generation_timeout: None,
        ..test_config()
    };
    let h = harness(ScriptedProvider::default(), config).await;
    let job = promo_job(1);
    h.submit(&job).await;

    h.orchestrator.sweep().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = h.orchestrator.sweep().await;

    assert_eq!(report.in_progress, 1);
    assert_eq!(h.job(&job).await.status, JobStatus::Generating);
}
