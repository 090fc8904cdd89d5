//! Creation job data model: jobs, kinds, parts, patches, and change events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// Lifecycle status of a creation job.
///
/// `Pending → Generating → {Completed | Failed}`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a sweep to dispatch it.
    Pending,
    /// Provider tasks have been (or are being) created.
    Generating,
    /// At least one part produced usable media.
    Completed,
    /// Terminal failure; `error` carries the reason.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    ///
    /// Staying in `Generating` is allowed so that handles can be recorded
    /// after the dispatch claim.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Generating)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Generating, JobStatus::Generating)
                | (JobStatus::Generating, JobStatus::Completed)
                | (JobStatus::Generating, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "generating" => Ok(JobStatus::Generating),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Portrait => "9:16",
            AspectRatio::Landscape => "16:9",
        }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::Portrait
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

/// Details for a persona-driven video: one script line per part, optionally
/// anchored on a product image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UgcVideoDetails {
    pub product_description: String,
    pub persona_description: String,
    pub interaction: String,
    pub vibe: String,
    pub setting: String,
    pub gender: Gender,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    /// One script per part, in playback order.
    pub scripts: Vec<String>,
    /// Provider model override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_key: Option<String>,
}

/// Details for a scene-prompt promo video: one prompt per part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoVideoDetails {
    pub prompts: Vec<String>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    pub video_style: String,
    pub pacing: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image_key: Option<String>,
}

/// What a job generates. The variant decides how the job splits into parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    UgcVideo(UgcVideoDetails),
    PromoVideo(PromoVideoDetails),
}

impl JobKind {
    /// The string tag stored in the DB `kind` column.
    pub fn type_tag(&self) -> &'static str {
        match self {
            JobKind::UgcVideo(_) => "ugc_video",
            JobKind::PromoVideo(_) => "promo_video",
        }
    }

    /// Decompose into ordered per-part generation inputs.
    pub fn build_parts(&self) -> Vec<PartSpec> {
        match self {
            JobKind::UgcVideo(d) => d
                .scripts
                .iter()
                .map(|script| PartSpec {
                    prompt: format!(
                        "Persona: {}. Action: {}. Dialogue: \"{}\". Vibe: {}. Setting: {}.",
                        d.persona_description, d.interaction, script, d.vibe, d.setting
                    ),
                    image_key: d.product_image_key.clone(),
                    aspect_ratio: d.aspect_ratio,
                    model: d.model.clone(),
                })
                .collect(),
            JobKind::PromoVideo(d) => d
                .prompts
                .iter()
                .map(|prompt| PartSpec {
                    prompt: format!(
                        "Concept: \"{}\". Style: {}. Pacing: {}.",
                        prompt, d.video_style, d.pacing
                    ),
                    image_key: d.reference_image_key.clone(),
                    aspect_ratio: d.aspect_ratio,
                    model: None,
                })
                .collect(),
        }
    }

    /// Record an uploaded attachment's key in the field that owns it.
    /// Returns `false` if this kind has no slot for `role`.
    pub fn attach(&mut self, role: AssetRole, key: String) -> bool {
        match (self, role) {
            (JobKind::UgcVideo(d), AssetRole::ProductImage) => {
                d.product_image_key = Some(key);
                true
            }
            (JobKind::UgcVideo(d), AssetRole::Logo) => {
                d.logo_key = Some(key);
                true
            }
            (JobKind::PromoVideo(d), AssetRole::ReferenceImage) => {
                d.reference_image_key = Some(key);
                true
            }
            _ => false,
        }
    }
}

/// One independently generated unit of media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartSpec {
    pub prompt: String,
    /// Asset Store key of the reference image, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    pub aspect_ratio: AspectRatio,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Opaque provider task handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(pub String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named single assets attached to a job at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetRole {
    #[serde(rename = "thumbnail")]
    Thumbnail,
    #[serde(rename = "productImage")]
    ProductImage,
    #[serde(rename = "logoImage")]
    Logo,
    #[serde(rename = "referenceImage")]
    ReferenceImage,
}

impl AssetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetRole::Thumbnail => "thumbnail",
            AssetRole::ProductImage => "productImage",
            AssetRole::Logo => "logoImage",
            AssetRole::ReferenceImage => "referenceImage",
        }
    }
}

/// `{jobId}_{role}`
pub fn asset_key(job_id: Uuid, role: AssetRole) -> String {
    format!("{job_id}_{}", role.as_str())
}

/// `{jobId}_{partIndex}`
pub fn part_key(job_id: Uuid, index: usize) -> String {
    format!("{job_id}_{index}")
}

/// A creation job record. Never holds binary payloads, only asset keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// The user's main prompt, for display.
    pub title: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub parts: Vec<PartSpec>,
    #[serde(default)]
    pub handles: Vec<TaskHandle>,
    #[serde(default)]
    pub result_keys: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the dispatch claim moved the job to `generating`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job; parts are derived from `kind`.
    pub fn new(title: impl Into<String>, kind: JobKind) -> Self {
        let now = Utc::now();
        let parts = kind.build_parts();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            kind,
            status: JobStatus::Pending,
            parts,
            handles: Vec::new(),
            result_keys: Vec::new(),
            error: None,
            thumbnail_key: None,
            created_at: now,
            updated_at: now,
            dispatched_at: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_thumbnail_key(mut self, key: impl Into<String>) -> Self {
        self.thumbnail_key = Some(key.into());
        self
    }

    /// Merge a patch into this record, enforcing the lifecycle invariants.
    ///
    /// On error `self` is left untouched.
    pub fn apply(&mut self, patch: JobPatch) -> Result<(), JobError> {
        let next_status = patch.status.unwrap_or(self.status);
        if next_status != self.status && !self.status.can_advance_to(next_status) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next_status,
            });
        }
        if self.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next_status,
            });
        }

        let handles = patch.handles.unwrap_or_else(|| self.handles.clone());
        let mut result_keys = patch.result_keys.unwrap_or_else(|| self.result_keys.clone());
        let error = patch.error.or_else(|| self.error.clone());

        // Terminal jobs carry one result slot per part
        if next_status == JobStatus::Failed && result_keys.len() < self.parts.len() {
            result_keys.resize(self.parts.len(), None);
        }

        if !handles.is_empty() && handles.len() != self.parts.len() {
            return Err(self.invalid(format!(
                "{} handles for {} parts",
                handles.len(),
                self.parts.len()
            )));
        }
        if next_status == JobStatus::Completed {
            if result_keys.len() != self.parts.len() {
                return Err(self.invalid(format!(
                    "{} result slots for {} parts",
                    result_keys.len(),
                    self.parts.len()
                )));
            }
            if result_keys.iter().all(Option::is_none) {
                return Err(self.invalid("completed job has no results".to_string()));
            }
            if error.as_deref().is_some_and(|e| !e.is_empty()) {
                return Err(self.invalid("completed job cannot carry an error".to_string()));
            }
        }
        if next_status == JobStatus::Failed && error.as_deref().is_none_or(str::is_empty) {
            return Err(self.invalid("failed job needs an error message".to_string()));
        }

        self.status = next_status;
        self.handles = handles;
        self.result_keys = result_keys;
        self.error = error;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn invalid(&self, reason: String) -> JobError {
        JobError::InvalidPatch {
            id: self.id,
            reason,
        }
    }
}

/// Partial update merged into an existing job by `JobStore::update_job`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub handles: Option<Vec<TaskHandle>>,
    pub result_keys: Option<Vec<Option<String>>>,
    pub error: Option<String>,
}

impl JobPatch {
    /// Provider tasks were created for every part.
    pub fn dispatched(handles: Vec<TaskHandle>) -> Self {
        Self {
            status: Some(JobStatus::Generating),
            handles: Some(handles),
            ..Default::default()
        }
    }

    pub fn completed(result_keys: Vec<Option<String>>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result_keys: Some(result_keys),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Change notification published by the Job Store on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    JobCreated { job_id: Uuid, status: JobStatus },
    JobUpdated { job_id: Uuid, status: JobStatus },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::JobCreated { job_id, .. } | Self::JobUpdated { job_id, .. } => *job_id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::JobCreated { status, .. } | Self::JobUpdated { status, .. } => *status,
        }
    }
}
