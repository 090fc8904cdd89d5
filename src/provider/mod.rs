//! Generation provider abstraction.
//!
//! A provider turns a part request into a remote task, reports on that task,
//! and serves the finished media. The orchestrator only ever talks to a
//! [`ProviderAdapter`] handed to it at construction.

pub mod http;

pub use http::HttpTaskProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DownloadError};
use crate::jobs::model::{PartSpec, TaskHandle};

/// Everything a provider needs to start generating one part.
#[derive(Debug, Clone)]
pub struct PartRequest {
    pub spec: PartSpec,
    /// Reference image bytes, already loaded from the asset store.
    pub image: Option<Vec<u8>>,
}

/// Where finished media can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLocation(pub String);

impl MediaLocation {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    /// Length the server declared, when it declared one.
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth asking again on the next sweep.
    Transient,
    /// The task is dead.
    Permanent,
}

/// State of a provider task as seen by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Succeeded { location: MediaLocation },
    Failed { reason: String, class: ErrorClass },
}

impl PollOutcome {
    /// A failure classified from its HTTP status and message.
    pub fn failed(status: Option<u16>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let class = classify_poll_error(status, &reason);
        PollOutcome::Failed { reason, class }
    }

    /// Whether this outcome leaves the part unsettled.
    pub fn is_unsettled(&self) -> bool {
        matches!(
            self,
            PollOutcome::Pending
                | PollOutcome::Failed {
                    class: ErrorClass::Transient,
                    ..
                }
        )
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Start generating one part. Errors are never retried.
    async fn create_task(&self, request: &PartRequest) -> Result<TaskHandle, DispatchError>;

    /// Report the task's state. Errors come back as `PollOutcome::Failed`.
    async fn poll_task(&self, handle: &TaskHandle) -> PollOutcome;

    /// Fetch finished media.
    async fn fetch_media(&self, location: &MediaLocation) -> Result<MediaPayload, DownloadError>;
}

/// Message tokens that mark a provider-side hiccup.
const TRANSIENT_TOKENS: &[&str] = &["500", "502", "503", "504", "internal", "unavailable"];

/// Multi-word transient phrases.
const TRANSIENT_PHRASES: &[&str] = &["server error", "timed out"];

/// Decide whether a poll failure is worth retrying.
///
/// With an HTTP status, 5xx is transient and anything else is permanent; the
/// message is not consulted. Without one, a message carrying a known
/// server-side signature is transient. Everything else (404, "not found",
/// malformed handles) is permanent.
pub fn classify_poll_error(status: Option<u16>, message: &str) -> ErrorClass {
    if let Some(status) = status {
        return if (500..600).contains(&status) {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        };
    }

    let lower = message.to_lowercase();
    let token_hit = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|tok| TRANSIENT_TOKENS.contains(&tok));
    if token_hit || TRANSIENT_PHRASES.iter().any(|p| lower.contains(p)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}
