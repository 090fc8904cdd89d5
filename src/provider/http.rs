//! HTTP task-API provider.
//!
//! Talks to a generic asynchronous generation API:
//!
//! - `POST {base}/tasks` → `{ "data": { "taskId": "…" } }`
//! - `GET {base}/tasks/{id}` → `{ "data": { "state", "resultUrls"?, "failMsg"? } }`
//! - `GET <resultUrl>` → media bytes

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{DispatchError, DownloadError};
use crate::jobs::model::TaskHandle;
use crate::provider::{
    ErrorClass, MediaLocation, MediaPayload, PartRequest, PollOutcome, ProviderAdapter,
};

const PROVIDER_NAME: &str = "http";

/// Reason recorded when a task reports success but names no media.
pub const MISSING_OUTPUT_REASON: &str = "Generation finished, but no output location was returned";

pub struct HttpTaskProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskBody<'a> {
    model: &'a str,
    prompt: &'a str,
    aspect_ratio: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedTask {
    #[serde(default)]
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskStatus {
    state: String,
    #[serde(default)]
    result_urls: Vec<String>,
    #[serde(default)]
    fail_msg: Option<String>,
}

impl HttpTaskProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DispatchError::Transport {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    /// Whether `url` is served by the provider itself, and so may see the API key.
    fn is_provider_origin(&self, url: &str) -> bool {
        match (reqwest::Url::parse(url), reqwest::Url::parse(&self.config.base_url)) {
            (Ok(target), Ok(base)) => target.origin() == base.origin(),
            _ => false,
        }
    }

    fn task_url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/tasks/{id}", self.config.base_url),
            None => format!("{}/tasks", self.config.base_url),
        }
    }

    fn transport(e: reqwest::Error) -> DispatchError {
        DispatchError::Transport {
            provider: PROVIDER_NAME.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpTaskProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn create_task(&self, request: &PartRequest) -> Result<TaskHandle, DispatchError> {
        let body = CreateTaskBody {
            model: request.spec.model.as_deref().unwrap_or(&self.config.model),
            prompt: &request.spec.prompt,
            aspect_ratio: request.spec.aspect_ratio.as_str(),
            image_base64: request.image.as_ref().map(|bytes| BASE64.encode(bytes)),
        };

        let resp = self
            .client
            .post(self.task_url(None))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DispatchError::Unauthorized {
                provider: PROVIDER_NAME.to_string(),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<Envelope<serde_json::Value>>(&text)
                .ok()
                .and_then(|env| env.msg)
                .unwrap_or_else(|| format!("Task creation failed with HTTP {status}: {text}"));
            return Err(DispatchError::Rejected {
                provider: PROVIDER_NAME.to_string(),
                reason,
            });
        }

        let envelope: Envelope<CreatedTask> =
            resp.json().await.map_err(|e| DispatchError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: e.to_string(),
            })?;

        match envelope.data {
            Some(task) if !task.task_id.is_empty() => {
                debug!(task_id = %task.task_id, "Provider task created");
                Ok(TaskHandle::new(task.task_id))
            }
            _ => Err(DispatchError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: envelope
                    .msg
                    .unwrap_or_else(|| "response carried no task id".to_string()),
            }),
        }
    }

    async fn poll_task(&self, handle: &TaskHandle) -> PollOutcome {
        if handle.as_str().trim().is_empty() {
            return PollOutcome::Failed {
                reason: "Invalid task handle".to_string(),
                class: ErrorClass::Permanent,
            };
        }

        let resp = match self
            .client
            .get(self.task_url(Some(handle.as_str())))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(task_id = %handle, error = %e, "Provider poll request failed");
                return PollOutcome::Failed {
                    reason: e.to_string(),
                    class: ErrorClass::Transient,
                };
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return PollOutcome::failed(
                Some(status.as_u16()),
                format!("Polling task {handle} returned HTTP {status}: {text}"),
            );
        }

        let envelope: Envelope<TaskStatus> = match resp.json().await {
            Ok(env) => env,
            Err(e) => {
                return PollOutcome::Failed {
                    reason: format!("Unreadable task status: {e}"),
                    class: ErrorClass::Transient,
                };
            }
        };
        let Some(task) = envelope.data else {
            return PollOutcome::failed(
                None,
                envelope
                    .msg
                    .unwrap_or_else(|| "Task status response was empty".to_string()),
            );
        };

        match task.state.to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "completed" => match task.result_urls.into_iter().next() {
                Some(url) => PollOutcome::Succeeded {
                    location: MediaLocation::new(url),
                },
                None => PollOutcome::Failed {
                    reason: MISSING_OUTPUT_REASON.to_string(),
                    class: ErrorClass::Permanent,
                },
            },
            "fail" | "failed" | "error" => PollOutcome::failed(
                None,
                task.fail_msg
                    .unwrap_or_else(|| "Generation failed".to_string()),
            ),
            _ => PollOutcome::Pending,
        }
    }

    async fn fetch_media(&self, location: &MediaLocation) -> Result<MediaPayload, DownloadError> {
        let mut request = self.client.get(location.as_str());
        if self.is_provider_origin(location.as_str()) {
            request = request.bearer_auth(self.config.api_key.expose_secret());
        } else {
            debug!(url = location.as_str(), "Fetching media from third-party host without credentials");
        }
        let resp = request
            .send()
            .await
            .map_err(|e| DownloadError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                status: status.as_u16(),
            });
        }

        let content_length = resp.content_length();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| DownloadError::Request(e.to_string()))?;

        Ok(MediaPayload {
            bytes: bytes.to_vec(),
            content_length,
        })
    }
}
