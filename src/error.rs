//! Error types for the creation-job orchestrator.

use uuid::Uuid;

use crate::jobs::model::JobStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job Store / Asset Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("{entity} already exists: {id}")]
    Duplicate { entity: String, id: String },

    #[error("Conflicting update: {0}")]
    Conflict(String),

    #[error("Invalid asset key: {0}")]
    InvalidKey(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn job_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "job".to_string(),
            id: id.to_string(),
        }
    }

    pub fn asset_not_found(key: &str) -> Self {
        Self::NotFound {
            entity: "asset".to_string(),
            id: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// The provider refused to create a generation task. Never retried.
///
/// The `Display` text is what ends up in a failed job's `error` field, so it
/// carries the provider's own message verbatim where there is one.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{reason}")]
    Rejected { provider: String, reason: String },

    #[error("Authorization failed for provider {provider}")]
    Unauthorized { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Request to {provider} failed: {reason}")]
    Transport { provider: String, reason: String },

    #[error("Reference asset {key} is missing")]
    MissingAsset { key: String },
}

/// Fetching finished media failed. Retried a bounded number of times.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Media request failed: {0}")]
    Request(String),

    #[error("Media request returned HTTP {status}")]
    Status { status: u16 },

    #[error("Media transfer was empty")]
    Empty,

    #[error("Media length mismatch: expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },

    #[error("Failed to store media: {0}")]
    Store(#[from] StoreError),
}

/// Job lifecycle and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Invalid update for job {id}: {reason}")]
    InvalidPatch { id: Uuid, reason: String },

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),
}

impl From<JobError> for StoreError {
    fn from(e: JobError) -> Self {
        StoreError::Conflict(e.to_string())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
