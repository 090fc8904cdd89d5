//! Storage traits: job metadata and binary assets are kept apart.
//!
//! Job records stay small (asset keys only); multi-megabyte payloads live
//! behind [`AssetStore`].

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::model::{Job, JobEvent, JobPatch, JobStatus};

/// Durable key → metadata storage for creation jobs.
///
/// Every successful mutation publishes exactly one [`JobEvent`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with `Duplicate` if the id exists.
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Point lookup. Fails with `NotFound`.
    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError>;

    /// All jobs, newest first.
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Jobs in one status, oldest first.
    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// Read-modify-write merge of `patch` into the stored job.
    ///
    /// Fails with `NotFound`, or `Conflict` if the patch breaks a lifecycle
    /// invariant or the record changed underneath.
    async fn update_job(&self, id: Uuid, patch: JobPatch) -> Result<Job, StoreError>;

    /// Atomically move a job from `pending` to `generating`.
    ///
    /// Returns `false` if the job was not `pending` (someone else claimed it).
    async fn claim_pending(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<JobEvent>;
}

/// Durable key → blob storage. Keys are chosen by the caller.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store or overwrite a blob.
    async fn put_asset(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Fetch a blob. Fails with `NotFound`.
    async fn get_asset(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Remove a blob. Returns whether it existed.
    async fn delete_asset(&self, key: &str) -> Result<bool, StoreError>;
}
