//! libSQL backend: async `JobStore` and `AssetStore` implementation.
//!
//! Supports local file and in-memory databases. Job metadata and asset blobs
//! live in separate tables so listing jobs never reads media.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::model::{Job, JobEvent, JobKind, JobPatch, JobStatus, PartSpec, TaskHandle};
use crate::store::events::JobEventBus;
use crate::store::migrations;
use crate::store::traits::{AssetStore, JobStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    events: JobEventBus,
    /// Serializes read-modify-write job updates within this process.
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            events: JobEventBus::default(),
            write_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_jobs(
        &self,
        sql: &str,
        args: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Job>, StoreError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| StoreError::Query(format!("{op}: {e}")))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("{op}: {e}")))?
        {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Column list for job queries, in `row_to_job` order.
const JOB_COLUMNS: &str = "id, title, details, status, parts, handles, result_keys, error, thumbnail_key, created_at, updated_at, dispatched_at";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<String>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Serialization(format!("Failed to encode {what}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, StoreError> {
    serde_json::from_str(s)
        .map_err(|e| StoreError::Serialization(format!("Failed to decode {what}: {e}")))
}

/// Map a libsql Row to a Job.
///
/// Column order matches JOB_COLUMNS:
/// 0:id, 1:title, 2:details, 3:status, 4:parts, 5:handles, 6:result_keys,
/// 7:error, 8:thumbnail_key, 9:created_at, 10:updated_at, 11:dispatched_at
fn row_to_job(row: &libsql::Row) -> Result<Job, StoreError> {
    let col = |e: libsql::Error| StoreError::Query(format!("row_to_job: {e}"));

    let id_str: String = row.get(0).map_err(col)?;
    let title: String = row.get(1).map_err(col)?;
    let details: String = row.get(2).map_err(col)?;
    let status_str: String = row.get(3).map_err(col)?;
    let parts: String = row.get(4).map_err(col)?;
    let handles: String = row.get(5).map_err(col)?;
    let result_keys: String = row.get(6).map_err(col)?;
    let error: Option<String> = row.get(7).ok();
    let thumbnail_key: Option<String> = row.get(8).ok();
    let created_str: String = row.get(9).map_err(col)?;
    let updated_str: String = row.get(10).map_err(col)?;
    let dispatched_str: Option<String> = row.get(11).ok();

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| StoreError::Serialization(format!("Invalid job id {id_str}: {e}")))?;
    let status: JobStatus = status_str.parse().map_err(StoreError::Serialization)?;

    Ok(Job {
        id,
        title,
        kind: from_json::<JobKind>(&details, "job details")?,
        status,
        parts: from_json::<Vec<PartSpec>>(&parts, "parts")?,
        handles: from_json::<Vec<TaskHandle>>(&handles, "handles")?,
        result_keys: from_json::<Vec<Option<String>>>(&result_keys, "result keys")?,
        error,
        thumbnail_key,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        dispatched_at: dispatched_str.as_deref().map(parse_datetime),
    })
}

// ── JobStore ────────────────────────────────────────────────────────

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO creation_jobs (id, title, kind, details, status, parts, handles, result_keys, error, thumbnail_key, created_at, updated_at, dispatched_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    job.id.to_string(),
                    job.title.clone(),
                    job.kind.type_tag(),
                    to_json(&job.kind, "job details")?,
                    job.status.as_str(),
                    to_json(&job.parts, "parts")?,
                    to_json(&job.handles, "handles")?,
                    to_json(&job.result_keys, "result keys")?,
                    opt_text(job.error.as_deref()),
                    opt_text(job.thumbnail_key.as_deref()),
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                    opt_text(job.dispatched_at.map(|t| t.to_rfc3339()).as_deref()),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_job: {e}")))?;

        if inserted == 0 {
            return Err(StoreError::Duplicate {
                entity: "job".to_string(),
                id: job.id.to_string(),
            });
        }

        debug!(job_id = %job.id, kind = job.kind.type_tag(), parts = job.parts.len(), "Job inserted into DB");
        self.events.publish(JobEvent::JobCreated {
            job_id: job.id,
            status: job.status,
        });
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM creation_jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_job(&row),
            Ok(None) => Err(StoreError::job_not_found(id)),
            Err(e) => Err(StoreError::Query(format!("get_job: {e}"))),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.query_jobs(
            &format!("SELECT {JOB_COLUMNS} FROM creation_jobs ORDER BY created_at DESC"),
            (),
            "list_jobs",
        )
        .await
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM creation_jobs WHERE status = ?1 ORDER BY created_at ASC"
            ),
            params![status.as_str()],
            "list_jobs_by_status",
        )
        .await
    }

    async fn update_job(&self, id: Uuid, patch: JobPatch) -> Result<Job, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut job = self.get_job(id).await?;
        let previous = job.status;
        job.apply(patch)?;

        // Guarded on the status we read so a writer in another process
        // can't be silently overwritten.
        let updated = self
            .conn()
            .execute(
                "UPDATE creation_jobs SET status = ?1, handles = ?2, result_keys = ?3, error = ?4, updated_at = ?5 WHERE id = ?6 AND status = ?7",
                params![
                    job.status.as_str(),
                    to_json(&job.handles, "handles")?,
                    to_json(&job.result_keys, "result keys")?,
                    opt_text(job.error.as_deref()),
                    job.updated_at.to_rfc3339(),
                    id.to_string(),
                    previous.as_str(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_job: {e}")))?;

        if updated == 0 {
            return Err(StoreError::Conflict(format!(
                "job {id} changed while it was being updated"
            )));
        }

        debug!(job_id = %id, from = %previous, to = %job.status, "Job updated in DB");
        self.events.publish(JobEvent::JobUpdated {
            job_id: id,
            status: job.status,
        });
        Ok(job)
    }

    async fn claim_pending(&self, id: Uuid) -> Result<bool, StoreError> {
        let now = Utc::now().to_rfc3339();
        let claimed = self
            .conn()
            .execute(
                "UPDATE creation_jobs SET status = 'generating', updated_at = ?1, dispatched_at = ?1 WHERE id = ?2 AND status = 'pending'",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("claim_pending: {e}")))?;

        if claimed == 0 {
            debug!(job_id = %id, "Job already claimed");
            return Ok(false);
        }

        self.events.publish(JobEvent::JobUpdated {
            job_id: id,
            status: JobStatus::Generating,
        });
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

// ── AssetStore ──────────────────────────────────────────────────────

#[async_trait]
impl AssetStore for LibSqlBackend {
    async fn put_asset(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO assets (key, data, size) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET data = excluded.data, size = excluded.size, created_at = datetime('now')",
                params![
                    key,
                    libsql::Value::Blob(bytes.to_vec()),
                    bytes.len() as i64
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("put_asset: {e}")))?;

        debug!(key, size = bytes.len(), "Asset stored");
        Ok(())
    }

    async fn get_asset(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT data FROM assets WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Query(format!("get_asset: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<Vec<u8>>(0)
                .map_err(|e| StoreError::Query(format!("get_asset row parse: {e}"))),
            Ok(None) => Err(StoreError::asset_not_found(key)),
            Err(e) => Err(StoreError::Query(format!("get_asset: {e}"))),
        }
    }

    async fn delete_asset(&self, key: &str) -> Result<bool, StoreError> {
        let count = self
            .conn()
            .execute("DELETE FROM assets WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Query(format!("delete_asset: {e}")))?;
        Ok(count > 0)
    }
}
