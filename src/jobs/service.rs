//! Job submission and read access for front ends.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, JobError, StoreError};
use crate::jobs::model::{AssetRole, Job, JobEvent, JobKind, JobStatus, asset_key};
use crate::store::traits::{AssetStore, JobStore};

/// A job as submitted, before it has an id.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub title: String,
    pub kind: JobKind,
    /// Raw uploads, stored as assets and referenced by key.
    pub attachments: Vec<(AssetRole, Vec<u8>)>,
}

#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobStore>,
    assets: Arc<dyn AssetStore>,
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobStore>, assets: Arc<dyn AssetStore>) -> Self {
        Self { jobs, assets }
    }

    /// Validate, store attachments, and persist a pending job.
    pub async fn submit(&self, request: NewJob) -> Result<Job, Error> {
        let NewJob {
            title,
            mut kind,
            attachments,
        } = request;

        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(JobError::InvalidRequest("title must not be empty".into()).into());
        }
        if kind.build_parts().is_empty() {
            return Err(JobError::InvalidRequest("job must have at least one part".into()).into());
        }

        let id = Uuid::new_v4();
        let mut thumbnail_key = None;
        for (role, bytes) in &attachments {
            if bytes.is_empty() {
                return Err(JobError::InvalidRequest(format!(
                    "{} attachment is empty",
                    role.as_str()
                ))
                .into());
            }
            let key = asset_key(id, *role);
            if *role == AssetRole::Thumbnail {
                thumbnail_key = Some(key);
            } else if !kind.attach(*role, key) {
                return Err(JobError::InvalidRequest(format!(
                    "{} jobs do not accept a {} attachment",
                    kind.type_tag(),
                    role.as_str()
                ))
                .into());
            }
        }

        for (role, bytes) in &attachments {
            self.assets.put_asset(&asset_key(id, *role), bytes).await?;
        }

        let mut job = Job::new(title, kind).with_id(id);
        job.thumbnail_key = thumbnail_key;
        self.jobs.create_job(&job).await?;

        info!(
            job_id = %job.id,
            kind = job.kind.type_tag(),
            parts = job.parts.len(),
            attachments = attachments.len(),
            "Job submitted"
        );
        Ok(job)
    }

    pub async fn list(&self) -> Result<Vec<Job>, Error> {
        Ok(self.jobs.list_jobs().await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, Error> {
        Ok(self.jobs.get_job(id).await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.jobs.subscribe()
    }

    pub async fn load_asset(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.assets.get_asset(key).await
    }

    /// Bytes for each result slot of a completed job.
    ///
    /// Gaps stay `None`, and so does a slot whose asset has since vanished.
    pub async fn result_media(&self, id: Uuid) -> Result<Vec<Option<Vec<u8>>>, Error> {
        let job = self.jobs.get_job(id).await?;
        if job.status != JobStatus::Completed {
            return Err(JobError::InvalidRequest(format!(
                "job {id} is {}, not completed",
                job.status
            ))
            .into());
        }

        let loads = job.result_keys.iter().map(|slot| async move {
            let key = slot.as_deref()?;
            match self.assets.get_asset(key).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(job_id = %id, key, error = %e, "Result asset unavailable");
                    None
                }
            }
        });
        Ok(join_all(loads).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{AspectRatio, Gender, JobPatch, TaskHandle, UgcVideoDetails};
    use crate::store::LibSqlBackend;

    async fn service() -> (JobService, Arc<LibSqlBackend>) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        (JobService::new(store.clone(), store.clone()), store)
    }

    fn ugc(scripts: &[&str]) -> JobKind {
        JobKind::UgcVideo(UgcVideoDetails {
            product_description: "water bottle".into(),
            persona_description: "hiker".into(),
            interaction: "drinks".into(),
            vibe: "calm".into(),
            setting: "trail".into(),
            gender: Gender::Male,
            aspect_ratio: AspectRatio::Portrait,
            scripts: scripts.iter().map(|s| s.to_string()).collect(),
            model: None,
            product_image_key: None,
            logo_key: None,
        })
    }

    #[tokio::test]
    async fn submit_stores_attachments_by_key() {
        let (svc, store) = service().await;
        let job = svc
            .submit(NewJob {
                title: "  Bottle ad ".into(),
                kind: ugc(&["one", "two"]),
                attachments: vec![
                    (AssetRole::Thumbnail, vec![1]),
                    (AssetRole::ProductImage, vec![2, 2]),
                ],
            })
            .await
            .unwrap();

        assert_eq!(job.title, "Bottle ad");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.parts.len(), 2);
        let product_key = asset_key(job.id, AssetRole::ProductImage);
        assert_eq!(job.parts[0].image_key.as_deref(), Some(product_key.as_str()));
        assert_eq!(
            job.thumbnail_key,
            Some(asset_key(job.id, AssetRole::Thumbnail))
        );

        assert_eq!(store.get_asset(&product_key).await.unwrap(), vec![2, 2]);
        assert_eq!(svc.get(job.id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn submit_rejects_invalid_requests() {
        let (svc, _) = service().await;

        let err = svc
            .submit(NewJob {
                title: " ".into(),
                kind: ugc(&["x"]),
                attachments: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job(JobError::InvalidRequest(_))));

        let err = svc
            .submit(NewJob {
                title: "no parts".into(),
                kind: ugc(&[]),
                attachments: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job(JobError::InvalidRequest(_))));

        let err = svc
            .submit(NewJob {
                title: "wrong slot".into(),
                kind: ugc(&["x"]),
                attachments: vec![(AssetRole::ReferenceImage, vec![1])],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job(JobError::InvalidRequest(_))));

        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn result_media_resolves_slots() {
        let (svc, store) = service().await;
        let job = svc
            .submit(NewJob {
                title: "three".into(),
                kind: ugc(&["a", "b", "c"]),
                attachments: vec![],
            })
            .await
            .unwrap();

        store.claim_pending(job.id).await.unwrap();
        store
            .update_job(
                job.id,
                JobPatch::dispatched(vec![
                    TaskHandle::new("1"),
                    TaskHandle::new("2"),
                    TaskHandle::new("3"),
                ]),
            )
            .await
            .unwrap();
        store.put_asset("k0", b"zero").await.unwrap();
        store
            .update_job(
                job.id,
                JobPatch::completed(vec![Some("k0".into()), None, Some("gone".into())]),
            )
            .await
            .unwrap();

        let media = svc.result_media(job.id).await.unwrap();
        assert_eq!(media, vec![Some(b"zero".to_vec()), None, None]);
    }

    #[tokio::test]
    async fn result_media_requires_completion() {
        let (svc, _) = service().await;
        let job = svc
            .submit(NewJob {
                title: "pending".into(),
                kind: ugc(&["a"]),
                attachments: vec![],
            })
            .await
            .unwrap();
        assert!(svc.result_media(job.id).await.is_err());
    }
}
