//! Result assembly: download every finished part and store it.

use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::DownloadError;
use crate::jobs::model::part_key;
use crate::provider::{MediaLocation, ProviderAdapter};
use crate::store::traits::AssetStore;

/// Download all parts concurrently and store each under its part key.
///
/// The returned slots line up with `locations`. A part that could not be
/// fetched or stored leaves its slot `None`.
pub async fn assemble(
    job_id: Uuid,
    locations: Vec<MediaLocation>,
    provider: &dyn ProviderAdapter,
    assets: &dyn AssetStore,
    config: &OrchestratorConfig,
) -> Vec<Option<String>> {
    let downloads = locations.iter().enumerate().map(|(index, location)| async move {
        match store_part(job_id, index, location, provider, assets, config).await {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(job_id = %job_id, part = index, error = %e, "Giving up on part");
                None
            }
        }
    });
    join_all(downloads).await
}

async fn store_part(
    job_id: Uuid,
    index: usize,
    location: &MediaLocation,
    provider: &dyn ProviderAdapter,
    assets: &dyn AssetStore,
    config: &OrchestratorConfig,
) -> Result<String, DownloadError> {
    let bytes = download_with_retry(job_id, index, location, provider, config).await?;
    let key = part_key(job_id, index);
    assets.put_asset(&key, &bytes).await?;
    debug!(job_id = %job_id, part = index, size = bytes.len(), key = %key, "Part stored");
    Ok(key)
}

/// Fetch media, retrying up to `download_attempts` times with a fixed delay.
async fn download_with_retry(
    job_id: Uuid,
    index: usize,
    location: &MediaLocation,
    provider: &dyn ProviderAdapter,
    config: &OrchestratorConfig,
) -> Result<Vec<u8>, DownloadError> {
    let attempts = config.download_attempts.max(1);
    let mut last_err = DownloadError::Empty;

    for attempt in 1..=attempts {
        match download_once(location, provider).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    part = index,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Download attempt failed"
                );
                last_err = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.download_retry_delay).await;
        }
    }
    Err(last_err)
}

/// One attempt. The transfer must be non-empty and match any declared length.
async fn download_once(
    location: &MediaLocation,
    provider: &dyn ProviderAdapter,
) -> Result<Vec<u8>, DownloadError> {
    let media = provider.fetch_media(location).await?;
    if media.bytes.is_empty() {
        return Err(DownloadError::Empty);
    }
    if let Some(expected) = media.content_length {
        let received = media.bytes.len() as u64;
        if expected != received {
            return Err(DownloadError::LengthMismatch { expected, received });
        }
    }
    Ok(media.bytes)
}
