//! Filesystem asset store: one file per key under a root directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::store::traits::AssetStore;

pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    /// Use `root` as the asset directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its file path. Keys must be a single plain file name.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    async fn put_asset(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        // Write then rename so readers never see a partial file
        let tmp = self.root.join(format!(".{key}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, size = bytes.len(), "Asset written");
        Ok(())
    }

    async fn get_asset(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::asset_not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_asset(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAssetStore::new(dir.path().join("assets")).unwrap();

        store.put_asset("job_0", b"video").await.unwrap();
        assert_eq!(store.get_asset("job_0").await.unwrap(), b"video");

        store.put_asset("job_0", b"replaced").await.unwrap();
        assert_eq!(store.get_asset("job_0").await.unwrap(), b"replaced");

        assert!(store.delete_asset("job_0").await.unwrap());
        assert!(!store.delete_asset("job_0").await.unwrap());
        assert!(store.get_asset("job_0").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn rejects_keys_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAssetStore::new(dir.path()).unwrap();

        for key in ["../escape", "a/b", "", ".hidden", "..", "c:\\x"] {
            let err = store.put_asset(key, b"x").await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "key {key:?}");
        }
    }
}
