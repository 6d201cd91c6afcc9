use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::application::repos::{MediaStorage, StoreError};
use crate::cache::mutex_lock;
use crate::domain::uploads::{MediaFile, UploadedMedia};

const SOURCE: &str = "infra::memory::media";
const MEDIA_COLLECTION: &str = "media";

/// Metadata kept for every stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub name: String,
    pub content_type: String,
    pub size_bytes: usize,
    pub checksum: String,
}

#[derive(Debug, Default)]
struct MediaState {
    files: HashMap<String, StoredMedia>,
    fail_upload: Option<StoreError>,
    fail_remove: Option<StoreError>,
    uploads: usize,
    removals: usize,
}

/// In-process [`MediaStorage`] that keeps file metadata and checksums only.
#[derive(Debug)]
pub struct MemoryMediaStorage {
    base_url: String,
    state: Mutex<MediaState>,
}

impl MemoryMediaStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: Mutex::new(MediaState::default()),
        }
    }

    pub fn fail_next_upload(&self, error: StoreError) {
        mutex_lock(&self.state, SOURCE, "fail_next_upload").fail_upload = Some(error);
    }

    pub fn fail_next_remove(&self, error: StoreError) {
        mutex_lock(&self.state, SOURCE, "fail_next_remove").fail_remove = Some(error);
    }

    pub fn contains(&self, id: &str) -> bool {
        mutex_lock(&self.state, SOURCE, "contains")
            .files
            .contains_key(id)
    }

    pub fn file(&self, id: &str) -> Option<StoredMedia> {
        mutex_lock(&self.state, SOURCE, "file").files.get(id).cloned()
    }

    pub fn file_count(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "file_count").files.len()
    }

    /// Upload attempts, failed ones included.
    pub fn uploads(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "uploads").uploads
    }

    /// Removal attempts, failed ones included.
    pub fn removals(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "removals").removals
    }

    fn url_for(&self, id: &str) -> String {
        format!("{}/{id}", self.base_url)
    }
}

impl Default for MemoryMediaStorage {
    fn default() -> Self {
        Self::new("memory://media")
    }
}

#[async_trait]
impl MediaStorage for MemoryMediaStorage {
    async fn upload(&self, file: MediaFile) -> Result<UploadedMedia, StoreError> {
        let mut state = mutex_lock(&self.state, SOURCE, "upload");
        state.uploads += 1;
        if let Some(error) = state.fail_upload.take() {
            return Err(error);
        }

        let mut hasher = Sha256::new();
        hasher.update(&file.data);
        let checksum = hex::encode(hasher.finalize());
        let id = Uuid::new_v4().simple().to_string();
        state.files.insert(
            id.clone(),
            StoredMedia {
                name: file.name.clone(),
                content_type: file.content_type.clone(),
                size_bytes: file.size_bytes(),
                checksum,
            },
        );
        debug!(media_id = %id, name = %file.name, "Stored media");

        let url = self.url_for(&id);
        Ok(UploadedMedia { id, url })
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut state = mutex_lock(&self.state, SOURCE, "remove");
        state.removals += 1;
        if let Some(error) = state.fail_remove.take() {
            return Err(error);
        }
        match state.files.remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                collection: MEDIA_COLLECTION.to_string(),
                id: id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_records_checksum_and_url() {
        let storage = MemoryMediaStorage::new("https://cdn.test/");

        let uploaded = storage
            .upload(MediaFile::new("a.png", b"abc".to_vec()))
            .await
            .unwrap();

        assert_eq!(uploaded.url, format!("https://cdn.test/{}", uploaded.id));
        let stored = storage.file(&uploaded.id).unwrap();
        assert_eq!(
            stored.checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(stored.size_bytes, 3);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let storage = MemoryMediaStorage::default();
        storage.fail_next_upload(StoreError::transient("quota"));

        assert!(storage.upload(MediaFile::new("a.png", vec![1])).await.is_err());
        let uploaded = storage
            .upload(MediaFile::new("a.png", vec![1]))
            .await
            .unwrap();

        storage.fail_next_remove(StoreError::transient("busy"));
        assert!(storage.remove(&uploaded.id).await.is_err());
        assert!(storage.contains(&uploaded.id));
        assert!(storage.remove(&uploaded.id).await.is_ok());
        assert_eq!(storage.file_count(), 0);
        assert_eq!(storage.uploads(), 2);
        assert_eq!(storage.removals(), 2);
    }
}
