//! Artifact stores: local directory and plain HTTP, both verifying `sha256:` refs.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::ArtifactError;
use crate::model::ArtifactRef;
use crate::store::ArtifactStore;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

pub fn digest_ref(bytes: &[u8]) -> ArtifactRef { ArtifactRef(format!("{}{}", ArtifactRef::DIGEST_PREFIX, sha256_hex(bytes))) }

/// No-op for refs that are not content addressed.
pub fn verify_digest(artifact_ref: &ArtifactRef, bytes: &[u8]) -> Result<(), ArtifactError> {
    if let Some(expect) = artifact_ref.digest() {
        let got = sha256_hex(bytes);
        if !expect.eq_ignore_ascii_case(&got) {
            return Err(ArtifactError::DigestMismatch { reference: artifact_ref.0.clone(), actual: got });
        }
    }
    Ok(())
}

/// Relative object key for a ref; digest refs map to their hex digest.
fn object_key(artifact_ref: &ArtifactRef) -> Result<PathBuf, ArtifactError> {
    let raw = artifact_ref.digest().unwrap_or(artifact_ref.as_str());
    let raw = raw.strip_prefix("file://").unwrap_or(raw);
    let key = PathBuf::from(raw);
    if raw.is_empty() || key.components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(ArtifactError::InvalidRef(artifact_ref.0.clone()));
    }
    Ok(key)
}

#[derive(Debug, Clone)]
pub struct FsArtifactStore { root: PathBuf }

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    pub fn root(&self) -> &Path { &self.root }

    /// Write bytes under their digest and return the content-addressed ref.
    pub async fn put(&self, bytes: &[u8]) -> Result<ArtifactRef, ArtifactError> {
        let r = digest_ref(bytes);
        let path = self.root.join(object_key(&r)?);
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| ArtifactError::Unavailable(e.to_string()))?;
        tokio::fs::write(&path, bytes).await.map_err(|e| ArtifactError::Unavailable(e.to_string()))?;
        Ok(r)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn fetch(&self, artifact_ref: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        let path = self.root.join(object_key(artifact_ref)?);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ArtifactError::NotFound(artifact_ref.0.clone())),
            Err(e) => return Err(ArtifactError::Unavailable(format!("{}: {e}", path.display()))),
        };
        verify_digest(artifact_ref, &bytes)?;
        Ok(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArtifactStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ArtifactError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| ArtifactError::Unavailable(e.to_string()))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    fn url_for(&self, artifact_ref: &ArtifactRef) -> Result<String, ArtifactError> {
        let key = object_key(artifact_ref)?;
        Ok(format!("{}/{}", self.base_url, key.to_string_lossy()))
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn fetch(&self, artifact_ref: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        let url = self.url_for(artifact_ref)?;
        let resp = self.client.get(&url).send().await.map_err(|e| ArtifactError::Unavailable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ArtifactError::NotFound(artifact_ref.0.clone()));
        }
        let resp = resp.error_for_status().map_err(|e| ArtifactError::Unavailable(e.to_string()))?;
        let bytes = resp.bytes().await.map_err(|e| ArtifactError::Unavailable(e.to_string()))?.to_vec();
        verify_digest(artifact_ref, &bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modelops-artifacts-{tag}-{}", uuid::Uuid::new_v4().simple()))
    }

    #[tokio::test]
    async fn fs_store_round_trip_and_digest_check() {
        let store = FsArtifactStore::new(scratch_dir("rt"));
        let r = store.put(b"{\"kind\":\"linear\"}").await.unwrap();
        assert_eq!(store.fetch(&r).await.unwrap(), b"{\"kind\":\"linear\"}".to_vec());

        // corrupt the blob on disk
        let path = store.root().join(r.digest().unwrap());
        tokio::fs::write(&path, b"tampered").await.unwrap();
        assert!(matches!(store.fetch(&r).await, Err(ArtifactError::DigestMismatch { .. })));
        let _ = tokio::fs::remove_dir_all(store.root()).await;
    }

    #[tokio::test]
    async fn fs_store_missing_blob_is_not_found() {
        let store = FsArtifactStore::new(scratch_dir("missing"));
        let r = ArtifactRef::new("models/none.json");
        assert!(matches!(store.fetch(&r).await, Err(ArtifactError::NotFound(_))));
    }

    #[test]
    fn parent_traversal_is_rejected() {
        assert!(matches!(object_key(&ArtifactRef::new("../etc/passwd")), Err(ArtifactError::InvalidRef(_))));
        assert!(matches!(object_key(&ArtifactRef::new("/abs/path")), Err(ArtifactError::InvalidRef(_))));
        assert_eq!(object_key(&ArtifactRef::new("file://models/v1.json")).unwrap(), PathBuf::from("models/v1.json"));
    }

    #[test]
    fn http_url_uses_digest_key() {
        let store = HttpArtifactStore::new("http://artifacts.local/blobs/", Duration::from_secs(1)).unwrap();
        assert_eq!(store.url_for(&ArtifactRef::new("sha256:ab12")).unwrap(), "http://artifacts.local/blobs/ab12");
    }
}
