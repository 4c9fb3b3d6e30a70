use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::StoreError;

/// Opaque per-instance credential material owned by the session library.
/// The bridge never looks inside; it only persists and replays it so a
/// restart can reconnect silently without re-pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle(pub serde_json::Value);

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, instance_id: &str) -> Result<Option<CredentialBundle>, StoreError>;
    async fn save(&self, instance_id: &str, bundle: &CredentialBundle) -> Result<(), StoreError>;
    /// Deleting a missing bundle is not an error.
    async fn delete(&self, instance_id: &str) -> Result<(), StoreError>;
}

/// Filesystem-backed store: one JSON bundle per instance id under the
/// configured sessions directory.
pub struct FileCredentialStore {
    base_path: PathBuf,
}

impl FileCredentialStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn sanitize_filename(key: &str) -> String {
        key.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_")
    }

    fn bundle_path(&self, instance_id: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.json", Self::sanitize_filename(instance_id)))
    }

    async fn read_json(&self, path: &Path) -> Result<Option<CredentialBundle>, StoreError> {
        match fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, instance_id: &str) -> Result<Option<CredentialBundle>, StoreError> {
        self.read_json(&self.bundle_path(instance_id)).await
    }

    async fn save(&self, instance_id: &str, bundle: &CredentialBundle) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(bundle)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(self.bundle_path(instance_id), data)
            .await
            .map_err(StoreError::Io)
    }

    async fn delete(&self, instance_id: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.bundle_path(instance_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryCredentialStore {
    bundles: dashmap::DashMap<String, CredentialBundle>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.bundles.contains_key(instance_id)
    }

    pub fn seed(&self, instance_id: &str, bundle: CredentialBundle) {
        self.bundles.insert(instance_id.to_string(), bundle);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, instance_id: &str) -> Result<Option<CredentialBundle>, StoreError> {
        Ok(self.bundles.get(instance_id).map(|b| b.clone()))
    }

    async fn save(&self, instance_id: &str, bundle: &CredentialBundle) -> Result<(), StoreError> {
        self.bundles
            .insert(instance_id.to_string(), bundle.clone());
        Ok(())
    }

    async fn delete(&self, instance_id: &str) -> Result<(), StoreError> {
        self.bundles.remove(instance_id);
        Ok(())
    }
}
