//! [`ArtifactStore`] backends: the filesystem and an in-memory map.

use crate::layout::{self, ArtifactLocation};
use crate::ArtifactStore;
use async_trait::async_trait;
use phoenix_core::error::{PhoenixError, PhoenixResult};
use phoenix_core::{JudgeRecord, RecordId, ResourceId, ResourceKind};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Stores artifacts under a root directory following [`ArtifactLocation`]'s
/// layout.
///
/// Each file is written to a temporary sibling and renamed into place, so a
/// reader never sees a partially written artifact under its final name.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, location: &ArtifactLocation) -> PathBuf {
        self.root.join(location.relative_path())
    }

    pub fn code_path_of(&self, record: &JudgeRecord) -> PathBuf {
        self.root.join(layout::code_path(record))
    }

    /// Writes `<dir>/<name>` through a temporary sibling.
    async fn write_atomic(
        &self,
        dir: &Path,
        name: &str,
        content: &[u8],
        what: &str,
    ) -> PhoenixResult<()> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            PhoenixError::Store(format!("Failed to create {}: {e}", dir.display()))
        })?;

        let tmp = dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| PhoenixError::Store(format!("Failed to write {what}: {e}")))?;
        if let Err(e) = tokio::fs::rename(&tmp, dir.join(name)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(PhoenixError::Store(format!(
                "Failed to move {what} into place: {e}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, location: &ArtifactLocation, content: &[u8]) -> PhoenixResult<()> {
        let dir = self
            .root
            .join(ArtifactLocation::version_dir(location.kind, location.id, location.version));
        self.write_atomic(&dir, &location.name, content, &location.to_string())
            .await?;
        tracing::debug!(%location, bytes = content.len(), "artifact written");
        Ok(())
    }

    async fn get(&self, location: &ArtifactLocation) -> PhoenixResult<Vec<u8>> {
        match tokio::fs::read(self.path_of(location)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PhoenixError::NotFound(
                format!("artifact {location}"),
            )),
            Err(e) => Err(PhoenixError::Store(format!("Failed to read {location}: {e}"))),
        }
    }

    async fn exists(&self, location: &ArtifactLocation) -> PhoenixResult<bool> {
        tokio::fs::try_exists(self.path_of(location))
            .await
            .map_err(|e| PhoenixError::Store(format!("Failed to stat {location}: {e}")))
    }

    async fn remove_version(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        version: u32,
    ) -> PhoenixResult<()> {
        let dir = self.root.join(ArtifactLocation::version_dir(kind, id, version));
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PhoenixError::Store(format!(
                "Failed to remove {}: {e}",
                dir.display()
            ))),
        }
    }

    async fn put_code(&self, record: &JudgeRecord, content: &[u8]) -> PhoenixResult<()> {
        let name = record.code_file_name();
        let what = format!("code {name}");
        self.write_atomic(&self.root.join(layout::CODE_DIR), &name, content, &what)
            .await?;
        tracing::debug!(record_id = %record.id, bytes = content.len(), "code written");
        Ok(())
    }

    async fn get_code(&self, record: &JudgeRecord) -> PhoenixResult<Vec<u8>> {
        let name = record.code_file_name();
        match tokio::fs::read(self.code_path_of(record)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PhoenixError::NotFound(format!("code {name}")))
            }
            Err(e) => Err(PhoenixError::Store(format!("Failed to read code {name}: {e}"))),
        }
    }

    async fn remove_code(&self, record: &JudgeRecord) -> PhoenixResult<()> {
        match tokio::fs::remove_file(self.code_path_of(record)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PhoenixError::Store(format!(
                "Failed to remove code {}: {e}",
                record.code_file_name()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Volatile artifact store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryArtifactStore {
    files: RwLock<BTreeMap<ArtifactLocation, Vec<u8>>>,
    code: RwLock<BTreeMap<RecordId, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts across all versions.
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    /// Number of stored code files.
    pub async fn code_len(&self) -> usize {
        self.code.read().await.len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, location: &ArtifactLocation, content: &[u8]) -> PhoenixResult<()> {
        self.files
            .write()
            .await
            .insert(location.clone(), content.to_vec());
        Ok(())
    }

    async fn get(&self, location: &ArtifactLocation) -> PhoenixResult<Vec<u8>> {
        self.files
            .read()
            .await
            .get(location)
            .cloned()
            .ok_or_else(|| PhoenixError::NotFound(format!("artifact {location}")))
    }

    async fn exists(&self, location: &ArtifactLocation) -> PhoenixResult<bool> {
        Ok(self.files.read().await.contains_key(location))
    }

    async fn remove_version(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        version: u32,
    ) -> PhoenixResult<()> {
        self.files
            .write()
            .await
            .retain(|l, _| !(l.kind == kind && l.id == id && l.version == version));
        Ok(())
    }

    async fn put_code(&self, record: &JudgeRecord, content: &[u8]) -> PhoenixResult<()> {
        self.code.write().await.insert(record.id, content.to_vec());
        Ok(())
    }

    async fn get_code(&self, record: &JudgeRecord) -> PhoenixResult<Vec<u8>> {
        self.code
            .read()
            .await
            .get(&record.id)
            .cloned()
            .ok_or_else(|| PhoenixError::NotFound(format!("code {}", record.code_file_name())))
    }

    async fn remove_code(&self, record: &JudgeRecord) -> PhoenixResult<()> {
        self.code.write().await.remove(&record.id);
        Ok(())
    }
}
