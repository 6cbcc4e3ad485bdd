use super::snapshot::DraftSnapshot;
use crate::capture::ArtifactRef;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Durable key-value storage for the single draft snapshot.
///
/// Persistence here is best-effort: callers log failures and keep recording.
#[async_trait::async_trait]
pub trait DraftStore: Send + Sync {
    async fn put(&self, snapshot: &DraftSnapshot) -> Result<()>;
    async fn get(&self) -> Result<Option<DraftSnapshot>>;
    async fn clear(&self) -> Result<()>;
}

/// Durable file storage for capture artifacts.
#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Copy a (possibly temporary) artifact into storage that survives app
    /// restarts and return the durable reference.
    async fn persist(&self, artifact: &ArtifactRef) -> Result<ArtifactRef>;
}

/// In-memory draft store for tests and wiring without a disk location.
#[derive(Default)]
pub struct MemoryDraftStore {
    slot: Mutex<Option<DraftSnapshot>>,
    puts: Mutex<usize>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls observed so far.
    pub async fn put_count(&self) -> usize {
        *self.puts.lock().await
    }
}

#[async_trait::async_trait]
impl DraftStore for MemoryDraftStore {
    async fn put(&self, snapshot: &DraftSnapshot) -> Result<()> {
        *self.puts.lock().await += 1;
        *self.slot.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn get(&self) -> Result<Option<DraftSnapshot>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

/// Draft store backed by a single JSON file.
pub struct FsDraftStore {
    path: PathBuf,
}

impl FsDraftStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait::async_trait]
impl DraftStore for FsDraftStore {
    async fn put(&self, snapshot: &DraftSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("failed to write draft to {}", self.path.display()))
    }

    async fn get(&self) -> Result<Option<DraftSnapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Artifact store that copies capture files into a durable directory.
///
/// The durable copy keeps the original file name, so repeated snapshots of
/// the same capture overwrite one copy instead of accumulating.
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait::async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn persist(&self, artifact: &ArtifactRef) -> Result<ArtifactRef> {
        let name = artifact
            .path()
            .file_name()
            .map(|n| n.to_owned())
            .unwrap_or_else(|| format!("capture-{}.wav", uuid::Uuid::new_v4()).into());
        let dest = self.dir.join(name);

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::copy(artifact.path(), &dest)
            .await
            .with_context(|| {
                format!(
                    "failed to copy artifact {} to {}",
                    artifact.path().display(),
                    dest.display()
                )
            })?;

        Ok(ArtifactRef(dest))
    }
}
