/// Artifact store collaborator - persistence for rendered visualizations
///
/// The engine hands decoded image bytes here and gets back the public
/// reference it embeds in the output record. Interpreter internals never
/// reach this boundary, and the engine never touches the filesystem
/// directly.
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `bytes` under `suggested_name` and return the public
    /// reference a client can fetch it by.
    async fn store(&self, bytes: &[u8], suggested_name: &str) -> Result<String>;
}

/// Filesystem-backed store. The root directory is created lazily on the
/// first write; `create_dir_all` is idempotent, so concurrent sessions
/// racing on creation are fine.
pub struct FsArtifactStore {
    root: PathBuf,
    public_prefix: String,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, bytes: &[u8], suggested_name: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create artifact root {}", self.root.display()))?;

        let path = self.root.join(suggested_name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write artifact {}", path.display()))?;

        debug!(artifact = %path.display(), size = bytes.len(), "Artifact stored");
        Ok(format!(
            "{}/{}",
            self.public_prefix.trim_end_matches('/'),
            suggested_name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_creates_root_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("visualizations");
        assert!(!root.exists());

        let store = FsArtifactStore::new(&root, "/storage/visualizations");
        let reference = store.store(b"png-bytes", "visual_abc.png").await.unwrap();

        assert_eq!(reference, "/storage/visualizations/visual_abc.png");
        let written = std::fs::read(root.join("visual_abc.png")).unwrap();
        assert_eq!(written, b"png-bytes");
    }

    #[tokio::test]
    async fn test_store_is_idempotent_on_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path(), "/storage/visualizations/");

        store.store(b"one", "a.png").await.unwrap();
        let reference = store.store(b"two", "b.png").await.unwrap();

        // Trailing slash on the prefix must not double up.
        assert_eq!(reference, "/storage/visualizations/b.png");
    }
}
