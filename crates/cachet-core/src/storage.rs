//! On-disk blob store. The server only ever sees ciphertext; blobs are
//! opaque byte ranges addressed by a relative path.
//!
//! Path convention:
//!   `users/{user_id}/files/{file_id}/current`      — live content
//!   `users/{user_id}/files/{file_id}/versions/{n}` — historical versions

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

pub fn file_current_path(user_id: &str, file_id: &str) -> String {
    format!("users/{user_id}/files/{file_id}/current")
}

pub fn file_version_path(user_id: &str, file_id: &str, version: i64) -> String {
    format!("users/{user_id}/files/{file_id}/versions/{version}")
}

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Blob storage directory: {}", root.display());
        Ok(Self { root })
    }

    fn full_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub async fn put(&self, rel: &str, data: &[u8]) -> Result<()> {
        let path = self.full_path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data)
            .await
            .with_context(|| format!("writing blob {rel}"))?;
        Ok(())
    }

    /// Open a blob for streaming reads.
    pub async fn open(&self, rel: &str) -> Result<fs::File> {
        let path = self.full_path(rel);
        fs::File::open(&path)
            .await
            .with_context(|| format!("opening blob {rel}"))
    }

    pub async fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self.full_path(rel);
        fs::read(&path)
            .await
            .with_context(|| format!("reading blob {rel}"))
    }

    /// Delete a blob. A missing blob is not an error — the database row is
    /// the source of truth for whether a file still exists.
    pub async fn delete(&self, rel: &str) -> Result<()> {
        let path = self.full_path(rel);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", rel);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort batch delete: failures are logged, not propagated.
    pub async fn delete_many(&self, rels: &[String]) {
        for rel in rels {
            if let Err(e) = self.delete(rel).await {
                warn!("Failed to delete blob {}: {}", rel, e);
            }
        }
    }

    pub async fn stat(&self, rel: &str) -> Result<u64> {
        let path = self.full_path(rel);
        let meta = fs::metadata(&path)
            .await
            .with_context(|| format!("stat blob {rel}"))?;
        Ok(meta.len())
    }

    pub async fn exists(&self, rel: &str) -> bool {
        fs::try_exists(self.full_path(rel)).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf()).await.unwrap();

        let rel = file_current_path("u1", "f1");
        store.put(&rel, b"ciphertext").await.unwrap();
        assert!(store.exists(&rel).await);
        assert_eq!(store.stat(&rel).await.unwrap(), 10);
        assert_eq!(store.read(&rel).await.unwrap(), b"ciphertext");

        store.delete(&rel).await.unwrap();
        assert!(!store.exists(&rel).await);

        // Deleting an already-missing blob is fine.
        store.delete(&rel).await.unwrap();
    }

    #[tokio::test]
    async fn version_paths_are_distinct() {
        assert_ne!(
            file_current_path("u", "f"),
            file_version_path("u", "f", 1)
        );
        assert_ne!(file_version_path("u", "f", 1), file_version_path("u", "f", 2));
    }
}
