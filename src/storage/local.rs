use crate::error::{BridgeError, Result};
use crate::storage::{StagedReader, Staging};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::BufReader;
use url::Url;
use uuid::Uuid;

/// Directory-backed staging with `file://` URIs
#[derive(Debug, Clone)]
pub struct LocalStaging {
    root: PathBuf,
}

impl LocalStaging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn canonical_root(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).await?;
        Ok(fs::canonicalize(&self.root).await?)
    }

    /// Maps a staged URI back to a path, refusing anything outside the root
    async fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let url = Url::parse(uri).map_err(|e| BridgeError::Staging(format!("Invalid staged URI '{}': {}", uri, e)))?;
        if url.scheme() != "file" {
            return Err(BridgeError::Staging(format!("Unsupported staged URI scheme: {}", url.scheme())));
        }
        let path = url
            .to_file_path()
            .map_err(|_| BridgeError::Staging(format!("Staged URI has no local path: {}", uri)))?;
        let path = fs::canonicalize(&path)
            .await
            .map_err(|e| BridgeError::Staging(format!("Staged file {} is not readable: {}", uri, e)))?;
        if !path.starts_with(self.canonical_root().await?) {
            return Err(BridgeError::Staging(format!("Staged URI {} is outside the staging root", uri)));
        }
        Ok(path)
    }
}

#[async_trait::async_trait]
impl Staging for LocalStaging {
    async fn stage_file(&self, path: &Path) -> Result<String> {
        let root = self.canonical_root().await?;
        let name = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        let target = root.join(name);

        // rename fails across filesystems
        if fs::rename(path, &target).await.is_err() {
            fs::copy(path, &target).await?;
            fs::remove_file(path).await?;
        }

        tracing::debug!("Staged {} as {}", path.display(), target.display());
        Url::from_file_path(&target)
            .map(String::from)
            .map_err(|_| BridgeError::Staging(format!("Cannot build URI for {}", target.display())))
    }

    async fn read_file(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.resolve(uri).await?;
        Ok(fs::read(path).await?)
    }

    async fn open(&self, uri: &str) -> Result<StagedReader> {
        let path = self.resolve(uri).await?;
        let file = fs::File::open(path).await?;
        Ok(Box::new(BufReader::new(file)))
    }

    async fn remove(&self, uri: &str) -> Result<()> {
        let path = self.resolve(uri).await?;
        fs::remove_file(&path).await?;
        tracing::debug!("Removed staged file {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    #[tokio::test]
    async fn test_stage_and_read_back() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let staging = LocalStaging::new(root.path().join("staged"));

        let source = scratch.path().join("rows.jsonl");
        tokio::fs::write(&source, b"{\"a\":1}\n{\"a\":2}\n").await.unwrap();

        let uri = staging.stage_file(&source).await.unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with(".jsonl"));
        assert!(!source.exists());

        let bytes = staging.read_file(&uri).await.unwrap();
        assert_eq!(bytes, b"{\"a\":1}\n{\"a\":2}\n");

        let mut lines = staging.open(&uri).await.unwrap().lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_remove_withdraws_staged_file() {
        let root = tempfile::tempdir().unwrap();
        let staging = LocalStaging::new(root.path());
        let source = root.path().join("out.jsonl");
        tokio::fs::write(&source, b"{}\n").await.unwrap();

        let uri = staging.stage_file(&source).await.unwrap();
        staging.remove(&uri).await.unwrap();
        assert_eq!(staging.read_file(&uri).await.unwrap_err().code(), "STAGING_ERROR");
    }

    #[tokio::test]
    async fn test_rejects_files_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let staging = LocalStaging::new(root.path());

        let uri = Url::from_file_path(outside.path()).unwrap().to_string();
        let err = staging.read_file(&uri).await.unwrap_err();
        assert_eq!(err.code(), "STAGING_ERROR");
        assert!(staging.read_file("http://example.com/x").await.is_err());
    }
}
