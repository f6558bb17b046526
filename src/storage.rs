use std::{path::{Path, PathBuf}, sync::Arc};

use crate::AppResult;

/// Local-disk object store served back under `/media`.
#[derive(Clone)]
pub struct MediaStore {
    root: Arc<PathBuf>,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: Arc::new(root.into()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `bucket/path` under the media root and returns the public URL.
    pub async fn upload(&self, bucket: &str, path: &str, bytes: &[u8]) -> AppResult<String> {
        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(path), bytes).await?;
        Ok(format!("/media/{bucket}/{path}"))
    }
}
