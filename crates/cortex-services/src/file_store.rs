//! On-disk store for uploaded document content.
//!
//! All I/O goes through `tokio::fs`, which offloads the blocking syscalls to
//! the runtime's blocking pool; nothing here parks the scheduler.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::ServiceError;

#[derive(Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Persist uploaded bytes as `{document_id}_{original_name}`.
    ///
    /// Only the final path component of the client-supplied name is used, so
    /// a crafted filename cannot escape the upload directory. Uniqueness
    /// follows from the single-writer-per-document invariant.
    pub async fn save(
        &self,
        document_id: Uuid,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, ServiceError> {
        let safe_name = Path::new(original_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| ServiceError::FileIo(format!("create upload dir: {e}")))?;

        let path = self.base_dir.join(format!("{document_id}_{safe_name}"));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ServiceError::FileIo(format!("write {}: {e}", path.display())))?;

        Ok(path)
    }

    pub async fn read_to_string(&self, path: &str) -> Result<String, ServiceError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServiceError::FileIo(format!("read {path}: {e}")))
    }

    /// Best-effort delete: a missing file is fine, any other failure is
    /// logged and swallowed so cleanup never fails processing.
    pub async fn delete(&self, path: &str) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!(path, "deleted processed file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path, error = %e, "failed to delete file"),
        }
    }
}
