use std::path::PathBuf;

use bytes::Bytes;

use crate::error::{BundleError, FileError};

/// File content produced by a worker, ready to serve.
#[derive(Debug, Clone, PartialEq)]
pub struct ServedFile {
    pub content: Bytes,
    pub mime_type: String,
    /// Where the worker wrote it.
    pub path: PathBuf,
}

pub type BundleResult = Result<ServedFile, BundleError>;
pub type FileResult = Result<ServedFile, FileError>;

/// Read the file a worker pointed at. Errors carry the path and the reason.
pub(crate) async fn read_output(
    path: PathBuf,
    mime_type: String,
) -> Result<ServedFile, (PathBuf, String)> {
    match tokio::fs::read(&path).await {
        Ok(content) => Ok(ServedFile {
            content: Bytes::from(content),
            mime_type,
            path,
        }),
        Err(err) => Err((path, err.to_string())),
    }
}
