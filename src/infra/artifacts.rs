//! Request-scoped artifact storage on the local filesystem.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut};
use thiserror::Error;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, warn};

use crate::domain::conversion::{ArtifactStat, ConversionRequest, RequestId};

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Errors raised while reading or writing request artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact {} not found", path.display())]
    NotFound { path: PathBuf },
    #[error("request body stream failed: {message}")]
    BodyStream { message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filesystem store for the html/pdf pair belonging to each request.
///
/// The root directory is provisioned once at startup; the store never creates
/// it on the request path.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the root directory if it does not exist yet.
    pub async fn provision(&self) -> Result<(), std::io::Error> {
        if fs::try_exists(&self.root).await? {
            return Ok(());
        }
        warn!(
            target = "html_pdf_export::artifacts",
            root = %self.root.display(),
            "Temporary file directory not found, creating a new directory"
        );
        fs::create_dir_all(&self.root).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the artifact pair for a fresh request.
    pub fn request(&self, id: RequestId) -> ConversionRequest {
        ConversionRequest::new(id, &self.root)
    }

    /// Stream the request body to the input artifact.
    ///
    /// A partially written file is removed when the body stream fails.
    pub async fn write_input<S, E>(
        &self,
        request: &ConversionRequest,
        body: S,
    ) -> Result<PathBuf, ArtifactError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let path = request.input_path();
        let mut file = fs::File::create(path).await?;
        let mut total_bytes: u64 = 0;

        pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    self.delete(path).await;
                    return Err(ArtifactError::BodyStream {
                        message: err.to_string(),
                    });
                }
            };
            total_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;

        debug!(
            target = "html_pdf_export::artifacts",
            request_id = %request.id(),
            path = %path.display(),
            bytes = total_bytes,
            "Wrote request body to file"
        );
        Ok(path.to_path_buf())
    }

    /// Probe an artifact without touching it. Missing files are reported, not raised.
    pub async fn stat(&self, path: &Path) -> ArtifactStat {
        stat_artifact(path).await
    }

    /// Open an artifact for a single forward-only read.
    pub async fn open_for_streaming(
        &self,
        path: &Path,
    ) -> Result<impl Stream<Item = Result<Bytes, std::io::Error>> + use<>, ArtifactError> {
        let mut file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => return Err(ArtifactError::Io(err)),
        };

        Ok(async_stream::try_stream! {
            loop {
                let mut buffer = BytesMut::with_capacity(READ_CHUNK_BYTES);
                let read = file.read_buf(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                yield buffer.freeze();
            }
        })
    }

    /// Best-effort removal. Missing files count as already deleted.
    pub async fn delete(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(
                    target = "html_pdf_export::artifacts",
                    path = %path.display(),
                    "Deleted artifact"
                );
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => log_delete_failure(path, &err),
        }
    }

    /// Guard that removes both artifacts of `request` when dropped.
    pub fn cleanup_guard(&self, request: &ConversionRequest) -> ArtifactCleanup {
        ArtifactCleanup {
            request_id: request.id(),
            paths: [
                request.input_path().to_path_buf(),
                request.output_path().to_path_buf(),
            ],
        }
    }
}

/// Deletes a request's artifacts on drop.
///
/// The guard travels with the response body, so the files are removed once the
/// body has been drained or the connection is gone, and on every error path
/// before that.
#[derive(Debug)]
#[must_use = "artifacts are deleted as soon as the guard is dropped"]
pub struct ArtifactCleanup {
    request_id: RequestId,
    paths: [PathBuf; 2],
}

impl Drop for ArtifactCleanup {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => log_delete_failure(path, &err),
            }
        }
        debug!(
            target = "html_pdf_export::artifacts",
            request_id = %self.request_id,
            "Cleaned up request artifacts"
        );
    }
}

pub(crate) async fn stat_artifact(path: &Path) -> ArtifactStat {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => ArtifactStat {
            exists: true,
            size: metadata.len(),
        },
        _ => ArtifactStat::MISSING,
    }
}

fn log_delete_failure(path: &Path, err: &std::io::Error) {
    warn!(
        target = "html_pdf_export::artifacts",
        path = %path.display(),
        error = %err,
        "Failed to delete artifact"
    );
}
