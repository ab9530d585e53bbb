//! Build executor.
//!
//! Drains a [`BundleStream`] into the destination file. Output is staged in a
//! temporary sibling and renamed into place, so a failed build never leaves a
//! partial bundle behind.

use crate::bundler::{BundleError, BundleStream};
use futures::StreamExt;
use sling_util::hash::StreamDigest;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Which cycle produced a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    /// First build of the process.
    Initial,
    /// Build triggered by a change batch.
    Rebuild,
}

impl BuildKind {
    /// Status line printed on success.
    #[must_use]
    pub fn success_message(self) -> &'static str {
        match self {
            Self::Initial => "bundle file built successfully",
            Self::Rebuild => "files changed, bundle file rebuilt",
        }
    }
}

/// Outcome of one build cycle.
#[derive(Debug)]
pub enum BuildResult {
    Built {
        kind: BuildKind,
        destination: PathBuf,
        /// Bytes written.
        bytes: u64,
        /// BLAKE3 of the written bundle.
        digest: String,
    },
    Failed {
        kind: BuildKind,
        error: BundleError,
    },
}

impl BuildResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Built { .. })
    }

    #[must_use]
    pub fn kind(&self) -> BuildKind {
        match self {
            Self::Built { kind, .. } | Self::Failed { kind, .. } => *kind,
        }
    }
}

/// Write `stream` to `destination`.
pub async fn run(stream: BundleStream, destination: &Path, kind: BuildKind) -> BuildResult {
    let temp = sling_util::fs::temp_sibling(destination);

    match write_atomic(stream, destination, &temp).await {
        Ok((bytes, digest)) => {
            tracing::info!(
                destination = %destination.display(),
                bytes,
                digest = %digest,
                "{}",
                kind.success_message()
            );
            BuildResult::Built {
                kind,
                destination: destination.to_path_buf(),
                bytes,
                digest,
            }
        }
        Err(error) => {
            let _ = tokio::fs::remove_file(&temp).await;
            tracing::error!(
                code = error.code(),
                error = %error_chain(&error),
                "bundle build failed"
            );
            BuildResult::Failed { kind, error }
        }
    }
}

async fn write_atomic(
    mut stream: BundleStream,
    destination: &Path,
    temp: &Path,
) -> Result<(u64, String), BundleError> {
    let write_err = |source: std::io::Error| BundleError::Write {
        path: destination.to_path_buf(),
        source,
    };

    // Resolution and transform failures arrive before any output.
    let first = match stream.next().await {
        Some(chunk) => chunk?,
        None => bytes::Bytes::new(),
    };

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut file = tokio::fs::File::create(temp).await.map_err(write_err)?;
    let mut digest = StreamDigest::new();

    digest.update(&first);
    file.write_all(&first).await.map_err(write_err)?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        digest.update(&chunk);
        file.write_all(&chunk).await.map_err(write_err)?;
    }

    file.flush().await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    sling_util::fs::replace_with(temp, destination).map_err(write_err)?;

    Ok((digest.len(), digest.finish_hex()))
}

/// `error: cause: cause` rendering of an error and its sources.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
