use std::path::PathBuf;
use thiserror::Error;

/// Errors loading configuration.
///
/// Build-cycle failures use [`crate::BundleError`] instead and never escape a
/// build cycle.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read config at {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Config file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },
}
