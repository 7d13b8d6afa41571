//! The fetch collaborator boundary.
//!
//! The coordinator never fetches bytes itself; it delegates to a
//! [`Fetcher`] and interprets the result three ways:
//!
//! - `Ok(true)` - success, record the download in the ledger
//! - `Ok(false)` - recoverable failure, surfaced to the caller as a failed
//!   completion (no automatic retry; the caller may resubmit)
//! - `Err(_)` - exceptional condition, also surfaced as a failure
//!
//! A fetch may block for an unbounded, externally determined duration and
//! is never cancelled mid-flight.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::humble::HumbleCliError;
use crate::request::DownloadRequest;

/// Error type for fetch operations.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The output directory could not be created.
    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The external download tool failed exceptionally.
    #[error(transparent)]
    Tool(#[from] HumbleCliError),
}

/// Fetches the bytes for one download request.
///
/// Object-safe so the coordinator can hold `Arc<dyn Fetcher>`; implemented
/// by the humble-cli wrapper in production and by stubs in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads the requested item variant into `output_dir`.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` on a recoverable
    /// failure that the caller may resubmit.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for exceptional conditions (tool missing,
    /// filesystem failure). These are also surfaced to the caller as a
    /// failed download, never propagated past the coordinator.
    async fn fetch(&self, request: &DownloadRequest, output_dir: &Path)
    -> Result<bool, FetchError>;
}
