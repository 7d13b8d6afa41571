//! Wrapper around the external `humble-cli` tool.
//!
//! All interaction with Humble Bundle happens through the `humble-cli`
//! subprocess: listing purchased bundles, fetching bundle details, and
//! downloading individual item formats. This module owns process spawning
//! and exit-status interpretation; [`parse`] turns the tool's text output
//! into structured data.

pub mod parse;

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::fetch::{FetchError, Fetcher};
use crate::request::DownloadRequest;

pub use parse::{BundleDetails, BundleItem, BundleKeyEntry, parse_bundle_details};

/// Default name of the external tool binary, resolved via `PATH`.
const DEFAULT_PROGRAM: &str = "humble-cli";

/// Error type for `humble-cli` invocations.
#[derive(Debug, thiserror::Error)]
pub enum HumbleCliError {
    /// The tool could not be launched (missing binary, permissions).
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// Binary that failed to start.
        program: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The tool exited with a non-zero status.
    #[error("{command} failed: {stderr}")]
    CommandFailed {
        /// Human-readable description of the attempted command.
        command: String,
        /// Captured stderr, trimmed.
        stderr: String,
    },

    /// The tool produced output that is not valid UTF-8.
    #[error("unreadable output from {command}: {source}")]
    InvalidOutput {
        /// Human-readable description of the attempted command.
        command: String,
        /// Underlying decoding error.
        source: std::string::FromUtf8Error,
    },
}

/// A purchased bundle as reported by `humble-cli list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Bundle identifier usable in subsequent commands.
    pub key: String,
    /// Human-readable bundle name.
    pub name: String,
}

/// Handle for invoking `humble-cli` subcommands.
#[derive(Debug, Clone)]
pub struct HumbleCli {
    program: String,
}

impl Default for HumbleCli {
    fn default() -> Self {
        Self::new()
    }
}

impl HumbleCli {
    /// Creates a handle that resolves `humble-cli` via `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
        }
    }

    /// Creates a handle invoking a specific binary. Tests point this at a
    /// stub script.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Returns `true` if the tool can be launched and reports a version.
    #[instrument(skip(self))]
    pub async fn check_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Lists all purchased bundles.
    ///
    /// Runs `humble-cli list --field key --field name` and parses the
    /// `key,name` output lines. Lines without a comma are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HumbleCliError`] if the tool cannot be launched, exits
    /// non-zero, or emits non-UTF-8 output.
    #[instrument(skip(self))]
    pub async fn list_bundles(&self) -> Result<Vec<Bundle>, HumbleCliError> {
        let stdout = self
            .run(
                &["list", "--field", "key", "--field", "name"],
                None,
                "list bundles",
            )
            .await?;

        let bundles = stdout
            .lines()
            .filter_map(|line| {
                let (key, name) = line.split_once(',')?;
                Some(Bundle {
                    key: key.trim().to_string(),
                    name: name.trim().to_string(),
                })
            })
            .collect::<Vec<_>>();

        debug!(count = bundles.len(), "listed bundles");
        Ok(bundles)
    }

    /// Fetches and parses the details of one bundle.
    ///
    /// `bundle_key` may be a partial key; the tool resolves it.
    ///
    /// # Errors
    ///
    /// Returns [`HumbleCliError`] if the tool cannot be launched, exits
    /// non-zero, or emits non-UTF-8 output.
    #[instrument(skip(self))]
    pub async fn bundle_details(&self, bundle_key: &str) -> Result<BundleDetails, HumbleCliError> {
        let stdout = self
            .run(&["details", bundle_key], None, "get bundle details")
            .await?;
        Ok(parse_bundle_details(&stdout))
    }

    /// Downloads one format of one item into `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`HumbleCliError`] if the tool cannot be launched or exits
    /// non-zero.
    #[instrument(skip(self), fields(dir = %output_dir.display()))]
    pub async fn download_item_format(
        &self,
        bundle_key: &str,
        item_id: u32,
        variant: &str,
        output_dir: &Path,
    ) -> Result<(), HumbleCliError> {
        let variant = variant.to_lowercase();
        let item = item_id.to_string();
        self.run(
            &[
                "download",
                bundle_key,
                "--format",
                &variant,
                "--item-numbers",
                &item,
            ],
            Some(output_dir),
            &format!("download item {item_id} ({variant})"),
        )
        .await?;
        Ok(())
    }

    async fn run(
        &self,
        args: &[&str],
        current_dir: Option<&Path>,
        description: &str,
    ) -> Result<String, HumbleCliError> {
        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(dir) = current_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|source| HumbleCliError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(HumbleCliError::CommandFailed {
                command: description.to_string(),
                stderr,
            });
        }

        String::from_utf8(output.stdout).map_err(|source| HumbleCliError::InvalidOutput {
            command: description.to_string(),
            source,
        })
    }
}

/// [`Fetcher`] backed by `humble-cli download`.
///
/// A non-zero tool exit maps to `Ok(false)` (recoverable: the item stays
/// undownloaded and the caller may resubmit); only launch and filesystem
/// failures are exceptional.
#[derive(Debug, Clone, Default)]
pub struct HumbleCliFetcher {
    cli: HumbleCli,
}

impl HumbleCliFetcher {
    /// Creates a fetcher over the given tool handle.
    #[must_use]
    pub fn new(cli: HumbleCli) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl Fetcher for HumbleCliFetcher {
    async fn fetch(
        &self,
        request: &DownloadRequest,
        output_dir: &Path,
    ) -> Result<bool, FetchError> {
        std::fs::create_dir_all(output_dir).map_err(|source| FetchError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

        match self
            .cli
            .download_item_format(
                &request.collection_key,
                request.item_id,
                &request.variant,
                output_dir,
            )
            .await
        {
            Ok(()) => Ok(true),
            Err(HumbleCliError::CommandFailed { command, stderr }) => {
                warn!(%command, %stderr, "download tool reported failure");
                Ok(false)
            }
            Err(error) => Err(FetchError::Tool(error)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn stub_tool(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-humble-cli");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_check_available_false_for_missing_binary() {
        let cli = HumbleCli::with_program("/nonexistent/humble-cli");
        assert!(!cli.check_available().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_bundles_parses_key_name_lines() {
        let temp = tempfile::tempdir().unwrap();
        let program = stub_tool(
            temp.path(),
            r#"printf 'bundle-one,First Bundle\nbundle-two,Second, With Comma\nnot a bundle line\n'"#,
        );

        let bundles = HumbleCli::with_program(program).list_bundles().await.unwrap();
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].key, "bundle-one");
        assert_eq!(bundles[0].name, "First Bundle");
        // Split on first comma only: names may contain commas.
        assert_eq!(bundles[1].name, "Second, With Comma");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_surfaces_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let program = stub_tool(temp.path(), r#"echo 'no session found' >&2; exit 1"#);

        let result = HumbleCli::with_program(program).list_bundles().await;
        match result {
            Err(HumbleCliError::CommandFailed { stderr, .. }) => {
                assert!(stderr.contains("no session found"));
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetcher_maps_tool_failure_to_recoverable() {
        let temp = tempfile::tempdir().unwrap();
        let program = stub_tool(temp.path(), r#"exit 1"#);
        let fetcher = HumbleCliFetcher::new(HumbleCli::with_program(program));

        let request = DownloadRequest::new("bundle", 1, "epub");
        let outcome = fetcher.fetch(&request, temp.path()).await.unwrap();
        assert!(!outcome, "tool failure should be Ok(false), not Err");
    }

    #[tokio::test]
    async fn test_fetcher_missing_binary_is_exceptional() {
        let temp = tempfile::tempdir().unwrap();
        let fetcher = HumbleCliFetcher::new(HumbleCli::with_program("/nonexistent/humble-cli"));

        let request = DownloadRequest::new("bundle", 1, "epub");
        let outcome = fetcher.fetch(&request, temp.path()).await;
        assert!(matches!(outcome, Err(FetchError::Tool(_))));
    }
}
