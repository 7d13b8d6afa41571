//! Humble Sync Core Library
//!
//! This library implements a bounded-concurrency download manager for
//! Humble Bundle libraries: it accepts download requests for bundle items,
//! deduplicates concurrent requests for the same item, limits how many
//! downloads run at once, records completions durably, and shuts down
//! cooperatively without corrupting queue counters.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`admission`] - Bounded-concurrency admission gate
//! - [`coordinator`] - Per-request download lifecycle orchestration
//! - [`ledger`] - Durable record of completed downloads
//! - [`db`] - Database connection and schema management
//! - [`fetch`] - The fetch collaborator boundary
//! - [`humble`] - humble-cli subprocess wrapper and output parsing
//! - [`config`] - Application configuration
//! - [`shutdown`] - Cooperative cancellation flag

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod fetch;
pub mod humble;
pub mod ledger;
pub mod request;
pub mod shutdown;

// Re-export commonly used types
pub use admission::{AdmissionError, AdmissionPermit, AdmissionQueue, AdmissionStats};
pub use config::{Config, ConfigError, DEFAULT_MAX_CONCURRENT};
pub use coordinator::{CoordinatorError, DownloadCoordinator, LifecycleCallbacks};
pub use db::Database;
pub use fetch::{FetchError, Fetcher};
pub use humble::{HumbleCli, HumbleCliError, HumbleCliFetcher};
pub use ledger::{CollectionStats, CompletedDownload, Ledger, LedgerError, LedgerRecord};
pub use request::{DownloadRequest, RequestKey};
pub use shutdown::ShutdownSignal;
