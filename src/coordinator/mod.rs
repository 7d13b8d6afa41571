//! Per-request download lifecycle orchestration.
//!
//! The coordinator accepts fire-and-forget download submissions and drives
//! each one through a fixed state machine:
//!
//! ```text
//! claimed -> queued -> admitted -> fetching -> succeeded | failed -> released
//! ```
//!
//! One tokio task per request. The in-flight claim is the only cross-request
//! synchronization point; after it, a request only ever touches the
//! admission gate and the ledger through their own internal locks, and the
//! coordinator never holds two of those locks at once.
//!
//! # Cleanup discipline
//!
//! Every worker records how far admission progressed in an explicit
//! [`AdmissionProgress`] value and the cleanup step decrements exactly the
//! counters that were actually incremented. A request that timed out
//! waiting for admission reverses only its queued mark; one that was
//! admitted completes and releases exactly once. Cleanup never guesses
//! from which callbacks happened to fire.
//!
//! # Shutdown
//!
//! Shutdown is cooperative. Workers observe the signal before queueing and
//! immediately after admission; a fetch that already started runs to
//! completion. [`DownloadCoordinator::shutdown`] waits a bounded grace
//! period for in-flight workers to finish their cleanup, then aborts
//! stragglers.

mod callbacks;
mod inflight;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::admission::{AdmissionError, AdmissionPermit, AdmissionQueue, AdmissionStats};
use crate::config::Config;
use crate::fetch::{FetchError, Fetcher};
use crate::ledger::{CollectionStats, CompletedDownload, Ledger, LedgerError};
use crate::request::DownloadRequest;
use crate::shutdown::ShutdownSignal;

pub use callbacks::LifecycleCallbacks;
pub use inflight::InFlightSet;

/// Error type for failures surfaced through [`LifecycleCallbacks::on_error`].
///
/// These never propagate out of a worker; `submit` itself cannot fail.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The fetch collaborator failed exceptionally.
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    /// The download succeeded but could not be recorded. Retryable:
    /// resubmitting re-fetches and re-records the item.
    #[error("download finished but could not be recorded: {0}")]
    Ledger(#[from] LedgerError),
}

/// How far a request got through admission. Cleanup branches on this and
/// nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdmissionProgress {
    /// Counted in `queued`, never admitted.
    Queued,
    /// Admitted; counted in `active` and holding a permit.
    Admitted,
}

struct Inner {
    admission: AdmissionQueue,
    in_flight: InFlightSet,
    shutdown: ShutdownSignal,
    ledger: Ledger,
    fetcher: Arc<dyn Fetcher>,
    output_dir: PathBuf,
    admission_timeout: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Bounded-concurrency download orchestrator.
///
/// Cloning is cheap; clones share all state. Submissions require a running
/// tokio runtime since each spawns a worker task.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl DownloadCoordinator {
    /// Creates a coordinator over the given fetch collaborator and ledger.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidLimit`] if the configured
    /// concurrency limit is out of range.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        ledger: Ledger,
        config: &Config,
    ) -> Result<Self, AdmissionError> {
        Ok(Self {
            inner: Arc::new(Inner {
                admission: AdmissionQueue::new(config.max_concurrent_downloads)?,
                in_flight: InFlightSet::new(),
                shutdown: ShutdownSignal::new(),
                ledger,
                fetcher,
                output_dir: config.output_dir.clone(),
                admission_timeout: config.admission_timeout(),
                workers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Submits a download request. Fire-and-forget: all outcomes, success
    /// or failure, are delivered through `callbacks`.
    ///
    /// Duplicate suppression happens here: if an identical request (same
    /// bundle, item, and variant) is already in flight, the submission is
    /// dropped silently and no callback fires. Callers may additionally
    /// skip already-completed items as a display-level optimization, but
    /// only the in-flight claim is correctness-bearing.
    ///
    /// `collection_total`, when known, is cached in the ledger on success
    /// so stats queries can report remaining/total counts.
    #[instrument(skip(self, callbacks), fields(key = %request.key()))]
    pub fn submit(
        &self,
        request: DownloadRequest,
        collection_total: Option<u32>,
        callbacks: LifecycleCallbacks,
    ) {
        let key = request.key();
        if !self.inner.in_flight.try_claim(&key) {
            debug!("duplicate request already in flight; ignoring");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_request(inner, request, collection_total, callbacks));

        let mut workers = self.lock_workers();
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle);
    }

    /// Waits for every submitted request to finish. No timeout; intended
    /// for batch callers that have stopped submitting.
    ///
    /// Cancellation-safe: a worker handle being awaited is returned to the
    /// internal list if this future is dropped mid-wait (e.g. by a
    /// `select!` racing against an interrupt), so a later
    /// [`shutdown`](Self::shutdown) still sees and waits for that worker.
    pub async fn join(&self) {
        loop {
            let handle = self.lock_workers().pop();
            let Some(handle) = handle else { return };

            let mut pending = PendingWorker {
                handle: Some(handle),
                workers: &self.inner.workers,
            };
            let outcome = match pending.handle.as_mut() {
                Some(worker) => worker.await,
                None => Ok(()),
            };
            // Fully joined; nothing to hand back on drop.
            pending.handle = None;

            if let Err(join_error) = outcome {
                // A panicking worker indicates a bug (workers catch
                // their own operational errors); surface it loudly.
                error!(%join_error, "download worker panicked");
            }
        }
    }

    /// Requests shutdown and waits up to `grace` for in-flight workers.
    ///
    /// After the signal, no request advances past admission into a new
    /// fetch; already-fetching workers run to completion if they finish
    /// within the grace period and are aborted otherwise. Counter cleanup
    /// for workers that finish in time is fully applied before return.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown.trigger();

        let drained: Vec<JoinHandle<()>> = {
            let mut workers = self.lock_workers();
            workers.drain(..).collect()
        };

        let deadline = tokio::time::Instant::now() + grace;
        for mut handle in drained {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                handle.abort();
                continue;
            }
            match tokio::time::timeout(deadline - now, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    error!(%join_error, "download worker panicked during shutdown");
                }
                Err(_) => {
                    // Out of grace; the worker is likely blocked in the
                    // external tool. Abort and let the ledger's absence of
                    // a record make the item re-downloadable next run.
                    warn!("download worker exceeded shutdown grace; aborting");
                    handle.abort();
                }
            }
        }
    }

    /// Returns the shared shutdown signal, e.g. to wire up a Ctrl+C handler.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.inner.shutdown.clone()
    }

    /// Returns a consistent snapshot of admission gate state.
    #[must_use]
    pub fn stats(&self) -> AdmissionStats {
        self.inner.admission.stats()
    }

    /// Returns `true` if a completed download is recorded for `resource_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be queried.
    pub async fn is_completed(&self, resource_url: &str) -> Result<bool, LedgerError> {
        self.inner.ledger.is_completed(resource_url).await
    }

    /// Returns completed/remaining/total statistics for one collection.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be queried.
    pub async fn collection_stats(
        &self,
        collection_key: &str,
    ) -> Result<CollectionStats, LedgerError> {
        self.inner.ledger.stats_for(collection_key).await
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the worker handle [`DownloadCoordinator::join`] is currently
/// awaiting. Dropped mid-await (join cancelled), it pushes the handle back
/// into the shared list instead of detaching the task.
struct PendingWorker<'a> {
    handle: Option<JoinHandle<()>>,
    workers: &'a Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for PendingWorker<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
    }
}

/// Drives one claimed request through queueing, admission, fetch, and
/// cleanup. The in-flight key is already claimed on entry and is released
/// on every exit path.
async fn run_request(
    inner: Arc<Inner>,
    request: DownloadRequest,
    collection_total: Option<u32>,
    callbacks: LifecycleCallbacks,
) {
    let key = request.key();
    let mut permit: Option<AdmissionPermit> = None;

    callbacks.notify_queued();
    inner.admission.mark_queued();
    let mut progress = AdmissionProgress::Queued;

    'fetch: {
        // Shutdown checkpoint before blocking on admission.
        if inner.shutdown.is_triggered() {
            debug!(%key, "shutdown before admission; abandoning request");
            break 'fetch;
        }

        let Some(acquired) = inner.admission.acquire(inner.admission_timeout).await else {
            // Admission timeout is cancellation, not failure: no callback,
            // no error, just reconciliation in cleanup.
            debug!(%key, "admission wait timed out; abandoning request");
            break 'fetch;
        };
        progress = AdmissionProgress::Admitted;
        permit = Some(acquired);

        // Shutdown checkpoint after admission, before the fetch begins.
        // Once a fetch starts it always runs to completion.
        if inner.shutdown.is_triggered() {
            debug!(%key, "shutdown after admission; skipping fetch");
            break 'fetch;
        }

        callbacks.notify_started();
        inner.admission.mark_started();
        perform_fetch(&inner, &request, collection_total, &callbacks).await;
    }

    // Cleanup: runs exactly once, decrementing only what was incremented.
    match progress {
        AdmissionProgress::Queued => inner.admission.unmark_queued(),
        AdmissionProgress::Admitted => {
            inner.admission.mark_completed();
            drop(permit.take());
        }
    }
    inner.in_flight.release(&key);
}

/// Runs the fetch and, on success, records the completion. All errors stop
/// here: they are logged and routed to callbacks, never re-raised.
async fn perform_fetch(
    inner: &Inner,
    request: &DownloadRequest,
    collection_total: Option<u32>,
    callbacks: &LifecycleCallbacks,
) {
    match inner.fetcher.fetch(request, &inner.output_dir).await {
        Ok(true) => {
            let resource_url = request.resource_url();
            let filename = request.filename();
            let completed = CompletedDownload {
                resource_url: &resource_url,
                collection_key: &request.collection_key,
                filename: &filename,
                file_size: None,
                local_path: None,
                collection_total_count: collection_total.map(i64::from),
            };

            match inner.ledger.upsert(&completed).await {
                Ok(()) => callbacks.notify_completed(true, None),
                Err(ledger_error) => {
                    error!(%resource_url, %ledger_error, "completed download not recorded");
                    let coordinator_error = CoordinatorError::Ledger(ledger_error);
                    callbacks.notify_error(&coordinator_error);
                    // Reported as failed so the caller resubmits; the
                    // repeat upsert makes the record converge.
                    callbacks.notify_completed(false, Some(&coordinator_error.to_string()));
                }
            }
        }
        Ok(false) => {
            warn!(key = %request.key(), "download tool reported failure");
            callbacks.notify_completed(false, Some("download failed"));
        }
        Err(fetch_error) => {
            warn!(key = %request.key(), %fetch_error, "download failed exceptionally");
            let coordinator_error = CoordinatorError::Fetch(fetch_error);
            callbacks.notify_error(&coordinator_error);
            callbacks.notify_completed(false, Some(&coordinator_error.to_string()));
        }
    }
}
