//! Bounded-concurrency admission gate for downloads.
//!
//! The gate is two primitives behind one type: a counting semaphore that
//! actually governs admission, and a mutex-protected `{active, queued}`
//! counter pair that exists purely for observability (status lines, stats
//! commands). The counters never influence admission decisions.
//!
//! Every counter mutation goes through a named method that encodes one step
//! of the download state machine. Call sites never touch raw integers, so a
//! missed or doubled decrement is a bug in exactly one place.
//!
//! Admission order among waiters is unspecified; the semaphore makes no
//! FIFO guarantee and none is documented here.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

/// Minimum allowed concurrent downloads.
const MIN_CONCURRENT: usize = 1;

/// Maximum allowed concurrent downloads. humble-cli shares one account
/// session; more than this risks server-side throttling.
const MAX_CONCURRENT: usize = 10;

/// Error type for admission gate construction.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// Concurrency limit outside the valid range.
    #[error(
        "invalid max_concurrent value {value}: must be between {MIN_CONCURRENT} and {MAX_CONCURRENT}"
    )]
    InvalidLimit {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Snapshot of admission gate state at one point in time.
///
/// All three values are captured under a single lock, so `active` and
/// `queued` are mutually consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Downloads admitted and not yet completed.
    pub active: usize,
    /// Downloads waiting for an admission slot.
    pub queued: usize,
    /// Configured concurrency limit.
    pub max_concurrent: usize,
}

/// An admission slot held by one download.
///
/// Dropping the permit releases the underlying semaphore slot; this is the
/// single release path, so a slot can never be released twice. Callers that
/// were admitted must call [`AdmissionQueue::mark_completed`] before
/// dropping the permit so the observable `active` count stays in step with
/// real capacity.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Default)]
struct Counters {
    active: usize,
    queued: usize,
}

/// Thread-safe admission gate limiting concurrent downloads.
///
/// # Concurrency Model
///
/// - [`acquire`](Self::acquire) blocks (up to a timeout) on the semaphore
/// - counters are updated under their own lock, never inside semaphore waits
/// - the semaphore alone enforces `active <= max_concurrent`
#[derive(Debug)]
pub struct AdmissionQueue {
    semaphore: Arc<Semaphore>,
    counters: Mutex<Counters>,
    max_concurrent: usize,
}

impl AdmissionQueue {
    /// Creates an admission gate with the given concurrency limit.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidLimit`] if `max_concurrent` is
    /// outside `1..=10`.
    pub fn new(max_concurrent: usize) -> Result<Self, AdmissionError> {
        if !(MIN_CONCURRENT..=MAX_CONCURRENT).contains(&max_concurrent) {
            return Err(AdmissionError::InvalidLimit {
                value: max_concurrent,
            });
        }

        debug!(max_concurrent, "creating admission gate");

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            counters: Mutex::new(Counters::default()),
            max_concurrent,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Records that a download has entered the wait queue.
    ///
    /// Call before [`acquire`](Self::acquire).
    pub fn mark_queued(&self) {
        let mut counters = self.lock_counters();
        counters.queued += 1;
    }

    /// Reverses [`mark_queued`](Self::mark_queued) for a download that left
    /// the queue without being admitted (admission timeout or shutdown).
    ///
    /// This is deliberately distinct from [`mark_completed`](Self::mark_completed):
    /// a never-admitted download must not touch `active`.
    pub fn unmark_queued(&self) {
        let mut counters = self.lock_counters();
        counters.queued = counters.queued.saturating_sub(1);
    }

    /// Waits up to `timeout` for an admission slot.
    ///
    /// On success the caller's queued count moves to the active count in one
    /// locked update, and the returned permit holds the slot until dropped.
    /// On timeout, returns `None` and mutates no counters; the caller is
    /// responsible for [`unmark_queued`](Self::unmark_queued) if it
    /// previously marked itself queued.
    pub async fn acquire(&self, timeout: Duration) -> Option<AdmissionPermit> {
        let acquired =
            tokio::time::timeout(timeout, Arc::clone(&self.semaphore).acquire_owned()).await;

        let permit = match acquired {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed; treat a closed error like a
            // timeout rather than panicking in a worker.
            Ok(Err(_)) | Err(_) => {
                trace!(timeout_ms = timeout.as_millis(), "admission wait ended without a slot");
                return None;
            }
        };

        let mut counters = self.lock_counters();
        counters.queued = counters.queued.saturating_sub(1);
        counters.active += 1;
        Some(AdmissionPermit { _permit: permit })
    }

    /// Records that an admitted download has begun fetching.
    ///
    /// Instrumentation only: admission already moved the counters, so this
    /// emits a trace event and nothing else.
    pub fn mark_started(&self) {
        let stats = self.stats();
        trace!(active = stats.active, queued = stats.queued, "download started");
    }

    /// Records that an admitted download has finished (any outcome).
    ///
    /// Must be called exactly once per successful [`acquire`](Self::acquire),
    /// before the permit is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `active` is already zero. That means some caller decremented
    /// a counter it never incremented; this is a logic bug to fix, not a
    /// runtime condition to swallow.
    pub fn mark_completed(&self) {
        let mut counters = self.lock_counters();
        assert!(
            counters.active > 0,
            "mark_completed called with no active downloads (admission accounting bug)"
        );
        counters.active -= 1;
    }

    /// Returns a consistent snapshot of the current gate state.
    #[must_use]
    pub fn stats(&self) -> AdmissionStats {
        let counters = self.lock_counters();
        AdmissionStats {
            active: counters.active,
            queued: counters.queued,
            max_concurrent: self.max_concurrent,
        }
    }

    fn lock_counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        // A panicked holder only ever had the guard across a few integer
        // writes; the counters are still structurally valid.
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
