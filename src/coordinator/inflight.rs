//! Atomic in-flight request registry.
//!
//! The single source of truth for "is this exact (bundle, item, variant)
//! already being handled". Any per-item display flags a UI keeps are
//! decorative; only a successful [`InFlightSet::try_claim`] admits a
//! request into the pipeline, because check-then-act on separate flags is
//! precisely the duplicate-download race this set exists to close.

use dashmap::DashSet;

use crate::request::RequestKey;

/// Concurrent set of request keys currently claimed (queued, admitted, or
/// fetching).
#[derive(Debug, Default)]
pub struct InFlightSet {
    keys: DashSet<RequestKey>,
}

impl InFlightSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claims `key` for exclusive processing.
    ///
    /// Returns `true` iff no other in-flight request holds the key. The
    /// check and insert are one operation; two racing claimants can never
    /// both win.
    #[must_use]
    pub fn try_claim(&self, key: &RequestKey) -> bool {
        self.keys.insert(key.clone())
    }

    /// Releases a claim. Idempotent: releasing an absent key is a no-op.
    pub fn release(&self, key: &RequestKey) {
        self.keys.remove(key);
    }

    /// Returns the number of claimed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
