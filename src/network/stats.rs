//! Per-connection counters.

use std::sync::Arc;

use parking_lot::Mutex;

/// Counters describing what a shim did to the traffic crossing it.
///
/// A "unit" is one `write` call on a stream shim or one packet on a
/// datagram shim. Drops, duplications and reorderings are counted in
/// whichever direction they were decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShimStats {
    /// Units submitted by the caller (writes or sends), dropped ones included.
    pub units_sent: u64,
    /// Units silently discarded by the loss decision.
    pub units_dropped: u64,
    /// Units delivered an extra time by the duplication decision.
    pub units_duplicated: u64,
    /// Units whose delivery was deferred or swapped by the reorder decision.
    pub units_reordered: u64,
    /// Units handed to the caller by reads or receives.
    pub units_received: u64,
    /// Background transmissions the real transport rejected.
    pub transmit_errors: u64,
    /// Background receives the real transport failed.
    pub receive_errors: u64,
}

/// Shared, lock-guarded counters updated by both the caller and background tasks.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatsCell(Arc<Mutex<ShimStats>>);

impl StatsCell {
    pub(crate) fn update(&self, f: impl FnOnce(&mut ShimStats)) {
        f(&mut self.0.lock());
    }

    pub(crate) fn snapshot(&self) -> ShimStats {
        *self.0.lock()
    }
}
