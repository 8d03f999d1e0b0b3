//! Metric helpers for `mudbridge`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Name of the counter tracking decoded inbound records.
pub const FRAMES_DECODED: &str = "mudbridge_frames_decoded_total";
/// Name of the counter tracking stream fragments discarded without decoding.
pub const FRAGMENTS_DISCARDED: &str = "mudbridge_fragments_discarded_total";
/// Name of the counter tracking commands that matched no route.
pub const ROUTE_MISSES: &str = "mudbridge_route_misses_total";
/// Name of the counter tracking replies for processes that no longer exist.
pub const UNKNOWN_PIDS: &str = "mudbridge_unknown_pids_total";
/// Name of the counter tracking synchronizer tasks that timed out.
pub const TASK_TIMEOUTS: &str = "mudbridge_task_timeouts_total";

/// Reason a stream fragment was discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    /// The fragment sat idle for longer than the quiescence window.
    Stale,
    /// The fragment grew past the configured maximum length.
    Oversized,
    /// A later line decoded on its own, abandoning the fragment.
    Superseded,
    /// The record decoded but was not a recognised message.
    Foreign,
}

impl DiscardReason {
    /// Label value used for this reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::Oversized => "oversized",
            Self::Superseded => "superseded",
            Self::Foreign => "foreign",
        }
    }
}

/// Record a decoded inbound record.
pub fn inc_frames() {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_DECODED).increment(1);
}

/// Record a discarded fragment.
pub fn inc_discarded(reason: DiscardReason) {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_DISCARDED, "reason" => reason.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}

/// Record a command that matched no route.
pub fn inc_route_misses() {
    #[cfg(feature = "metrics")]
    counter!(ROUTE_MISSES).increment(1);
}

/// Record a reply for an unknown process.
pub fn inc_unknown_pids() {
    #[cfg(feature = "metrics")]
    counter!(UNKNOWN_PIDS).increment(1);
}

/// Record a synchronizer task timeout.
pub fn inc_task_timeouts() {
    #[cfg(feature = "metrics")]
    counter!(TASK_TIMEOUTS).increment(1);
}
