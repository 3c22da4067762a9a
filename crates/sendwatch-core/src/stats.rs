//! Dispatcher counters.

/// Snapshot of dispatcher activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Non-empty change events processed.
    pub events_processed: u64,
    /// Observer callbacks invoked.
    pub notifications_sent: u64,
    /// Tracked entities touched by a commit whose projection did not change.
    pub no_op_changes: u64,
    /// Full re-diffs triggered by feed lag.
    pub resyncs: u64,
    /// Live subscriptions at the time of the snapshot.
    pub active_subscriptions: usize,
}
