//! Dispatcher configuration.

/// Configuration for a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Re-diff every tracked entity when the change feed reports that events
    /// were dropped. When disabled, dropped events are only logged.
    pub resync_on_lag: bool,

    /// Maximum number of feed events handled by one
    /// [`process_pending`](crate::Dispatcher::process_pending) call.
    /// None drains the feed completely.
    pub max_events_per_pump: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            resync_on_lag: true,
            max_events_per_pump: None,
        }
    }
}

impl DispatcherConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to resync after lag.
    pub fn with_resync_on_lag(mut self, resync: bool) -> Self {
        self.resync_on_lag = resync;
        self
    }

    /// Disable resync after lag.
    pub fn without_resync(self) -> Self {
        self.with_resync_on_lag(false)
    }

    /// Bound the number of events handled per pump.
    pub fn with_max_events_per_pump(mut self, max: usize) -> Self {
        self.max_events_per_pump = Some(max.max(1));
        self
    }
}
