//! Sequencer tuning.

use std::time::Duration;

/// Runtime options of a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, Default)]
pub struct SequencerConfig {
    /// Upper bound for a single transform or publish exchange.
    ///
    /// `None` waits for the collaborator indefinitely. An elapsed timeout is
    /// handled exactly like a collaborator failure.
    pub exchange_timeout: Option<Duration>,
}

impl SequencerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the exchange timeout.
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = Some(timeout);
        self
    }
}
