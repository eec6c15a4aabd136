//! Configuration for registry behavior.

use std::time::Duration;

/// Tunables for a [`PeerConnectionRegistry`](crate::PeerConnectionRegistry).
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Deadline for a single dial (construct + open).
    ///
    /// `None` means dials may take arbitrarily long, and callers waiting on
    /// that peer wait with them. When set, a dial that does not finish in
    /// time counts as a failed dial and its half-open connection is closed.
    pub dial_timeout: Option<Duration>,

    /// Whether a request for a peer whose last dial failed starts a fresh dial.
    ///
    /// When false the failure is sticky: every later request for that peer
    /// returns the original error. An inbound connection can still resolve
    /// the peer either way.
    pub retry_failed_dials: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dial_timeout: None,
            retry_failed_dials: true,
        }
    }
}

impl RegistryConfig {
    /// Bound every dial by `timeout`.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Set whether failed dials may be retried by later requests.
    pub fn with_retry_failed_dials(mut self, retry: bool) -> Self {
        self.retry_failed_dials = retry;
        self
    }
}
