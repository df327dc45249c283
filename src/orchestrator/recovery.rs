//! Connection recovery state machine: owns the transitions between
//! `Disconnected`/`Connecting`/`Connected`/`Degraded`/`Reconnecting` and the
//! exponential backoff between reconnect attempts.
//!
//! Grounded on `modbus::ModbusConnectionManager::execute_with_reconnect`'s
//! retry/backoff classifier, generalized from a single Modbus-TCP socket to
//! the `ObdLink` trait.

use super::types::ConnectionState;
use std::time::Duration;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(16);

/// Tracks state and attempt count; does not itself own the link or sleep —
/// the orchestrator's run loop calls [`Self::backoff_for_attempt`] and
/// drives the actual delay so it stays cancellable on shutdown.
pub struct ConnectionRecovery {
    state: ConnectionState,
    attempt: u32,
}

impl ConnectionRecovery {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// About to attempt a connect (initial or reconnect).
    pub fn begin_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// A connect attempt succeeded.
    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempt = 0;
    }

    /// A query on an otherwise-connected link failed in a way that still
    /// leaves it worth polling (spec.md's `LinkState::Degraded`).
    pub fn mark_degraded(&mut self) {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Degraded;
        }
    }

    /// The link reported itself unusable: move to `Reconnecting` and return
    /// the backoff duration to wait before the next connect attempt.
    pub fn mark_lost(&mut self) -> Duration {
        self.state = ConnectionState::Reconnecting;
        let delay = self.backoff_for_attempt(self.attempt);
        self.attempt += 1;
        delay
    }

    /// A connect attempt itself failed: stay in `Reconnecting`, return the
    /// next backoff.
    pub fn mark_connect_failed(&mut self) -> Duration {
        self.state = ConnectionState::Reconnecting;
        let delay = self.backoff_for_attempt(self.attempt);
        self.attempt += 1;
        delay
    }

    /// Manual stop (shutdown): force `Disconnected` without scheduling any
    /// further retries.
    pub fn force_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.attempt = 0;
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = BASE_BACKOFF.saturating_mul(1 << attempt.min(8));
        scaled.min(MAX_BACKOFF)
    }
}

impl Default for ConnectionRecovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut r = ConnectionRecovery::new();
        assert_eq!(r.mark_lost(), Duration::from_secs(1));
        assert_eq!(r.mark_connect_failed(), Duration::from_secs(2));
        assert_eq!(r.mark_connect_failed(), Duration::from_secs(4));
        assert_eq!(r.mark_connect_failed(), Duration::from_secs(8));
        assert_eq!(r.mark_connect_failed(), Duration::from_secs(16));
        assert_eq!(r.mark_connect_failed(), Duration::from_secs(16));
    }

    #[test]
    fn success_resets_attempt_counter() {
        let mut r = ConnectionRecovery::new();
        let _ = r.mark_lost();
        let _ = r.mark_connect_failed();
        r.begin_connecting();
        r.mark_connected();
        assert_eq!(r.state(), ConnectionState::Connected);
        assert_eq!(r.mark_lost(), Duration::from_secs(1));
    }

    #[test]
    fn force_disconnected_clears_attempts() {
        let mut r = ConnectionRecovery::new();
        let _ = r.mark_lost();
        let _ = r.mark_connect_failed();
        r.force_disconnected();
        assert_eq!(r.state(), ConnectionState::Disconnected);
        assert_eq!(r.mark_lost(), Duration::from_secs(1));
    }

    #[test]
    fn degraded_only_applies_from_connected() {
        let mut r = ConnectionRecovery::new();
        r.mark_degraded();
        assert_eq!(r.state(), ConnectionState::Disconnected);
        r.begin_connecting();
        r.mark_connected();
        r.mark_degraded();
        assert_eq!(r.state(), ConnectionState::Degraded);
    }
}
