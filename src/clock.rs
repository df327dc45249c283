//! Interval timer facade shared by every periodic worker.
//!
//! Wraps `tokio::time::Interval` so "wait for the next tick or shutdown"
//! is one call, and so pausing a worker genuinely stops the timer instead
//! of letting ticks queue up to fire back-to-back on resume.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval};

/// Outcome of waiting on an [`IntervalDriver`].
pub enum Wait {
    /// The interval elapsed; the caller should do one unit of work.
    Tick,
    /// The shutdown flag flipped to `true`; the caller should stop.
    Shutdown,
}

/// A single periodic timer with explicit pause/resume.
pub struct IntervalDriver {
    period: Duration,
    timer: Option<Interval>,
}

impl IntervalDriver {
    /// Create a running driver ticking every `period`.
    pub fn new(period: Duration) -> Self {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            period,
            timer: Some(timer),
        }
    }

    /// Create a driver that starts paused; call [`Self::resume`] to arm it.
    pub fn new_paused(period: Duration) -> Self {
        Self {
            period,
            timer: None,
        }
    }

    /// Stop the underlying timer. Any ticks that would have fired while
    /// paused are never delivered, matching the orchestrator's requirement
    /// that a paused Poller not accumulate ticks.
    pub fn pause(&mut self) {
        self.timer = None;
    }

    /// Re-arm the timer, starting a fresh period from now.
    pub fn resume(&mut self) {
        if self.timer.is_none() {
            let mut timer = interval(self.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.timer = Some(timer);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.timer.is_none()
    }

    /// The configured tick period, regardless of pause state.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for either the next tick or the shutdown flag, whichever comes
    /// first. While paused, only shutdown can resolve this call.
    pub async fn tick_or_shutdown(&mut self, shutdown: &mut watch::Receiver<bool>) -> Wait {
        match &mut self.timer {
            Some(timer) => {
                tokio::select! {
                    _ = timer.tick() => Wait::Tick,
                    _ = shutdown.changed() => Wait::Shutdown,
                }
            }
            None => {
                let _ = shutdown.changed().await;
                Wait::Shutdown
            }
        }
    }
}

/// Monotonic clock used for hold-timers (drive detection, backoff) so wall-
/// clock adjustments never perturb scheduling decisions.
#[derive(Debug, Clone, Copy)]
pub struct Clock;

impl Clock {
    pub fn now() -> Instant {
        Instant::now()
    }
}

/// Sleep for `duration` unless the shutdown flag flips first. Returns
/// `true` if the sleep ran to completion, `false` if shutdown interrupted it.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn pause_stops_ticks_from_accumulating() {
        let mut driver = IntervalDriver::new(Duration::from_millis(10));
        let (_tx, mut rx) = watch::channel(false);

        matches!(
            driver.tick_or_shutdown(&mut rx).await,
            Wait::Tick | Wait::Shutdown
        );
        driver.pause();
        assert!(driver.is_paused());

        tokio::time::advance(Duration::from_millis(100)).await;
        driver.resume();
        assert!(!driver.is_paused());
    }

    #[tokio::test]
    async fn shutdown_interrupts_long_sleep() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move { sleep_or_shutdown(Duration::from_secs(60), &mut rx).await });
        tx.send(true).unwrap();
        let completed = handle.await.unwrap();
        assert!(!completed);
    }
}
