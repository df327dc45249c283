//! DriveDetector: a four-state machine over RPM readings that emits
//! `drive_start`/`drive_end` once a condition has held for its configured
//! duration, grounded on `session::ChargingSessionManager`'s
//! start/update/end shape and `controls.rs`'s state-dispatch style.

use crate::config::AnalysisConfig;
use crate::logging::{StructuredLogger, get_logger};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle state of the detector itself (not the vehicle's engine state
/// directly — `Starting`/`Stopping` are the hold windows before a
/// transition is confirmed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// One emitted transition, carrying the drive id it concerns.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveEvent {
    Start { drive_id: Uuid },
    End { drive_id: Uuid },
}

/// RPM-driven state machine. A dip below `start_rpm` while `Starting`
/// resets the hold timer (spec.md §4.3); transitions only fire once a
/// condition has held continuously for its configured duration.
pub struct DriveDetector {
    start_rpm: f64,
    start_hold: Duration,
    end_rpm: f64,
    end_hold: Duration,
    state: DriveState,
    hold_since: Option<Instant>,
    current_drive_id: Option<Uuid>,
    logger: StructuredLogger,
}

impl DriveDetector {
    pub fn new(cfg: &AnalysisConfig) -> Self {
        Self {
            start_rpm: cfg.start_rpm,
            start_hold: Duration::from_millis(cfg.start_hold_ms),
            end_rpm: cfg.end_rpm,
            end_hold: Duration::from_millis(cfg.end_hold_ms),
            state: DriveState::Stopped,
            hold_since: None,
            current_drive_id: None,
            logger: get_logger("drive_detector"),
        }
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn current_drive_id(&self) -> Option<Uuid> {
        self.current_drive_id
    }

    /// Feed one RPM reading at `now`, returning a transition event if one
    /// was just confirmed.
    pub fn feed(&mut self, rpm: f64, now: Instant) -> Option<DriveEvent> {
        match self.state {
            DriveState::Stopped => {
                if rpm > self.start_rpm {
                    self.state = DriveState::Starting;
                    self.hold_since = Some(now);
                }
                None
            }
            DriveState::Starting => {
                if rpm > self.start_rpm {
                    let since = self.hold_since.get_or_insert(now);
                    if now.duration_since(*since) >= self.start_hold {
                        let id = Uuid::new_v4();
                        self.current_drive_id = Some(id);
                        self.state = DriveState::Running;
                        self.hold_since = None;
                        self.logger.info(&format!("drive_start {}", id));
                        return Some(DriveEvent::Start { drive_id: id });
                    }
                } else {
                    // Dip below threshold resets the hold timer.
                    self.hold_since = None;
                    self.state = DriveState::Stopped;
                }
                None
            }
            DriveState::Running => {
                if rpm <= self.end_rpm {
                    self.state = DriveState::Stopping;
                    self.hold_since = Some(now);
                }
                None
            }
            DriveState::Stopping => {
                if rpm <= self.end_rpm {
                    let since = self.hold_since.get_or_insert(now);
                    if now.duration_since(*since) >= self.end_hold {
                        self.state = DriveState::Stopped;
                        self.hold_since = None;
                        if let Some(id) = self.current_drive_id.take() {
                            self.logger.info(&format!("drive_end {}", id));
                            return Some(DriveEvent::End { drive_id: id });
                        }
                        self.logger
                            .error("reached Stopping with no current drive id, dropping drive_end");
                    }
                } else {
                    // RPM picked back up before the end hold elapsed: still driving.
                    self.hold_since = None;
                    self.state = DriveState::Running;
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AnalysisConfig {
        AnalysisConfig {
            start_rpm: 500.0,
            start_hold_ms: 10_000,
            end_rpm: 0.0,
            end_hold_ms: 60_000,
        }
    }

    #[test]
    fn full_start_and_end_cycle() {
        let mut d = DriveDetector::new(&cfg());
        let t0 = Instant::now();

        assert_eq!(d.feed(800.0, t0), None);
        assert_eq!(d.state(), DriveState::Starting);

        // Not yet held long enough.
        assert_eq!(d.feed(800.0, t0 + Duration::from_secs(5)), None);

        let start = d.feed(800.0, t0 + Duration::from_secs(10));
        assert!(matches!(start, Some(DriveEvent::Start { .. })));
        assert_eq!(d.state(), DriveState::Running);
        let drive_id = d.current_drive_id().unwrap();

        assert_eq!(d.feed(0.0, t0 + Duration::from_secs(22)), None);
        assert_eq!(d.state(), DriveState::Stopping);

        assert_eq!(
            d.feed(0.0, t0 + Duration::from_secs(22 + 59)),
            None
        );

        let end = d.feed(0.0, t0 + Duration::from_secs(22 + 60));
        assert_eq!(end, Some(DriveEvent::End { drive_id }));
        assert_eq!(d.state(), DriveState::Stopped);
        assert_eq!(d.current_drive_id(), None);
    }

    #[test]
    fn dip_below_start_rpm_resets_the_hold_timer() {
        let mut d = DriveDetector::new(&cfg());
        let t0 = Instant::now();
        d.feed(800.0, t0);
        assert_eq!(d.state(), DriveState::Starting);

        // Dip back to idle before the hold elapses.
        d.feed(100.0, t0 + Duration::from_secs(5));
        assert_eq!(d.state(), DriveState::Stopped);

        // Needs a fresh full hold from here.
        d.feed(800.0, t0 + Duration::from_secs(6));
        assert_eq!(
            d.feed(800.0, t0 + Duration::from_secs(6 + 9)),
            None
        );
        assert!(
            d.feed(800.0, t0 + Duration::from_secs(6 + 10))
                .is_some()
        );
    }

    #[test]
    fn rpm_pickup_during_stopping_cancels_the_end_hold() {
        let mut d = DriveDetector::new(&cfg());
        let t0 = Instant::now();
        d.feed(800.0, t0);
        d.feed(800.0, t0 + Duration::from_secs(10));
        assert_eq!(d.state(), DriveState::Running);

        d.feed(0.0, t0 + Duration::from_secs(11));
        assert_eq!(d.state(), DriveState::Stopping);

        d.feed(800.0, t0 + Duration::from_secs(12));
        assert_eq!(d.state(), DriveState::Running);
    }
}
