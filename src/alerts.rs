//! AlertEngine: evaluates the active profile's thresholds against each
//! Reading, firing no more than once per `cooldown_ms` per threshold.
//!
//! Grounded on `controls.rs`'s schedule/threshold evaluation style
//! (`is_within_any_schedule`), adapted from time-windows to
//! value-thresholds-with-cooldown.

use crate::logging::{StructuredLogger, get_logger};
use crate::store::model::{AlertEvent, Direction, Profile, Reading, Threshold};
use std::collections::HashMap;
use std::time::Instant;

/// Holds the active profile's thresholds and the last-fire timestamp for
/// each, keyed by threshold id.
pub struct AlertEngine {
    thresholds: Vec<Threshold>,
    last_fired: HashMap<String, Instant>,
    logger: StructuredLogger,
}

impl AlertEngine {
    pub fn new(profile: &Profile) -> Self {
        Self {
            thresholds: profile.thresholds.clone(),
            last_fired: HashMap::new(),
            logger: get_logger("alerts"),
        }
    }

    /// Reload thresholds for a newly-active profile and clear all
    /// last-fire timestamps, per spec.md §4.4 ("On profile change it
    /// reloads thresholds and clears last-fire timestamps").
    pub fn reload(&mut self, profile: &Profile) {
        self.thresholds = profile.thresholds.clone();
        self.last_fired.clear();
        self.logger.info(&format!(
            "reloaded {} thresholds for profile '{}'",
            self.thresholds.len(),
            profile.id
        ));
    }

    /// Evaluate `reading` against every threshold whose parameter matches,
    /// at monotonic instant `now`. Returns every [`AlertEvent`] that fired
    /// (normally 0 or 1, but a Reading could match more than one threshold
    /// for the same parameter).
    pub fn evaluate(&mut self, reading: &Reading, now: Instant) -> Vec<AlertEvent> {
        let mut fired = Vec::new();
        for threshold in &self.thresholds {
            if threshold.parameter != reading.parameter {
                continue;
            }
            let condition_met = match threshold.direction {
                Direction::Above => reading.value > threshold.value,
                Direction::Below => reading.value < threshold.value,
            };
            if !condition_met {
                continue;
            }

            let cooldown_ok = match self.last_fired.get(&threshold.id) {
                Some(last) => {
                    now.duration_since(*last).as_millis() >= u128::from(threshold.cooldown_ms)
                }
                None => true,
            };
            if !cooldown_ok {
                continue;
            }

            self.last_fired.insert(threshold.id.clone(), now);
            let event = AlertEvent {
                threshold_id: threshold.id.clone(),
                reading_ts: reading.timestamp_ms,
                value: reading.value,
                profile_id: reading.profile_id.clone(),
            };
            self.logger.warn(&format!(
                "alert fired: threshold={} parameter={} value={}",
                threshold.id, threshold.parameter, threshold.value
            ));
            fired.push(event);
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with(threshold: Threshold) -> Profile {
        Profile {
            id: "daily".to_string(),
            name: "Daily".to_string(),
            thresholds: vec![threshold],
            poll_interval_ms: 1000,
        }
    }

    fn reading(parameter: &str, value: f64, ts: u64) -> Reading {
        Reading {
            timestamp_ms: ts,
            parameter: parameter.to_string(),
            value,
            unit: String::new(),
            profile_id: Some("daily".to_string()),
            drive_id: None,
        }
    }

    fn rpm_above_1000() -> Threshold {
        Threshold {
            id: "t1".to_string(),
            parameter: "RPM".to_string(),
            direction: Direction::Above,
            value: 1000.0,
            cooldown_ms: 30_000,
        }
    }

    #[test]
    fn fires_once_then_respects_cooldown() {
        let mut engine = AlertEngine::new(&profile_with(rpm_above_1000()));
        let t0 = Instant::now();

        assert_eq!(engine.evaluate(&reading("RPM", 1200.0, 0), t0).len(), 1);
        // Still within cooldown.
        assert_eq!(
            engine
                .evaluate(&reading("RPM", 1200.0, 1000), t0 + std::time::Duration::from_secs(1))
                .len(),
            0
        );
        // Cooldown elapsed.
        assert_eq!(
            engine
                .evaluate(
                    &reading("RPM", 1200.0, 30_000),
                    t0 + std::time::Duration::from_secs(30)
                )
                .len(),
            1
        );
    }

    #[test]
    fn non_matching_parameter_and_direction_never_fire() {
        let mut engine = AlertEngine::new(&profile_with(rpm_above_1000()));
        let t0 = Instant::now();
        assert!(engine.evaluate(&reading("SPEED", 1200.0, 0), t0).is_empty());
        assert!(engine.evaluate(&reading("RPM", 900.0, 0), t0).is_empty());
    }

    #[test]
    fn reload_clears_cooldown_state() {
        let mut engine = AlertEngine::new(&profile_with(rpm_above_1000()));
        let t0 = Instant::now();
        assert_eq!(engine.evaluate(&reading("RPM", 1200.0, 0), t0).len(), 1);

        engine.reload(&profile_with(rpm_above_1000()));
        // Immediately fires again since the reload cleared the cooldown clock.
        assert_eq!(engine.evaluate(&reading("RPM", 1200.0, 0), t0).len(), 1);
    }

    #[test]
    fn alert_rate_bounded_by_cooldown_over_long_stream() {
        let threshold = Threshold {
            cooldown_ms: 30_000,
            ..rpm_above_1000()
        };
        let mut engine = AlertEngine::new(&profile_with(threshold));
        let t0 = Instant::now();
        let mut fired = 0;
        for sec in 0..90u64 {
            fired += engine
                .evaluate(
                    &reading("RPM", 1200.0, sec * 1000),
                    t0 + std::time::Duration::from_secs(sec),
                )
                .len();
        }
        // period=1s < cooldown=30s over 90s -> at most 3 alerts (t=0,30,60).
        assert_eq!(fired, 3);
    }
}
