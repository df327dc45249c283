//! HardwareSup: UPS telemetry, GPIO button, status display/LED, each
//! running its own poller with a consecutive-error counter that demotes
//! repeat failures to DEBUG and backs the poll interval off (spec.md
//! §4.5). Every subdevice is always constructed; an absent device just
//! means its trait impl always errors, so it degrades to DEBUG-only
//! logging rather than being conditionally compiled out (spec.md §9
//! "Global flag for availability... becomes configuration plus
//! component-local state").
//!
//! Grounded on `driver::modbus_like::ModbusLike` for the capability-trait
//! shape and `modbus::ModbusConnectionManager`'s retry/backoff classifier
//! for the per-subdevice error counters.

pub mod button;
pub mod status_led;
pub mod ups;

use crate::clock::IntervalDriver;
use crate::config::HardwareConfig;
use crate::logging::{StructuredLogger, get_logger};
use crate::store::model::{PowerSource, UpsSample};
use button::ButtonSource;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use ups::UpsSource;

/// Event stream HardwareSup produces, per spec.md §4.5.
#[derive(Debug, Clone)]
pub enum HardwareEvent {
    UpsSample(UpsSample),
    PowerSourceChanged(PowerSource),
    /// Edge-triggered: fired once when SOC crosses below the configured
    /// threshold, not on every sample while it remains low.
    LowBattery,
    ButtonShortPress,
    ButtonLongPress,
}

/// Per-subdevice consecutive-error counter and interval backoff. First
/// failure logs at WARN; from the Nth (default 3) onward, identical
/// failures log at DEBUG and the poll interval doubles up to `cap`. A
/// success resets both.
struct SubdeviceBackoff {
    consecutive_errors: u32,
    demote_after: u32,
    base: Duration,
    current: Duration,
    cap: Duration,
}

impl SubdeviceBackoff {
    fn new(base: Duration, cap: Duration) -> Self {
        Self {
            consecutive_errors: 0,
            demote_after: 3,
            base,
            current: base,
            cap,
        }
    }

    /// Returns `true` if this failure should log at WARN (still within
    /// the first `demote_after` occurrences), `false` if it should be
    /// demoted to DEBUG.
    fn record_failure(&mut self) -> bool {
        self.consecutive_errors += 1;
        let warn = self.consecutive_errors <= self.demote_after;
        if self.consecutive_errors > self.demote_after {
            self.current = (self.current * 2).min(self.cap);
        }
        warn
    }

    fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.current = self.base;
    }

    fn interval(&self) -> Duration {
        self.current
    }
}

/// Owns the three optional subdevices and emits their events on a single
/// channel the orchestrator fans out from.
pub struct HardwareSup {
    ups: Box<dyn UpsSource>,
    button: Box<dyn ButtonSource>,
    low_soc_pct: f32,
    ups_base_interval: Duration,
    button_poll_interval: Duration,
    out_tx: mpsc::Sender<HardwareEvent>,
    logger: StructuredLogger,
}

impl HardwareSup {
    pub fn new(
        cfg: &HardwareConfig,
        ups: Box<dyn UpsSource>,
        button: Box<dyn ButtonSource>,
        out_tx: mpsc::Sender<HardwareEvent>,
    ) -> Self {
        Self {
            ups,
            button,
            low_soc_pct: cfg.low_soc_pct,
            ups_base_interval: Duration::from_millis(cfg.ups_poll_interval_ms),
            button_poll_interval: Duration::from_millis(200),
            out_tx,
            logger: get_logger("hardware"),
        }
    }

    /// Run both subdevice pollers until `shutdown` flips. Spawned as its
    /// own task by the orchestrator.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        let mut ups_backoff = SubdeviceBackoff::new(self.ups_base_interval, Duration::from_secs(60));
        let mut button_backoff =
            SubdeviceBackoff::new(self.button_poll_interval, Duration::from_secs(5));

        let mut ups_timer = IntervalDriver::new(ups_backoff.interval());
        let mut button_timer = IntervalDriver::new(button_backoff.interval());

        let mut last_source: Option<PowerSource> = None;
        let mut low_battery_latched = false;
        let mut press_started: Option<Instant> = None;
        let mut long_press_fired = false;

        let mut ups_shutdown = shutdown.clone();
        let mut button_shutdown = shutdown;

        loop {
            tokio::select! {
                wait = ups_timer.tick_or_shutdown(&mut ups_shutdown) => {
                    match wait {
                        crate::clock::Wait::Shutdown => break,
                        crate::clock::Wait::Tick => {
                            self.poll_ups(&mut ups_backoff, &mut last_source, &mut low_battery_latched).await;
                            if ups_timer_interval_changed(&ups_timer, ups_backoff.interval()) {
                                ups_timer = IntervalDriver::new(ups_backoff.interval());
                            }
                        }
                    }
                }
                wait = button_timer.tick_or_shutdown(&mut button_shutdown) => {
                    match wait {
                        crate::clock::Wait::Shutdown => break,
                        crate::clock::Wait::Tick => {
                            self.poll_button(&mut button_backoff, &mut press_started, &mut long_press_fired).await;
                            if ups_timer_interval_changed(&button_timer, button_backoff.interval()) {
                                button_timer = IntervalDriver::new(button_backoff.interval());
                            }
                        }
                    }
                }
            }
        }
        self.logger.info("hardware supervisor stopped");
    }

    async fn poll_ups(
        &mut self,
        backoff: &mut SubdeviceBackoff,
        last_source: &mut Option<PowerSource>,
        low_battery_latched: &mut bool,
    ) {
        match self.ups.sample().await {
            Ok(sample) => {
                backoff.record_success();
                if *last_source != Some(sample.source) {
                    *last_source = Some(sample.source);
                    let _ = self
                        .out_tx
                        .send(HardwareEvent::PowerSourceChanged(sample.source))
                        .await;
                }

                let low = sample.soc_pct < self.low_soc_pct;
                if low && !*low_battery_latched {
                    *low_battery_latched = true;
                    let _ = self.out_tx.send(HardwareEvent::LowBattery).await;
                } else if !low {
                    *low_battery_latched = false;
                }

                let _ = self.out_tx.send(HardwareEvent::UpsSample(sample)).await;
            }
            Err(e) => {
                if backoff.record_failure() {
                    self.logger.warn(&format!("UPS sample failed: {}", e));
                } else {
                    self.logger.debug(&format!("UPS sample failed (repeat): {}", e));
                }
            }
        }
    }

    /// Long-press fires the instant the hold crosses the 3s threshold,
    /// while the button is still down — not on release — so a shutdown it
    /// triggers is not delayed by however long the user keeps holding.
    /// Short-press still only resolves on release, once we know the hold
    /// never reached that threshold.
    async fn poll_button(
        &mut self,
        backoff: &mut SubdeviceBackoff,
        press_started: &mut Option<Instant>,
        long_press_fired: &mut bool,
    ) {
        const LONG_PRESS_HOLD: Duration = Duration::from_secs(3);
        match self.button.is_pressed().await {
            Ok(true) => {
                backoff.record_success();
                let started = *press_started.get_or_insert_with(Instant::now);
                if !*long_press_fired && started.elapsed() >= LONG_PRESS_HOLD {
                    *long_press_fired = true;
                    let _ = self.out_tx.send(HardwareEvent::ButtonLongPress).await;
                }
            }
            Ok(false) => {
                backoff.record_success();
                if let Some(started) = press_started.take() {
                    if !*long_press_fired && started.elapsed() < LONG_PRESS_HOLD {
                        let _ = self.out_tx.send(HardwareEvent::ButtonShortPress).await;
                    }
                }
                *long_press_fired = false;
            }
            Err(e) => {
                if backoff.record_failure() {
                    self.logger.warn(&format!("button poll failed: {}", e));
                } else {
                    self.logger
                        .debug(&format!("button poll failed (repeat): {}", e));
                }
            }
        }
    }
}

fn ups_timer_interval_changed(timer: &IntervalDriver, wanted: Duration) -> bool {
    timer.period() != wanted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_demotes_after_threshold_and_caps() {
        let mut b = SubdeviceBackoff::new(Duration::from_secs(1), Duration::from_secs(8));
        assert!(b.record_failure()); // 1
        assert!(b.record_failure()); // 2
        assert!(b.record_failure()); // 3
        assert!(!b.record_failure()); // 4: demoted, interval doubles
        assert_eq!(b.interval(), Duration::from_secs(2));
        assert!(!b.record_failure());
        assert_eq!(b.interval(), Duration::from_secs(4));
        assert!(!b.record_failure());
        assert_eq!(b.interval(), Duration::from_secs(8));
        assert!(!b.record_failure());
        assert_eq!(b.interval(), Duration::from_secs(8)); // capped

        b.record_success();
        assert_eq!(b.interval(), Duration::from_secs(1));
    }
}
