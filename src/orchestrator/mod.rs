//! Orchestrator: owns every component for the lifetime of the process,
//! wires event routes between them, drives the connection recovery state
//! machine, and runs the strict startup/shutdown sequences.
//!
//! Grounded on `driver::runtime::AlfenDriver`'s constructor-then-`run()`
//! `select!` loop shape and `modbus::ModbusConnectionManager`'s
//! reconnect-with-backoff, generalized from a single Modbus-TCP socket and
//! charging session to an event-routed fleet of independent workers.

mod recovery;
mod types;

pub use recovery::ConnectionRecovery;
pub use types::{ConnectionState, ExitOutcome, StatusSnapshot};

use crate::alerts::AlertEngine;
use crate::analysis::AiAnalysisClient;
use crate::backup::{BackupCoordinator, FilesystemUploader, NullUploader, Uploader};
use crate::config::Config;
use crate::display::{DisplayDriver, HeadlessDisplay, StatusSnapshot as DisplaySnapshot};
use crate::drive::{DriveDetector, DriveEvent};
use crate::error::{ErrorKind, Result, VigilError};
use crate::hardware::button::{ButtonSource, SimulatedButton};
use crate::hardware::status_led::{NoopLed, StatusLed};
use crate::hardware::ups::{SimulatedUps, UpsSource};
use crate::hardware::{HardwareEvent, HardwareSup};
use crate::logging::{StructuredLogger, get_logger};
use crate::obd::simulator::SimulatedLink;
use crate::obd::serial::SerialLink;
use crate::obd::ObdLink;
use crate::poller::{Poller, PollerHandle, PollerOutput};
use crate::profile_switcher::ProfileSwitcher;
use crate::profiles::ProfileStore;
use crate::stats::StatsEngine;
use crate::store::model::{ConnectionEvent, ConnectionEventKind, PowerSource};
use crate::store::Store;
use crate::vin::VinResolver;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant as TokioInstant;

#[cfg(feature = "hardware")]
use crate::hardware::button::LinuxGpioButton;
#[cfg(feature = "hardware")]
use crate::hardware::status_led::LinuxGpioLed;
#[cfg(feature = "hardware")]
use crate::hardware::ups::LinuxI2cUps;

const COMPONENT_STOP_DEADLINE: Duration = Duration::from_secs(5);
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);
const POWER_LOSS_GRACE: Duration = Duration::from_secs(30);
const BACKUP_SCHEDULE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Every long-running worker the orchestrator spawned, recorded in the
/// order it was started so shutdown can unwind it in reverse (spec.md
/// §4.1 "strict reverse order").
pub struct Handles {
    poller_handle: PollerHandle,
    poller_task: tokio::task::JoinHandle<()>,
    hardware_task: tokio::task::JoinHandle<()>,
}

/// Central component owner. Constructed once via [`Orchestrator::new`],
/// driven to completion via [`Orchestrator::run`].
pub struct Orchestrator {
    config: Config,
    store: Store,
    profiles: ProfileStore,
    vin_resolver: VinResolver,
    display: Box<dyn DisplayDriver>,
    status_led: Box<dyn StatusLed>,
    stats: StatsEngine,
    drive_detector: DriveDetector,
    alerts: AlertEngine,
    profile_switcher: ProfileSwitcher,
    backup: BackupCoordinator,
    ai_analysis: Option<AiAnalysisClient>,
    recovery: ConnectionRecovery,
    started_at: Instant,
    error_counts: HashMap<&'static str, u64>,
    readings_since_health_check: u64,
    drive_active: bool,
    last_rpm: Option<f64>,
    last_ups: Option<(f32, PowerSource)>,
    logger: StructuredLogger,
}

impl Orchestrator {
    /// Steps 1-13 of the startup sequence (spec.md §4.1). Step 14 (wiring
    /// event routes and the first connection attempt) happens in [`Self::run`]
    /// since it needs the worker tasks this constructor does not yet own.
    pub async fn new(
        config: Config,
        simulate: bool,
    ) -> Result<(
        Self,
        Handles,
        mpsc::Receiver<PollerOutput>,
        mpsc::Receiver<HardwareEvent>,
        watch::Sender<bool>,
    )> {
        let logger = get_logger("orchestrator");

        // Step 2: Store, schema, pragmas (enforced inside Store::open).
        let store = Store::open(&config.database.path)?;
        store.init_schema()?;

        // Step 3: ProfileStore + active profile.
        let profiles = ProfileStore::from_config(&config.profiles, &store)?;
        let active_profile = profiles.active();

        // Step 4: ObdLink, not yet connected.
        let obd: Box<dyn ObdLink> = if simulate || config.simulator.enabled {
            Box::new(SimulatedLink::new(config.simulator.seed))
        } else {
            Box::new(SerialLink::new(&config.bluetooth))
        };

        // Step 5: VinResolver, cold.
        let vin_resolver = VinResolver::new(store.clone())?;

        // Step 6: Display.
        let mut display: Box<dyn DisplayDriver> = Box::new(HeadlessDisplay::new());
        if let Err(e) = display.init().await {
            logger.warn(&format!("display init failed, continuing headless: {}", e));
            display = Box::new(HeadlessDisplay::new());
        }

        // Step 7: HardwareSup subdevices. Real hardware is attempted only
        // outside simulation; a failed `open` degrades to the simulated
        // stand-in rather than aborting startup (spec.md §9: "optional
        // components are always constructed").
        let ups: Box<dyn UpsSource> = build_ups(&config, simulate, &logger);
        let button: Box<dyn ButtonSource> = build_button(&config, simulate, &logger);
        let status_led: Box<dyn StatusLed> = build_led(&config, simulate, &logger);

        let (hardware_out_tx, hardware_out_rx) = mpsc::channel(64);
        let hardware_sup = HardwareSup::new(&config.hardware, ups, button, hardware_out_tx);

        // Step 8-10: cold engines over the active profile.
        let stats = StatsEngine::new(store.clone());
        let drive_detector = DriveDetector::new(&config.analysis);
        let alerts = AlertEngine::new(&active_profile);

        // Step 11: Poller.
        let (poller_out_tx, poller_out_rx) = mpsc::channel(256);
        let (poller, poller_handle) = Poller::new(
            obd,
            config.realtime_data.enabled_parameters.clone(),
            active_profile.poll_interval_ms,
            active_profile.id.clone(),
            poller_out_tx,
        );

        // Step 12: ProfileSwitcher.
        let profile_switcher = ProfileSwitcher::new();

        // Step 13: BackupCoordinator + catch-up.
        let uploader: Box<dyn Uploader> = if config.backup.remote_target.is_empty() {
            Box::new(NullUploader)
        } else {
            Box::new(FilesystemUploader::new(&config.backup.remote_target))
        };
        let backup = BackupCoordinator::new(&config.backup, &config.database.path, store.clone(), uploader)?;
        backup.run_catchup_if_due().await?;

        let ai_analysis = if config.ai_analysis.enabled {
            Some(AiAnalysisClient::new(&config.ai_analysis)?)
        } else {
            None
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));
        let hardware_task = tokio::spawn(hardware_sup.run(shutdown_rx));

        let orchestrator = Self {
            config,
            store,
            profiles,
            vin_resolver,
            display,
            status_led,
            stats,
            drive_detector,
            alerts,
            profile_switcher,
            backup,
            ai_analysis,
            recovery: ConnectionRecovery::new(),
            started_at: Instant::now(),
            error_counts: HashMap::new(),
            readings_since_health_check: 0,
            drive_active: false,
            last_rpm: None,
            last_ups: None,
            logger,
        };

        let handles = Handles {
            poller_handle,
            poller_task,
            hardware_task,
        };

        Ok((orchestrator, handles, poller_out_rx, hardware_out_rx, shutdown_tx))
    }
}

fn build_ups(config: &Config, simulate: bool, logger: &StructuredLogger) -> Box<dyn UpsSource> {
    #[cfg(feature = "hardware")]
    {
        if !simulate && !config.simulator.enabled {
            match LinuxI2cUps::open(&config.hardware.i2c_bus, config.hardware.i2c_addr) {
                Ok(ups) => return Box::new(ups),
                Err(e) => logger.warn(&format!("UPS unavailable, degrading to simulated: {}", e)),
            }
        }
    }
    #[cfg(not(feature = "hardware"))]
    {
        let _ = (config, logger);
    }
    let _ = simulate;
    Box::new(SimulatedUps::new())
}

fn build_button(config: &Config, simulate: bool, logger: &StructuredLogger) -> Box<dyn ButtonSource> {
    #[cfg(feature = "hardware")]
    {
        if !simulate && !config.simulator.enabled {
            match LinuxGpioButton::open(&config.hardware.gpio_chip, config.hardware.gpio_button_pin, true) {
                Ok(button) => return Box::new(button),
                Err(e) => logger.warn(&format!("button unavailable, degrading to simulated: {}", e)),
            }
        }
    }
    #[cfg(not(feature = "hardware"))]
    {
        let _ = (config, logger);
    }
    let _ = simulate;
    Box::new(SimulatedButton::never_pressed())
}

fn build_led(config: &Config, simulate: bool, logger: &StructuredLogger) -> Box<dyn StatusLed> {
    #[cfg(feature = "hardware")]
    {
        if !simulate && !config.simulator.enabled && config.hardware.display_enabled {
            match LinuxGpioLed::open(&config.hardware.gpio_chip, config.hardware.gpio_button_pin, false) {
                Ok(led) => return Box::new(led),
                Err(e) => logger.warn(&format!("status LED unavailable, degrading to no-op: {}", e)),
            }
        }
    }
    #[cfg(not(feature = "hardware"))]
    {
        let _ = (config, logger);
    }
    let _ = simulate;
    Box::new(NoopLed)
}

/// Resolve to `deadline` if set, otherwise never — lets a `tokio::select!`
/// arm be conditionally active without restructuring the loop.
async fn sleep_until_opt(deadline: Option<TokioInstant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

impl Orchestrator {
    /// Step 14 plus the full run loop: wires event routing (implicitly, via
    /// this function's match arms) and drives the connection recovery state
    /// machine, health monitor, and shutdown handling until exit.
    pub async fn run(
        mut self,
        handles: Handles,
        mut poller_out_rx: mpsc::Receiver<PollerOutput>,
        mut hardware_out_rx: mpsc::Receiver<HardwareEvent>,
        shutdown_tx: watch::Sender<bool>,
    ) -> ExitOutcome {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                self.logger.error(&format!("failed to install SIGTERM handler: {}", e));
                return ExitOutcome::SystemError;
            }
        };

        let mut vin_queried = false;
        let mut reconnect_deadline: Option<TokioInstant> = Some(TokioInstant::now());
        let mut power_loss_deadline: Option<TokioInstant> = None;
        let mut health_timer = tokio::time::interval(HEALTH_INTERVAL);
        let mut backup_schedule_timer = tokio::time::interval(BACKUP_SCHEDULE_CHECK_INTERVAL);
        let mut last_scheduled_backup_date: Option<chrono::NaiveDate> = None;
        let mut vacuum_timer = tokio::time::interval(Duration::from_secs(
            u64::from(self.config.database.vacuum_interval_hours.max(1)) * 3600,
        ));
        vacuum_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown_requested = false;
        let mut outcome = ExitOutcome::Success;

        loop {
            tokio::select! {
                biased;

                _ = tokio::signal::ctrl_c(), if !shutdown_requested => {
                    self.logger.info("SIGINT received, beginning shutdown");
                    shutdown_requested = true;
                    break;
                }
                _ = sigterm.recv(), if !shutdown_requested => {
                    self.logger.info("SIGTERM received, beginning shutdown");
                    shutdown_requested = true;
                    break;
                }

                _ = sleep_until_opt(reconnect_deadline), if !shutdown_requested => {
                    reconnect_deadline = None;
                    self.attempt_connect(&handles.poller_handle, &mut vin_queried).await;
                    if self.recovery.state() != ConnectionState::Connected {
                        reconnect_deadline = Some(TokioInstant::now() + self.schedule_retry());
                    }
                }

                _ = sleep_until_opt(power_loss_deadline), if !shutdown_requested => {
                    self.logger.warn("power loss grace window elapsed, beginning shutdown");
                    shutdown_requested = true;
                    break;
                }

                _ = health_timer.tick() => {
                    self.emit_health_snapshot();
                }

                _ = backup_schedule_timer.tick(), if !shutdown_requested => {
                    self.maybe_run_scheduled_backup(&mut last_scheduled_backup_date).await;
                }

                _ = vacuum_timer.tick(), if !shutdown_requested => {
                    self.run_vacuum();
                }

                Some(event) = hardware_out_rx.recv(), if !shutdown_requested => {
                    match self.handle_hardware_event(event, &mut power_loss_deadline).await {
                        ShutdownRequest::None => {}
                        ShutdownRequest::Begin => {
                            shutdown_requested = true;
                            break;
                        }
                    }
                }

                maybe_output = poller_out_rx.recv(), if !shutdown_requested => {
                    match maybe_output {
                        Some(PollerOutput::Reading(reading)) => {
                            self.handle_reading(reading, &handles.poller_handle).await;
                        }
                        Some(PollerOutput::LinkLost) => {
                            self.logger.warn("OBD link reported lost, entering reconnect");
                            handles.poller_handle.pause().await;
                            // spec.md §4.1's recovery state machine passes through
                            // `Degraded` between `Connected` and `Reconnecting`: the
                            // query that just failed was still being served by a
                            // connection we had believed healthy, so the link is
                            // momentarily degraded before we commit to the backoff
                            // schedule and mark it lost outright.
                            self.recovery.mark_degraded();
                            let delay = self.recovery.mark_lost();
                            *self.error_counts.entry("retryable").or_insert(0) += 1;
                            reconnect_deadline = Some(TokioInstant::now() + delay);
                        }
                        None => {
                            self.logger.error("poller output channel closed unexpectedly");
                            outcome = ExitOutcome::SystemError;
                            shutdown_requested = true;
                            break;
                        }
                    }
                }
            }
        }

        let _ = shutdown_tx.send(true);

        // spec.md §4.1/§8 property 10: a second termination signal delivered
        // while the orderly shutdown below is still running forces an
        // immediate exit, as does exceeding the global shutdown budget
        // (property 2). `shutdown()` borrows `self` mutably, so the signal
        // futures below must not touch `self` directly; a cloned logger
        // handle covers the one log line we need on the forced path.
        let force_logger = self.logger.clone();
        let shutdown_or_force = self.shutdown_or_force(handles, SHUTDOWN_BUDGET);
        tokio::pin!(shutdown_or_force);

        let forced = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => true,
            _ = sigterm.recv() => true,
            budget_exceeded = &mut shutdown_or_force => budget_exceeded,
        };

        if forced {
            force_logger.error("second termination signal or shutdown budget exceeded, forcing exit");
            return ExitOutcome::ForceExit;
        }

        outcome
    }

    /// Races the reverse-order shutdown sequence against `budget`; returns
    /// `true` if the budget elapsed before shutdown finished (spec.md §8
    /// property 2 — a distinct outcome from a second termination signal,
    /// but both map to [`ExitOutcome::ForceExit`] in the caller).
    async fn shutdown_or_force(&mut self, handles: Handles, budget: Duration) -> bool {
        let shutdown_fut = self.shutdown(handles);
        tokio::pin!(shutdown_fut);
        tokio::select! {
            _ = tokio::time::sleep(budget) => true,
            _ = &mut shutdown_fut => false,
        }
    }

    /// Returns the backoff to wait before the *next* attempt, having just
    /// scheduled one. Centralizes the `mark_connect_failed` call so `run`'s
    /// select arm stays simple.
    fn schedule_retry(&mut self) -> Duration {
        self.recovery.mark_connect_failed()
    }

    async fn attempt_connect(&mut self, poller: &PollerHandle, vin_queried: &mut bool) {
        self.recovery.begin_connecting();
        match poller.connect().await {
            Ok(()) => {
                self.recovery.mark_connected();
                poller.resume().await;
                self.logger.info("OBD link connected");
                let _ = self.store.insert_connection_event(&ConnectionEvent {
                    ts: now_ms(),
                    kind: ConnectionEventKind::Connected,
                    detail: String::new(),
                });
                if !*vin_queried {
                    *vin_queried = true;
                    if let Ok(Some(vin)) = poller.query_vin().await {
                        if let Ok(Some(info)) = self.vin_resolver.resolve(&vin, false).await {
                            self.logger.info(&format!(
                                "vehicle identified: {} {} {:?}",
                                info.make.as_deref().unwrap_or("?"),
                                info.model.as_deref().unwrap_or("?"),
                                info.year
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                self.logger.warn(&format!("OBD connect failed: {}", e));
                *self.error_counts.entry(error_bucket(&e)).or_insert(0) += 1;
            }
        }
    }

    /// Routing row: Poller -> Display, DriveDetector, AlertEngine, Store.
    async fn handle_reading(
        &mut self,
        reading: crate::store::model::Reading,
        poller_handle: &PollerHandle,
    ) {
        self.readings_since_health_check += 1;
        if reading.parameter == "RPM" {
            self.last_rpm = Some(reading.value);
        }

        self.display
            .render(&DisplaySnapshot {
                connection_state: self.recovery.state().as_str().to_string(),
                active_profile: self.profiles.active_id(),
                drive_active: self.drive_active,
                last_rpm: self.last_rpm,
                ups_soc_pct: self.last_ups.map(|(soc, _)| soc),
                power_source: self
                    .last_ups
                    .map(|(_, src)| power_source_str(src).to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            })
            .await;

        if reading.parameter == "RPM" {
            if let Some(event) = self.drive_detector.feed(reading.value, Instant::now()) {
                self.handle_drive_event(event, poller_handle).await;
            }
        }

        for alert in self.alerts.evaluate(&reading, Instant::now()) {
            self.logger.warn(&format!("alert: threshold={} value={}", alert.threshold_id, alert.value));
            if let Err(e) = self.status_led.set_alert(true) {
                self.logger.debug(&format!("status LED update failed: {}", e));
            }
            if let Err(e) = self.store.insert_alert_event(&alert) {
                self.logger.error(&format!("failed to persist alert: {}", e));
                *self.error_counts.entry("system").or_insert(0) += 1;
            }
        }

        if let Err(e) = self.store.insert_readings_batch(std::slice::from_ref(&reading)) {
            self.logger.error(&format!("failed to persist reading: {}", e));
            *self.error_counts.entry("system").or_insert(0) += 1;
        }
    }

    /// Routing rows: DriveDetector -> Store/Display/Poller (drive_start) and
    /// Store/StatsEngine/Display/ProfileSwitcher/BackupCoordinator (drive_end).
    async fn handle_drive_event(&mut self, event: DriveEvent, poller_handle: &PollerHandle) {
        match event {
            DriveEvent::Start { drive_id } => {
                self.drive_active = true;
                poller_handle.set_drive_id(Some(drive_id)).await;
                let session = crate::store::model::DriveSession {
                    id: drive_id,
                    profile_id: self.profiles.active_id(),
                    start_ts: now_ms(),
                    end_ts: None,
                };
                if let Err(e) = self.store.open_drive_session(&session) {
                    self.logger.error(&format!("failed to open drive session: {}", e));
                    *self.error_counts.entry("system").or_insert(0) += 1;
                }
                self.logger.info(&format!("drive started: {}", drive_id));
            }
            DriveEvent::End { drive_id } => {
                self.drive_active = false;
                poller_handle.set_drive_id(None).await;
                if let Err(e) = self.store.close_drive_session(drive_id, now_ms()) {
                    self.logger.error(&format!("failed to close drive session: {}", e));
                    *self.error_counts.entry("system").or_insert(0) += 1;
                }

                let parameters = self.config.realtime_data.enabled_parameters.clone();
                match self.stats.compute_and_store(drive_id, &parameters) {
                    Ok(results) => {
                        self.logger.info(&format!(
                            "analysis complete for drive {}: {} parameter(s)",
                            drive_id,
                            results.len()
                        ));
                        if let Some(client) = &self.ai_analysis {
                            if let Some(rec) = client.summarize(drive_id, &results).await {
                                self.logger.info(&format!("AI summary for drive {}: {}", drive_id, rec.summary));
                            }
                        }
                    }
                    Err(e) => {
                        self.logger.error(&format!("stats computation failed: {}", e));
                        *self.error_counts.entry("system").or_insert(0) += 1;
                    }
                }

                match self.profile_switcher.apply_pending(&self.profiles) {
                    Ok(Some(new_id)) => {
                        let active = self.profiles.active();
                        self.alerts.reload(&active);
                        poller_handle
                            .set_active_profile(active.id.clone(), active.poll_interval_ms)
                            .await;
                        self.logger.info(&format!("profile switched to '{}' at drive boundary", new_id));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.logger.error(&format!("profile switch failed: {}", e));
                        *self.error_counts.entry("configuration").or_insert(0) += 1;
                    }
                }

                self.backup.note_drive_completed(drive_id);
                self.logger.info(&format!("drive ended: {}", drive_id));
            }
        }
    }

    /// Routing rows: HardwareSup -> Store/Display (ups_sample), and the
    /// power/button events the orchestrator itself reacts to for shutdown.
    async fn handle_hardware_event(
        &mut self,
        event: HardwareEvent,
        power_loss_deadline: &mut Option<TokioInstant>,
    ) -> ShutdownRequest {
        match event {
            HardwareEvent::UpsSample(sample) => {
                self.last_ups = Some((sample.soc_pct, sample.source));
                if let Err(e) = self.store.insert_ups_sample(&sample) {
                    self.logger.error(&format!("failed to persist UPS sample: {}", e));
                    *self.error_counts.entry("system").or_insert(0) += 1;
                }
                ShutdownRequest::None
            }
            HardwareEvent::PowerSourceChanged(source) => {
                match source {
                    PowerSource::Battery => {
                        self.logger.warn("power source changed to battery, scheduling shutdown grace window");
                        *power_loss_deadline = Some(TokioInstant::now() + POWER_LOSS_GRACE);
                    }
                    PowerSource::Mains => {
                        if power_loss_deadline.take().is_some() {
                            self.logger.info("power restored within grace window, shutdown cancelled");
                        }
                    }
                }
                ShutdownRequest::None
            }
            HardwareEvent::LowBattery => {
                self.logger.warn("low battery threshold crossed, beginning shutdown");
                ShutdownRequest::Begin
            }
            HardwareEvent::ButtonShortPress => ShutdownRequest::None,
            HardwareEvent::ButtonLongPress => {
                self.logger.warn("long button press, beginning shutdown");
                ShutdownRequest::Begin
            }
        }
    }

    /// Fires the BackupCoordinator's daily scheduled backup (spec.md §4.6)
    /// at most once per calendar day, the first time a periodic check
    /// lands inside the configured wall-clock minute.
    async fn maybe_run_scheduled_backup(&mut self, last_fired: &mut Option<chrono::NaiveDate>) {
        let now = chrono::Local::now();
        if !self.backup.is_scheduled_now(now) {
            return;
        }
        let today = now.date_naive();
        if *last_fired == Some(today) {
            return;
        }
        *last_fired = Some(today);
        match self.backup.run_backup().await {
            Ok(record) => self.logger.info(&format!(
                "scheduled backup finished: status={:?} bytes={}",
                record.status, record.bytes
            )),
            Err(e) => {
                self.logger.error(&format!("scheduled backup failed: {}", e));
                *self.error_counts.entry("system").or_insert(0) += 1;
            }
        }
    }

    /// Reclaims Reading rows older than `database.retention_days` (spec.md
    /// §3 Lifecycles: "older rows are reclaimed by a periodic vacuum"), on
    /// the `database.vacuum_interval_hours` cadence.
    fn run_vacuum(&mut self) {
        match self.store.vacuum_old_readings(self.config.database.retention_days) {
            Ok(removed) => {
                if removed > 0 {
                    self.logger.info(&format!("vacuum reclaimed {} stale reading row(s)", removed));
                }
            }
            Err(e) => {
                self.logger.error(&format!("vacuum failed: {}", e));
                *self.error_counts.entry("system").or_insert(0) += 1;
            }
        }
    }

    fn emit_health_snapshot(&mut self) {
        let readings_per_minute = self.readings_since_health_check as f64
            / (HEALTH_INTERVAL.as_secs_f64() / 60.0);
        self.readings_since_health_check = 0;
        self.logger.info(&format!(
            "health: state={} readings/min={:.1} errors={:?} uptime_s={}",
            self.recovery.state().as_str(),
            readings_per_minute,
            self.error_counts,
            self.started_at.elapsed().as_secs()
        ));
    }

    /// Point-in-time status view exposed to callers (spec.md §4.1
    /// `status()`). Named [`StatusSnapshot`] like `display::StatusSnapshot`
    /// but distinct: this one is a health/introspection view, not a render
    /// payload, so the two never need to be interchangeable.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            connection_state: self.recovery.state().as_str().to_string(),
            active_profile: self.profiles.active_id(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            readings_per_minute: 0.0,
            error_counts: self
                .error_counts
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            drive_active: self.drive_active,
        }
    }

    /// Strict reverse-order shutdown (spec.md §4.1): Poller/HardwareSup
    /// workers first (they were started last), then a final backup attempt
    /// and vacuum, each bounded by `COMPONENT_STOP_DEADLINE`, the whole
    /// sequence bounded by `SHUTDOWN_BUDGET`.
    async fn shutdown(&mut self, handles: Handles) {
        let deadline = tokio::time::Instant::now() + SHUTDOWN_BUDGET;

        let _ = handles.poller_handle.disconnect().await;
        if tokio::time::timeout(COMPONENT_STOP_DEADLINE, handles.poller_task).await.is_err() {
            self.logger.warn("poller worker did not stop within its deadline, proceeding");
        }
        if tokio::time::timeout(COMPONENT_STOP_DEADLINE, handles.hardware_task).await.is_err() {
            self.logger.warn("hardware supervisor did not stop within its deadline, proceeding");
        }

        let _ = self.store.insert_connection_event(&ConnectionEvent {
            ts: now_ms(),
            kind: ConnectionEventKind::Disconnected,
            detail: "orderly shutdown".to_string(),
        });

        if tokio::time::Instant::now() < deadline {
            if let Err(e) = self.backup.run_backup().await {
                self.logger.warn(&format!("final shutdown backup failed: {}", e));
            }
        }

        self.logger.info("shutdown complete");
    }
}

enum ShutdownRequest {
    None,
    Begin,
}

fn power_source_str(source: PowerSource) -> &'static str {
    match source {
        PowerSource::Mains => "mains",
        PowerSource::Battery => "battery",
    }
}

fn error_bucket(e: &VigilError) -> &'static str {
    match e.kind() {
        ErrorKind::Retryable => "retryable",
        ErrorKind::Configuration => "configuration",
        ErrorKind::Data => "data",
        ErrorKind::Authentication => "authentication",
        ErrorKind::System => "system",
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
