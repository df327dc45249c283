//! Poller: periodic sampling of enabled OBD-II parameters, emitting one
//! [`Reading`] per parameter per tick.
//!
//! Grounded on `driver::runtime_poll`'s "read -> decode -> update caches ->
//! broadcast" shape and `clock::IntervalDriver` for the pause/resume timer.
//! Runs as its own task; the orchestrator drives connect/disconnect/pause
//! through [`PollerHandle`] rather than holding the `ObdLink` itself, since
//! the link lives inside the worker that actually issues the blocking
//! queries (spec.md §5: "ObdLink queries... must be cancellable when
//! Poller is paused").

use crate::clock::{IntervalDriver, Wait};
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::obd::ObdLink;
use crate::store::model::Reading;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

/// Commands the orchestrator sends to the running Poller worker.
pub enum PollerCommand {
    Connect(oneshot::Sender<Result<()>>),
    Disconnect(oneshot::Sender<Result<()>>),
    Pause,
    Resume,
    SetDriveId(Option<Uuid>),
    /// Applied on `profile_changed` (AlertEngine/Poller routing row):
    /// swaps both the active profile id tag and the poll interval.
    SetActiveProfile { id: String, poll_interval_ms: u32 },
    /// One-off Mode 09 PID 02 VIN query, issued once after the link first
    /// connects. Routed through the link's owning worker rather than a
    /// direct handle since only the Poller task ever touches the link.
    QueryVin(oneshot::Sender<Result<Option<String>>>),
}

/// What the Poller worker reports back on its output channel.
pub enum PollerOutput {
    Reading(Reading),
    /// A query failed with a Retryable/System classification: the link is
    /// no longer usable. The orchestrator's connection recovery state
    /// machine should transition out of `Connected`.
    LinkLost,
}

/// Handle used by the orchestrator to drive a Poller running on its own
/// task. Cloning is cheap; only one orchestrator ever holds it in
/// practice.
#[derive(Clone)]
pub struct PollerHandle {
    cmd_tx: mpsc::Sender<PollerCommand>,
}

impl PollerHandle {
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(PollerCommand::Connect(tx)).await;
        rx.await
            .unwrap_or_else(|_| Err(crate::error::VigilError::obd("poller worker gone")))
    }

    pub async fn disconnect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(PollerCommand::Disconnect(tx)).await;
        rx.await
            .unwrap_or_else(|_| Err(crate::error::VigilError::obd("poller worker gone")))
    }

    pub async fn pause(&self) {
        let _ = self.cmd_tx.send(PollerCommand::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.cmd_tx.send(PollerCommand::Resume).await;
    }

    pub async fn set_drive_id(&self, id: Option<Uuid>) {
        let _ = self.cmd_tx.send(PollerCommand::SetDriveId(id)).await;
    }

    pub async fn set_active_profile(&self, id: String, poll_interval_ms: u32) {
        let _ = self
            .cmd_tx
            .send(PollerCommand::SetActiveProfile {
                id,
                poll_interval_ms,
            })
            .await;
    }

    pub async fn query_vin(&self) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(PollerCommand::QueryVin(tx)).await;
        rx.await
            .unwrap_or_else(|_| Err(crate::error::VigilError::obd("poller worker gone")))
    }
}

/// The Poller worker itself: owns the `ObdLink`, the enabled parameter
/// list, and the per-epoch "already warned about this parameter" set.
pub struct Poller {
    obd: Box<dyn ObdLink>,
    parameters: Vec<String>,
    interval: IntervalDriver,
    active_profile_id: String,
    drive_id: Option<Uuid>,
    warned_this_epoch: HashSet<String>,
    skip_this_epoch: HashSet<String>,
    out_tx: mpsc::Sender<PollerOutput>,
    cmd_rx: mpsc::Receiver<PollerCommand>,
    logger: StructuredLogger,
}

impl Poller {
    /// Build a Poller plus the [`PollerHandle`] the orchestrator keeps.
    /// Starts paused: the orchestrator resumes it only once the
    /// connection recovery state machine reaches `Connected`.
    pub fn new(
        obd: Box<dyn ObdLink>,
        parameters: Vec<String>,
        poll_interval_ms: u32,
        active_profile_id: String,
        out_tx: mpsc::Sender<PollerOutput>,
    ) -> (Self, PollerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let poller = Self {
            obd,
            parameters,
            interval: IntervalDriver::new_paused(Duration::from_millis(u64::from(
                poll_interval_ms,
            ))),
            active_profile_id,
            drive_id: None,
            warned_this_epoch: HashSet::new(),
            skip_this_epoch: HashSet::new(),
            out_tx,
            cmd_rx,
            logger: get_logger("poller"),
        };
        (poller, PollerHandle { cmd_tx })
    }

    /// Run until `shutdown` flips true. Intended to be spawned with
    /// `tokio::spawn` by the orchestrator.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                wait = self.interval.tick_or_shutdown(&mut shutdown) => {
                    match wait {
                        Wait::Tick => self.sample_once().await,
                        Wait::Shutdown => break,
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.apply(cmd).await,
                        None => break,
                    }
                }
            }
        }
        self.logger.info("poller worker stopped");
    }

    async fn apply(&mut self, cmd: PollerCommand) {
        match cmd {
            PollerCommand::Connect(reply) => {
                let result = self.obd.connect().await;
                if result.is_ok() {
                    // A fresh connection epoch: forget prior per-parameter warnings.
                    self.warned_this_epoch.clear();
                    self.skip_this_epoch.clear();
                }
                let _ = reply.send(result);
            }
            PollerCommand::Disconnect(reply) => {
                self.interval.pause();
                let _ = reply.send(self.obd.disconnect().await);
            }
            PollerCommand::Pause => self.interval.pause(),
            PollerCommand::Resume => self.interval.resume(),
            PollerCommand::SetDriveId(id) => self.drive_id = id,
            PollerCommand::SetActiveProfile {
                id,
                poll_interval_ms,
            } => {
                self.active_profile_id = id;
                let was_paused = self.interval.is_paused();
                self.interval = IntervalDriver::new(Duration::from_millis(u64::from(
                    poll_interval_ms,
                )));
                if was_paused {
                    self.interval.pause();
                }
            }
            PollerCommand::QueryVin(reply) => {
                let _ = reply.send(self.obd.query_vin().await);
            }
        }
    }

    async fn sample_once(&mut self) {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        for parameter in self.parameters.clone() {
            if self.skip_this_epoch.contains(&parameter) {
                continue;
            }
            match self.obd.query(&parameter).await {
                Ok(pid) => {
                    let reading = Reading {
                        timestamp_ms: now_ms,
                        parameter: pid.parameter,
                        value: pid.value,
                        unit: pid.unit,
                        profile_id: Some(self.active_profile_id.clone()),
                        drive_id: self.drive_id,
                    };
                    if self.out_tx.send(PollerOutput::Reading(reading)).await.is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == crate::error::ErrorKind::Data => {
                    if self.warned_this_epoch.insert(parameter.clone()) {
                        self.logger.warn(&format!(
                            "parameter '{}' unsupported this epoch: {}",
                            parameter, e
                        ));
                    } else {
                        self.logger.debug(&format!(
                            "parameter '{}' still unsupported this epoch",
                            parameter
                        ));
                    }
                    self.skip_this_epoch.insert(parameter);
                }
                Err(e) => {
                    self.logger
                        .error(&format!("link query failed, reporting lost: {}", e));
                    let _ = self.out_tx.send(PollerOutput::LinkLost).await;
                    self.interval.pause();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obd::simulator::SimulatedLink;

    #[tokio::test]
    async fn paused_poller_never_emits_while_tick_skipped() {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (poller, _handle) = Poller::new(
            Box::new(SimulatedLink::new(1)),
            vec!["RPM".to_string()],
            10,
            "daily".to_string(),
            out_tx,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(shutdown_rx));

        // Never resumed/connected: no reading should appear within a short window.
        let res = tokio::time::timeout(Duration::from_millis(50), out_rx.recv()).await;
        assert!(res.is_err(), "paused poller should not emit readings");

        shutdown_tx.send(true).unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn connected_and_resumed_poller_emits_tagged_readings() {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (poller, handle) = Poller::new(
            Box::new(SimulatedLink::new(1)),
            vec!["RPM".to_string()],
            5,
            "daily".to_string(),
            out_tx,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(shutdown_rx));

        handle.connect().await.unwrap();
        handle.set_drive_id(Some(Uuid::nil())).await;
        handle.resume().await;

        let output = tokio::time::timeout(Duration::from_millis(500), out_rx.recv())
            .await
            .expect("expected a reading before timeout")
            .expect("channel open");
        match output {
            PollerOutput::Reading(r) => {
                assert_eq!(r.parameter, "RPM");
                assert_eq!(r.profile_id, Some("daily".to_string()));
                assert_eq!(r.drive_id, Some(Uuid::nil()));
            }
            PollerOutput::LinkLost => panic!("unexpected link loss"),
        }

        shutdown_tx.send(true).unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn unsupported_parameter_warns_once_then_is_skipped_for_epoch() {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (poller, handle) = Poller::new(
            Box::new(SimulatedLink::new(1)),
            vec!["TIRE_PRESSURE".to_string()],
            5,
            "daily".to_string(),
            out_tx,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(shutdown_rx));

        handle.connect().await.unwrap();
        handle.resume().await;

        // No readings should ever come through for an unsupported parameter.
        let res = tokio::time::timeout(Duration::from_millis(100), out_rx.recv()).await;
        assert!(res.is_err() || matches!(res.unwrap(), None));

        shutdown_tx.send(true).unwrap();
        let _ = task.await;
    }
}
