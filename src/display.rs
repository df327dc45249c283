//! Status display: a small capability facade so the orchestrator can push
//! current state to whatever status surface the SBC has, without caring
//! whether that's a physical panel or nothing at all.

use crate::logging::{StructuredLogger, get_logger, subscribe_log_lines};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Snapshot handed to the display on every refresh tick.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub connection_state: String,
    pub active_profile: String,
    pub drive_active: bool,
    pub last_rpm: Option<f64>,
    pub ups_soc_pct: Option<f32>,
    pub power_source: String,
}

/// Capability every display implementation must provide. Mirrors the
/// connect/render/teardown shape used elsewhere for hardware facades so
/// HardwareSup and Display can share the same lifecycle conventions.
#[async_trait]
pub trait DisplayDriver: Send {
    async fn init(&mut self) -> crate::error::Result<()>;

    /// Render one status snapshot. Implementations must never block for
    /// long or propagate transient errors up as fatal — a broken display
    /// degrades to logging only, it never stops telemetry acquisition.
    async fn render(&mut self, snapshot: &StatusSnapshot);

    /// Stream of recently formatted log lines, for implementations that
    /// show a scrolling log (e.g. a small OLED). The default headless
    /// implementation ignores this.
    fn log_lines(&self) -> broadcast::Receiver<String> {
        subscribe_log_lines()
    }
}

/// Always-available fallback: logs the snapshot at DEBUG instead of
/// driving physical hardware. Used when `hardware.display_enabled` is
/// false, or as the automatic degrade target if a real driver's `init`
/// fails.
pub struct HeadlessDisplay {
    logger: StructuredLogger,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self {
            logger: get_logger("display"),
        }
    }
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DisplayDriver for HeadlessDisplay {
    async fn init(&mut self) -> crate::error::Result<()> {
        self.logger.info("headless display active (no physical panel configured)");
        Ok(())
    }

    async fn render(&mut self, snapshot: &StatusSnapshot) {
        self.logger.debug(&format!(
            "status: conn={} profile={} drive_active={} rpm={:?} soc={:?} power={}",
            snapshot.connection_state,
            snapshot.active_profile,
            snapshot.drive_active,
            snapshot.last_rpm,
            snapshot.ups_soc_pct,
            snapshot.power_source
        ));
    }
}
