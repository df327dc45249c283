//! OBD-II link abstraction: a small async trait the Poller and VinResolver
//! drive, with a simulator implementation for `--simulate`/tests and a real
//! ELM327-over-Bluetooth-serial implementation for the SBC.

pub mod serial;
pub mod simulator;

use crate::error::Result;
use async_trait::async_trait;
use std::any::Any;

/// One decoded OBD-II parameter reading, before it is stamped with a
/// timestamp/profile/drive id and turned into a [`crate::store::model::Reading`].
#[derive(Debug, Clone, PartialEq)]
pub struct PidValue {
    pub parameter: String,
    pub value: f64,
    pub unit: String,
}

/// Connection lifecycle state, mirrored by the orchestrator's connection
/// recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but the last N queries failed; still worth polling.
    Degraded,
}

/// Capability every OBD-II transport must provide. Mirrors the shape the
/// rest of the system needs (connect, query a PID, disconnect, report
/// state) without committing callers to a particular wire protocol.
#[async_trait]
pub trait ObdLink: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Current link state as last observed by this implementation. Not a
    /// live probe; callers that need a fresh answer should `query` and
    /// inspect the result.
    fn state(&self) -> LinkState;

    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Query a single named OBD-II parameter (e.g. "RPM", "COOLANT_TEMP").
    /// Returns [`crate::error::VigilError::Obd`] on transport failure and
    /// [`crate::error::VigilError::Data`] on a malformed/unsupported response.
    async fn query(&mut self, parameter: &str) -> Result<PidValue>;

    /// Query the vehicle's VIN via OBD-II Mode 09 PID 02, when supported.
    /// Returns `Ok(None)` rather than an error when the vehicle reports no
    /// VIN (some ECUs genuinely don't expose it), per spec's
    /// "Not Applicable"/"N/A"/empty-string handling.
    async fn query_vin(&mut self) -> Result<Option<String>>;
}
