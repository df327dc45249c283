//! Deterministic, seeded fake `ObdLink` used by `--simulate` and tests.
//!
//! Readings drift smoothly rather than jumping randomly between ticks so
//! that DriveDetector and AlertEngine see realistic sequences (a rising
//! RPM ramp past `start_rpm`, a coolant temp that can cross a threshold
//! and come back down).

use super::{LinkState, ObdLink, PidValue};
use crate::error::{Result, VigilError};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::collections::HashMap;

/// Deterministic simulated vehicle link, seeded for reproducibility.
pub struct SimulatedLink {
    rng: StdRng,
    state: LinkState,
    rpm: f64,
    coolant_temp: f64,
    speed: f64,
    fuel_level: f64,
    vin: Option<String>,
}

impl SimulatedLink {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            state: LinkState::Disconnected,
            rpm: 0.0,
            coolant_temp: 20.0,
            speed: 0.0,
            fuel_level: 80.0,
            vin: Some("1HGCM82633A004352".to_string()),
        }
    }

    /// Drive the idle/running RPM randomly toward either 0 (idle/off) or a
    /// cruising band, so a simulated session eventually starts and ends.
    fn step(&mut self) {
        let delta: f64 = self.rng.gen_range(-300.0..400.0);
        self.rpm = (self.rpm + delta).clamp(0.0, 6500.0);
        if self.rpm < 400.0 {
            self.rpm = 0.0;
        }

        if self.rpm > 500.0 {
            self.coolant_temp = (self.coolant_temp + self.rng.gen_range(0.0..0.8)).min(112.0);
            self.speed = (self.speed + self.rng.gen_range(-5.0..8.0)).clamp(0.0, 130.0);
            self.fuel_level = (self.fuel_level - self.rng.gen_range(0.0..0.02)).max(0.0);
        } else {
            self.coolant_temp = (self.coolant_temp - self.rng.gen_range(0.0..0.3)).max(15.0);
            self.speed = 0.0;
        }
    }
}

#[async_trait]
impl ObdLink for SimulatedLink {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn state(&self) -> LinkState {
        self.state
    }

    async fn connect(&mut self) -> Result<()> {
        self.state = LinkState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state = LinkState::Disconnected;
        Ok(())
    }

    async fn query(&mut self, parameter: &str) -> Result<PidValue> {
        if self.state != LinkState::Connected {
            return Err(VigilError::obd("simulated link is not connected"));
        }
        self.step();

        let (value, unit) = match parameter {
            "RPM" => (self.rpm, "rpm"),
            "COOLANT_TEMP" => (self.coolant_temp, "celsius"),
            "SPEED" => (self.speed, "km/h"),
            "FUEL_LEVEL" => (self.fuel_level, "percent"),
            other => {
                return Err(VigilError::data(format!(
                    "simulator has no value for parameter '{}'",
                    other
                )));
            }
        };

        Ok(PidValue {
            parameter: parameter.to_string(),
            value,
            unit: unit.to_string(),
        })
    }

    async fn query_vin(&mut self) -> Result<Option<String>> {
        Ok(self.vin.clone())
    }
}

/// Fixed-table variant used by unit tests that need exact, non-random
/// values for specific parameters at specific call counts.
#[cfg(test)]
pub struct ScriptedLink {
    state: LinkState,
    calls: HashMap<String, usize>,
    script: HashMap<String, Vec<f64>>,
}

#[cfg(test)]
impl ScriptedLink {
    pub fn new(script: HashMap<String, Vec<f64>>) -> Self {
        Self {
            state: LinkState::Disconnected,
            calls: HashMap::new(),
            script,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ObdLink for ScriptedLink {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn state(&self) -> LinkState {
        self.state
    }

    async fn connect(&mut self) -> Result<()> {
        self.state = LinkState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state = LinkState::Disconnected;
        Ok(())
    }

    async fn query(&mut self, parameter: &str) -> Result<PidValue> {
        let values = self
            .script
            .get(parameter)
            .ok_or_else(|| VigilError::data(format!("no script for '{}'", parameter)))?;
        let idx = self.calls.entry(parameter.to_string()).or_insert(0);
        let value = values[(*idx).min(values.len() - 1)];
        *idx += 1;
        Ok(PidValue {
            parameter: parameter.to_string(),
            value,
            unit: String::new(),
        })
    }

    async fn query_vin(&mut self) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_seed_produces_same_sequence() {
        let mut a = SimulatedLink::new(42);
        let mut b = SimulatedLink::new(42);
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        for _ in 0..20 {
            let va = a.query("RPM").await.unwrap();
            let vb = b.query("RPM").await.unwrap();
            assert_eq!(va.value, vb.value);
        }
    }

    #[tokio::test]
    async fn query_before_connect_is_an_obd_error() {
        let mut link = SimulatedLink::new(1);
        let err = link.query("RPM").await.unwrap_err();
        assert!(matches!(err, VigilError::Obd { .. }));
    }

    #[tokio::test]
    async fn unknown_parameter_is_a_data_error() {
        let mut link = SimulatedLink::new(1);
        link.connect().await.unwrap();
        let err = link.query("TIRE_PRESSURE").await.unwrap_err();
        assert!(matches!(err, VigilError::Data { .. }));
    }

    #[tokio::test]
    async fn scripted_link_replays_values_in_order() {
        let mut script = HashMap::new();
        script.insert("RPM".to_string(), vec![400.0, 900.0, 1200.0]);
        let mut link = ScriptedLink::new(script);
        link.connect().await.unwrap();
        assert_eq!(link.query("RPM").await.unwrap().value, 400.0);
        assert_eq!(link.query("RPM").await.unwrap().value, 900.0);
        assert_eq!(link.query("RPM").await.unwrap().value, 1200.0);
        assert_eq!(link.query("RPM").await.unwrap().value, 1200.0);
    }
}
