//! UPS battery telemetry source. A small capability trait (mirroring
//! `ObdLink`/`ModbusLike`) so the simulator and the real I2C fuel-gauge
//! chip share one contract.

use crate::error::{Result, VigilError};
use crate::store::model::{PowerSource, UpsSample};
use async_trait::async_trait;

#[async_trait]
pub trait UpsSource: Send {
    async fn sample(&mut self) -> Result<UpsSample>;
}

/// Deterministic fake UPS used by `--simulate` and tests: SOC drains
/// slowly on battery, holds steady on mains.
pub struct SimulatedUps {
    soc_pct: f32,
    source: PowerSource,
}

impl SimulatedUps {
    pub fn new() -> Self {
        Self {
            soc_pct: 100.0,
            source: PowerSource::Mains,
        }
    }

    /// Force the simulated rail, used by tests exercising the low-battery
    /// and power-source-change paths (spec.md §8 S6).
    pub fn set_source(&mut self, source: PowerSource) {
        self.source = source;
    }

    pub fn set_soc(&mut self, soc_pct: f32) {
        self.soc_pct = soc_pct;
    }
}

impl Default for SimulatedUps {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[async_trait]
impl UpsSource for SimulatedUps {
    async fn sample(&mut self) -> Result<UpsSample> {
        if matches!(self.source, PowerSource::Battery) {
            self.soc_pct = (self.soc_pct - 0.1).max(0.0);
        }
        Ok(UpsSample {
            ts: now_ms(),
            voltage_mv: if matches!(self.source, PowerSource::Mains) {
                12_600
            } else {
                12_000
            },
            current_ma_signed: if matches!(self.source, PowerSource::Mains) {
                500
            } else {
                -350
            },
            soc_pct: self.soc_pct,
            source: self.source,
        })
    }
}

/// Real UPS telemetry over I2C (e.g. an MAX17048-class fuel gauge),
/// feature-gated behind `hardware` since it needs a real bus device.
#[cfg(feature = "hardware")]
pub struct LinuxI2cUps {
    device: linux_embedded_hal::I2cdev,
    addr: u8,
}

#[cfg(feature = "hardware")]
impl LinuxI2cUps {
    pub fn open(bus_path: &str, addr: u8) -> Result<Self> {
        let device = linux_embedded_hal::I2cdev::new(bus_path)
            .map_err(|e| VigilError::hardware(format!("failed to open I2C bus {}: {}", bus_path, e)))?;
        Ok(Self { device, addr })
    }
}

#[cfg(feature = "hardware")]
#[async_trait]
impl UpsSource for LinuxI2cUps {
    async fn sample(&mut self) -> Result<UpsSample> {
        use embedded_hal::i2c::I2c;

        // Fuel-gauge register layout: [0x02..0x04) = SOC (percent * 256),
        // [0x04..0x06) = voltage (mV), [0x08..0x0A) = current (signed mA).
        let mut soc_regs = [0u8; 2];
        let mut voltage_regs = [0u8; 2];
        let mut current_regs = [0u8; 2];

        self.device
            .write_read(self.addr, &[0x02], &mut soc_regs)
            .map_err(|e| VigilError::hardware(format!("UPS SOC read failed: {:?}", e)))?;
        self.device
            .write_read(self.addr, &[0x04], &mut voltage_regs)
            .map_err(|e| VigilError::hardware(format!("UPS voltage read failed: {:?}", e)))?;
        self.device
            .write_read(self.addr, &[0x08], &mut current_regs)
            .map_err(|e| VigilError::hardware(format!("UPS current read failed: {:?}", e)))?;

        let soc_raw = u16::from_be_bytes(soc_regs);
        let soc_pct = f32::from(soc_raw) / 256.0;
        let voltage_mv = u32::from(u16::from_be_bytes(voltage_regs));
        let current_ma_signed = i32::from(i16::from_be_bytes(current_regs));

        let source = if voltage_mv > 12_800 {
            PowerSource::Mains
        } else {
            PowerSource::Battery
        };

        Ok(UpsSample {
            ts: now_ms(),
            voltage_mv,
            current_ma_signed,
            soc_pct,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_ups_drains_on_battery_and_holds_on_mains() {
        let mut ups = SimulatedUps::new();
        let s1 = ups.sample().await.unwrap();
        assert_eq!(s1.source, PowerSource::Mains);
        let s2 = ups.sample().await.unwrap();
        assert_eq!(s1.soc_pct, s2.soc_pct);

        ups.set_source(PowerSource::Battery);
        let before = ups.sample().await.unwrap().soc_pct;
        let after = ups.sample().await.unwrap().soc_pct;
        assert!(after < before);
    }
}
