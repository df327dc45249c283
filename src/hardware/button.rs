//! Physical button source: short-press vs. long-press is distinguished by
//! [`HardwareSup`](super::HardwareSup), which only needs the instantaneous
//! pressed/released level from here.

use crate::error::{Result, VigilError};
use async_trait::async_trait;

#[async_trait]
pub trait ButtonSource: Send {
    async fn is_pressed(&mut self) -> Result<bool>;
}

/// Scripted button for `--simulate` and tests: replays a fixed sequence of
/// press states, one per call, holding the last state once exhausted.
pub struct SimulatedButton {
    script: Vec<bool>,
    cursor: usize,
}

impl SimulatedButton {
    pub fn never_pressed() -> Self {
        Self {
            script: vec![false],
            cursor: 0,
        }
    }

    pub fn scripted(script: Vec<bool>) -> Self {
        assert!(!script.is_empty(), "scripted button needs at least one state");
        Self { script, cursor: 0 }
    }
}

#[async_trait]
impl ButtonSource for SimulatedButton {
    async fn is_pressed(&mut self) -> Result<bool> {
        let value = self.script[self.cursor.min(self.script.len() - 1)];
        if self.cursor < self.script.len() - 1 {
            self.cursor += 1;
        }
        Ok(value)
    }
}

/// Real button wired to a GPIO line, read via `gpio-cdev`. Feature-gated
/// behind `hardware` since it needs a real `/dev/gpiochipN`.
#[cfg(feature = "hardware")]
pub struct LinuxGpioButton {
    line_handle: gpio_cdev::LineHandle,
    active_low: bool,
}

#[cfg(feature = "hardware")]
impl LinuxGpioButton {
    pub fn open(chip_path: &str, line_offset: u32, active_low: bool) -> Result<Self> {
        let mut chip = gpio_cdev::Chip::new(chip_path)
            .map_err(|e| VigilError::hardware(format!("failed to open {}: {}", chip_path, e)))?;
        let line = chip
            .get_line(line_offset)
            .map_err(|e| VigilError::hardware(format!("failed to get GPIO line {}: {}", line_offset, e)))?;
        let line_handle = line
            .request(gpio_cdev::LineRequestFlags::INPUT, 0, "vigil-button")
            .map_err(|e| VigilError::hardware(format!("failed to request GPIO line {}: {}", line_offset, e)))?;
        Ok(Self {
            line_handle,
            active_low,
        })
    }
}

#[cfg(feature = "hardware")]
#[async_trait]
impl ButtonSource for LinuxGpioButton {
    async fn is_pressed(&mut self) -> Result<bool> {
        let raw = self
            .line_handle
            .get_value()
            .map_err(|e| VigilError::hardware(format!("GPIO read failed: {}", e)))?;
        Ok(if self.active_low { raw == 0 } else { raw != 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_button_replays_then_holds_last_state() {
        let mut button = SimulatedButton::scripted(vec![false, true, true, false]);
        assert!(!button.is_pressed().await.unwrap());
        assert!(button.is_pressed().await.unwrap());
        assert!(button.is_pressed().await.unwrap());
        assert!(!button.is_pressed().await.unwrap());
        assert!(!button.is_pressed().await.unwrap());
    }
}
