//! Status LED / haptic feedback sink driven by [`AlertEngine`](crate::alerts::AlertEngine)
//! output routed through the orchestrator (spec.md §4.1: `alert` ->
//! `HardwareSup`). Absent hardware degrades to [`NoopLed`] rather than
//! branching on a feature flag at every call site.

use crate::error::Result;

pub trait StatusLed: Send {
    /// Set the alert indicator on (`true`) or off (`false`).
    fn set_alert(&mut self, active: bool) -> Result<()>;
}

/// Default sink when no LED is configured: always succeeds, does nothing.
pub struct NoopLed;

impl StatusLed for NoopLed {
    fn set_alert(&mut self, _active: bool) -> Result<()> {
        Ok(())
    }
}

/// Real status LED on a GPIO output line.
#[cfg(feature = "hardware")]
pub struct LinuxGpioLed {
    line_handle: gpio_cdev::LineHandle,
    active_low: bool,
}

#[cfg(feature = "hardware")]
impl LinuxGpioLed {
    pub fn open(chip_path: &str, line_offset: u32, active_low: bool) -> Result<Self> {
        use crate::error::VigilError;

        let mut chip = gpio_cdev::Chip::new(chip_path)
            .map_err(|e| VigilError::hardware(format!("failed to open {}: {}", chip_path, e)))?;
        let line = chip
            .get_line(line_offset)
            .map_err(|e| VigilError::hardware(format!("failed to get GPIO line {}: {}", line_offset, e)))?;
        let default_off_level = u8::from(active_low);
        let line_handle = line
            .request(gpio_cdev::LineRequestFlags::OUTPUT, default_off_level, "vigil-led")
            .map_err(|e| VigilError::hardware(format!("failed to request GPIO line {}: {}", line_offset, e)))?;
        Ok(Self {
            line_handle,
            active_low,
        })
    }
}

#[cfg(feature = "hardware")]
impl StatusLed for LinuxGpioLed {
    fn set_alert(&mut self, active: bool) -> Result<()> {
        use crate::error::VigilError;

        let level = if active != self.active_low { 1 } else { 0 };
        self.line_handle
            .set_value(level)
            .map_err(|e| VigilError::hardware(format!("GPIO write failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_led_always_succeeds() {
        let mut led = NoopLed;
        assert!(led.set_alert(true).is_ok());
        assert!(led.set_alert(false).is_ok());
    }
}
