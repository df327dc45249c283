//! Real ELM327-over-Bluetooth-SPP transport.
//!
//! A paired ELM327 dongle shows up to Linux as a `/dev/rfcommN` TTY.
//! `serialport` only exposes a blocking API, so every actual I/O call runs
//! inside `tokio::task::spawn_blocking`; `connect`/`query`/`disconnect`
//! themselves stay `async fn` so callers never notice.

use super::{LinkState, ObdLink, PidValue};
use crate::config::BluetoothConfig;
use crate::error::{Result, VigilError};
use crate::logging::{StructuredLogger, get_logger};
use async_trait::async_trait;
use serialport::SerialPort;
use std::any::Any;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tokio::task;

/// AT commands sent once right after the port opens, mirroring a typical
/// ELM327 init sequence: reset, echo off, headers off, auto protocol.
const INIT_COMMANDS: &[&str] = &["ATZ", "ATE0", "ATH0", "ATSP0"];

/// ELM327-over-serial `ObdLink`. The port itself is `!Send`-unfriendly to
/// hold across awaits, so it's moved into and out of `spawn_blocking`
/// closures rather than stored behind a lock held across `.await`.
pub struct SerialLink {
    config: BluetoothConfig,
    port: Option<Box<dyn SerialPort>>,
    state: LinkState,
    logger: StructuredLogger,
}

impl SerialLink {
    pub fn new(config: &BluetoothConfig) -> Self {
        Self {
            config: config.clone(),
            port: None,
            state: LinkState::Disconnected,
            logger: get_logger("obd_serial"),
        }
    }

    fn device_path(&self) -> String {
        format!("/dev/rfcomm{}", self.config.channel)
    }
}

#[async_trait]
impl ObdLink for SerialLink {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn state(&self) -> LinkState {
        self.state
    }

    async fn connect(&mut self) -> Result<()> {
        self.state = LinkState::Connecting;
        let path = self.device_path();
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let port = task::spawn_blocking(move || {
            serialport::new(&path, 38_400)
                .timeout(timeout)
                .open()
                .map_err(|e| VigilError::obd(format!("failed to open {}: {}", path, e)))
        })
        .await
        .map_err(|e| VigilError::obd(format!("connect task panicked: {}", e)))??;

        self.port = Some(port);
        self.state = LinkState::Connected;

        for cmd in INIT_COMMANDS {
            if let Err(e) = self.send_raw(cmd).await {
                self.state = LinkState::Disconnected;
                self.port = None;
                return Err(e);
            }
        }
        self.logger.info("ELM327 link initialized");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.port = None;
        self.state = LinkState::Disconnected;
        Ok(())
    }

    async fn query(&mut self, parameter: &str) -> Result<PidValue> {
        let command = pid_command(parameter)?;
        let response = self.send_raw(&command).await?;
        let value = decode_response(parameter, &response)?;
        Ok(PidValue {
            parameter: parameter.to_string(),
            value,
            unit: unit_for(parameter),
        })
    }

    async fn query_vin(&mut self) -> Result<Option<String>> {
        let response = self.send_raw("0902").await?;
        let vin = decode_vin(&response);
        match vin.as_deref() {
            None | Some("") | Some("Not Applicable") | Some("N/A") => Ok(None),
            Some(_) => Ok(vin),
        }
    }
}

impl SerialLink {
    /// Write `command\r` to the port and read until the `>` prompt or the
    /// per-query timeout elapses.
    async fn send_raw(&mut self, command: &str) -> Result<String> {
        let mut port = self
            .port
            .take()
            .ok_or_else(|| VigilError::obd("not connected"))?;
        let command = command.to_string();
        let timeout = Duration::from_millis(self.config.query_timeout_ms);

        let (result, port) = task::spawn_blocking(move || {
            let result = write_and_read(port.as_mut(), &command, timeout);
            (result, port)
        })
        .await
        .map_err(|e| VigilError::obd(format!("query task panicked: {}", e)))?;

        self.port = Some(port);
        result
    }
}

fn write_and_read(port: &mut dyn SerialPort, command: &str, timeout: Duration) -> Result<String> {
    let mut line = command.as_bytes().to_vec();
    line.push(b'\r');
    port.write_all(&line)
        .map_err(|e| VigilError::obd(format!("write failed: {}", e)))?;

    let mut buf = [0u8; 256];
    let mut response = Vec::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout {
            return Err(VigilError::timeout(format!(
                "no '>' prompt within {:?}",
                timeout
            )));
        }
        match port.read(&mut buf) {
            Ok(0) => return Err(VigilError::obd("link disconnected")),
            Ok(n) => {
                response.extend_from_slice(&buf[..n]);
                if response.contains(&b'>') {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(VigilError::obd(format!("read failed: {}", e))),
        }
    }
    Ok(String::from_utf8_lossy(&response).to_string())
}

fn pid_command(parameter: &str) -> Result<String> {
    match parameter {
        "RPM" => Ok("010C".to_string()),
        "COOLANT_TEMP" => Ok("0105".to_string()),
        "SPEED" => Ok("010D".to_string()),
        "FUEL_LEVEL" => Ok("012F".to_string()),
        other => Err(VigilError::data(format!("unknown OBD parameter '{}'", other))),
    }
}

fn unit_for(parameter: &str) -> String {
    match parameter {
        "RPM" => "rpm",
        "COOLANT_TEMP" => "celsius",
        "SPEED" => "km/h",
        "FUEL_LEVEL" => "percent",
        _ => "",
    }
    .to_string()
}

/// Parse a two-data-byte Mode 01 response into its physical value. Expects
/// a line shaped like `41 0C 1A F8` (mode+0x40, pid, data bytes...).
fn decode_response(parameter: &str, raw: &str) -> Result<f64> {
    let bytes = extract_data_bytes(raw)
        .ok_or_else(|| VigilError::data(format!("malformed OBD response: {:?}", raw)))?;

    match parameter {
        "RPM" => {
            let (a, b) = two_bytes(&bytes)?;
            Ok(f64::from(u16::from(a) * 256 + u16::from(b)) / 4.0)
        }
        "COOLANT_TEMP" => {
            let a = *bytes.first().ok_or_else(|| VigilError::data("truncated response"))?;
            Ok(f64::from(a) - 40.0)
        }
        "SPEED" => {
            let a = *bytes.first().ok_or_else(|| VigilError::data("truncated response"))?;
            Ok(f64::from(a))
        }
        "FUEL_LEVEL" => {
            let a = *bytes.first().ok_or_else(|| VigilError::data("truncated response"))?;
            Ok(f64::from(a) * 100.0 / 255.0)
        }
        other => Err(VigilError::data(format!("unknown OBD parameter '{}'", other))),
    }
}

fn two_bytes(bytes: &[u8]) -> Result<(u8, u8)> {
    if bytes.len() < 2 {
        return Err(VigilError::data("truncated response"));
    }
    Ok((bytes[0], bytes[1]))
}

/// Pull the hex data bytes out of an ELM327 response line, skipping the
/// echoed mode+PID header and any `SEARCHING...`/prompt noise.
fn extract_data_bytes(raw: &str) -> Option<Vec<u8>> {
    let line = raw
        .lines()
        .find(|l| l.trim_start().starts_with("41") || l.trim_start().starts_with("49"))?;
    let hex_bytes: Vec<u8> = line
        .split_whitespace()
        .filter_map(|tok| u8::from_str_radix(tok, 16).ok())
        .collect();
    // Skip the mode-echo and PID bytes (first two).
    if hex_bytes.len() <= 2 {
        return None;
    }
    Some(hex_bytes[2..].to_vec())
}

/// Decode a Mode 09 PID 02 (VIN) multi-line response into an ASCII string.
fn decode_vin(raw: &str) -> Option<String> {
    let mut bytes = Vec::new();
    for line in raw.lines() {
        let tok: Vec<u8> = line
            .split_whitespace()
            .filter_map(|t| u8::from_str_radix(t, 16).ok())
            .collect();
        if tok.len() > 2 && tok[0] == 0x49 && tok[1] == 0x02 {
            bytes.extend_from_slice(&tok[3..]);
        }
    }
    if bytes.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).trim_matches(char::from(0)).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_rpm_from_mode01_response() {
        let value = decode_response("RPM", "41 0C 1A F8\r\n>").unwrap();
        assert!((value - ((0x1A * 256 + 0xF8) as f64 / 4.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn decodes_coolant_temp_with_40_offset() {
        let value = decode_response("COOLANT_TEMP", "41 05 7B\r\n>").unwrap();
        assert!((value - (0x7B as f64 - 40.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_response_is_a_data_error() {
        let err = decode_response("RPM", "NO DATA\r\n>").unwrap_err();
        assert!(matches!(err, VigilError::Data { .. }));
    }

    #[test]
    fn unknown_parameter_is_rejected_before_sending() {
        assert!(pid_command("TIRE_PRESSURE").is_err());
    }
}
