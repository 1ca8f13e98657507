//! Production implementations of the control seams: GPIO-driven relays and
//! the RS-232 signal conditioner.

use anyhow::{Context, Result};
use gpiod::{Chip, Lines, Options, Output};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use crate::actuator::{Level, RelayPins, SwitchBank};
use crate::error::AcquisitionError;
use crate::sensor::{AdcChannel, AdcTransport, READ_DELAY};

/// Default GPIO character device for the relay module.
pub const DEFAULT_GPIO_CHIP: &str = "gpiochip0";

/// Default serial device for the signal conditioner.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyAMA0";

/// Conditioner line rate.
pub const BAUD_RATE: u32 = 9600;

/// Relay module driven through gpiod character-device lines.
///
/// All four lines are requested as one output group, initially at the off
/// level (high; the module is active-low). Runtime write failures are
/// logged and skipped so a flaky line cannot abort a leveling invocation.
pub struct GpioSwitchBank {
    lines: Lines<Output>,
    offsets: [u32; 4],
    values: [bool; 4],
}

impl GpioSwitchBank {
    pub fn new(chip_name: &str, pins: RelayPins) -> Result<Self> {
        let chip = Chip::new(chip_name)
            .with_context(|| format!("Failed to open GPIO chip '{chip_name}'"))?;

        let offsets = [pins.left, pins.right, pins.up, pins.down];
        let options = Options::output(offsets)
            .values([true, true, true, true])
            .consumer("plumbline");

        let lines = chip
            .request_lines(options)
            .context("Failed to request relay lines as outputs")?;

        Ok(Self {
            lines,
            offsets,
            values: [true; 4],
        })
    }
}

impl SwitchBank for GpioSwitchBank {
    fn set_level(&mut self, line: u32, level: Level) {
        let Some(index) = self.offsets.iter().position(|&o| o == line) else {
            log::warn!("relay line {line} is not part of the requested bank");
            return;
        };
        self.values[index] = matches!(level, Level::High);
        if let Err(e) = self.lines.set_values(self.values) {
            log::warn!("failed to drive relay line {line}: {e}");
        }
    }
}

/// RS-232 signal conditioner transport.
///
/// One acquisition is a single-byte channel trigger, a settle wait for the
/// conditioner to stream its reply, then an ASCII count decode.
pub struct SerialAdc {
    port: Box<dyn SerialPort>,
}

impl SerialAdc {
    pub fn open(path: &str) -> Result<Self> {
        log::info!("Opening signal conditioner: {path} at {BAUD_RATE} bps");

        let port = serialport::new(path, BAUD_RATE)
            .timeout(Duration::from_secs(1))
            .open()
            .with_context(|| format!("Failed to open serial port {path}"))?;

        Ok(Self { port })
    }
}

impl AdcTransport for SerialAdc {
    fn acquire(&mut self, channel: AdcChannel) -> Result<i64, AcquisitionError> {
        self.port.write_all(&[channel.command_byte()])?;
        thread::sleep(READ_DELAY);

        let pending = self
            .port
            .bytes_to_read()
            .map_err(std::io::Error::from)? as usize;
        let mut buffer = vec![0u8; pending.max(16)];
        let n = self.port.read(&mut buffer)?;

        let text = String::from_utf8_lossy(&buffer[..n]);
        let reply = text.trim();
        reply
            .parse::<i64>()
            .map_err(|_| AcquisitionError::Malformed(reply.to_string()))
    }
}
