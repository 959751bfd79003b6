//! Flower Care reader backed by BlueZ `gatttool`.
//!
//! Each fetch runs three short-lived `gatttool` processes: read the
//! firmware characteristic, switch the device into data mode, then read
//! the sensor characteristic.

use super::{DeviceData, DeviceReader, Firmware, ReadError, Sensors};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

/// Handle of the firmware/battery characteristic.
const FIRMWARE_HANDLE: &str = "0x38";
/// Handle of the device mode characteristic.
const MODE_HANDLE: &str = "0x33";
/// Value written to the mode handle to enable live sensor data.
const MODE_DATA: &str = "A01F";
/// Handle of the live sensor data characteristic.
const SENSORS_HANDLE: &str = "0x35";

/// Default limit for a single `gatttool` invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const FIRMWARE_MIN_LEN: usize = 2;
const SENSORS_MIN_LEN: usize = 10;

/// Reads a device by shelling out to `gatttool`.
///
/// Every invocation is bounded by a timeout; a child still running at the
/// deadline is killed and the fetch fails with a transport error.
#[derive(Debug, Clone)]
pub struct GattToolReader {
    program: PathBuf,
    timeout: Duration,
}

impl Default for GattToolReader {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gatttool"),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl GattToolReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific `gatttool` binary instead of the one on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Sets the limit for each `gatttool` invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, address: &str, adapter: &str, args: &[&str]) -> Result<String, ReadError> {
        let child = Command::new(&self.program)
            .args(["-i", adapter, "-b", address])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ReadError::Transport(format!("can not run {}: {}", self.program.display(), e))
            })?;

        let output = self.wait_with_deadline(child)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReadError::Transport(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Waits for `child` to exit, killing it once the timeout has passed.
    fn wait_with_deadline(&self, mut child: Child) -> Result<Output, ReadError> {
        let deadline = Instant::now() + self.timeout;
        let io_err = |e: std::io::Error| {
            ReadError::Transport(format!("can not wait for {}: {}", self.program.display(), e))
        };

        loop {
            if child.try_wait().map_err(io_err)?.is_some() {
                return child.wait_with_output().map_err(io_err);
            }

            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    tracing::warn!(error = %e, "Failed to kill {}", self.program.display());
                }
                // Reap the child so it does not linger as a zombie.
                let _ = child.wait();
                return Err(ReadError::Transport(format!(
                    "{} timed out after {:?}",
                    self.program.display(),
                    self.timeout
                )));
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn read_handle(&self, address: &str, adapter: &str, handle: &str) -> Result<Vec<u8>, ReadError> {
        let stdout = self.run(address, adapter, &["--char-read", "-a", handle])?;
        parse_char_value(&stdout)
    }
}

impl DeviceReader for GattToolReader {
    fn fetch(&self, address: &str, adapter: &str) -> Result<DeviceData, ReadError> {
        let firmware = self
            .read_handle(address, adapter, FIRMWARE_HANDLE)
            .and_then(|raw| decode_firmware(&raw))
            .map_err(|e| tag(e, "can not read firmware"))?;

        self.run(
            address,
            adapter,
            &["--char-write-req", "-a", MODE_HANDLE, "-n", MODE_DATA],
        )
        .map_err(|e| tag(e, "can not enable data mode"))?;

        let sensors = self
            .read_handle(address, adapter, SENSORS_HANDLE)
            .and_then(|raw| decode_sensors(&raw))
            .map_err(|e| tag(e, "can not read sensors"))?;

        tracing::debug!(address, version = %firmware.version, "Read device");

        Ok(DeviceData { firmware, sensors })
    }
}

fn tag(err: ReadError, context: &str) -> ReadError {
    match err {
        ReadError::Transport(msg) => ReadError::Transport(format!("{}: {}", context, msg)),
        ReadError::Protocol(msg) => ReadError::Protocol(format!("{}: {}", context, msg)),
    }
}

/// Extracts the bytes from a `Characteristic value/descriptor: 64 10 ...` line.
pub fn parse_char_value(output: &str) -> Result<Vec<u8>, ReadError> {
    let line = output
        .lines()
        .find(|l| l.contains("value/descriptor:"))
        .ok_or_else(|| ReadError::Protocol(format!("unexpected output: {:?}", output.trim())))?;

    let (_, hex) = line
        .split_once(':')
        .ok_or_else(|| ReadError::Protocol(format!("unexpected output: {:?}", line)))?;

    hex.split_whitespace()
        .map(|tok| {
            u8::from_str_radix(tok, 16)
                .map_err(|_| ReadError::Protocol(format!("invalid byte {:?}", tok)))
        })
        .collect()
}

/// Decodes the firmware characteristic.
///
/// Byte 0 is the battery level, bytes 2.. are the ASCII version string.
pub fn decode_firmware(data: &[u8]) -> Result<Firmware, ReadError> {
    if data.len() < FIRMWARE_MIN_LEN {
        return Err(ReadError::Protocol(format!(
            "firmware payload too short: {} bytes",
            data.len()
        )));
    }

    let version = String::from_utf8_lossy(&data[2..])
        .trim_end_matches('\0')
        .trim()
        .to_string();

    Ok(Firmware {
        version,
        battery: data[0],
    })
}

/// Decodes the live sensor characteristic.
pub fn decode_sensors(data: &[u8]) -> Result<Sensors, ReadError> {
    if data.len() < SENSORS_MIN_LEN {
        return Err(ReadError::Protocol(format!(
            "sensor payload too short: {} bytes",
            data.len()
        )));
    }

    // Temperature is signed, in tenths of a degree.
    let temperature = f64::from(i16::from_le_bytes([data[0], data[1]])) / 10.0;
    let light = u32::from_le_bytes([data[3], data[4], data[5], data[6]]);
    let moisture = data[7];
    let conductivity = u16::from_le_bytes([data[8], data[9]]);

    Ok(Sensors {
        conductivity,
        light,
        moisture,
        temperature,
    })
}
