//! Temperature source: a 1-Wire DS18B20 sensor read through sysfs.
//!
//! The kernel exposes each sensor as `<device_dir>/28-<serial>/w1_slave`:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{PayloadLinkError, Result};
use crate::worker::{FramedQueue, LatestQueue, Worker, WorkerHealth};

/// Family code prefix of DS18B20 devices
const DEVICE_PREFIX: &str = "28-";

const SLAVE_FILE: &str = "w1_slave";

/// Consecutive failed reads before the poller gives up on the sensor
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// A located temperature sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemperatureSensor {
    slave: PathBuf,
}

impl TemperatureSensor {
    /// Find the first DS18B20 under `device_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be listed or holds no sensor
    pub fn find(device_dir: &Path) -> Result<Self> {
        let mut devices: Vec<PathBuf> = std::fs::read_dir(device_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(DEVICE_PREFIX))
            .map(|entry| entry.path().join(SLAVE_FILE))
            .collect();
        devices.sort();

        devices
            .into_iter()
            .next()
            .map(|slave| Self { slave })
            .ok_or_else(|| {
                debug!("No 1-Wire temperature sensor under {}", device_dir.display());
                PayloadLinkError::Unavailable("Temp")
            })
    }

    pub fn path(&self) -> &Path {
        &self.slave
    }

    /// Whether the presence flag on the first line is affirmative
    pub fn is_present(&self) -> bool {
        match std::fs::read_to_string(&self.slave) {
            Ok(contents) => presence_flag(&contents),
            Err(_) => false,
        }
    }

    /// Read the current temperature in degrees Celsius
    pub fn read(&self) -> Result<f64> {
        let contents = std::fs::read_to_string(&self.slave)?;
        parse_reading(&contents)
    }
}

fn presence_flag(contents: &str) -> bool {
    contents
        .lines()
        .next()
        .map(|line| line.trim_end().ends_with("YES"))
        .unwrap_or(false)
}

fn parse_reading(contents: &str) -> Result<f64> {
    if !presence_flag(contents) {
        return Err(PayloadLinkError::Protocol("temperature sensor not ready".to_string()));
    }

    let raw = contents
        .lines()
        .nth(1)
        .and_then(|line| line.split("t=").nth(1))
        .ok_or_else(|| PayloadLinkError::Protocol("temperature line missing t=".to_string()))?;

    let millidegrees: i64 = raw
        .trim()
        .parse()
        .map_err(|_| PayloadLinkError::Protocol(format!("bad temperature value: {:?}", raw.trim())))?;

    Ok(millidegrees as f64 / 1000.0)
}

/// Relay line sent to the ground station
pub fn wire_line(celsius: f64) -> String {
    format!("TEMP:{:.3}!\n", celsius)
}

/// Start polling `sensor` into `readings`
///
/// A failed read is reported and retried at the next interval. After
/// several in a row the worker ends with a reset request.
pub fn spawn_temperature_poller(
    sensor: TemperatureSensor,
    interval: Duration,
    readings: LatestQueue<f64>,
    health: WorkerHealth,
) -> Worker {
    Worker::spawn("temperature", async move {
        let mut ticker = tokio::time::interval(interval);
        let mut failures = 0;

        loop {
            ticker.tick().await;
            match sensor.read() {
                Ok(celsius) => {
                    debug!("Temperature: {:.3} C", celsius);
                    failures = 0;
                    readings.push(celsius);
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        health.fail("temperature", e);
                        return;
                    }
                    health.report(format!("temperature: {}", e));
                }
            }
        }
    })
}
