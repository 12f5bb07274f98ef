//! # USB Serial Discovery
//!
//! Enumeration results and the content probe used to tell apart adapters
//! that report the same vendor/product identifiers.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

/// Leading token of every NMEA sentence a GPS receiver emits
pub const GPS_SIGNATURE: &str = "$G";

/// Number of lines read during a probe. The first may be a partial line.
const PROBE_LINES: usize = 2;

/// An attached serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path (e.g., /dev/ttyUSB0)
    pub path: String,
    /// USB vendor/product pair, if this is a USB adapter
    pub usb_id: Option<(u16, u16)>,
}

impl PortInfo {
    pub fn usb(path: &str, vid: u16, pid: u16) -> Self {
        Self {
            path: path.to_string(),
            usb_id: Some((vid, pid)),
        }
    }

    /// Whether this port reports the given vendor/product pair
    pub fn matches(&self, id: (u16, u16)) -> bool {
        self.usb_id == Some(id)
    }
}

impl From<tokio_serial::SerialPortInfo> for PortInfo {
    fn from(info: tokio_serial::SerialPortInfo) -> Self {
        let usb_id = match info.port_type {
            tokio_serial::SerialPortType::UsbPort(usb) => Some((usb.vid, usb.pid)),
            _ => None,
        };

        Self {
            path: info.port_name,
            usb_id,
        }
    }
}

/// Read two lines from a freshly opened stream and report whether the
/// device is a GPS receiver.
///
/// Each line read is bounded by `line_timeout`. A silent or erroring device
/// is reported as not a GPS. Whatever `reader` buffered past the second
/// line stays in it, so a worker handed the same reader starts on a
/// sentence boundary.
pub async fn probe_gps_signature<S>(reader: &mut BufReader<S>, line_timeout: Duration) -> bool
where
    S: AsyncRead + Unpin,
{
    let mut line = String::new();

    for _ in 0..PROBE_LINES {
        line.clear();
        match tokio::time::timeout(line_timeout, reader.read_line(&mut line)).await {
            Ok(Ok(0)) | Err(_) => {
                debug!("GPS probe: no traffic");
                return false;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("GPS probe read failed: {}", e);
                return false;
            }
        }
    }

    debug!("GPS probe sample: {:?}", line.trim_end());
    line.starts_with(GPS_SIGNATURE)
}
