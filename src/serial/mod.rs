//! # Serial Communication Module
//!
//! Handles the serial devices the payload talks to.
//!
//! This module handles:
//! - Opening serial ports (8N1, no flow control)
//! - Wrapping the command radio in a byte-at-a-time, timeout-bounded link
//! - Enumerating attached USB serial adapters for hot-plug detection
//! - Probing ambiguous adapters by their traffic

pub mod discovery;
pub mod port_trait;

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use crate::error::{PayloadLinkError, Result};
pub use discovery::PortInfo;
pub use port_trait::{LinkIo, TokioSerialPort};

/// Any duplex byte stream a peripheral worker can own
pub trait PeripheralStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeripheralStream for T {}

/// Boxed peripheral stream handed to workers
pub type BoxedStream = Box<dyn PeripheralStream>;

/// Access to the host's serial devices
///
/// The supervisor only talks to hardware through this trait so that link
/// acquisition and hot-plug recovery can be exercised without devices.
#[cfg_attr(test, mockall::automock)]
pub trait SerialBackend: Send + Sync {
    /// List currently attached serial ports
    fn list_ports(&self) -> Result<Vec<PortInfo>>;

    /// Open the command radio with a per-read timeout
    fn open_link(&self, path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Box<dyn LinkIo>>;

    /// Open a peripheral stream
    fn open_stream(&self, path: &str, baud_rate: u32) -> Result<BoxedStream>;
}

/// Serial backend for the real host, built on `tokio-serial`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerial;

impl SystemSerial {
    /// Open a specific serial port with 8N1 settings
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/ttyAMA0")
    /// * `baud_rate` - Line speed
    ///
    /// # Returns
    ///
    /// * `Result<SerialStream>` - Opened serial port
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        debug!("Opening serial port {} at {} baud", path, baud_rate);

        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| PayloadLinkError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

impl SerialBackend for SystemSerial {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = tokio_serial::available_ports()
            .map_err(|e| PayloadLinkError::Serial(format!("Failed to enumerate ports: {}", e)))?;

        Ok(ports.into_iter().map(PortInfo::from).collect())
    }

    fn open_link(&self, path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Box<dyn LinkIo>> {
        let port = Self::open_port(path, baud_rate)?;
        Ok(Box::new(TokioSerialPort::new(port, read_timeout)))
    }

    fn open_stream(&self, path: &str, baud_rate: u32) -> Result<BoxedStream> {
        let port = Self::open_port(path, baud_rate)?;
        Ok(Box::new(port))
    }
}
