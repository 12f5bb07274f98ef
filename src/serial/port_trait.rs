//! Trait abstraction for command link operations to enable testing

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPort;

/// Trait for half-duplex command link I/O
///
/// Reads are byte-at-a-time with a fixed per-call timeout, the way the
/// ground protocol is specified. A timeout is not an error: it yields `None`.
#[async_trait]
pub trait LinkIo: Send {
    /// Write all data to the link
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read a single byte, or `None` if the read timeout elapsed first
    async fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Discard anything waiting in the input buffer
    fn clear_input(&mut self) -> io::Result<()>;

    /// Read up to and including `\n`. Returns whatever arrived before a read
    /// timeout, which may be an empty string.
    async fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        while let Some(byte) = self.read_byte().await? {
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Write a whole message and flush it
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data).await?;
        self.flush().await
    }
}

/// Wrapper around tokio_serial::SerialStream that implements LinkIo
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
    read_timeout: Duration,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream, read_timeout: Duration) -> Self {
        Self { port, read_timeout }
    }
}

#[async_trait]
impl LinkIo for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port.flush().await
    }

    async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match tokio::time::timeout(self.read_timeout, self.port.read(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "command link closed",
            )),
            Ok(Ok(_)) => Ok(Some(buf[0])),
            Ok(Err(e)) => Err(e),
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(tokio_serial::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}
