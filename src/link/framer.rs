//! # Command Framer
//!
//! Recovers command boundaries from the raw command radio byte stream.
//!
//! A frame ends at the `!` terminator, or when no byte has arrived for the
//! inactivity window. Every received byte restarts the window, so a command
//! being typed slowly at the ground station is never cut in half.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::time::Instant;

use super::protocol::{CommandCode, FrameKind, COMMAND_PREFIX, FRAME_TERMINATOR};
use crate::serial::LinkIo;

/// Default inactivity window (3 seconds)
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(3);

/// A frame assembled from the command link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: Bytes,
}

impl CommandFrame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the frame ended on the terminator rather than on inactivity
    pub fn is_terminated(&self) -> bool {
        self.bytes.last() == Some(&FRAME_TERMINATOR)
    }

    /// Classify the frame
    ///
    /// Only the exact form `IMAGE;<code>!` with a known code is a command.
    /// Every other non-empty frame is relay traffic.
    pub fn kind(&self) -> FrameKind {
        if self.bytes.is_empty() {
            return FrameKind::Empty;
        }

        let prefix = COMMAND_PREFIX.as_bytes();
        if self.bytes.len() == prefix.len() + 2
            && self.bytes.starts_with(prefix)
            && self.is_terminated()
        {
            if let Some(code) = CommandCode::from_byte(self.bytes[prefix.len()]) {
                return FrameKind::Command(code);
            }
        }

        FrameKind::Relay(self.bytes.clone())
    }
}

impl std::fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

/// Result of one framing cycle
#[derive(Debug)]
pub enum FrameRead {
    /// A frame (possibly empty) was assembled
    Frame(CommandFrame),
    /// The link failed mid-read; the command radio must be disabled
    LinkFailed(io::Error),
}

/// Assembles one command frame per call
#[derive(Debug, Clone, Copy)]
pub struct CommandFramer {
    inactivity: Duration,
}

impl Default for CommandFramer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_TIMEOUT)
    }
}

impl CommandFramer {
    pub fn new(inactivity: Duration) -> Self {
        Self { inactivity }
    }

    /// Read bytes until a terminator, inactivity, or a link failure
    ///
    /// Blocks for at most the inactivity window plus one read timeout after
    /// the last received byte.
    pub async fn next_frame(&self, link: &mut dyn LinkIo) -> FrameRead {
        let mut buf = BytesMut::new();
        let mut deadline = Instant::now() + self.inactivity;

        loop {
            match link.read_byte().await {
                Ok(Some(FRAME_TERMINATOR)) => {
                    buf.put_u8(FRAME_TERMINATOR);
                    break;
                }
                Ok(Some(byte)) => {
                    buf.put_u8(byte);
                    deadline = Instant::now() + self.inactivity;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Err(e) => return FrameRead::LinkFailed(e),
            }
        }

        FrameRead::Frame(CommandFrame::new(buf.freeze()))
    }
}
