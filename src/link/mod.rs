//! # Command Link Protocol Module
//!
//! The reliable link layer spoken over the command radio.
//!
//! This module handles:
//! - Command framing (`!` terminator, 3 second inactivity window)
//! - Chunked image transfer with MD5 verification and adaptive chunk size
//! - Sync handshake after a rejected chunk
//! - Wire constants shared with the ground station

pub mod protocol;
pub mod framer;
pub mod transfer;
pub mod sync;
pub mod checksum;

pub use framer::{CommandFrame, CommandFramer, FrameRead};
pub use protocol::{CommandCode, FrameKind};
pub use sync::{SyncHandshake, SyncOutcome};
pub use transfer::{TransferEngine, TransferReport, TransferSession};
