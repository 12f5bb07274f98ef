//! # Chunk Checksums and Transport Encoding
//!
//! MD5 digests over base64 text, as the ground station verifies them.
//!
//! **Digest**: MD5, sent as 32 lowercase hex characters
//! **Encoding**: standard base64 alphabet with padding

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};

/// Length of a hex-encoded MD5 digest on the wire
pub const CHECKSUM_HEX_LEN: usize = 32;

/// Calculate the hex MD5 digest of a chunk
///
/// # Examples
///
/// ```
/// use payload_link::link::checksum::chunk_checksum;
///
/// assert_eq!(chunk_checksum(b""), "d41d8cd98f00b204e9800998ecf8427e");
/// ```
pub fn chunk_checksum(chunk: &[u8]) -> String {
    format!("{:x}", Md5::digest(chunk))
}

/// Encode a binary artifact into its transport representation
pub fn encode_artifact(data: &[u8]) -> Vec<u8> {
    STANDARD.encode(data).into_bytes()
}
