//! # Transfer Engine
//!
//! Pushes a file across the command radio with per-chunk verification.
//!
//! ## Wire format
//!
//! ```text
//! <decimal encoded size>\n
//! <32 hex md5><chunk bytes>   -> 1 byte reply, 'Y' accepts
//! <32 hex md5><chunk bytes>   -> ...
//! ```
//!
//! A rejected chunk (any reply other than `Y`, including silence) shrinks the
//! word length by one step down to the floor, runs the sync handshake and
//! resends from the same offset. After `max_retries` consecutive rejections
//! the session is abandoned. Each session starts at the default word length,
//! so a noisy transfer never degrades the next one.

use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::checksum::{chunk_checksum, encode_artifact};
use super::protocol::CHUNK_ACCEPTED;
use super::sync::SyncHandshake;
use crate::config::TransferConfig;
use crate::error::{PayloadLinkError, Result};
use crate::serial::LinkIo;

/// Progress of one file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    pub path: PathBuf,
    /// Offset into the encoded representation; never decreases
    pub offset: usize,
    /// Current chunk size; never grows within a session
    pub word_length: usize,
    /// Consecutive rejections of the chunk at `offset`
    pub failures: u32,
}

impl TransferSession {
    fn new(path: &Path, word_length: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: 0,
            word_length,
            failures: 0,
        }
    }
}

/// Summary of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Size of the encoded representation
    pub encoded_size: usize,
    /// Chunks the ground station accepted
    pub chunks_accepted: usize,
    /// Chunk rejections (each followed by a resync)
    pub retries: u32,
    /// Word length when the session ended
    pub final_word_length: usize,
    /// Whether the session gave up before the end of the data
    pub abandoned: bool,
}

/// Chunked, checksum-verified file sender
#[derive(Debug, Clone)]
pub struct TransferEngine {
    word_length: usize,
    word_step: usize,
    word_floor: usize,
    max_retries: u32,
    sync: SyncHandshake,
}

impl From<&TransferConfig> for TransferEngine {
    fn from(config: &TransferConfig) -> Self {
        Self {
            word_length: config.word_length,
            word_step: config.word_step,
            word_floor: config.word_floor,
            max_retries: config.max_retries,
            sync: SyncHandshake::from(config),
        }
    }
}

impl TransferEngine {
    /// Default word length each session starts with
    pub fn word_length(&self) -> usize {
        self.word_length
    }

    /// Read, encode and send the file at `path`
    ///
    /// Returns when every chunk was accepted or the session was abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadLinkError::Io`] if the file cannot be read and
    /// [`PayloadLinkError::CommandLink`] if the link fails. Rejected chunks
    /// are not errors.
    pub async fn send(&self, link: &mut dyn LinkIo, path: &Path) -> Result<TransferReport> {
        let raw = tokio::fs::read(path).await.map_err(|e| {
            PayloadLinkError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;

        let encoded = encode_artifact(&raw);
        info!("Sending {} ({} encoded bytes)", path.display(), encoded.len());

        self.send_encoded(link, TransferSession::new(path, self.word_length), &encoded)
            .await
    }

    async fn send_encoded(
        &self,
        link: &mut dyn LinkIo,
        mut session: TransferSession,
        encoded: &[u8],
    ) -> Result<TransferReport> {
        let started = Instant::now();
        let size = encoded.len();
        let mut chunks_accepted = 0;
        let mut retries = 0;
        let mut abandoned = false;

        link.send(format!("{}\n", size).as_bytes())
            .await
            .map_err(PayloadLinkError::CommandLink)?;

        while session.offset < size {
            let end = (session.offset + session.word_length).min(size);
            let chunk = &encoded[session.offset..end];
            let checksum = chunk_checksum(chunk);

            debug!(
                "Send position: {} // Remaining: {} kB",
                session.offset,
                (size - session.offset) / 1024
            );

            let reply = async {
                link.write_all(checksum.as_bytes()).await?;
                link.write_all(chunk).await?;
                link.flush().await?;
                link.read_byte().await
            };

            if reply.await.map_err(PayloadLinkError::CommandLink)? == Some(CHUNK_ACCEPTED) {
                session.offset = end;
                session.failures = 0;
                chunks_accepted += 1;
                continue;
            }

            if session.failures >= self.max_retries {
                warn!(
                    "Abandoning {} at offset {} after {} rejections",
                    session.path.display(),
                    session.offset,
                    session.failures
                );
                abandoned = true;
                break;
            }

            session.failures += 1;
            retries += 1;
            session.word_length = session
                .word_length
                .saturating_sub(self.word_step)
                .max(self.word_floor);

            warn!(
                "Chunk at {} rejected (try {}), word length now {}",
                session.offset, session.failures, session.word_length
            );
            self.sync.run(link).await;
        }

        info!(
            "Image send complete in {:.1}s ({} chunks, {} retries{})",
            started.elapsed().as_secs_f64(),
            chunks_accepted,
            retries,
            if abandoned { ", abandoned" } else { "" }
        );

        Ok(TransferReport {
            encoded_size: size,
            chunks_accepted,
            retries,
            final_word_length: session.word_length,
            abandoned,
        })
    }
}
