//! # Sync Handshake
//!
//! Bounded resynchronization run after a rejected chunk.
//!
//! The payload repeats `sync` and reads one byte after each send until the
//! ground station answers `S`, the attempt budget runs out, or the wall-clock
//! deadline passes. Failure is not an error: the retry in the transfer loop
//! is what actually recovers the chunk.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::protocol::{SYNC_ACK, SYNC_TOKEN};
use crate::config::TransferConfig;
use crate::serial::LinkIo;

/// How a handshake ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The ground station answered after `attempts` tokens
    Synchronized { attempts: u32 },
    /// No answer within the attempt budget or deadline
    Abandoned { attempts: u32 },
}

impl SyncOutcome {
    pub fn is_synchronized(&self) -> bool {
        matches!(self, SyncOutcome::Synchronized { .. })
    }
}

/// Handshake limits
#[derive(Debug, Clone, Copy)]
pub struct SyncHandshake {
    pub max_attempts: u32,
    pub deadline: Duration,
    pub settle: Duration,
}

impl Default for SyncHandshake {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            deadline: Duration::from_secs(10),
            settle: Duration::from_millis(500),
        }
    }
}

impl From<&TransferConfig> for SyncHandshake {
    fn from(config: &TransferConfig) -> Self {
        Self {
            max_attempts: config.sync_attempts,
            deadline: Duration::from_millis(config.sync_timeout_ms),
            settle: Duration::from_millis(config.sync_settle_ms),
        }
    }
}

impl SyncHandshake {
    /// Run the handshake, then wait the settle delay in either case
    pub async fn run(&self, link: &mut dyn LinkIo) -> SyncOutcome {
        let deadline = Instant::now() + self.deadline;
        let mut attempts = 0;
        let mut synchronized = false;

        while attempts < self.max_attempts && Instant::now() < deadline {
            attempts += 1;

            if let Err(e) = link.send(SYNC_TOKEN).await {
                warn!("Sync token write failed: {}", e);
                break;
            }

            match link.read_byte().await {
                Ok(Some(SYNC_ACK)) => {
                    synchronized = true;
                    break;
                }
                Ok(other) => debug!("Sync attempt {}: got {:?}", attempts, other),
                Err(e) => {
                    warn!("Sync read failed: {}", e);
                    break;
                }
            }
        }

        tokio::time::sleep(self.settle).await;

        if synchronized {
            SyncOutcome::Synchronized { attempts }
        } else {
            warn!("SyncError: no answer after {} attempts", attempts);
            SyncOutcome::Abandoned { attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::mocks::MockLink;

    fn sync_writes(link: &MockLink) -> usize {
        link.get_written_data()
            .iter()
            .filter(|w| w.as_slice() == SYNC_TOKEN)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_answer() {
        let mut link = MockLink::with_input(b"S");
        let started = Instant::now();

        let outcome = SyncHandshake::default().run(&mut link).await;

        assert_eq!(outcome, SyncOutcome::Synchronized { attempts: 1 });
        assert_eq!(sync_writes(&link), 1);
        // Settle delay always follows
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_after_noise() {
        let mut link = MockLink::with_input(b"xyS");
        let outcome = SyncHandshake::default().run(&mut link).await;

        assert_eq!(outcome, SyncOutcome::Synchronized { attempts: 3 });
        assert_eq!(sync_writes(&link), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempt_budget() {
        let mut link = MockLink::new();
        link.set_fallback(Some(b'N'));

        let outcome = SyncHandshake::default().run(&mut link).await;

        assert_eq!(outcome, SyncOutcome::Abandoned { attempts: 5 });
        assert_eq!(sync_writes(&link), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_deadline() {
        let mut link = MockLink::new();
        link.read_timeout = Duration::from_secs(4);

        let started = Instant::now();
        let outcome = SyncHandshake::default().run(&mut link).await;

        // 4s timeouts against a 10s deadline: attempts at t=0, 4 and 8
        assert_eq!(outcome, SyncOutcome::Abandoned { attempts: 3 });
        assert!(started.elapsed() < Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_abandons() {
        let mut link = MockLink::new();
        link.set_write_error(std::io::ErrorKind::BrokenPipe);

        let outcome = SyncHandshake::default().run(&mut link).await;
        assert!(!outcome.is_synchronized());
    }
}
