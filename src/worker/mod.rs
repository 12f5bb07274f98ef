//! # Peripheral Workers
//!
//! Background tasks that each own one peripheral resource.
//!
//! A worker runs until its link breaks. It never stops on a recoverable
//! error: those go to its exception queue for logging. When the read or
//! write loop itself fails, the worker posts a reset request and exits;
//! the supervisor closes what is left of the link and re-acquires it.

pub mod queue;

use bytes::Bytes;
use std::future::Future;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
pub use queue::{FifoQueue, FramedQueue, LatestQueue};

/// Idempotent restart request shared by every worker on one link
///
/// Any number of requests posted before the supervisor looks collapse into
/// a single restart.
#[derive(Debug, Clone, Default)]
pub struct ResetSignal {
    requests: FifoQueue<String>,
}

impl ResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the supervisor to restart the peripheral
    pub fn request(&self, reason: impl Into<String>) {
        self.requests.push(reason.into());
    }

    pub fn is_requested(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Drain every pending request as one restart action
    ///
    /// Returns the reasons if at least one request was pending.
    pub fn take(&self) -> Option<Vec<String>> {
        let reasons = self.requests.drain();
        if reasons.is_empty() {
            None
        } else {
            Some(reasons)
        }
    }
}

/// Failure reporting channels of one peripheral
#[derive(Debug, Clone, Default)]
pub struct WorkerHealth {
    /// Non-fatal errors, drained and logged by the supervisor
    pub exceptions: FifoQueue<String>,
    /// Set when a worker's loop has died
    pub reset: ResetSignal,
}

impl WorkerHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-fatal error
    pub fn report(&self, message: impl Into<String>) {
        self.exceptions.push(message.into());
    }

    /// Record the error that ended a worker and ask for a restart
    pub fn fail(&self, worker: &str, message: impl std::fmt::Display) {
        self.report(format!("{}: {}", worker, message));
        self.reset.request(format!("{} dead", worker));
    }
}

/// Handle to a running worker task
#[derive(Debug)]
pub struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Run `task` in the background under `name`
    pub fn spawn<F>(name: impl Into<String>, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!("Starting worker {}", name);
        Self {
            name,
            handle: tokio::spawn(task),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the worker and wait until its resources are released
    ///
    /// Dropping the task drops the link half it owns, which closes the port.
    pub async fn stop(self) {
        self.handle.abort();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!("Worker {} ended abnormally: {}", self.name, e);
            }
        }
    }
}

/// Spawn a worker that reads newline-terminated lines and hands each to `on_line`
///
/// Errors returned by `on_line` are reported and reading continues. A read
/// error or end of stream ends the worker with a reset request.
pub fn spawn_line_reader<R, F>(
    name: &str,
    reader: R,
    health: WorkerHealth,
    mut on_line: F,
) -> Worker
where
    R: AsyncRead + Send + Unpin + 'static,
    F: FnMut(&[u8]) -> Result<()> + Send + 'static,
{
    let worker = name.to_string();
    Worker::spawn(name, async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    health.fail(&worker, "link closed");
                    return;
                }
                Ok(_) => {
                    if let Err(e) = on_line(&line) {
                        health.report(format!("{}: {}", worker, e));
                    }
                }
                Err(e) => {
                    health.fail(&worker, e);
                    return;
                }
            }
        }
    })
}

/// Spawn a worker that writes every item of `outbound` to `writer`, in order
///
/// A write error ends the worker with a reset request.
pub fn spawn_queue_writer<W>(
    name: &str,
    writer: W,
    outbound: FifoQueue<Bytes>,
    health: WorkerHealth,
) -> Worker
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let worker = name.to_string();
    Worker::spawn(name, async move {
        let mut writer = writer;

        loop {
            let item = outbound.recv().await;
            let written = async {
                writer.write_all(&item).await?;
                writer.flush().await
            };

            if let Err(e) = written.await {
                health.fail(&worker, e);
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PayloadLinkError;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio_test::io::Builder;

    async fn wait_finished(worker: &Worker) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !worker.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker should finish");
    }

    #[test]
    fn test_reset_requests_collapse() {
        let reset = ResetSignal::new();
        reset.request("reset");
        reset.request("reset");
        reset.request("reset");

        let reasons = reset.take().expect("one restart action");
        assert_eq!(reasons.len(), 3);
        assert!(!reset.is_requested());
        assert!(reset.take().is_none());
    }

    #[test]
    fn test_reset_shared_between_workers() {
        let health = WorkerHealth::new();
        let reader_side = health.clone();
        let writer_side = health.clone();

        reader_side.fail("xbee-rx", "read failed");
        writer_side.fail("xbee-tx", "write failed");

        assert!(health.reset.take().is_some());
        assert!(health.reset.take().is_none());
        assert_eq!(health.exceptions.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_line_reader_forwards_lines_then_requests_reset() {
        let stream = Builder::new().read(b"first\nsecond\n").build();
        let health = WorkerHealth::new();
        let received = FifoQueue::new();
        let sink = received.clone();

        let worker = spawn_line_reader("reader", stream, health.clone(), move |line| {
            sink.push(line.to_vec());
            Ok(())
        });
        wait_finished(&worker).await;

        assert_eq!(received.drain(), vec![b"first\n".to_vec(), b"second\n".to_vec()]);
        assert!(health.reset.is_requested());
        assert_eq!(health.exceptions.drain(), vec!["reader: link closed".to_string()]);
    }

    #[tokio::test]
    async fn test_line_reader_survives_handler_errors() {
        let stream = Builder::new().read(b"bad\ngood\n").build();
        let health = WorkerHealth::new();
        let received = FifoQueue::new();
        let sink = received.clone();

        let worker = spawn_line_reader("gps", stream, health.clone(), move |line| {
            if line.starts_with(b"bad") {
                return Err(PayloadLinkError::Gps("unparseable".to_string()));
            }
            sink.push(line.to_vec());
            Ok(())
        });
        wait_finished(&worker).await;

        assert_eq!(received.drain(), vec![b"good\n".to_vec()]);
        let exceptions = health.exceptions.drain();
        assert!(exceptions[0].contains("unparseable"));
    }

    #[tokio::test]
    async fn test_line_reader_read_error_requests_reset() {
        let stream = Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "unplugged"))
            .build();
        let health = WorkerHealth::new();

        let worker = spawn_line_reader("xbee-rx", stream, health.clone(), |_| Ok(()));
        wait_finished(&worker).await;

        assert!(health.reset.is_requested());
        assert!(health.exceptions.drain()[0].contains("unplugged"));
    }

    #[tokio::test]
    async fn test_queue_writer_preserves_order() {
        let (near, mut far) = tokio::io::duplex(256);
        let outbound = FifoQueue::new();
        let health = WorkerHealth::new();

        outbound.push(Bytes::from_static(b"one;"));
        outbound.push(Bytes::from_static(b"two;"));
        let worker = spawn_queue_writer("xbee-tx", near, outbound.clone(), health.clone());
        outbound.push(Bytes::from_static(b"three;"));

        let mut buf = vec![0u8; 14];
        tokio::time::timeout(Duration::from_secs(1), far.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"one;two;three;");
        assert!(!health.reset.is_requested());

        worker.stop().await;
    }

    #[tokio::test]
    async fn test_queue_writer_write_error_requests_reset() {
        let (near, far) = tokio::io::duplex(16);
        drop(far);
        let outbound = FifoQueue::new();
        let health = WorkerHealth::new();

        let worker = spawn_queue_writer("xbee-tx", near, outbound.clone(), health.clone());
        outbound.push(Bytes::from_static(b"relay"));
        wait_finished(&worker).await;

        assert!(health.reset.is_requested());
    }

    #[tokio::test]
    async fn test_stop_releases_stream() {
        let (near, mut far) = tokio::io::duplex(16);
        let worker = spawn_line_reader("gps", near, WorkerHealth::new(), |_| Ok(()));

        worker.stop().await;

        // The worker's half is gone, so the far end sees end of stream
        let mut buf = [0u8; 1];
        assert_eq!(far.read(&mut buf).await.unwrap(), 0);
    }
}
