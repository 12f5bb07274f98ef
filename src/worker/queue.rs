//! # Framed Queues
//!
//! Thread-safe queues shared between peripheral workers and the supervisor.
//!
//! Both disciplines take items through the same `push`; they differ only in
//! what a drain returns:
//! - [`FifoQueue`]: every item, in production order (relay traffic)
//! - [`LatestQueue`]: only the most recent item (GPS fix, temperature)
//!
//! Drains never block, so the supervisor can service many queues per
//! iteration without starving any of them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Common interface of the two queue disciplines
pub trait FramedQueue<T>: Clone + Send + Sync {
    /// Insert an item
    fn push(&self, item: T);

    /// Take what the discipline delivers, without blocking
    fn drain(&self) -> Vec<T>;

    fn is_empty(&self) -> bool;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking producer must not wedge the consumer
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct FifoInner<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

/// Ordered, unbounded queue
pub struct FifoQueue<T> {
    inner: Arc<FifoInner<T>>,
}

impl<T> Clone for FifoQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for FifoQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> FifoQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FifoInner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.items).len()
    }

    /// Take the oldest item, if any
    pub fn pop(&self) -> Option<T> {
        lock(&self.inner.items).pop_front()
    }

    /// Wait for the oldest item (worker side)
    pub async fn recv(&self) -> T {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(item) = self.pop() {
                return item;
            }
            notified.await;
        }
    }
}

impl<T: Send> FramedQueue<T> for FifoQueue<T> {
    fn push(&self, item: T) {
        lock(&self.inner.items).push_back(item);
        self.inner.notify.notify_one();
    }

    fn drain(&self) -> Vec<T> {
        lock(&self.inner.items).drain(..).collect()
    }

    fn is_empty(&self) -> bool {
        lock(&self.inner.items).is_empty()
    }
}

/// Last-write-wins queue: a push supersedes anything not yet drained
pub struct LatestQueue<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for LatestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for LatestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for LatestQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatestQueue")
            .field("pending", &lock(&self.slot).is_some())
            .finish()
    }
}

impl<T> LatestQueue<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Take the most recent item, if any
    pub fn take(&self) -> Option<T> {
        lock(&self.slot).take()
    }
}

impl<T: Clone> LatestQueue<T> {
    /// Look at the most recent item without consuming it
    pub fn peek(&self) -> Option<T> {
        lock(&self.slot).clone()
    }
}

impl<T: Send> FramedQueue<T> for LatestQueue<T> {
    fn push(&self, item: T) {
        *lock(&self.slot) = Some(item);
    }

    fn drain(&self) -> Vec<T> {
        self.take().into_iter().collect()
    }

    fn is_empty(&self) -> bool {
        lock(&self.slot).is_none()
    }
}
