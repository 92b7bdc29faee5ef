//! FIFO receive/transmit queues.
//!
//! Each endpoint of a circuit owns one queue per direction: an ordered
//! sequence of opaque byte buffers guarded by its own mutex, so two
//! sessions never serialize against each other. Buffers preserve
//! arrival order; a short read consumes the head buffer partially and
//! leaves the remainder in place.

use std::collections::VecDeque;

use bytes::{Buf, Bytes};
use parking_lot::Mutex;

/// Mutex-guarded FIFO of byte buffers.
///
/// `len` reports the total byte count across all buffered items, not
/// the item count. No method blocks while the lock is held.
#[derive(Debug, Default)]
pub struct ByteQueue {
    inner: Mutex<VecDeque<Bytes>>,
}

impl ByteQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer to the tail. Empty buffers are dropped.
    pub fn push(&self, buf: impl Into<Bytes>) {
        let buf = buf.into();
        if !buf.is_empty() {
            self.inner.lock().push_back(buf);
        }
    }

    /// Remove and return the oldest buffer, if any.
    pub fn pop(&self) -> Option<Bytes> {
        self.inner.lock().pop_front()
    }

    /// Total byte length across all buffered items.
    pub fn len(&self) -> usize {
        self.inner.lock().iter().map(Bytes::len).sum()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy buffered bytes into `dest` in arrival order.
    ///
    /// Fills from successive buffers; a buffer larger than the
    /// remaining destination space is consumed partially, its tail
    /// staying at the head of the queue. Returns the byte count
    /// copied (0 when the queue is empty).
    pub fn read_into(&self, dest: &mut [u8]) -> usize {
        let mut queue = self.inner.lock();
        let mut copied = 0;

        while copied < dest.len() {
            let Some(head) = queue.front_mut() else {
                break;
            };
            let take = head.len().min(dest.len() - copied);
            dest[copied..copied + take].copy_from_slice(&head[..take]);
            head.advance(take);
            copied += take;
            if head.is_empty() {
                queue.pop_front();
            }
        }

        copied
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
