//! Per-client sessions and the session registry.
//!
//! One [`Instance`] exists per established circuit and owns both
//! queues: `rx` holds what the client has posted, `tx` holds what the
//! service wants delivered on the client's next poll. The registry is
//! a single map under one mutex, held only long enough to fetch a
//! session handle; the queues carry their own locks, so sessions never
//! serialize against each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::flags::Flags;
use crate::queue::ByteQueue;
use crate::wire::SecureChannel;
use crate::{WaitStatus, WAIT_TICK};

/// Server-side handle to one circuit.
///
/// Handed to the connect callback; mirrors the client's read/write
/// surface, except `write` only enqueues — delivery rides the
/// client's next poll or data POST.
pub struct Instance {
    channel: SecureChannel,
    flags: Flags,
    connected: AtomicBool,
    rx: ByteQueue,
    tx: ByteQueue,
}

impl Instance {
    pub(crate) fn new(channel: SecureChannel, flags: Flags) -> Self {
        Self {
            channel,
            flags,
            connected: AtomicBool::new(true),
            rx: ByteQueue::new(),
            tx: ByteQueue::new(),
        }
    }

    /// The session identity in hex, as keyed in the registry.
    pub fn client_id_hex(&self) -> &str {
        self.channel.id_hex()
    }

    pub(crate) fn secure_channel(&self) -> &SecureChannel {
        &self.channel
    }

    pub(crate) fn session_flags(&self) -> Flags {
        self.flags
    }

    /// Whether the circuit is still up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue bytes for the client. Delivered on its next poll.
    pub fn write(&self, p: &[u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.tx.push(Bytes::copy_from_slice(p));
        Ok(p.len())
    }

    /// Copy up to `p.len()` bytes posted by the client; `Ok(0)` means
    /// nothing is buffered right now.
    pub fn read(&self, p: &mut [u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(self.rx.read_into(p))
    }

    /// Total bytes buffered from the client; 0 after close.
    pub fn len(&self) -> usize {
        if self.is_connected() {
            self.rx.len()
        } else {
            0
        }
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block up to `timeout` for client data, polling at the wait
    /// granularity. Returns immediately on buffered data or close.
    pub async fn wait(&self, timeout: Duration) -> (usize, WaitStatus) {
        let ticks = (timeout.as_millis() / WAIT_TICK.as_millis()).max(1);
        for _ in 0..ticks {
            if !self.is_connected() {
                return (0, WaitStatus::Closed);
            }
            let buffered = self.rx.len();
            if buffered > 0 {
                return (buffered, WaitStatus::DataReceived);
            }
            tokio::time::sleep(WAIT_TICK).await;
        }
        (0, WaitStatus::TimeoutReached)
    }

    /// Close the session. The client learns of it on its next POST,
    /// which is answered with a terminate frame. Idempotent.
    pub fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.rx.clear();
            self.tx.clear();
            tracing::debug!(client_id = %self.client_id_hex(), "session closed");
        }
    }

    pub(crate) fn push_inbound(&self, payload: impl Into<Bytes>) {
        self.rx.push(payload);
    }

    pub(crate) fn pop_outbound(&self) -> Option<Bytes> {
        self.tx.pop()
    }
}

/// All live sessions, keyed by client-id hex.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    inner: Mutex<HashMap<String, Arc<Instance>>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id_hex: &str) -> Option<Arc<Instance>> {
        self.inner.lock().get(id_hex).cloned()
    }

    pub(crate) fn insert(&self, id_hex: String, session: Arc<Instance>) {
        self.inner.lock().insert(id_hex, session);
    }

    pub(crate) fn remove(&self, id_hex: &str) -> Option<Arc<Instance>> {
        self.inner.lock().remove(id_hex)
    }

    pub(crate) fn count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Close every session; used at service shutdown so pending
    /// handler waits observe the close.
    pub(crate) fn close_all(&self) {
        let sessions: Vec<Arc<Instance>> = self.inner.lock().values().cloned().collect();
        for session in sessions {
            session.close();
        }
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn test_instance() -> Instance {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let b_pub = b.public();
        let channel = SecureChannel::derive(&a.agree(&b_pub));
        Instance::new(channel, Flags::ENCRYPT)
    }

    #[test]
    fn test_write_enqueues_without_sending() {
        let instance = test_instance();
        assert_eq!(instance.write(b"queued").unwrap(), 6);
        assert_eq!(instance.pop_outbound().unwrap(), Bytes::from_static(b"queued"));
        assert!(instance.pop_outbound().is_none());
    }

    #[test]
    fn test_read_drains_inbound() {
        let instance = test_instance();
        instance.push_inbound(Bytes::from_static(b"from client"));
        assert_eq!(instance.len(), 11);

        let mut buf = [0u8; 16];
        let n = instance.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"from client");
        assert_eq!(instance.len(), 0);
    }

    #[test]
    fn test_close_clears_queues_and_refuses_io() {
        let instance = test_instance();
        instance.push_inbound(Bytes::from_static(b"pending"));
        instance.write(b"outbound").unwrap();

        instance.close();
        assert!(!instance.is_connected());
        assert_eq!(instance.len(), 0);
        assert!(instance.pop_outbound().is_none());

        let mut buf = [0u8; 4];
        assert!(matches!(instance.read(&mut buf), Err(Error::NotConnected)));
        assert!(matches!(instance.write(b"late"), Err(Error::NotConnected)));

        // Idempotent
        instance.close();
    }

    #[tokio::test]
    async fn test_wait_observes_close() {
        let instance = Arc::new(test_instance());

        let waiter = Arc::clone(&instance);
        let task = tokio::spawn(async move { waiter.wait(Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        instance.close();

        let (len, status) = task.await.unwrap();
        assert_eq!(len, 0);
        assert_eq!(status, WaitStatus::Closed);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_with_data() {
        let instance = test_instance();
        instance.push_inbound(Bytes::from_static(b"ready"));

        let started = std::time::Instant::now();
        let (len, status) = instance.wait(Duration::from_secs(10)).await;
        assert_eq!(len, 5);
        assert_eq!(status, WaitStatus::DataReceived);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_registry_lookup_and_removal() {
        let registry = SessionRegistry::new();
        let instance = Arc::new(test_instance());
        let id = instance.client_id_hex().to_string();

        registry.insert(id.clone(), Arc::clone(&instance));
        assert_eq!(registry.count(), 1);
        assert!(registry.get(&id).is_some());
        assert!(registry.get("ffffffffffffffffffffffffffffffff").is_none());

        registry.remove(&id);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_registry_close_all() {
        let registry = SessionRegistry::new();
        let instance = Arc::new(test_instance());
        registry.insert(instance.client_id_hex().to_string(), Arc::clone(&instance));

        registry.close_all();
        assert_eq!(registry.count(), 0);
        assert!(!instance.is_connected());
    }
}
