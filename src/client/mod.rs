//! Client side of a circuit.
//!
//! [`ChannelClient`] turns the half-duplex request/response gate into
//! a full-duplex byte channel. `write` posts a sealed data frame;
//! `read` drains the local receive queue; a background poll worker
//! keeps sending otherwise-empty check-stream frames so server-bound
//! responses have something to ride back on. The worker owns the
//! reverse leg completely: users never see its errors, they see the
//! channel close.

pub mod probe;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use url::Url;

use crate::codec;
use crate::config::CoverProfile;
use crate::crypto::{random_marker, Keypair, PublicKey};
use crate::error::{Error, Result};
use crate::flags::Flags;
use crate::queue::ByteQueue;
use crate::wire::SecureChannel;
use crate::{WaitStatus, POLL_IDLE_MAX, POLL_INTERVAL, WAIT_TICK};

/// Length of the handshake form-key marker.
const MARKER_LEN: usize = 16;

/// Consecutive recoverable poll failures tolerated before closing.
const POLL_FAILURE_LIMIT: u32 = 3;

/// Outcome of one sealed POST exchange.
enum Exchange {
    /// Response body was empty
    Empty,
    /// Response carried a payload, now on the receive queue
    Delivered(usize),
    /// Response was a terminate frame
    Terminated,
}

/// State shared between the caller-facing handle and the poll worker.
struct ChannelShared {
    gate: Url,
    host: String,
    flags: Flags,
    profile: CoverProfile,
    http: reqwest::Client,
    connected: AtomicBool,
    channel: RwLock<Option<Arc<SecureChannel>>>,
    rx: ByteQueue,
}

impl ChannelShared {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn secure_channel(&self) -> Result<Arc<SecureChannel>> {
        self.channel.read().clone().ok_or(Error::NotConnected)
    }

    /// Send one form POST and return the raw response body.
    async fn send_form(&self, key: &str, value: &str) -> Result<Vec<u8>> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(key, value)
            .finish();

        let verb = reqwest::Method::from_bytes(self.profile.http_verb.as_bytes())
            .map_err(|_| Error::config(format!("invalid HTTP verb {:?}", self.profile.http_verb)))?;

        let response = self
            .http
            .request(verb, self.gate.clone())
            .header(reqwest::header::CONTENT_TYPE, &self.profile.content_type)
            .header(reqwest::header::CONNECTION, "close")
            .header(reqwest::header::USER_AGENT, &self.profile.user_agent)
            .header(reqwest::header::HOST, &self.host)
            .body(body)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::transport(format!(
                "gate returned HTTP {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Seal and post one frame, draining any response payload into the
    /// receive queue.
    async fn exchange(&self, payload: &[u8], ctrl: Flags) -> Result<Exchange> {
        let channel = self.secure_channel()?;

        let command;
        let payload = if payload.is_empty() && ctrl.is_command() {
            command = codec::command_payload(ctrl, &self.profile).unwrap_or_default();
            command.as_slice()
        } else {
            payload
        };
        if payload.is_empty() {
            return Err(Error::config("cannot send an empty data frame"));
        }

        let blob = channel.seal(payload, Flags::TO_SERVER, ctrl, self.flags)?;
        let body = self
            .send_form(
                &codec::b64_encode(channel.id_hex().as_bytes()),
                &codec::b64_encode(&blob),
            )
            .await?;

        if body.is_empty() {
            return Ok(Exchange::Empty);
        }

        let text = std::str::from_utf8(&body)
            .map_err(|_| Error::transport("response body is not base64 text"))?;
        let unit = channel.open(&codec::b64_decode(text)?, Flags::TO_CLIENT)?;

        if unit.flags.contains(Flags::TERMINATE) {
            return Ok(Exchange::Terminated);
        }

        let data = unit.into_payload()?;
        let delivered = data.len();
        self.rx.push(data);
        Ok(Exchange::Delivered(delivered))
    }

    /// Best-effort terminate frame; transport errors are swallowed.
    async fn post_terminate(&self) {
        let channel = self.channel.read().clone();
        let Some(channel) = channel else { return };

        let payload = codec::command_payload(Flags::TERMINATE, &self.profile).unwrap_or_default();
        if let Ok(blob) = channel.seal(&payload, Flags::TO_SERVER, Flags::TERMINATE, self.flags) {
            let _ = self
                .send_form(
                    &codec::b64_encode(channel.id_hex().as_bytes()),
                    &codec::b64_encode(&blob),
                )
                .await;
        }
    }

    /// Flip the channel closed exactly once.
    async fn shutdown(&self, notify_peer: bool) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if notify_peer {
                self.post_terminate().await;
            }
            self.rx.clear();
            tracing::debug!("circuit closed");
        }
    }
}

/// A covert channel endpoint speaking to one gate.
///
/// Created unconnected by [`build`](Self::build); all traffic waits
/// for [`initialize_circuit`](Self::initialize_circuit). The state
/// machine is monotonic: new → connected → closed, never back.
pub struct ChannelClient {
    shared: Arc<ChannelShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelClient {
    /// Validate flags and URI and construct an unconnected channel.
    ///
    /// `ENCRYPT` is mandatory, `DO_NOT_USE` is refused, and so is any
    /// scheme other than plain `http` — TLS would defeat the cover
    /// this channel hides in. Performs no network I/O.
    pub fn build(gate_uri: &str, flags: Flags) -> Result<Self> {
        Self::build_with_profile(gate_uri, flags, CoverProfile::default())
    }

    /// [`build`](Self::build) with a caller-supplied cover profile.
    pub fn build_with_profile(gate_uri: &str, flags: Flags, profile: CoverProfile) -> Result<Self> {
        if flags.contains(Flags::DO_NOT_USE) {
            return Err(Error::config("flag DO_NOT_USE is reserved"));
        }
        if !flags.contains(Flags::ENCRYPT) {
            return Err(Error::config("flag ENCRYPT is mandatory"));
        }
        profile.validate()?;

        let gate = Url::parse(gate_uri).map_err(|e| Error::InvalidUri(e.to_string()))?;
        if gate.scheme() != "http" {
            return Err(Error::config("gate scheme must be plain http, not TLS"));
        }
        let host = gate
            .host_str()
            .ok_or_else(|| Error::InvalidUri("gate URI has no host".to_string()))?
            .to_string();

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config(format!("HTTP client construction failed: {}", e)))?;

        if flags.contains(Flags::DEBUG) {
            tracing::debug!(gate = %gate, "channel built");
        }

        Ok(Self {
            shared: Arc::new(ChannelShared {
                gate,
                host,
                flags,
                profile,
                http,
                connected: AtomicBool::new(false),
                channel: RwLock::new(None),
                rx: ByteQueue::new(),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Bring the circuit up: optional reachability probe, public-key
    /// exchange, optional self-test, then the poll worker.
    pub async fn initialize_circuit(&self) -> Result<()> {
        if self.shared.flags.contains(Flags::PING_SERVER) {
            probe::check_server_alive(&self.shared.gate, &self.shared.http).await?;
        }

        self.perform_key_exchange().await?;
        self.shared.connected.store(true, Ordering::SeqCst);

        if self.shared.flags.contains(Flags::TEST_CIRCUIT) {
            if let Err(err) = self.run_circuit_test().await {
                self.close().await;
                return Err(err);
            }
        }

        self.spawn_poll_worker();
        Ok(())
    }

    async fn perform_key_exchange(&self) -> Result<()> {
        let keypair = Keypair::generate();
        let marker = random_marker(&self.shared.profile.post_key_charset, MARKER_LEN);

        let body = self
            .shared
            .send_form(
                &codec::b64_encode(marker.as_bytes()),
                &codec::b64_encode(keypair.public().as_bytes()),
            )
            .await?;
        if body.is_empty() {
            return Err(Error::handshake("server returned a zero-length public key"));
        }

        let text = std::str::from_utf8(&body)
            .map_err(|_| Error::handshake("server public key is not text"))?;
        let raw = codec::b64_decode(text)
            .map_err(|_| Error::handshake("server public key is not valid base64"))?;
        let server_public = PublicKey::from_wire(&raw)?;

        let secret = keypair.agree(&server_public);
        let channel = SecureChannel::derive(&secret);
        if self.shared.flags.contains(Flags::DEBUG) {
            tracing::debug!(client_id = %channel.id_hex(), "key exchange complete");
        }
        *self.shared.channel.write() = Some(Arc::new(channel));
        Ok(())
    }

    /// Round-trip the configured test literal through the gate and
    /// verify it byte-exact and printable.
    async fn run_circuit_test(&self) -> Result<()> {
        match self.shared.exchange(&[], Flags::TEST_CONNECTION).await? {
            Exchange::Delivered(_) => {}
            _ => return Err(Error::circuit_test("no test response from the gate")),
        }

        let expected = self.shared.profile.test_stream.as_bytes();
        let mut echoed = vec![0u8; self.shared.rx.len()];
        self.shared.rx.read_into(&mut echoed);

        if echoed.len() != expected.len() || !codec::is_ascii_printable(&echoed) {
            return Err(Error::circuit_test("corrupt test stream from the gate"));
        }
        if echoed != expected {
            return Err(Error::circuit_test("test stream mismatch"));
        }
        Ok(())
    }

    fn spawn_poll_worker(&self) {
        let shared = Arc::clone(&self.shared);
        *self.worker.lock() = Some(tokio::spawn(poll_worker(shared)));
    }

    /// Post one data frame. The response may piggy-back a
    /// server-to-client payload, which lands on the receive queue.
    pub async fn write(&self, p: &[u8]) -> Result<usize> {
        self.shared.ensure_connected()?;
        match self.shared.exchange(p, Flags::empty()).await? {
            Exchange::Terminated => {
                self.shared.shutdown(false).await;
                Err(Error::NotConnected)
            }
            _ => Ok(p.len()),
        }
    }

    /// Copy up to `p.len()` buffered bytes; `Ok(0)` means nothing is
    /// buffered right now.
    pub fn read(&self, p: &mut [u8]) -> Result<usize> {
        self.shared.ensure_connected()?;
        Ok(self.shared.rx.read_into(p))
    }

    /// Total bytes buffered for reading; 0 when not connected.
    pub fn len(&self) -> usize {
        if self.shared.connected.load(Ordering::SeqCst) {
            self.shared.rx.len()
        } else {
            0
        }
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block up to `timeout` for buffered data, polling at the wait
    /// granularity. Returns immediately when data is already buffered
    /// or the channel is closed.
    pub async fn wait(&self, timeout: Duration) -> (usize, WaitStatus) {
        let ticks = (timeout.as_millis() / WAIT_TICK.as_millis()).max(1);
        for _ in 0..ticks {
            if !self.shared.connected.load(Ordering::SeqCst) {
                return (0, WaitStatus::Closed);
            }
            let buffered = self.shared.rx.len();
            if buffered > 0 {
                return (buffered, WaitStatus::DataReceived);
            }
            tokio::time::sleep(WAIT_TICK).await;
        }
        (0, WaitStatus::TimeoutReached)
    }

    /// Close the circuit: one best-effort terminate POST, then local
    /// teardown. Idempotent.
    pub async fn close(&self) {
        self.shared.shutdown(true).await;
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }

    /// Whether the circuit is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// The session identity in hex, once the key exchange has run.
    pub fn client_id_hex(&self) -> Option<String> {
        self.shared
            .channel
            .read()
            .as_ref()
            .map(|c| c.id_hex().to_string())
    }
}

/// The reverse leg: keep posting check-stream frames and drain
/// whatever rides back.
///
/// Cadence is adaptive — the base interval after traffic, doubling to
/// an idle ceiling while responses stay empty. Transient transport
/// failures back off and retry; a run of them, or a terminate frame,
/// closes the channel. Nothing here ever propagates to a user task.
async fn poll_worker(shared: Arc<ChannelShared>) {
    let mut idle = POLL_INTERVAL;
    let mut failures: u32 = 0;

    loop {
        if !shared.connected.load(Ordering::SeqCst) {
            break;
        }

        match shared.exchange(&[], Flags::CHECK_STREAM).await {
            Ok(Exchange::Delivered(bytes)) => {
                failures = 0;
                idle = POLL_INTERVAL;
                tracing::trace!(bytes, "poll delivered payload");
            }
            Ok(Exchange::Empty) => {
                failures = 0;
                idle = (idle * 2).min(POLL_IDLE_MAX);
            }
            Ok(Exchange::Terminated) => {
                tracing::debug!("gate terminated the circuit");
                shared.shutdown(false).await;
                break;
            }
            Err(err) if err.is_recoverable() && failures + 1 < POLL_FAILURE_LIMIT => {
                failures += 1;
                idle = (idle * 2).min(POLL_IDLE_MAX);
                tracing::debug!(error = %err, failures, "poll failed, backing off");
            }
            Err(err) => {
                tracing::warn!(error = %err, "poll worker giving up");
                shared.shutdown(false).await;
                break;
            }
        }

        tokio::time::sleep(idle).await;
    }
}
