//! The gate service: HTTP listener, dispatcher, and session registry.
//!
//! One POST-only route at the gate path. Every request is a single
//! form pair; the base64-decoded key either names a live session
//! (dispatch to that session) or it does not, in which case the value
//! must be a client public key and the request is treated as a key
//! exchange. Anything else is answered with a plain 400 and no state
//! change, which to an outside scanner looks like any other PHP form
//! endpoint rejecting junk.

mod session;

pub use session::Instance;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

use session::SessionRegistry;

use crate::codec;
use crate::config::CoverProfile;
use crate::crypto::{Keypair, PublicKey};
use crate::error::{Error, Result};
use crate::flags::Flags;
use crate::wire::SecureChannel;

/// Future returned by a connect handler.
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Callback invoked once per new session, in its own task.
///
/// A returned error tears the session down.
pub type ConnectHandler =
    Arc<dyn Fn(Arc<Instance>, Arc<GateService>) -> ConnectFuture + Send + Sync>;

/// Wrap an async closure as a [`ConnectHandler`].
pub fn connect_handler<F, Fut>(handler: F) -> ConnectHandler
where
    F: Fn(Arc<Instance>, Arc<GateService>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |instance, service| Box::pin(handler(instance, service)))
}

/// A listening gate.
pub struct GateService {
    path: String,
    port: u16,
    flags: Flags,
    profile: CoverProfile,
    registry: SessionRegistry,
    on_connect: ConnectHandler,
    shutdown_tx: watch::Sender<bool>,
}

impl GateService {
    /// Bind the listener and start serving the gate path.
    ///
    /// `ENCRYPT` is mandatory and `DO_NOT_USE` refused, same as on the
    /// client. Port 0 binds an ephemeral port; read it back with
    /// [`local_port`](Self::local_port).
    pub async fn create(
        path: &str,
        port: u16,
        flags: Flags,
        on_connect: ConnectHandler,
    ) -> Result<Arc<Self>> {
        Self::create_with_profile(path, port, flags, CoverProfile::default(), on_connect).await
    }

    /// [`create`](Self::create) with a caller-supplied cover profile.
    pub async fn create_with_profile(
        path: &str,
        port: u16,
        flags: Flags,
        profile: CoverProfile,
        on_connect: ConnectHandler,
    ) -> Result<Arc<Self>> {
        if flags.contains(Flags::DO_NOT_USE) {
            return Err(Error::config("flag DO_NOT_USE is reserved"));
        }
        if !flags.contains(Flags::ENCRYPT) {
            return Err(Error::config("flag ENCRYPT is mandatory"));
        }
        if !path.starts_with('/') {
            return Err(Error::config("gate path must begin with '/'"));
        }
        profile.validate()?;

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let port = listener.local_addr()?.port();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let service = Arc::new(Self {
            path: path.to_string(),
            port,
            flags,
            profile,
            registry: SessionRegistry::new(),
            on_connect,
            shutdown_tx,
        });

        let app = Router::new()
            .route(&service.path, post(dispatch))
            .with_state(Arc::clone(&service));

        tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = serve.await {
                tracing::warn!(error = %err, "gate listener exited");
            }
        });

        tracing::info!(port, path, "gate service listening");
        Ok(service)
    }

    /// The bound port.
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// The gate path.
    pub fn gate_path(&self) -> &str {
        &self.path
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.count()
    }

    /// Look up a live session by client-id hex.
    pub fn session(&self, id_hex: &str) -> Option<Arc<Instance>> {
        self.registry.get(id_hex)
    }

    /// Stop accepting requests and close every session; pending
    /// handler waits observe the close.
    pub fn shutdown(&self) {
        self.registry.close_all();
        let _ = self.shutdown_tx.send(true);
        tracing::info!(port = self.port, "gate service shut down");
    }
}

async fn dispatch(State(service): State<Arc<GateService>>, body: String) -> Response {
    match handle_post(&service, &body) {
        Ok(reply) => (StatusCode::OK, reply).into_response(),
        Err(err) => {
            tracing::debug!(error = %err, "rejected POST");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

/// Route one POST body: session frame or key exchange.
fn handle_post(service: &Arc<GateService>, body: &str) -> Result<String> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    let [(key, value)] = pairs.as_slice() else {
        return Err(Error::transport("expected exactly one form pair"));
    };

    let key_raw = codec::b64_decode(key)?;
    let purported_id =
        String::from_utf8(key_raw).map_err(|_| Error::transport("form key is not text"))?;

    match service.registry.get(&purported_id) {
        Some(instance) => handle_session_frame(service, instance, value),
        None => handle_key_exchange(service, value),
    }
}

/// First contact: the value must be the client's public key. The
/// response body is the server's public key; session state is created
/// only after both decode steps succeed, so junk requests mutate
/// nothing.
fn handle_key_exchange(service: &Arc<GateService>, value: &str) -> Result<String> {
    let client_public = PublicKey::from_wire(&codec::b64_decode(value)?)?;

    let keypair = Keypair::generate();
    let server_public_b64 = codec::b64_encode(keypair.public().as_bytes());

    let secret = keypair.agree(&client_public);
    let channel = SecureChannel::derive(&secret);
    let id_hex = channel.id_hex().to_string();

    let instance = Arc::new(Instance::new(channel, service.flags));
    service.registry.insert(id_hex.clone(), Arc::clone(&instance));
    tracing::info!(client_id = %id_hex, "circuit established");

    let callback = Arc::clone(&service.on_connect);
    let service = Arc::clone(service);
    tokio::spawn(async move {
        if let Err(err) = callback(Arc::clone(&instance), Arc::clone(&service)).await {
            tracing::warn!(
                client_id = %instance.client_id_hex(),
                error = %err,
                "connect handler failed, dropping session"
            );
            instance.close();
            service.registry.remove(instance.client_id_hex());
        }
    });

    Ok(server_public_b64)
}

/// A frame for an established session.
fn handle_session_frame(
    service: &GateService,
    instance: Arc<Instance>,
    value: &str,
) -> Result<String> {
    let blob = codec::b64_decode(value)?;

    if !instance.is_connected() {
        // Closed server-side; tell the client and forget the session.
        let payload =
            codec::command_payload(Flags::TERMINATE, &service.profile).unwrap_or_default();
        let reply = instance.secure_channel().seal(
            &payload,
            Flags::TO_CLIENT,
            Flags::TERMINATE,
            instance.session_flags(),
        )?;
        service.registry.remove(instance.client_id_hex());
        return Ok(codec::b64_encode(&reply));
    }

    let unit = instance.secure_channel().open(&blob, Flags::TO_SERVER)?;
    let frame_flags = unit.flags;

    if frame_flags.contains(Flags::TERMINATE) {
        instance.close();
        service.registry.remove(instance.client_id_hex());
        tracing::info!(client_id = %instance.client_id_hex(), "circuit terminated by client");
        return Ok(String::new());
    }

    if frame_flags.contains(Flags::TEST_CONNECTION) {
        let reply = instance.secure_channel().seal(
            service.profile.test_stream.as_bytes(),
            Flags::TO_CLIENT,
            Flags::TEST_CONNECTION,
            instance.session_flags(),
        )?;
        return Ok(codec::b64_encode(&reply));
    }

    if frame_flags.contains(Flags::CHECK_STREAM) {
        return pop_reply(&instance);
    }

    // Data frame: queue the payload, piggy-back anything outbound.
    instance.push_inbound(unit.into_payload()?);
    pop_reply(&instance)
}

/// Pop one outbound buffer into a sealed response, or answer empty.
fn pop_reply(instance: &Instance) -> Result<String> {
    match instance.pop_outbound() {
        Some(buf) => {
            let reply = instance.secure_channel().seal(
                &buf,
                Flags::TO_CLIENT,
                Flags::empty(),
                instance.session_flags(),
            )?;
            Ok(codec::b64_encode(&reply))
        }
        None => Ok(String::new()),
    }
}
