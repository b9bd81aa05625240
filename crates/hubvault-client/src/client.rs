//! The coordinator protocol client.
//!
//! `ProtocolClient` owns one long-lived connection to the settlement
//! coordinator. It authenticates every connection with a challenge-response
//! handshake, multiplexes signed requests over it by correlation id, and
//! reconnects with exponential backoff when the transport drops.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use hubvault_core::{now_millis, Address, ClientConfig};
use hubvault_crypto::MessageSigner;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, RwLock};

use crate::auth::{AuthSession, Handshake};
use crate::backoff::ReconnectPolicy;
use crate::error::ClientError;
use crate::events::{ClientEvent, ConnectionState};
use crate::protocol::{
    first_result, AuthChallenge, AuthVerifyParams, AuthVerifyResult, ErrorPayload, Frame, Payload,
    METHOD_AUTH_CHALLENGE, METHOD_AUTH_REQUEST, METHOD_AUTH_VERIFY,
};
use crate::transport::{Connector, WebSocketConnector};

type Reply = oneshot::Sender<Result<Vec<Value>, ClientError>>;

/// How many timed-out request ids are remembered to drop their late replies.
const EXPIRED_ID_CAPACITY: usize = 256;

/// A request awaiting its correlated response.
struct PendingRequest {
    method: String,
    reply: Reply,
}

/// The in-flight handshake step, matched by response method rather than id.
struct AuthWaiter {
    expected: &'static str,
    reply: Reply,
}

/// Authenticated, multiplexed connection to the settlement coordinator.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    signer: Arc<MessageSigner>,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ClientEvent>,
    pending: DashMap<u64, PendingRequest>,
    /// Recently timed-out ids, oldest first.
    expired: Mutex<VecDeque<u64>>,
    /// Correlation ids. Never reset, so ids are unique across reconnects.
    next_id: AtomicU64,
    /// Sender half of the live connection; `None` while disconnected.
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    auth_waiter: Mutex<Option<AuthWaiter>>,
    auth_session: RwLock<Option<AuthSession>>,
    /// Bumped whenever a connection is replaced or torn down.
    generation: AtomicU64,
    reconnecting: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    connect_lock: Mutex<()>,
}

impl ProtocolClient {
    /// Create a client that dials through the given connector.
    pub fn new(
        config: ClientConfig,
        signer: Arc<MessageSigner>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(256);
        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(wallet = %signer.address(), url = %config.url, "creating protocol client");

        Self {
            inner: Arc::new(Inner {
                config,
                signer,
                connector,
                state_tx,
                event_tx,
                pending: DashMap::new(),
                expired: Mutex::new(VecDeque::with_capacity(EXPIRED_ID_CAPACITY)),
                next_id: AtomicU64::new(1),
                outbound: Mutex::new(None),
                auth_waiter: Mutex::new(None),
                auth_session: RwLock::new(None),
                generation: AtomicU64::new(0),
                reconnecting: AtomicBool::new(false),
                shutdown_tx,
                connect_lock: Mutex::new(()),
            }),
        }
    }

    /// Create a client that dials the configured URL over WebSocket.
    pub fn with_websocket(config: ClientConfig, signer: Arc<MessageSigner>) -> Self {
        Self::new(config, signer, Arc::new(WebSocketConnector::default()))
    }

    /// The wallet address this client authenticates as.
    pub fn address(&self) -> Address {
        self.inner.signer.address()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch connection state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Get a receiver for client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.event_tx.subscribe()
    }

    /// The authenticated session of the current connection, if any.
    pub async fn auth_session(&self) -> Option<AuthSession> {
        self.inner.auth_session.read().await.clone()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Open the transport and authenticate.
    ///
    /// Resolves once the session is authenticated. Fails with
    /// `ConnectionTimeout` if the transport does not open in time and with
    /// `AuthenticationFailed` if the coordinator rejects the handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.shutdown_tx.send_replace(false);
        self.inner.establish().await
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Pending requests and any in-flight handshake fail with `ConnectionClosed`.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.shutdown_tx.send_replace(true);

        let was_open = {
            let mut outbound = inner.outbound.lock().await;
            inner.generation.fetch_add(1, Ordering::SeqCst);
            outbound.take().is_some()
        };

        inner.fail_all().await;
        *inner.auth_session.write().await = None;
        inner.set_state(ConnectionState::Disconnected);

        if was_open {
            let _ = inner.event_tx.send(ClientEvent::Disconnected {
                reason: "client disconnect".into(),
            });
        }
        tracing::info!(wallet = %inner.signer.address(), "protocol client disconnected");
    }

    /// Send a signed request and wait for its correlated response.
    ///
    /// The request timeout covers both queueing the frame and waiting for
    /// the reply.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Vec<Value>, ClientError> {
        let inner = &self.inner;
        if inner.state() != ConnectionState::Authenticated {
            return Err(ClientError::NotAuthenticated);
        }

        let payload = inner.payload(method, params);
        let id = payload.id();
        let signature = inner.signer.sign_request(&payload)?;
        let frame = Frame::request(payload, signature.to_hex());

        let (reply, rx) = oneshot::channel();
        inner.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                reply,
            },
        );

        let exchange = async {
            inner.send_frame(&frame).await?;
            tracing::debug!(id, %method, "request sent");
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(ClientError::ConnectionClosed),
            }
        };

        match tokio::time::timeout(inner.config.request_timeout(), exchange).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                inner.pending.remove(&id);
                Err(e)
            }
            Err(_) => {
                inner.pending.remove(&id);
                inner.remember_expired(id).await;
                tracing::warn!(id, %method, "request timed out");
                Err(ClientError::RequestTimeout {
                    id,
                    method: method.to_string(),
                })
            }
        }
    }

    /// Typed request: `params` travels as a one-element array and the first
    /// result element is decoded into `R`.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, ClientError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = vec![serde_json::to_value(params)?];
        let result = self.request(method, params).await?;
        first_result(&result)
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "connection state");
        }
    }

    fn payload(&self, method: &str, params: Vec<Value>) -> Payload {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Payload(id, method.to_string(), params, now_millis())
    }

    async fn remember_expired(&self, id: u64) {
        let mut expired = self.expired.lock().await;
        if expired.len() == EXPIRED_ID_CAPACITY {
            expired.pop_front();
        }
        expired.push_back(id);
    }

    /// True if `id` belonged to a request that already timed out.
    async fn take_expired(&self, id: u64) -> bool {
        let mut expired = self.expired.lock().await;
        match expired.iter().position(|&e| e == id) {
            Some(index) => {
                expired.remove(index);
                true
            }
            None => false,
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let text = frame.encode()?;
        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(ClientError::ConnectionClosed)?;
        sender
            .send(text)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Open a connection and run the handshake on it.
    async fn establish(self: &Arc<Self>) -> Result<(), ClientError> {
        let _guard = self.connect_lock.lock().await;
        if self.state() == ConnectionState::Authenticated {
            return Ok(());
        }

        let mut shutdown = self.shutdown_tx.subscribe();
        self.set_state(ConnectionState::Connecting);
        let deadline = self.config.connection_timeout();
        let dial = tokio::time::timeout(deadline, self.connector.connect(&self.config.url));
        let connection = tokio::select! {
            dialed = dial => match dialed {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
                Err(_) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(ClientError::ConnectionTimeout(deadline));
                }
            },
            _ = stopped(&mut shutdown) => {
                tracing::info!("connect abandoned, client disconnected");
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::ConnectionClosed);
            }
        };

        let generation = {
            let mut outbound = self.outbound.lock().await;
            // `disconnect` raced the dial: drop the fresh connection unused.
            if self.shutting_down() {
                drop(outbound);
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::ConnectionClosed);
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *outbound = Some(connection.outbound);
            generation
        };
        tokio::spawn(read_loop(Arc::clone(self), connection.inbound, generation));

        self.set_state(ConnectionState::Connected);
        tracing::info!(url = %self.config.url, generation, "connected to coordinator");
        let _ = self.event_tx.send(ClientEvent::Connected);

        let outcome = self.authenticate().await;
        self.auth_waiter.lock().await.take();

        let mut outbound = self.outbound.lock().await;
        let current = self.generation.load(Ordering::SeqCst) == generation && outbound.is_some();
        let live = current && !self.shutting_down();

        match outcome {
            Ok(session) if live => {
                let session_expires_at = session.expires_at;
                *self.auth_session.write().await = Some(session);
                self.set_state(ConnectionState::Authenticated);
                drop(outbound);

                tracing::info!(
                    wallet = %self.signer.address(),
                    session_expires_at,
                    "authenticated with coordinator"
                );
                let _ = self
                    .event_tx
                    .send(ClientEvent::Authenticated { session_expires_at });
                Ok(())
            }
            outcome => {
                if current {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    outbound.take();
                }
                drop(outbound);
                self.set_state(ConnectionState::Disconnected);

                let err = match outcome {
                    Err(e) => e,
                    Ok(_) => ClientError::ConnectionClosed,
                };
                tracing::warn!(error = %err, "handshake failed");
                Err(err)
            }
        }
    }

    async fn authenticate(&self) -> Result<AuthSession, ClientError> {
        self.set_state(ConnectionState::Authenticating);
        let handshake = Handshake::new(self.signer.address(), &self.config);

        let challenge_rx = self.expect_auth_reply(METHOD_AUTH_CHALLENGE).await;
        let payload = self.payload(
            METHOD_AUTH_REQUEST,
            vec![serde_json::to_value(&handshake.request)?],
        );
        let signature = self.signer.sign_request(&payload)?;
        self.send_frame(&Frame::request(payload, signature.to_hex()))
            .await?;

        let result = self.await_auth_reply(challenge_rx, METHOD_AUTH_CHALLENGE).await?;
        let challenge: AuthChallenge = first_result(&result).map_err(|e| {
            ClientError::AuthenticationFailed(format!("malformed auth_challenge: {e}"))
        })?;

        let policy = handshake.policy(&challenge.challenge_message);
        let signature = self.signer.sign_auth_challenge(&handshake.domain, &policy);

        let verify_rx = self.expect_auth_reply(METHOD_AUTH_VERIFY).await;
        let params = AuthVerifyParams {
            challenge: challenge.challenge_message,
        };
        let payload = self.payload(METHOD_AUTH_VERIFY, vec![serde_json::to_value(&params)?]);
        self.send_frame(&Frame::request(payload, signature.to_hex()))
            .await?;

        let result = self.await_auth_reply(verify_rx, METHOD_AUTH_VERIFY).await?;
        let verdict: AuthVerifyResult = first_result(&result).map_err(|e| {
            ClientError::AuthenticationFailed(format!("malformed auth_verify: {e}"))
        })?;
        if !verdict.success {
            return Err(ClientError::AuthenticationFailed(
                "coordinator rejected auth_verify".into(),
            ));
        }

        Ok(handshake.into_session(verdict.jwt_token))
    }

    async fn expect_auth_reply(
        &self,
        expected: &'static str,
    ) -> oneshot::Receiver<Result<Vec<Value>, ClientError>> {
        let (reply, rx) = oneshot::channel();
        *self.auth_waiter.lock().await = Some(AuthWaiter { expected, reply });
        rx
    }

    async fn await_auth_reply(
        &self,
        rx: oneshot::Receiver<Result<Vec<Value>, ClientError>>,
        method: &str,
    ) -> Result<Vec<Value>, ClientError> {
        match tokio::time::timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => Err(ClientError::AuthenticationFailed(format!(
                "timed out waiting for {method}"
            ))),
        }
    }

    /// Route one inbound frame.
    async fn dispatch(&self, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::Response { res, .. } => {
                let Payload(id, method, result, _) = res;

                if method == METHOD_AUTH_CHALLENGE || method == METHOD_AUTH_VERIFY {
                    let mut waiter = self.auth_waiter.lock().await;
                    match waiter.take() {
                        Some(w) if w.expected == method => {
                            let _ = w.reply.send(Ok(result));
                        }
                        other => {
                            *waiter = other;
                            tracing::debug!(id, %method, "ignoring unexpected handshake frame");
                        }
                    }
                    return;
                }

                if let Some((_, pending)) = self.pending.remove(&id) {
                    tracing::debug!(id, method = %pending.method, "response received");
                    let _ = pending.reply.send(Ok(result));
                } else if self.take_expired(id).await {
                    tracing::debug!(id, %method, "dropping late response");
                } else {
                    let _ = self.event_tx.send(ClientEvent::Notification {
                        method,
                        params: result,
                    });
                }
            }
            Frame::Error {
                err: ErrorPayload(id, code, message, _),
            } => {
                if let Some((_, pending)) = self.pending.remove(&id) {
                    tracing::debug!(id, code, method = %pending.method, "error response received");
                    let _ = pending
                        .reply
                        .send(Err(ClientError::RemoteError { code, message }));
                    return;
                }
                if self.take_expired(id).await {
                    tracing::debug!(id, code, "dropping late error response");
                    return;
                }

                if let Some(w) = self.auth_waiter.lock().await.take() {
                    let _ = w.reply.send(Err(ClientError::AuthenticationFailed(format!(
                        "{code}: {message}"
                    ))));
                    return;
                }

                tracing::debug!(id, code, "ignoring error frame with no pending request");
            }
            Frame::Request { req, .. } => {
                tracing::debug!(method = %req.method(), "ignoring server-initiated request");
            }
        }
    }

    /// Fail every pending request and the in-flight handshake.
    async fn fail_all(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.reply.send(Err(ClientError::ConnectionClosed));
            }
        }
        if let Some(w) = self.auth_waiter.lock().await.take() {
            let _ = w.reply.send(Err(ClientError::ConnectionClosed));
        }
    }

    async fn on_transport_closed(self: &Arc<Self>, generation: u64) {
        let was_authenticated = {
            let mut outbound = self.outbound.lock().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            outbound.take();
            self.state() == ConnectionState::Authenticated
        };

        self.fail_all().await;
        *self.auth_session.write().await = None;
        self.set_state(ConnectionState::Disconnected);

        tracing::warn!(generation, "connection to coordinator lost");
        let _ = self.event_tx.send(ClientEvent::Disconnected {
            reason: "transport closed".into(),
        });

        if was_authenticated && !self.shutting_down() {
            self.spawn_reconnect();
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            tracing::debug!("reconnect loop already running");
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let reconnected = inner.reconnect_loop().await;
            inner.reconnecting.store(false, Ordering::SeqCst);

            // A close that landed while the loop was winding down.
            if reconnected
                && inner.state() == ConnectionState::Disconnected
                && !inner.shutting_down()
            {
                inner.spawn_reconnect();
            }
        });
    }

    /// Returns true once a connection is re-established.
    async fn reconnect_loop(self: &Arc<Self>) -> bool {
        let policy = ReconnectPolicy::from_config(&self.config);
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if self.shutting_down() {
                tracing::info!("reconnect cancelled");
                return false;
            }
            attempt += 1;
            let Some(delay) = policy.delay_for(attempt) else {
                let attempts = attempt - 1;
                tracing::error!(attempts, "reconnect attempts exhausted");
                let _ = self
                    .event_tx
                    .send(ClientEvent::ReconnectExhausted { attempts });
                return false;
            };

            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            let _ = self
                .event_tx
                .send(ClientEvent::Reconnecting { attempt, delay });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown) => {
                    tracing::info!("reconnect cancelled");
                    return false;
                }
            }

            match self.establish().await {
                Ok(()) => {
                    tracing::info!(attempt, "reconnected to coordinator");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn read_loop(inner: Arc<Inner>, mut inbound: mpsc::Receiver<String>, generation: u64) {
    while let Some(text) = inbound.recv().await {
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        inner.dispatch(&text).await;
    }
    inner.on_transport_closed(generation).await;
}
