//! In-process settlement coordinator for integration tests.
//!
//! Speaks the real wire protocol over a WebSocket on a loopback port:
//! verifies every request signature against the authenticated wallet, runs
//! the challenge-response handshake, and serves the app session methods
//! from an `InMemoryCoordinator`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use hubvault_client::protocol::{
    first_result, AuthRequestParams, AuthVerifyParams, Frame, Payload, METHOD_AUTH_CHALLENGE,
    METHOD_AUTH_REQUEST, METHOD_AUTH_VERIFY,
};
use hubvault_client::ClientError;
use hubvault_core::{now_millis, Address};
use hubvault_crypto::{verify_auth_challenge, verify_request, AuthPolicy, Signature, TypedDomain};
use hubvault_ledger::rpc::{
    AppSessionResult, CloseAppSessionParams, CreateAppSessionParams, SubmitAppStateParams,
    METHOD_CLOSE_APP_SESSION, METHOD_CREATE_APP_SESSION, METHOD_SUBMIT_APP_STATE,
};
use hubvault_ledger::{InMemoryCoordinator, SessionCoordinator};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// How the coordinator answers `auth_verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Accept a valid challenge signature.
    Accept,
    /// Reply `success: false` even to a valid signature.
    Refuse,
}

struct Shared {
    application: String,
    mode: VerifyMode,
    sessions: Arc<InMemoryCoordinator>,
    connections: AtomicUsize,
    authenticated: Mutex<Vec<Address>>,
}

/// A loopback WebSocket coordinator.
pub struct MockCoordinator {
    url: String,
    shared: Arc<Shared>,
    kill: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl MockCoordinator {
    /// Bind a loopback port and start accepting connections.
    pub async fn start(application: &str, mode: VerifyMode) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}/ws", listener.local_addr()?);
        let shared = Arc::new(Shared {
            application: application.to_string(),
            mode,
            sessions: Arc::new(InMemoryCoordinator::new()),
            connections: AtomicUsize::new(0),
            authenticated: Mutex::new(Vec::new()),
        });
        let (kill, _) = broadcast::channel(4);

        let accept_shared = shared.clone();
        let accept_kill = kill.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, accept_shared.clone(), accept_kill.subscribe()));
            }
        });

        Ok(Self {
            url,
            shared,
            kill,
            accept_task,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The coordinator's session store.
    pub fn sessions(&self) -> &Arc<InMemoryCoordinator> {
        &self.shared.sessions
    }

    /// Connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Wallets that completed the handshake, in order.
    pub fn authenticated_wallets(&self) -> Vec<Address> {
        self.shared
            .authenticated
            .lock()
            .map(|wallets| wallets.clone())
            .unwrap_or_default()
    }

    /// Drop every open connection without a close frame.
    pub fn drop_connections(&self) {
        let _ = self.kill.send(());
    }

    /// Stop accepting and drop every open connection.
    pub fn stop(&self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

impl Drop for MockCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn response(id: u64, method: &str, result: Vec<Value>) -> Frame {
    Frame::response(Payload(id, method.to_string(), result, now_millis()))
}

fn error(id: u64, code: i64, message: &str) -> Frame {
    Frame::error(id, code, message, now_millis())
}

fn session_reply(id: u64, method: &str, result: Result<AppSessionResult, ClientError>) -> Frame {
    match result.and_then(|r| Ok(serde_json::to_value(r)?)) {
        Ok(value) => response(id, method, vec![value]),
        Err(ClientError::RemoteError { code, message }) => error(id, code, &message),
        Err(e) => error(id, 400, &e.to_string()),
    }
}

/// Per-connection handshake progress.
#[derive(Default)]
struct ConnectionState {
    pending: Option<AuthRequestParams>,
    challenge: Option<String>,
    wallet: Option<Address>,
}

async fn serve(stream: TcpStream, shared: Arc<Shared>, mut kill: broadcast::Receiver<()>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let mut state = ConnectionState::default();

    loop {
        let message = tokio::select! {
            message = read.next() => message,
            _ = kill.recv() => return,
        };
        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        };
        let Ok(Frame::Request { req, sig }) = Frame::decode(&text) else {
            tracing::debug!("mock coordinator ignoring non-request frame");
            continue;
        };

        let reply = handle(&shared, &mut state, &req, &sig).await;
        let Ok(encoded) = reply.encode() else {
            continue;
        };
        if write.send(Message::Text(encoded)).await.is_err() {
            return;
        }
    }
}

async fn handle(shared: &Shared, state: &mut ConnectionState, req: &Payload, sig: &[String]) -> Frame {
    let id = req.id();
    let Some(signature) = sig.first().and_then(|s| Signature::from_hex(s).ok()) else {
        return error(id, 401, "missing signature");
    };
    let params = req.params();

    match req.method() {
        METHOD_AUTH_REQUEST => {
            let Ok(request) = first_result::<AuthRequestParams>(params) else {
                return error(id, 400, "malformed auth_request");
            };
            if verify_request(req, &signature, &request.address).is_err() {
                return error(id, 401, "invalid request signature");
            }
            let challenge = format!("challenge-{}-{}", id, now_millis());
            state.pending = Some(request);
            state.challenge = Some(challenge.clone());
            response(id, METHOD_AUTH_CHALLENGE, vec![json!({ "challenge_message": challenge })])
        }
        METHOD_AUTH_VERIFY => {
            let (Some(request), Some(challenge)) = (state.pending.take(), state.challenge.take())
            else {
                return error(id, 400, "no handshake in progress");
            };
            let Ok(verify) = first_result::<AuthVerifyParams>(params) else {
                return error(id, 400, "malformed auth_verify");
            };
            let policy = AuthPolicy {
                challenge: verify.challenge.clone(),
                scope: request.scope.clone(),
                wallet: request.address.clone(),
                session_key: request.session_key.clone(),
                expires_at: request.expires_at,
                allowances: request.allowances.clone(),
            };
            let valid = verify.challenge == challenge
                && verify_auth_challenge(
                    &TypedDomain::new(shared.application.clone()),
                    &policy,
                    &signature,
                    &request.address,
                )
                .is_ok();
            if !valid {
                return error(id, 401, "invalid challenge signature");
            }
            if shared.mode == VerifyMode::Refuse {
                return response(id, METHOD_AUTH_VERIFY, vec![json!({ "success": false })]);
            }

            if let Ok(mut wallets) = shared.authenticated.lock() {
                wallets.push(request.address.clone());
            }
            state.wallet = Some(request.address);
            response(
                id,
                METHOD_AUTH_VERIFY,
                vec![json!({ "success": true, "jwt_token": format!("jwt-{}", id) })],
            )
        }
        method => {
            let authorized = state
                .wallet
                .as_ref()
                .is_some_and(|wallet| verify_request(req, &signature, wallet).is_ok());
            if !authorized {
                return error(id, 401, "unauthenticated");
            }

            match method {
                METHOD_CREATE_APP_SESSION => {
                    let result = match first_result::<CreateAppSessionParams>(params) {
                        Ok(p) => shared.sessions.create_app_session(&p).await,
                        Err(e) => Err(e),
                    };
                    session_reply(id, method, result)
                }
                METHOD_SUBMIT_APP_STATE => {
                    let result = match first_result::<SubmitAppStateParams>(params) {
                        Ok(p) => shared.sessions.submit_app_state(&p).await,
                        Err(e) => Err(e),
                    };
                    session_reply(id, method, result)
                }
                METHOD_CLOSE_APP_SESSION => {
                    let result = match first_result::<CloseAppSessionParams>(params) {
                        Ok(p) => shared.sessions.close_app_session(&p).await,
                        Err(e) => Err(e),
                    };
                    session_reply(id, method, result)
                }
                "ping" => response(id, "pong", vec![]),
                _ => error(id, 404, "unknown method"),
            }
        }
    }
}
