use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use hubvault_client::ClientError;
use hubvault_core::{Address, Allocation};

use crate::rpc::{
    AppSessionResult, CloseAppSessionParams, CreateAppSessionParams, SubmitAppStateParams,
};
use crate::traits::SessionCoordinator;
use crate::types::{RemoteSessionStatus, SessionId};

/// Coordinator-side record of a session.
#[derive(Debug, Clone)]
struct RemoteSession {
    participants: Vec<Address>,
    allocations: Vec<Allocation>,
    version: u64,
    status: RemoteSessionStatus,
}

/// In-process coordinator.
///
/// Enforces the same rules a real coordinator does (known session, open
/// status, contiguous versions, matching participants) without a network.
/// Useful for testing and for running the vault without a remote hub.
pub struct InMemoryCoordinator {
    sessions: DashMap<SessionId, RemoteSession>,
    /// When set, every call fails with a 503 remote error.
    unavailable: AtomicBool,
    calls: AtomicU64,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            unavailable: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of calls received, failed ones included.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// The coordinator's view of a session: (version, status).
    pub fn remote_state(&self, id: &SessionId) -> Option<(u64, RemoteSessionStatus)> {
        self.sessions.get(id).map(|s| (s.version, s.status))
    }

    /// The allocations the coordinator last accepted for a session.
    pub fn remote_allocations(&self, id: &SessionId) -> Option<Vec<Allocation>> {
        self.sessions.get(id).map(|s| s.allocations.clone())
    }

    fn check_available(&self) -> Result<(), ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(remote(503, "coordinator unavailable"));
        }
        Ok(())
    }

    fn update(
        &self,
        id: &SessionId,
        version: u64,
        allocations: &[Allocation],
        status: RemoteSessionStatus,
    ) -> Result<AppSessionResult, ClientError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| remote(404, &format!("unknown app session {}", id)))?;
        let session = entry.value_mut();

        if session.status != RemoteSessionStatus::Open {
            return Err(remote(409, "app session is not open"));
        }
        if version != session.version + 1 {
            return Err(remote(
                409,
                &format!("expected version {}, got {}", session.version + 1, version),
            ));
        }
        check_allocations(&session.participants, allocations)?;

        session.version = version;
        session.allocations = allocations.to_vec();
        session.status = status;

        Ok(AppSessionResult {
            app_session_id: id.clone(),
            status,
            version,
        })
    }
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn remote(code: i64, message: &str) -> ClientError {
    ClientError::RemoteError {
        code,
        message: message.to_string(),
    }
}

fn check_allocations(participants: &[Address], allocations: &[Allocation]) -> Result<(), ClientError> {
    let matches = participants.len() == allocations.len()
        && participants
            .iter()
            .zip(allocations)
            .all(|(p, a)| &a.participant == p);
    if !matches {
        return Err(remote(400, "allocations do not match participants"));
    }
    Ok(())
}

#[async_trait]
impl SessionCoordinator for InMemoryCoordinator {
    async fn create_app_session(
        &self,
        params: &CreateAppSessionParams,
    ) -> Result<AppSessionResult, ClientError> {
        self.check_available()?;
        let definition = &params.definition;
        if definition.participants.len() != 2 {
            return Err(remote(400, "exactly two participants required"));
        }
        check_allocations(&definition.participants, &params.allocations)?;

        let encoded = serde_json::to_vec(definition)?;
        let id = SessionId::new(format!("0x{}", hex::encode(blake3::hash(&encoded).as_bytes())));
        if self.sessions.contains_key(&id) {
            return Err(remote(409, "app session already exists"));
        }

        self.sessions.insert(
            id.clone(),
            RemoteSession {
                participants: definition.participants.clone(),
                allocations: params.allocations.clone(),
                version: 1,
                status: RemoteSessionStatus::Open,
            },
        );
        tracing::debug!(session_id = %id, "in-memory app session created");

        Ok(AppSessionResult {
            app_session_id: id,
            status: RemoteSessionStatus::Open,
            version: 1,
        })
    }

    async fn submit_app_state(
        &self,
        params: &SubmitAppStateParams,
    ) -> Result<AppSessionResult, ClientError> {
        self.check_available()?;
        self.update(
            &params.app_session_id,
            params.version,
            &params.allocations,
            RemoteSessionStatus::Open,
        )
    }

    async fn close_app_session(
        &self,
        params: &CloseAppSessionParams,
    ) -> Result<AppSessionResult, ClientError> {
        self.check_available()?;
        let version = self
            .sessions
            .get(&params.app_session_id)
            .map(|s| s.version + 1)
            .ok_or_else(|| remote(404, &format!("unknown app session {}", params.app_session_id)))?;
        self.update(
            &params.app_session_id,
            version,
            &params.allocations,
            RemoteSessionStatus::Closed,
        )
    }
}
