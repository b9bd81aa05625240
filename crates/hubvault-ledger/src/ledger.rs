use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use hubvault_core::{now_millis, Address, Allocation};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::rpc::{AppDefinition, CloseAppSessionParams, CreateAppSessionParams, SubmitAppStateParams};
use crate::traits::SessionCoordinator;
use crate::types::{ChannelState, Intent, SessionId};

/// Current state plus the append-only history of one session.
#[derive(Debug)]
struct SessionRecord {
    current: ChannelState,
    /// One entry per version, oldest first. `history[i].version == i + 1`.
    history: Vec<ChannelState>,
}

/// Versioned allocation ledger for two-party application sessions.
///
/// Every state is recorded only after the coordinator accepts it. Updates
/// to one session are serialized; the session's lock is held across the
/// remote call. Different sessions proceed in parallel.
pub struct ChannelLedger {
    coordinator: Arc<dyn SessionCoordinator>,
    config: LedgerConfig,
    sessions: DashMap<SessionId, Arc<Mutex<SessionRecord>>>,
    /// Deal / deposit-group key → linked session.
    groups: DashMap<String, SessionId>,
    group_locks: DashMap<String, Arc<Mutex<()>>>,
    nonce: AtomicU64,
}

impl ChannelLedger {
    pub fn new(coordinator: Arc<dyn SessionCoordinator>, config: LedgerConfig) -> Self {
        Self {
            coordinator,
            config,
            sessions: DashMap::new(),
            groups: DashMap::new(),
            group_locks: DashMap::new(),
            nonce: AtomicU64::new(now_millis()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Open a session remotely and record version 1.
    ///
    /// Nothing is recorded if the coordinator rejects the session.
    pub async fn create_session(
        &self,
        participants: [Address; 2],
        allocations: [Allocation; 2],
    ) -> Result<SessionId, LedgerError> {
        if participants[0] == participants[1] {
            return Err(LedgerError::InvalidParticipants(format!(
                "participants must be distinct, got {} twice",
                participants[0]
            )));
        }
        check_allocations(&participants, &allocations)?;

        let params = CreateAppSessionParams {
            definition: AppDefinition {
                protocol: self.config.protocol.clone(),
                participants: participants.to_vec(),
                weights: self.config.weights.to_vec(),
                quorum: self.config.quorum,
                challenge: self.config.challenge_period,
                nonce: self.nonce.fetch_add(1, Ordering::SeqCst),
            },
            allocations: allocations.to_vec(),
        };

        let result = self
            .coordinator
            .create_app_session(&params)
            .await
            .map_err(LedgerError::SessionCreationFailed)?;

        let session_id = result.app_session_id;
        if result.version != 1 {
            tracing::warn!(
                session_id = %session_id,
                remote_version = result.version,
                "coordinator reported unexpected initial version"
            );
        }

        let state = ChannelState {
            session_id: session_id.clone(),
            version: 1,
            intent: Intent::Initialize,
            participants,
            allocations,
            state_data: None,
            updated_at: Utc::now(),
        };
        self.sessions.insert(
            session_id.clone(),
            Arc::new(Mutex::new(SessionRecord {
                current: state.clone(),
                history: vec![state],
            })),
        );

        tracing::info!(session_id = %session_id, "channel session created");
        Ok(session_id)
    }

    /// Record a redistribution of the session's funds at the next version.
    ///
    /// Not idempotent: submitting the same allocations twice produces two versions.
    pub async fn operate(
        &self,
        session_id: &SessionId,
        allocations: [Allocation; 2],
        state_data: Option<Value>,
    ) -> Result<ChannelState, LedgerError> {
        self.advance(session_id, Intent::Operate, allocations, state_data)
            .await
    }

    /// Record the final allocations and close the session.
    pub async fn finalize(
        &self,
        session_id: &SessionId,
        allocations: [Allocation; 2],
    ) -> Result<ChannelState, LedgerError> {
        self.advance(session_id, Intent::Finalize, allocations, None)
            .await
    }

    async fn advance(
        &self,
        session_id: &SessionId,
        intent: Intent,
        allocations: [Allocation; 2],
        state_data: Option<Value>,
    ) -> Result<ChannelState, LedgerError> {
        let record = self.record(session_id)?;
        let mut record = record.lock().await;

        if record.current.is_final() {
            return Err(LedgerError::SessionAlreadyFinalized(session_id.clone()));
        }
        check_allocations(&record.current.participants, &allocations)?;

        let version = record.current.version + 1;
        match intent {
            Intent::Finalize => {
                self.coordinator
                    .close_app_session(&CloseAppSessionParams {
                        app_session_id: session_id.clone(),
                        allocations: allocations.to_vec(),
                        session_data: state_data.clone(),
                    })
                    .await?;
            }
            _ => {
                self.coordinator
                    .submit_app_state(&SubmitAppStateParams {
                        app_session_id: session_id.clone(),
                        intent,
                        version,
                        allocations: allocations.to_vec(),
                        session_data: state_data.clone(),
                    })
                    .await?;
            }
        }

        let state = ChannelState {
            session_id: session_id.clone(),
            version,
            intent,
            participants: record.current.participants.clone(),
            allocations,
            state_data: state_data.or_else(|| record.current.state_data.clone()),
            updated_at: Utc::now(),
        };
        record.history.push(state.clone());
        record.current = state.clone();

        tracing::info!(session_id = %session_id, version, %intent, "channel state recorded");
        Ok(state)
    }

    /// The latest state of a session.
    pub async fn get_state(&self, session_id: &SessionId) -> Result<ChannelState, LedgerError> {
        let record = self.record(session_id)?;
        let record = record.lock().await;
        Ok(record.current.clone())
    }

    /// Up to `limit` states of a session, most recent first.
    pub async fn get_history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ChannelState>, LedgerError> {
        let record = self.record(session_id)?;
        let record = record.lock().await;
        Ok(record.history.iter().rev().take(limit).cloned().collect())
    }

    /// Reuse the open session linked to `group_key`, or open and link a new one.
    ///
    /// A reused session receives `allocations` as an `operate` update.
    /// Returns the session id and whether it was reused.
    pub async fn open_or_reuse(
        &self,
        group_key: &str,
        participants: [Address; 2],
        allocations: [Allocation; 2],
    ) -> Result<(SessionId, bool), LedgerError> {
        let lock = self
            .group_locks
            .entry(group_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(session_id) = self.session_for_group(group_key) {
            if !self.get_state(&session_id).await?.is_final() {
                self.operate(&session_id, allocations, None).await?;
                tracing::debug!(group_key, session_id = %session_id, "reused group session");
                return Ok((session_id, true));
            }
        }

        let session_id = self.create_session(participants, allocations).await?;
        self.groups.insert(group_key.to_string(), session_id.clone());
        Ok((session_id, false))
    }

    /// The session linked to a group key, if any.
    pub fn session_for_group(&self, group_key: &str) -> Option<SessionId> {
        self.groups.get(group_key).map(|entry| entry.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn record(&self, session_id: &SessionId) -> Result<Arc<Mutex<SessionRecord>>, LedgerError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::SessionNotFound(session_id.clone()))
    }
}

/// Allocation participants must equal the session participants, in order.
fn check_allocations(
    participants: &[Address; 2],
    allocations: &[Allocation; 2],
) -> Result<(), LedgerError> {
    for (participant, allocation) in participants.iter().zip(allocations) {
        if &allocation.participant != participant {
            return Err(LedgerError::AllocationMismatch(format!(
                "expected {}, got {}",
                participant, allocation.participant
            )));
        }
    }
    Ok(())
}
