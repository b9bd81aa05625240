use async_trait::async_trait;
use hubvault_client::ClientError;

use crate::rpc::{AppSessionResult, CloseAppSessionParams, CreateAppSessionParams, SubmitAppStateParams};

/// The remote side of an application session.
///
/// The ledger records only what the coordinator accepts. Implemented for
/// `ProtocolClient`; `InMemoryCoordinator` stands in for tests and local runs.
#[async_trait]
pub trait SessionCoordinator: Send + Sync {
    /// Open a session with its initial allocations.
    async fn create_app_session(
        &self,
        params: &CreateAppSessionParams,
    ) -> Result<AppSessionResult, ClientError>;

    /// Submit an updated state for an open session.
    async fn submit_app_state(
        &self,
        params: &SubmitAppStateParams,
    ) -> Result<AppSessionResult, ClientError>;

    /// Close a session with its final allocations.
    async fn close_app_session(
        &self,
        params: &CloseAppSessionParams,
    ) -> Result<AppSessionResult, ClientError>;
}
