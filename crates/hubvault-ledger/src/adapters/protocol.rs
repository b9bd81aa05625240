use async_trait::async_trait;
use hubvault_client::{ClientError, ProtocolClient};

use crate::rpc::{
    AppSessionResult, CloseAppSessionParams, CreateAppSessionParams, SubmitAppStateParams,
    METHOD_CLOSE_APP_SESSION, METHOD_CREATE_APP_SESSION, METHOD_SUBMIT_APP_STATE,
};
use crate::traits::SessionCoordinator;

/// Session methods travel as signed, correlated requests on the client's
/// authenticated connection.
#[async_trait]
impl SessionCoordinator for ProtocolClient {
    async fn create_app_session(
        &self,
        params: &CreateAppSessionParams,
    ) -> Result<AppSessionResult, ClientError> {
        self.call(METHOD_CREATE_APP_SESSION, params).await
    }

    async fn submit_app_state(
        &self,
        params: &SubmitAppStateParams,
    ) -> Result<AppSessionResult, ClientError> {
        self.call(METHOD_SUBMIT_APP_STATE, params).await
    }

    async fn close_app_session(
        &self,
        params: &CloseAppSessionParams,
    ) -> Result<AppSessionResult, ClientError> {
        self.call(METHOD_CLOSE_APP_SESSION, params).await
    }
}
