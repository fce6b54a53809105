//! Provisioning API Client
//!
//! HTTP implementation of the [`ProvisioningPort`]: deploy/undeploy
//! commands and status reads against the account-provisioning REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::application::ports::{ProvisioningError, ProvisioningPort};
use crate::domain::account::{AccountId, AccountStatus, ConnectionStatus, DeploymentState};

/// HTTP request timeout for provisioning calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for the provisioning API.
pub struct ProvisioningClient {
    base_url: String,
    token: String,
    client: Client,
}

/// Account status payload returned by the provisioning API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountStatusResponse {
    state: DeploymentState,
    connection_status: ConnectionStatus,
}

impl ProvisioningClient {
    /// Create a client against a provisioning base URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the token is empty or the HTTP client
    /// cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, ProvisioningError> {
        let token = token.into();
        if token.is_empty() {
            return Err(ProvisioningError::Api("auth token is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProvisioningError::Api(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn account_url(&self, account: &AccountId) -> String {
        format!("{}/users/current/accounts/{account}", self.base_url)
    }

    async fn post_command(
        &self,
        account: &AccountId,
        command: &str,
    ) -> Result<(), ProvisioningError> {
        let url = format!("{}/{command}", self.account_url(account));
        let response = self
            .client
            .post(&url)
            .header("auth-token", &self.token)
            .send()
            .await
            .map_err(|e| ProvisioningError::Api(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ProvisioningError::AccountNotFound(account.clone())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProvisioningError::Api(format!("{command} returned {status}: {body}")))
            }
        }
    }
}

#[async_trait]
impl ProvisioningPort for ProvisioningClient {
    async fn deploy(&self, account: &AccountId) -> Result<(), ProvisioningError> {
        tracing::info!(account = %account, "Deploying account");
        self.post_command(account, "deploy").await
    }

    async fn undeploy(&self, account: &AccountId) -> Result<(), ProvisioningError> {
        tracing::info!(account = %account, "Undeploying account");
        self.post_command(account, "undeploy").await
    }

    async fn fetch_status(&self, account: &AccountId) -> Result<AccountStatus, ProvisioningError> {
        let response = self
            .client
            .get(self.account_url(account))
            .header("auth-token", &self.token)
            .send()
            .await
            .map_err(|e| ProvisioningError::Api(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let payload: AccountStatusResponse = response
                    .json()
                    .await
                    .map_err(|e| ProvisioningError::Api(e.to_string()))?;
                Ok(AccountStatus::new(payload.state, payload.connection_status))
            }
            StatusCode::NOT_FOUND => Err(ProvisioningError::AccountNotFound(account.clone())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProvisioningError::Api(format!("status read returned {status}: {body}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_rejected() {
        assert!(ProvisioningClient::new("https://api.example.com", "").is_err());
    }

    #[test]
    fn account_url_strips_trailing_slash() {
        let client = ProvisioningClient::new("https://api.example.com/", "token").unwrap();
        assert_eq!(
            client.account_url(&"acct-1".to_string()),
            "https://api.example.com/users/current/accounts/acct-1"
        );
    }

    #[test]
    fn status_payload_parses_wire_values() {
        let payload: AccountStatusResponse = serde_json::from_str(
            r#"{"state":"DEPLOYED","connectionStatus":"CONNECTED"}"#,
        )
        .unwrap();
        assert_eq!(payload.state, DeploymentState::Deployed);
        assert_eq!(payload.connection_status, ConnectionStatus::Connected);
    }
}
