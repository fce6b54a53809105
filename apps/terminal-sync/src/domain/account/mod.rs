//! Account State Types
//!
//! Deployment and broker-connectivity state for a remote terminal account.
//! These values are reported by the provisioning API and pushed down the
//! synchronization stream as status events.

use serde::{Deserialize, Serialize};

/// Unique identifier of a provisioned terminal account.
pub type AccountId = String;

/// Deployment state of the remote terminal process backing an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    /// No terminal process is provisioned.
    #[default]
    Undeployed,
    /// A terminal process is being provisioned.
    Deploying,
    /// The terminal process is running.
    Deployed,
    /// The terminal process is being torn down.
    Undeploying,
}

impl DeploymentState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Undeployed => "UNDEPLOYED",
            Self::Deploying => "DEPLOYING",
            Self::Deployed => "DEPLOYED",
            Self::Undeploying => "UNDEPLOYING",
        }
    }
}

/// Connectivity between the deployed terminal and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    /// Not connected to the broker.
    #[default]
    Disconnected,
    /// Connection to the broker is being established.
    Connecting,
    /// Connected to the broker.
    Connected,
}

impl ConnectionStatus {
    /// Get the status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        }
    }
}

/// Combined deployment and connectivity status of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountStatus {
    /// Deployment state of the backing terminal process.
    pub deployment: DeploymentState,
    /// Broker connectivity of the terminal.
    pub connection: ConnectionStatus,
}

impl AccountStatus {
    /// Create a new status value.
    #[must_use]
    pub const fn new(deployment: DeploymentState, connection: ConnectionStatus) -> Self {
        Self {
            deployment,
            connection,
        }
    }

    /// Check whether the terminal process is running.
    #[must_use]
    pub const fn is_deployed(&self) -> bool {
        matches!(self.deployment, DeploymentState::Deployed)
    }

    /// Check whether the terminal is connected to the broker.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.connection, ConnectionStatus::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_undeployed_disconnected() {
        let status = AccountStatus::default();
        assert_eq!(status.deployment, DeploymentState::Undeployed);
        assert_eq!(status.connection, ConnectionStatus::Disconnected);
        assert!(!status.is_deployed());
        assert!(!status.is_connected());
    }

    #[test]
    fn deployment_state_serializes_screaming_snake() {
        let json = serde_json::to_string(&DeploymentState::Undeploying).unwrap();
        assert_eq!(json, "\"UNDEPLOYING\"");

        let parsed: DeploymentState = serde_json::from_str("\"DEPLOYED\"").unwrap();
        assert_eq!(parsed, DeploymentState::Deployed);
    }

    #[test]
    fn state_names_match_wire_values() {
        assert_eq!(DeploymentState::Deploying.as_str(), "DEPLOYING");
        assert_eq!(ConnectionStatus::Connecting.as_str(), "CONNECTING");
    }
}
