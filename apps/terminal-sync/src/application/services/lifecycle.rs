//! Account Lifecycle Manager
//!
//! Tracks a remote account's deployment and broker-connectivity state
//! and exposes idempotent deploy/undeploy plus blocking waits.
//!
//! Status transitions ride a `tokio::sync::watch` channel: a waiter
//! registered before or during a transition always observes it, so
//! there is no missed-wakeup window. A wait's timeout releases only
//! that caller; the underlying deployment keeps progressing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::application::ports::{ProvisioningError, ProvisioningPort};
use crate::domain::account::{AccountId, AccountStatus, ConnectionStatus, DeploymentState};

/// Errors returned by lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A wait exceeded its budget. Recoverable; the caller may retry.
    #[error("timed out after {0:?} waiting for account state")]
    Timeout(Duration),

    /// The provisioning API failed the request.
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),
}

/// Manages one account's deployment lifecycle.
pub struct AccountLifecycleManager {
    account: AccountId,
    provisioning: Arc<dyn ProvisioningPort>,
    status_tx: watch::Sender<AccountStatus>,
}

impl AccountLifecycleManager {
    /// Create a manager with an assumed-undeployed initial status.
    ///
    /// Call [`Self::reload`] to pick up the real remote status.
    #[must_use]
    pub fn new(account: AccountId, provisioning: Arc<dyn ProvisioningPort>) -> Self {
        let (status_tx, _) = watch::channel(AccountStatus::default());
        Self {
            account,
            provisioning,
            status_tx,
        }
    }

    /// The account this manager drives.
    #[must_use]
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Current status as last observed.
    #[must_use]
    pub fn status(&self) -> AccountStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status transitions.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<AccountStatus> {
        self.status_tx.subscribe()
    }

    /// Refresh status from the provisioning API once.
    pub async fn reload(&self) -> Result<AccountStatus, LifecycleError> {
        let status = self.provisioning.fetch_status(&self.account).await?;
        self.apply_status(status);
        Ok(status)
    }

    /// Record a status transition observed out-of-band.
    ///
    /// Fed from provisioning reads and from status events on the
    /// synchronization stream.
    pub fn apply_status(&self, status: AccountStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                tracing::info!(
                    account = %self.account,
                    deployment = status.deployment.as_str(),
                    connection = status.connection.as_str(),
                    "Account status changed"
                );
                *current = status;
                true
            }
        });
    }

    /// Start deploying the account's terminal.
    ///
    /// Idempotent: an already-deployed account resolves immediately
    /// without issuing a duplicate command; an in-flight deployment is
    /// left to complete.
    pub async fn deploy(&self) -> Result<(), LifecycleError> {
        match self.status().deployment {
            DeploymentState::Deployed | DeploymentState::Deploying => return Ok(()),
            DeploymentState::Undeployed | DeploymentState::Undeploying => {}
        }

        self.provisioning.deploy(&self.account).await?;
        self.apply_status(AccountStatus::new(
            DeploymentState::Deploying,
            self.status().connection,
        ));
        Ok(())
    }

    /// Start undeploying the account's terminal.
    ///
    /// Idempotent in the same way as [`Self::deploy`].
    pub async fn undeploy(&self) -> Result<(), LifecycleError> {
        match self.status().deployment {
            DeploymentState::Undeployed | DeploymentState::Undeploying => return Ok(()),
            DeploymentState::Deployed | DeploymentState::Deploying => {}
        }

        self.provisioning.undeploy(&self.account).await?;
        self.apply_status(AccountStatus::new(
            DeploymentState::Undeploying,
            ConnectionStatus::Disconnected,
        ));
        Ok(())
    }

    /// Wait until the account reaches [`DeploymentState::Deployed`].
    pub async fn wait_deployed(&self, timeout: Duration) -> Result<(), LifecycleError> {
        self.wait_for(timeout, |status| status.is_deployed()).await
    }

    /// Wait until the terminal reports a broker connection.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), LifecycleError> {
        self.wait_for(timeout, |status| status.is_connected()).await
    }

    async fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&AccountStatus) -> bool,
    ) -> Result<(), LifecycleError> {
        let mut rx = self.status_tx.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
            Ok(Ok(_)) => Ok(()),
            // The sender lives as long as self; a closed channel cannot
            // be observed here, but map it to a timeout for safety.
            Ok(Err(_)) | Err(_) => Err(LifecycleError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingProvisioning {
        deploys: AtomicUsize,
        undeploys: AtomicUsize,
    }

    #[async_trait]
    impl ProvisioningPort for CountingProvisioning {
        async fn deploy(&self, _account: &AccountId) -> Result<(), ProvisioningError> {
            self.deploys.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn undeploy(&self, _account: &AccountId) -> Result<(), ProvisioningError> {
            self.undeploys.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_status(
            &self,
            _account: &AccountId,
        ) -> Result<AccountStatus, ProvisioningError> {
            Ok(AccountStatus::default())
        }
    }

    fn manager() -> (Arc<CountingProvisioning>, AccountLifecycleManager) {
        let provisioning = Arc::new(CountingProvisioning::default());
        let manager =
            AccountLifecycleManager::new("demo123".to_string(), Arc::clone(&provisioning) as _);
        (provisioning, manager)
    }

    #[tokio::test]
    async fn deploy_issues_command_and_transitions() {
        let (provisioning, manager) = manager();

        manager.deploy().await.unwrap();

        assert_eq!(provisioning.deploys.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status().deployment, DeploymentState::Deploying);
    }

    #[tokio::test]
    async fn deploy_on_deployed_account_is_a_no_op() {
        let (provisioning, manager) = manager();
        manager.apply_status(AccountStatus::new(
            DeploymentState::Deployed,
            ConnectionStatus::Connected,
        ));

        manager.deploy().await.unwrap();

        assert_eq!(provisioning.deploys.load(Ordering::SeqCst), 0);
        assert_eq!(manager.status().deployment, DeploymentState::Deployed);
    }

    #[tokio::test]
    async fn undeploy_on_undeployed_account_is_a_no_op() {
        let (provisioning, manager) = manager();

        manager.undeploy().await.unwrap();

        assert_eq!(provisioning.undeploys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn waiter_registered_before_transition_observes_it() {
        let (_, manager) = manager();
        let manager = Arc::new(manager);

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait_deployed(Duration::from_secs(5)).await })
        };

        // Let the waiter register before the transition lands.
        tokio::task::yield_now().await;
        manager.apply_status(AccountStatus::new(
            DeploymentState::Deployed,
            ConnectionStatus::Disconnected,
        ));

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wait_resolves_immediately_when_already_in_state() {
        let (_, manager) = manager();
        manager.apply_status(AccountStatus::new(
            DeploymentState::Deployed,
            ConnectionStatus::Connected,
        ));

        manager.wait_connected(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn wait_times_out_without_transition() {
        let (_, manager) = manager();

        let err = manager
            .wait_connected(Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Timeout(_)));
    }

    #[tokio::test]
    async fn timeout_releases_only_the_expired_waiter() {
        let (_, manager) = manager();
        let manager = Arc::new(manager);

        let short = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait_connected(Duration::from_millis(10)).await })
        };
        let long = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait_connected(Duration::from_secs(5)).await })
        };

        assert!(short.await.unwrap().is_err());

        manager.apply_status(AccountStatus::new(
            DeploymentState::Deployed,
            ConnectionStatus::Connected,
        ));
        long.await.unwrap().unwrap();
    }
}
