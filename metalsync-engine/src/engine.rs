//! Engine: one injected remote client shared by one reconciler per kind.

use std::sync::Arc;

use tracing::info;

use crate::client::RemoteClient;
use crate::config::{ConfigError, EngineConfig};
use crate::reconciler::{IpReconciler, ProjectReconciler, ServerReconciler, SshKeyReconciler};

/// Entry point for the front end.
///
/// The engine never constructs a client itself; the host builds one
/// (authenticated, with its own HTTP stack) and hands it in. Reconcilers are
/// cheap to share across tasks: each pass borrows them immutably, so distinct
/// resources can converge concurrently.
pub struct Engine<C> {
    client: Arc<C>,
    config: Arc<EngineConfig>,
    projects: ProjectReconciler<C>,
    ip_addresses: IpReconciler<C>,
    ssh_keys: SshKeyReconciler<C>,
    servers: ServerReconciler<C>,
}

impl<C: RemoteClient> Engine<C> {
    pub fn new(client: Arc<C>, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        info!(
            call_attempts = config.call_retry.max_attempts,
            provision_budget_secs = config.provision.max_elapsed.as_secs(),
            reinstall_budget_secs = config.reinstall.max_elapsed.as_secs(),
            "Convergence engine ready"
        );

        Ok(Self {
            projects: ProjectReconciler::new(Arc::clone(&client), Arc::clone(&config)),
            ip_addresses: IpReconciler::new(Arc::clone(&client), Arc::clone(&config)),
            ssh_keys: SshKeyReconciler::new(Arc::clone(&client), Arc::clone(&config)),
            servers: ServerReconciler::new(Arc::clone(&client), Arc::clone(&config)),
            client,
            config,
        })
    }

    pub fn projects(&self) -> &ProjectReconciler<C> {
        &self.projects
    }

    pub fn ip_addresses(&self) -> &IpReconciler<C> {
        &self.ip_addresses
    }

    pub fn ssh_keys(&self) -> &SshKeyReconciler<C> {
        &self.ssh_keys
    }

    pub fn servers(&self) -> &ServerReconciler<C> {
        &self.servers
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
