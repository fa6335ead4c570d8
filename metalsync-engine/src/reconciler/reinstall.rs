//! Reinstall Workflow.
//!
//! Reinstalling wipes the server and installs a fresh operating system with
//! a freshly generated root password. Consent is checked before this flow
//! is entered. The reinstall call itself is never retried: a second call
//! would restart an installation that may already be running.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use super::server::ServerReconciler;
use super::{Halt, Outcome, Pass, Reconciler, call, settle, unsettled};
use crate::advisory::Advisory;
use crate::audit;
use crate::client::ServerApi;
use crate::credentials::generate_password;
use crate::diff::ChangeSet;
use crate::drift::Presence;
use crate::error::{ClientError, Phase, Scope};
use crate::model::{
    ObservedState, ReinstallServer, ResourceKind, ServerAttributes, ServerConfig, UpdateServer,
};
use crate::poll::{PollError, Probe, Tick, poll};
use crate::provision::{DeployMachine, Step};

const DEPLOYMENT_ONLY: &[&str] = &["deployment"];

impl<C: ServerApi> ServerReconciler<C> {
    pub(super) async fn run_reinstall(
        &self,
        desired: &ServerConfig,
        observed: &ObservedState<ServerAttributes>,
        changes: &ChangeSet,
        pass: &Pass,
    ) -> Result<Outcome<ServerAttributes>, Halt<ServerAttributes>> {
        let id = observed.remote_id.as_str();
        let attributes = changes.reinstall_attributes();
        let scope = Scope::new(ResourceKind::Server, Phase::Reinstall).with_id(id);

        if pass.cancel.is_cancelled() {
            return Err(scope.cancelled().into());
        }

        audit::reinstalling(ResourceKind::Server, id, &attributes);
        let password = generate_password(self.config.password_length);
        let req = ReinstallServer::new(desired, password.clone());
        self.client
            .reinstall_server(id, req)
            .await
            .map_err(|e| scope.client(e))?;

        // the old password is invalid from here on, even if the flow fails
        let mut expected = observed.attributes.clone();
        expected.seed_write_only(desired);
        expected.password = Some(password);
        let reinstalled = ObservedState::new(
            observed.remote_id.clone(),
            expected,
            observed.status,
        );

        self.poll_deployment(&reinstalled, pass).await?;
        info!(server_id = id, "Server redeployed");

        let update = UpdateServer::from_changes(desired, changes);
        if !update.is_empty() {
            let update_scope = scope.at(Phase::Update);
            let cancel = pass.cancel_within(pass.timeouts.update);
            if let Err(error) = call(&self.config, &cancel, &update_scope, || {
                self.client.update_server(id, update.clone())
            })
            .await
            {
                let partial = self.last_known(&reinstalled).await;
                return Err(Halt::from(error).with_partial(Some(partial)));
            }
        }

        let advisories = vec![
            Advisory::reinstall_required(&attributes, true),
            Advisory::Reinstalled,
        ];
        match self
            .fetch(&reinstalled.remote_id, Some(&reinstalled.attributes), pass)
            .await
        {
            Ok(Presence::Present(state)) => Ok(Outcome::record(state).with_advisories(advisories)),
            Ok(Presence::Absent { reason, last_seen }) => Err(Halt {
                error: scope.at(Phase::Read).permanent(format!(
                    "server is not usable after reinstall: {}",
                    reason
                )),
                partial: last_seen.map(unsettled),
            }),
            Err(error) => Err(Halt::from(error).with_partial(Some(unsettled(reinstalled)))),
        }
    }

    /// Wait for a reinstall an earlier pass started, then read the server.
    pub(super) async fn await_deployed(
        &self,
        reinstalled: ObservedState<ServerAttributes>,
        pass: &Pass,
    ) -> Result<Outcome<ServerAttributes>, Halt<ServerAttributes>> {
        self.poll_deployment(&reinstalled, pass).await?;
        info!(server_id = %reinstalled.remote_id, "Server redeployed");
        Ok(settle(self, reinstalled, pass).await)
    }

    async fn poll_deployment(
        &self,
        reinstalled: &ObservedState<ServerAttributes>,
        pass: &Pass,
    ) -> Result<(), Halt<ServerAttributes>> {
        let id = reinstalled.remote_id.as_str();
        let budget = pass
            .timeouts
            .update
            .unwrap_or(self.config.reinstall.max_elapsed);
        let policy = self.config.reinstall.with_max_elapsed(budget);
        let mut probe = DeployProbe::new(self.client.as_ref(), id);
        let scope = Scope::new(ResourceKind::Server, Phase::Poll).with_id(id);

        if let Err(e) = poll(&policy, &pass.cancel, &mut probe).await {
            let error = match e {
                PollError::Fatal(reason) => scope.permanent(reason),
                PollError::Timeout { elapsed, .. } => {
                    scope.timeout(elapsed, probe.machine.last_remote().map(String::from))
                }
                PollError::Cancelled { .. } => scope.cancelled(),
            };
            warn!(server_id = id, error = %error, "Reinstall did not complete");
            let partial = self.last_known(reinstalled).await;
            return Err(Halt::from(error).with_partial(Some(partial)));
        }
        Ok(())
    }
}

/// Polls the server's `deployment` through the deploy machine.
struct DeployProbe<'a, C> {
    client: &'a C,
    id: &'a str,
    machine: DeployMachine,
    started: Instant,
}

impl<'a, C> DeployProbe<'a, C> {
    fn new(client: &'a C, id: &'a str) -> Self {
        Self {
            client,
            id,
            machine: DeployMachine::new(),
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl<'a, C: ServerApi> Probe for DeployProbe<'a, C> {
    type Output = ();
    type Error = String;

    async fn check(&mut self) -> Result<Tick<()>, String> {
        match self.client.get_server(self.id, Some(DEPLOYMENT_ONLY)).await {
            Ok(record) => {
                let deployment = record.deployment.as_deref().unwrap_or("deploying");
                match self.machine.observe(deployment, self.started.elapsed()) {
                    Step::Done => Ok(Tick::Ready(())),
                    Step::Continue => Ok(Tick::Pending),
                    Step::Fail(reason) => Err(reason),
                }
            }
            Err(ClientError::NotFound(_)) => {
                Err("server disappeared during reinstall".to_string())
            }
            Err(e @ ClientError::Transient(_)) => {
                warn!(server_id = self.id, error = %e, "Deployment read failed, will retry");
                Ok(Tick::Pending)
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
