//! Server reconciler.
//!
//! Creating a server only places an order; the machine is provisioned in the
//! background for several minutes. The create flow polls the server's
//! `status` until it is active, then performs a full read. Any interruption
//! (timeout, failure, cancellation) still records what is known about the
//! server; the next update resumes polling it instead of ordering a second
//! one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{
    Halt, Outcome, Pass, Reconciler, call, delete_idempotent, fetch_record, read_back, settle,
    unsettled,
};
use crate::audit;
use crate::client::ServerApi;
use crate::config::EngineConfig;
use crate::diff::ChangeSet;
use crate::drift::Presence;
use crate::error::{ClientError, EngineError, Phase, Scope};
use crate::model::{
    CreateServer, Observe, ObservedState, RemoteId, ResourceKind, ServerAttributes,
    ServerConfig, UpdateServer,
};
use crate::poll::{PollError, Probe, Tick, poll};
use crate::provision::{ProvisionMachine, Step};

pub(crate) const STATUS_ONLY: &[&str] = &["status"];

pub struct ServerReconciler<C> {
    pub(super) client: Arc<C>,
    pub(super) config: Arc<EngineConfig>,
}

impl<C> ServerReconciler<C> {
    pub fn new(client: Arc<C>, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }
}

impl<C: ServerApi> ServerReconciler<C> {
    async fn provision(
        &self,
        desired: &ServerConfig,
        pass: &Pass,
    ) -> Result<Outcome<ServerAttributes>, Halt<ServerAttributes>> {
        let scope = Scope::new(ResourceKind::Server, Phase::Create);
        let req = CreateServer::from(desired);
        let record = call(&self.config, &pass.cancel, &scope, || {
            self.client.create_server(req.clone())
        })
        .await?;

        let mut created = unsettled(record.to_state(None));
        created.attributes.seed_write_only(desired);
        let id = created.remote_id.clone();
        audit::created(ResourceKind::Server, id.as_str());
        info!(
            server_id = %id,
            plan = %desired.plan,
            region = %desired.region,
            "Server ordered, waiting for provisioning"
        );

        self.await_active(created, pass).await
    }

    /// Poll until the server is active, then read it in full. Failures carry
    /// the last known state as partial.
    async fn await_active(
        &self,
        pending: ObservedState<ServerAttributes>,
        pass: &Pass,
    ) -> Result<Outcome<ServerAttributes>, Halt<ServerAttributes>> {
        let id = pending.remote_id.as_str();
        let budget = pass
            .timeouts
            .create
            .unwrap_or(self.config.provision.max_elapsed);
        let policy = self.config.provision.with_max_elapsed(budget);
        let mut probe = ProvisionProbe::new(self.client.as_ref(), id);
        let scope = Scope::new(ResourceKind::Server, Phase::Poll).with_id(id);

        if let Err(e) = poll(&policy, &pass.cancel, &mut probe).await {
            let error = match e {
                PollError::Fatal(reason) => scope.permanent(reason),
                PollError::Timeout { elapsed, .. } => {
                    scope.timeout(elapsed, probe.machine.last_remote().map(String::from))
                }
                PollError::Cancelled { .. } => scope.cancelled(),
            };
            warn!(server_id = id, error = %error, "Provisioning did not complete");
            let partial = self.last_known(&pending).await;
            return Err(Halt::from(error).with_partial(Some(partial)));
        }

        info!(
            server_id = id,
            rounds = probe.machine.observations(),
            "Server is active"
        );
        Ok(settle(self, pending, pass).await)
    }

    /// One read that ignores cancellation, for recording partial state.
    pub(super) async fn last_known(
        &self,
        fallback: &ObservedState<ServerAttributes>,
    ) -> ObservedState<ServerAttributes> {
        let id = fallback.remote_id.as_str();
        match self.client.get_server(id, None).await {
            Ok(record) => unsettled(record.to_state(Some(&fallback.attributes))),
            Err(e) => {
                warn!(server_id = id, error = %e, "Could not read server for partial state");
                unsettled(fallback.clone())
            }
        }
    }
}

#[async_trait]
impl<C: ServerApi> Reconciler for ServerReconciler<C> {
    type Config = ServerConfig;
    type Attributes = ServerAttributes;

    const KIND: ResourceKind = ResourceKind::Server;

    fn allows_reinstall(desired: &ServerConfig) -> bool {
        desired.allow_reinstall
    }

    async fn create(&self, desired: &ServerConfig, pass: &Pass) -> Outcome<ServerAttributes> {
        self.provision(desired, pass)
            .await
            .unwrap_or_else(Halt::into_outcome)
    }

    async fn resume(
        &self,
        observed: &ObservedState<ServerAttributes>,
        pass: &Pass,
    ) -> Outcome<ServerAttributes> {
        // only a reinstall sets the password, so an unsettled state carrying
        // one was left by an interrupted reinstall
        let resumed = if observed.attributes.password.is_some() {
            self.await_deployed(observed.clone(), pass).await
        } else {
            self.await_active(observed.clone(), pass).await
        };
        resumed.unwrap_or_else(Halt::into_outcome)
    }

    async fn fetch(
        &self,
        remote_id: &RemoteId,
        previous: Option<&ServerAttributes>,
        pass: &Pass,
    ) -> Result<Presence<ObservedState<ServerAttributes>>, EngineError> {
        let scope = Scope::new(Self::KIND, Phase::Read).with_id(remote_id.as_str());
        fetch_record(&self.config, &pass.cancel, &scope, previous, || {
            self.client.get_server(remote_id.as_str(), None)
        })
        .await
    }

    async fn update_in_place(
        &self,
        desired: &ServerConfig,
        observed: &ObservedState<ServerAttributes>,
        changes: &ChangeSet,
        pass: &Pass,
    ) -> Outcome<ServerAttributes> {
        let id = observed.remote_id.as_str();
        let scope = Scope::new(Self::KIND, Phase::Update).with_id(id);
        let req = UpdateServer::from_changes(desired, changes);
        let cancel = pass.cancel_within(pass.timeouts.update);

        if let Err(e) = call(&self.config, &cancel, &scope, || {
            self.client.update_server(id, req.clone())
        })
        .await
        {
            return Outcome::failed(e);
        }
        read_back(self, observed, pass).await
    }

    async fn reinstall(
        &self,
        desired: &ServerConfig,
        observed: &ObservedState<ServerAttributes>,
        changes: &ChangeSet,
        pass: &Pass,
    ) -> Outcome<ServerAttributes> {
        self.run_reinstall(desired, observed, changes, pass)
            .await
            .unwrap_or_else(Halt::into_outcome)
    }

    async fn delete(
        &self,
        observed: &ObservedState<ServerAttributes>,
        pass: &Pass,
    ) -> Outcome<ServerAttributes> {
        let id = observed.remote_id.as_str();
        let scope = Scope::new(Self::KIND, Phase::Delete).with_id(id);
        let cancel = pass.cancel_within(pass.timeouts.delete);

        match delete_idempotent(&self.config, &cancel, &scope, || {
            self.client.delete_server(id)
        })
        .await
        {
            Ok(()) => Outcome::remove(),
            Err(e) => Outcome::failed(e),
        }
    }
}

/// Polls the server's `status` through the provisioning machine.
struct ProvisionProbe<'a, C> {
    client: &'a C,
    id: &'a str,
    machine: ProvisionMachine,
    started: Instant,
}

impl<'a, C> ProvisionProbe<'a, C> {
    fn new(client: &'a C, id: &'a str) -> Self {
        Self {
            client,
            id,
            machine: ProvisionMachine::new(),
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl<'a, C: ServerApi> Probe for ProvisionProbe<'a, C> {
    type Output = ();
    type Error = String;

    async fn check(&mut self) -> Result<Tick<()>, String> {
        match self.client.get_server(self.id, Some(STATUS_ONLY)).await {
            Ok(record) => match self.machine.observe(&record.status, self.started.elapsed()) {
                Step::Done => Ok(Tick::Ready(())),
                Step::Continue => Ok(Tick::Pending),
                Step::Fail(reason) => Err(reason),
            },
            Err(ClientError::NotFound(_)) => {
                Err("server disappeared while provisioning".to_string())
            }
            Err(e @ ClientError::Transient(_)) => {
                // the poll budget still bounds a flaky API
                warn!(server_id = self.id, error = %e, "Status read failed, will retry");
                Ok(Tick::Pending)
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
