//! IP address reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{
    Outcome, Pass, Reconciler, call, create_and_settle, delete_idempotent, fetch_record,
    read_back,
};
use crate::client::IpApi;
use crate::config::EngineConfig;
use crate::diff::ChangeSet;
use crate::drift::Presence;
use crate::error::{EngineError, Phase, Scope};
use crate::model::{
    CreateIp, IpAttributes, IpConfig, ObservedState, RemoteId, ResourceKind, UpdateIp,
};
use crate::retry::with_retry;

pub struct IpReconciler<C> {
    client: Arc<C>,
    config: Arc<EngineConfig>,
}

impl<C> IpReconciler<C> {
    pub fn new(client: Arc<C>, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl<C: IpApi> Reconciler for IpReconciler<C> {
    type Config = IpConfig;
    type Attributes = IpAttributes;

    const KIND: ResourceKind = ResourceKind::IpAddress;

    async fn create(&self, desired: &IpConfig, pass: &Pass) -> Outcome<IpAttributes> {
        if let Err(e) = desired.validate() {
            return Outcome::failed(e);
        }
        let req = CreateIp::from(desired);
        create_and_settle(self, &self.config, pass, || self.client.create_ip(req.clone())).await
    }

    async fn fetch(
        &self,
        remote_id: &RemoteId,
        previous: Option<&IpAttributes>,
        pass: &Pass,
    ) -> Result<Presence<ObservedState<IpAttributes>>, EngineError> {
        let scope = Scope::new(Self::KIND, Phase::Read).with_id(remote_id.as_str());
        fetch_record(&self.config, &pass.cancel, &scope, previous, || {
            self.client.get_ip(remote_id.as_str())
        })
        .await
    }

    async fn update_in_place(
        &self,
        desired: &IpConfig,
        observed: &ObservedState<IpAttributes>,
        changes: &ChangeSet,
        pass: &Pass,
    ) -> Outcome<IpAttributes> {
        let id = observed.remote_id.as_str();
        let scope = Scope::new(Self::KIND, Phase::Update).with_id(id);
        let req = UpdateIp::from_changes(desired, changes);
        let cancel = pass.cancel_within(pass.timeouts.update);

        if let Err(e) = call(&self.config, &cancel, &scope, || {
            self.client.update_ip(id, req.clone())
        })
        .await
        {
            return Outcome::failed(e);
        }
        read_back(self, observed, pass).await
    }

    /// Unassigns the address first when it still points somewhere; the API
    /// refuses to release an assigned address.
    async fn delete(
        &self,
        observed: &ObservedState<IpAttributes>,
        pass: &Pass,
    ) -> Outcome<IpAttributes> {
        let id = observed.remote_id.as_str();
        let cancel = pass.cancel_within(pass.timeouts.delete);

        let read_scope = Scope::new(Self::KIND, Phase::Read).with_id(id);
        let current = match fetch_record(
            &self.config,
            &cancel,
            &read_scope,
            Some(&observed.attributes),
            || self.client.get_ip(id),
        )
        .await
        {
            Ok(current) => current,
            Err(e) => return Outcome::failed(e),
        };

        let assigned = match &current {
            Presence::Present(state)
            | Presence::Absent {
                last_seen: Some(state),
                ..
            } => state.attributes.is_assigned(),
            Presence::Absent {
                last_seen: None, ..
            } => {
                info!(kind = %Self::KIND, remote_id = id, "Already deleted");
                return Outcome::remove();
            }
        };

        if assigned {
            let scope = Scope::new(Self::KIND, Phase::Unassign).with_id(id);
            info!(kind = %Self::KIND, remote_id = id, "Unassigning before delete");
            match with_retry(&self.config.call_retry, &cancel, "unassign", || {
                self.client.unassign_ip(id)
            })
            .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Outcome::remove(),
                Err(e) => return Outcome::failed(scope.call(e)),
            }
        }

        let scope = Scope::new(Self::KIND, Phase::Delete).with_id(id);
        match delete_idempotent(&self.config, &cancel, &scope, || self.client.delete_ip(id)).await {
            Ok(()) => Outcome::remove(),
            Err(e) => Outcome::failed(e),
        }
    }
}
