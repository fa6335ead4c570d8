//! SSH key reconciler.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    Outcome, Pass, Reconciler, call, create_and_settle, delete_idempotent, fetch_record,
    read_back,
};
use crate::client::SshKeyApi;
use crate::config::EngineConfig;
use crate::diff::ChangeSet;
use crate::drift::Presence;
use crate::error::{EngineError, Phase, Scope};
use crate::model::{
    CreateSshKey, ObservedState, RemoteId, ResourceKind, SshKeyAttributes, SshKeyConfig,
    UpdateSshKey,
};

pub struct SshKeyReconciler<C> {
    client: Arc<C>,
    config: Arc<EngineConfig>,
}

impl<C> SshKeyReconciler<C> {
    pub fn new(client: Arc<C>, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl<C: SshKeyApi> Reconciler for SshKeyReconciler<C> {
    type Config = SshKeyConfig;
    type Attributes = SshKeyAttributes;

    const KIND: ResourceKind = ResourceKind::SshKey;

    async fn create(&self, desired: &SshKeyConfig, pass: &Pass) -> Outcome<SshKeyAttributes> {
        let req = CreateSshKey::from(desired);
        create_and_settle(self, &self.config, pass, || {
            self.client.create_ssh_key(req.clone())
        })
        .await
    }

    async fn fetch(
        &self,
        remote_id: &RemoteId,
        previous: Option<&SshKeyAttributes>,
        pass: &Pass,
    ) -> Result<Presence<ObservedState<SshKeyAttributes>>, EngineError> {
        let scope = Scope::new(Self::KIND, Phase::Read).with_id(remote_id.as_str());
        fetch_record(&self.config, &pass.cancel, &scope, previous, || {
            self.client.get_ssh_key(remote_id.as_str())
        })
        .await
    }

    async fn update_in_place(
        &self,
        desired: &SshKeyConfig,
        observed: &ObservedState<SshKeyAttributes>,
        _changes: &ChangeSet,
        pass: &Pass,
    ) -> Outcome<SshKeyAttributes> {
        // the label is the only mutable attribute
        let id = observed.remote_id.as_str();
        let scope = Scope::new(Self::KIND, Phase::Update).with_id(id);
        let req = UpdateSshKey {
            label: desired.label.clone(),
        };
        let cancel = pass.cancel_within(pass.timeouts.update);

        if let Err(e) = call(&self.config, &cancel, &scope, || {
            self.client.update_ssh_key(id, req.clone())
        })
        .await
        {
            return Outcome::failed(e);
        }
        read_back(self, observed, pass).await
    }

    async fn delete(
        &self,
        observed: &ObservedState<SshKeyAttributes>,
        pass: &Pass,
    ) -> Outcome<SshKeyAttributes> {
        let id = observed.remote_id.as_str();
        let scope = Scope::new(Self::KIND, Phase::Delete).with_id(id);
        let cancel = pass.cancel_within(pass.timeouts.delete);

        match delete_idempotent(&self.config, &cancel, &scope, || {
            self.client.delete_ssh_key(id)
        })
        .await
        {
            Ok(()) => Outcome::remove(),
            Err(e) => Outcome::failed(e),
        }
    }
}
