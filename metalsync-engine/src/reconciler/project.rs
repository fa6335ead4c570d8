//! Project reconciler.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    Outcome, Pass, Reconciler, call, create_and_settle, delete_idempotent, fetch_record,
    read_back,
};
use crate::client::ProjectApi;
use crate::config::EngineConfig;
use crate::diff::ChangeSet;
use crate::drift::Presence;
use crate::error::{EngineError, Phase, Scope};
use crate::model::{
    CreateProject, ObservedState, ProjectAttributes, ProjectConfig, RemoteId, ResourceKind,
    UpdateProject,
};

pub struct ProjectReconciler<C> {
    client: Arc<C>,
    config: Arc<EngineConfig>,
}

impl<C> ProjectReconciler<C> {
    pub fn new(client: Arc<C>, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl<C: ProjectApi> Reconciler for ProjectReconciler<C> {
    type Config = ProjectConfig;
    type Attributes = ProjectAttributes;

    const KIND: ResourceKind = ResourceKind::Project;

    async fn create(&self, desired: &ProjectConfig, pass: &Pass) -> Outcome<ProjectAttributes> {
        let req = CreateProject::from(desired);
        create_and_settle(self, &self.config, pass, || {
            self.client.create_project(req.clone())
        })
        .await
    }

    async fn fetch(
        &self,
        remote_id: &RemoteId,
        previous: Option<&ProjectAttributes>,
        pass: &Pass,
    ) -> Result<Presence<ObservedState<ProjectAttributes>>, EngineError> {
        let scope = Scope::new(Self::KIND, Phase::Read).with_id(remote_id.as_str());
        fetch_record(&self.config, &pass.cancel, &scope, previous, || {
            self.client.get_project(remote_id.as_str())
        })
        .await
    }

    async fn update_in_place(
        &self,
        desired: &ProjectConfig,
        observed: &ObservedState<ProjectAttributes>,
        changes: &ChangeSet,
        pass: &Pass,
    ) -> Outcome<ProjectAttributes> {
        let id = observed.remote_id.as_str();
        let scope = Scope::new(Self::KIND, Phase::Update).with_id(id);
        let req = UpdateProject::from_changes(desired, changes);
        let cancel = pass.cancel_within(pass.timeouts.update);

        if let Err(e) = call(&self.config, &cancel, &scope, || {
            self.client.update_project(id, req.clone())
        })
        .await
        {
            return Outcome::failed(e);
        }
        read_back(self, observed, pass).await
    }

    async fn delete(
        &self,
        observed: &ObservedState<ProjectAttributes>,
        pass: &Pass,
    ) -> Outcome<ProjectAttributes> {
        let id = observed.remote_id.as_str();
        let scope = Scope::new(Self::KIND, Phase::Delete).with_id(id);
        let cancel = pass.cancel_within(pass.timeouts.delete);

        match delete_idempotent(&self.config, &cancel, &scope, || {
            self.client.delete_project(id)
        })
        .await
        {
            Ok(()) => Outcome::remove(),
            Err(e) => Outcome::failed(e),
        }
    }
}
