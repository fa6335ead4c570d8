//! Reconcilers for the different resource kinds.
//!
//! Each reconciler compares desired configuration with the observed state
//! and drives the remote API until both agree. The kind-specific parts
//! (how to create, read, update in place and delete) are implemented per
//! kind; classification, drift handling and the replace/reinstall decisions
//! are shared through the trait's provided methods.

pub mod ip;
pub mod project;
pub mod reinstall;
pub mod server;
pub mod ssh_key;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::advisory::Advisory;
use crate::audit;
use crate::cancel::Cancellation;
use crate::client::ClientResult;
use crate::config::{EngineConfig, Timeouts};
use crate::diff::{ChangeSet, Classify, Verdict};
use crate::drift::{DetectDrift, Presence, presence};
use crate::error::{EngineError, Phase, Scope};
use crate::model::{Observe, ObservedState, RemoteId, ResourceKind};
use crate::provision::ProvisioningStatus;
use crate::retry::with_retry;

pub use ip::IpReconciler;
pub use project::ProjectReconciler;
pub use server::ServerReconciler;
pub use ssh_key::SshKeyReconciler;

/// Per-pass inputs that are not part of the desired configuration.
#[derive(Debug, Clone, Default)]
pub struct Pass {
    pub cancel: Cancellation,
    pub timeouts: Timeouts,
}

impl Pass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The pass's cancellation, additionally bounded by `limit` from now.
    pub fn cancel_within(&self, limit: Option<Duration>) -> Cancellation {
        match limit {
            Some(limit) => self.cancel.clone().with_deadline(Instant::now() + limit),
            None => self.cancel.clone(),
        }
    }
}

/// What the framework should do with its persisted state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate<S> {
    Keep,
    Record(ObservedState<S>),
    Remove,
}

/// Result of a convergence pass: a state update, at most one error, and any
/// number of advisories.
#[derive(Debug)]
pub struct Outcome<S> {
    pub state: StateUpdate<S>,
    pub error: Option<EngineError>,
    pub advisories: Vec<Advisory>,
}

impl<S> Outcome<S> {
    pub fn keep() -> Self {
        Self {
            state: StateUpdate::Keep,
            error: None,
            advisories: Vec::new(),
        }
    }

    pub fn record(state: ObservedState<S>) -> Self {
        Self {
            state: StateUpdate::Record(state),
            error: None,
            advisories: Vec::new(),
        }
    }

    pub fn remove() -> Self {
        Self {
            state: StateUpdate::Remove,
            error: None,
            advisories: Vec::new(),
        }
    }

    /// Failure that leaves the persisted state untouched.
    pub fn failed(error: EngineError) -> Self {
        Self {
            state: StateUpdate::Keep,
            error: Some(error),
            advisories: Vec::new(),
        }
    }

    /// Failure after the remote object was (possibly) changed.
    pub fn partial(error: EngineError, partial: Option<ObservedState<S>>) -> Self {
        Self {
            state: partial.map_or(StateUpdate::Keep, StateUpdate::Record),
            error: Some(error),
            advisories: Vec::new(),
        }
    }

    /// Put `advisories` in front of the ones already collected.
    pub fn with_advisories(mut self, mut advisories: Vec<Advisory>) -> Self {
        advisories.append(&mut self.advisories);
        self.advisories = advisories;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn recorded(&self) -> Option<&ObservedState<S>> {
        match &self.state {
            StateUpdate::Record(state) => Some(state),
            StateUpdate::Keep | StateUpdate::Remove => None,
        }
    }
}

/// Early exit from a multi-step flow, carrying whatever state was learned.
pub(crate) struct Halt<S> {
    pub error: EngineError,
    pub partial: Option<ObservedState<S>>,
}

impl<S> Halt<S> {
    pub fn with_partial(mut self, partial: Option<ObservedState<S>>) -> Self {
        if self.partial.is_none() {
            self.partial = partial;
        }
        self
    }

    pub fn into_outcome(self) -> Outcome<S> {
        Outcome::partial(self.error, self.partial)
    }
}

impl<S> From<EngineError> for Halt<S> {
    fn from(error: EngineError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

/// Preview of what applying a configuration would do.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Create,
    Change {
        changes: ChangeSet,
        advisories: Vec<Advisory>,
    },
}

impl Plan {
    /// `None` when the object does not exist yet.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Plan::Create => None,
            Plan::Change { changes, .. } => Some(changes.verdict()),
        }
    }

    pub fn advisories(&self) -> &[Advisory] {
        match self {
            Plan::Create => &[],
            Plan::Change { advisories, .. } => advisories,
        }
    }
}

/// Convergence of one resource kind.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Desired configuration supplied by the front end.
    type Config: Classify<Observed = Self::Attributes> + Send + Sync;
    /// Observed attributes persisted between passes.
    type Attributes: DetectDrift + Clone + Send + Sync;

    const KIND: ResourceKind;

    /// Consent to wipe the object when a reinstallable attribute changes.
    fn allows_reinstall(_desired: &Self::Config) -> bool {
        false
    }

    /// Create the remote object and wait until it is usable.
    async fn create(&self, desired: &Self::Config, pass: &Pass) -> Outcome<Self::Attributes>;

    /// Read the remote object and normalize it. `previous` supplies fields
    /// the API never returns.
    async fn fetch(
        &self,
        remote_id: &RemoteId,
        previous: Option<&Self::Attributes>,
        pass: &Pass,
    ) -> Result<Presence<ObservedState<Self::Attributes>>, EngineError>;

    /// Apply the in-place part of `changes` with a single update call.
    async fn update_in_place(
        &self,
        desired: &Self::Config,
        observed: &ObservedState<Self::Attributes>,
        changes: &ChangeSet,
        pass: &Pass,
    ) -> Outcome<Self::Attributes>;

    /// Delete the remote object. Already gone counts as success.
    async fn delete(
        &self,
        observed: &ObservedState<Self::Attributes>,
        pass: &Pass,
    ) -> Outcome<Self::Attributes>;

    /// Reinstall the object. Only servers can be reinstalled.
    async fn reinstall(
        &self,
        _desired: &Self::Config,
        observed: &ObservedState<Self::Attributes>,
        changes: &ChangeSet,
        _pass: &Pass,
    ) -> Outcome<Self::Attributes> {
        Outcome::failed(
            Scope::new(Self::KIND, Phase::Reinstall)
                .with_id(observed.remote_id.as_str())
                .permanent(format!(
                    "{} cannot be reinstalled (changed: {})",
                    Self::KIND,
                    changes.reinstall_attributes().join(", ")
                )),
        )
    }

    /// Pure preview. Fails only on an overridden computed attribute or an
    /// invalid configuration.
    fn plan(
        &self,
        desired: &Self::Config,
        observed: Option<&ObservedState<Self::Attributes>>,
    ) -> Result<Plan, EngineError> {
        let Some(observed) = observed else {
            return Ok(Plan::Create);
        };

        let changes = desired.classify(&observed.attributes)?;
        let advisories = match changes.verdict() {
            Verdict::Replace => vec![Advisory::replacing(&changes.replace_attributes())],
            Verdict::Reinstall => vec![Advisory::reinstall_required(
                &changes.reinstall_attributes(),
                Self::allows_reinstall(desired),
            )],
            Verdict::Noop | Verdict::InPlace => Vec::new(),
        };
        Ok(Plan::Change {
            changes,
            advisories,
        })
    }

    /// Refresh the observed state. A vanished object removes the state
    /// instead of failing; divergence on settable attributes is reported as
    /// drift.
    async fn read(
        &self,
        observed: &ObservedState<Self::Attributes>,
        pass: &Pass,
    ) -> Outcome<Self::Attributes> {
        match self
            .fetch(&observed.remote_id, Some(&observed.attributes), pass)
            .await
        {
            Ok(Presence::Present(fresh)) => {
                let advisories = observed.attributes.drift(&fresh.attributes);
                for advisory in &advisories {
                    warn!(kind = %Self::KIND, remote_id = %observed.remote_id, "{}", advisory);
                }
                Outcome::record(fresh).with_advisories(advisories)
            }
            Ok(Presence::Absent { reason, .. }) => {
                info!(
                    kind = %Self::KIND,
                    remote_id = %observed.remote_id,
                    reason = %reason,
                    "Remote object is gone, dropping state"
                );
                Outcome::remove()
            }
            Err(e) => Outcome::failed(e),
        }
    }

    /// Adopt an existing remote object.
    async fn import(&self, remote_id: &RemoteId, pass: &Pass) -> Outcome<Self::Attributes> {
        match self.fetch(remote_id, None, pass).await {
            Ok(Presence::Present(state)) => {
                info!(kind = %Self::KIND, %remote_id, "Imported remote object");
                Outcome::record(state)
            }
            Ok(Presence::Absent { reason, .. }) => Outcome::failed(
                Scope::new(Self::KIND, Phase::Read)
                    .with_id(remote_id.as_str())
                    .permanent(format!("cannot import: {}", reason)),
            ),
            Err(e) => Outcome::failed(e),
        }
    }

    /// Finish the flow an earlier pass left unsettled. Synchronous kinds only
    /// need the final read.
    async fn resume(
        &self,
        observed: &ObservedState<Self::Attributes>,
        pass: &Pass,
    ) -> Outcome<Self::Attributes> {
        settle(self, observed.clone(), pass).await
    }

    /// Converge an existing object towards `desired`. State left behind by
    /// an interrupted pass is settled first.
    async fn update(
        &self,
        desired: &Self::Config,
        observed: &ObservedState<Self::Attributes>,
        pass: &Pass,
    ) -> Outcome<Self::Attributes> {
        if observed.is_settled() {
            return self.converge(desired, observed, pass).await;
        }

        info!(
            kind = %Self::KIND,
            remote_id = %observed.remote_id,
            status = %observed.status,
            "Resuming unsettled object"
        );
        let resumed = self.resume(observed, pass).await;
        let settled = match (&resumed.error, &resumed.state) {
            (None, StateUpdate::Record(state)) => state.clone(),
            _ => return resumed,
        };

        let mut outcome = self.converge(desired, &settled, pass).await;
        if matches!(outcome.state, StateUpdate::Keep) {
            outcome.state = StateUpdate::Record(settled);
        }
        outcome.with_advisories(resumed.advisories)
    }

    /// Classify `desired` against settled state and run the matching flow.
    async fn converge(
        &self,
        desired: &Self::Config,
        observed: &ObservedState<Self::Attributes>,
        pass: &Pass,
    ) -> Outcome<Self::Attributes> {
        let remote_id = observed.remote_id.as_str();
        let changes = match desired.classify(&observed.attributes) {
            Ok(changes) => changes,
            Err(e) => return Outcome::failed(e),
        };

        match changes.verdict() {
            Verdict::Noop => {
                debug!(kind = %Self::KIND, remote_id, "Already converged");
                Outcome::keep()
            }
            Verdict::InPlace => {
                info!(
                    kind = %Self::KIND,
                    remote_id,
                    attributes = %changes.in_place_attributes().join(","),
                    "Updating in place"
                );
                self.update_in_place(desired, observed, &changes, pass).await
            }
            Verdict::Reinstall => {
                let attributes = changes.reinstall_attributes();
                if !Self::allows_reinstall(desired) {
                    return Outcome::failed(EngineError::ReinstallNotAllowed {
                        kind: Self::KIND,
                        remote_id: remote_id.to_string(),
                        attributes: attributes.clone(),
                    })
                    .with_advisories(vec![Advisory::reinstall_required(&attributes, false)]);
                }
                self.reinstall(desired, observed, &changes, pass).await
            }
            Verdict::Replace => {
                let attributes = changes.replace_attributes();
                audit::replacing(Self::KIND, remote_id, &attributes);
                let advisories = vec![Advisory::replacing(&attributes)];

                let deleted = self.delete(observed, pass).await;
                if !deleted.is_success() {
                    return deleted.with_advisories(advisories);
                }

                let mut created = self.create(desired, pass).await;
                // the old object is gone either way
                if matches!(created.state, StateUpdate::Keep) {
                    created.state = StateUpdate::Remove;
                }
                created.with_advisories(advisories)
            }
        }
    }

    /// Create when nothing is observed yet, otherwise update.
    async fn apply(
        &self,
        desired: &Self::Config,
        observed: Option<&ObservedState<Self::Attributes>>,
        pass: &Pass,
    ) -> Outcome<Self::Attributes> {
        match observed {
            None => self.create(desired, pass).await,
            Some(observed) => self.update(desired, observed, pass).await,
        }
    }
}

// =============================================================================
// Shared flow helpers
// =============================================================================

/// One remote call under the call-level retry.
pub(crate) async fn call<T, F, Fut>(
    config: &EngineConfig,
    cancel: &Cancellation,
    scope: &Scope,
    operation: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    with_retry(&config.call_retry, cancel, scope.phase.as_str(), operation)
        .await
        .map_err(|e| scope.call(e))
}

/// Read a record under retry and normalize it into observed state.
pub(crate) async fn fetch_record<R, F, Fut>(
    config: &EngineConfig,
    cancel: &Cancellation,
    scope: &Scope,
    previous: Option<&R::Attributes>,
    read: F,
) -> Result<Presence<ObservedState<R::Attributes>>, EngineError>
where
    R: Observe,
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<R>>,
{
    let result = with_retry(&config.call_retry, cancel, scope.phase.as_str(), read).await;
    let presence = presence(result).map_err(|e| scope.call(e))?;
    Ok(presence.map(|record| record.to_state(previous)))
}

/// Delete call under retry; a 404 counts as success.
pub(crate) async fn delete_idempotent<F, Fut>(
    config: &EngineConfig,
    cancel: &Cancellation,
    scope: &Scope,
    delete: F,
) -> Result<(), EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<()>>,
{
    let remote_id = scope.remote_id.as_deref().unwrap_or_default();
    match with_retry(&config.call_retry, cancel, scope.phase.as_str(), delete).await {
        Ok(()) => {
            audit::deleted(scope.kind, remote_id);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            info!(kind = %scope.kind, remote_id, "Already deleted");
            Ok(())
        }
        Err(e) => Err(scope.call(e)),
    }
}

/// Create flow for kinds whose remote create is synchronous: one create
/// call, then a final full read.
pub(crate) async fn create_and_settle<Rc, Rec, F, Fut>(
    reconciler: &Rc,
    config: &EngineConfig,
    pass: &Pass,
    create: F,
) -> Outcome<Rc::Attributes>
where
    Rc: Reconciler,
    Rec: Observe<Attributes = Rc::Attributes>,
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<Rec>>,
{
    let scope = Scope::new(Rc::KIND, Phase::Create);
    let cancel = pass.cancel_within(pass.timeouts.create);
    let created = match call(config, &cancel, &scope, create).await {
        Ok(record) => record.to_state(None),
        Err(e) => return Outcome::failed(e),
    };
    audit::created(Rc::KIND, created.remote_id.as_str());
    settle(reconciler, created, pass).await
}

/// Final read after a create. A record that reads back as vanished is
/// reported as not provisioned and kept as partial state.
pub(crate) async fn settle<Rc: Reconciler + ?Sized>(
    reconciler: &Rc,
    created: ObservedState<Rc::Attributes>,
    pass: &Pass,
) -> Outcome<Rc::Attributes> {
    match reconciler
        .fetch(&created.remote_id, Some(&created.attributes), pass)
        .await
    {
        Ok(Presence::Present(state)) => {
            info!(kind = %Rc::KIND, remote_id = %state.remote_id, "Created and active");
            Outcome::record(state)
        }
        Ok(Presence::Absent { reason, last_seen }) => {
            warn!(kind = %Rc::KIND, remote_id = %created.remote_id, %reason, "Created but not usable");
            let error = EngineError::NotProvisioned {
                kind: Rc::KIND,
                remote_id: created.remote_id.to_string(),
                reason,
            };
            Outcome::partial(error, Some(unsettled(last_seen.unwrap_or(created))))
        }
        Err(e) => Outcome::partial(e, Some(unsettled(created))),
    }
}

/// Read back after an update call.
pub(crate) async fn read_back<Rc: Reconciler>(
    reconciler: &Rc,
    observed: &ObservedState<Rc::Attributes>,
    pass: &Pass,
) -> Outcome<Rc::Attributes> {
    match reconciler
        .fetch(&observed.remote_id, Some(&observed.attributes), pass)
        .await
    {
        Ok(Presence::Present(state)) => Outcome::record(state),
        Ok(Presence::Absent { reason, .. }) => {
            warn!(kind = %Rc::KIND, remote_id = %observed.remote_id, %reason, "Object vanished after update");
            Outcome::remove()
        }
        Err(e) => Outcome::failed(e),
    }
}

/// Mark state recorded from an interrupted flow as not settled.
pub(crate) fn unsettled<S>(mut state: ObservedState<S>) -> ObservedState<S> {
    if state.status.is_terminal() {
        state.status = ProvisioningStatus::InProgress;
    }
    state
}
