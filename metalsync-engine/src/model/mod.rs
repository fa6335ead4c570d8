//! Typed resource model.
//!
//! One submodule per resource kind, each holding the desired configuration
//! supplied by the front end, the observed attributes persisted between
//! passes, the record the remote API returns and the request bodies the
//! engine sends.

pub mod ip;
pub mod project;
pub mod server;
pub mod ssh_key;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provision::ProvisioningStatus;

pub use ip::{AssignIp, CreateIp, IpAttributes, IpConfig, IpRecord, UpdateIp};
pub use project::{CreateProject, ProjectAttributes, ProjectConfig, ProjectRecord, UpdateProject};
pub use server::{
    CreateServer, ReinstallServer, ServerAttributes, ServerConfig, ServerRecord, UpdateServer,
};
pub use ssh_key::{CreateSshKey, SshKeyAttributes, SshKeyConfig, SshKeyRecord, UpdateSshKey};

/// The kinds of remote objects the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Project,
    IpAddress,
    SshKey,
    Server,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::IpAddress => "ip_address",
            ResourceKind::SshKey => "ssh_key",
            ResourceKind::Server => "server",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier assigned by the remote API. Never chosen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for RemoteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Last known state of a remote object, persisted by the framework between
/// passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState<S> {
    pub remote_id: RemoteId,
    pub attributes: S,
    pub status: ProvisioningStatus,
    pub observed_at: DateTime<Utc>,
}

impl<S> ObservedState<S> {
    pub fn new(remote_id: RemoteId, attributes: S, status: ProvisioningStatus) -> Self {
        Self {
            remote_id,
            attributes,
            status,
            observed_at: Utc::now(),
        }
    }

    /// `false` for state recorded after an interrupted create or reinstall.
    pub fn is_settled(&self) -> bool {
        self.status == ProvisioningStatus::Active
    }
}

/// Binds a remote record to the observed shape of its kind.
pub trait Observe {
    type Attributes;

    fn remote_id(&self) -> RemoteId;

    fn status(&self) -> ProvisioningStatus {
        ProvisioningStatus::Active
    }

    /// `Some(reason)` when the record exists but the object counts as gone.
    fn vanished(&self) -> Option<String> {
        None
    }

    /// Normalize into observed attributes. `previous` supplies the write-only
    /// fields the API never returns.
    fn observe(&self, previous: Option<&Self::Attributes>) -> Self::Attributes;

    fn to_state(&self, previous: Option<&Self::Attributes>) -> ObservedState<Self::Attributes> {
        ObservedState::new(self.remote_id(), self.observe(previous), self.status())
    }
}

/// Asserts that `schema` names exactly the serialized fields of
/// `attributes`, apart from `bookkeeping` fields nobody configures.
#[cfg(test)]
pub(crate) fn assert_schema_matches<T: Serialize>(
    schema: &[crate::diff::Attribute],
    attributes: &T,
    bookkeeping: &[&str],
) {
    let value = serde_json::to_value(attributes).unwrap();
    let mut fields: Vec<&str> = value
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .filter(|key| !bookkeeping.contains(key))
        .collect();
    let mut names: Vec<&str> = schema.iter().map(|a| a.name).collect();
    fields.sort_unstable();
    names.sort_unstable();
    assert_eq!(names, fields);
}
