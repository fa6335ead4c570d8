//! Projects.

use serde::{Deserialize, Serialize};

use super::{Observe, RemoteId, ResourceKind};
use crate::advisory::Advisory;
use crate::diff::{Attribute, ChangeSet, Classify, DiffBuilder};
use crate::drift::{DetectDrift, DriftReport};
use crate::error::EngineError;

pub const TEAM_ID: Attribute = Attribute::immutable("team_id");
pub const NAME: Attribute = Attribute::mutable("name");
pub const BGP_ENABLED: Attribute = Attribute::mutable("bgp_enabled");
pub const BGP_LOCAL_ASN: Attribute = Attribute::computed("bgp_local_asn");

pub const SCHEMA: &[Attribute] = &[TEAM_ID, NAME, BGP_ENABLED, BGP_LOCAL_ASN];

/// Desired project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub team_id: String,
    #[serde(default)]
    pub bgp_enabled: bool,
    /// Assigned by the remote side; only checked when set.
    #[serde(default)]
    pub bgp_local_asn: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAttributes {
    pub name: String,
    pub team_id: String,
    pub bgp_enabled: bool,
    pub bgp_local_asn: Option<u32>,
}

/// Project as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub team_id: String,
    pub bgp_enabled: bool,
    pub bgp_local_asn: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub team_id: String,
    pub bgp_enabled: bool,
}

impl From<&ProjectConfig> for CreateProject {
    fn from(config: &ProjectConfig) -> Self {
        Self {
            name: config.name.clone(),
            team_id: config.team_id.clone(),
            bgp_enabled: config.bgp_enabled,
        }
    }
}

/// Partial update; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateProject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bgp_enabled: Option<bool>,
}

impl UpdateProject {
    pub fn from_changes(config: &ProjectConfig, changes: &ChangeSet) -> Self {
        Self {
            name: changes.updates(NAME).then(|| config.name.clone()),
            bgp_enabled: changes.updates(BGP_ENABLED).then_some(config.bgp_enabled),
        }
    }
}

impl Classify for ProjectConfig {
    type Observed = ProjectAttributes;

    fn classify(&self, observed: &ProjectAttributes) -> Result<ChangeSet, EngineError> {
        DiffBuilder::new(ResourceKind::Project)
            .field(TEAM_ID, &self.team_id, &observed.team_id)
            .field(NAME, &self.name, &observed.name)
            .field(BGP_ENABLED, &self.bgp_enabled, &observed.bgp_enabled)
            .optional(
                BGP_LOCAL_ASN,
                self.bgp_local_asn.as_ref(),
                observed.bgp_local_asn.as_ref(),
            )
            .finish()
    }
}

impl Observe for ProjectRecord {
    type Attributes = ProjectAttributes;

    fn remote_id(&self) -> RemoteId {
        RemoteId::new(self.id.clone())
    }

    fn observe(&self, _previous: Option<&ProjectAttributes>) -> ProjectAttributes {
        ProjectAttributes {
            name: self.name.clone(),
            team_id: self.team_id.clone(),
            bgp_enabled: self.bgp_enabled,
            bgp_local_asn: self.bgp_local_asn,
        }
    }
}

impl DetectDrift for ProjectAttributes {
    fn drift(&self, remote: &Self) -> Vec<Advisory> {
        DriftReport::new()
            .field(TEAM_ID, &self.team_id, &remote.team_id)
            .field(NAME, &self.name, &remote.name)
            .field(BGP_ENABLED, &self.bgp_enabled, &remote.bgp_enabled)
            .finish()
    }
}
