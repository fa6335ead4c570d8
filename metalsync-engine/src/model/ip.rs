//! Elastic IP addresses.
//!
//! An address can be assigned to a server or routed via another IP, never
//! both. It has to be unassigned before it can be released.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Observe, RemoteId, ResourceKind};
use crate::advisory::Advisory;
use crate::diff::{Attribute, ChangeSet, Classify, DiffBuilder};
use crate::drift::{DetectDrift, DriftReport};
use crate::error::{EngineError, Phase, Scope};

pub const PROJECT_ID: Attribute = Attribute::immutable("project_id");
pub const REGION: Attribute = Attribute::immutable("region");
pub const DDOS_SCRUBBING: Attribute = Attribute::immutable("ddos_scrubbing");
pub const TARGET_SERVER_ID: Attribute = Attribute::mutable("target_server_id");
pub const ROUTE_IP_ID: Attribute = Attribute::mutable("route_ip_id");
pub const PTR_RECORD: Attribute = Attribute::mutable("ptr_record");
pub const A_RECORD: Attribute = Attribute::mutable("a_record");
pub const TAGS: Attribute = Attribute::mutable("tags");
pub const ADDRESS: Attribute = Attribute::computed("address");

pub const SCHEMA: &[Attribute] = &[
    PROJECT_ID,
    REGION,
    DDOS_SCRUBBING,
    TARGET_SERVER_ID,
    ROUTE_IP_ID,
    PTR_RECORD,
    A_RECORD,
    TAGS,
    ADDRESS,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpConfig {
    pub project_id: String,
    pub region: String,
    #[serde(default)]
    pub ddos_scrubbing: bool,
    /// `None` means unassigned.
    #[serde(default)]
    pub target_server_id: Option<String>,
    #[serde(default)]
    pub route_ip_id: Option<String>,
    /// Compared only when set; the API fills in a default.
    #[serde(default)]
    pub ptr_record: Option<String>,
    #[serde(default)]
    pub a_record: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl IpConfig {
    /// Reject configurations the remote API would refuse anyway.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.target_server_id.is_some() && self.route_ip_id.is_some() {
            return Err(Scope::new(ResourceKind::IpAddress, Phase::Plan).permanent(
                "target_server_id and route_ip_id are mutually exclusive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAttributes {
    pub address: String,
    pub project_id: String,
    pub region: String,
    pub ddos_scrubbing: bool,
    pub target_server_id: Option<String>,
    pub route_ip_id: Option<String>,
    pub ptr_record: Option<String>,
    pub a_record: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl IpAttributes {
    pub fn is_assigned(&self) -> bool {
        self.target_server_id.is_some() || self.route_ip_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpRecord {
    pub id: String,
    #[serde(default)]
    pub address: String,
    pub project_id: String,
    pub region: String,
    #[serde(default)]
    pub ddos_scrubbing: bool,
    /// Server the address is attached to.
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// IP the address is routed through.
    #[serde(default)]
    pub routed_to: Option<String>,
    #[serde(default)]
    pub ptr_record: Option<String>,
    #[serde(default)]
    pub a_record: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl IpRecord {
    pub fn is_assigned(&self) -> bool {
        self.assigned_to.is_some() || self.routed_to.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIp {
    pub project_id: String,
    pub region: String,
    pub ddos_scrubbing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_ip_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr_record: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a_record: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl From<&IpConfig> for CreateIp {
    fn from(config: &IpConfig) -> Self {
        Self {
            project_id: config.project_id.clone(),
            region: config.region.clone(),
            ddos_scrubbing: config.ddos_scrubbing,
            target_server_id: config.target_server_id.clone(),
            route_ip_id: config.route_ip_id.clone(),
            ptr_record: config.ptr_record.clone(),
            a_record: config.a_record.clone(),
            tags: config.tags.clone(),
        }
    }
}

/// Where an address should point after an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignIp {
    ToServer(String),
    ToRoute(String),
    Release,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateIp {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignIp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr_record: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a_record: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl UpdateIp {
    pub fn from_changes(config: &IpConfig, changes: &ChangeSet) -> Self {
        let assignment = (changes.updates(TARGET_SERVER_ID) || changes.updates(ROUTE_IP_ID)).then(
            || match (&config.target_server_id, &config.route_ip_id) {
                (Some(server), _) => AssignIp::ToServer(server.clone()),
                (None, Some(route)) => AssignIp::ToRoute(route.clone()),
                (None, None) => AssignIp::Release,
            },
        );

        Self {
            assignment,
            ptr_record: changes
                .updates(PTR_RECORD)
                .then(|| config.ptr_record.clone())
                .flatten(),
            a_record: changes
                .updates(A_RECORD)
                .then(|| config.a_record.clone())
                .flatten(),
            tags: changes.updates(TAGS).then(|| config.tags.clone()),
        }
    }
}

impl Classify for IpConfig {
    type Observed = IpAttributes;

    fn classify(&self, observed: &IpAttributes) -> Result<ChangeSet, EngineError> {
        self.validate()?;
        DiffBuilder::new(ResourceKind::IpAddress)
            .field(PROJECT_ID, &self.project_id, &observed.project_id)
            .field(REGION, &self.region, &observed.region)
            .field(DDOS_SCRUBBING, &self.ddos_scrubbing, &observed.ddos_scrubbing)
            .field(TARGET_SERVER_ID, &self.target_server_id, &observed.target_server_id)
            .field(ROUTE_IP_ID, &self.route_ip_id, &observed.route_ip_id)
            .optional(
                PTR_RECORD,
                self.ptr_record.as_deref(),
                observed.ptr_record.as_deref(),
            )
            .optional(A_RECORD, self.a_record.as_deref(), observed.a_record.as_deref())
            .field(TAGS, &self.tags, &observed.tags)
            .optional(ADDRESS, self.address.as_deref(), Some(observed.address.as_str()))
            .finish()
    }
}

impl Observe for IpRecord {
    type Attributes = IpAttributes;

    fn remote_id(&self) -> RemoteId {
        RemoteId::new(self.id.clone())
    }

    fn vanished(&self) -> Option<String> {
        self.address
            .trim()
            .is_empty()
            .then(|| "no address is allocated".to_string())
    }

    fn observe(&self, _previous: Option<&IpAttributes>) -> IpAttributes {
        IpAttributes {
            address: self.address.clone(),
            project_id: self.project_id.clone(),
            region: self.region.clone(),
            ddos_scrubbing: self.ddos_scrubbing,
            target_server_id: self.assigned_to.clone(),
            route_ip_id: self.routed_to.clone(),
            ptr_record: self.ptr_record.clone(),
            a_record: self.a_record.clone(),
            tags: self.tags.clone(),
        }
    }
}

impl DetectDrift for IpAttributes {
    fn drift(&self, remote: &Self) -> Vec<Advisory> {
        DriftReport::new()
            .field(PROJECT_ID, &self.project_id, &remote.project_id)
            .field(REGION, &self.region, &remote.region)
            .field(DDOS_SCRUBBING, &self.ddos_scrubbing, &remote.ddos_scrubbing)
            .field(TARGET_SERVER_ID, &self.target_server_id, &remote.target_server_id)
            .field(ROUTE_IP_ID, &self.route_ip_id, &remote.route_ip_id)
            .field(PTR_RECORD, &self.ptr_record, &remote.ptr_record)
            .field(A_RECORD, &self.a_record, &remote.a_record)
            .field(TAGS, &self.tags, &remote.tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Verdict;

    fn config() -> IpConfig {
        IpConfig {
            project_id: "p1".into(),
            region: "fra".into(),
            ddos_scrubbing: false,
            target_server_id: Some("srv-1".into()),
            route_ip_id: None,
            ptr_record: None,
            a_record: None,
            tags: BTreeMap::new(),
            address: None,
        }
    }

    fn observed() -> IpAttributes {
        IpAttributes {
            address: "203.0.113.5".into(),
            project_id: "p1".into(),
            region: "fra".into(),
            ddos_scrubbing: false,
            target_server_id: Some("srv-1".into()),
            route_ip_id: None,
            ptr_record: Some("203-0-113-5.example.net".into()),
            a_record: None,
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_schema_names_every_attribute() {
        crate::model::assert_schema_matches(SCHEMA, &observed(), &[]);
    }

    #[test]
    fn test_reassignment_is_in_place() {
        let mut desired = config();
        desired.target_server_id = Some("srv-2".into());
        let changes = desired.classify(&observed()).unwrap();
        assert_eq!(changes.verdict(), Verdict::InPlace);
        let update = UpdateIp::from_changes(&desired, &changes);
        assert_eq!(update.assignment, Some(AssignIp::ToServer("srv-2".into())));
        assert_eq!(update.tags, None);
    }

    #[test]
    fn test_clearing_target_releases() {
        let mut desired = config();
        desired.target_server_id = None;
        let changes = desired.classify(&observed()).unwrap();
        let update = UpdateIp::from_changes(&desired, &changes);
        assert_eq!(update.assignment, Some(AssignIp::Release));
    }

    #[test]
    fn test_region_change_replaces() {
        let mut desired = config();
        desired.region = "ams".into();
        assert_eq!(desired.classify(&observed()).unwrap().verdict(), Verdict::Replace);
    }

    #[test]
    fn test_target_and_route_exclusive() {
        let mut desired = config();
        desired.route_ip_id = Some("ip-9".into());
        let err = desired.classify(&observed()).unwrap_err();
        assert_eq!(err.phase(), Phase::Plan);
    }

    #[test]
    fn test_empty_address_counts_as_vanished() {
        let record = IpRecord {
            id: "ip-1".into(),
            address: String::new(),
            project_id: "p1".into(),
            region: "fra".into(),
            ddos_scrubbing: false,
            assigned_to: None,
            routed_to: None,
            ptr_record: None,
            a_record: None,
            tags: BTreeMap::new(),
        };
        assert!(record.vanished().is_some());
    }
}
