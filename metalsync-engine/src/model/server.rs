//! Bare-metal servers.
//!
//! A server has two lifecycles on the remote side: `status` tracks
//! provisioning of the machine, `deployment` tracks (re)installation of the
//! operating system. Several settable fields are write-only: the API accepts
//! them but never returns them, so they are carried over from the previous
//! observation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Observe, RemoteId, ResourceKind};
use crate::advisory::Advisory;
use crate::diff::{Attribute, ChangeSet, Classify, DiffBuilder};
use crate::drift::{DetectDrift, DriftReport};
use crate::error::EngineError;
use crate::provision::ProvisioningStatus;

pub const PROJECT_ID: Attribute = Attribute::immutable("project_id");
pub const REGION: Attribute = Attribute::immutable("region");
pub const PLAN: Attribute = Attribute::immutable("plan");
pub const SPOT_INSTANCE: Attribute = Attribute::immutable("spot_instance");
pub const EXTRA_IP_ADDRESS_IDS: Attribute = Attribute::immutable("extra_ip_address_ids");
pub const IMAGE: Attribute = Attribute::reinstallable("image");
pub const SSH_KEY_IDS: Attribute = Attribute::reinstallable("ssh_key_ids");
pub const USER_DATA: Attribute = Attribute::reinstallable("user_data");
pub const OS_PARTITION_SIZE: Attribute = Attribute::reinstallable("os_partition_size");
pub const HOSTNAME: Attribute = Attribute::mutable("hostname");
pub const BGP_ENABLED: Attribute = Attribute::mutable("bgp_enabled");
pub const TAGS: Attribute = Attribute::mutable("tags");
pub const IP_ADDRESSES: Attribute = Attribute::computed("ip_addresses");
pub const PASSWORD: Attribute = Attribute::computed("password");

pub const SCHEMA: &[Attribute] = &[
    PROJECT_ID,
    REGION,
    PLAN,
    SPOT_INSTANCE,
    EXTRA_IP_ADDRESS_IDS,
    IMAGE,
    SSH_KEY_IDS,
    USER_DATA,
    OS_PARTITION_SIZE,
    HOSTNAME,
    BGP_ENABLED,
    TAGS,
    IP_ADDRESSES,
    PASSWORD,
];

/// Desired server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub project_id: String,
    pub region: String,
    pub plan: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub ssh_key_ids: BTreeSet<String>,
    /// IP addresses attached at creation, in addition to the primary ones.
    #[serde(default)]
    pub extra_ip_address_ids: BTreeSet<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    /// OS partition size in GB.
    #[serde(default)]
    pub os_partition_size: Option<u32>,
    #[serde(default)]
    pub spot_instance: bool,
    #[serde(default)]
    pub bgp_enabled: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Consent to wipe the server when a reinstallable attribute changes.
    /// Not a remote attribute.
    #[serde(default)]
    pub allow_reinstall: bool,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAttributes {
    pub project_id: String,
    pub region: String,
    pub plan: String,
    pub spot_instance: bool,
    pub extra_ip_address_ids: BTreeSet<String>,
    pub image: Option<String>,
    pub ssh_key_ids: BTreeSet<String>,
    pub user_data: Option<String>,
    pub os_partition_size: Option<u32>,
    pub hostname: Option<String>,
    pub bgp_enabled: bool,
    pub tags: BTreeMap<String, String>,
    pub ip_addresses: Vec<String>,
    /// Root password from the last reinstall.
    pub password: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ServerAttributes {
    /// Fill the write-only fields from the configuration they were sent with.
    pub fn seed_write_only(&mut self, config: &ServerConfig) {
        self.extra_ip_address_ids = config.extra_ip_address_ids.clone();
        self.user_data = config.user_data.clone();
        self.os_partition_size = config.os_partition_size;
    }
}

impl fmt::Debug for ServerAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerAttributes")
            .field("project_id", &self.project_id)
            .field("region", &self.region)
            .field("plan", &self.plan)
            .field("spot_instance", &self.spot_instance)
            .field("extra_ip_address_ids", &self.extra_ip_address_ids)
            .field("image", &self.image)
            .field("ssh_key_ids", &self.ssh_key_ids)
            .field("user_data", &self.user_data.as_ref().map(|_| "<set>"))
            .field("os_partition_size", &self.os_partition_size)
            .field("hostname", &self.hostname)
            .field("bgp_enabled", &self.bgp_enabled)
            .field("tags", &self.tags)
            .field("ip_addresses", &self.ip_addresses)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// IP address as embedded in a server record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerIp {
    pub id: String,
    pub address: String,
}

/// Server as returned by the remote API.
///
/// A read with a field filter only guarantees `id`, `status` and
/// `deployment`; everything else falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub spot_instance: bool,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub ssh_key_ids: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<ServerIp>,
    #[serde(default)]
    pub bgp_enabled: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServer {
    pub project_id: String,
    pub region: String,
    pub plan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub ssh_key_ids: Vec<String>,
    pub ip_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_partition_size: Option<u32>,
    pub spot_instance: bool,
    pub bgp_enabled: bool,
    pub tags: BTreeMap<String, String>,
}

impl From<&ServerConfig> for CreateServer {
    fn from(config: &ServerConfig) -> Self {
        Self {
            project_id: config.project_id.clone(),
            region: config.region.clone(),
            plan: config.plan.clone(),
            hostname: config.hostname.clone(),
            image: config.image.clone(),
            ssh_key_ids: config.ssh_key_ids.iter().cloned().collect(),
            ip_addresses: config.extra_ip_address_ids.iter().cloned().collect(),
            user_data: config.user_data.clone(),
            os_partition_size: config.os_partition_size,
            spot_instance: config.spot_instance,
            bgp_enabled: config.bgp_enabled,
            tags: config.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateServer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bgp_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl UpdateServer {
    pub fn from_changes(config: &ServerConfig, changes: &ChangeSet) -> Self {
        Self {
            hostname: changes
                .updates(HOSTNAME)
                .then(|| config.hostname.clone())
                .flatten(),
            bgp_enabled: changes.updates(BGP_ENABLED).then_some(config.bgp_enabled),
            tags: changes.updates(TAGS).then(|| config.tags.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hostname.is_none() && self.bgp_enabled.is_none() && self.tags.is_none()
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinstallServer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub password: String,
    pub ssh_key_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_partition_size: Option<u32>,
}

impl ReinstallServer {
    pub fn new(config: &ServerConfig, password: String) -> Self {
        Self {
            image: config.image.clone(),
            hostname: config.hostname.clone(),
            password,
            ssh_key_ids: config.ssh_key_ids.iter().cloned().collect(),
            user_data: config.user_data.clone(),
            os_partition_size: config.os_partition_size,
        }
    }
}

impl fmt::Debug for ReinstallServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReinstallServer")
            .field("image", &self.image)
            .field("hostname", &self.hostname)
            .field("password", &"<redacted>")
            .field("ssh_key_ids", &self.ssh_key_ids)
            .field("os_partition_size", &self.os_partition_size)
            .finish_non_exhaustive()
    }
}

impl Classify for ServerConfig {
    type Observed = ServerAttributes;

    fn classify(&self, observed: &ServerAttributes) -> Result<ChangeSet, EngineError> {
        DiffBuilder::new(ResourceKind::Server)
            .field(PROJECT_ID, &self.project_id, &observed.project_id)
            .field(REGION, &self.region, &observed.region)
            .field(PLAN, &self.plan, &observed.plan)
            .field(SPOT_INSTANCE, &self.spot_instance, &observed.spot_instance)
            .field(
                EXTRA_IP_ADDRESS_IDS,
                &self.extra_ip_address_ids,
                &observed.extra_ip_address_ids,
            )
            .optional(IMAGE, self.image.as_deref(), observed.image.as_deref())
            .field(SSH_KEY_IDS, &self.ssh_key_ids, &observed.ssh_key_ids)
            .optional(USER_DATA, self.user_data.as_deref(), observed.user_data.as_deref())
            .optional(
                OS_PARTITION_SIZE,
                self.os_partition_size.as_ref(),
                observed.os_partition_size.as_ref(),
            )
            .optional(HOSTNAME, self.hostname.as_deref(), observed.hostname.as_deref())
            .field(BGP_ENABLED, &self.bgp_enabled, &observed.bgp_enabled)
            .field(TAGS, &self.tags, &observed.tags)
            .finish()
    }
}

impl Observe for ServerRecord {
    type Attributes = ServerAttributes;

    fn remote_id(&self) -> RemoteId {
        RemoteId::new(self.id.clone())
    }

    fn status(&self) -> ProvisioningStatus {
        ProvisioningStatus::from_remote(&self.status)
    }

    fn vanished(&self) -> Option<String> {
        if self.status() == ProvisioningStatus::Absent {
            Some(format!("server is {}", self.status))
        } else if self.status() == ProvisioningStatus::Active && self.ip_addresses.is_empty() {
            // addresses are assigned during provisioning
            Some("server has no IP addresses".to_string())
        } else {
            None
        }
    }

    fn observe(&self, previous: Option<&ServerAttributes>) -> ServerAttributes {
        ServerAttributes {
            project_id: self.project_id.clone(),
            region: self.region.clone(),
            plan: self.plan.clone(),
            spot_instance: self.spot_instance,
            image: self.image.clone(),
            ssh_key_ids: self.ssh_key_ids.iter().cloned().collect(),
            hostname: self.hostname.clone(),
            bgp_enabled: self.bgp_enabled,
            tags: self.tags.clone(),
            ip_addresses: self.ip_addresses.iter().map(|ip| ip.address.clone()).collect(),
            created_at: self.created_at,
            // write-only
            extra_ip_address_ids: previous
                .map(|p| p.extra_ip_address_ids.clone())
                .unwrap_or_default(),
            user_data: previous.and_then(|p| p.user_data.clone()),
            os_partition_size: previous.and_then(|p| p.os_partition_size),
            password: previous.and_then(|p| p.password.clone()),
        }
    }
}

impl DetectDrift for ServerAttributes {
    fn drift(&self, remote: &Self) -> Vec<Advisory> {
        DriftReport::new()
            .field(PROJECT_ID, &self.project_id, &remote.project_id)
            .field(REGION, &self.region, &remote.region)
            .field(PLAN, &self.plan, &remote.plan)
            .field(SPOT_INSTANCE, &self.spot_instance, &remote.spot_instance)
            .field(IMAGE, &self.image, &remote.image)
            .field(SSH_KEY_IDS, &self.ssh_key_ids, &remote.ssh_key_ids)
            .field(HOSTNAME, &self.hostname, &remote.hostname)
            .field(BGP_ENABLED, &self.bgp_enabled, &remote.bgp_enabled)
            .field(TAGS, &self.tags, &remote.tags)
            .finish()
    }
}
