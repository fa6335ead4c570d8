//! SSH keys.

use serde::{Deserialize, Serialize};

use super::{Observe, RemoteId, ResourceKind};
use crate::advisory::Advisory;
use crate::diff::{Attribute, ChangeSet, Classify, DiffBuilder};
use crate::drift::{DetectDrift, DriftReport};
use crate::error::EngineError;

pub const PUBLIC_KEY: Attribute = Attribute::immutable("public_key");
pub const LABEL: Attribute = Attribute::mutable("label");
pub const FINGERPRINT: Attribute = Attribute::computed("fingerprint");

pub const SCHEMA: &[Attribute] = &[PUBLIC_KEY, LABEL, FINGERPRINT];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKeyConfig {
    pub label: String,
    pub public_key: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKeyAttributes {
    pub label: String,
    pub public_key: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKeyRecord {
    pub id: String,
    pub label: String,
    /// The API calls this `key`.
    #[serde(rename = "key")]
    pub public_key: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSshKey {
    pub label: String,
    #[serde(rename = "key")]
    pub public_key: String,
}

impl From<&SshKeyConfig> for CreateSshKey {
    fn from(config: &SshKeyConfig) -> Self {
        Self {
            label: config.label.clone(),
            public_key: config.public_key.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSshKey {
    pub label: String,
}

impl Classify for SshKeyConfig {
    type Observed = SshKeyAttributes;

    fn classify(&self, observed: &SshKeyAttributes) -> Result<ChangeSet, EngineError> {
        // the API strips trailing newlines from keys
        DiffBuilder::new(ResourceKind::SshKey)
            .field(PUBLIC_KEY, self.public_key.trim(), observed.public_key.trim())
            .field(LABEL, &self.label, &observed.label)
            .optional(
                FINGERPRINT,
                self.fingerprint.as_deref(),
                Some(observed.fingerprint.as_str()),
            )
            .finish()
    }
}

impl Observe for SshKeyRecord {
    type Attributes = SshKeyAttributes;

    fn remote_id(&self) -> RemoteId {
        RemoteId::new(self.id.clone())
    }

    fn observe(&self, _previous: Option<&SshKeyAttributes>) -> SshKeyAttributes {
        SshKeyAttributes {
            label: self.label.clone(),
            public_key: self.public_key.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

impl DetectDrift for SshKeyAttributes {
    fn drift(&self, remote: &Self) -> Vec<Advisory> {
        DriftReport::new()
            .field(PUBLIC_KEY, self.public_key.trim(), remote.public_key.trim())
            .field(LABEL, &self.label, &remote.label)
            .finish()
    }
}
