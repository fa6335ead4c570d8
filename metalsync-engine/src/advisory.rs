//! Non-fatal diagnostics returned next to the outcome of a pass.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A warning for the operator. Advisories never block a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Advisory {
    /// The remote value of an operator-settable attribute differs from the
    /// recorded one. The remote value is recorded; nothing is corrected.
    Drift {
        attribute: String,
        recorded: String,
        remote: String,
    },
    /// The object will be destroyed and recreated.
    Replacing { attributes: Vec<String> },
    /// The change needs a reinstall; `allowed` reflects the consent flag.
    ReinstallRequired {
        attributes: Vec<String>,
        allowed: bool,
    },
    /// A reinstall completed and a new root password was recorded.
    Reinstalled,
}

impl Advisory {
    pub fn drift(attribute: &str, recorded: impl Into<String>, remote: impl Into<String>) -> Self {
        Advisory::Drift {
            attribute: attribute.to_string(),
            recorded: recorded.into(),
            remote: remote.into(),
        }
    }

    pub fn replacing(attributes: &[&str]) -> Self {
        Advisory::Replacing {
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn reinstall_required(attributes: &[&str], allowed: bool) -> Self {
        Advisory::ReinstallRequired {
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
            allowed,
        }
    }

    pub fn is_drift(&self) -> bool {
        matches!(self, Advisory::Drift { .. })
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::Drift {
                attribute,
                recorded,
                remote,
            } => write!(
                f,
                "`{}` changed outside of this configuration: recorded {}, remote has {}",
                attribute, recorded, remote
            ),
            Advisory::Replacing { attributes } => write!(
                f,
                "changing {} forces the object to be destroyed and recreated",
                attributes.join(", ")
            ),
            Advisory::ReinstallRequired {
                attributes,
                allowed: true,
            } => write!(
                f,
                "changing {} reinstalls the server; all data on it will be lost",
                attributes.join(", ")
            ),
            Advisory::ReinstallRequired {
                attributes,
                allowed: false,
            } => write!(
                f,
                "changing {} requires a reinstall, which is not allowed (allow_reinstall = false)",
                attributes.join(", ")
            ),
            Advisory::Reinstalled => {
                f.write_str("server was reinstalled; the root password has been rotated")
            }
        }
    }
}
