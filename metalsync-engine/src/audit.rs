//! Audit trail for destructive or billable actions.
//!
//! Emitted under the `audit` tracing target so the host can route these
//! lines to a separate sink.

use tracing::{info, warn};

use crate::model::ResourceKind;

pub fn created(kind: ResourceKind, remote_id: &str) {
    info!(target: "audit", %kind, remote_id, "Created remote object");
}

pub fn deleted(kind: ResourceKind, remote_id: &str) {
    info!(target: "audit", %kind, remote_id, "Deleted remote object");
}

pub fn replacing(kind: ResourceKind, remote_id: &str, attributes: &[&str]) {
    warn!(
        target: "audit",
        %kind,
        remote_id,
        attributes = %attributes.join(","),
        "Replacing remote object: destroy then recreate"
    );
}

pub fn reinstalling(kind: ResourceKind, remote_id: &str, attributes: &[&str]) {
    warn!(
        target: "audit",
        %kind,
        remote_id,
        attributes = %attributes.join(","),
        "Reinstalling server, all data on it is wiped"
    );
}
