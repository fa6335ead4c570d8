//! Error types for the convergence engine.
//!
//! Two layers: [`ClientError`] is what the remote API client reports for a
//! single call, already classified as transient, permanent or not-found.
//! [`EngineError`] is what a convergence pass reports to the framework; it
//! always names the resource kind, the phase and, once assigned, the remote
//! identifier so the object can be inspected out-of-band.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ResourceKind;
use crate::retry::CallError;

/// Error reported by the remote API client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The object does not exist (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure or 5xx. The same call may succeed later.
    #[error("transient: {0}")]
    Transient(String),

    /// Validation failure or conflict (4xx). Repeating the call will not help.
    #[error("{message} (HTTP {status})")]
    Permanent { status: u16, message: String },
}

impl ClientError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ClientError::NotFound(what.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ClientError::Transient(message.into())
    }

    pub fn permanent(status: u16, message: impl Into<String>) -> Self {
        ClientError::Permanent {
            status,
            message: message.into(),
        }
    }

    /// Whether the call-level retry may repeat the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// Phase of a convergence pass in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Create,
    Poll,
    Read,
    Update,
    Reinstall,
    Unassign,
    Delete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Create => "create",
            Phase::Poll => "poll",
            Phase::Read => "read",
            Phase::Update => "update",
            Phase::Reinstall => "reinstall",
            Phase::Unassign => "unassign",
            Phase::Delete => "delete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of an [`EngineError`], used by callers to pick a
/// recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retries at the call level were exhausted; a later pass may succeed.
    Transient,
    /// Never retried automatically.
    Permanent,
    /// The poll budget ran out while the remote side was still working.
    Timeout,
    /// The caller cancelled the pass.
    Cancelled,
}

/// Error reported by a convergence pass.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("{kind} {}: {phase} failed: {message}", display_id(.remote_id))]
    Permanent {
        kind: ResourceKind,
        phase: Phase,
        remote_id: Option<String>,
        message: String,
    },

    #[error("{kind} {}: {phase} failed after {attempts} attempts: {message}", display_id(.remote_id))]
    Transient {
        kind: ResourceKind,
        phase: Phase,
        remote_id: Option<String>,
        message: String,
        attempts: u32,
    },

    #[error(
        "{kind} {}: timed out after {}s during {phase} (last remote status: {}); the remote side may still be working",
        display_id(.remote_id),
        .elapsed.as_secs(),
        .last_status.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        kind: ResourceKind,
        phase: Phase,
        remote_id: Option<String>,
        elapsed: Duration,
        last_status: Option<String>,
    },

    #[error("{kind} {}: cancelled during {phase}", display_id(.remote_id))]
    Cancelled {
        kind: ResourceKind,
        phase: Phase,
        remote_id: Option<String>,
    },

    #[error(
        "{kind} {remote_id}: changing {} requires a reinstall, which wipes all data on the server; set allow_reinstall = true to permit it",
        .attributes.join(", ")
    )]
    ReinstallNotAllowed {
        kind: ResourceKind,
        remote_id: String,
        attributes: Vec<&'static str>,
    },

    #[error(
        "{kind}: `{attribute}` is computed by the remote API and cannot be set (declared {declared}, remote has {observed})"
    )]
    ComputedOverride {
        kind: ResourceKind,
        attribute: &'static str,
        declared: String,
        observed: String,
    },

    #[error("{kind} {remote_id}: created but not usable: {reason}")]
    NotProvisioned {
        kind: ResourceKind,
        remote_id: String,
        reason: String,
    },
}

fn display_id(id: &Option<String>) -> &str {
    id.as_deref().unwrap_or("<no remote id>")
}

impl EngineError {
    pub fn kind(&self) -> ResourceKind {
        match self {
            EngineError::Permanent { kind, .. }
            | EngineError::Transient { kind, .. }
            | EngineError::Timeout { kind, .. }
            | EngineError::Cancelled { kind, .. }
            | EngineError::ReinstallNotAllowed { kind, .. }
            | EngineError::ComputedOverride { kind, .. }
            | EngineError::NotProvisioned { kind, .. } => *kind,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            EngineError::Permanent { phase, .. }
            | EngineError::Transient { phase, .. }
            | EngineError::Timeout { phase, .. }
            | EngineError::Cancelled { phase, .. } => *phase,
            EngineError::ReinstallNotAllowed { .. } => Phase::Update,
            EngineError::ComputedOverride { .. } => Phase::Plan,
            EngineError::NotProvisioned { .. } => Phase::Create,
        }
    }

    /// Remote identifier of the affected object, once one was assigned.
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            EngineError::Permanent { remote_id, .. }
            | EngineError::Transient { remote_id, .. }
            | EngineError::Timeout { remote_id, .. }
            | EngineError::Cancelled { remote_id, .. } => remote_id.as_deref(),
            EngineError::ReinstallNotAllowed { remote_id, .. }
            | EngineError::NotProvisioned { remote_id, .. } => Some(remote_id),
            EngineError::ComputedOverride { .. } => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Transient { .. } => ErrorClass::Transient,
            EngineError::Timeout { .. } => ErrorClass::Timeout,
            EngineError::Cancelled { .. } => ErrorClass::Cancelled,
            EngineError::Permanent { .. }
            | EngineError::ReinstallNotAllowed { .. }
            | EngineError::ComputedOverride { .. }
            | EngineError::NotProvisioned { .. } => ErrorClass::Permanent,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.class() == ErrorClass::Permanent
    }
}

/// Where an error happens: which resource kind, which phase, which object.
///
/// Flows carry one of these and use it to turn lower-level failures into
/// [`EngineError`]s without repeating the context at every call site.
#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ResourceKind,
    pub phase: Phase,
    pub remote_id: Option<String>,
}

impl Scope {
    pub fn new(kind: ResourceKind, phase: Phase) -> Self {
        Self {
            kind,
            phase,
            remote_id: None,
        }
    }

    pub fn with_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Same resource, different phase.
    pub fn at(&self, phase: Phase) -> Self {
        Self {
            kind: self.kind,
            phase,
            remote_id: self.remote_id.clone(),
        }
    }

    pub fn permanent(&self, message: impl Into<String>) -> EngineError {
        EngineError::Permanent {
            kind: self.kind,
            phase: self.phase,
            remote_id: self.remote_id.clone(),
            message: message.into(),
        }
    }

    pub fn timeout(&self, elapsed: Duration, last_status: Option<String>) -> EngineError {
        EngineError::Timeout {
            kind: self.kind,
            phase: self.phase,
            remote_id: self.remote_id.clone(),
            elapsed,
            last_status,
        }
    }

    pub fn cancelled(&self) -> EngineError {
        EngineError::Cancelled {
            kind: self.kind,
            phase: self.phase,
            remote_id: self.remote_id.clone(),
        }
    }

    /// Convert a client error from a single call that was not retried.
    pub fn client(&self, error: ClientError) -> EngineError {
        self.call(CallError::Client { error, attempts: 1 })
    }

    /// Convert the result of a (possibly retried) remote call.
    pub fn call(&self, error: CallError) -> EngineError {
        match error {
            CallError::Cancelled => self.cancelled(),
            CallError::Client {
                error: ClientError::Transient(message),
                attempts,
            } => EngineError::Transient {
                kind: self.kind,
                phase: self.phase,
                remote_id: self.remote_id.clone(),
                message,
                attempts,
            },
            CallError::Client {
                error: ClientError::NotFound(what),
                ..
            } => self.permanent(format!("remote object not found: {}", what)),
            CallError::Client {
                error: err @ ClientError::Permanent { .. },
                ..
            } => self.permanent(err.to_string()),
        }
    }
}
