//! Provisioning state machines.
//!
//! Pure classification of the status strings the remote API reports. The
//! machines perform no I/O: the poll probes read the remote object and feed
//! the status in through `observe`.
//!
//! Two vocabularies are kept apart on purpose: a new server moves through
//! `status` (`pending` → `provisioning` → `active`), a reinstall moves
//! through `deployment` (`deploying` → `deployed`).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Lifecycle of a remote object as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    /// Requested or reporting a status the engine does not recognise yet.
    Pending,
    /// The remote side is working on it.
    InProgress,
    Active,
    Failed,
    /// Gone, or being torn down.
    Absent,
}

impl ProvisioningStatus {
    /// Map a remote `status` value.
    pub fn from_remote(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" | "provisioning" => ProvisioningStatus::InProgress,
            "active" => ProvisioningStatus::Active,
            "failed" | "error" => ProvisioningStatus::Failed,
            "terminating" | "terminated" | "deleted" => ProvisioningStatus::Absent,
            _ => ProvisioningStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningStatus::Active | ProvisioningStatus::Failed | ProvisioningStatus::Absent
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStatus::Pending => "pending",
            ProvisioningStatus::InProgress => "in_progress",
            ProvisioningStatus::Active => "active",
            ProvisioningStatus::Failed => "failed",
            ProvisioningStatus::Absent => "absent",
        }
    }
}

impl fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reinstall lifecycle, reported on the separate `deployment` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    ReinstallRequested,
    Deploying,
    Deployed,
    Failed,
}

impl DeployStatus {
    pub fn from_remote(deployment: &str) -> Self {
        match deployment.trim().to_ascii_lowercase().as_str() {
            "deployed" => DeployStatus::Deployed,
            "failed" | "error" => DeployStatus::Failed,
            _ => DeployStatus::Deploying,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployStatus::Deployed | DeployStatus::Failed)
    }
}

/// What the poll probe should do after an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
    Fail(String),
}

/// Drives `Requested → {Pending, InProgress} → {Active | Failed}`.
#[derive(Debug, Clone)]
pub struct ProvisionMachine {
    state: Option<ProvisioningStatus>,
    last_remote: Option<String>,
    observations: u32,
}

impl ProvisionMachine {
    /// A machine in the `Requested` state.
    pub fn new() -> Self {
        Self {
            state: None,
            last_remote: None,
            observations: 0,
        }
    }

    /// `None` while still `Requested`.
    pub fn state(&self) -> Option<ProvisioningStatus> {
        self.state
    }

    /// The raw status string seen last, for error reports.
    pub fn last_remote(&self) -> Option<&str> {
        self.last_remote.as_deref()
    }

    pub fn observations(&self) -> u32 {
        self.observations
    }

    /// Feed one remote status reading taken `elapsed` after the request.
    pub fn observe(&mut self, remote: &str, elapsed: Duration) -> Step {
        if let Some(state) = self.state
            && state.is_terminal()
        {
            return terminal_step(state, self.last_remote.as_deref().unwrap_or_default());
        }

        self.observations += 1;
        let next = ProvisioningStatus::from_remote(remote);
        if self.state != Some(next) {
            info!(
                from = self.state.map(|s| s.as_str()).unwrap_or("requested"),
                to = %next,
                remote_status = remote,
                elapsed_secs = elapsed.as_secs(),
                "Provisioning state changed"
            );
        } else {
            debug!(state = %next, remote_status = remote, "Still provisioning");
        }
        self.state = Some(next);
        self.last_remote = Some(remote.to_string());

        terminal_step(next, remote)
    }
}

fn terminal_step(state: ProvisioningStatus, remote: &str) -> Step {
    match state {
        ProvisioningStatus::Active => Step::Done,
        ProvisioningStatus::Failed => Step::Fail(format!("remote reported status '{}'", remote)),
        ProvisioningStatus::Absent => Step::Fail(format!(
            "object is being torn down (status '{}')",
            remote
        )),
        ProvisioningStatus::Pending | ProvisioningStatus::InProgress => Step::Continue,
    }
}

impl Default for ProvisionMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives `ReinstallRequested → Deploying → {Deployed | Failed}`.
#[derive(Debug, Clone)]
pub struct DeployMachine {
    state: DeployStatus,
    last_remote: Option<String>,
}

impl DeployMachine {
    pub fn new() -> Self {
        Self {
            state: DeployStatus::ReinstallRequested,
            last_remote: None,
        }
    }

    pub fn state(&self) -> DeployStatus {
        self.state
    }

    pub fn last_remote(&self) -> Option<&str> {
        self.last_remote.as_deref()
    }

    pub fn observe(&mut self, remote: &str, elapsed: Duration) -> Step {
        if !self.state.is_terminal() {
            let next = DeployStatus::from_remote(remote);
            if next != self.state {
                info!(
                    from = ?self.state,
                    to = ?next,
                    remote_deployment = remote,
                    elapsed_secs = elapsed.as_secs(),
                    "Deployment state changed"
                );
            }
            self.state = next;
            self.last_remote = Some(remote.to_string());
        }

        match self.state {
            DeployStatus::Deployed => Step::Done,
            DeployStatus::Failed => Step::Fail(format!(
                "reinstall reported '{}'",
                self.last_remote.as_deref().unwrap_or_default()
            )),
            DeployStatus::ReinstallRequested | DeployStatus::Deploying => Step::Continue,
        }
    }
}

impl Default for DeployMachine {
    fn default() -> Self {
        Self::new()
    }
}
