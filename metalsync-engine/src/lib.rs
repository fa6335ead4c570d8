//! metalsync-engine - convergence engine for declaratively managed bare-metal
//! infrastructure.
//!
//! Given the desired configuration of a project, IP address, SSH key or
//! server and the last observed remote state, a [`Reconciler`] decides which
//! remote operations are needed, executes them against an injected
//! [`RemoteClient`], waits for asynchronous provisioning to finish within a
//! bounded budget and reports the new observed state.
//!
//! The engine emits `tracing` events but never installs a subscriber.
//! Destructive actions are additionally logged under the `audit` target.

pub mod advisory;
pub mod audit;
pub mod cancel;
pub mod client;
pub mod config;
pub mod credentials;
pub mod diff;
pub mod drift;
pub mod engine;
pub mod error;
pub mod model;
pub mod poll;
pub mod provision;
pub mod reconciler;
pub mod retry;
pub mod testing;

pub use advisory::Advisory;
pub use cancel::{CancelHandle, Cancellation};
pub use client::{IpApi, ProjectApi, RemoteClient, ServerApi, SshKeyApi};
pub use config::{ConfigError, EngineConfig, Timeouts};
pub use diff::{Change, ChangeSet, Verdict};
pub use engine::Engine;
pub use error::{ClientError, EngineError, ErrorClass, Phase};
pub use model::{ObservedState, RemoteId, ResourceKind};
pub use poll::PollPolicy;
pub use provision::ProvisioningStatus;
pub use reconciler::{Outcome, Pass, Plan, Reconciler, StateUpdate};
pub use retry::RetryPolicy;
