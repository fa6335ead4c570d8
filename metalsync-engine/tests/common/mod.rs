//! Shared test utilities for metalsync-engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use metalsync_engine::model::{IpConfig, ProjectConfig, ServerConfig, SshKeyConfig};
use metalsync_engine::testing::FakeCloud;
use metalsync_engine::{Engine, EngineConfig, ObservedState, Outcome, StateUpdate};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Engine wired to an in-memory fake of the remote API.
pub struct TestEngine {
    pub cloud: Arc<FakeCloud>,
    pub engine: Arc<Engine<FakeCloud>>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let cloud = Arc::new(FakeCloud::new());
        let engine = Engine::new(Arc::clone(&cloud), config).expect("valid engine config");
        Self {
            cloud,
            engine: Arc::new(engine),
        }
    }
}

/// The recorded state of a successful outcome.
pub fn recorded<S: Debug>(outcome: &Outcome<S>) -> &ObservedState<S> {
    assert!(
        outcome.error.is_none(),
        "unexpected error: {:?}",
        outcome.error
    );
    match &outcome.state {
        StateUpdate::Record(state) => state,
        other => panic!("expected recorded state, got {:?}", other),
    }
}

/// The recorded state of an outcome, error or not.
pub fn partial<S: Debug>(outcome: &Outcome<S>) -> &ObservedState<S> {
    match &outcome.state {
        StateUpdate::Record(state) => state,
        other => panic!("expected partial state, got {:?}", other),
    }
}

pub fn project_config() -> ProjectConfig {
    ProjectConfig {
        name: "edge".to_string(),
        team_id: "team-1".to_string(),
        bgp_enabled: false,
        bgp_local_asn: None,
    }
}

pub fn ssh_key_config() -> SshKeyConfig {
    SshKeyConfig {
        label: "ops".to_string(),
        public_key: "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHVt ops@example.net".to_string(),
        fingerprint: None,
    }
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        project_id: "proj-1".to_string(),
        region: "fra".to_string(),
        plan: "c3.medium.x86".to_string(),
        hostname: Some("web-1".to_string()),
        image: Some("debian_12".to_string()),
        ssh_key_ids: BTreeSet::from(["key-1".to_string()]),
        extra_ip_address_ids: BTreeSet::new(),
        user_data: None,
        os_partition_size: None,
        spot_instance: false,
        bgp_enabled: false,
        tags: BTreeMap::new(),
        allow_reinstall: false,
    }
}

pub fn ip_config(target_server_id: Option<&str>) -> IpConfig {
    IpConfig {
        project_id: "proj-1".to_string(),
        region: "fra".to_string(),
        ddos_scrubbing: false,
        target_server_id: target_server_id.map(String::from),
        route_ip_id: None,
        ptr_record: None,
        a_record: None,
        tags: BTreeMap::new(),
        address: None,
    }
}
