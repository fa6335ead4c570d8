//! End-to-end convergence scenarios against the in-memory remote API.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{TestEngine, ip_config, partial, project_config, recorded, server_config, ssh_key_config};
use metalsync_engine::testing::Op;
use metalsync_engine::{
    Advisory, Cancellation, ClientError, EngineConfig, EngineError, ErrorClass, Pass, Phase,
    Plan, ProvisioningStatus, Reconciler, RemoteId, StateUpdate, Timeouts, Verdict,
};
use tokio::time::Instant;

fn position(ops: &[Op], op: Op) -> usize {
    ops.iter()
        .position(|o| *o == op)
        .unwrap_or_else(|| panic!("{:?} was never called", op))
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_server_becomes_active_after_three_polls() {
    let t = TestEngine::new();
    t.cloud.set_status_script(&["pending", "pending", "active"]);
    t.cloud.push_server_address("203.0.113.5");

    let outcome = t.engine.servers().create(&server_config(), &Pass::new()).await;

    let state = recorded(&outcome);
    assert_eq!(state.status, ProvisioningStatus::Active);
    assert_eq!(state.attributes.ip_addresses, vec!["203.0.113.5".to_string()]);
    assert_eq!(t.cloud.count(Op::PollServer), 3);
    assert_eq!(t.cloud.count(Op::CreateServer), 1);
    assert_eq!(t.cloud.count(Op::GetServer), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_create_is_retried() {
    let t = TestEngine::new();
    t.cloud
        .fail_next(Op::CreateProject, ClientError::transient("502 bad gateway"), 2);

    let outcome = t.engine.projects().create(&project_config(), &Pass::new()).await;

    let state = recorded(&outcome);
    assert_eq!(state.attributes.name, "edge");
    assert_eq!(t.cloud.count(Op::CreateProject), 3);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_create_is_not_retried() {
    let t = TestEngine::new();
    t.cloud.fail_next(
        Op::CreateServer,
        ClientError::permanent(422, "plan c3.medium.x86 is not available in fra"),
        1,
    );

    let outcome = t.engine.servers().create(&server_config(), &Pass::new()).await;

    let error = outcome.error.expect("create should fail");
    assert_eq!(error.class(), ErrorClass::Permanent);
    assert_eq!(error.phase(), Phase::Create);
    assert!(
        error
            .to_string()
            .contains("plan c3.medium.x86 is not available in fra")
    );
    assert_eq!(outcome.state, StateUpdate::Keep);
    assert_eq!(t.cloud.count(Op::CreateServer), 1);
    assert_eq!(t.cloud.server_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_without_ips_is_not_provisioned() {
    let t = TestEngine::new();
    t.cloud.set_assign_server_ips(false);

    let outcome = t.engine.servers().create(&server_config(), &Pass::new()).await;

    let state = partial(&outcome);
    assert!(!state.is_settled());
    match outcome.error {
        Some(EngineError::NotProvisioned {
            ref remote_id,
            ref reason,
            ..
        }) => {
            assert_eq!(remote_id, state.remote_id.as_str());
            assert!(reason.contains("no IP addresses"));
        }
        ref other => panic!("expected NotProvisioned, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_provisioning_records_partial_state() {
    let t = TestEngine::new();
    t.cloud.set_status_script(&["provisioning", "failed"]);

    let outcome = t.engine.servers().create(&server_config(), &Pass::new()).await;

    let error = outcome.error.as_ref().expect("provisioning should fail");
    assert!(error.is_permanent());
    assert_eq!(error.phase(), Phase::Poll);
    let state = partial(&outcome);
    assert_eq!(error.remote_id(), Some(state.remote_id.as_str()));
    assert_eq!(t.cloud.count(Op::PollServer), 2);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_status_reads_count_as_pending() {
    let t = TestEngine::new();
    t.cloud
        .fail_next(Op::PollServer, ClientError::transient("connection reset"), 2);

    let outcome = t.engine.servers().create(&server_config(), &Pass::new()).await;

    recorded(&outcome);
    assert_eq!(t.cloud.count(Op::PollServer), 3);
}

#[tokio::test(start_paused = true)]
async fn test_poll_timeout_keeps_partial_state() {
    let t = TestEngine::new();
    t.cloud.set_status_script(&["provisioning"]);
    let pass = Pass::new().with_timeouts(Timeouts {
        create: Some(Duration::from_secs(120)),
        ..Timeouts::default()
    });

    let started = Instant::now();
    let outcome = t.engine.servers().create(&server_config(), &pass).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(120));
    assert!(elapsed <= Duration::from_secs(121));

    let error = outcome.error.as_ref().expect("create should time out");
    assert_eq!(error.class(), ErrorClass::Timeout);
    assert!(!error.is_permanent());
    assert!(error.to_string().contains("provisioning"));

    let state = partial(&outcome).clone();
    assert_eq!(state.status, ProvisioningStatus::InProgress);
    assert_eq!(error.remote_id(), Some(state.remote_id.as_str()));

    // the next pass resumes polling the same server
    t.cloud
        .script_server(state.remote_id.as_str(), &["provisioning", "active"]);
    t.cloud.clear_calls();
    let retry = t
        .engine
        .servers()
        .apply(&server_config(), Some(&state), &Pass::new())
        .await;

    let settled = recorded(&retry);
    assert_eq!(settled.remote_id, state.remote_id);
    assert_eq!(settled.status, ProvisioningStatus::Active);
    assert_eq!(t.cloud.count(Op::PollServer), 2);
    assert_eq!(t.cloud.count(Op::CreateServer), 0);
    assert_eq!(t.cloud.server_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_that_times_out_again_stays_partial() {
    let t = TestEngine::new();
    t.cloud.set_status_script(&["provisioning"]);
    let pass = Pass::new().with_timeouts(Timeouts {
        create: Some(Duration::from_secs(60)),
        ..Timeouts::default()
    });
    let created = t.engine.servers().create(&server_config(), &pass).await;
    let state = partial(&created).clone();

    let retry = t
        .engine
        .servers()
        .apply(&server_config(), Some(&state), &pass)
        .await;

    let error = retry.error.as_ref().expect("resume should time out");
    assert_eq!(error.class(), ErrorClass::Timeout);
    assert!(!partial(&retry).is_settled());
    assert_eq!(partial(&retry).remote_id, state.remote_id);
    assert_eq!(t.cloud.count(Op::CreateServer), 1);
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_server_without_ips_is_still_tracked() {
    let t = TestEngine::new();
    t.cloud.set_assign_server_ips(false);
    t.cloud.set_status_script(&["provisioning"]);
    let pass = Pass::new().with_timeouts(Timeouts {
        create: Some(Duration::from_secs(60)),
        ..Timeouts::default()
    });
    let created = t.engine.servers().create(&server_config(), &pass).await;
    let state = partial(&created).clone();
    assert!(state.attributes.ip_addresses.is_empty());

    let outcome = t.engine.servers().read(&state, &Pass::new()).await;

    let fresh = recorded(&outcome);
    assert_eq!(fresh.remote_id, state.remote_id);
    assert!(!fresh.is_settled());
    assert_eq!(t.cloud.server_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsettled_project_is_read_before_converging() {
    let t = TestEngine::new();
    t.cloud
        .fail_next(Op::GetProject, ClientError::permanent(500, "read failed"), 1);
    let created = t.engine.projects().create(&project_config(), &Pass::new()).await;
    assert!(created.error.is_some());
    let state = partial(&created).clone();
    assert!(!state.is_settled());
    t.cloud.clear_calls();

    let outcome = t
        .engine
        .projects()
        .apply(&project_config(), Some(&state), &Pass::new())
        .await;

    let settled = recorded(&outcome);
    assert!(settled.is_settled());
    assert_eq!(settled.remote_id, state.remote_id);
    assert_eq!(t.cloud.count(Op::GetProject), 1);
    assert_eq!(t.cloud.count(Op::CreateProject), 0);
    assert_eq!(t.cloud.mutations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_polling_and_reads_once() {
    let t = TestEngine::new();
    t.cloud.set_status_script(&["provisioning"]);
    let (handle, cancel) = Cancellation::new();
    let pass = Pass::new().with_cancel(cancel);

    let engine = Arc::clone(&t.engine);
    let task =
        tokio::spawn(async move { engine.servers().create(&server_config(), &pass).await });
    tokio::time::sleep(Duration::from_secs(30)).await;
    handle.cancel();
    let outcome = task.await.unwrap();

    let error = outcome.error.as_ref().expect("create should be cancelled");
    assert_eq!(error.class(), ErrorClass::Cancelled);
    assert!(!partial(&outcome).is_settled());
    assert_eq!(t.cloud.count(Op::GetServer), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_creates_share_one_client() {
    let t = TestEngine::new();
    t.cloud.set_status_script(&["pending", "provisioning", "active"]);

    let mut tasks = Vec::new();
    for n in 0..5 {
        let engine = Arc::clone(&t.engine);
        tasks.push(tokio::spawn(async move {
            let mut desired = server_config();
            desired.hostname = Some(format!("web-{}", n));
            engine.servers().create(&desired, &Pass::new()).await
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        let outcome = task.await.unwrap();
        ids.insert(recorded(&outcome).remote_id.clone());
    }
    assert_eq!(ids.len(), 5);
    assert_eq!(t.cloud.server_count(), 5);
}

// =============================================================================
// Update
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_tags_only_update_is_single_call() {
    let t = TestEngine::new();
    let created = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud.clear_calls();

    let mut desired = server_config();
    desired.tags.insert("env".to_string(), "prod".to_string());
    let outcome = t
        .engine
        .servers()
        .update(&desired, &observed, &Pass::new())
        .await;

    let state = recorded(&outcome);
    assert_eq!(state.attributes.tags.get("env").map(String::as_str), Some("prod"));
    assert_eq!(t.cloud.count(Op::UpdateServer), 1);
    assert_eq!(t.cloud.count(Op::PollServer), 0);
    assert_eq!(t.cloud.count(Op::ReinstallServer), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mutable_changes_update_in_place() {
    let t = TestEngine::new();
    let created = t.engine.projects().create(&project_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud.clear_calls();

    let mut desired = project_config();
    desired.name = "edge-eu".to_string();
    desired.bgp_enabled = true;
    let outcome = t
        .engine
        .projects()
        .update(&desired, &observed, &Pass::new())
        .await;

    let state = recorded(&outcome);
    assert_eq!(state.remote_id, observed.remote_id);
    assert_eq!(state.attributes.name, "edge-eu");
    assert!(state.attributes.bgp_local_asn.is_some());
    assert_eq!(t.cloud.count(Op::UpdateProject), 1);
    assert_eq!(t.cloud.count(Op::DeleteProject), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_changes_means_no_calls() {
    let t = TestEngine::new();
    let created = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud.clear_calls();

    let outcome = t
        .engine
        .servers()
        .apply(&server_config(), Some(&observed), &Pass::new())
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.state, StateUpdate::Keep);
    assert!(t.cloud.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_region_change_deletes_then_creates() {
    let t = TestEngine::new();
    let created = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud.clear_calls();

    let mut desired = server_config();
    desired.region = "ams".to_string();
    desired.image = Some("ubuntu_24_04".to_string());
    let outcome = t
        .engine
        .servers()
        .update(&desired, &observed, &Pass::new())
        .await;

    let state = recorded(&outcome);
    assert_ne!(state.remote_id, observed.remote_id);
    assert_eq!(state.attributes.region, "ams");
    assert!(t.cloud.server(observed.remote_id.as_str()).is_none());

    let ops: Vec<Op> = t.cloud.calls().into_iter().map(|c| c.op).collect();
    assert!(position(&ops, Op::DeleteServer) < position(&ops, Op::CreateServer));
    assert_eq!(t.cloud.count(Op::UpdateServer), 0);
    assert_eq!(t.cloud.count(Op::ReinstallServer), 0);
    assert_eq!(
        outcome.advisories,
        vec![Advisory::Replacing {
            attributes: vec!["region".to_string()]
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reinstall_requires_consent() {
    let t = TestEngine::new();
    let created = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud.clear_calls();

    let mut desired = server_config();
    desired.image = Some("ubuntu_24_04".to_string());
    desired.user_data = Some("#cloud-config\npackages: [nginx]\n".to_string());
    desired.tags.insert("env".to_string(), "prod".to_string());
    let outcome = t
        .engine
        .servers()
        .update(&desired, &observed, &Pass::new())
        .await;

    match outcome.error {
        Some(EngineError::ReinstallNotAllowed { ref attributes, .. }) => {
            assert_eq!(attributes, &vec!["image", "user_data"]);
        }
        ref other => panic!("expected ReinstallNotAllowed, got {:?}", other),
    }
    assert!(outcome.error.as_ref().is_some_and(EngineError::is_permanent));
    assert_eq!(outcome.state, StateUpdate::Keep);
    assert!(t.cloud.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reinstall_rotates_password() {
    let t = TestEngine::new();
    let mut desired = server_config();
    desired.allow_reinstall = true;
    let created = t.engine.servers().create(&desired, &Pass::new()).await;
    let observed = recorded(&created).clone();
    assert_eq!(observed.attributes.password, None);
    t.cloud.clear_calls();

    desired.image = Some("ubuntu_24_04".to_string());
    desired.tags.insert("env".to_string(), "prod".to_string());
    let first = t
        .engine
        .servers()
        .update(&desired, &observed, &Pass::new())
        .await;
    let first_state = recorded(&first).clone();
    let id = first_state.remote_id.as_str();

    assert_eq!(first_state.remote_id, observed.remote_id);
    assert_eq!(first_state.attributes.image.as_deref(), Some("ubuntu_24_04"));
    assert_eq!(first_state.attributes.tags.get("env").map(String::as_str), Some("prod"));
    assert_eq!(first_state.attributes.password, t.cloud.server_password(id));
    assert!(first.advisories.contains(&Advisory::Reinstalled));
    assert_eq!(t.cloud.count(Op::ReinstallServer), 1);
    assert_eq!(t.cloud.count(Op::UpdateServer), 1);
    assert_eq!(t.cloud.count(Op::DeleteServer), 0);

    desired.image = Some("rocky_9".to_string());
    let second = t
        .engine
        .servers()
        .update(&desired, &first_state, &Pass::new())
        .await;
    let second_state = recorded(&second);

    assert_eq!(second_state.attributes.password, t.cloud.server_password(id));
    assert_ne!(second_state.attributes.password, first_state.attributes.password);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reinstall_still_records_new_password() {
    let t = TestEngine::new();
    t.cloud.set_deploy_script(&["deploying", "failed"]);
    let mut desired = server_config();
    desired.allow_reinstall = true;
    let created = t.engine.servers().create(&desired, &Pass::new()).await;
    let observed = recorded(&created).clone();

    desired.image = Some("ubuntu_24_04".to_string());
    let outcome = t
        .engine
        .servers()
        .update(&desired, &observed, &Pass::new())
        .await;

    let error = outcome.error.as_ref().expect("reinstall should fail");
    assert_eq!(error.phase(), Phase::Poll);
    assert!(error.is_permanent());
    let state = partial(&outcome);
    assert!(state.attributes.password.is_some());
    assert_eq!(
        state.attributes.password,
        t.cloud.server_password(observed.remote_id.as_str())
    );
}

// =============================================================================
// Read
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_terminating_server_is_absent() {
    let t = TestEngine::new();
    let created = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud
        .edit_server(observed.remote_id.as_str(), |s| s.status = "terminating".to_string());

    let outcome = t.engine.servers().read(&observed, &Pass::new()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.state, StateUpdate::Remove);
}

#[tokio::test(start_paused = true)]
async fn test_deleted_out_of_band_is_absent() {
    let t = TestEngine::new();
    let created = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud.remove_server(observed.remote_id.as_str());

    let outcome = t.engine.servers().read(&observed, &Pass::new()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.state, StateUpdate::Remove);
}

#[tokio::test(start_paused = true)]
async fn test_drift_is_reported_not_corrected() {
    let t = TestEngine::new();
    let created = t.engine.projects().create(&project_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud.edit_project(observed.remote_id.as_str(), |p| {
        p.name = "edge-renamed".to_string();
    });
    t.cloud.clear_calls();

    let outcome = t.engine.projects().read(&observed, &Pass::new()).await;

    let state = recorded(&outcome);
    assert_eq!(state.attributes.name, "edge-renamed");
    assert_eq!(
        outcome.advisories,
        vec![Advisory::drift("name", "edge", "edge-renamed")]
    );
    assert_eq!(t.cloud.mutations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_read_keeps_write_only_fields() {
    let t = TestEngine::new();
    let mut desired = server_config();
    desired.user_data = Some("#!/bin/sh\necho hi\n".to_string());
    desired.os_partition_size = Some(40);
    let created = t.engine.servers().create(&desired, &Pass::new()).await;
    let observed = recorded(&created).clone();
    assert_eq!(observed.attributes.os_partition_size, Some(40));

    let outcome = t.engine.servers().read(&observed, &Pass::new()).await;

    let state = recorded(&outcome);
    assert_eq!(state.attributes.user_data, desired.user_data);
    assert_eq!(state.attributes.os_partition_size, Some(40));
    assert!(outcome.advisories.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ip_without_address_is_absent() {
    let t = TestEngine::new();
    let created = t.engine.ip_addresses().create(&ip_config(None), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud
        .edit_ip(observed.remote_id.as_str(), |ip| ip.address.clear());

    let outcome = t.engine.ip_addresses().read(&observed, &Pass::new()).await;

    assert_eq!(outcome.state, StateUpdate::Remove);
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_delete_is_idempotent_for_every_kind() {
    let t = TestEngine::new();
    let pass = Pass::new();

    let project = t.engine.projects().create(&project_config(), &pass).await;
    let project = recorded(&project).clone();
    let key = t.engine.ssh_keys().create(&ssh_key_config(), &pass).await;
    let key = recorded(&key).clone();
    let ip = t.engine.ip_addresses().create(&ip_config(None), &pass).await;
    let ip = recorded(&ip).clone();
    let server = t.engine.servers().create(&server_config(), &pass).await;
    let server = recorded(&server).clone();

    for _ in 0..2 {
        let outcomes = [
            t.engine.projects().delete(&project, &pass).await.state == StateUpdate::Remove,
            t.engine.ssh_keys().delete(&key, &pass).await.state == StateUpdate::Remove,
            t.engine.ip_addresses().delete(&ip, &pass).await.state == StateUpdate::Remove,
            t.engine.servers().delete(&server, &pass).await.state == StateUpdate::Remove,
        ];
        assert_eq!(outcomes, [true; 4]);
    }
    assert!(t.cloud.project(project.remote_id.as_str()).is_none());
    assert_eq!(t.cloud.server_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_assigned_ip_is_unassigned_before_delete() {
    let t = TestEngine::new();
    let server = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let server_id = recorded(&server).remote_id.clone();
    let created = t
        .engine
        .ip_addresses()
        .create(&ip_config(Some(server_id.as_str())), &Pass::new())
        .await;
    let observed = recorded(&created).clone();
    assert!(observed.attributes.is_assigned());
    t.cloud.clear_calls();

    let outcome = t.engine.ip_addresses().delete(&observed, &Pass::new()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.state, StateUpdate::Remove);
    let ops: Vec<Op> = t.cloud.calls().into_iter().map(|c| c.op).collect();
    assert_eq!(ops, vec![Op::GetIp, Op::UnassignIp, Op::DeleteIp]);
}

#[tokio::test(start_paused = true)]
async fn test_unassign_failure_aborts_delete() {
    let t = TestEngine::new();
    let server = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let server_id = recorded(&server).remote_id.clone();
    let created = t
        .engine
        .ip_addresses()
        .create(&ip_config(Some(server_id.as_str())), &Pass::new())
        .await;
    let observed = recorded(&created).clone();
    t.cloud.fail_next(
        Op::UnassignIp,
        ClientError::permanent(403, "ip address is locked"),
        1,
    );

    let outcome = t.engine.ip_addresses().delete(&observed, &Pass::new()).await;

    let error = outcome.error.as_ref().expect("delete should fail");
    assert_eq!(error.phase(), Phase::Unassign);
    assert_eq!(outcome.state, StateUpdate::Keep);
    assert_eq!(t.cloud.count(Op::DeleteIp), 0);
    assert!(t.cloud.ip(observed.remote_id.as_str()).is_some());
}

// =============================================================================
// Plan, import, configuration
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_plan_previews_reinstall() {
    let t = TestEngine::new();
    assert_eq!(
        t.engine.servers().plan(&server_config(), None).unwrap(),
        Plan::Create
    );

    let created = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    let mut desired = server_config();
    desired.image = Some("ubuntu_24_04".to_string());

    let plan = t.engine.servers().plan(&desired, Some(&observed)).unwrap();

    assert_eq!(plan.verdict(), Some(Verdict::Reinstall));
    assert_eq!(
        plan.advisories(),
        &[Advisory::ReinstallRequired {
            attributes: vec!["image".to_string()],
            allowed: false,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_computed_override_is_rejected() {
    let t = TestEngine::new();
    let created = t.engine.ssh_keys().create(&ssh_key_config(), &Pass::new()).await;
    let observed = recorded(&created).clone();
    t.cloud.clear_calls();

    let mut desired = ssh_key_config();
    desired.fingerprint = Some("SHA256:not-the-real-one".to_string());

    let plan = t.engine.ssh_keys().plan(&desired, Some(&observed));
    assert!(matches!(
        plan,
        Err(EngineError::ComputedOverride {
            attribute: "fingerprint",
            ..
        })
    ));

    let outcome = t
        .engine
        .ssh_keys()
        .update(&desired, &observed, &Pass::new())
        .await;
    assert!(matches!(
        outcome.error,
        Some(EngineError::ComputedOverride { .. })
    ));
    assert!(t.cloud.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_import_existing_server() {
    let t = TestEngine::new();
    let created = t.engine.servers().create(&server_config(), &Pass::new()).await;
    let id = recorded(&created).remote_id.clone();

    let imported = t.engine.servers().import(&id, &Pass::new()).await;
    assert_eq!(recorded(&imported).remote_id, id);

    let missing = t
        .engine
        .servers()
        .import(&RemoteId::new("does-not-exist"), &Pass::new())
        .await;
    let error = missing.error.expect("import should fail");
    assert!(error.is_permanent());
    assert_eq!(error.phase(), Phase::Read);
}

#[test]
fn test_engine_rejects_invalid_config() {
    let cloud = Arc::new(metalsync_engine::testing::FakeCloud::new());
    let mut config = EngineConfig::default();
    config.call_retry.max_attempts = 0;
    assert!(metalsync_engine::Engine::new(cloud, config).is_err());
}
