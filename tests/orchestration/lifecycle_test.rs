/*!
 * Lifecycle Tests
 * Create, stop, start and destroy through the guarded entry points
 */

use super::support::{dev_request, user, workload_dataset, workspace_dataset, Harness};
use pretty_assertions::assert_eq;
use std::path::Path;
use workload_orchestrator::core::{AuthToken, ValidationKind, WorkloadState};
use workload_orchestrator::sandbox::{Facet, InstanceStatus, RuntimeFault, RuntimeOp};
use workload_orchestrator::validation::WorkloadRequest;
use workload_orchestrator::OrchestratorError;

#[tokio::test]
async fn test_full_lifecycle() {
    let h = Harness::new();
    let u1 = user("u1");

    let record = h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    assert_eq!(record.state, WorkloadState::Running);
    assert_eq!(record.owner, "u1");
    assert_eq!(record.capabilities, vec!["git".to_string(), "fish".to_string()]);
    assert_eq!(
        record.storage_path.as_deref(),
        Some(Path::new("/tank/users/u1/containers/dev1/workspace"))
    );
    assert_eq!(h.runtime.instance_status("dev1"), InstanceStatus::Running);

    let stopped = h.orchestrator.stop(&u1, "dev1").await.unwrap();
    assert_eq!(stopped.state, WorkloadState::Stopped);
    assert_eq!(h.runtime.instance_status("dev1"), InstanceStatus::Stopped);

    let started = h.orchestrator.start(&u1, "dev1").await.unwrap();
    assert_eq!(started.state, WorkloadState::Running);

    let outcome = h.orchestrator.destroy(&u1, "dev1").await.unwrap();
    assert!(outcome.storage_released);
    assert!(outcome.network_released);
    assert!(h.orchestrator.list(&u1).is_empty());
    assert!(h.runtime.instances().is_empty());
    assert!(!h.volumes.contains(&workload_dataset("u1", "dev1")));
}

#[tokio::test]
async fn test_descriptor_composition_order() {
    let h = Harness::new();
    let request = WorkloadRequest::new("dev1", "u1")
        .with_capabilities(["rust", "git"])
        .with_storage();
    h.orchestrator.create(&user("u1"), request).await.unwrap();

    let descriptor = h.runtime.descriptor("dev1").unwrap();
    assert_eq!(descriptor.capabilities, vec!["rust".to_string(), "git".to_string()]);
    let ids = descriptor.fragment_ids();
    let rust = ids.iter().position(|id| *id == "rust").unwrap();
    let git = ids.iter().position(|id| *id == "git").unwrap();
    assert!(rust < git);
    assert!(descriptor.isolation);
    assert_eq!(
        descriptor.workspace(),
        Some(Path::new("/tank/users/u1/containers/dev1/workspace"))
    );
    assert!(!descriptor.has_network_identity());
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();

    assert_eq!(h.orchestrator.start(&u1, "dev1").await.unwrap().state, WorkloadState::Running);
    h.orchestrator.stop(&u1, "dev1").await.unwrap();
    assert_eq!(h.orchestrator.stop(&u1, "dev1").await.unwrap().state, WorkloadState::Stopped);
}

#[tokio::test]
async fn test_workload_without_storage() {
    let h = Harness::new();
    let record = h
        .orchestrator
        .create(&user("u1"), WorkloadRequest::new("plain", "u1"))
        .await
        .unwrap();
    assert!(record.storage_path.is_none());
    assert!(h.volumes.datasets().is_empty());
    assert_eq!(h.runtime.descriptor("plain").unwrap().workspace(), None);
}

#[tokio::test]
async fn test_validation_rejects_before_side_effects() {
    let h = Harness::new();
    let u1 = user("u1");

    let cases = [
        (WorkloadRequest::new("dev1", "u1").with_capabilities(["cobol"]), ValidationKind::UnknownCapability),
        (WorkloadRequest::new("dev1", "u1").with_capabilities(["git", "git"]), ValidationKind::DuplicateCapability),
        (WorkloadRequest::new("Dev_1", "u1"), ValidationKind::InvalidName),
        (WorkloadRequest::new("twelve-chars", "u1"), ValidationKind::InvalidName),
    ];
    for (request, expected) in cases {
        match h.orchestrator.create(&u1, request).await {
            Err(OrchestratorError::Validation(e)) => assert_eq!(e.kind, expected),
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }

    assert!(h.runtime.instances().is_empty());
    assert_eq!(h.runtime.builds(), 0);
    assert!(h.volumes.datasets().is_empty());
    assert!(h.orchestrator.list(&u1).is_empty());
}

#[tokio::test]
async fn test_missing_name_is_rejected() {
    let h = Harness::new();
    let request = WorkloadRequest {
        name: None,
        ..WorkloadRequest::new("x", "u1")
    };
    match h.orchestrator.create(&user("u1"), request).await {
        Err(OrchestratorError::Validation(e)) => assert_eq!(e.kind, ValidationKind::MissingField),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_name_in_use() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();

    match h.orchestrator.create(&u1, dev_request("dev1", "u1")).await {
        Err(OrchestratorError::Validation(e)) => assert_eq!(e.kind, ValidationKind::NameInUse),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.runtime.builds(), 1);
    assert!(h.volumes.contains(&workspace_dataset("u1", "dev1")));
}

#[tokio::test]
async fn test_name_reusable_after_destroy() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    h.orchestrator.destroy(&u1, "dev1").await.unwrap();

    let record = h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    assert_eq!(record.state, WorkloadState::Running);
    assert_eq!(h.runtime.builds(), 2);
}

#[tokio::test]
async fn test_capabilities_listing() {
    let h = Harness::new();
    assert_eq!(
        h.orchestrator.capabilities(),
        vec!["fish".to_string(), "git".to_string(), "rust".to_string()]
    );
}

#[tokio::test]
async fn test_inspect_joins_live_facets() {
    let h = Harness::new();
    let u1 = user("u1");
    let request = dev_request("dev1", "u1").with_network_identity(Some(AuthToken::new("tskey")));
    h.orchestrator.create(&u1, request).await.unwrap();
    h.settle("dev1").await;
    h.volumes.write(&workspace_dataset("u1", "dev1"), 4096).unwrap();

    let view = h.orchestrator.inspect(&u1, "dev1").await.unwrap();
    assert_eq!(view.runtime, Facet::Observed(InstanceStatus::Running));
    assert_eq!(view.storage.observed().unwrap().used_bytes, 4096);
    assert_eq!(view.storage.observed().unwrap().quota, "10.0G");
    assert!(view.network.observed().unwrap().is_some());

    // A stuck runtime does not hide storage or network detail
    h.runtime.fail_next(RuntimeOp::Status, RuntimeFault::Fail, 1);
    let view = h.orchestrator.inspect(&u1, "dev1").await.unwrap();
    assert!(view.runtime.is_unavailable());
    assert_eq!(view.storage.observed().unwrap().used_bytes, 4096);
    assert!(view.network.observed().is_some());

    h.orchestrator.stop(&u1, "dev1").await.unwrap();
    let logs = h.orchestrator.logs(&u1, "dev1", Some(1)).await.unwrap();
    assert_eq!(logs.lines, vec!["Stopped container dev1".to_string()]);
}
