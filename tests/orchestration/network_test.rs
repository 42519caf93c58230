/*!
 * Network Identity Tests
 * Background enrollment, retries, secrecy and deregistration
 */

use super::support::{dev_request, user, Harness};
use workload_orchestrator::core::{AuthToken, EnrollmentState, ValidationKind, WorkloadState};
use workload_orchestrator::OrchestratorError;

fn networked(name: &str, token: &str) -> workload_orchestrator::WorkloadRequest {
    dev_request(name, "u1").with_network_identity(Some(AuthToken::new(token)))
}

#[tokio::test]
async fn test_enrollment_completes_after_create() {
    let h = Harness::new();
    let u1 = user("u1");

    let record = h.orchestrator.create(&u1, networked("dev1", "tskey-1")).await.unwrap();
    assert_eq!(record.state, WorkloadState::Running);
    assert!(record.network_identity.is_some());

    h.settle("dev1").await;
    let record = h.orchestrator.status(&u1, "dev1").await.unwrap();
    let identity = record.network_identity.unwrap();
    assert_eq!(identity.enrollment_state, EnrollmentState::Enrolled);
    assert_eq!(identity.hostname_hint, "dev1");
    assert!(h.mesh.is_enrolled("dev1"));

    let descriptor = h.runtime.descriptor("dev1").unwrap();
    assert!(descriptor.has_network_identity());
    assert!(descriptor.allowed_devices.iter().any(|d| d.node == "/dev/net/tun"));
}

#[tokio::test]
async fn test_token_never_leaves_in_records_or_documents() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, networked("dev1", "tskey-secret-42")).await.unwrap();
    h.settle("dev1").await;

    let record = h.orchestrator.status(&u1, "dev1").await.unwrap();
    let json = serde_json::to_string(&record).unwrap();
    assert!(!json.contains("tskey-secret-42"));
    assert!(!format!("{:?}", record).contains("tskey-secret-42"));

    let document = h.runtime.descriptor("dev1").unwrap().to_document().to_string();
    assert!(!document.contains("tskey-secret-42"));
}

#[tokio::test]
async fn test_default_token_fills_in() {
    let h = Harness::builder().default_token("tskey-default").build();
    let request = dev_request("dev1", "u1").with_network_identity(None);
    h.orchestrator.create(&user("u1"), request).await.unwrap();
    h.settle("dev1").await;
    assert!(h.mesh.is_enrolled("dev1"));
}

#[tokio::test]
async fn test_missing_token_without_default() {
    let h = Harness::new();
    let request = dev_request("dev1", "u1").with_network_identity(None);
    match h.orchestrator.create(&user("u1"), request).await {
        Err(OrchestratorError::Validation(e)) => assert_eq!(e.kind, ValidationKind::MissingField),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.runtime.builds(), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new();
    h.mesh.fail_enrollments(2);
    h.orchestrator.create(&user("u1"), networked("dev1", "tskey-1")).await.unwrap();
    h.settle("dev1").await;

    assert_eq!(h.mesh.enroll_attempts("dev1"), 3);
    let record = h.orchestrator.status(&user("u1"), "dev1").await.unwrap();
    assert_eq!(record.network_identity.unwrap().enrollment_state, EnrollmentState::Enrolled);
}

#[tokio::test]
async fn test_rejected_enrollment_leaves_workload_running() {
    let h = Harness::new();
    h.mesh.reject_enrollments("auth key revoked");
    h.orchestrator.create(&user("u1"), networked("dev1", "tskey-1")).await.unwrap();
    h.settle("dev1").await;

    let record = h.orchestrator.status(&user("u1"), "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Running);
    let identity = record.network_identity.unwrap();
    assert_eq!(identity.enrollment_state, EnrollmentState::Failed);
    assert!(identity.last_error.unwrap().contains("revoked"));
    assert_eq!(h.mesh.enroll_attempts("dev1"), 1);
}

#[tokio::test]
async fn test_destroy_deregisters() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, networked("dev1", "tskey-1")).await.unwrap();
    h.settle("dev1").await;

    let outcome = h.orchestrator.destroy(&u1, "dev1").await.unwrap();
    assert!(outcome.network_released);
    assert!(!h.mesh.is_enrolled("dev1"));
}

#[tokio::test]
async fn test_deregistration_failure_does_not_block_teardown() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, networked("dev1", "tskey-1")).await.unwrap();
    h.settle("dev1").await;
    h.mesh.fail_deregistrations(1);

    let outcome = h.orchestrator.destroy(&u1, "dev1").await.unwrap();
    assert!(!outcome.network_released);
    assert!(outcome.storage_released);
    assert!(h.runtime.instances().is_empty());
}

#[tokio::test]
async fn test_recreated_name_resets_mesh_state() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, networked("dev1", "tskey-1")).await.unwrap();
    h.settle("dev1").await;
    assert!(!h.mesh.enrollment("dev1").unwrap().reset);

    h.orchestrator.destroy(&u1, "dev1").await.unwrap();
    h.orchestrator.create(&u1, networked("dev1", "tskey-1")).await.unwrap();
    h.settle("dev1").await;
    assert!(h.mesh.enrollment("dev1").unwrap().reset);
}
