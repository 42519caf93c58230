/*!
 * Ownership Tests
 * Requesters only ever see and touch their own workloads
 */

use super::support::{dev_request, user, Harness};
use workload_orchestrator::core::WorkloadState;
use workload_orchestrator::sandbox::InstanceStatus;
use workload_orchestrator::OrchestratorError;

fn is_ownership(result: &Result<impl std::fmt::Debug, OrchestratorError>) -> bool {
    matches!(result, Err(OrchestratorError::Ownership(_)))
}

#[tokio::test]
async fn test_foreign_operations_are_rejected() {
    let h = Harness::new();
    h.orchestrator.create(&user("u1"), dev_request("dev1", "u1")).await.unwrap();
    let u2 = user("u2");

    assert!(is_ownership(&h.orchestrator.stop(&u2, "dev1").await));
    assert!(is_ownership(&h.orchestrator.start(&u2, "dev1").await));
    assert!(is_ownership(&h.orchestrator.destroy(&u2, "dev1").await));
    assert!(is_ownership(&h.orchestrator.reconcile(&u2, "dev1").await));
    assert!(is_ownership(&h.orchestrator.status(&u2, "dev1").await));

    let record = h.orchestrator.status(&user("u1"), "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Running);
    assert_eq!(h.runtime.instance_status("dev1"), InstanceStatus::Running);
}

#[tokio::test]
async fn test_create_on_behalf_of_another_owner() {
    let h = Harness::new();
    let result = h.orchestrator.create(&user("u2"), dev_request("dev1", "u1")).await;
    assert!(is_ownership(&result));
    assert_eq!(h.runtime.builds(), 0);
}

#[tokio::test]
async fn test_taking_a_foreign_name() {
    let h = Harness::new();
    h.orchestrator.create(&user("u1"), dev_request("dev1", "u1")).await.unwrap();

    let result = h.orchestrator.create(&user("u2"), dev_request("dev1", "u2")).await;
    assert!(is_ownership(&result));
    assert_eq!(h.orchestrator.status(&user("u1"), "dev1").await.unwrap().owner, "u1");
}

#[tokio::test]
async fn test_list_is_filtered_per_requester() {
    let h = Harness::new();
    h.orchestrator.create(&user("u1"), dev_request("b1", "u1")).await.unwrap();
    h.orchestrator.create(&user("u1"), dev_request("a1", "u1")).await.unwrap();
    h.orchestrator.create(&user("u2"), dev_request("c1", "u2")).await.unwrap();

    let names: Vec<String> = h.orchestrator.list(&user("u1")).into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["a1".to_string(), "b1".to_string()]);

    let names: Vec<String> = h.orchestrator.list(&user("u2")).into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["c1".to_string()]);

    assert!(h.orchestrator.list(&user("u3")).is_empty());
}

#[tokio::test]
async fn test_unknown_name_is_not_found_for_everyone() {
    let h = Harness::new();
    let result = h.orchestrator.destroy(&user("u1"), "ghost").await;
    assert!(matches!(result, Err(OrchestratorError::NotFound { .. })));
}
