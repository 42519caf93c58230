/*!
 * Recovery Tests
 * Partial failures, rollback, timeouts and reconciliation
 */

use super::support::{dev_request, user, workload_dataset, workspace_dataset, Harness};
use workload_orchestrator::core::{BuildErrorKind, RuntimeErrorKind, Stage, StorageErrorKind, WorkloadState};
use workload_orchestrator::sandbox::{InstanceStatus, RuntimeFault, RuntimeOp};
use workload_orchestrator::storage::VolumeOp;
use workload_orchestrator::OrchestratorError;

#[tokio::test]
async fn test_build_failure_names_fragment_and_rolls_back() {
    let h = Harness::new();
    let u1 = user("u1");
    h.runtime
        .fail_next(RuntimeOp::Build, RuntimeFault::BrokenFragment("fish".into()), 1);

    match h.orchestrator.create(&u1, dev_request("dev1", "u1")).await {
        Err(OrchestratorError::Build(e)) => {
            assert_eq!(e.kind, BuildErrorKind::BuilderInvocationFailed);
            assert_eq!(e.fragment.as_deref(), Some("fish"));
        }
        other => panic!("unexpected {:?}", other),
    }

    let record = h.orchestrator.status(&u1, "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Failed);
    let failure = record.failure.unwrap();
    assert_eq!(failure.stage, Stage::Build);
    assert!(failure.message.len() < 200);
    assert!(!h.volumes.contains(&workload_dataset("u1", "dev1")));

    // The owner may retry under the same name
    let record = h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    assert_eq!(record.state, WorkloadState::Running);
}

#[tokio::test]
async fn test_start_failure_tears_down_then_releases_storage() {
    let h = Harness::new();
    let u1 = user("u1");
    h.runtime.fail_next(RuntimeOp::Start, RuntimeFault::Fail, 1);

    match h.orchestrator.create(&u1, dev_request("dev1", "u1")).await {
        Err(OrchestratorError::Runtime(e)) => assert_eq!(e.kind, RuntimeErrorKind::StartFailed),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.runtime.instance_status("dev1"), InstanceStatus::Absent);
    assert!(!h.volumes.contains(&workload_dataset("u1", "dev1")));
    let record = h.orchestrator.status(&u1, "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Failed);
    assert!(record.storage_path.is_none());
}

#[tokio::test]
async fn test_storage_kept_when_teardown_after_start_failure_fails() {
    let h = Harness::new();
    let u1 = user("u1");
    h.runtime.fail_next(RuntimeOp::Start, RuntimeFault::Fail, 1);
    h.runtime.fail_next(RuntimeOp::Destroy, RuntimeFault::Fail, 1);

    assert!(h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.is_err());
    assert_eq!(h.runtime.instance_status("dev1"), InstanceStatus::Stopped);
    assert!(h.volumes.contains(&workspace_dataset("u1", "dev1")));
    let record = h.orchestrator.status(&u1, "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Failed);
    assert!(record.storage_path.is_some());

    // Destroying the failed record finishes the job
    let outcome = h.orchestrator.destroy(&u1, "dev1").await.unwrap();
    assert!(outcome.storage_released);
    assert!(h.runtime.instances().is_empty());
}

#[tokio::test]
async fn test_timed_out_build_that_completes_is_reconciled_to_running() {
    let h = Harness::new();
    let u1 = user("u1");
    h.runtime
        .fail_next(RuntimeOp::Build, RuntimeFault::TimeOut { completes: true }, 1);

    match h.orchestrator.create(&u1, dev_request("dev1", "u1")).await {
        Err(OrchestratorError::Timeout { stage, .. }) => assert_eq!(stage, Stage::Build),
        other => panic!("unexpected {:?}", other),
    }
    let record = h.orchestrator.status(&u1, "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Provisioning);
    assert!(h.volumes.contains(&workspace_dataset("u1", "dev1")));

    let record = h.orchestrator.reconcile(&u1, "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Running);
}

#[tokio::test]
async fn test_timed_out_build_that_never_lands_is_reconciled_to_failed() {
    let h = Harness::new();
    let u1 = user("u1");
    h.runtime
        .fail_next(RuntimeOp::Build, RuntimeFault::TimeOut { completes: false }, 1);

    assert!(h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.is_err());
    let record = h.orchestrator.reconcile(&u1, "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Failed);
    assert!(!h.volumes.contains(&workload_dataset("u1", "dev1")));
}

#[tokio::test]
async fn test_provisioning_record_rejects_start() {
    let h = Harness::new();
    let u1 = user("u1");
    h.runtime
        .fail_next(RuntimeOp::Build, RuntimeFault::TimeOut { completes: true }, 1);
    assert!(h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.is_err());

    assert!(matches!(
        h.orchestrator.start(&u1, "dev1").await,
        Err(OrchestratorError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_teardown_failure_keeps_storage_and_record() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    h.runtime.fail_next(RuntimeOp::Destroy, RuntimeFault::Fail, 1);

    match h.orchestrator.destroy(&u1, "dev1").await {
        Err(e) => assert_eq!(e.stage(), Stage::Teardown),
        Ok(outcome) => panic!("unexpected {:?}", outcome),
    }
    let record = h.orchestrator.status(&u1, "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Destroying);
    assert!(h.volumes.contains(&workspace_dataset("u1", "dev1")));

    let outcome = h.orchestrator.destroy(&u1, "dev1").await.unwrap();
    assert!(outcome.storage_released);
    assert!(h.orchestrator.list(&u1).is_empty());
}

#[tokio::test]
async fn test_storage_release_failure_is_queued_and_retried() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    h.volumes.fail_next(VolumeOp::Destroy, StorageErrorKind::DestroyFailed, 2);

    let outcome = h.orchestrator.destroy(&u1, "dev1").await.unwrap();
    assert!(!outcome.storage_released);
    assert_eq!(outcome.storage_cleanup.unwrap().stage, Stage::StorageCleanup);
    assert!(h.orchestrator.list(&u1).is_empty());

    let pending = h.orchestrator.pending_cleanup();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "dev1");
    assert!(h.volumes.contains(&workspace_dataset("u1", "dev1")));

    let report = h.orchestrator.retry_pending_cleanup().await;
    assert_eq!((report.attempted, report.released, report.remaining), (1, 1, 0));
    assert!(!h.volumes.contains(&workload_dataset("u1", "dev1")));
}

#[tokio::test]
async fn test_recreate_clears_queued_cleanup_first() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    h.volumes.write(&workspace_dataset("u1", "dev1"), 4096).unwrap();
    h.volumes.fail_next(VolumeOp::Destroy, StorageErrorKind::DestroyFailed, 2);
    h.orchestrator.destroy(&u1, "dev1").await.unwrap();

    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();
    assert!(h.orchestrator.pending_cleanup().is_empty());
    // Fresh workspace, not the leftover one
    assert_eq!(h.volumes.used(&workspace_dataset("u1", "dev1")), 0);
}

#[tokio::test]
async fn test_reconcile_follows_external_changes() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev1", "u1")).await.unwrap();

    h.runtime.set_status("dev1", InstanceStatus::Stopped);
    assert_eq!(h.orchestrator.reconcile(&u1, "dev1").await.unwrap().state, WorkloadState::Stopped);

    h.runtime.set_status("dev1", InstanceStatus::Running);
    assert_eq!(h.orchestrator.reconcile(&u1, "dev1").await.unwrap().state, WorkloadState::Running);

    h.runtime.vanish("dev1");
    let record = h.orchestrator.reconcile(&u1, "dev1").await.unwrap();
    assert_eq!(record.state, WorkloadState::Failed);
    assert!(h.volumes.contains(&workspace_dataset("u1", "dev1")));
}

#[tokio::test]
async fn test_failed_workspace_leaves_no_workload_dataset() {
    let h = Harness::new();
    let u1 = user("u1");
    h.orchestrator.create(&u1, dev_request("dev0", "u1")).await.unwrap();
    h.volumes
        .fail_dataset(VolumeOp::Ensure, &workspace_dataset("u1", "dev1"), StorageErrorKind::CreateFailed, 1);

    match h.orchestrator.create(&u1, dev_request("dev1", "u1")).await {
        Err(OrchestratorError::Storage(e)) => assert_eq!(e.kind, StorageErrorKind::CreateFailed),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!h.volumes.contains(&workload_dataset("u1", "dev1")));
    assert!(h.orchestrator.pending_cleanup().is_empty());
    // Shared parents and the sibling workload are untouched
    assert!(h.volumes.contains(&workspace_dataset("u1", "dev0")));
    assert_eq!(h.orchestrator.list(&u1).len(), 1);
}
